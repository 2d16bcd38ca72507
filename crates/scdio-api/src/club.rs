//! Club management: tasks, events, budgets and equipment.
//!
//! Tasks belong to whoever created them. The other three are run by
//! teachers; members can only read them.

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;

use scdio_db::Database;
use scdio_db::queries::{NewBudget, NewEquipment, NewEvent, NewTask, TaskChanges, TaskFilter};
use scdio_types::api::{
    BudgetRequest, Claims, CreateTaskRequest, EquipmentRequest, EventRequest, ScopeQuery, TaskQuery,
    UpdateTaskRequest, required,
};
use scdio_types::models::{Budget, BudgetType, Equipment, Event, Task};
use scdio_types::time::{normalize_date, normalize_datetime};

use crate::access::{check_scope, require_owner_or_teacher, require_teacher};
use crate::auth::AppState;
use crate::blocking;
use crate::dashboard;
use crate::error::{ApiError, ApiResult};

fn optional_date(value: &Option<String>) -> ApiResult<Option<String>> {
    required(value)
        .map(|raw| normalize_date(raw).ok_or_else(|| ApiError::bad_request("Invalid date")))
        .transpose()
}

fn optional_datetime(value: &Option<String>) -> ApiResult<Option<String>> {
    required(value)
        .map(|raw| normalize_datetime(raw).ok_or_else(|| ApiError::bad_request("Invalid date")))
        .transpose()
}

fn user_exists(db: &Database, user_id: Option<i64>) -> ApiResult<()> {
    match user_id {
        Some(id) if db.get_user(id)?.is_none() => Err(ApiError::bad_request("Assignee not found")),
        _ => Ok(()),
    }
}

// -- Tasks --

pub async fn list_tasks(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<TaskQuery>,
) -> ApiResult<Json<Vec<Task>>> {
    let tasks = blocking(&state, move |db| {
        let visible = check_scope(db, query.server_id, claims.sub)?;
        Ok(db.list_tasks(TaskFilter {
            user_id: query.user_id,
            scope: visible,
        })?)
    })
    .await?;
    Ok(Json(tasks))
}

pub async fn create_task(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateTaskRequest>,
) -> ApiResult<impl IntoResponse> {
    let task = blocking(&state, move |db| {
        let title = required(&req.title).ok_or_else(|| ApiError::bad_request("Title is required"))?;
        check_scope(db, req.server_id, claims.sub)?;
        user_exists(db, req.assignee_id)?;
        let due_date = optional_date(&req.due_date)?;
        Ok(db.create_task(&NewTask {
            server_id: req.server_id,
            title,
            description: required(&req.description),
            status: required(&req.status),
            priority: required(&req.priority),
            assignee_id: req.assignee_id,
            user_id: claims.sub,
            due_date: due_date.as_deref(),
        })?)
    })
    .await?;

    info!("Task {} created by user {}", task.id, task.user_id);
    dashboard::notify(&state, "task");
    Ok((StatusCode::CREATED, Json(task)))
}

pub async fn get_task(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Task>> {
    let task = blocking(&state, move |db| {
        let task = db.get_task(id)?.ok_or_else(|| ApiError::not_found("Task not found"))?;
        check_scope(db, task.server_id, claims.sub)?;
        Ok(task)
    })
    .await?;
    Ok(Json(task))
}

pub async fn update_task(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateTaskRequest>,
) -> ApiResult<Json<Task>> {
    let task = blocking(&state, move |db| {
        let task = db.get_task(id)?.ok_or_else(|| ApiError::not_found("Task not found"))?;
        require_owner_or_teacher(db, Some(task.user_id), claims.sub)?;
        user_exists(db, req.assignee_id)?;
        let due_date = optional_date(&req.due_date)?;
        db.update_task(
            id,
            &TaskChanges {
                title: required(&req.title),
                description: req.description.as_deref(),
                status: required(&req.status),
                priority: required(&req.priority),
                assignee_id: req.assignee_id,
                due_date: due_date.as_deref(),
                completed: req.completed,
            },
        )?
        .ok_or_else(|| ApiError::not_found("Task not found"))
    })
    .await?;

    dashboard::notify(&state, "task");
    Ok(Json(task))
}

pub async fn delete_task(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    blocking(&state, move |db| {
        let task = db.get_task(id)?.ok_or_else(|| ApiError::not_found("Task not found"))?;
        require_owner_or_teacher(db, Some(task.user_id), claims.sub)?;
        db.delete_task(id)?;
        Ok(())
    })
    .await?;

    dashboard::notify(&state, "task");
    Ok(StatusCode::NO_CONTENT)
}

// -- Events --

pub async fn list_events(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(scope): Query<ScopeQuery>,
) -> ApiResult<Json<Vec<Event>>> {
    let events = blocking(&state, move |db| {
        let visible = check_scope(db, scope.server_id, claims.sub)?;
        Ok(db.list_events(visible)?)
    })
    .await?;
    Ok(Json(events))
}

/// Validated owned copy of an `EventRequest`.
struct EventFields {
    name: String,
    start_time: String,
    end_time: Option<String>,
}

impl EventFields {
    fn parse(req: &EventRequest) -> ApiResult<Self> {
        let (Some(name), Some(start)) = (required(&req.name), required(&req.start_time)) else {
            return Err(ApiError::bad_request("Name and start time are required"));
        };
        let start_time = normalize_datetime(start).ok_or_else(|| ApiError::bad_request("Invalid date"))?;
        let end_time = optional_datetime(&req.end_time)?;
        if end_time.as_deref().is_some_and(|end| end < start_time.as_str()) {
            return Err(ApiError::bad_request("End time must be after start time"));
        }
        Ok(Self {
            name: name.to_string(),
            start_time,
            end_time,
        })
    }

    fn new_event<'a>(&'a self, req: &'a EventRequest) -> NewEvent<'a> {
        NewEvent {
            server_id: req.server_id,
            name: &self.name,
            description: required(&req.description),
            start_time: &self.start_time,
            end_time: self.end_time.as_deref(),
            location: required(&req.location),
            max_participants: req.max_participants,
        }
    }
}

pub async fn create_event(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<EventRequest>,
) -> ApiResult<impl IntoResponse> {
    let event = blocking(&state, move |db| {
        require_teacher(db, claims.sub)?;
        check_scope(db, req.server_id, claims.sub)?;
        let fields = EventFields::parse(&req)?;
        Ok(db.create_event(claims.sub, &fields.new_event(&req))?)
    })
    .await?;

    info!("Event '{}' scheduled for {}", event.name, event.start_time);
    dashboard::notify(&state, "event");
    Ok((StatusCode::CREATED, Json(event)))
}

pub async fn get_event(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Event>> {
    let event = blocking(&state, move |db| {
        let event = db.get_event(id)?.ok_or_else(|| ApiError::not_found("Event not found"))?;
        check_scope(db, event.server_id, claims.sub)?;
        Ok(event)
    })
    .await?;
    Ok(Json(event))
}

pub async fn update_event(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    Json(req): Json<EventRequest>,
) -> ApiResult<Json<Event>> {
    let event = blocking(&state, move |db| {
        require_teacher(db, claims.sub)?;
        let fields = EventFields::parse(&req)?;
        db.update_event(id, &fields.new_event(&req))?
            .ok_or_else(|| ApiError::not_found("Event not found"))
    })
    .await?;

    dashboard::notify(&state, "event");
    Ok(Json(event))
}

pub async fn delete_event(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    blocking(&state, move |db| {
        require_teacher(db, claims.sub)?;
        if db.delete_event(id)? {
            Ok(())
        } else {
            Err(ApiError::not_found("Event not found"))
        }
    })
    .await?;

    dashboard::notify(&state, "event");
    Ok(StatusCode::NO_CONTENT)
}

// -- Budgets --

pub async fn list_budgets(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(scope): Query<ScopeQuery>,
) -> ApiResult<Json<Vec<Budget>>> {
    let budgets = blocking(&state, move |db| {
        let visible = check_scope(db, scope.server_id, claims.sub)?;
        Ok(db.list_budgets(visible)?)
    })
    .await?;
    Ok(Json(budgets))
}

struct BudgetFields {
    amount: i64,
    budget_type: BudgetType,
    date: Option<String>,
}

impl BudgetFields {
    fn parse(req: &BudgetRequest) -> ApiResult<Self> {
        let (Some(_), Some(amount), Some(kind)) = (required(&req.name), req.amount, required(&req.budget_type))
        else {
            return Err(ApiError::bad_request("Name, amount and type are required"));
        };
        if amount < 0 {
            return Err(ApiError::bad_request("Amount must not be negative"));
        }
        let budget_type =
            BudgetType::parse(kind).ok_or_else(|| ApiError::bad_request("Type must be income or expense"))?;
        Ok(Self {
            amount,
            budget_type,
            date: optional_date(&req.date)?,
        })
    }

    fn new_budget<'a>(&'a self, req: &'a BudgetRequest) -> NewBudget<'a> {
        NewBudget {
            server_id: req.server_id,
            name: required(&req.name).unwrap_or_default(),
            description: required(&req.description),
            amount: self.amount,
            budget_type: self.budget_type,
            category: required(&req.category),
            date: self.date.as_deref(),
        }
    }
}

pub async fn create_budget(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<BudgetRequest>,
) -> ApiResult<impl IntoResponse> {
    let budget = blocking(&state, move |db| {
        require_teacher(db, claims.sub)?;
        check_scope(db, req.server_id, claims.sub)?;
        let fields = BudgetFields::parse(&req)?;
        Ok(db.create_budget(claims.sub, &fields.new_budget(&req))?)
    })
    .await?;

    dashboard::notify(&state, "budget");
    Ok((StatusCode::CREATED, Json(budget)))
}

pub async fn get_budget(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Budget>> {
    let budget = blocking(&state, move |db| {
        let budget = db.get_budget(id)?.ok_or_else(|| ApiError::not_found("Budget not found"))?;
        check_scope(db, budget.server_id, claims.sub)?;
        Ok(budget)
    })
    .await?;
    Ok(Json(budget))
}

pub async fn update_budget(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    Json(req): Json<BudgetRequest>,
) -> ApiResult<Json<Budget>> {
    let budget = blocking(&state, move |db| {
        require_teacher(db, claims.sub)?;
        let fields = BudgetFields::parse(&req)?;
        db.update_budget(id, &fields.new_budget(&req))?
            .ok_or_else(|| ApiError::not_found("Budget not found"))
    })
    .await?;

    dashboard::notify(&state, "budget");
    Ok(Json(budget))
}

pub async fn delete_budget(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    blocking(&state, move |db| {
        require_teacher(db, claims.sub)?;
        if db.delete_budget(id)? {
            Ok(())
        } else {
            Err(ApiError::not_found("Budget not found"))
        }
    })
    .await?;

    dashboard::notify(&state, "budget");
    Ok(StatusCode::NO_CONTENT)
}

// -- Equipment --

pub async fn list_equipment(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(scope): Query<ScopeQuery>,
) -> ApiResult<Json<Vec<Equipment>>> {
    let items = blocking(&state, move |db| {
        let visible = check_scope(db, scope.server_id, claims.sub)?;
        Ok(db.list_equipment(visible)?)
    })
    .await?;
    Ok(Json(items))
}

fn new_equipment(req: &EquipmentRequest) -> ApiResult<NewEquipment<'_>> {
    let name = required(&req.name).ok_or_else(|| ApiError::bad_request("Name is required"))?;
    if req.quantity.is_some_and(|q| q < 0) {
        return Err(ApiError::bad_request("Quantity must not be negative"));
    }
    Ok(NewEquipment {
        server_id: req.server_id,
        name,
        description: required(&req.description),
        quantity: req.quantity,
        location: required(&req.location),
        condition: required(&req.condition),
    })
}

pub async fn create_equipment(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<EquipmentRequest>,
) -> ApiResult<impl IntoResponse> {
    let item = blocking(&state, move |db| {
        require_teacher(db, claims.sub)?;
        check_scope(db, req.server_id, claims.sub)?;
        Ok(db.create_equipment(claims.sub, &new_equipment(&req)?)?)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(item)))
}

pub async fn get_equipment(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Equipment>> {
    let item = blocking(&state, move |db| {
        let item = db.get_equipment(id)?.ok_or_else(|| ApiError::not_found("Equipment not found"))?;
        check_scope(db, item.server_id, claims.sub)?;
        Ok(item)
    })
    .await?;
    Ok(Json(item))
}

pub async fn update_equipment(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    Json(req): Json<EquipmentRequest>,
) -> ApiResult<Json<Equipment>> {
    let item = blocking(&state, move |db| {
        require_teacher(db, claims.sub)?;
        db.update_equipment(id, &new_equipment(&req)?)?
            .ok_or_else(|| ApiError::not_found("Equipment not found"))
    })
    .await?;
    Ok(Json(item))
}

pub async fn delete_equipment(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    blocking(&state, move |db| {
        require_teacher(db, claims.sub)?;
        if db.delete_equipment(id)? {
            Ok(())
        } else {
            Err(ApiError::not_found("Equipment not found"))
        }
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use scdio_types::events::{GatewayEvent, Room};

    use crate::test_support::test_app;

    #[tokio::test]
    async fn test_task_lifecycle_and_ownership() {
        let app = test_app();
        let (alice, alice_id) = app.register("alice").await;
        let (bob, bob_id) = app.register("bob").await;
        let (teacher, teacher_id) = app.register("sensei").await;
        app.make_teacher(teacher_id);
        let mut rx = app.state.dispatcher.subscribe();

        let (status, body) = app.post_json("/api/tasks", Some(&alice), json!({"title": "  "})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Title is required");

        let (status, task) = app
            .post_json(
                "/api/tasks",
                Some(&alice),
                json!({"title": "譜面台を片付ける", "user_id": bob_id, "due_date": "2025-06-01T09:00"}),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(task["status"], "todo");
        assert_eq!(task["priority"], "medium");
        assert_eq!(task["assignee_id"], bob_id);
        assert_eq!(task["user_id"], alice_id);
        assert_eq!(task["due_date"], "2025-06-01");
        let id = task["id"].as_i64().unwrap();

        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.room, Room::Dashboard);
        assert!(matches!(&envelope.event, GatewayEvent::DashboardUpdate { kind } if kind == "task"));

        let (_, mine) = app.get(&format!("/api/tasks?user_id={bob_id}"), Some(&bob)).await;
        assert_eq!(mine.as_array().unwrap().len(), 1);

        let (status, _) = app
            .put_json(&format!("/api/tasks/{id}"), Some(&bob), json!({"completed": true}))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, done) = app
            .put_json(&format!("/api/tasks/{id}"), Some(&alice), json!({"completed": true}))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(done["status"], "done");
        assert_eq!(done["completed"], true);

        let (status, _) = app
            .put_json(&format!("/api/tasks/{id}"), Some(&alice), json!({"due_date": "someday"}))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = app.delete(&format!("/api/tasks/{id}"), Some(&teacher)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = app.get(&format!("/api/tasks/{id}"), Some(&alice)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_scoped_tasks_need_membership() {
        let app = test_app();
        let (owner, _) = app.register("owner").await;
        let (outsider, _) = app.register("outsider").await;
        let server_id = app.create_server(&owner, "Band").await;

        let (status, task) = app
            .post_json("/api/tasks", Some(&owner), json!({"title": "部室の掃除", "server_id": server_id}))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let id = task["id"].as_i64().unwrap();

        let (status, _) = app
            .post_json("/api/tasks", Some(&outsider), json!({"title": "x", "server_id": server_id}))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) = app.get(&format!("/api/tasks/{id}"), Some(&outsider)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, unscoped) = app.get("/api/tasks", Some(&outsider)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(unscoped, json!([]));
        let (_, unscoped) = app.get("/api/tasks", Some(&owner)).await;
        assert_eq!(unscoped.as_array().unwrap().len(), 1);
        let (status, scoped) = app.get(&format!("/api/tasks?server_id={server_id}"), Some(&owner)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(scoped[0]["id"], id);
    }

    #[tokio::test]
    async fn test_events_are_teacher_managed() {
        let app = test_app();
        let (member, _) = app.register("member").await;
        let (teacher, teacher_id) = app.register("sensei").await;
        app.make_teacher(teacher_id);

        let body = json!({"name": "定期演奏会", "start_time": "2025-07-20T14:00", "location": "市民ホール"});
        let (status, _) = app.post_json("/api/events", Some(&member), body.clone()).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, event) = app.post_json("/api/events", Some(&teacher), body).await;
        assert_eq!(status, StatusCode::CREATED);
        assert!(event["start_time"].as_str().unwrap().starts_with("2025-07-20T14:00:00"));
        assert_eq!(event["organizer_name"], "sensei");
        let id = event["id"].as_i64().unwrap();

        let (status, body) = app
            .put_json(&format!("/api/events/{id}"), Some(&teacher), json!({"name": "延期"}))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Name and start time are required");

        let (status, _) = app
            .put_json(
                &format!("/api/events/{id}"),
                Some(&teacher),
                json!({"name": "x", "start_time": "2025-07-20T14:00", "end_time": "2025-07-20T12:00"}),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, moved) = app
            .put_json(
                &format!("/api/events/{id}"),
                Some(&teacher),
                json!({"name": "定期演奏会", "start_time": "2025-07-27T14:00:00Z"}),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert!(moved["start_time"].as_str().unwrap().starts_with("2025-07-27T14:00:00"));
        assert!(moved["location"].is_null());

        let (_, events) = app.get("/api/events", Some(&member)).await;
        assert_eq!(events.as_array().unwrap().len(), 1);

        let (status, _) = app.delete(&format!("/api/events/{id}"), Some(&member)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) = app.delete(&format!("/api/events/{id}"), Some(&teacher)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = app.delete(&format!("/api/events/{id}"), Some(&teacher)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_budget_validation_and_defaults() {
        let app = test_app();
        let (teacher, teacher_id) = app.register("sensei").await;
        app.make_teacher(teacher_id);

        let (status, body) = app
            .post_json("/api/budgets", Some(&teacher), json!({"name": "弦", "amount": 800, "type": "gift"}))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Type must be income or expense");

        let (status, _) = app
            .post_json("/api/budgets", Some(&teacher), json!({"name": "弦", "type": "expense"}))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, budget) = app
            .post_json("/api/budgets", Some(&teacher), json!({"name": "弦", "amount": 800, "type": "expense"}))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(budget["category"], "general");
        assert_eq!(budget["approved_by"], teacher_id);
        assert_eq!(budget["date"].as_str().unwrap().len(), 10);
        let id = budget["id"].as_i64().unwrap();

        let (status, updated) = app
            .put_json(
                &format!("/api/budgets/{id}"),
                Some(&teacher),
                json!({"name": "弦", "amount": 950, "type": "expense", "category": "楽器"}),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["amount"], 950);
        assert_eq!(updated["date"], budget["date"]);

        let (status, _) = app.get(&format!("/api/budgets/{id}"), Some(&teacher)).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = app.delete(&format!("/api/budgets/{id}"), Some(&teacher)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_equipment_crud() {
        let app = test_app();
        let (member, _) = app.register("member").await;
        let (teacher, teacher_id) = app.register("sensei").await;
        app.make_teacher(teacher_id);

        let (status, _) = app
            .post_json("/api/equipments", Some(&member), json!({"name": "チューバ"}))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, item) = app
            .post_json("/api/equipments", Some(&teacher), json!({"name": "チューバ", "location": "音楽室"}))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(item["quantity"], 1);
        assert_eq!(item["condition"], "good");
        assert_eq!(item["responsible_user_name"], "sensei");
        let id = item["id"].as_i64().unwrap();

        let (status, item) = app
            .put_json(
                &format!("/api/equipments/{id}"),
                Some(&teacher),
                json!({"name": "チューバ", "quantity": 2, "condition": "needs repair"}),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(item["quantity"], 2);
        assert_eq!(item["condition"], "needs repair");

        let (_, list) = app.get("/api/equipments", Some(&member)).await;
        assert_eq!(list[0]["name"], "チューバ");

        let (status, _) = app.delete(&format!("/api/equipments/{id}"), Some(&teacher)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = app.get(&format!("/api/equipments/{id}"), Some(&member)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
