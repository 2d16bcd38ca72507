use axum::{
    Extension, Json,
    extract::{Query, State},
};

use scdio_types::api::{Claims, ScopeQuery};
use scdio_types::events::{GatewayEvent, Room};
use scdio_types::models::{Activity, BudgetChartPoint, DashboardStats, TaskProgress};

use crate::access::check_scope;
use crate::auth::AppState;
use crate::blocking;
use crate::error::ApiResult;

/// Tell dashboard subscribers that something they display changed.
pub(crate) fn notify(state: &AppState, kind: &str) {
    state.dispatcher.broadcast(
        Room::Dashboard,
        GatewayEvent::DashboardUpdate { kind: kind.to_string() },
    );
}

pub async fn stats(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(scope): Query<ScopeQuery>,
) -> ApiResult<Json<DashboardStats>> {
    let stats = blocking(&state, move |db| {
        let visible = check_scope(db, scope.server_id, claims.sub)?;
        Ok(db.dashboard_stats(visible)?)
    })
    .await?;
    Ok(Json(stats))
}

pub async fn activities(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(scope): Query<ScopeQuery>,
) -> ApiResult<Json<Vec<Activity>>> {
    let activities = blocking(&state, move |db| {
        let visible = check_scope(db, scope.server_id, claims.sub)?;
        Ok(db.recent_activities(visible)?)
    })
    .await?;
    Ok(Json(activities))
}

pub async fn task_progress(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(scope): Query<ScopeQuery>,
) -> ApiResult<Json<Vec<TaskProgress>>> {
    let progress = blocking(&state, move |db| {
        let visible = check_scope(db, scope.server_id, claims.sub)?;
        Ok(db.task_progress(visible)?)
    })
    .await?;
    Ok(Json(progress))
}

pub async fn budget_chart(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(scope): Query<ScopeQuery>,
) -> ApiResult<Json<Vec<BudgetChartPoint>>> {
    let chart = blocking(&state, move |db| {
        let visible = check_scope(db, scope.server_id, claims.sub)?;
        Ok(db.budget_chart(visible)?)
    })
    .await?;
    Ok(Json(chart))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use crate::test_support::test_app;

    #[tokio::test]
    async fn test_dashboard_reflects_club_data() {
        let app = test_app();
        let (teacher, teacher_id) = app.register("sensei").await;
        app.make_teacher(teacher_id);

        app.post_json("/api/tasks", Some(&teacher), json!({"title": "楽譜を配る"}))
            .await;
        app.post_json(
            "/api/budgets",
            Some(&teacher),
            json!({"name": "部費", "amount": 30000, "type": "income", "date": "2025-04-01"}),
        )
        .await;
        app.post_json(
            "/api/budgets",
            Some(&teacher),
            json!({"name": "リード", "amount": 4500, "type": "expense", "date": "2025-04-15"}),
        )
        .await;

        let (status, stats) = app.get("/api/dashboard/stats", Some(&teacher)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(stats["totalTasks"], 1);
        assert_eq!(stats["activeBudget"], 30000);
        assert_eq!(stats["monthlyExpenses"], 4500);

        let (_, activities) = app.get("/api/dashboard/activities", Some(&teacher)).await;
        assert_eq!(activities[0]["type"], "task");
        assert_eq!(activities[0]["user"]["username"], "sensei");

        let (_, progress) = app.get("/api/dashboard/task-progress", Some(&teacher)).await;
        assert_eq!(progress[0]["name"], "todo");

        let (_, chart) = app.get("/api/dashboard/budget-chart", Some(&teacher)).await;
        assert_eq!(chart, json!([{"month": "2025-04", "budget": 30000, "spent": 4500}]));
    }

    #[tokio::test]
    async fn test_scoped_dashboard_requires_membership() {
        let app = test_app();
        let (owner, _) = app.register("owner").await;
        let (other, _) = app.register("other").await;
        let server_id = app.create_server(&owner, "Band").await;

        let (status, stats) = app
            .get(&format!("/api/dashboard/stats?server_id={server_id}"), Some(&owner))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(stats["totalMembers"], 1);

        let (status, _) = app
            .get(&format!("/api/dashboard/stats?server_id={server_id}"), Some(&other))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_unscoped_dashboard_hides_other_servers() {
        let app = test_app();
        let (owner, _) = app.register("owner").await;
        let (other, _) = app.register("other").await;
        let server_id = app.create_server(&owner, "Band").await;
        app.post_json("/api/tasks", Some(&owner), json!({"title": "合宿の準備", "server_id": server_id}))
            .await;
        app.post_json("/api/tasks", Some(&other), json!({"title": "譜面台を返す"}))
            .await;

        let (_, stats) = app.get("/api/dashboard/stats", Some(&owner)).await;
        assert_eq!(stats["totalTasks"], 2);
        let (_, stats) = app.get("/api/dashboard/stats", Some(&other)).await;
        assert_eq!(stats["totalTasks"], 1);

        let (_, activities) = app.get("/api/dashboard/activities", Some(&other)).await;
        let activities = activities.as_array().unwrap();
        assert_eq!(activities.len(), 1);
        assert_eq!(activities[0]["description"], "譜面台を返す");
    }
}
