pub mod access;
pub mod auth;
pub mod channels;
pub mod club;
pub mod content;
pub mod dashboard;
pub mod error;
pub mod messages;
pub mod middleware;
pub mod roles;
pub mod servers;
pub mod uploads;
pub mod users;

use axum::{
    Json, Router,
    extract::DefaultBodyLimit,
    http::StatusCode,
    middleware::from_fn_with_state,
    response::IntoResponse,
    routing::{get, post, put},
};
use serde_json::json;

use scdio_db::Database;
use scdio_types::api::HealthResponse;

use crate::auth::AppState;
use crate::error::{ApiError, ApiResult};

/// Room for the multipart framing around a maximum-size file.
const BODY_LIMIT: usize = uploads::MAX_UPLOAD_BYTES + 64 * 1024;

/// Every REST route, nested under `/api`, with the JSON 404 fallback.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/users/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/users/login", post(auth::login))
        .route("/health", get(health));

    let protected_routes = Router::new()
        // Users + club-wide roles
        .route("/users/me", get(users::me).put(users::update_me))
        .route("/users/online", get(users::online_users))
        .route("/users/status", put(users::update_status))
        .route("/roles", get(roles::list_roles).post(roles::create_role))
        .route("/roles/{id}", put(roles::rename_role).delete(roles::delete_role))
        .route("/users/{id}/roles", post(roles::assign_user_role))
        .route("/users/{id}/roles/{role_id}", axum::routing::delete(roles::remove_user_role))
        // Servers
        .route("/servers", get(servers::list_servers).post(servers::create_server))
        .route("/servers/join", post(servers::join_with_body))
        .route("/servers/join/{code}", post(servers::join_with_code))
        .route(
            "/servers/{id}",
            get(servers::get_server)
                .put(servers::update_server)
                .delete(servers::delete_server),
        )
        .route("/servers/{id}/members", get(servers::list_members))
        .route("/servers/{id}/members/{user_id}", axum::routing::delete(servers::remove_member))
        .route("/servers/{id}/members/{user_id}/promote", post(servers::promote_member))
        .route("/servers/{id}/roles", get(roles::list_server_roles).post(roles::create_server_role))
        .route(
            "/servers/{id}/roles/{role_id}",
            put(roles::update_server_role).delete(roles::delete_server_role),
        )
        .route("/servers/{id}/members/{user_id}/roles", post(roles::assign_member_role))
        .route(
            "/servers/{id}/members/{user_id}/roles/{role_id}",
            axum::routing::delete(roles::remove_member_role),
        )
        // Channels + messages
        .route("/servers/{id}/channels", get(channels::list_channels).post(channels::create_channel))
        .route("/servers/{id}/categories", post(channels::create_category))
        .route("/channels", get(channels::my_channels))
        .route(
            "/channels/{id}/messages",
            get(messages::channel_messages).post(messages::post_to_channel),
        )
        .route("/messages", post(messages::post_message))
        .route(
            "/messages/{id}",
            get(messages::list_by_offset)
                .put(messages::edit_message)
                .delete(messages::delete_message),
        )
        .route("/messages/{id}/reactions", post(messages::toggle_reaction))
        // Club management
        .route("/tasks", get(club::list_tasks).post(club::create_task))
        .route(
            "/tasks/{id}",
            get(club::get_task).put(club::update_task).delete(club::delete_task),
        )
        .route("/events", get(club::list_events).post(club::create_event))
        .route(
            "/events/{id}",
            get(club::get_event).put(club::update_event).delete(club::delete_event),
        )
        .route("/budgets", get(club::list_budgets).post(club::create_budget))
        .route(
            "/budgets/{id}",
            get(club::get_budget).put(club::update_budget).delete(club::delete_budget),
        )
        .route("/equipments", get(club::list_equipment).post(club::create_equipment))
        .route(
            "/equipments/{id}",
            get(club::get_equipment)
                .put(club::update_equipment)
                .delete(club::delete_equipment),
        )
        // Shared content
        .route("/wiki", get(content::list_wiki).post(content::create_wiki))
        .route(
            "/wiki/{slug}",
            get(content::get_wiki).put(content::update_wiki).delete(content::delete_wiki),
        )
        .route("/posts", get(content::list_posts).post(content::create_post))
        .route(
            "/posts/{id}",
            get(content::get_post).put(content::update_post).delete(content::delete_post),
        )
        .route("/whiteboards", get(content::list_whiteboards).post(content::create_whiteboard))
        .route(
            "/whiteboards/{id}",
            get(content::get_whiteboard)
                .put(content::update_whiteboard)
                .delete(content::delete_whiteboard),
        )
        .route("/stamps", get(content::list_stamps).post(content::create_stamp))
        .route("/stamps/{id}", get(content::get_stamp).delete(content::delete_stamp))
        // Dashboard
        .route("/dashboard/stats", get(dashboard::stats))
        .route("/dashboard/activities", get(dashboard::activities))
        .route("/dashboard/task-progress", get(dashboard::task_progress))
        .route("/dashboard/budget-chart", get(dashboard::budget_chart))
        .route_layer(from_fn_with_state(state.clone(), middleware::require_auth));

    Router::new()
        .nest("/api", public_routes.merge(protected_routes))
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .with_state(state)
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "OK".into(),
        timestamp: chrono::Utc::now(),
    })
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Json(json!({ "error": "Endpoint not found" })))
}

/// Run blocking DB work off the async runtime.
pub(crate) async fn blocking<T, F>(state: &AppState, f: F) -> ApiResult<T>
where
    F: FnOnce(&Database) -> ApiResult<T> + Send + 'static,
    T: Send + 'static,
{
    let db = state.db.clone();
    tokio::task::spawn_blocking(move || f(&db)).await.map_err(ApiError::from)?
}


#[cfg(test)]
mod tests {
    use axum::http::StatusCode;

    use crate::test_support::test_app;

    #[tokio::test]
    async fn test_health_is_public() {
        let app = test_app();
        let (status, body) = app.get("/api/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "OK");
    }

    #[tokio::test]
    async fn test_unknown_route_is_json_404() {
        let app = test_app();
        let (status, body) = app.get("/api/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Endpoint not found");

        let (status, _) = app.get("/elsewhere", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
