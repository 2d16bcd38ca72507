pub mod config;
pub mod error;
pub mod problems;
pub mod review;
pub mod sandbox;

use std::sync::Arc;

use axum::{
    Json, Router,
    routing::{get, post},
};
use lm_client::LmClient;
use serde_json::{Value, json};
use tokio::sync::RwLock;

use crate::problems::ProblemStore;
use crate::sandbox::Sandbox;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub problems: RwLock<ProblemStore>,
    pub sandbox: Sandbox,
    pub lm: LmClient,
}

impl AppStateInner {
    pub fn new(sandbox: Sandbox, lm: LmClient) -> AppState {
        Arc::new(Self {
            problems: RwLock::new(ProblemStore::default()),
            sandbox,
            lm,
        })
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(welcome))
        .route("/problems", get(problems::list_problems).post(problems::create_problem))
        .route("/problems/{id}", get(problems::get_problem))
        .route("/submit", post(review::submit))
        .with_state(state)
}

async fn welcome() -> Json<Value> {
    Json(json!({ "message": "Welcome to Proger Backend!" }))
}
