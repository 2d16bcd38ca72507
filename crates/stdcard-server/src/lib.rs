pub mod cards;
pub mod config;
pub mod error;
pub mod generate;

use std::sync::Arc;

use axum::{
    Json, Router,
    routing::{get, post},
};
use lm_client::LmClient;
use serde_json::{Value, json};
use tokio::sync::RwLock;

use crate::cards::CardStore;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub cards: RwLock<CardStore>,
    pub lm: LmClient,
}

impl AppStateInner {
    pub fn new(lm: LmClient) -> AppState {
        Arc::new(Self {
            cards: RwLock::new(CardStore::default()),
            lm,
        })
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(welcome))
        .route("/generate-card/", post(generate::generate_card))
        .route("/save-card/", post(cards::save_card))
        .route("/cards/", get(cards::list_cards))
        .route("/cards/{id}", get(cards::get_card).delete(cards::delete_card))
        .with_state(state)
}

async fn welcome() -> Json<Value> {
    Json(json!({ "message": "フラッシュカードAIツールへようこそ！" }))
}
