use axum::{
    Json,
    extract::{Path, State},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;

use crate::AppState;
use crate::error::{ApiError, ApiResult};

const NOT_FOUND: &str = "カードが見つかりません。";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flashcard {
    #[serde(default)]
    pub id: Option<u64>,
    pub question: String,
    pub answer: String,
}

#[derive(Debug, Default)]
pub struct CardStore {
    cards: Vec<Flashcard>,
    last_id: u64,
}

impl CardStore {
    pub fn next_id(&mut self) -> u64 {
        self.last_id += 1;
        self.last_id
    }

    /// Stores the card, assigning an id when it has none. A card whose id is
    /// already taken replaces the stored one.
    pub fn save(&mut self, mut card: Flashcard) -> Flashcard {
        let id = match card.id {
            Some(id) => {
                self.last_id = self.last_id.max(id);
                id
            }
            None => self.next_id(),
        };
        card.id = Some(id);
        match self.cards.iter_mut().find(|c| c.id == Some(id)) {
            Some(existing) => *existing = card.clone(),
            None => self.cards.push(card.clone()),
        }
        card
    }

    pub fn get(&self, id: u64) -> Option<&Flashcard> {
        self.cards.iter().find(|c| c.id == Some(id))
    }

    pub fn remove(&mut self, id: u64) -> bool {
        let before = self.cards.len();
        self.cards.retain(|c| c.id != Some(id));
        self.cards.len() < before
    }

    pub fn all(&self) -> &[Flashcard] {
        &self.cards
    }
}

pub async fn save_card(State(state): State<AppState>, Json(card): Json<Flashcard>) -> Json<Value> {
    let card = state.cards.write().await.save(card);
    info!("Saved card {:?}", card.id);
    Json(json!({ "message": "カードが正常に保存されました！", "card": card }))
}

pub async fn list_cards(State(state): State<AppState>) -> Json<Vec<Flashcard>> {
    Json(state.cards.read().await.all().to_vec())
}

pub async fn get_card(State(state): State<AppState>, Path(id): Path<u64>) -> ApiResult<Json<Flashcard>> {
    state
        .cards
        .read()
        .await
        .get(id)
        .cloned()
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(NOT_FOUND.into()))
}

pub async fn delete_card(State(state): State<AppState>, Path(id): Path<u64>) -> ApiResult<Json<Value>> {
    if state.cards.write().await.remove(id) {
        Ok(Json(json!({ "message": "カードが正常に削除されました！" })))
    } else {
        Err(ApiError::NotFound(NOT_FOUND.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card(id: Option<u64>, q: &str) -> Flashcard {
        Flashcard {
            id,
            question: q.into(),
            answer: "a".into(),
        }
    }

    #[test]
    fn test_save_assigns_and_respects_ids() {
        let mut store = CardStore::default();
        assert_eq!(store.save(card(None, "q1")).id, Some(1));
        assert_eq!(store.save(card(Some(10), "q10")).id, Some(10));
        assert_eq!(store.save(card(None, "q11")).id, Some(11));

        store.save(card(Some(1), "q1 edited"));
        assert_eq!(store.all().len(), 3);
        assert_eq!(store.get(1).unwrap().question, "q1 edited");

        assert!(store.remove(10));
        assert!(!store.remove(10));
        assert!(store.get(10).is_none());
    }
}
