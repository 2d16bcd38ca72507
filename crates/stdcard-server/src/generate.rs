use axum::{Json, extract::State};
use lm_client::{ChatMessage, extract_json};
use serde::Deserialize;
use tracing::info;

use crate::AppState;
use crate::cards::Flashcard;
use crate::error::{ApiError, ApiResult};

const TEMPERATURE: f32 = 0.7;
const MAX_TOKENS: u32 = 1500;

const SYSTEM_PROMPT: &str = "あなたは暗記カードを生成するAIアシスタントです。";

#[derive(Debug, Default, Deserialize)]
pub struct GenerateRequest {
    #[serde(default)]
    pub query: String,
}

#[derive(Debug, Deserialize)]
struct GeneratedCard {
    question: Option<String>,
    answer: Option<String>,
}

fn card_prompt(topic: &str) -> String {
    format!(
        "以下のトピックについて、質問と回答の形式で暗記カードを生成してください。回答は簡潔にしてください。\
         出力はJSON形式のみで、他のテキストは含めないでください。JSONのキーは \"question\" と \"answer\" としてください。\n\n\
         トピック: {topic}\n\n\
         例:\n{{\"question\": \"日本の首都は？\", \"answer\": \"東京\"}}\n"
    )
}

/// Asks the model for one card on the topic. The card gets an id but is
/// not stored until the client saves it.
pub async fn generate_card(
    State(state): State<AppState>,
    Json(req): Json<GenerateRequest>,
) -> ApiResult<Json<Flashcard>> {
    let topic = req.query.trim();
    if topic.is_empty() {
        return Err(ApiError::BadRequest("クエリが提供されていません。".into()));
    }

    let messages = [ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(card_prompt(topic))];
    let reply = state.lm.chat(&messages, TEMPERATURE, MAX_TOKENS).await?;

    let generated: GeneratedCard = extract_json(&reply)?;
    let non_empty = |s: Option<String>| s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
    let (Some(question), Some(answer)) = (non_empty(generated.question), non_empty(generated.answer)) else {
        return Err(ApiError::Upstream(
            "LLM応答の解析エラー: LLMからの応答が期待されるJSON形式ではありませんでした。".into(),
        ));
    };

    let id = state.cards.write().await.next_id();
    info!("Generated card {} for topic '{}'", id, topic);
    Ok(Json(Flashcard {
        id: Some(id),
        question,
        answer,
    }))
}
