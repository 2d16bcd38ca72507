//! REST side of chat. Mutations go through `scdio_gateway::chat`, so they
//! broadcast exactly like their WebSocket counterparts.

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};

use scdio_db::queries::MessagePage;
use scdio_gateway::chat;
use scdio_types::api::{
    Claims, EditMessageRequest, MessageQuery, SendMessageRequest, ToggleReactionRequest, ToggleReactionResponse,
};
use scdio_types::models::Message;
use scdio_types::time::normalize_datetime;

use crate::auth::AppState;
use crate::blocking;
use crate::error::{ApiError, ApiResult};

/// `?limit=&before=` cursor paging, oldest message first.
pub async fn channel_messages(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(channel_id): Path<i64>,
    Query(query): Query<MessageQuery>,
) -> ApiResult<Json<Vec<Message>>> {
    let before = match query.before.as_deref().map(str::trim).filter(|b| !b.is_empty()) {
        Some(raw) => Some(normalize_datetime(raw).ok_or_else(|| ApiError::bad_request("Invalid before cursor"))?),
        None => None,
    };
    let mut page = MessagePage::new(query.limit, before, None);
    page.before_id = query.before_id;
    list(&state, claims.sub, channel_id, page).await
}

/// Older `?limit=&offset=` paging.
pub async fn list_by_offset(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(channel_id): Path<i64>,
    Query(query): Query<MessageQuery>,
) -> ApiResult<Json<Vec<Message>>> {
    let page = MessagePage::new(query.limit, None, query.offset);
    list(&state, claims.sub, channel_id, page).await
}

async fn list(state: &AppState, user_id: i64, channel_id: i64, page: MessagePage) -> ApiResult<Json<Vec<Message>>> {
    let messages = blocking(state, move |db| {
        chat::channel_access(db, user_id, channel_id)?;
        Ok(db.list_messages(channel_id, &page)?)
    })
    .await?;
    Ok(Json(messages))
}

pub async fn post_to_channel(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(channel_id): Path<i64>,
    Json(mut req): Json<SendMessageRequest>,
) -> ApiResult<impl IntoResponse> {
    req.channel_id = Some(channel_id);
    send(&state, claims.sub, req).await
}

/// `channel_id` comes in the body.
pub async fn post_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> ApiResult<impl IntoResponse> {
    send(&state, claims.sub, req).await
}

async fn send(state: &AppState, user_id: i64, req: SendMessageRequest) -> ApiResult<(StatusCode, Json<Message>)> {
    let dispatcher = state.dispatcher.clone();
    let message = blocking(state, move |db| Ok(chat::post_message(db, &dispatcher, user_id, &req)?)).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn edit_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    Json(req): Json<EditMessageRequest>,
) -> ApiResult<Json<Message>> {
    let dispatcher = state.dispatcher.clone();
    let message = blocking(&state, move |db| {
        Ok(chat::edit_message(db, &dispatcher, claims.sub, id, req.content.as_deref())?)
    })
    .await?;
    Ok(Json(message))
}

pub async fn delete_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    let dispatcher = state.dispatcher.clone();
    blocking(&state, move |db| Ok(chat::delete_message(db, &dispatcher, claims.sub, id)?)).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn toggle_reaction(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    Json(req): Json<ToggleReactionRequest>,
) -> ApiResult<Json<ToggleReactionResponse>> {
    let dispatcher = state.dispatcher.clone();
    let toggle = blocking(&state, move |db| {
        Ok(chat::toggle_reaction(
            db,
            &dispatcher,
            claims.sub,
            &claims.username,
            id,
            &req.emoji,
        )?)
    })
    .await?;
    Ok(Json(ToggleReactionResponse { added: toggle.added }))
}
