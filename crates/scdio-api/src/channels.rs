use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;

use scdio_types::api::{Claims, CreateCategoryRequest, CreateChannelRequest, required};
use scdio_types::models::{Channel, ChannelList};
use scdio_types::permissions::Permissions;

use crate::access::{require_member, require_permission};
use crate::auth::AppState;
use crate::blocking;
use crate::error::{ApiError, ApiResult};

pub async fn list_channels(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(server_id): Path<i64>,
) -> ApiResult<Json<ChannelList>> {
    let channels = blocking(&state, move |db| {
        require_member(db, server_id, claims.sub)?;
        Ok(db.list_channels(server_id)?)
    })
    .await?;
    Ok(Json(channels))
}

pub async fn create_channel(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(server_id): Path<i64>,
    Json(req): Json<CreateChannelRequest>,
) -> ApiResult<impl IntoResponse> {
    let channel = blocking(&state, move |db| {
        require_permission(db, server_id, claims.sub, Permissions::MANAGE_CHANNELS)?;
        let name = required(&req.name).ok_or_else(|| ApiError::bad_request("Channel name is required"))?;
        let channel_type = required(&req.channel_type).unwrap_or("text");
        db.create_channel(
            server_id,
            name,
            required(&req.description),
            channel_type,
            req.category_id,
        )?
        .ok_or_else(|| ApiError::bad_request("Category not found in this server"))
    })
    .await?;

    info!("Channel #{} created in server {}", channel.name, server_id);
    Ok((StatusCode::CREATED, Json(channel)))
}

pub async fn create_category(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(server_id): Path<i64>,
    Json(req): Json<CreateCategoryRequest>,
) -> ApiResult<impl IntoResponse> {
    let category = blocking(&state, move |db| {
        require_permission(db, server_id, claims.sub, Permissions::MANAGE_CHANNELS)?;
        let name = required(&req.name).ok_or_else(|| ApiError::bad_request("Category name is required"))?;
        Ok(db.create_category(server_id, name)?)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(category)))
}

/// Channels across every server the caller belongs to.
pub async fn my_channels(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Vec<Channel>>> {
    let channels = blocking(&state, move |db| Ok(db.list_channels_for_user(claims.sub)?)).await?;
    Ok(Json(channels))
}
