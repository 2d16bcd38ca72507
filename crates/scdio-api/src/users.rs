use axum::{Extension, Json, extract::State};
use tracing::info;

use scdio_db::queries::ProfileUpdate;
use scdio_types::api::{Claims, UpdateProfileRequest, UpdateStatusRequest, required};
use scdio_types::events::{GatewayEvent, Room};
use scdio_types::models::{OnlineUser, User, UserStatus};

use crate::auth::AppState;
use crate::blocking;
use crate::error::{ApiError, ApiResult};
use crate::uploads::{JsonOrForm, UploadForm, remove_upload};

pub async fn me(State(state): State<AppState>, Extension(claims): Extension<Claims>) -> ApiResult<Json<User>> {
    let user = blocking(&state, move |db| {
        db.get_user(claims.sub)?
            .ok_or_else(|| ApiError::not_found("User not found"))
    })
    .await?;
    Ok(Json(user))
}

/// JSON, or multipart with an optional `avatar` image.
pub async fn update_me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    body: JsonOrForm<UpdateProfileRequest>,
) -> ApiResult<Json<User>> {
    let (req, form) = match body {
        JsonOrForm::Json(req) => (req, None),
        JsonOrForm::Form(multipart) => {
            let form = UploadForm::read(&state.upload_dir, multipart).await?;
            let req = UpdateProfileRequest {
                username: form.text("username").map(str::to_string),
                email: form.text("email").map(str::to_string),
                bio: form.text("bio").map(str::to_string),
                status: form.text("status").map(str::to_string),
            };
            (req, Some(form))
        }
    };
    let avatar = form
        .as_ref()
        .and_then(|f| f.file(&["avatar"]))
        .map(|f| f.url.clone());

    let user_id = claims.sub;
    let result = blocking(&state, move |db| {
        let update = ProfileUpdate {
            username: required(&req.username),
            email: required(&req.email),
            bio: req.bio.as_deref(),
            status: required(&req.status),
            avatar_url: avatar.as_deref(),
        };
        if update.is_empty() {
            return Err(ApiError::bad_request("No fields to update"));
        }
        for login in [update.username, update.email].into_iter().flatten() {
            if db.get_credentials(login)?.is_some_and(|c| c.id != user_id) {
                return Err(ApiError::bad_request("Username or email already exists"));
            }
        }

        let previous_avatar = db.get_user(user_id)?.and_then(|u| u.avatar_url);
        let user = db
            .update_profile(user_id, &update)?
            .ok_or_else(|| ApiError::not_found("User not found"))?;
        let replaced = previous_avatar.filter(|_| update.avatar_url.is_some());
        Ok((user, replaced))
    })
    .await;

    match result {
        Ok((user, replaced)) => {
            if let Some(old) = replaced {
                remove_upload(&state.upload_dir, &old).await;
            }
            info!("{} ({}) updated their profile", user.username, user.id);
            Ok(Json(user))
        }
        Err(e) => {
            if let Some(form) = form {
                form.discard(&state.upload_dir).await;
            }
            Err(e)
        }
    }
}

pub async fn online_users(State(state): State<AppState>) -> ApiResult<Json<Vec<OnlineUser>>> {
    let users = blocking(&state, |db| Ok(db.list_online_users()?)).await?;
    Ok(Json(users))
}

/// Sets the caller's presence status (default `online`) and tells everyone.
pub async fn update_status(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateStatusRequest>,
) -> ApiResult<Json<UserStatus>> {
    let status = required(&req.status).unwrap_or("online").to_string();

    let updated = blocking(&state, move |db| {
        db.set_status(claims.sub, &status)?
            .ok_or_else(|| ApiError::not_found("User not found"))
    })
    .await?;

    state
        .dispatcher
        .broadcast(Room::Global, GatewayEvent::UserStatusChange(updated.clone()));
    Ok(Json(updated))
}
