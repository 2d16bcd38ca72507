use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;

use scdio_db::queries::ServerChanges;
use scdio_types::api::{
    Claims, CreateServerRequest, JoinServerRequest, JoinServerResponse, MessageBody, UpdateServerRequest,
    required,
};
use scdio_types::models::{Member, Server};
use scdio_types::permissions::Permissions;

use crate::access::{require_member, require_owner, require_permission, require_teacher};
use crate::auth::AppState;
use crate::blocking;
use crate::error::{ApiError, ApiResult};
use crate::uploads::{JsonOrForm, UploadForm, remove_upload};

/// Server fields from either body kind, plus the parsed form (if any) so
/// its files can be discarded when the request fails.
async fn server_fields(
    state: &AppState,
    body: JsonOrForm<UpdateServerRequest>,
) -> ApiResult<(UpdateServerRequest, Option<UploadForm>)> {
    match body {
        JsonOrForm::Json(req) => Ok((req, None)),
        JsonOrForm::Form(multipart) => {
            let form = UploadForm::read(&state.upload_dir, multipart).await?;
            let req = UpdateServerRequest {
                name: form.text("name").map(str::to_string),
                description: form.text("description").map(str::to_string),
                server_type: form.text("server_type").map(str::to_string),
            };
            Ok((req, Some(form)))
        }
    }
}

fn icon_url(form: &Option<UploadForm>) -> Option<String> {
    form.as_ref()
        .and_then(|f| f.file(&["server_icon"]))
        .map(|f| f.url.clone())
}

pub async fn list_servers(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Vec<Server>>> {
    let servers = blocking(&state, move |db| Ok(db.list_servers_for_user(claims.sub)?)).await?;
    Ok(Json(servers))
}

/// JSON, or multipart with an optional `server_icon` image.
pub async fn create_server(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    body: JsonOrForm<CreateServerRequest>,
) -> ApiResult<impl IntoResponse> {
    let body = match body {
        JsonOrForm::Json(req) => JsonOrForm::Json(UpdateServerRequest {
            name: req.name,
            description: req.description,
            server_type: req.server_type,
        }),
        JsonOrForm::Form(multipart) => JsonOrForm::Form(multipart),
    };
    let (req, form) = server_fields(&state, body).await?;
    let icon = icon_url(&form);

    let owner_id = claims.sub;
    let result = blocking(&state, move |db| {
        let name = required(&req.name).ok_or_else(|| ApiError::bad_request("Server name is required"))?;
        Ok(db.create_server(
            owner_id,
            name,
            required(&req.description),
            icon.as_deref(),
            required(&req.server_type),
        )?)
    })
    .await;

    match result {
        Ok(server) => {
            info!("{} created server '{}' ({})", claims.username, server.name, server.id);
            Ok((StatusCode::CREATED, Json(server)))
        }
        Err(e) => {
            if let Some(form) = form {
                form.discard(&state.upload_dir).await;
            }
            Err(e)
        }
    }
}

pub async fn get_server(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Server>> {
    let server = blocking(&state, move |db| {
        require_member(db, id, claims.sub)?;
        db.get_server(id)?
            .ok_or_else(|| ApiError::not_found("Server not found"))
    })
    .await?;
    Ok(Json(server))
}

pub async fn update_server(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    body: JsonOrForm<UpdateServerRequest>,
) -> ApiResult<Json<Server>> {
    let (req, form) = server_fields(&state, body).await?;
    let icon = icon_url(&form);

    let user_id = claims.sub;
    let result = blocking(&state, move |db| {
        require_permission(db, id, user_id, Permissions::MANAGE_SERVER)?;
        let changes = ServerChanges {
            name: required(&req.name),
            description: req.description.as_deref(),
            server_type: required(&req.server_type),
            icon_url: icon.as_deref(),
        };

        let previous_icon = db.get_server(id)?.and_then(|s| s.icon_url);
        let server = db
            .update_server(id, &changes)?
            .ok_or_else(|| ApiError::not_found("Server not found"))?;
        Ok((server, previous_icon.filter(|_| changes.icon_url.is_some())))
    })
    .await;

    match result {
        Ok((server, replaced)) => {
            if let Some(old) = replaced {
                remove_upload(&state.upload_dir, &old).await;
            }
            Ok(Json(server))
        }
        Err(e) => {
            if let Some(form) = form {
                form.discard(&state.upload_dir).await;
            }
            Err(e)
        }
    }
}

/// Owner only. Channels, messages and roles go with it.
pub async fn delete_server(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    let icon = blocking(&state, move |db| {
        require_owner(db, id, claims.sub)?;
        let icon = db.get_server(id)?.and_then(|s| s.icon_url);
        db.delete_server(id)?;
        Ok(icon)
    })
    .await?;

    if let Some(icon) = icon {
        remove_upload(&state.upload_dir, &icon).await;
    }
    info!("Server {} deleted by {}", id, claims.username);
    Ok(StatusCode::NO_CONTENT)
}

pub async fn join_with_body(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<JoinServerRequest>,
) -> ApiResult<Json<JoinServerResponse>> {
    let code = required(&req.invite_code)
        .ok_or_else(|| ApiError::bad_request("Invite code is required"))?
        .to_string();
    join(&state, &claims, code).await
}

pub async fn join_with_code(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(code): Path<String>,
) -> ApiResult<Json<JoinServerResponse>> {
    join(&state, &claims, code).await
}

async fn join(state: &AppState, claims: &Claims, code: String) -> ApiResult<Json<JoinServerResponse>> {
    let user_id = claims.sub;
    let server = blocking(state, move |db| {
        let server = db
            .find_server_by_invite(&code)?
            .ok_or_else(|| ApiError::not_found("Invalid invite code"))?;
        if !db.join_server(server.id, user_id)? {
            return Err(ApiError::bad_request("Already a member of this server"));
        }
        db.get_server(server.id)?
            .ok_or_else(|| ApiError::not_found("Server not found"))
    })
    .await?;

    info!("{} joined server '{}' ({})", claims.username, server.name, server.id);
    Ok(Json(JoinServerResponse {
        message: "Successfully joined server".into(),
        server,
    }))
}

pub async fn list_members(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Vec<Member>>> {
    let members = blocking(&state, move |db| {
        require_member(db, id, claims.sub)?;
        Ok(db.list_members(id)?)
    })
    .await?;
    Ok(Json(members))
}

/// The owner may kick anyone else; members may remove themselves.
pub async fn remove_member(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path((server_id, user_id)): Path<(i64, i64)>,
) -> ApiResult<StatusCode> {
    let caller = claims.sub;
    blocking(&state, move |db| {
        let owner = db
            .server_owner(server_id)?
            .ok_or_else(|| ApiError::not_found("Server not found"))?;
        if caller != owner && caller != user_id {
            return Err(ApiError::access_denied());
        }
        if user_id == owner {
            return Err(ApiError::bad_request("The owner cannot leave their own server"));
        }
        if db.remove_member(server_id, user_id)? {
            Ok(StatusCode::NO_CONTENT)
        } else {
            Err(ApiError::not_found("Member not found"))
        }
    })
    .await
}

/// Grants another member the club-wide teacher flag. The caller must own
/// the server and already be a teacher.
pub async fn promote_member(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path((server_id, user_id)): Path<(i64, i64)>,
) -> ApiResult<Json<MessageBody>> {
    blocking(&state, move |db| {
        require_owner(db, server_id, claims.sub)?;
        if user_id == claims.sub {
            return Err(ApiError::bad_request("You cannot promote yourself"));
        }
        require_teacher(db, claims.sub)?;
        if !db.is_member(server_id, user_id)? {
            return Err(ApiError::not_found("Member not found"));
        }
        db.set_teacher(user_id, true)?;
        Ok(Json(MessageBody::new("Member promoted to teacher")))
    })
    .await
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    use crate::test_support::{FilePart, test_app};

    #[tokio::test]
    async fn test_create_join_and_list() {
        let app = test_app();
        let (owner, _) = app.register("owner").await;
        let (guest, _) = app.register("guest").await;

        let (status, body) = app.post_json("/api/servers", Some(&owner), json!({})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Server name is required");

        let id = app.create_server(&owner, "吹奏楽部").await;
        let (status, server) = app.get(&format!("/api/servers/{id}"), Some(&owner)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(server["member_count"], 1);
        assert_eq!(server["owner_username"], "owner");

        // Not a member yet
        let (status, _) = app.get(&format!("/api/servers/{id}"), Some(&guest)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) = app.get("/api/servers/999", Some(&guest)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let code = server["invite_code"].as_str().unwrap().to_lowercase();
        let (status, body) = app
            .post_json("/api/servers/join", Some(&guest), json!({"invite_code": code}))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["server"]["member_count"], 2);

        let (status, body) = app
            .post_json(&format!("/api/servers/join/{code}"), Some(&guest), json!({}))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Already a member of this server");

        let (status, _) = app
            .post_json("/api/servers/join/NOPE0000", Some(&guest), json!({}))
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, list) = app.get("/api/servers", Some(&guest)).await;
        assert_eq!(list.as_array().unwrap().len(), 1);

        let (_, members) = app.get(&format!("/api/servers/{id}/members"), Some(&guest)).await;
        let members = members.as_array().unwrap();
        assert_eq!(members[0]["username"], "owner");
        assert_eq!(members[0]["is_owner"], true);
    }

    #[tokio::test]
    async fn test_update_and_delete_permissions() {
        let app = test_app();
        let (owner, owner_id) = app.register("owner").await;
        let (guest, guest_id) = app.register("guest").await;
        let id = app.create_server(&owner, "Band").await;
        let code = app.state.db.get_server(id).unwrap().unwrap().invite_code;
        app.post_json(&format!("/api/servers/join/{code}"), Some(&guest), json!({}))
            .await;

        let (status, _) = app
            .put_json(&format!("/api/servers/{id}"), Some(&guest), json!({"name": "Mine"}))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = app
            .put_json(
                &format!("/api/servers/{id}"),
                Some(&owner),
                json!({"name": "Brass", "server_type": "school"}),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "Brass");
        assert_eq!(body["server_type"], "school");

        let promote = format!("/api/servers/{id}/members/{guest_id}/promote");
        let (status, _) = app.post_json(&promote, Some(&guest), json!({})).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, body) = app.post_json(&promote, Some(&owner), json!({})).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "Teacher permission required");
        assert!(!app.state.db.is_teacher(guest_id).unwrap());

        app.make_teacher(owner_id);
        let (status, _) = app.post_json(&promote, Some(&owner), json!({})).await;
        assert_eq!(status, StatusCode::OK);
        assert!(app.state.db.is_teacher(guest_id).unwrap());

        let (status, _) = app.delete(&format!("/api/servers/{id}"), Some(&guest)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) = app.delete(&format!("/api/servers/{id}"), Some(&owner)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(app.state.db.get_server(id).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_owner_cannot_promote_themselves() {
        let app = test_app();
        let (owner, owner_id) = app.register("owner").await;
        let id = app.create_server(&owner, "Band").await;

        let (status, _) = app
            .post_json("/api/events", Some(&owner), json!({"name": "合宿", "start_time": "2025-08-01T09:00"}))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = app
            .post_json(&format!("/api/servers/{id}/members/{owner_id}/promote"), Some(&owner), json!({}))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "You cannot promote yourself");
        assert!(!app.state.db.is_teacher(owner_id).unwrap());

        let (status, _) = app
            .post_json("/api/events", Some(&owner), json!({"name": "合宿", "start_time": "2025-08-01T09:00"}))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_leave_and_kick() {
        let app = test_app();
        let (owner, owner_id) = app.register("owner").await;
        let (a, a_id) = app.register("a").await;
        let (b, b_id) = app.register("b").await;
        let id = app.create_server(&owner, "Band").await;
        let code = app.state.db.get_server(id).unwrap().unwrap().invite_code;
        for token in [&a, &b] {
            app.post_json(&format!("/api/servers/join/{code}"), Some(token), json!({}))
                .await;
        }

        let (status, _) = app
            .delete(&format!("/api/servers/{id}/members/{b_id}"), Some(&a))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = app
            .delete(&format!("/api/servers/{id}/members/{a_id}"), Some(&a))
            .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = app
            .delete(&format!("/api/servers/{id}/members/{b_id}"), Some(&owner))
            .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = app
            .delete(&format!("/api/servers/{id}/members/{owner_id}"), Some(&owner))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(!app.state.db.is_member(id, b_id).unwrap());
    }

    #[tokio::test]
    async fn test_create_with_icon() {
        let app = test_app();
        let (owner, _) = app.register("owner").await;

        let (status, body) = app
            .multipart(
                Method::POST,
                "/api/servers",
                &owner,
                &[("name", "Art Club"), ("description", "絵を描く")],
                &[FilePart {
                    field: "server_icon",
                    filename: "icon.jpg",
                    content_type: "image/jpeg",
                    data: b"\xff\xd8\xff fake jpeg",
                }],
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        assert_eq!(body["description"], "絵を描く");
        assert!(
            body["icon_url"]
                .as_str()
                .unwrap()
                .starts_with("/uploads/server_icons/server_icon-")
        );

        let _ = tokio::fs::remove_dir_all(&app.state.upload_dir).await;
    }
}
