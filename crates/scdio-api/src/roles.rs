//! Club-wide roles (teacher managed) and per-server permission roles.

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;

use scdio_db::queries::EVERYONE_ROLE;
use scdio_types::api::{AssignRoleRequest, Claims, MessageBody, RoleRequest, ServerRoleRequest, required};
use scdio_types::models::{Role, ServerRole};
use scdio_types::permissions::Permissions;

use crate::access::{require_member, require_permission, require_teacher};
use crate::auth::AppState;
use crate::blocking;
use crate::error::{ApiError, ApiResult};

// -- Club-wide roles --

pub async fn list_roles(State(state): State<AppState>) -> ApiResult<Json<Vec<Role>>> {
    let roles = blocking(&state, |db| Ok(db.list_roles()?)).await?;
    Ok(Json(roles))
}

pub async fn create_role(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<RoleRequest>,
) -> ApiResult<impl IntoResponse> {
    let name = required(&req.name)
        .ok_or_else(|| ApiError::bad_request("Role name is required"))?
        .to_string();

    let role = blocking(&state, move |db| {
        require_teacher(db, claims.sub)?;
        db.create_role(&name)?
            .ok_or_else(|| ApiError::bad_request("Role name already exists"))
    })
    .await?;

    info!("Club role '{}' created by {}", role.name, claims.username);
    Ok((StatusCode::CREATED, Json(role)))
}

pub async fn rename_role(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    Json(req): Json<RoleRequest>,
) -> ApiResult<Json<Role>> {
    let name = required(&req.name)
        .ok_or_else(|| ApiError::bad_request("Role name is required"))?
        .to_string();

    let role = blocking(&state, move |db| {
        require_teacher(db, claims.sub)?;
        if db.list_roles()?.iter().any(|r| r.name == name && r.id != id) {
            return Err(ApiError::bad_request("Role name already exists"));
        }
        db.rename_role(id, &name)?
            .ok_or_else(|| ApiError::not_found("Role not found"))
    })
    .await?;
    Ok(Json(role))
}

pub async fn delete_role(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    blocking(&state, move |db| {
        require_teacher(db, claims.sub)?;
        if db.delete_role(id)? {
            Ok(StatusCode::NO_CONTENT)
        } else {
            Err(ApiError::not_found("Role not found"))
        }
    })
    .await
}

pub async fn assign_user_role(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(user_id): Path<i64>,
    Json(req): Json<AssignRoleRequest>,
) -> ApiResult<Json<MessageBody>> {
    let role_id = req
        .role_id
        .ok_or_else(|| ApiError::bad_request("Role ID is required"))?;

    blocking(&state, move |db| {
        require_teacher(db, claims.sub)?;
        if db.assign_user_role(user_id, role_id)? {
            Ok(Json(MessageBody::new("Role assigned")))
        } else {
            Err(ApiError::not_found("User or role not found"))
        }
    })
    .await
}

pub async fn remove_user_role(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path((user_id, role_id)): Path<(i64, i64)>,
) -> ApiResult<StatusCode> {
    blocking(&state, move |db| {
        require_teacher(db, claims.sub)?;
        if db.remove_user_role(user_id, role_id)? {
            Ok(StatusCode::NO_CONTENT)
        } else {
            Err(ApiError::not_found("Role assignment not found"))
        }
    })
    .await
}

// -- Server roles --

pub async fn list_server_roles(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(server_id): Path<i64>,
) -> ApiResult<Json<Vec<ServerRole>>> {
    let roles = blocking(&state, move |db| {
        require_member(db, server_id, claims.sub)?;
        Ok(db.list_server_roles(server_id)?)
    })
    .await?;
    Ok(Json(roles))
}

pub async fn create_server_role(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(server_id): Path<i64>,
    Json(req): Json<ServerRoleRequest>,
) -> ApiResult<impl IntoResponse> {
    let name = required(&req.name)
        .ok_or_else(|| ApiError::bad_request("Role name is required"))?
        .to_string();
    let color = required(&req.color).map(str::to_string);
    let permissions = req.permissions().unwrap_or(Permissions::NONE);

    let role = blocking(&state, move |db| {
        require_permission(db, server_id, claims.sub, Permissions::MANAGE_ROLES)?;
        db.create_server_role(server_id, &name, color.as_deref(), permissions)?
            .ok_or_else(|| ApiError::bad_request("Role name already exists"))
    })
    .await?;

    info!("Role '{}' created in server {}", role.name, server_id);
    Ok((StatusCode::CREATED, Json(role)))
}

pub async fn update_server_role(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path((server_id, role_id)): Path<(i64, i64)>,
    Json(req): Json<ServerRoleRequest>,
) -> ApiResult<Json<ServerRole>> {
    let name = required(&req.name).map(str::to_string);
    let color = required(&req.color).map(str::to_string);
    let permissions = req.permissions();

    let role = blocking(&state, move |db| {
        require_permission(db, server_id, claims.sub, Permissions::MANAGE_ROLES)?;
        let existing = db.list_server_roles(server_id)?;
        let target = existing
            .iter()
            .find(|r| r.id == role_id)
            .ok_or_else(|| ApiError::not_found("Role not found"))?;
        if let Some(name) = &name {
            if target.name == EVERYONE_ROLE && name != EVERYONE_ROLE {
                return Err(ApiError::bad_request("The @everyone role cannot be renamed"));
            }
            if existing.iter().any(|r| &r.name == name && r.id != role_id) {
                return Err(ApiError::bad_request("Role name already exists"));
            }
        }
        db.update_server_role(server_id, role_id, name.as_deref(), color.as_deref(), permissions)?
            .ok_or_else(|| ApiError::not_found("Role not found"))
    })
    .await?;
    Ok(Json(role))
}

pub async fn delete_server_role(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path((server_id, role_id)): Path<(i64, i64)>,
) -> ApiResult<StatusCode> {
    blocking(&state, move |db| {
        require_permission(db, server_id, claims.sub, Permissions::MANAGE_ROLES)?;
        let role = db
            .get_server_role(server_id, role_id)?
            .ok_or_else(|| ApiError::not_found("Role not found"))?;
        if role.name == EVERYONE_ROLE {
            return Err(ApiError::bad_request("The @everyone role cannot be deleted"));
        }
        db.delete_server_role(server_id, role_id)?;
        Ok(StatusCode::NO_CONTENT)
    })
    .await
}

pub async fn assign_member_role(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path((server_id, user_id)): Path<(i64, i64)>,
    Json(req): Json<AssignRoleRequest>,
) -> ApiResult<Json<MessageBody>> {
    let role_id = req
        .role_id
        .ok_or_else(|| ApiError::bad_request("Role ID is required"))?;

    blocking(&state, move |db| {
        require_permission(db, server_id, claims.sub, Permissions::MANAGE_ROLES)?;
        if db.assign_member_role(server_id, user_id, role_id)? {
            Ok(Json(MessageBody::new("Role assigned")))
        } else {
            Err(ApiError::not_found("Member or role not found"))
        }
    })
    .await
}

pub async fn remove_member_role(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path((server_id, user_id, role_id)): Path<(i64, i64, i64)>,
) -> ApiResult<StatusCode> {
    blocking(&state, move |db| {
        require_permission(db, server_id, claims.sub, Permissions::MANAGE_ROLES)?;
        if db.remove_member_role(server_id, user_id, role_id)? {
            Ok(StatusCode::NO_CONTENT)
        } else {
            Err(ApiError::not_found("Role assignment not found"))
        }
    })
    .await
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use crate::test_support::test_app;

    #[tokio::test]
    async fn test_club_roles_are_teacher_only() {
        let app = test_app();
        let (teacher, teacher_id) = app.register("sensei").await;
        let (student, student_id) = app.register("aiko").await;
        app.make_teacher(teacher_id);

        let (status, _) = app
            .post_json("/api/roles", Some(&student), json!({"name": "部長"}))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, role) = app
            .post_json("/api/roles", Some(&teacher), json!({"name": "部長"}))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let role_id = role["id"].as_i64().unwrap();

        let (status, _) = app
            .post_json("/api/roles", Some(&teacher), json!({"name": "部長"}))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = app
            .post_json(
                &format!("/api/users/{student_id}/roles"),
                Some(&teacher),
                json!({"roleId": role_id}),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(app.state.db.user_role_names(student_id).unwrap(), vec!["部長"]);

        let (status, _) = app
            .delete(&format!("/api/users/{student_id}/roles/{role_id}"), Some(&teacher))
            .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = app.delete(&format!("/api/roles/{role_id}"), Some(&teacher)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (_, roles) = app.get("/api/roles", Some(&student)).await;
        assert!(roles.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_server_roles_need_manage_roles() {
        let app = test_app();
        let (owner, _) = app.register("owner").await;
        let (member, member_id) = app.register("member").await;
        let server_id = app.create_server(&owner, "Band").await;
        let code = app.state.db.get_server(server_id).unwrap().unwrap().invite_code;
        app.post_json(&format!("/api/servers/join/{code}"), Some(&member), json!({}))
            .await;

        let (status, _) = app
            .post_json(
                &format!("/api/servers/{server_id}/roles"),
                Some(&member),
                json!({"name": "Mod", "permissions": 4}),
            )
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, role) = app
            .post_json(
                &format!("/api/servers/{server_id}/roles"),
                Some(&owner),
                json!({"name": "Mod", "color": "#123456", "permissions": 4}),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(role["permissions"], 4);
        let role_id = role["id"].as_i64().unwrap();

        let (status, _) = app
            .post_json(
                &format!("/api/servers/{server_id}/members/{member_id}/roles"),
                Some(&owner),
                json!({"role_id": role_id}),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        let perms = app
            .state
            .db
            .effective_permissions(server_id, member_id)
            .unwrap()
            .unwrap();
        assert_eq!(perms.bits(), 1 | 2 | 4);

        let (status, renamed) = app
            .put_json(
                &format!("/api/servers/{server_id}/roles/{role_id}"),
                Some(&owner),
                json!({"name": "Moderator"}),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(renamed["name"], "Moderator");
        assert_eq!(renamed["color"], "#123456");

        let (_, roles) = app
            .get(&format!("/api/servers/{server_id}/roles"), Some(&member))
            .await;
        let everyone = roles
            .as_array()
            .unwrap()
            .iter()
            .find(|r| r["name"] == "@everyone")
            .unwrap()["id"]
            .as_i64()
            .unwrap();
        let (status, _) = app
            .delete(&format!("/api/servers/{server_id}/roles/{everyone}"), Some(&owner))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = app
            .delete(
                &format!("/api/servers/{server_id}/members/{member_id}/roles/{role_id}"),
                Some(&owner),
            )
            .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = app
            .delete(&format!("/api/servers/{server_id}/roles/{role_id}"), Some(&owner))
            .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }
}
