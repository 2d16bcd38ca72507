//! Authorization checks. All of these run inside `blocking`.

use scdio_db::Database;
use scdio_db::queries::Scope;
use scdio_types::permissions::Permissions;

use crate::error::{ApiError, ApiResult};

fn server_exists(db: &Database, server_id: i64) -> ApiResult<()> {
    match db.server_owner(server_id)? {
        Some(_) => Ok(()),
        None => Err(ApiError::not_found("Server not found")),
    }
}

/// The caller's permissions in the server; 404 for an unknown server,
/// 403 for a non-member.
pub(crate) fn member_permissions(db: &Database, server_id: i64, user_id: i64) -> ApiResult<Permissions> {
    match db.effective_permissions(server_id, user_id)? {
        Some(perms) => Ok(perms),
        None => {
            server_exists(db, server_id)?;
            Err(ApiError::access_denied())
        }
    }
}

pub(crate) fn require_member(db: &Database, server_id: i64, user_id: i64) -> ApiResult<()> {
    member_permissions(db, server_id, user_id).map(|_| ())
}

pub(crate) fn require_permission(
    db: &Database,
    server_id: i64,
    user_id: i64,
    required: Permissions,
) -> ApiResult<()> {
    if member_permissions(db, server_id, user_id)?.contains(required) {
        Ok(())
    } else {
        Err(ApiError::forbidden("Insufficient permissions"))
    }
}

pub(crate) fn require_owner(db: &Database, server_id: i64, user_id: i64) -> ApiResult<()> {
    match db.server_owner(server_id)? {
        Some(owner) if owner == user_id => Ok(()),
        Some(_) => Err(ApiError::forbidden("Only the server owner can do this")),
        None => Err(ApiError::not_found("Server not found")),
    }
}

pub(crate) fn require_teacher(db: &Database, user_id: i64) -> ApiResult<()> {
    if db.is_teacher(user_id)? {
        Ok(())
    } else {
        Err(ApiError::forbidden("Teacher permission required"))
    }
}

/// Club resources may be scoped to a server; the caller must belong to it.
/// Without a server the caller sees club-wide rows and those of their own
/// servers.
pub(crate) fn check_scope(db: &Database, server_id: Option<i64>, user_id: i64) -> ApiResult<Scope> {
    match server_id {
        Some(id) => require_member(db, id, user_id).map(|_| Scope::Server(id)),
        None => Ok(Scope::VisibleTo(user_id)),
    }
}

/// Owned content may be changed by its owner or any teacher.
pub(crate) fn require_owner_or_teacher(db: &Database, owner_id: Option<i64>, user_id: i64) -> ApiResult<()> {
    if owner_id == Some(user_id) || db.is_teacher(user_id)? {
        Ok(())
    } else {
        Err(ApiError::access_denied())
    }
}
