//! `impl Database` blocks, one file per resource.

mod channels;
mod club;
mod content;
mod dashboard;
mod messages;
mod roles;
mod servers;
mod users;

pub use club::{NewBudget, NewEquipment, NewEvent, NewTask, TaskChanges, TaskFilter};
pub use content::{NewPost, NewWikiPage, WikiChanges};
pub use messages::{MessagePage, NewMessage, ReactionToggle};
pub use servers::{ADMIN_ROLE, EVERYONE_ROLE, ServerChanges};
pub use users::{ONLINE_WINDOW_MINUTES, ProfileUpdate};

use rusqlite::types::ToSql;

/// Which rows of a server-scopable resource a listing covers.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Every row.
    #[default]
    All,
    /// Rows of one server.
    Server(i64),
    /// Club-wide rows plus those of every server the user belongs to.
    VisibleTo(i64),
}

impl Scope {
    pub fn server_id(self) -> Option<i64> {
        match self {
            Scope::Server(id) => Some(id),
            _ => None,
        }
    }

    pub fn viewer(self) -> Option<i64> {
        match self {
            Scope::VisibleTo(id) => Some(id),
            _ => None,
        }
    }
}

/// Binds `?1` to `Scope::server_id` and `?2` to `Scope::viewer`.
pub(crate) const SCOPE_CLAUSE: &str = "(CASE
        WHEN ?1 IS NOT NULL THEN server_id = ?1
        WHEN ?2 IS NOT NULL THEN server_id IS NULL
            OR server_id IN (SELECT sm.server_id FROM server_members sm WHERE sm.user_id = ?2)
        ELSE 1 END)";

pub(crate) fn to_sql_params(values: &[i64]) -> Vec<&dyn ToSql> {
    values.iter().map(|v| v as &dyn ToSql).collect()
}

pub(crate) fn placeholders(n: usize) -> String {
    (1..=n).map(|i| format!("?{}", i)).collect::<Vec<_>>().join(", ")
}
