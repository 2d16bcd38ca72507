use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, Row, params};

use scdio_types::models::{Role, ServerRole};
use scdio_types::permissions::Permissions;

use crate::Database;
use crate::queries::servers::query_is_member;

const SERVER_ROLE_COLUMNS: &str = "id, server_id, name, color, permissions, position, created_at";

impl Database {
    // -- Global roles --

    pub fn list_roles(&self) -> Result<Vec<Role>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT id, name, created_at FROM roles ORDER BY id")?;
            let rows = stmt
                .query_map([], role_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// `None` if the name is already taken.
    pub fn create_role(&self, name: &str) -> Result<Option<Role>> {
        self.with_conn(|conn| {
            let inserted = conn.execute("INSERT OR IGNORE INTO roles (name) VALUES (?1)", [name])?;
            if inserted == 0 {
                return Ok(None);
            }
            query_role(conn, conn.last_insert_rowid())
        })
    }

    pub fn rename_role(&self, id: i64, name: &str) -> Result<Option<Role>> {
        self.with_conn(|conn| {
            let changed = conn.execute("UPDATE roles SET name = ?2 WHERE id = ?1", params![id, name])?;
            if changed == 0 {
                return Ok(None);
            }
            query_role(conn, id)
        })
    }

    pub fn delete_role(&self, id: i64) -> Result<bool> {
        self.with_conn(|conn| Ok(conn.execute("DELETE FROM roles WHERE id = ?1", [id])? > 0))
    }

    /// Returns false if the user or role does not exist. Assigning twice is a no-op.
    pub fn assign_user_role(&self, user_id: i64, role_id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let both_exist: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM users WHERE id = ?1)
                    AND EXISTS(SELECT 1 FROM roles WHERE id = ?2)",
                params![user_id, role_id],
                |row| row.get(0),
            )?;
            if !both_exist {
                return Ok(false);
            }
            conn.execute(
                "INSERT OR IGNORE INTO user_roles (user_id, role_id) VALUES (?1, ?2)",
                params![user_id, role_id],
            )?;
            Ok(true)
        })
    }

    pub fn remove_user_role(&self, user_id: i64, role_id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM user_roles WHERE user_id = ?1 AND role_id = ?2",
                params![user_id, role_id],
            )?;
            Ok(removed > 0)
        })
    }

    pub fn user_role_names(&self, user_id: i64) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT r.name FROM user_roles ur JOIN roles r ON r.id = ur.role_id
                 WHERE ur.user_id = ?1 ORDER BY r.id",
            )?;
            let names = stmt
                .query_map([user_id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<String>, _>>()?;
            Ok(names)
        })
    }

    // -- Server roles --

    pub fn list_server_roles(&self, server_id: i64) -> Result<Vec<ServerRole>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {SERVER_ROLE_COLUMNS} FROM server_roles
                 WHERE server_id = ?1 ORDER BY position, id"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([server_id], server_role_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn get_server_role(&self, server_id: i64, role_id: i64) -> Result<Option<ServerRole>> {
        self.with_conn(|conn| query_server_role(conn, server_id, role_id))
    }

    /// New roles go on top. `None` if the name is taken within the server.
    pub fn create_server_role(
        &self,
        server_id: i64,
        name: &str,
        color: Option<&str>,
        permissions: Permissions,
    ) -> Result<Option<ServerRole>> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO server_roles (server_id, name, color, permissions, position)
                 VALUES (?1, ?2, COALESCE(?3, '#99aab5'), ?4,
                         (SELECT COALESCE(MAX(position), -1) + 1 FROM server_roles WHERE server_id = ?1))",
                params![server_id, name, color, permissions.bits()],
            )?;
            if inserted == 0 {
                return Ok(None);
            }
            query_server_role(conn, server_id, conn.last_insert_rowid())
        })
    }

    pub fn update_server_role(
        &self,
        server_id: i64,
        role_id: i64,
        name: Option<&str>,
        color: Option<&str>,
        permissions: Option<Permissions>,
    ) -> Result<Option<ServerRole>> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE server_roles SET
                    name        = COALESCE(?3, name),
                    color       = COALESCE(?4, color),
                    permissions = COALESCE(?5, permissions)
                 WHERE server_id = ?1 AND id = ?2",
                params![server_id, role_id, name, color, permissions.map(Permissions::bits)],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            query_server_role(conn, server_id, role_id)
        })
    }

    pub fn delete_server_role(&self, server_id: i64, role_id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM server_roles WHERE server_id = ?1 AND id = ?2",
                params![server_id, role_id],
            )?;
            Ok(removed > 0)
        })
    }

    /// Returns false if the user is not a member or the role belongs to another server.
    pub fn assign_member_role(&self, server_id: i64, user_id: i64, role_id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            if !query_is_member(conn, server_id, user_id)?
                || query_server_role(conn, server_id, role_id)?.is_none()
            {
                return Ok(false);
            }
            conn.execute(
                "INSERT OR IGNORE INTO member_roles (server_id, user_id, role_id) VALUES (?1, ?2, ?3)",
                params![server_id, user_id, role_id],
            )?;
            Ok(true)
        })
    }

    pub fn remove_member_role(&self, server_id: i64, user_id: i64, role_id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM member_roles WHERE server_id = ?1 AND user_id = ?2 AND role_id = ?3",
                params![server_id, user_id, role_id],
            )?;
            Ok(removed > 0)
        })
    }
}

fn query_role(conn: &Connection, id: i64) -> Result<Option<Role>> {
    let role = conn
        .query_row("SELECT id, name, created_at FROM roles WHERE id = ?1", [id], role_from_row)
        .optional()?;
    Ok(role)
}

fn role_from_row(row: &Row<'_>) -> rusqlite::Result<Role> {
    Ok(Role {
        id: row.get(0)?,
        name: row.get(1)?,
        created_at: row.get(2)?,
    })
}

fn query_server_role(conn: &Connection, server_id: i64, role_id: i64) -> Result<Option<ServerRole>> {
    let sql = format!("SELECT {SERVER_ROLE_COLUMNS} FROM server_roles WHERE server_id = ?1 AND id = ?2");
    let role = conn
        .query_row(&sql, params![server_id, role_id], server_role_from_row)
        .optional()?;
    Ok(role)
}

fn server_role_from_row(row: &Row<'_>) -> rusqlite::Result<ServerRole> {
    Ok(ServerRole {
        id: row.get(0)?,
        server_id: row.get(1)?,
        name: row.get(2)?,
        color: row.get(3)?,
        permissions: Permissions::from_bits_truncate(row.get(4)?),
        position: row.get(5)?,
        created_at: row.get(6)?,
    })
}
