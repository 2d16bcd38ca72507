use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, Row, params};

use scdio_types::models::{Member, Server};
use scdio_types::permissions::Permissions;

use crate::Database;
use crate::models::concat_column;

pub const EVERYONE_ROLE: &str = "@everyone";
pub const ADMIN_ROLE: &str = "Admin";

const DEFAULT_CHANNELS: [(&str, &str); 3] = [
    ("一般", "text"),
    ("お知らせ", "announcement"),
    ("雑談", "text"),
];

// Columns 0..=9 of every server query; 10 and 11 are owner_username / joined_at.
const SERVER_SELECT: &str = "SELECT s.id, s.name, s.description, s.icon_url, s.owner_id,
        s.invite_code, s.server_type, s.created_at, s.updated_at,
        (SELECT COUNT(*) FROM server_members WHERE server_id = s.id)";

#[derive(Debug, Default)]
pub struct ServerChanges<'a> {
    pub name: Option<&'a str>,
    pub description: Option<&'a str>,
    pub server_type: Option<&'a str>,
    pub icon_url: Option<&'a str>,
}

impl Database {
    /// Creates the server with its owner as first member, the default roles
    /// and the default channels, all in one transaction.
    pub fn create_server(
        &self,
        owner_id: i64,
        name: &str,
        description: Option<&str>,
        icon_url: Option<&str>,
        server_type: Option<&str>,
    ) -> Result<Server> {
        let server_id = self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let invite_code = unused_invite_code(&tx)?;

            tx.execute(
                "INSERT INTO servers (name, description, icon_url, owner_id, invite_code, server_type)
                 VALUES (?1, ?2, ?3, ?4, ?5, COALESCE(?6, 'school'))",
                params![name, description, icon_url, owner_id, invite_code, server_type],
            )?;
            let server_id = tx.last_insert_rowid();

            tx.execute(
                "INSERT INTO server_members (server_id, user_id) VALUES (?1, ?2)",
                params![server_id, owner_id],
            )?;

            tx.execute(
                "INSERT INTO server_roles (server_id, name, color, permissions, position)
                 VALUES (?1, ?2, '#99aab5', ?3, 0)",
                params![server_id, EVERYONE_ROLE, Permissions::DEFAULT_MEMBER.bits()],
            )?;
            tx.execute(
                "INSERT INTO server_roles (server_id, name, color, permissions, position)
                 VALUES (?1, ?2, '#e74c3c', ?3, 1)",
                params![server_id, ADMIN_ROLE, Permissions::ALL.bits()],
            )?;
            let admin_role = tx.last_insert_rowid();
            tx.execute(
                "INSERT INTO member_roles (server_id, user_id, role_id) VALUES (?1, ?2, ?3)",
                params![server_id, owner_id, admin_role],
            )?;

            for (position, (channel, kind)) in DEFAULT_CHANNELS.iter().enumerate() {
                tx.execute(
                    "INSERT INTO channels (server_id, name, type, position) VALUES (?1, ?2, ?3, ?4)",
                    params![server_id, channel, kind, position as i64],
                )?;
            }

            tx.commit()?;
            Ok(server_id)
        })?;

        self.get_server(server_id)?
            .ok_or_else(|| anyhow::anyhow!("server {} vanished after insert", server_id))
    }

    /// Servers the user belongs to, most recently joined first.
    pub fn list_servers_for_user(&self, user_id: i64) -> Result<Vec<Server>> {
        self.with_conn(|conn| {
            let sql = format!(
                "{SERVER_SELECT}, NULL, sm.joined_at
                 FROM servers s
                 JOIN server_members sm ON sm.server_id = s.id
                 WHERE sm.user_id = ?1
                 ORDER BY sm.joined_at DESC, s.id DESC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([user_id], server_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn get_server(&self, id: i64) -> Result<Option<Server>> {
        self.with_conn(|conn| query_server(conn, id))
    }

    pub fn update_server(&self, id: i64, changes: &ServerChanges<'_>) -> Result<Option<Server>> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE servers SET
                    name        = COALESCE(?2, name),
                    description = COALESCE(?3, description),
                    server_type = COALESCE(?4, server_type),
                    icon_url    = COALESCE(?5, icon_url),
                    updated_at  = strftime('%Y-%m-%d %H:%M:%f', 'now')
                 WHERE id = ?1",
                params![
                    id,
                    changes.name,
                    changes.description,
                    changes.server_type,
                    changes.icon_url
                ],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            query_server(conn, id)
        })
    }

    /// Channels, messages, roles and memberships go with it.
    pub fn delete_server(&self, id: i64) -> Result<bool> {
        self.with_conn(|conn| Ok(conn.execute("DELETE FROM servers WHERE id = ?1", [id])? > 0))
    }

    /// Invite codes are stored upper-case; lookup is case-insensitive.
    pub fn find_server_by_invite(&self, code: &str) -> Result<Option<Server>> {
        self.with_conn(|conn| {
            let id: Option<i64> = conn
                .query_row(
                    "SELECT id FROM servers WHERE invite_code = ?1",
                    [code.trim().to_uppercase()],
                    |row| row.get(0),
                )
                .optional()?;
            match id {
                Some(id) => query_server(conn, id),
                None => Ok(None),
            }
        })
    }

    /// Adds the user with the `@everyone` role. Returns false if already a member.
    pub fn join_server(&self, server_id: i64, user_id: i64) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let inserted = tx.execute(
                "INSERT OR IGNORE INTO server_members (server_id, user_id) VALUES (?1, ?2)",
                params![server_id, user_id],
            )?;
            if inserted == 0 {
                return Ok(false);
            }
            tx.execute(
                "INSERT OR IGNORE INTO member_roles (server_id, user_id, role_id)
                 SELECT server_id, ?2, id FROM server_roles WHERE server_id = ?1 AND name = ?3",
                params![server_id, user_id, EVERYONE_ROLE],
            )?;
            tx.commit()?;
            Ok(true)
        })
    }

    pub fn remove_member(&self, server_id: i64, user_id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM server_members WHERE server_id = ?1 AND user_id = ?2",
                params![server_id, user_id],
            )?;
            Ok(removed > 0)
        })
    }

    /// Owner first, then by join time.
    pub fn list_members(&self, server_id: i64) -> Result<Vec<Member>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT u.id, u.username, u.email, u.avatar_url, u.status, u.is_teacher,
                        u.last_seen, sm.joined_at, u.id = s.owner_id AS is_owner,
                        GROUP_CONCAT(sr.name, char(31) ORDER BY sr.position DESC, sr.id),
                        GROUP_CONCAT(sr.color, char(31) ORDER BY sr.position DESC, sr.id)
                 FROM server_members sm
                 JOIN users u ON u.id = sm.user_id
                 JOIN servers s ON s.id = sm.server_id
                 LEFT JOIN member_roles mr ON mr.server_id = sm.server_id AND mr.user_id = sm.user_id
                 LEFT JOIN server_roles sr ON sr.id = mr.role_id
                 WHERE sm.server_id = ?1
                 GROUP BY u.id
                 ORDER BY is_owner DESC, sm.joined_at, u.id",
            )?;
            let rows = stmt
                .query_map([server_id], |row| {
                    Ok(Member {
                        id: row.get(0)?,
                        username: row.get(1)?,
                        email: row.get(2)?,
                        avatar_url: row.get(3)?,
                        status: row.get(4)?,
                        is_teacher: row.get(5)?,
                        last_seen: row.get(6)?,
                        joined_at: row.get(7)?,
                        is_owner: row.get(8)?,
                        roles: concat_column(row, 9)?,
                        role_colors: concat_column(row, 10)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn is_member(&self, server_id: i64, user_id: i64) -> Result<bool> {
        self.with_conn(|conn| query_is_member(conn, server_id, user_id))
    }

    pub fn server_owner(&self, server_id: i64) -> Result<Option<i64>> {
        self.with_conn(|conn| {
            let owner = conn
                .query_row("SELECT owner_id FROM servers WHERE id = ?1", [server_id], |row| {
                    row.get(0)
                })
                .optional()?;
            Ok(owner)
        })
    }

    pub fn server_ids_for_user(&self, user_id: i64) -> Result<Vec<i64>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT server_id FROM server_members WHERE user_id = ?1")?;
            let ids = stmt
                .query_map([user_id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<i64>, _>>()?;
            Ok(ids)
        })
    }

    /// `None` when the user is not a member (or the server does not exist).
    /// The owner always holds `ADMIN`; everyone else gets the union of their roles.
    pub fn effective_permissions(&self, server_id: i64, user_id: i64) -> Result<Option<Permissions>> {
        self.with_conn(|conn| {
            let owner: Option<i64> = conn
                .query_row("SELECT owner_id FROM servers WHERE id = ?1", [server_id], |row| {
                    row.get(0)
                })
                .optional()?;
            let Some(owner) = owner else {
                return Ok(None);
            };
            if owner == user_id {
                return Ok(Some(Permissions::ADMIN));
            }
            if !query_is_member(conn, server_id, user_id)? {
                return Ok(None);
            }

            let mut stmt = conn.prepare(
                "SELECT sr.permissions
                 FROM member_roles mr
                 JOIN server_roles sr ON sr.id = mr.role_id
                 WHERE mr.server_id = ?1 AND mr.user_id = ?2",
            )?;
            let bits = stmt
                .query_map(params![server_id, user_id], |row| row.get::<_, u32>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(Some(bits.into_iter().map(Permissions::from_bits_truncate).collect()))
        })
    }
}

pub(crate) fn query_is_member(conn: &Connection, server_id: i64, user_id: i64) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM server_members WHERE server_id = ?1 AND user_id = ?2",
            params![server_id, user_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

fn query_server(conn: &Connection, id: i64) -> Result<Option<Server>> {
    let sql = format!(
        "{SERVER_SELECT}, u.username, NULL
         FROM servers s
         LEFT JOIN users u ON u.id = s.owner_id
         WHERE s.id = ?1"
    );
    let server = conn.query_row(&sql, [id], server_from_row).optional()?;
    Ok(server)
}

fn server_from_row(row: &Row<'_>) -> rusqlite::Result<Server> {
    Ok(Server {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        icon_url: row.get(3)?,
        owner_id: row.get(4)?,
        invite_code: row.get(5)?,
        server_type: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
        member_count: row.get(9)?,
        owner_username: row.get(10)?,
        joined_at: row.get(11)?,
    })
}

/// 8 upper-case hex characters, retried until unused.
fn unused_invite_code(conn: &Connection) -> Result<String> {
    loop {
        let code = hex::encode_upper(rand::random::<[u8; 4]>());
        let taken: Option<i64> = conn
            .query_row("SELECT id FROM servers WHERE invite_code = ?1", [&code], |row| row.get(0))
            .optional()?;
        if taken.is_none() {
            return Ok(code);
        }
    }
}

#[cfg(test)]
mod tests {
    use scdio_types::permissions::Permissions;

    use crate::Database;
    use crate::queries::test_support::{server, user};

    use super::ServerChanges;

    #[test]
    fn test_create_server_sets_up_defaults() {
        let db = Database::open_in_memory().unwrap();
        let owner = user(&db, "owner");
        let created = server(&db, &owner);

        assert_eq!(created.owner_id, owner.id);
        assert_eq!(created.invite_code.len(), 8);
        assert_eq!(created.invite_code, created.invite_code.to_uppercase());
        assert_eq!(created.server_type, "school");
        assert_eq!(created.member_count, Some(1));
        assert_eq!(created.owner_username.as_deref(), Some("owner"));

        let roles = db.list_server_roles(created.id).unwrap();
        let names: Vec<_> = roles.iter().map(|r| r.name.as_str()).collect();
        assert!(names.contains(&"@everyone"));
        assert!(names.contains(&"Admin"));

        let members = db.list_members(created.id).unwrap();
        assert_eq!(members.len(), 1);
        assert!(members[0].is_owner);
        assert_eq!(members[0].roles, vec!["Admin".to_string()]);

        let channels = db.list_channels(created.id).unwrap();
        let names: Vec<_> = channels
            .uncategorized_channels
            .iter()
            .map(|c| (c.name.as_str(), c.channel_type.as_str()))
            .collect();
        assert_eq!(
            names,
            vec![("一般", "text"), ("お知らせ", "announcement"), ("雑談", "text")]
        );
    }

    #[test]
    fn test_join_by_invite_code_is_case_insensitive() {
        let db = Database::open_in_memory().unwrap();
        let owner = user(&db, "owner");
        let guest = user(&db, "guest");
        let created = server(&db, &owner);

        let found = db
            .find_server_by_invite(&created.invite_code.to_lowercase())
            .unwrap()
            .unwrap();
        assert_eq!(found.id, created.id);
        assert!(db.find_server_by_invite("ZZZZZZZZ").unwrap().is_none());

        assert!(db.join_server(created.id, guest.id).unwrap());
        assert!(!db.join_server(created.id, guest.id).unwrap());
        assert!(db.is_member(created.id, guest.id).unwrap());

        let members = db.list_members(created.id).unwrap();
        assert_eq!(members[0].username, "owner");
        assert_eq!(members[1].roles, vec!["@everyone".to_string()]);
        assert_eq!(members[1].role_colors, vec!["#99aab5".to_string()]);

        let listed = db.list_servers_for_user(guest.id).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].member_count, Some(2));
        assert!(listed[0].joined_at.is_some());
    }

    #[test]
    fn test_effective_permissions() {
        let db = Database::open_in_memory().unwrap();
        let owner = user(&db, "owner");
        let guest = user(&db, "guest");
        let stranger = user(&db, "stranger");
        let created = server(&db, &owner);
        db.join_server(created.id, guest.id).unwrap();

        let owner_perms = db.effective_permissions(created.id, owner.id).unwrap().unwrap();
        assert!(owner_perms.contains(Permissions::MANAGE_SERVER));

        let guest_perms = db.effective_permissions(created.id, guest.id).unwrap().unwrap();
        assert!(guest_perms.contains(Permissions::SEND_MESSAGES));
        assert!(!guest_perms.contains(Permissions::MANAGE_CHANNELS));

        assert!(db.effective_permissions(created.id, stranger.id).unwrap().is_none());
        assert!(db.effective_permissions(999, owner.id).unwrap().is_none());
    }

    #[test]
    fn test_update_remove_and_delete() {
        let db = Database::open_in_memory().unwrap();
        let owner = user(&db, "owner");
        let guest = user(&db, "guest");
        let created = server(&db, &owner);
        db.join_server(created.id, guest.id).unwrap();

        let updated = db
            .update_server(
                created.id,
                &ServerChanges {
                    name: Some("Choir"),
                    ..Default::default()
                },
            )
            .unwrap()
            .unwrap();
        assert_eq!(updated.name, "Choir");
        assert_eq!(updated.description.as_deref(), Some("practice room"));

        assert!(db.remove_member(created.id, guest.id).unwrap());
        assert!(!db.is_member(created.id, guest.id).unwrap());
        assert!(!db.remove_member(created.id, guest.id).unwrap());

        assert!(db.delete_server(created.id).unwrap());
        assert!(db.get_server(created.id).unwrap().is_none());
        assert!(db.server_ids_for_user(owner.id).unwrap().is_empty());
    }
}
