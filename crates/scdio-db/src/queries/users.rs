use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, Row, params};

use scdio_types::models::{OnlineUser, User, UserStatus};

use crate::Database;
use crate::models::UserCredentials;

const USER_COLUMNS: &str =
    "id, username, email, avatar_url, bio, status, is_teacher, last_seen, created_at, updated_at";

/// A user counts as online if seen within this many minutes.
pub const ONLINE_WINDOW_MINUTES: u32 = 10;

/// Partial profile update; `None` leaves the column untouched.
#[derive(Debug, Default)]
pub struct ProfileUpdate<'a> {
    pub username: Option<&'a str>,
    pub email: Option<&'a str>,
    pub bio: Option<&'a str>,
    pub status: Option<&'a str>,
    pub avatar_url: Option<&'a str>,
}

impl ProfileUpdate<'_> {
    pub fn is_empty(&self) -> bool {
        self.username.is_none()
            && self.email.is_none()
            && self.bio.is_none()
            && self.status.is_none()
            && self.avatar_url.is_none()
    }
}

impl Database {
    pub fn create_user(&self, username: &str, email: &str, password_hash: &str) -> Result<User> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (username, email, password) VALUES (?1, ?2, ?3)",
                (username, email, password_hash),
            )?;
            let id = conn.last_insert_rowid();
            query_user(conn, id)?.ok_or_else(|| anyhow::anyhow!("user {} vanished after insert", id))
        })
    }

    pub fn username_or_email_taken(&self, username: &str, email: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT id FROM users WHERE username = ?1 OR email = ?2 LIMIT 1",
                    (username, email),
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    /// `login` matches either the username or the email.
    pub fn get_credentials(&self, login: &str) -> Result<Option<UserCredentials>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, username, password FROM users WHERE username = ?1 OR email = ?1",
                    [login],
                    |row| {
                        Ok(UserCredentials {
                            id: row.get(0)?,
                            username: row.get(1)?,
                            password: row.get(2)?,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
    }

    pub fn get_user(&self, id: i64) -> Result<Option<User>> {
        self.with_conn(|conn| query_user(conn, id))
    }

    pub fn is_teacher(&self, id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let flag: Option<bool> = conn
                .query_row("SELECT is_teacher FROM users WHERE id = ?1", [id], |row| row.get(0))
                .optional()?;
            Ok(flag.unwrap_or(false))
        })
    }

    pub fn update_profile(&self, id: i64, update: &ProfileUpdate<'_>) -> Result<Option<User>> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET
                    username   = COALESCE(?2, username),
                    email      = COALESCE(?3, email),
                    bio        = COALESCE(?4, bio),
                    status     = COALESCE(?5, status),
                    avatar_url = COALESCE(?6, avatar_url),
                    updated_at = strftime('%Y-%m-%d %H:%M:%f', 'now')
                 WHERE id = ?1",
                params![
                    id,
                    update.username,
                    update.email,
                    update.bio,
                    update.status,
                    update.avatar_url
                ],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            query_user(conn, id)
        })
    }

    /// Sets the presence status and bumps `last_seen`.
    pub fn set_status(&self, id: i64, status: &str) -> Result<Option<UserStatus>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "UPDATE users
                     SET status = ?2, last_seen = strftime('%Y-%m-%d %H:%M:%f', 'now')
                     WHERE id = ?1
                     RETURNING id, username, status, last_seen",
                    params![id, status],
                    |row| {
                        Ok(UserStatus {
                            id: row.get(0)?,
                            username: row.get(1)?,
                            status: row.get(2)?,
                            last_seen: row.get(3)?,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
    }

    pub fn list_online_users(&self) -> Result<Vec<OnlineUser>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, username, is_teacher, status, last_seen
                 FROM users
                 WHERE last_seen > strftime('%Y-%m-%d %H:%M:%f', 'now', ?1)
                   AND status != 'offline'
                 ORDER BY last_seen DESC",
            )?;
            let window = format!("-{} minutes", ONLINE_WINDOW_MINUTES);
            let rows = stmt
                .query_map([window], |row| {
                    Ok(OnlineUser {
                        id: row.get(0)?,
                        username: row.get(1)?,
                        is_teacher: row.get(2)?,
                        status: row.get(3)?,
                        last_seen: row.get(4)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Returns false if the user does not exist.
    pub fn set_teacher(&self, id: i64, is_teacher: bool) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET is_teacher = ?2, updated_at = strftime('%Y-%m-%d %H:%M:%f', 'now')
                 WHERE id = ?1",
                params![id, is_teacher],
            )?;
            Ok(changed > 0)
        })
    }

    /// Sets the teacher flag on every listed username that has an account.
    /// Returns how many accounts were updated.
    pub fn promote_teachers(&self, usernames: &[String]) -> Result<usize> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "UPDATE users SET is_teacher = 1, updated_at = strftime('%Y-%m-%d %H:%M:%f', 'now')
                 WHERE username = ?1 AND is_teacher = 0",
            )?;
            let mut changed = 0;
            for name in usernames {
                changed += stmt.execute([name])?;
            }
            Ok(changed)
        })
    }

    pub fn get_username(&self, id: i64) -> Result<Option<String>> {
        self.with_conn(|conn| {
            let name = conn
                .query_row("SELECT username FROM users WHERE id = ?1", [id], |row| row.get(0))
                .optional()?;
            Ok(name)
        })
    }
}

pub(crate) fn query_user(conn: &Connection, id: i64) -> Result<Option<User>> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1");
    let user = conn.query_row(&sql, [id], user_from_row).optional()?;
    Ok(user)
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        avatar_url: row.get(3)?,
        bio: row.get(4)?,
        status: row.get(5)?,
        is_teacher: row.get(6)?,
        last_seen: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}
