use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, Row, params};

use scdio_types::models::{Category, Channel, ChannelList};

use crate::Database;

// Column 8 is server_name, NULL unless joined.
const CHANNEL_SELECT: &str =
    "SELECT c.id, c.server_id, c.category_id, c.name, c.description, c.type, c.position, c.created_at";

impl Database {
    /// Categories in position order, each with its channels, plus the
    /// channels that sit outside any category.
    pub fn list_channels(&self, server_id: i64) -> Result<ChannelList> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, server_id, name, position FROM categories
                 WHERE server_id = ?1 ORDER BY position, id",
            )?;
            let mut categories = stmt
                .query_map([server_id], |row| {
                    Ok(Category {
                        id: row.get(0)?,
                        server_id: row.get(1)?,
                        name: row.get(2)?,
                        position: row.get(3)?,
                        channels: Vec::new(),
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let sql = format!(
                "{CHANNEL_SELECT}, NULL FROM channels c
                 WHERE c.server_id = ?1 ORDER BY c.position, c.id"
            );
            let mut stmt = conn.prepare(&sql)?;
            let channels = stmt
                .query_map([server_id], channel_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let mut uncategorized_channels = Vec::new();
            for channel in channels {
                let slot = channel
                    .category_id
                    .and_then(|id| categories.iter_mut().find(|c| c.id == id));
                match slot {
                    Some(category) => category.channels.push(channel),
                    None => uncategorized_channels.push(channel),
                }
            }

            Ok(ChannelList {
                categories,
                uncategorized_channels,
            })
        })
    }

    /// Appends the channel after the last one in the same category.
    /// `None` if `category_id` is not a category of this server.
    pub fn create_channel(
        &self,
        server_id: i64,
        name: &str,
        description: Option<&str>,
        channel_type: &str,
        category_id: Option<i64>,
    ) -> Result<Option<Channel>> {
        self.with_conn(|conn| {
            if let Some(category_id) = category_id {
                let owned: Option<i64> = conn
                    .query_row(
                        "SELECT id FROM categories WHERE id = ?1 AND server_id = ?2",
                        params![category_id, server_id],
                        |row| row.get(0),
                    )
                    .optional()?;
                if owned.is_none() {
                    return Ok(None);
                }
            }

            conn.execute(
                "INSERT INTO channels (server_id, category_id, name, description, type, position)
                 VALUES (?1, ?2, ?3, ?4, ?5,
                         (SELECT COALESCE(MAX(position), -1) + 1 FROM channels
                          WHERE server_id = ?1 AND category_id IS ?2))",
                params![server_id, category_id, name, description, channel_type],
            )?;
            query_channel(conn, conn.last_insert_rowid())
        })
    }

    pub fn create_category(&self, server_id: i64, name: &str) -> Result<Category> {
        self.with_conn(|conn| {
            let category = conn.query_row(
                "INSERT INTO categories (server_id, name, position)
                 VALUES (?1, ?2, (SELECT COALESCE(MAX(position), -1) + 1 FROM categories WHERE server_id = ?1))
                 RETURNING id, server_id, name, position",
                params![server_id, name],
                |row| {
                    Ok(Category {
                        id: row.get(0)?,
                        server_id: row.get(1)?,
                        name: row.get(2)?,
                        position: row.get(3)?,
                        channels: Vec::new(),
                    })
                },
            )?;
            Ok(category)
        })
    }

    pub fn get_channel(&self, id: i64) -> Result<Option<Channel>> {
        self.with_conn(|conn| query_channel(conn, id))
    }

    pub fn channel_server(&self, channel_id: i64) -> Result<Option<i64>> {
        self.with_conn(|conn| query_channel_server(conn, channel_id))
    }

    /// Every channel of every server the user belongs to.
    pub fn list_channels_for_user(&self, user_id: i64) -> Result<Vec<Channel>> {
        self.with_conn(|conn| {
            let sql = format!(
                "{CHANNEL_SELECT}, s.name FROM channels c
                 JOIN servers s ON s.id = c.server_id
                 JOIN server_members sm ON sm.server_id = c.server_id
                 WHERE sm.user_id = ?1
                 ORDER BY c.server_id, c.position, c.id"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([user_id], channel_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

pub(crate) fn query_channel_server(conn: &Connection, channel_id: i64) -> Result<Option<i64>> {
    let server_id = conn
        .query_row("SELECT server_id FROM channels WHERE id = ?1", [channel_id], |row| {
            row.get(0)
        })
        .optional()?;
    Ok(server_id)
}

fn query_channel(conn: &Connection, id: i64) -> Result<Option<Channel>> {
    let sql = format!("{CHANNEL_SELECT}, NULL FROM channels c WHERE c.id = ?1");
    let channel = conn.query_row(&sql, [id], channel_from_row).optional()?;
    Ok(channel)
}

fn channel_from_row(row: &Row<'_>) -> rusqlite::Result<Channel> {
    Ok(Channel {
        id: row.get(0)?,
        server_id: row.get(1)?,
        category_id: row.get(2)?,
        name: row.get(3)?,
        description: row.get(4)?,
        channel_type: row.get(5)?,
        position: row.get(6)?,
        created_at: row.get(7)?,
        server_name: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use crate::Database;
    use crate::queries::test_support::{server, user};

    #[test]
    fn test_channels_grouped_by_category() {
        let db = Database::open_in_memory().unwrap();
        let owner = user(&db, "owner");
        let created = server(&db, &owner);

        let practice = db.create_category(created.id, "練習").unwrap();
        let events = db.create_category(created.id, "イベント").unwrap();
        assert_eq!((practice.position, events.position), (0, 1));

        let first = db
            .create_channel(created.id, "パート練", None, "text", Some(practice.id))
            .unwrap()
            .unwrap();
        let second = db
            .create_channel(created.id, "合奏", Some("全体"), "voice", Some(practice.id))
            .unwrap()
            .unwrap();
        assert_eq!((first.position, second.position), (0, 1));

        let loose = db.create_channel(created.id, "雑談2", None, "text", None).unwrap().unwrap();
        assert_eq!(loose.position, 3);

        let list = db.list_channels(created.id).unwrap();
        assert_eq!(list.categories.len(), 2);
        let names: Vec<_> = list.categories[0].channels.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["パート練", "合奏"]);
        assert!(list.categories[1].channels.is_empty());
        assert_eq!(list.uncategorized_channels.len(), 4);
    }

    #[test]
    fn test_foreign_category_rejected() {
        let db = Database::open_in_memory().unwrap();
        let owner = user(&db, "owner");
        let a = server(&db, &owner);
        let b = server(&db, &owner);
        let category = db.create_category(b.id, "other").unwrap();

        assert!(db.create_channel(a.id, "x", None, "text", Some(category.id)).unwrap().is_none());
    }

    #[test]
    fn test_channels_for_user_and_lookup() {
        let db = Database::open_in_memory().unwrap();
        let owner = user(&db, "owner");
        let outsider = user(&db, "outsider");
        let created = server(&db, &owner);

        let channels = db.list_channels_for_user(owner.id).unwrap();
        assert_eq!(channels.len(), 3);
        assert_eq!(channels[0].server_name.as_deref(), Some("Brass Band"));
        assert!(db.list_channels_for_user(outsider.id).unwrap().is_empty());

        assert_eq!(db.channel_server(channels[0].id).unwrap(), Some(created.id));
        assert_eq!(db.channel_server(999).unwrap(), None);
    }
}
