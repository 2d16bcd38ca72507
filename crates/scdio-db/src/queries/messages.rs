use std::collections::HashMap;

use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde_json::Value;

use scdio_types::models::{Message, ReactionGroup, ReplyPreview};

use crate::Database;
use crate::models::json_column;
use crate::queries::{placeholders, to_sql_params};

pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const MAX_PAGE_SIZE: u32 = 200;

const MESSAGE_SELECT: &str = "SELECT m.id, m.channel_id, c.server_id, m.user_id, u.username, u.avatar_url,
        m.content, m.attachments, m.reply_to, m.edited, m.created_at, m.updated_at,
        r.id, r.content, ru.username
     FROM messages m
     JOIN users u ON u.id = m.user_id
     JOIN channels c ON c.id = m.channel_id
     LEFT JOIN messages r ON r.id = m.reply_to
     LEFT JOIN users ru ON ru.id = r.user_id";

pub struct NewMessage<'a> {
    pub channel_id: i64,
    pub user_id: i64,
    pub content: Option<&'a str>,
    pub attachments: &'a [Value],
    pub reply_to: Option<i64>,
}

/// Page request for a channel's history. `before` must already be in
/// storage format (see `scdio_types::time::normalize_datetime`). With
/// `before_id` set, messages sharing the `before` timestamp but with a
/// lower id are still included.
#[derive(Debug, Clone)]
pub struct MessagePage {
    pub limit: u32,
    pub before: Option<String>,
    pub before_id: Option<i64>,
    pub offset: u32,
}

impl MessagePage {
    pub fn new(limit: Option<u32>, before: Option<String>, offset: Option<u32>) -> Self {
        Self {
            limit: limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
            before,
            before_id: None,
            offset: offset.unwrap_or(0),
        }
    }
}

impl Default for MessagePage {
    fn default() -> Self {
        Self::new(None, None, None)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReactionToggle {
    pub added: bool,
    pub message_id: i64,
    pub channel_id: i64,
    pub server_id: i64,
}

impl Database {
    pub fn insert_message(&self, msg: &NewMessage<'_>) -> Result<Message> {
        self.with_conn(|conn| {
            let attachments = serde_json::to_string(msg.attachments)?;
            conn.execute(
                "INSERT INTO messages (channel_id, user_id, content, attachments, reply_to)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![msg.channel_id, msg.user_id, msg.content, attachments, msg.reply_to],
            )?;
            let id = conn.last_insert_rowid();
            query_message(conn, id)?
                .ok_or_else(|| anyhow::anyhow!("message {} vanished after insert", id))
        })
    }

    pub fn get_message(&self, id: i64) -> Result<Option<Message>> {
        self.with_conn(|conn| query_message(conn, id))
    }

    /// Newest `page.limit` messages (older than `before`, skipping `offset`),
    /// returned oldest first.
    pub fn list_messages(&self, channel_id: i64, page: &MessagePage) -> Result<Vec<Message>> {
        self.with_conn(|conn| {
            let sql = format!(
                "{MESSAGE_SELECT}
                 WHERE m.channel_id = ?1
                   AND (?2 IS NULL OR m.created_at < ?2 OR (m.created_at = ?2 AND m.id < ?5))
                 ORDER BY m.created_at DESC, m.id DESC
                 LIMIT ?3 OFFSET ?4"
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut messages = stmt
                .query_map(
                    params![channel_id, page.before, page.limit, page.offset, page.before_id],
                    message_from_row,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            messages.reverse();

            attach_reactions(conn, &mut messages)?;
            Ok(messages)
        })
    }

    pub fn edit_message(&self, id: i64, content: &str) -> Result<Option<Message>> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE messages
                 SET content = ?2, edited = 1, updated_at = strftime('%Y-%m-%d %H:%M:%f', 'now')
                 WHERE id = ?1",
                params![id, content],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            query_message(conn, id)
        })
    }

    pub fn delete_message(&self, id: i64) -> Result<bool> {
        self.with_conn(|conn| Ok(conn.execute("DELETE FROM messages WHERE id = ?1", [id])? > 0))
    }

    /// Removes the reaction if present, inserts it otherwise.
    /// `None` if the message does not exist.
    pub fn toggle_reaction(
        &self,
        message_id: i64,
        user_id: i64,
        emoji: &str,
    ) -> Result<Option<ReactionToggle>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let location: Option<(i64, i64)> = tx
                .query_row(
                    "SELECT m.channel_id, c.server_id FROM messages m
                     JOIN channels c ON c.id = m.channel_id
                     WHERE m.id = ?1",
                    [message_id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            let Some((channel_id, server_id)) = location else {
                return Ok(None);
            };

            let removed = tx.execute(
                "DELETE FROM reactions WHERE message_id = ?1 AND user_id = ?2 AND emoji = ?3",
                params![message_id, user_id, emoji],
            )?;
            if removed == 0 {
                tx.execute(
                    "INSERT INTO reactions (message_id, user_id, emoji) VALUES (?1, ?2, ?3)",
                    params![message_id, user_id, emoji],
                )?;
            }
            tx.commit()?;

            Ok(Some(ReactionToggle {
                added: removed == 0,
                message_id,
                channel_id,
                server_id,
            }))
        })
    }
}

fn query_message(conn: &Connection, id: i64) -> Result<Option<Message>> {
    let sql = format!("{MESSAGE_SELECT} WHERE m.id = ?1");
    let message = conn.query_row(&sql, [id], message_from_row).optional()?;
    match message {
        Some(message) => {
            let mut one = vec![message];
            attach_reactions(conn, &mut one)?;
            Ok(one.pop())
        }
        None => Ok(None),
    }
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    let reply_id: Option<i64> = row.get(12)?;
    let reply_message = match reply_id {
        Some(id) => Some(ReplyPreview {
            id,
            content: row.get(13)?,
            username: row.get(14)?,
        }),
        None => None,
    };

    Ok(Message {
        id: row.get(0)?,
        channel_id: row.get(1)?,
        server_id: row.get(2)?,
        user_id: row.get(3)?,
        username: row.get(4)?,
        avatar_url: row.get(5)?,
        content: row.get(6)?,
        attachments: json_column(row, 7)?,
        reply_to: row.get(8)?,
        reply_message,
        edited: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
        reactions: Vec::new(),
    })
}

/// Batch-fetch reactions and group them per emoji in first-reacted order.
fn attach_reactions(conn: &Connection, messages: &mut [Message]) -> Result<()> {
    if messages.is_empty() {
        return Ok(());
    }

    let ids: Vec<i64> = messages.iter().map(|m| m.id).collect();
    let sql = format!(
        "SELECT message_id, emoji, user_id FROM reactions
         WHERE message_id IN ({}) ORDER BY id",
        placeholders(ids.len())
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(to_sql_params(&ids).as_slice(), |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?, row.get::<_, i64>(2)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut grouped: HashMap<i64, Vec<ReactionGroup>> = HashMap::new();
    for (message_id, emoji, user_id) in rows {
        let groups = grouped.entry(message_id).or_default();
        match groups.iter_mut().find(|g| g.emoji == emoji) {
            Some(group) => {
                group.count += 1;
                group.user_ids.push(user_id);
            }
            None => groups.push(ReactionGroup {
                emoji,
                count: 1,
                user_ids: vec![user_id],
            }),
        }
    }

    for message in messages.iter_mut() {
        if let Some(groups) = grouped.remove(&message.id) {
            message.reactions = groups;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::Database;
    use crate::queries::test_support::{server, user};

    use super::{MAX_PAGE_SIZE, MessagePage, NewMessage};

    fn post(db: &Database, channel_id: i64, user_id: i64, text: &str) -> i64 {
        db.insert_message(&NewMessage {
            channel_id,
            user_id,
            content: Some(text),
            attachments: &[],
            reply_to: None,
        })
        .unwrap()
        .id
    }

    #[test]
    fn test_insert_with_reply_and_attachments() {
        let db = Database::open_in_memory().unwrap();
        let owner = user(&db, "owner");
        let created = server(&db, &owner);
        let channel = db.list_channels(created.id).unwrap().uncategorized_channels[0].id;

        let first = post(&db, channel, owner.id, "集合は9時");
        let attachments = vec![json!({"url": "/uploads/score.png"})];
        let reply = db
            .insert_message(&NewMessage {
                channel_id: channel,
                user_id: owner.id,
                content: None,
                attachments: &attachments,
                reply_to: Some(first),
            })
            .unwrap();

        assert_eq!(reply.server_id, created.id);
        assert_eq!(reply.username, "owner");
        assert_eq!(reply.attachments, attachments);
        let preview = reply.reply_message.unwrap();
        assert_eq!(preview.id, first);
        assert_eq!(preview.content.as_deref(), Some("集合は9時"));
        assert!(!reply.edited);
    }

    #[test]
    fn test_list_is_paged_newest_and_returned_oldest_first() {
        let db = Database::open_in_memory().unwrap();
        let owner = user(&db, "owner");
        let created = server(&db, &owner);
        let channel = db.list_channels(created.id).unwrap().uncategorized_channels[0].id;

        for i in 0..5 {
            post(&db, channel, owner.id, &format!("m{i}"));
        }

        let page = db
            .list_messages(channel, &MessagePage::new(Some(2), None, None))
            .unwrap();
        let texts: Vec<_> = page.iter().map(|m| m.content.clone().unwrap()).collect();
        assert_eq!(texts, vec!["m3", "m4"]);

        let page = db
            .list_messages(channel, &MessagePage::new(Some(2), None, Some(2)))
            .unwrap();
        let texts: Vec<_> = page.iter().map(|m| m.content.clone().unwrap()).collect();
        assert_eq!(texts, vec!["m1", "m2"]);

        assert_eq!(MessagePage::new(Some(10_000), None, None).limit, MAX_PAGE_SIZE);
        assert_eq!(MessagePage::default().limit, 50);
    }

    #[test]
    fn test_before_cursor() {
        let db = Database::open_in_memory().unwrap();
        let owner = user(&db, "owner");
        let created = server(&db, &owner);
        let channel = db.list_channels(created.id).unwrap().uncategorized_channels[0].id;

        let old = post(&db, channel, owner.id, "old");
        let new = post(&db, channel, owner.id, "new");
        db.with_conn(|conn| {
            conn.execute(
                "UPDATE messages SET created_at = '2024-01-01 10:00:00.000' WHERE id = ?1",
                [old],
            )?;
            conn.execute(
                "UPDATE messages SET created_at = '2024-01-02 10:00:00.000' WHERE id = ?1",
                [new],
            )?;
            Ok(())
        })
        .unwrap();

        let page = MessagePage::new(None, Some("2024-01-02 00:00:00.000".into()), None);
        let older = db.list_messages(channel, &page).unwrap();
        assert_eq!(older.len(), 1);
        assert_eq!(older[0].id, old);
    }

    #[test]
    fn test_before_cursor_breaks_ties_by_id() {
        let db = Database::open_in_memory().unwrap();
        let owner = user(&db, "owner");
        let created = server(&db, &owner);
        let channel = db.list_channels(created.id).unwrap().uncategorized_channels[0].id;

        let ids: Vec<i64> = (0..3).map(|i| post(&db, channel, owner.id, &format!("m{i}"))).collect();
        db.with_conn(|conn| {
            conn.execute("UPDATE messages SET created_at = '2024-01-01 10:00:00.000'", [])?;
            Ok(())
        })
        .unwrap();

        let mut page = MessagePage::new(Some(1), Some("2024-01-01 10:00:00.000".into()), None);
        page.before_id = Some(ids[2]);
        let older = db.list_messages(channel, &page).unwrap();
        assert_eq!(older.len(), 1);
        assert_eq!(older[0].id, ids[1]);

        page.before_id = Some(ids[1]);
        let older = db.list_messages(channel, &page).unwrap();
        assert_eq!(older[0].id, ids[0]);

        page.before_id = None;
        assert!(db.list_messages(channel, &page).unwrap().is_empty());
    }

    #[test]
    fn test_edit_delete_and_reactions() {
        let db = Database::open_in_memory().unwrap();
        let owner = user(&db, "owner");
        let guest = user(&db, "guest");
        let created = server(&db, &owner);
        let channel = db.list_channels(created.id).unwrap().uncategorized_channels[0].id;
        let id = post(&db, channel, owner.id, "draft");

        let edited = db.edit_message(id, "final").unwrap().unwrap();
        assert!(edited.edited);
        assert!(edited.updated_at.is_some());
        assert_eq!(edited.content.as_deref(), Some("final"));

        let toggle = db.toggle_reaction(id, owner.id, "👍").unwrap().unwrap();
        assert!(toggle.added);
        assert_eq!(toggle.server_id, created.id);
        db.toggle_reaction(id, guest.id, "👍").unwrap();
        db.toggle_reaction(id, guest.id, "🎺").unwrap();

        let message = db.get_message(id).unwrap().unwrap();
        assert_eq!(message.reactions.len(), 2);
        assert_eq!(message.reactions[0].emoji, "👍");
        assert_eq!(message.reactions[0].count, 2);
        assert_eq!(message.reactions[0].user_ids, vec![owner.id, guest.id]);

        let toggle = db.toggle_reaction(id, owner.id, "👍").unwrap().unwrap();
        assert!(!toggle.added);
        assert!(db.toggle_reaction(999, owner.id, "👍").unwrap().is_none());

        assert!(db.delete_message(id).unwrap());
        assert!(db.get_message(id).unwrap().is_none());
        assert!(!db.delete_message(id).unwrap());
    }
}
