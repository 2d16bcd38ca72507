use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde_json::Value;

use scdio_types::models::{Post, PostType, Stamp, Whiteboard, WikiPage};

use crate::Database;
use crate::models::{json_column, parsed_column};
use crate::queries::{SCOPE_CLAUSE, Scope};

const WIKI_SELECT: &str = "SELECT w.id, w.server_id, w.slug, w.title, w.content, w.tags,
        w.author_id, u.username, w.last_editor_id, w.created_at, w.updated_at
     FROM wiki_pages w
     LEFT JOIN users u ON u.id = w.author_id";

const POST_SELECT: &str = "SELECT p.id, p.server_id, p.title, p.content, p.type, p.tags,
        p.author_id, u.username, u.avatar_url, p.created_at, p.updated_at
     FROM posts p
     LEFT JOIN users u ON u.id = p.author_id";

const WHITEBOARD_COLUMNS: &str = "id, server_id, name, data, owner_id, created_at, updated_at";

const STAMP_COLUMNS: &str = "id, server_id, name, image_url, owner_id, created_at";

pub struct NewWikiPage<'a> {
    pub server_id: Option<i64>,
    /// Derived from the title when absent.
    pub slug: Option<&'a str>,
    pub title: &'a str,
    pub content: &'a str,
    pub tags: &'a [String],
}

#[derive(Debug, Default)]
pub struct WikiChanges<'a> {
    pub title: Option<&'a str>,
    pub content: Option<&'a str>,
    pub tags: Option<&'a [String]>,
}

pub struct NewPost<'a> {
    pub server_id: Option<i64>,
    pub title: &'a str,
    pub content: &'a str,
    pub post_type: PostType,
    pub tags: &'a [String],
}

/// Lower-cased title with every whitespace run collapsed to `-`.
pub fn slugify(title: &str) -> String {
    title
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join("-")
}

impl Database {
    // -- Wiki --

    /// Most recently updated first.
    pub fn list_wiki_pages(&self, scope: Scope) -> Result<Vec<WikiPage>> {
        self.with_conn(|conn| {
            let sql = format!("{WIKI_SELECT} WHERE {SCOPE_CLAUSE} ORDER BY w.updated_at DESC, w.id DESC");
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([scope.server_id(), scope.viewer()], wiki_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn get_wiki_page(&self, slug: &str) -> Result<Option<WikiPage>> {
        self.with_conn(|conn| query_wiki(conn, slug))
    }

    /// `None` if the slug is already taken.
    pub fn create_wiki_page(&self, author_id: i64, page: &NewWikiPage<'_>) -> Result<Option<WikiPage>> {
        let slug = match page.slug {
            Some(slug) => slug.to_string(),
            None => slugify(page.title),
        };
        let tags = serde_json::to_string(page.tags)?;
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO wiki_pages (server_id, slug, title, content, tags, author_id, last_editor_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                params![page.server_id, slug, page.title, page.content, tags, author_id],
            )?;
            if inserted == 0 {
                return Ok(None);
            }
            query_wiki(conn, &slug)
        })
    }

    pub fn update_wiki_page(
        &self,
        slug: &str,
        editor_id: i64,
        changes: &WikiChanges<'_>,
    ) -> Result<Option<WikiPage>> {
        let tags = changes.tags.map(serde_json::to_string).transpose()?;
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE wiki_pages SET
                    title = COALESCE(?2, title),
                    content = COALESCE(?3, content),
                    tags = COALESCE(?4, tags),
                    last_editor_id = ?5,
                    updated_at = strftime('%Y-%m-%d %H:%M:%f', 'now')
                 WHERE slug = ?1",
                params![slug, changes.title, changes.content, tags, editor_id],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            query_wiki(conn, slug)
        })
    }

    pub fn delete_wiki_page(&self, slug: &str) -> Result<bool> {
        self.with_conn(|conn| Ok(conn.execute("DELETE FROM wiki_pages WHERE slug = ?1", [slug])? > 0))
    }

    // -- Posts --

    /// Newest first, optionally only diaries or only albums.
    pub fn list_posts(&self, scope: Scope, post_type: Option<PostType>) -> Result<Vec<Post>> {
        self.with_conn(|conn| {
            let sql = format!(
                "{POST_SELECT}
                 WHERE {SCOPE_CLAUSE} AND (?3 IS NULL OR p.type = ?3)
                 ORDER BY p.created_at DESC, p.id DESC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![scope.server_id(), scope.viewer(), post_type.map(PostType::as_str)], post_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn get_post(&self, id: i64) -> Result<Option<Post>> {
        self.with_conn(|conn| query_post(conn, id))
    }

    pub fn create_post(&self, author_id: i64, post: &NewPost<'_>) -> Result<Post> {
        let tags = serde_json::to_string(post.tags)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO posts (server_id, title, content, type, tags, author_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    post.server_id,
                    post.title,
                    post.content,
                    post.post_type.as_str(),
                    tags,
                    author_id
                ],
            )?;
            let id = conn.last_insert_rowid();
            query_post(conn, id)?.ok_or_else(|| anyhow::anyhow!("post {} vanished after insert", id))
        })
    }

    /// Replaces title, content, type and tags.
    pub fn update_post(&self, id: i64, post: &NewPost<'_>) -> Result<Option<Post>> {
        let tags = serde_json::to_string(post.tags)?;
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE posts SET
                    title = ?2, content = ?3, type = ?4, tags = ?5,
                    updated_at = strftime('%Y-%m-%d %H:%M:%f', 'now')
                 WHERE id = ?1",
                params![id, post.title, post.content, post.post_type.as_str(), tags],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            query_post(conn, id)
        })
    }

    pub fn delete_post(&self, id: i64) -> Result<bool> {
        self.with_conn(|conn| Ok(conn.execute("DELETE FROM posts WHERE id = ?1", [id])? > 0))
    }

    // -- Whiteboards --

    pub fn list_whiteboards(&self, scope: Scope) -> Result<Vec<Whiteboard>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {WHITEBOARD_COLUMNS} FROM whiteboards
                 WHERE {SCOPE_CLAUSE} ORDER BY updated_at DESC, id DESC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([scope.server_id(), scope.viewer()], whiteboard_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn create_whiteboard(
        &self,
        owner_id: i64,
        server_id: Option<i64>,
        name: &str,
        data: &Value,
    ) -> Result<Whiteboard> {
        let data = serde_json::to_string(data)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO whiteboards (server_id, name, data, owner_id) VALUES (?1, ?2, ?3, ?4)",
                params![server_id, name, data, owner_id],
            )?;
            let id = conn.last_insert_rowid();
            query_whiteboard(conn, id)?
                .ok_or_else(|| anyhow::anyhow!("whiteboard {} vanished after insert", id))
        })
    }

    pub fn get_whiteboard(&self, id: i64) -> Result<Option<Whiteboard>> {
        self.with_conn(|conn| query_whiteboard(conn, id))
    }

    pub fn update_whiteboard(
        &self,
        id: i64,
        name: Option<&str>,
        data: Option<&Value>,
    ) -> Result<Option<Whiteboard>> {
        let data = data.map(serde_json::to_string).transpose()?;
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE whiteboards SET
                    name = COALESCE(?2, name),
                    data = COALESCE(?3, data),
                    updated_at = strftime('%Y-%m-%d %H:%M:%f', 'now')
                 WHERE id = ?1",
                params![id, name, data],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            query_whiteboard(conn, id)
        })
    }

    pub fn delete_whiteboard(&self, id: i64) -> Result<bool> {
        self.with_conn(|conn| Ok(conn.execute("DELETE FROM whiteboards WHERE id = ?1", [id])? > 0))
    }

    // -- Stamps --

    pub fn list_stamps(&self, scope: Scope) -> Result<Vec<Stamp>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {STAMP_COLUMNS} FROM stamps
                 WHERE {SCOPE_CLAUSE} ORDER BY created_at DESC, id DESC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([scope.server_id(), scope.viewer()], stamp_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn create_stamp(
        &self,
        owner_id: i64,
        server_id: Option<i64>,
        name: &str,
        image_url: &str,
    ) -> Result<Stamp> {
        self.with_conn(|conn| {
            let sql = format!(
                "INSERT INTO stamps (server_id, name, image_url, owner_id) VALUES (?1, ?2, ?3, ?4)
                 RETURNING {STAMP_COLUMNS}"
            );
            let stamp = conn.query_row(&sql, params![server_id, name, image_url, owner_id], stamp_from_row)?;
            Ok(stamp)
        })
    }

    pub fn get_stamp(&self, id: i64) -> Result<Option<Stamp>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {STAMP_COLUMNS} FROM stamps WHERE id = ?1");
            Ok(conn.query_row(&sql, [id], stamp_from_row).optional()?)
        })
    }

    /// Returns the deleted stamp's image url so the file can be removed.
    pub fn delete_stamp(&self, id: i64) -> Result<Option<String>> {
        self.with_conn(|conn| {
            let url = conn
                .query_row("DELETE FROM stamps WHERE id = ?1 RETURNING image_url", [id], |row| {
                    row.get(0)
                })
                .optional()?;
            Ok(url)
        })
    }
}

fn query_wiki(conn: &Connection, slug: &str) -> Result<Option<WikiPage>> {
    let sql = format!("{WIKI_SELECT} WHERE w.slug = ?1");
    Ok(conn.query_row(&sql, [slug], wiki_from_row).optional()?)
}

fn wiki_from_row(row: &Row<'_>) -> rusqlite::Result<WikiPage> {
    Ok(WikiPage {
        id: row.get(0)?,
        server_id: row.get(1)?,
        slug: row.get(2)?,
        title: row.get(3)?,
        content: row.get(4)?,
        tags: json_column(row, 5)?,
        author_id: row.get(6)?,
        author_name: row.get(7)?,
        last_editor_id: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

fn query_post(conn: &Connection, id: i64) -> Result<Option<Post>> {
    let sql = format!("{POST_SELECT} WHERE p.id = ?1");
    Ok(conn.query_row(&sql, [id], post_from_row).optional()?)
}

fn post_from_row(row: &Row<'_>) -> rusqlite::Result<Post> {
    Ok(Post {
        id: row.get(0)?,
        server_id: row.get(1)?,
        title: row.get(2)?,
        content: row.get(3)?,
        post_type: parsed_column(row, 4, PostType::parse)?,
        tags: json_column(row, 5)?,
        author_id: row.get(6)?,
        author_name: row.get(7)?,
        author_avatar: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

fn query_whiteboard(conn: &Connection, id: i64) -> Result<Option<Whiteboard>> {
    let sql = format!("SELECT {WHITEBOARD_COLUMNS} FROM whiteboards WHERE id = ?1");
    Ok(conn.query_row(&sql, [id], whiteboard_from_row).optional()?)
}

fn whiteboard_from_row(row: &Row<'_>) -> rusqlite::Result<Whiteboard> {
    Ok(Whiteboard {
        id: row.get(0)?,
        server_id: row.get(1)?,
        name: row.get(2)?,
        data: json_column(row, 3)?,
        owner_id: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn stamp_from_row(row: &Row<'_>) -> rusqlite::Result<Stamp> {
    Ok(Stamp {
        id: row.get(0)?,
        server_id: row.get(1)?,
        name: row.get(2)?,
        image_url: row.get(3)?,
        owner_id: row.get(4)?,
        created_at: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use scdio_types::models::PostType;

    use crate::Database;
    use crate::queries::test_support::user;

    use super::*;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Concert  Setup Guide"), "concert-setup-guide");
        assert_eq!(slugify("  合奏 の 手順 "), "合奏-の-手順");
    }

    #[test]
    fn test_wiki_lifecycle() {
        let db = Database::open_in_memory().unwrap();
        let author = user(&db, "author");
        let editor = user(&db, "editor");
        let tags = vec!["guide".to_string()];

        let page = db
            .create_wiki_page(
                author.id,
                &NewWikiPage {
                    server_id: None,
                    slug: None,
                    title: "Concert Setup",
                    content: "Chairs first.",
                    tags: &tags,
                },
            )
            .unwrap()
            .unwrap();
        assert_eq!(page.slug, "concert-setup");
        assert_eq!(page.tags, tags);
        assert_eq!(page.author_name.as_deref(), Some("author"));

        let duplicate = db
            .create_wiki_page(
                editor.id,
                &NewWikiPage {
                    server_id: None,
                    slug: Some("concert-setup"),
                    title: "Other",
                    content: "",
                    tags: &[],
                },
            )
            .unwrap();
        assert!(duplicate.is_none());

        let updated = db
            .update_wiki_page(
                "concert-setup",
                editor.id,
                &WikiChanges {
                    content: Some("Stands first."),
                    ..Default::default()
                },
            )
            .unwrap()
            .unwrap();
        assert_eq!(updated.content, "Stands first.");
        assert_eq!(updated.title, "Concert Setup");
        assert_eq!(updated.last_editor_id, Some(editor.id));
        assert_eq!(updated.author_id, Some(author.id));

        assert_eq!(db.list_wiki_pages(Scope::All).unwrap().len(), 1);
        assert!(db.delete_wiki_page("concert-setup").unwrap());
        assert!(db.get_wiki_page("concert-setup").unwrap().is_none());
    }

    #[test]
    fn test_posts_filter_by_type() {
        let db = Database::open_in_memory().unwrap();
        let author = user(&db, "author");

        let diary = db
            .create_post(
                author.id,
                &NewPost {
                    server_id: None,
                    title: "練習日誌",
                    content: "ロングトーン",
                    post_type: PostType::Diary,
                    tags: &[],
                },
            )
            .unwrap();
        db.create_post(
            author.id,
            &NewPost {
                server_id: None,
                title: "夏合宿",
                content: "写真",
                post_type: PostType::Album,
                tags: &["camp".to_string()],
            },
        )
        .unwrap();

        assert_eq!(db.list_posts(Scope::All, None).unwrap().len(), 2);
        let albums = db.list_posts(Scope::All, Some(PostType::Album)).unwrap();
        assert_eq!(albums.len(), 1);
        assert_eq!(albums[0].tags, vec!["camp".to_string()]);

        let updated = db
            .update_post(
                diary.id,
                &NewPost {
                    server_id: None,
                    title: "練習日誌 2",
                    content: "スケール",
                    post_type: PostType::Diary,
                    tags: &[],
                },
            )
            .unwrap()
            .unwrap();
        assert_eq!(updated.title, "練習日誌 2");
        assert!(db.delete_post(diary.id).unwrap());
        assert!(db.get_post(diary.id).unwrap().is_none());
    }

    #[test]
    fn test_whiteboard_data_round_trips_as_json() {
        let db = Database::open_in_memory().unwrap();
        let owner = user(&db, "owner");

        let board = db
            .create_whiteboard(owner.id, None, "formation", &json!([]))
            .unwrap();
        assert_eq!(board.data, json!([]));

        let strokes = json!([{"x": 1, "y": 2}]);
        let updated = db
            .update_whiteboard(board.id, None, Some(&strokes))
            .unwrap()
            .unwrap();
        assert_eq!(updated.name, "formation");
        assert_eq!(updated.data, strokes);
        assert!(db.delete_whiteboard(board.id).unwrap());
    }

    #[test]
    fn test_stamp_delete_returns_image_url() {
        let db = Database::open_in_memory().unwrap();
        let owner = user(&db, "owner");

        let stamp = db
            .create_stamp(owner.id, None, "ok", "/uploads/stamps/ok.png")
            .unwrap();
        assert_eq!(db.list_stamps(Scope::All).unwrap().len(), 1);
        assert_eq!(db.get_stamp(stamp.id).unwrap().unwrap().name, "ok");

        assert_eq!(
            db.delete_stamp(stamp.id).unwrap().as_deref(),
            Some("/uploads/stamps/ok.png")
        );
        assert!(db.delete_stamp(stamp.id).unwrap().is_none());
    }
}
