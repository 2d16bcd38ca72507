use axum::{
    Extension, Json,
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::Value;
use tracing::{debug, info};

use scdio_db::queries::{NewPost, NewWikiPage, WikiChanges};
use scdio_types::api::{
    Claims, CreateWikiRequest, PostQuery, PostRequest, ScopeQuery, UpdateWikiRequest, WhiteboardRequest, required,
};
use scdio_types::events::{GatewayEvent, Room};
use scdio_types::models::{Post, PostType, Stamp, Whiteboard, WikiPage};

use crate::access::{check_scope, require_owner_or_teacher, require_teacher};
use crate::auth::AppState;
use crate::blocking;
use crate::dashboard;
use crate::error::{ApiError, ApiResult};
use crate::uploads::{UploadForm, remove_upload};

// -- Wiki --

pub async fn list_wiki(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(scope): Query<ScopeQuery>,
) -> ApiResult<Json<Vec<WikiPage>>> {
    let pages = blocking(&state, move |db| {
        let visible = check_scope(db, scope.server_id, claims.sub)?;
        Ok(db.list_wiki_pages(visible)?)
    })
    .await?;
    Ok(Json(pages))
}

pub async fn create_wiki(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateWikiRequest>,
) -> ApiResult<impl IntoResponse> {
    let page = blocking(&state, move |db| {
        let (Some(title), Some(content)) = (required(&req.title), required(&req.content)) else {
            return Err(ApiError::bad_request("Title and content are required"));
        };
        check_scope(db, req.server_id, claims.sub)?;
        let tags = req.tags.as_deref().unwrap_or_default();
        db.create_wiki_page(
            claims.sub,
            &NewWikiPage {
                server_id: req.server_id,
                slug: required(&req.slug),
                title,
                content,
                tags,
            },
        )?
        .ok_or_else(|| ApiError::bad_request("A page with this slug already exists"))
    })
    .await?;

    info!("Wiki page '{}' created", page.slug);
    dashboard::notify(&state, "wiki");
    Ok((StatusCode::CREATED, Json(page)))
}

pub async fn get_wiki(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(slug): Path<String>,
) -> ApiResult<Json<WikiPage>> {
    let page = blocking(&state, move |db| {
        let page = db.get_wiki_page(&slug)?.ok_or_else(|| ApiError::not_found("Page not found"))?;
        check_scope(db, page.server_id, claims.sub)?;
        Ok(page)
    })
    .await?;
    Ok(Json(page))
}

pub async fn update_wiki(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(slug): Path<String>,
    Json(req): Json<UpdateWikiRequest>,
) -> ApiResult<Json<WikiPage>> {
    let page = blocking(&state, move |db| {
        let page = db.get_wiki_page(&slug)?.ok_or_else(|| ApiError::not_found("Page not found"))?;
        require_owner_or_teacher(db, page.author_id, claims.sub)?;
        db.update_wiki_page(
            &slug,
            claims.sub,
            &WikiChanges {
                title: required(&req.title),
                content: req.content.as_deref(),
                tags: req.tags.as_deref(),
            },
        )?
        .ok_or_else(|| ApiError::not_found("Page not found"))
    })
    .await?;
    Ok(Json(page))
}

pub async fn delete_wiki(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(slug): Path<String>,
) -> ApiResult<StatusCode> {
    blocking(&state, move |db| {
        let page = db.get_wiki_page(&slug)?.ok_or_else(|| ApiError::not_found("Page not found"))?;
        require_owner_or_teacher(db, page.author_id, claims.sub)?;
        db.delete_wiki_page(&slug)?;
        Ok(())
    })
    .await?;

    dashboard::notify(&state, "wiki");
    Ok(StatusCode::NO_CONTENT)
}

// -- Posts --

fn post_type(value: Option<&str>) -> ApiResult<Option<PostType>> {
    value
        .map(|raw| PostType::parse(raw).ok_or_else(|| ApiError::bad_request("Type must be diary or album")))
        .transpose()
}

fn new_post(req: &PostRequest) -> ApiResult<NewPost<'_>> {
    let (Some(title), Some(content)) = (required(&req.title), required(&req.content)) else {
        return Err(ApiError::bad_request("Title and content are required"));
    };
    Ok(NewPost {
        server_id: req.server_id,
        title,
        content,
        post_type: post_type(required(&req.post_type))?.unwrap_or(PostType::Diary),
        tags: req.tags.as_deref().unwrap_or_default(),
    })
}

pub async fn list_posts(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<PostQuery>,
) -> ApiResult<Json<Vec<Post>>> {
    let posts = blocking(&state, move |db| {
        let kind = post_type(required(&query.post_type))?;
        let visible = check_scope(db, query.server_id, claims.sub)?;
        Ok(db.list_posts(visible, kind)?)
    })
    .await?;
    Ok(Json(posts))
}

pub async fn create_post(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<PostRequest>,
) -> ApiResult<impl IntoResponse> {
    let post = blocking(&state, move |db| {
        let post = new_post(&req)?;
        check_scope(db, req.server_id, claims.sub)?;
        Ok(db.create_post(claims.sub, &post)?)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(post)))
}

pub async fn get_post(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Post>> {
    let post = blocking(&state, move |db| {
        let post = db.get_post(id)?.ok_or_else(|| ApiError::not_found("Post not found"))?;
        check_scope(db, post.server_id, claims.sub)?;
        Ok(post)
    })
    .await?;
    Ok(Json(post))
}

pub async fn update_post(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    Json(req): Json<PostRequest>,
) -> ApiResult<Json<Post>> {
    let post = blocking(&state, move |db| {
        let existing = db.get_post(id)?.ok_or_else(|| ApiError::not_found("Post not found"))?;
        require_owner_or_teacher(db, Some(existing.author_id), claims.sub)?;
        db.update_post(id, &new_post(&req)?)?
            .ok_or_else(|| ApiError::not_found("Post not found"))
    })
    .await?;
    Ok(Json(post))
}

pub async fn delete_post(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    blocking(&state, move |db| {
        let post = db.get_post(id)?.ok_or_else(|| ApiError::not_found("Post not found"))?;
        require_owner_or_teacher(db, Some(post.author_id), claims.sub)?;
        db.delete_post(id)?;
        Ok(())
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

// -- Whiteboards --

pub async fn list_whiteboards(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(scope): Query<ScopeQuery>,
) -> ApiResult<Json<Vec<Whiteboard>>> {
    let boards = blocking(&state, move |db| {
        let visible = check_scope(db, scope.server_id, claims.sub)?;
        Ok(db.list_whiteboards(visible)?)
    })
    .await?;
    Ok(Json(boards))
}

pub async fn create_whiteboard(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<WhiteboardRequest>,
) -> ApiResult<impl IntoResponse> {
    let board = blocking(&state, move |db| {
        let name = required(&req.name).ok_or_else(|| ApiError::bad_request("Name is required"))?;
        check_scope(db, req.server_id, claims.sub)?;
        let data = req.data.clone().unwrap_or_else(|| Value::Array(Vec::new()));
        Ok(db.create_whiteboard(claims.sub, req.server_id, name, &data)?)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(board)))
}

pub async fn get_whiteboard(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Whiteboard>> {
    let board = blocking(&state, move |db| {
        let board = db.get_whiteboard(id)?.ok_or_else(|| ApiError::not_found("Whiteboard not found"))?;
        check_scope(db, board.server_id, claims.sub)?;
        Ok(board)
    })
    .await?;
    Ok(Json(board))
}

/// Saves the board and pushes it to every connected client.
pub async fn update_whiteboard(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    Json(req): Json<WhiteboardRequest>,
) -> ApiResult<Json<Whiteboard>> {
    let board = blocking(&state, move |db| {
        let board = db.get_whiteboard(id)?.ok_or_else(|| ApiError::not_found("Whiteboard not found"))?;
        require_owner_or_teacher(db, Some(board.owner_id), claims.sub)?;
        db.update_whiteboard(id, required(&req.name), req.data.as_ref())?
            .ok_or_else(|| ApiError::not_found("Whiteboard not found"))
    })
    .await?;

    let payload = serde_json::to_value(&board).map_err(anyhow::Error::from)?;
    state
        .dispatcher
        .broadcast(Room::Global, GatewayEvent::WhiteboardUpdate(payload));
    debug!("Whiteboard {} updated by {}", board.id, claims.username);
    Ok(Json(board))
}

pub async fn delete_whiteboard(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    blocking(&state, move |db| {
        let board = db.get_whiteboard(id)?.ok_or_else(|| ApiError::not_found("Whiteboard not found"))?;
        require_owner_or_teacher(db, Some(board.owner_id), claims.sub)?;
        db.delete_whiteboard(id)?;
        Ok(())
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

// -- Stamps --

const STAMP_FIELDS: &[&str] = &["image", "stamps"];

pub async fn list_stamps(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(scope): Query<ScopeQuery>,
) -> ApiResult<Json<Vec<Stamp>>> {
    let stamps = blocking(&state, move |db| {
        let visible = check_scope(db, scope.server_id, claims.sub)?;
        Ok(db.list_stamps(visible)?)
    })
    .await?;
    Ok(Json(stamps))
}

/// Multipart upload: a `name` field plus the image under `image` or `stamps`.
pub async fn create_stamp(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    let form = UploadForm::read(&state.upload_dir, multipart).await?;

    let fields = (|| {
        let name = form
            .text("name")
            .ok_or_else(|| ApiError::bad_request("Name and image are required"))?;
        let image = form
            .file(STAMP_FIELDS)
            .ok_or_else(|| ApiError::bad_request("Name and image are required"))?;
        let server_id = form
            .text("server_id")
            .map(|raw| raw.parse::<i64>().map_err(|_| ApiError::bad_request("Invalid server_id")))
            .transpose()?;
        Ok::<_, ApiError>((name.to_string(), image.url.clone(), server_id))
    })();
    let (name, image_url, server_id) = match fields {
        Ok(fields) => fields,
        Err(e) => {
            form.discard(&state.upload_dir).await;
            return Err(e);
        }
    };

    let result = blocking(&state, move |db| {
        require_teacher(db, claims.sub)?;
        check_scope(db, server_id, claims.sub)?;
        Ok(db.create_stamp(claims.sub, server_id, &name, &image_url)?)
    })
    .await;

    match result {
        Ok(stamp) => {
            info!("Stamp '{}' uploaded to {}", stamp.name, stamp.image_url);
            Ok((StatusCode::CREATED, Json(stamp)))
        }
        Err(e) => {
            form.discard(&state.upload_dir).await;
            Err(e)
        }
    }
}

pub async fn get_stamp(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Stamp>> {
    let stamp = blocking(&state, move |db| {
        let stamp = db.get_stamp(id)?.ok_or_else(|| ApiError::not_found("Stamp not found"))?;
        check_scope(db, stamp.server_id, claims.sub)?;
        Ok(stamp)
    })
    .await?;
    Ok(Json(stamp))
}

/// Deletes the row and then its image file.
pub async fn delete_stamp(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    let image_url = blocking(&state, move |db| {
        require_teacher(db, claims.sub)?;
        db.delete_stamp(id)?
            .ok_or_else(|| ApiError::not_found("Stamp not found"))
    })
    .await?;

    remove_upload(&state.upload_dir, &image_url).await;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    use scdio_types::events::{GatewayEvent, Room};

    use crate::test_support::{FilePart, test_app};
    use crate::uploads::url_to_path;

    #[tokio::test]
    async fn test_wiki_pages_by_slug() {
        let app = test_app();
        let (author, author_id) = app.register("author").await;
        let (other, _) = app.register("other").await;
        let (teacher, teacher_id) = app.register("sensei").await;
        app.make_teacher(teacher_id);

        let (status, body) = app
            .post_json("/api/wiki", Some(&author), json!({"title": "Club Rules"}))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Title and content are required");

        let (status, page) = app
            .post_json(
                "/api/wiki",
                Some(&author),
                json!({"title": "Club  Rules", "content": "遅刻しない", "tags": ["rules"]}),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(page["slug"], "club-rules");
        assert_eq!(page["author_id"], author_id);
        assert_eq!(page["tags"], json!(["rules"]));

        let (status, _) = app
            .post_json("/api/wiki", Some(&other), json!({"title": "Club Rules", "content": "dup"}))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = app
            .put_json("/api/wiki/club-rules", Some(&other), json!({"content": "vandalism"}))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, edited) = app
            .put_json("/api/wiki/club-rules", Some(&teacher), json!({"content": "遅刻しない・走らない"}))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(edited["title"], "Club  Rules");
        assert_eq!(edited["last_editor_id"], teacher_id);

        let (status, fetched) = app.get("/api/wiki/club-rules", Some(&other)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fetched["content"], "遅刻しない・走らない");

        let (status, _) = app.delete("/api/wiki/club-rules", Some(&author)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = app.get("/api/wiki/club-rules", Some(&author)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_posts_filter_and_ownership() {
        let app = test_app();
        let (author, _) = app.register("author").await;
        let (other, _) = app.register("other").await;

        let (status, diary) = app
            .post_json("/api/posts", Some(&author), json!({"title": "合宿1日目", "content": "晴れ"}))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(diary["type"], "diary");
        let (_, album) = app
            .post_json(
                "/api/posts",
                Some(&author),
                json!({"title": "集合写真", "content": "/uploads/posts/a.jpg", "type": "album"}),
            )
            .await;
        let (status, _) = app
            .post_json("/api/posts", Some(&author), json!({"title": "x", "content": "y", "type": "vlog"}))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, albums) = app.get("/api/posts?type=album", Some(&other)).await;
        assert_eq!(albums.as_array().unwrap().len(), 1);
        assert_eq!(albums[0]["id"], album["id"]);
        let (status, _) = app.get("/api/posts?type=vlog", Some(&other)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let id = diary["id"].as_i64().unwrap();
        let (status, _) = app
            .put_json(&format!("/api/posts/{id}"), Some(&other), json!({"title": "t", "content": "c"}))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, updated) = app
            .put_json(
                &format!("/api/posts/{id}"),
                Some(&author),
                json!({"title": "合宿1日目", "content": "雨", "tags": ["合宿"]}),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["content"], "雨");
        assert_eq!(updated["tags"], json!(["合宿"]));

        let (status, _) = app.delete(&format!("/api/posts/{id}"), Some(&author)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_whiteboard_update_is_broadcast() {
        let app = test_app();
        let (owner, owner_id) = app.register("owner").await;
        let (other, _) = app.register("other").await;

        let (status, board) = app
            .post_json("/api/whiteboards", Some(&owner), json!({"name": "フォーメーション"}))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(board["data"], json!([]));
        assert_eq!(board["owner_id"], owner_id);
        let id = board["id"].as_i64().unwrap();

        let (status, _) = app
            .put_json(&format!("/api/whiteboards/{id}"), Some(&other), json!({"data": []}))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let mut rx = app.state.dispatcher.subscribe();
        let strokes = json!([{"x": 1, "y": 2}]);
        let (status, updated) = app
            .put_json(&format!("/api/whiteboards/{id}"), Some(&owner), json!({"data": strokes.clone()}))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["name"], "フォーメーション");
        assert_eq!(updated["data"], strokes);

        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.room, Room::Global);
        assert!(matches!(&envelope.event, GatewayEvent::WhiteboardUpdate(v) if v["id"] == id));

        let (status, _) = app.delete(&format!("/api/whiteboards/{id}"), Some(&owner)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_stamp_upload_and_delete() {
        let app = test_app();
        let (member, _) = app.register("member").await;
        let (teacher, teacher_id) = app.register("sensei").await;
        app.make_teacher(teacher_id);

        let (status, _) = app
            .multipart(Method::POST, "/api/stamps", &member, &[("name", "いいね")], &[png()])
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = app
            .multipart(Method::POST, "/api/stamps", &teacher, &[("name", "いいね")], &[])
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Name and image are required");

        let text = FilePart {
            field: "stamps",
            filename: "notes.txt",
            content_type: "text/plain",
            data: b"hello",
        };
        let (status, body) = app
            .multipart(Method::POST, "/api/stamps", &teacher, &[("name", "x")], &[text])
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Only image files are allowed");

        let (status, stamp) = app
            .multipart(Method::POST, "/api/stamps", &teacher, &[("name", "いいね")], &[png()])
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let url = stamp["image_url"].as_str().unwrap().to_string();
        assert!(url.starts_with("/uploads/stamps/image-"));
        let path = url_to_path(&app.state.upload_dir, &url).unwrap();
        assert!(path.exists());

        let (_, stamps) = app.get("/api/stamps", Some(&member)).await;
        assert_eq!(stamps.as_array().unwrap().len(), 1);

        let id = stamp["id"].as_i64().unwrap();
        let (status, _) = app.delete(&format!("/api/stamps/{id}"), Some(&member)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) = app.delete(&format!("/api/stamps/{id}"), Some(&teacher)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(!path.exists());
    }

    fn png() -> FilePart<'static> {
        FilePart {
            field: "image",
            filename: "good.png",
            content_type: "image/png",
            data: b"\x89PNG fake",
        }
    }
}
