//! Multipart uploads stored under the upload root and served at `/uploads`.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use axum::{
    Json,
    extract::{FromRequest, Multipart, Request, multipart::MultipartError},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::{ApiError, ApiResult};

pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Fields whose files must carry an `image/*` content type.
const IMAGE_FIELDS: [&str; 4] = ["stamps", "image", "avatar", "server_icon"];

/// Subdirectory of the upload root a form field's files go to.
pub fn upload_subdir(field: &str) -> Option<&'static str> {
    match field {
        "stamps" | "image" => Some("stamps"),
        "avatar" => Some("avatars"),
        "server_icon" => Some("server_icons"),
        _ => None,
    }
}

/// `<field>-<unix millis>-<random>.<ext>`; the extension is kept only when
/// it is plain ASCII alphanumerics.
pub fn upload_filename(field: &str, original: Option<&str>) -> String {
    let field: String = field
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect();
    let field = if field.is_empty() { "file".to_string() } else { field };

    let ext = original
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
        .unwrap_or_default();

    let millis = chrono::Utc::now().timestamp_millis();
    let suffix: u32 = rand::random_range(0..1_000_000_000);
    format!("{field}-{millis}-{suffix}{ext}")
}

/// Resolve a public `/uploads/...` URL to its file, refusing anything that
/// would escape the upload root.
pub fn url_to_path(upload_dir: &Path, url: &str) -> Option<PathBuf> {
    let relative = Path::new(url.strip_prefix("/uploads/")?);
    if relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        return None;
    }
    Some(upload_dir.join(relative))
}

#[derive(Debug, Clone)]
pub struct SavedUpload {
    pub field: String,
    /// Public URL, e.g. `/uploads/avatars/avatar-1712000000000-42.png`.
    pub url: String,
    pub path: PathBuf,
}

pub async fn save_upload(
    upload_dir: &Path,
    field: &str,
    original_name: Option<&str>,
    data: &[u8],
) -> ApiResult<SavedUpload> {
    let subdir = upload_subdir(field);
    let dir = match subdir {
        Some(sub) => upload_dir.join(sub),
        None => upload_dir.to_path_buf(),
    };
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|e| anyhow::anyhow!("failed to create {}: {}", dir.display(), e))?;

    let filename = upload_filename(field, original_name);
    let path = dir.join(&filename);
    tokio::fs::write(&path, data)
        .await
        .map_err(|e| anyhow::anyhow!("failed to write {}: {}", path.display(), e))?;

    let url = match subdir {
        Some(sub) => format!("/uploads/{sub}/{filename}"),
        None => format!("/uploads/{filename}"),
    };
    debug!("Stored upload {} ({} bytes)", url, data.len());

    Ok(SavedUpload {
        field: field.to_string(),
        url,
        path,
    })
}

/// Best effort: a missing file is only logged.
pub async fn remove_upload(upload_dir: &Path, url: &str) {
    let Some(path) = url_to_path(upload_dir, url) else {
        warn!("Refusing to delete upload outside the upload root: {}", url);
        return;
    };
    if let Err(e) = tokio::fs::remove_file(&path).await {
        warn!("Failed to remove {}: {}", path.display(), e);
    }
}

/// A parsed multipart form: text fields plus the files already written to disk.
#[derive(Debug, Default)]
pub struct UploadForm {
    fields: HashMap<String, String>,
    files: Vec<SavedUpload>,
}

impl UploadForm {
    /// Trimmed, non-blank text field.
    pub fn text(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    pub fn file(&self, names: &[&str]) -> Option<&SavedUpload> {
        self.files.iter().find(|f| names.contains(&f.field.as_str()))
    }

    /// Delete every stored file, for when the request fails after parsing.
    pub async fn discard(self, upload_dir: &Path) {
        for file in self.files {
            remove_upload(upload_dir, &file.url).await;
        }
    }

    pub async fn read(upload_dir: &Path, mut multipart: Multipart) -> ApiResult<Self> {
        let mut form = Self::default();

        loop {
            let field = match multipart.next_field().await {
                Ok(Some(field)) => field,
                Ok(None) => break,
                Err(e) => {
                    form.discard(upload_dir).await;
                    return Err(multipart_error(e));
                }
            };
            let name = field.name().unwrap_or_default().to_string();

            let Some(file_name) = field.file_name().map(str::to_string) else {
                match field.text().await {
                    Ok(value) => {
                        form.fields.insert(name, value);
                        continue;
                    }
                    Err(e) => {
                        form.discard(upload_dir).await;
                        return Err(multipart_error(e));
                    }
                }
            };

            let is_image = field
                .content_type()
                .is_some_and(|ct| ct.starts_with("image/"));
            if IMAGE_FIELDS.contains(&name.as_str()) && !is_image {
                form.discard(upload_dir).await;
                return Err(ApiError::bad_request("Only image files are allowed"));
            }

            let data = match field.bytes().await {
                Ok(data) => data,
                Err(e) => {
                    form.discard(upload_dir).await;
                    return Err(multipart_error(e));
                }
            };
            if data.is_empty() {
                continue;
            }
            if data.len() > MAX_UPLOAD_BYTES {
                form.discard(upload_dir).await;
                return Err(ApiError::PayloadTooLarge("File too large".into()));
            }

            match save_upload(upload_dir, &name, Some(&file_name), &data).await {
                Ok(saved) => form.files.push(saved),
                Err(e) => {
                    form.discard(upload_dir).await;
                    return Err(e);
                }
            }
        }

        Ok(form)
    }
}

fn multipart_error(e: MultipartError) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge("File too large".into())
    } else {
        ApiError::bad_request(format!("Invalid form data: {}", e.body_text()))
    }
}

/// Body accepted either as JSON or as a multipart form (for endpoints that
/// take an optional image alongside their fields).
pub enum JsonOrForm<T> {
    Json(T),
    Form(Multipart),
}

impl<S, T> FromRequest<S> for JsonOrForm<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_multipart = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("multipart/form-data"));

        if is_multipart {
            Multipart::from_request(req, state)
                .await
                .map(Self::Form)
                .map_err(IntoResponse::into_response)
        } else {
            Json::<T>::from_request(req, state)
                .await
                .map(|Json(value)| Self::Json(value))
                .map_err(IntoResponse::into_response)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_routes_to_subdirectory() {
        assert_eq!(upload_subdir("stamps"), Some("stamps"));
        assert_eq!(upload_subdir("image"), Some("stamps"));
        assert_eq!(upload_subdir("avatar"), Some("avatars"));
        assert_eq!(upload_subdir("server_icon"), Some("server_icons"));
        assert_eq!(upload_subdir("attachment"), None);
    }

    #[test]
    fn test_filename_shape() {
        let name = upload_filename("avatar", Some("Me.PNG"));
        let parts: Vec<&str> = name.splitn(3, '-').collect();
        assert_eq!(parts[0], "avatar");
        assert!(parts[1].parse::<i64>().is_ok());
        assert!(parts[2].ends_with(".png"));

        assert!(!upload_filename("file", Some("noext")).contains('.'));
        assert!(!upload_filename("file", Some("evil.p/hp")).contains('/'));
        assert!(upload_filename("../x", None).starts_with("x-"));
    }

    #[test]
    fn test_url_to_path_stays_inside_root() {
        let root = Path::new("/srv/uploads");
        assert_eq!(
            url_to_path(root, "/uploads/stamps/a.png"),
            Some(PathBuf::from("/srv/uploads/stamps/a.png"))
        );
        assert_eq!(url_to_path(root, "/uploads/../etc/passwd"), None);
        assert_eq!(url_to_path(root, "/elsewhere/a.png"), None);
    }

    #[tokio::test]
    async fn test_save_and_remove_upload() {
        let root = std::env::temp_dir().join(format!("scdio-upload-{}", uuid::Uuid::new_v4()));

        let saved = save_upload(&root, "stamps", Some("smile.gif"), b"GIF89a").await.unwrap();
        assert!(saved.url.starts_with("/uploads/stamps/stamps-"));
        assert_eq!(tokio::fs::read(&saved.path).await.unwrap(), b"GIF89a");

        remove_upload(&root, &saved.url).await;
        assert!(!saved.path.exists());

        let _ = tokio::fs::remove_dir_all(&root).await;
    }
}
