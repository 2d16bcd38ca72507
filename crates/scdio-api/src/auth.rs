use std::path::PathBuf;
use std::sync::Arc;

use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use jsonwebtoken::{EncodingKey, Header, encode};
use tracing::{info, warn};

use scdio_db::Database;
use scdio_gateway::Dispatcher;
use scdio_types::api::{AuthResponse, Claims, LoginRequest, RegisterRequest, required};

use crate::blocking;
use crate::error::{ApiError, ApiResult};

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub dispatcher: Dispatcher,
    pub jwt_secret: String,
    pub jwt_ttl_secs: i64,
    pub upload_dir: PathBuf,
    /// Usernames that become teachers as soon as they register.
    pub seed_teachers: Vec<String>,
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<impl IntoResponse> {
    let (Some(username), Some(email), Some(password)) = (
        required(&req.username),
        required(&req.email),
        required(&req.password),
    ) else {
        return Err(ApiError::bad_request("Username, email and password are required"));
    };
    let (username, email) = (username.to_string(), email.to_string());

    let password_hash = hash_password(password)?;

    let seeded = state.seed_teachers.iter().any(|t| *t == username);
    let user = blocking(&state, move |db| {
        if db.username_or_email_taken(&username, &email)? {
            return Err(ApiError::bad_request("Username or email already exists"));
        }
        let mut user = db.create_user(&username, &email, &password_hash)?;
        if seeded {
            db.set_teacher(user.id, true)?;
            user.is_teacher = true;
        }
        Ok(user)
    })
    .await?;

    let token = create_token(&state, user.id, &user.username)?;
    info!("Registered user {} ({})", user.username, user.id);

    Ok((StatusCode::CREATED, Json(AuthResponse { token, user })))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<AuthResponse>> {
    let login = required(&req.username)
        .or(required(&req.email))
        .map(str::to_string);
    let (Some(login), Some(password)) = (login, required(&req.password)) else {
        return Err(ApiError::bad_request("Username and password are required"));
    };
    let password = password.to_string();

    let user = blocking(&state, move |db| {
        let Some(creds) = db.get_credentials(&login)? else {
            warn!("Login attempt for unknown user '{}'", login);
            return Err(invalid_credentials());
        };
        verify_password(&password, &creds.password)?;
        db.get_user(creds.id)?.ok_or_else(invalid_credentials)
    })
    .await?;

    let token = create_token(&state, user.id, &user.username)?;
    Ok(Json(AuthResponse { token, user }))
}

fn invalid_credentials() -> ApiError {
    ApiError::Unauthorized("Invalid credentials".into())
}

/// Argon2id with a random salt, PHC string format.
pub fn hash_password(password: &str) -> ApiResult<String> {
    let salt = SaltString::encode_b64(&rand::random::<[u8; 16]>())
        .map_err(|e| anyhow::anyhow!("salt encoding failed: {}", e))?;
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("password hashing failed: {}", e))?;
    Ok(hash.to_string())
}

fn verify_password(password: &str, stored: &str) -> ApiResult<()> {
    let parsed = PasswordHash::new(stored)
        .map_err(|e| anyhow::anyhow!("stored password hash is corrupt: {}", e))?;
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .map_err(|_| invalid_credentials())
}

pub fn create_token(state: &AppStateInner, user_id: i64, username: &str) -> ApiResult<String> {
    let claims = Claims {
        sub: user_id,
        username: username.to_string(),
        exp: (chrono::Utc::now() + chrono::Duration::seconds(state.jwt_ttl_secs)).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(state.jwt_secret.as_bytes()),
    )
    .map_err(anyhow::Error::from)?;

    Ok(token)
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use super::{hash_password, verify_password};
    use crate::test_support::{TestApp, test_app};

    #[tokio::test]
    async fn test_register_then_login_by_username_or_email() {
        let app = test_app();

        let (status, body) = app
            .post_json(
                "/api/auth/register",
                None,
                json!({"username": "aiko", "email": "aiko@example.com", "password": "hunter22"}),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["user"]["username"], "aiko");
        assert!(body["user"].get("password").is_none());
        assert!(body["token"].as_str().is_some_and(|t| !t.is_empty()));

        let (status, body) = app
            .post_json(
                "/api/auth/login",
                None,
                json!({"username": "aiko", "password": "hunter22"}),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"]["email"], "aiko@example.com");

        let (status, _) = app
            .post_json(
                "/api/users/login",
                None,
                json!({"email": "aiko@example.com", "password": "hunter22"}),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_register_validation() {
        let app = test_app();

        let (status, body) = app
            .post_json("/api/auth/register", None, json!({"username": "aiko"}))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Username, email and password are required");

        app.register("aiko").await;
        let (status, body) = app
            .post_json(
                "/api/users/register",
                None,
                json!({"username": "aiko", "email": "other@example.com", "password": "pw"}),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Username or email already exists");
    }

    #[tokio::test]
    async fn test_seeded_teacher_is_promoted_on_register() {
        let app = test_app();
        let (_, komon_id) = app.register("komon").await;
        let (_, student_id) = app.register("student").await;
        assert!(app.state.db.is_teacher(komon_id).unwrap());
        assert!(!app.state.db.is_teacher(student_id).unwrap());
    }

    #[test]
    fn test_password_hash_round_trip() {
        let hash = hash_password("hunter22").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert_ne!(hash, hash_password("hunter22").unwrap());
        assert!(verify_password("hunter22", &hash).is_ok());
        assert!(verify_password("hunter23", &hash).is_err());
    }

    #[tokio::test]
    async fn test_login_rejects_bad_credentials() {
        let app = test_app();
        app.register("aiko").await;

        let (status, body) = app
            .post_json(
                "/api/auth/login",
                None,
                json!({"username": "aiko", "password": "wrong"}),
            )
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "Invalid credentials");

        let (status, _) = app
            .post_json(
                "/api/auth/login",
                None,
                json!({"username": "nobody", "password": "x"}),
            )
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_missing_and_invalid_tokens() {
        let app: TestApp = test_app();

        let (status, _) = app.get("/api/users/me", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = app.get("/api/users/me", Some("not-a-jwt")).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "Invalid token");
    }
}
