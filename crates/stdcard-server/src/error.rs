use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use lm_client::LmError;
use serde_json::json;
use tracing::{error, warn};

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    ServiceUnavailable(String),

    #[error("{0}")]
    GatewayTimeout(String),

    /// The model answered, but not with something usable.
    #[error("{0}")]
    Upstream(String),

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl From<LmError> for ApiError {
    fn from(err: LmError) -> Self {
        match err {
            LmError::Connect(_) => Self::ServiceUnavailable(
                "LM Studioサーバーに接続できません。LM Studioが実行中であることを確認してください。".into(),
            ),
            LmError::Timeout => Self::GatewayTimeout("LM Studioサーバーからの応答がタイムアウトしました。".into()),
            LmError::Status { .. } | LmError::MissingContent => {
                Self::Upstream(format!("LM Studio APIリクエストエラー: {err}"))
            }
            LmError::Decode(_) => Self::Upstream(format!("LLMからの応答をJSONとして解析できませんでした: {err}")),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::GatewayTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Upstream(msg) => {
                warn!("LLM error: {}", msg);
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::Internal(e) => {
                error!("Internal error: {:#}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
