//! Client for OpenAI-compatible `chat/completions` endpoints such as a
//! local LM Studio server.

mod extract;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub use extract::extract_json;

pub const DEFAULT_API_URL: &str = "http://localhost:1234/v1/chat/completions";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, thiserror::Error)]
pub enum LmError {
    #[error("could not reach the language model server: {0}")]
    Connect(String),

    #[error("the language model server timed out")]
    Timeout,

    #[error("the language model server returned {code}: {body}")]
    Status { code: u16, body: String },

    #[error("could not decode the language model reply: {0}")]
    Decode(String),

    #[error("the language model reply had no content")]
    MissingContent,
}

impl From<reqwest::Error> for LmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() || err.is_body() {
            Self::Decode(err.to_string())
        } else {
            Self::Connect(err.to_string())
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LmConfig {
    pub api_url: String,
    pub model: Option<String>,
    pub timeout: Duration,
}

impl Default for LmConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            model: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl LmConfig {
    /// Reads `LM_API_URL`, `LM_MODEL` and `LM_TIMEOUT_SECS` through `lookup`.
    /// A malformed timeout is reported and replaced by the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut config = Self::default();
        if let Some(url) = get("LM_API_URL") {
            config.api_url = url;
        }
        config.model = get("LM_MODEL");
        if let Some(secs) = get("LM_TIMEOUT_SECS") {
            match secs.parse::<u64>() {
                Ok(secs) if secs > 0 => config.timeout = Duration::from_secs(secs),
                _ => warn!("Ignoring invalid LM_TIMEOUT_SECS: {}", secs),
            }
        }
        config
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LmClient {
    http: reqwest::Client,
    config: LmConfig,
}

impl LmClient {
    pub fn new(config: LmConfig) -> reqwest::Result<Self> {
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &LmConfig {
        &self.config
    }

    /// Sends one non-streaming completion request and returns the content
    /// of the first choice.
    pub async fn chat(&self, messages: &[ChatMessage], temperature: f32, max_tokens: u32) -> Result<String, LmError> {
        let request = ChatRequest {
            model: self.config.model.as_deref(),
            messages,
            temperature,
            max_tokens,
            stream: false,
        };

        debug!("LLM request to {} ({} messages)", self.config.api_url, messages.len());
        let resp = self.http.post(&self.config.api_url).json(&request).send().await?;

        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(LmError::Status {
                code: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse = serde_json::from_str(&body).map_err(|e| LmError::Decode(e.to_string()))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message)
            .and_then(|message| message.content)
            .ok_or(LmError::MissingContent)
    }
}
