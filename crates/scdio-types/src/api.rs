use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{Server, User};
use crate::permissions::Permissions;

// -- JWT Claims --

/// Shared by the REST middleware and the gateway `Authenticate` handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i64,
    pub username: String,
    pub exp: usize,
}

// -- Auth --

/// Fields are optional so a missing one can be answered with a 400 message
/// instead of a generic extractor rejection.
#[derive(Debug, Default, Deserialize)]
pub struct RegisterRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LoginRequest {
    /// Username or email.
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: User,
}

// -- Users --

#[derive(Debug, Default, Deserialize)]
pub struct UpdateProfileRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    pub bio: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RoleRequest {
    pub name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AssignRoleRequest {
    #[serde(alias = "roleId")]
    pub role_id: Option<i64>,
}

// -- Servers --

#[derive(Debug, Default, Deserialize)]
pub struct CreateServerRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub server_type: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateServerRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub server_type: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct JoinServerRequest {
    pub invite_code: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JoinServerResponse {
    pub message: String,
    pub server: Server,
}

#[derive(Debug, Default, Deserialize)]
pub struct ServerRoleRequest {
    pub name: Option<String>,
    pub color: Option<String>,
    pub permissions: Option<u32>,
}

impl ServerRoleRequest {
    pub fn permissions(&self) -> Option<Permissions> {
        self.permissions.map(Permissions::from_bits_truncate)
    }
}

// -- Channels --

#[derive(Debug, Default, Deserialize)]
pub struct CreateChannelRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    #[serde(rename = "type", alias = "channel_type")]
    pub channel_type: Option<String>,
    pub category_id: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateCategoryRequest {
    pub name: Option<String>,
}

// -- Messages --

#[derive(Debug, Default, Deserialize)]
pub struct MessageQuery {
    pub limit: Option<u32>,
    /// Cursor: `created_at` of the oldest message of the previous page.
    pub before: Option<String>,
    /// Tie-breaker for `before`: `id` of that same message.
    pub before_id: Option<i64>,
    pub offset: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SendMessageRequest {
    #[serde(default)]
    pub channel_id: Option<i64>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub attachments: Option<Vec<Value>>,
    #[serde(default, alias = "parent_id")]
    pub reply_to: Option<i64>,
}

impl SendMessageRequest {
    /// Trimmed content, `None` when blank.
    pub fn content(&self) -> Option<&str> {
        self.content.as_deref().map(str::trim).filter(|c| !c.is_empty())
    }

    pub fn has_attachments(&self) -> bool {
        self.attachments.as_ref().is_some_and(|a| !a.is_empty())
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct EditMessageRequest {
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ToggleReactionRequest {
    pub emoji: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ToggleReactionResponse {
    pub added: bool,
}

// -- Club resources --

#[derive(Debug, Default, Deserialize)]
pub struct ScopeQuery {
    pub server_id: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TaskQuery {
    pub user_id: Option<i64>,
    pub server_id: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateTaskRequest {
    pub server_id: Option<i64>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
    #[serde(alias = "user_id")]
    pub assignee_id: Option<i64>,
    pub due_date: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateTaskRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
    #[serde(alias = "user_id")]
    pub assignee_id: Option<i64>,
    pub due_date: Option<String>,
    pub completed: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct EventRequest {
    pub server_id: Option<i64>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub location: Option<String>,
    pub max_participants: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct BudgetRequest {
    pub server_id: Option<i64>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub amount: Option<i64>,
    #[serde(rename = "type")]
    pub budget_type: Option<String>,
    pub category: Option<String>,
    pub date: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct EquipmentRequest {
    pub server_id: Option<i64>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub quantity: Option<i64>,
    pub location: Option<String>,
    pub condition: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateWikiRequest {
    pub server_id: Option<i64>,
    pub slug: Option<String>,
    pub title: Option<String>,
    pub content: Option<String>,
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateWikiRequest {
    pub title: Option<String>,
    pub content: Option<String>,
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PostQuery {
    #[serde(rename = "type")]
    pub post_type: Option<String>,
    pub server_id: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PostRequest {
    pub server_id: Option<i64>,
    pub title: Option<String>,
    pub content: Option<String>,
    #[serde(rename = "type")]
    pub post_type: Option<String>,
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WhiteboardRequest {
    pub server_id: Option<i64>,
    pub name: Option<String>,
    pub data: Option<Value>,
}

// -- Misc --

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageBody {
    pub message: String,
}

impl MessageBody {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// `Some(trimmed)` when the field is present and non-blank.
pub fn required(field: &Option<String>) -> Option<&str> {
    field.as_deref().map(str::trim).filter(|s| !s.is_empty())
}
