use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::SendMessageRequest;
use crate::models::{Message, UserStatus};

/// Broadcast scope for a gateway event. Every authenticated connection is in
/// `Global`; the rest must be joined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Room {
    Global,
    Server(i64),
    Channel(i64),
    Dashboard,
}

/// Events sent FROM server TO client over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum GatewayEvent {
    Authenticated { user_id: i64, username: String },

    AuthenticationError { error: String },

    Error { error: String },

    NewMessage(Message),

    MessageUpdated(Message),

    MessageDeleted { id: i64, channel_id: i64 },

    ReactionAdded {
        message_id: i64,
        channel_id: i64,
        user_id: i64,
        username: String,
        emoji: String,
    },

    ReactionRemoved {
        message_id: i64,
        channel_id: i64,
        user_id: i64,
        emoji: String,
    },

    UserTyping {
        channel_id: i64,
        user_id: i64,
        username: String,
        is_typing: bool,
    },

    /// `status` is `online` or `offline`.
    UserPresence {
        user_id: i64,
        username: String,
        status: String,
    },

    UserStatusChange(UserStatus),

    WhiteboardUpdate(Value),

    /// Something shown on the dashboard changed (`task`, `event`, `budget`, ...).
    DashboardUpdate { kind: String },
}

impl GatewayEvent {
    pub fn error(msg: impl Into<String>) -> Self {
        Self::Error { error: msg.into() }
    }
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum GatewayCommand {
    Authenticate { token: String },

    JoinChannel { channel_id: i64 },

    LeaveChannel { channel_id: i64 },

    SendMessage(SendMessageRequest),

    EditMessage { id: i64, content: String },

    DeleteMessage { id: i64 },

    React { message_id: i64, emoji: String },

    TypingStart { channel_id: i64 },

    TypingStop { channel_id: i64 },

    /// Relayed as-is to every other client.
    WhiteboardUpdate(Value),

    DashboardSubscribe,
}
