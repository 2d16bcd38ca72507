use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::permissions::Permissions;

pub type Timestamp = DateTime<Utc>;

// -- Users --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub avatar_url: Option<String>,
    pub bio: Option<String>,
    pub status: String,
    pub is_teacher: bool,
    pub last_seen: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnlineUser {
    pub id: i64,
    pub username: String,
    pub is_teacher: bool,
    pub status: String,
    pub last_seen: Option<Timestamp>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserStatus {
    pub id: i64,
    pub username: String,
    pub status: String,
    pub last_seen: Option<Timestamp>,
}

/// Club-wide role (teacher-managed), distinct from per-server roles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    pub id: i64,
    pub name: String,
    pub created_at: Timestamp,
}

// -- Servers --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub icon_url: Option<String>,
    pub owner_id: i64,
    pub invite_code: String,
    pub server_type: String,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub member_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub joined_at: Option<Timestamp>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Member {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub avatar_url: Option<String>,
    pub status: String,
    pub is_teacher: bool,
    pub last_seen: Option<Timestamp>,
    pub joined_at: Timestamp,
    pub is_owner: bool,
    pub roles: Vec<String>,
    pub role_colors: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerRole {
    pub id: i64,
    pub server_id: i64,
    pub name: String,
    pub color: String,
    pub permissions: Permissions,
    pub position: i64,
    pub created_at: Timestamp,
}

// -- Channels --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub id: i64,
    pub server_id: i64,
    pub category_id: Option<i64>,
    pub name: String,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub channel_type: String,
    pub position: i64,
    pub created_at: Timestamp,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    pub id: i64,
    pub server_id: i64,
    pub name: String,
    pub position: i64,
    pub channels: Vec<Channel>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelList {
    pub categories: Vec<Category>,
    pub uncategorized_channels: Vec<Channel>,
}

// -- Messages --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyPreview {
    pub id: i64,
    pub content: Option<String>,
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactionGroup {
    pub emoji: String,
    pub count: usize,
    pub user_ids: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub channel_id: i64,
    pub server_id: i64,
    pub user_id: i64,
    pub username: String,
    pub avatar_url: Option<String>,
    pub content: Option<String>,
    pub attachments: Vec<Value>,
    pub reply_to: Option<i64>,
    pub reply_message: Option<ReplyPreview>,
    pub edited: bool,
    pub created_at: Timestamp,
    pub updated_at: Option<Timestamp>,
    #[serde(default)]
    pub reactions: Vec<ReactionGroup>,
}

// -- Club management --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub server_id: Option<i64>,
    pub title: String,
    pub description: Option<String>,
    pub status: String,
    pub priority: String,
    pub completed: bool,
    pub assignee_id: Option<i64>,
    pub assignee_name: Option<String>,
    pub user_id: i64,
    pub creator_name: Option<String>,
    pub due_date: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: i64,
    pub server_id: Option<i64>,
    pub name: String,
    pub description: Option<String>,
    pub start_time: Timestamp,
    pub end_time: Option<Timestamp>,
    pub location: Option<String>,
    pub max_participants: Option<i64>,
    pub organizer_id: Option<i64>,
    pub organizer_name: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetType {
    Income,
    Expense,
}

impl BudgetType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Income => "income",
            Self::Expense => "expense",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "income" => Some(Self::Income),
            "expense" => Some(Self::Expense),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Budget {
    pub id: i64,
    pub server_id: Option<i64>,
    pub name: String,
    pub description: Option<String>,
    pub amount: i64,
    #[serde(rename = "type")]
    pub budget_type: BudgetType,
    pub category: String,
    pub date: String,
    pub approved_by: Option<i64>,
    pub approved_by_name: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Equipment {
    pub id: i64,
    pub server_id: Option<i64>,
    pub name: String,
    pub description: Option<String>,
    pub quantity: i64,
    pub location: Option<String>,
    pub condition: String,
    pub responsible_user_id: Option<i64>,
    pub responsible_user_name: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WikiPage {
    pub id: i64,
    pub server_id: Option<i64>,
    pub slug: String,
    pub title: String,
    pub content: String,
    pub tags: Vec<String>,
    pub author_id: Option<i64>,
    pub author_name: Option<String>,
    pub last_editor_id: Option<i64>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostType {
    Diary,
    Album,
}

impl PostType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Diary => "diary",
            Self::Album => "album",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "diary" => Some(Self::Diary),
            "album" => Some(Self::Album),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: i64,
    pub server_id: Option<i64>,
    pub title: String,
    pub content: String,
    #[serde(rename = "type")]
    pub post_type: PostType,
    pub tags: Vec<String>,
    pub author_id: i64,
    pub author_name: Option<String>,
    pub author_avatar: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Whiteboard {
    pub id: i64,
    pub server_id: Option<i64>,
    pub name: String,
    pub data: Value,
    pub owner_id: i64,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stamp {
    pub id: i64,
    pub server_id: Option<i64>,
    pub name: String,
    pub image_url: String,
    pub owner_id: i64,
    pub created_at: Timestamp,
}

// -- Dashboard --

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub total_tasks: i64,
    pub completed_tasks: i64,
    pub upcoming_events: i64,
    pub total_members: i64,
    pub active_budget: i64,
    pub monthly_expenses: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityUser {
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activity {
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
    pub timestamp: Timestamp,
    pub user_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<ActivityUser>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskProgress {
    pub name: String,
    pub completed: i64,
    pub total: i64,
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetChartPoint {
    pub month: String,
    pub budget: i64,
    pub spent: i64,
}
