use chrono::{DateTime, Utc};
use rocket::serde::{Deserialize, Serialize};
use schemars::JsonSchema;
use uuid::Uuid;

pub const DEFAULT_NOTIFICATION_LIMIT: usize = 50;
pub const MAX_NOTIFICATION_LIMIT: usize = 200;

#[derive(Serialize, Deserialize, Debug, Copy, Clone, Eq, PartialEq, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    FriendRequest,
    Message,
    Mention,
    Reaction,
    DocumentShare,
    WorkspaceInvite,
}

#[derive(Serialize, Deserialize, Debug, Copy, Clone, Eq, PartialEq, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Friendship,
    Message,
    Document,
    Workspace,
}

#[derive(Serialize, Deserialize, Debug, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub title: String,
    pub message: String,
    pub source_id: Option<Uuid>,
    pub source_type: Option<SourceType>,
    pub read: bool,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

crate::database::repository::versioned!(Notification);

/// Everything needed to create a notification; the store fills in the rest.
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub user_id: Uuid,
    pub notification_type: NotificationType,
    pub title: String,
    pub message: String,
    pub source_id: Option<Uuid>,
    pub source_type: Option<SourceType>,
}

#[derive(Serialize, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UnreadCount {
    pub count: usize,
}

#[derive(Serialize, Debug, JsonSchema)]
pub struct MarkedReadResponse {
    pub success: bool,
    pub updated: usize,
}

pub fn notification_limit(requested: Option<usize>) -> usize {
    requested.unwrap_or(DEFAULT_NOTIFICATION_LIMIT).clamp(1, MAX_NOTIFICATION_LIMIT)
}
