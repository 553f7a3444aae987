use chrono::{DateTime, Utc};
use regex::Regex;
use rocket::serde::{Deserialize, Serialize};
use schemars::JsonSchema;
use std::collections::BTreeMap;
use std::sync::LazyLock;
use uuid::Uuid;
use validator::Validate;

pub const DEFAULT_MESSAGE_LIMIT: usize = 50;
pub const MAX_MESSAGE_LIMIT: usize = 100;

static MENTION: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"@([0-9a-fA-F-]{36})").expect("valid mention pattern"));

#[derive(Serialize, Deserialize, Debug, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub content: String,
    /// Channel id, or the conversation id for direct messages.
    pub channel_id: Uuid,
    pub user_id: Uuid,
    /// Set only on direct messages.
    pub recipient_id: Option<Uuid>,
    pub reply_to_id: Option<Uuid>,
    pub attachments: Vec<String>,
    /// Emoji to the users who reacted with it.
    pub reactions: BTreeMap<String, Vec<Uuid>>,
    pub is_pinned: bool,
    pub edited: bool,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

crate::database::repository::versioned!(Message);

impl Message {
    pub fn add_reaction(&mut self, emoji: &str, user_id: Uuid) {
        let users = self.reactions.entry(emoji.to_string()).or_default();
        if !users.contains(&user_id) {
            users.push(user_id);
        }
    }

    pub fn remove_reaction(&mut self, emoji: &str, user_id: Uuid) {
        if let Some(users) = self.reactions.get_mut(emoji) {
            users.retain(|id| *id != user_id);
            if users.is_empty() {
                self.reactions.remove(emoji);
            }
        }
    }
}

/// User ids mentioned as `@<uuid>` in a message body, deduplicated, in order of appearance.
pub fn extract_mentions(content: &str) -> Vec<Uuid> {
    let mut mentioned = Vec::new();
    for capture in MENTION.captures_iter(content) {
        if let Ok(id) = Uuid::parse_str(&capture[1])
            && !mentioned.contains(&id)
        {
            mentioned.push(id);
        }
    }
    mentioned
}

pub fn message_limit(requested: Option<usize>) -> usize {
    requested.unwrap_or(DEFAULT_MESSAGE_LIMIT).clamp(1, MAX_MESSAGE_LIMIT)
}

#[derive(Deserialize, Debug, Validate, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MessageRequest {
    #[validate(length(min = 1, max = 4000, message = "Message content is required"))]
    pub content: String,
    pub reply_to_id: Option<Uuid>,
    #[serde(default)]
    pub attachments: Vec<String>,
}

#[derive(Deserialize, Debug, Validate, JsonSchema)]
pub struct EditMessageRequest {
    #[validate(length(min = 1, max = 4000, message = "Message content is required"))]
    pub content: String,
}

#[derive(Deserialize, Debug, Validate, JsonSchema)]
pub struct ReactionRequest {
    #[validate(length(min = 1, max = 32, message = "Emoji is required"))]
    pub emoji: String,
}
