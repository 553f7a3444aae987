use chrono::{DateTime, Utc};
use rocket::serde::{Deserialize, Serialize};
use schemars::JsonSchema;
use uuid::Uuid;
use validator::Validate;

#[derive(Serialize, Deserialize, Debug, Copy, Clone, Eq, PartialEq, Default, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    #[default]
    Text,
    Voice,
    Document,
}

#[derive(Serialize, Deserialize, Debug, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub workspace_id: Uuid,
    #[serde(rename = "type")]
    pub channel_type: ChannelType,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

crate::database::repository::versioned!(Channel);

#[derive(Deserialize, Debug, Validate, JsonSchema)]
pub struct ChannelRequest {
    #[validate(length(min = 1, max = 100, message = "Channel name is required"))]
    pub name: String,
    #[validate(length(max = 500, message = "Description must be at most 500 characters"))]
    pub description: Option<String>,
    #[serde(rename = "type", default)]
    pub channel_type: ChannelType,
}

#[derive(Deserialize, Debug, Validate, JsonSchema)]
pub struct ChannelUpdateRequest {
    #[validate(length(min = 1, max = 100, message = "Channel name is required"))]
    pub name: String,
    #[validate(length(max = 500, message = "Description must be at most 500 characters"))]
    pub description: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_type_defaults_to_text() {
        let request: ChannelRequest = serde_json::from_str(r#"{"name":"general"}"#).unwrap();
        assert_eq!(request.channel_type, ChannelType::Text);

        let voice: ChannelRequest = serde_json::from_str(r#"{"name":"standup","type":"voice"}"#).unwrap();
        assert_eq!(voice.channel_type, ChannelType::Voice);
    }
}
