use chrono::{DateTime, Utc};
use rocket::serde::{Deserialize, Serialize};
use schemars::JsonSchema;
use uuid::Uuid;
use validator::Validate;

#[derive(Serialize, Deserialize, Debug, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: Uuid,
    pub title: String,
    pub content: String,
    pub channel_id: Option<Uuid>,
    pub workspace_id: Uuid,
    pub created_by: Uuid,
    pub collaborators: Vec<Uuid>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

crate::database::repository::versioned!(Document);

impl Document {
    pub fn is_collaborator(&self, user_id: &Uuid) -> bool {
        self.collaborators.contains(user_id)
    }
}

#[derive(Deserialize, Debug, Validate, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DocumentRequest {
    #[validate(length(min = 1, max = 200, message = "Document title is required"))]
    pub title: String,
    #[serde(default)]
    pub content: String,
    pub channel_id: Option<Uuid>,
}

#[derive(Deserialize, Debug, Validate, JsonSchema)]
pub struct DocumentUpdateRequest {
    #[validate(length(min = 1, max = 200, message = "Document title is required"))]
    pub title: String,
    pub content: Option<String>,
}

#[derive(Deserialize, Debug, Validate, JsonSchema)]
pub struct CollaboratorRequest {
    #[validate(email(message = "Please enter a valid email address"))]
    pub email: String,
}
