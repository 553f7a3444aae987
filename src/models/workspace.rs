use chrono::{DateTime, Utc};
use rocket::serde::{Deserialize, Serialize};
use schemars::JsonSchema;
use uuid::Uuid;
use validator::Validate;

#[derive(Serialize, Deserialize, Debug, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Workspace {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub owner_id: Uuid,
    pub members: Vec<Uuid>,
    pub image: Option<String>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

crate::database::repository::versioned!(Workspace);

impl Workspace {
    pub fn is_member(&self, user_id: &Uuid) -> bool {
        self.members.contains(user_id)
    }

    pub fn is_owner(&self, user_id: &Uuid) -> bool {
        self.owner_id == *user_id
    }
}

/// Initial-letter placeholder used until a workspace gets a real image.
pub fn placeholder_image(name: &str) -> String {
    let initial: String = name.chars().next().map(|c| c.to_uppercase().collect()).unwrap_or_default();
    format!("/placeholder.svg?height=200&width=200&text={}", urlencoding::encode(&initial))
}

#[derive(Deserialize, Debug, Validate, JsonSchema)]
pub struct WorkspaceRequest {
    #[validate(length(min = 1, max = 100, message = "Workspace name is required"))]
    pub name: String,
    #[validate(length(max = 500, message = "Description must be at most 500 characters"))]
    pub description: Option<String>,
}

#[derive(Deserialize, Debug, Validate, JsonSchema)]
pub struct InviteRequest {
    #[validate(email(message = "Please enter a valid email address"))]
    pub email: String,
}
