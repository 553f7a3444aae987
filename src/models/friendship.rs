use crate::models::user::UserSummary;
use chrono::{DateTime, Utc};
use rocket::serde::{Deserialize, Serialize};
use schemars::JsonSchema;
use uuid::Uuid;
use validator::Validate;

#[derive(Serialize, Deserialize, Debug, Copy, Clone, Eq, PartialEq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum FriendshipStatus {
    Pending,
    Accepted,
    Rejected,
    Blocked,
}

/// Relationship between two users. `user_id` is whoever acted last in a way that
/// gives the record a direction: the requester, or the blocker once blocked.
#[derive(Serialize, Deserialize, Debug, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Friendship {
    pub id: Uuid,
    pub user_id: Uuid,
    pub friend_id: Uuid,
    pub status: FriendshipStatus,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

crate::database::repository::versioned!(Friendship);

impl Friendship {
    /// The participant that is not `user_id`.
    pub fn other(&self, user_id: &Uuid) -> Uuid {
        if self.user_id == *user_id { self.friend_id } else { self.user_id }
    }
}

#[derive(Deserialize, Debug, Validate, JsonSchema)]
pub struct FriendRequest {
    #[validate(email(message = "Please enter a valid email address"))]
    pub email: String,
}

/// A friendship together with the other participant's public profile.
#[derive(Serialize, Debug, JsonSchema)]
pub struct FriendEntry {
    pub friendship: Friendship,
    pub user: UserSummary,
}
