use crate::models::user::UserSession;
use chrono::{DateTime, Utc};
use rocket::serde::Serialize;
use schemars::JsonSchema;

/// A session as listed on the security page. `current` marks the session making the request.
#[derive(Serialize, Debug, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub id: String,
    pub user_agent: String,
    pub ip: String,
    pub last_active: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub current: bool,
}

#[derive(Serialize, Debug, JsonSchema)]
pub struct RevokedSessionsResponse {
    pub success: bool,
    pub revoked: usize,
}

impl SessionResponse {
    pub fn from_session(session: &UserSession, current_session_id: &str) -> Self {
        Self {
            id: session.id.clone(),
            user_agent: session.user_agent.clone(),
            ip: session.ip.clone(),
            last_active: session.last_active,
            created_at: session.created_at,
            current: session.id == current_session_id,
        }
    }
}
