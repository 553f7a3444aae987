use chrono::{DateTime, Utc};
use rocket::serde::{Deserialize, Serialize};
use schemars::JsonSchema;
use uuid::Uuid;

pub const MAX_STORED_ACTIVITIES: usize = 100;
pub const DEFAULT_ACTIVITY_LIMIT: usize = 20;

#[derive(Serialize, Deserialize, Debug, Copy, Clone, Eq, PartialEq, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ActivityAction {
    UserRegistered,
    EmailVerified,
    LoginSuccess,
    LoginFailed,
    TwoFactorFailed,
    Logout,
    PasswordChanged,
    PasswordReset,
    PasswordResetRequested,
    TwoFactorEnabled,
    TwoFactorDisabled,
    BackupCodesRegenerated,
    SessionRevoked,
    SecuritySettingsUpdated,
}

#[derive(Serialize, Deserialize, Debug, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub id: Uuid,
    pub user_id: Uuid,
    pub action: ActivityAction,
    pub details: serde_json::Value,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Clamps a requested page size to what the log actually keeps.
pub fn activity_limit(requested: Option<usize>) -> usize {
    requested.unwrap_or(DEFAULT_ACTIVITY_LIMIT).clamp(1, MAX_STORED_ACTIVITIES)
}
