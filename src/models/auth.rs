use crate::models::user::UserResponse;
use rocket::serde::{Deserialize, Serialize};
use schemars::JsonSchema;
use uuid::Uuid;
use validator::Validate;

#[derive(Deserialize, Debug, Validate, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PasswordLoginRequest {
    #[validate(email(message = "Please enter a valid email address"))]
    pub email: String,
    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

#[derive(Deserialize, Debug, Validate, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TwoFactorLoginRequest {
    pub user_id: Uuid,
    #[validate(length(min = 6, max = 32, message = "Verification code is required"))]
    pub two_factor_code: String,
}

/// Both login steps share one endpoint; the second step carries the user id handed out by the first.
#[derive(Deserialize, Debug, JsonSchema)]
#[serde(untagged)]
pub enum LoginRequest {
    TwoFactor(TwoFactorLoginRequest),
    Password(PasswordLoginRequest),
}

/// Result shape shared by the credential endpoints.
#[derive(Serialize, Deserialize, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<UserResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requires_two_factor: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl AuthResponse {
    pub fn signed_in(user: UserResponse) -> Self {
        Self {
            success: true,
            user: Some(user),
            ..Default::default()
        }
    }

    pub fn two_factor_required(user_id: Uuid) -> Self {
        Self {
            success: false,
            requires_two_factor: Some(true),
            user_id: Some(user_id),
            error: Some("Two-factor authentication required".to_string()),
            ..Default::default()
        }
    }

    pub fn message(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            ..Default::default()
        }
    }
}

/// Plain acknowledgement for mutations with nothing else to return.
#[derive(Serialize, Deserialize, Debug, JsonSchema)]
pub struct SuccessResponse {
    pub success: bool,
}

impl SuccessResponse {
    pub fn ok() -> Self {
        Self { success: true }
    }
}
