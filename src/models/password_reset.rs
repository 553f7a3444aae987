use rocket::serde::{Deserialize, Serialize};
use schemars::JsonSchema;
use validator::Validate;

pub const RESET_REQUESTED_MESSAGE: &str = "If your email address exists in our system, you will receive a password reset link shortly.";

#[derive(Debug, Deserialize, Validate, JsonSchema)]
pub struct PasswordResetRequest {
    #[validate(email(message = "Please enter a valid email address"))]
    pub email: String,
}

#[derive(Debug, Deserialize, Validate, JsonSchema)]
pub struct TokenRequest {
    #[validate(length(equal = 64, message = "Invalid or expired token"))]
    pub token: String,
}

#[derive(Debug, Deserialize, Validate, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PasswordResetConfirmRequest {
    #[validate(length(equal = 64, message = "Invalid or expired token"))]
    pub token: String,
    #[validate(length(min = 8, message = "Password must be at least 8 characters long"))]
    #[validate(custom(function = "crate::models::user::validate_password_strength"))]
    pub password: String,
    #[validate(must_match(other = "password", message = "Passwords do not match"))]
    pub confirm_password: String,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct TokenValidationResponse {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[derive(Debug, Deserialize, Validate, JsonSchema)]
pub struct ResendVerificationRequest {
    #[validate(email(message = "Please enter a valid email address"))]
    pub email: String,
}
