use chrono::{DateTime, Utc};
use rocket::serde::{Deserialize, Serialize};
use schemars::JsonSchema;
use uuid::Uuid;
use validator::{Validate, ValidationError};

#[derive(Serialize, Deserialize, Debug, Copy, Clone, Eq, PartialEq, Default, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Online,
    Idle,
    Dnd,
    #[default]
    Offline,
}

/// TOTP secret encrypted with AES-256-GCM, both parts base64 encoded.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EncryptedSecret {
    pub ciphertext: String,
    pub nonce: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserSession {
    pub id: String,
    pub user_agent: String,
    pub ip: String,
    pub last_active: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecuritySettings {
    pub login_notifications: bool,
    pub password_min_length: usize,
    pub password_require_uppercase: bool,
    pub password_require_numbers: bool,
    pub password_require_symbols: bool,
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            login_notifications: true,
            password_min_length: 8,
            password_require_uppercase: true,
            password_require_numbers: true,
            password_require_symbols: false,
        }
    }
}

impl SecuritySettings {
    /// Checks a new password against this account's password policy.
    pub fn check_password(&self, password: &str) -> Result<(), String> {
        if password.chars().count() < self.password_min_length {
            return Err(format!("Password must be at least {} characters long", self.password_min_length));
        }
        if self.password_require_uppercase && !password.chars().any(|c| c.is_ascii_uppercase()) {
            return Err("Password must contain at least one uppercase letter".to_string());
        }
        if self.password_require_numbers && !password.chars().any(|c| c.is_ascii_digit()) {
            return Err("Password must contain at least one number".to_string());
        }
        if self.password_require_symbols && password.chars().all(|c| c.is_alphanumeric()) {
            return Err("Password must contain at least one symbol".to_string());
        }
        Ok(())
    }
}

/// Full user record as persisted. Never serialized to clients; see [`UserResponse`].
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub image: Option<String>,
    pub status: UserStatus,
    pub email_verified: bool,
    pub verification_token_hash: Option<String>,
    pub verification_token_expires_at: Option<DateTime<Utc>>,
    pub reset_token_hash: Option<String>,
    pub reset_token_expires_at: Option<DateTime<Utc>>,
    pub two_factor_enabled: bool,
    pub two_factor_secret: Option<EncryptedSecret>,
    pub backup_code_hashes: Vec<String>,
    pub sessions: Vec<UserSession>,
    pub security_settings: SecuritySettings,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

crate::database::repository::versioned!(User);

impl User {
    pub fn has_session(&self, session_id: &str) -> bool {
        self.sessions.iter().any(|s| s.id == session_id)
    }
}

/// Sanitized view of the signed-in user.
#[derive(Serialize, Deserialize, Debug, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub image: Option<String>,
    pub status: UserStatus,
    pub email_verified: bool,
    pub two_factor_enabled: bool,
    pub security_settings: SecuritySettings,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&User> for UserResponse {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            name: user.name.clone(),
            email: user.email.clone(),
            image: user.image.clone(),
            status: user.status,
            email_verified: user.email_verified,
            two_factor_enabled: user.two_factor_enabled,
            security_settings: user.security_settings.clone(),
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

/// What other users get to see.
#[derive(Serialize, Deserialize, Debug, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: Uuid,
    pub name: String,
    pub image: Option<String>,
    pub status: UserStatus,
}

impl From<&User> for UserSummary {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            name: user.name.clone(),
            image: user.image.clone(),
            status: user.status,
        }
    }
}

pub fn validate_password_strength(password: &str) -> Result<(), ValidationError> {
    let has_upper = password.chars().any(|c| c.is_ascii_uppercase());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());

    if has_upper && has_digit {
        Ok(())
    } else {
        Err(ValidationError::new("password_strength").with_message("Password must contain at least one uppercase letter and one number".into()))
    }
}

#[derive(Deserialize, Debug, Validate, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SignupRequest {
    #[validate(length(min = 1, max = 100, message = "Name is required"))]
    pub name: String,
    #[validate(email(message = "Please enter a valid email address"))]
    pub email: String,
    #[validate(length(min = 8, message = "Password must be at least 8 characters long"))]
    #[validate(custom(function = "validate_password_strength"))]
    pub password: String,
    #[validate(must_match(other = "password", message = "Passwords do not match"))]
    pub confirm_password: String,
}

#[derive(Deserialize, Debug, Validate, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfileRequest {
    #[validate(length(min = 1, max = 100, message = "Name is required"))]
    pub name: Option<String>,
    #[validate(url(message = "Image must be a valid URL"))]
    pub image: Option<String>,
}

#[derive(Deserialize, Debug, Validate, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    #[validate(length(min = 1, message = "Current password is required"))]
    pub current_password: String,
    #[validate(length(min = 8, message = "Password must be at least 8 characters long"))]
    pub new_password: String,
    #[validate(must_match(other = "new_password", message = "Passwords do not match"))]
    pub confirm_password: String,
}

#[derive(Deserialize, Debug, Validate, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecuritySettingsRequest {
    pub login_notifications: Option<bool>,
    #[validate(range(min = 8, max = 128, message = "Minimum password length must be between 8 and 128"))]
    pub password_min_length: Option<usize>,
    pub password_require_uppercase: Option<bool>,
    pub password_require_numbers: Option<bool>,
    pub password_require_symbols: Option<bool>,
}

impl SecuritySettingsRequest {
    pub fn apply(&self, settings: &mut SecuritySettings) {
        if let Some(v) = self.login_notifications {
            settings.login_notifications = v;
        }
        if let Some(v) = self.password_min_length {
            settings.password_min_length = v;
        }
        if let Some(v) = self.password_require_uppercase {
            settings.password_require_uppercase = v;
        }
        if let Some(v) = self.password_require_numbers {
            settings.password_require_numbers = v;
        }
        if let Some(v) = self.password_require_symbols {
            settings.password_require_symbols = v;
        }
    }
}

#[derive(Deserialize, Debug, JsonSchema)]
pub struct StatusRequest {
    pub status: UserStatus,
}
