use chrono::{DateTime, Utc};
use rocket::serde::{Deserialize, Serialize};
use schemars::JsonSchema;
use validator::Validate;

/// Returned once when setup starts. The secret is not active until verified.
#[derive(Debug, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TwoFactorSetupResponse {
    /// Base32 secret for manual entry
    pub secret: String,
    /// `otpauth://` provisioning URI
    pub otpauth_url: String,
    /// SVG QR code as a data URL
    pub qr_code: String,
}

#[derive(Debug, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BackupCodesResponse {
    pub success: bool,
    /// Shown exactly once; only digests are kept
    pub backup_codes: Vec<String>,
}

#[derive(Debug, Deserialize, Validate, JsonSchema)]
pub struct TwoFactorVerifyRequest {
    #[validate(length(min = 6, max = 32, message = "Verification code is required"))]
    pub code: String,
}

#[derive(Debug, Deserialize, Validate, JsonSchema)]
pub struct TwoFactorDisableRequest {
    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

#[derive(Debug, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TwoFactorStatus {
    pub enabled: bool,
    pub pending_setup: bool,
    pub backup_codes_remaining: usize,
}

/// Failed second-factor attempts for one user.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct TwoFactorAttempts {
    pub failed_attempts: u32,
    pub locked_until: Option<DateTime<Utc>>,
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

crate::database::repository::versioned!(TwoFactorAttempts);

impl TwoFactorAttempts {
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.is_some_and(|until| until > now)
    }
}
