use crate::database::repository::Repository;
use crate::database::user::user_key;
use crate::error::app_error::AppError;
use crate::models::two_factor::{TwoFactorAttempts, TwoFactorSetupResponse, TwoFactorStatus};
use crate::models::user::{EncryptedSecret, User};
use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use base64::{Engine as _, engine::general_purpose};
use chrono::{Duration, Utc};
use data_encoding::BASE32_NOPAD;
use qrcode::QrCode;
use rand::RngCore;
use sha2::{Digest, Sha256};
use totp_rs::{Algorithm, Secret, TOTP};
use uuid::Uuid;

const TOTP_DIGITS: usize = 6;
const TOTP_STEP: u64 = 30;
const TOTP_SKEW: u8 = 1;
const BACKUP_CODE_LENGTH: usize = 16;
const BACKUP_CODE_COUNT: usize = 10;

/// Key material and labels used for TOTP enrollment.
pub struct TotpKeys<'a> {
    pub encryption_key: &'a [u8; 32],
    pub issuer: &'a str,
}

fn attempts_key(user_id: &Uuid) -> String {
    format!("two_factor:attempts:{}", user_id)
}

/// 20 random bytes, RFC 4648 base32 without padding.
pub fn generate_totp_secret() -> String {
    let mut secret_bytes = [0u8; 20];
    rand::thread_rng().fill_bytes(&mut secret_bytes);
    BASE32_NOPAD.encode(&secret_bytes)
}

pub fn encrypt_secret(secret: &str, key: &[u8; 32]) -> Result<EncryptedSecret, AppError> {
    let cipher = Aes256Gcm::new(key.into());
    let mut nonce_bytes = [0u8; 12];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, secret.as_bytes())
        .map_err(|e| AppError::crypto(format!("Encryption failed: {}", e)))?;

    Ok(EncryptedSecret {
        ciphertext: general_purpose::STANDARD.encode(&ciphertext),
        nonce: general_purpose::STANDARD.encode(nonce_bytes),
    })
}

pub fn decrypt_secret(encrypted: &EncryptedSecret, key: &[u8; 32]) -> Result<String, AppError> {
    let cipher = Aes256Gcm::new(key.into());

    let ciphertext = general_purpose::STANDARD
        .decode(&encrypted.ciphertext)
        .map_err(|e| AppError::crypto(format!("Failed to decode encrypted secret: {}", e)))?;
    let nonce_bytes = general_purpose::STANDARD
        .decode(&encrypted.nonce)
        .map_err(|e| AppError::crypto(format!("Failed to decode nonce: {}", e)))?;
    if nonce_bytes.len() != 12 {
        return Err(AppError::crypto("Stored nonce has the wrong length"));
    }
    let nonce = Nonce::from_slice(&nonce_bytes);

    let plaintext = cipher
        .decrypt(nonce, ciphertext.as_ref())
        .map_err(|e| AppError::crypto(format!("Decryption failed: {}", e)))?;

    String::from_utf8(plaintext).map_err(|e| AppError::crypto(format!("Invalid UTF-8 in decrypted secret: {}", e)))
}

pub fn provisioning_uri(secret: &str, issuer: &str, account_name: &str) -> String {
    format!(
        "otpauth://totp/{}:{}?secret={}&issuer={}&algorithm=SHA1&digits={}&period={}",
        urlencoding::encode(issuer),
        urlencoding::encode(account_name),
        secret,
        urlencoding::encode(issuer),
        TOTP_DIGITS,
        TOTP_STEP
    )
}

/// Renders the provisioning URI as an SVG QR code data URL.
pub fn generate_qr_code(uri: &str) -> Result<String, AppError> {
    let qr = QrCode::new(uri).map_err(|e| AppError::internal(format!("Failed to generate QR code: {}", e)))?;
    let qr_svg = qr.render::<qrcode::render::svg::Color>().min_dimensions(200, 200).build();
    let base64_svg = general_purpose::STANDARD.encode(qr_svg.as_bytes());
    Ok(format!("data:image/svg+xml;base64,{}", base64_svg))
}

fn build_totp(secret: &str) -> Result<TOTP, AppError> {
    let secret_bytes = Secret::Encoded(secret.to_string())
        .to_bytes()
        .map_err(|e| AppError::crypto(format!("Failed to decode secret: {:?}", e)))?;
    TOTP::new(Algorithm::SHA1, TOTP_DIGITS, TOTP_SKEW, TOTP_STEP, secret_bytes).map_err(|e| AppError::crypto(format!("Failed to create TOTP: {}", e)))
}

/// Checks a code against the current step and one step either side.
pub fn verify_totp_code(secret: &str, code: &str) -> Result<bool, AppError> {
    let totp = build_totp(secret)?;
    totp.check_current(code.trim())
        .map_err(|e| AppError::internal(format!("System clock error: {}", e)))
}

#[cfg(test)]
pub fn current_totp_code(secret: &str) -> String {
    build_totp(secret).unwrap().generate_current().unwrap()
}

fn hash_backup_code(code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(code.trim().as_bytes());
    hex::encode(hasher.finalize())
}

/// Returns `(codes, digests)`; only the digests are persisted.
fn generate_backup_codes() -> (Vec<String>, Vec<String>) {
    use rand::distributions::{Alphanumeric, DistString};

    let mut rng = rand::thread_rng();
    let codes: Vec<String> = (0..BACKUP_CODE_COUNT).map(|_| Alphanumeric.sample_string(&mut rng, BACKUP_CODE_LENGTH)).collect();
    let digests = codes.iter().map(|c| hash_backup_code(c)).collect();
    (codes, digests)
}

fn enabled_secret(user: &User, key: &[u8; 32]) -> Result<Option<String>, AppError> {
    match (&user.two_factor_secret, user.two_factor_enabled) {
        (Some(encrypted), true) => Ok(Some(decrypt_secret(encrypted, key)?)),
        _ => Ok(None),
    }
}

impl Repository {
    /// Starts enrollment: stores a fresh encrypted secret, leaving 2FA disabled until verified.
    pub async fn setup_two_factor(&self, user_id: &Uuid, keys: &TotpKeys<'_>) -> Result<TwoFactorSetupResponse, AppError> {
        let secret = generate_totp_secret();
        let encrypted = encrypt_secret(&secret, keys.encryption_key)?;

        let user = self
            .modify(&user_key(user_id), |user: &mut User| {
                if user.two_factor_enabled {
                    return Err(AppError::BadRequest("Two-factor authentication is already enabled".to_string()));
                }
                user.two_factor_secret = Some(encrypted.clone());
                Ok(())
            })
            .await?
            .ok_or(AppError::UserNotFound)?;

        let otpauth_url = provisioning_uri(&secret, keys.issuer, &user.email);
        let qr_code = generate_qr_code(&otpauth_url)?;

        Ok(TwoFactorSetupResponse { secret, otpauth_url, qr_code })
    }

    /// Confirms enrollment with a live code and issues the backup codes.
    pub async fn verify_and_enable_two_factor(&self, user_id: &Uuid, code: &str, key: &[u8; 32]) -> Result<Vec<String>, AppError> {
        let user = self.get_user_by_id(user_id).await?.ok_or(AppError::UserNotFound)?;
        if user.two_factor_enabled {
            return Err(AppError::BadRequest("Two-factor authentication is already enabled".to_string()));
        }
        let encrypted = user
            .two_factor_secret
            .as_ref()
            .ok_or_else(|| AppError::BadRequest("Two-factor setup has not been started".to_string()))?;
        let secret = decrypt_secret(encrypted, key)?;
        if !verify_totp_code(&secret, code)? {
            return Err(AppError::InvalidTwoFactorCode);
        }

        let (codes, digests) = generate_backup_codes();
        let expected = encrypted.clone();
        self.modify(&user_key(user_id), |user: &mut User| {
            if user.two_factor_secret.as_ref() != Some(&expected) {
                return Err(AppError::BadRequest("Two-factor setup has changed, please start again".to_string()));
            }
            user.two_factor_enabled = true;
            user.backup_code_hashes = digests.clone();
            Ok(())
        })
        .await?
        .ok_or(AppError::UserNotFound)?;

        tracing::info!(user_id = %user_id, "two-factor authentication enabled");
        Ok(codes)
    }

    /// Accepts a live TOTP code or an unused backup code. A matching backup code is
    /// removed in the same write that checks it, so it can never be spent twice.
    pub async fn verify_two_factor_token(&self, user_id: &Uuid, code: &str, key: &[u8; 32]) -> Result<bool, AppError> {
        let Some(user) = self.get_user_by_id(user_id).await? else {
            return Ok(false);
        };
        let Some(secret) = enabled_secret(&user, key)? else {
            return Ok(false);
        };
        if verify_totp_code(&secret, code)? {
            return Ok(true);
        }

        let digest = hash_backup_code(code);
        let consumed = self
            .modify(&user_key(user_id), |user: &mut User| {
                match user.backup_code_hashes.iter().position(|h| *h == digest) {
                    Some(index) => {
                        user.backup_code_hashes.remove(index);
                        Ok(())
                    }
                    None => Err(AppError::InvalidTwoFactorCode),
                }
            })
            .await;

        match consumed {
            Ok(Some(_)) => {
                tracing::info!(user_id = %user_id, "backup code consumed");
                Ok(true)
            }
            Ok(None) | Err(AppError::InvalidTwoFactorCode) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn disable_two_factor(&self, user_id: &Uuid) -> Result<(), AppError> {
        self.modify(&user_key(user_id), |user: &mut User| {
            user.two_factor_enabled = false;
            user.two_factor_secret = None;
            user.backup_code_hashes.clear();
            Ok(())
        })
        .await?
        .ok_or(AppError::UserNotFound)?;
        self.reset_two_factor_attempts(user_id).await
    }

    /// Replaces all backup codes after checking a live TOTP code.
    pub async fn regenerate_backup_codes(&self, user_id: &Uuid, code: &str, key: &[u8; 32]) -> Result<Vec<String>, AppError> {
        let user = self.get_user_by_id(user_id).await?.ok_or(AppError::UserNotFound)?;
        let secret = enabled_secret(&user, key)?.ok_or_else(|| AppError::BadRequest("Two-factor authentication is not enabled".to_string()))?;
        if !verify_totp_code(&secret, code)? {
            return Err(AppError::InvalidTwoFactorCode);
        }

        let (codes, digests) = generate_backup_codes();
        self.modify(&user_key(user_id), |user: &mut User| {
            user.backup_code_hashes = digests.clone();
            Ok(())
        })
        .await?
        .ok_or(AppError::UserNotFound)?;

        Ok(codes)
    }

    pub async fn two_factor_status(&self, user_id: &Uuid) -> Result<TwoFactorStatus, AppError> {
        let user = self.get_user_by_id(user_id).await?.ok_or(AppError::UserNotFound)?;
        Ok(TwoFactorStatus {
            enabled: user.two_factor_enabled,
            pending_setup: !user.two_factor_enabled && user.two_factor_secret.is_some(),
            backup_codes_remaining: if user.two_factor_enabled { user.backup_code_hashes.len() } else { 0 },
        })
    }

    pub async fn is_two_factor_locked(&self, user_id: &Uuid) -> Result<bool, AppError> {
        let attempts: Option<TwoFactorAttempts> = self.load(&attempts_key(user_id)).await?;
        Ok(attempts.is_some_and(|a| a.is_locked(Utc::now())))
    }

    /// Counts a failed second-factor attempt; reaching `max_attempts` locks the user out.
    pub async fn record_failed_two_factor_attempt(&self, user_id: &Uuid, max_attempts: u32, lockout: Duration) -> Result<TwoFactorAttempts, AppError> {
        let key = attempts_key(user_id);
        loop {
            let now = Utc::now();
            let updated = self
                .modify(&key, |attempts: &mut TwoFactorAttempts| {
                    if attempts.locked_until.is_some_and(|until| until <= now) {
                        attempts.failed_attempts = 0;
                        attempts.locked_until = None;
                    }
                    attempts.failed_attempts += 1;
                    if attempts.failed_attempts >= max_attempts {
                        attempts.locked_until = Some(now + lockout);
                    }
                    Ok(())
                })
                .await?;
            if let Some(attempts) = updated {
                if attempts.locked_until.is_some() {
                    tracing::warn!(user_id = %user_id, "two-factor lockout engaged");
                }
                return Ok(attempts);
            }

            let first = TwoFactorAttempts {
                failed_attempts: 1,
                locked_until: (max_attempts <= 1).then(|| now + lockout),
                version: 0,
                updated_at: now,
            };
            match self.insert(&key, &first).await {
                Ok(()) => return Ok(first),
                Err(AppError::Conflict(_)) => continue,
                Err(e) => return Err(e),
            }
        }
    }

    pub async fn reset_two_factor_attempts(&self, user_id: &Uuid) -> Result<(), AppError> {
        self.store.del(&attempts_key(user_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{create_verified_user, memory_repo};

    const KEY: [u8; 32] = [7u8; 32];

    fn keys() -> TotpKeys<'static> {
        TotpKeys {
            encryption_key: &KEY,
            issuer: "CollabHub",
        }
    }

    #[test]
    fn secret_survives_encryption() {
        let secret = generate_totp_secret();
        let encrypted = encrypt_secret(&secret, &KEY).unwrap();
        assert_ne!(encrypted.ciphertext, secret);
        assert_eq!(decrypt_secret(&encrypted, &KEY).unwrap(), secret);
        assert!(decrypt_secret(&encrypted, &[8u8; 32]).is_err());
    }

    #[test]
    fn provisioning_uri_carries_parameters() {
        let uri = provisioning_uri("JBSWY3DPEHPK3PXP", "Collab Hub", "ada@example.com");
        assert!(uri.starts_with("otpauth://totp/Collab%20Hub:ada%40example.com?secret=JBSWY3DPEHPK3PXP"));
        assert!(uri.contains("digits=6"));
        assert!(uri.contains("period=30"));
    }

    #[test]
    fn qr_code_is_svg_data_url() {
        let url = generate_qr_code("otpauth://totp/x:y?secret=JBSWY3DPEHPK3PXP").unwrap();
        assert!(url.starts_with("data:image/svg+xml;base64,"));
    }

    #[test]
    fn backup_codes_are_distinct_and_hashed() {
        let (codes, digests) = generate_backup_codes();
        assert_eq!(codes.len(), BACKUP_CODE_COUNT);
        assert!(codes.iter().all(|c| c.len() == BACKUP_CODE_LENGTH));
        assert!(codes.iter().zip(&digests).all(|(c, d)| c != d && *d == hash_backup_code(c)));
    }

    #[rocket::async_test]
    async fn enrollment_requires_a_valid_code() {
        let repo = memory_repo();
        let user = create_verified_user(&repo, "ada@example.com").await;

        let setup = repo.setup_two_factor(&user.id, &keys()).await.unwrap();
        let status = repo.two_factor_status(&user.id).await.unwrap();
        assert!(status.pending_setup);
        assert!(!status.enabled);

        let err = repo.verify_and_enable_two_factor(&user.id, "abcdef", &KEY).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidTwoFactorCode));

        let codes = repo.verify_and_enable_two_factor(&user.id, &current_totp_code(&setup.secret), &KEY).await.unwrap();
        assert_eq!(codes.len(), 10);

        let status = repo.two_factor_status(&user.id).await.unwrap();
        assert!(status.enabled);
        assert_eq!(status.backup_codes_remaining, 10);
    }

    #[rocket::async_test]
    async fn backup_code_can_only_be_used_once() {
        let repo = memory_repo();
        let user = create_verified_user(&repo, "ada@example.com").await;
        let setup = repo.setup_two_factor(&user.id, &keys()).await.unwrap();
        let codes = repo.verify_and_enable_two_factor(&user.id, &current_totp_code(&setup.secret), &KEY).await.unwrap();

        assert!(repo.verify_two_factor_token(&user.id, &codes[0], &KEY).await.unwrap());
        assert!(!repo.verify_two_factor_token(&user.id, &codes[0], &KEY).await.unwrap());
        assert_eq!(repo.two_factor_status(&user.id).await.unwrap().backup_codes_remaining, 9);
    }

    #[rocket::async_test]
    async fn totp_code_is_accepted_at_login() {
        let repo = memory_repo();
        let user = create_verified_user(&repo, "ada@example.com").await;
        let setup = repo.setup_two_factor(&user.id, &keys()).await.unwrap();
        repo.verify_and_enable_two_factor(&user.id, &current_totp_code(&setup.secret), &KEY).await.unwrap();

        assert!(repo.verify_two_factor_token(&user.id, &current_totp_code(&setup.secret), &KEY).await.unwrap());
        assert!(!repo.verify_two_factor_token(&user.id, "not-a-code", &KEY).await.unwrap());
    }

    #[test]
    fn codes_outside_the_skew_window_are_rejected() {
        let secret = generate_totp_secret();
        let totp = build_totp(&secret).unwrap();
        let now = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().as_secs();

        assert!(verify_totp_code(&secret, &totp.generate(now - TOTP_STEP)).unwrap());
        assert!(!verify_totp_code(&secret, &totp.generate(now - 4 * TOTP_STEP)).unwrap());
        assert!(!verify_totp_code(&secret, &totp.generate(now + 4 * TOTP_STEP)).unwrap());
    }

    #[rocket::async_test]
    async fn disabled_user_never_passes_second_factor() {
        let repo = memory_repo();
        let user = create_verified_user(&repo, "ada@example.com").await;
        let setup = repo.setup_two_factor(&user.id, &keys()).await.unwrap();
        assert!(!repo.verify_two_factor_token(&user.id, &current_totp_code(&setup.secret), &KEY).await.unwrap());
    }

    #[rocket::async_test]
    async fn disable_clears_secret_and_codes() {
        let repo = memory_repo();
        let user = create_verified_user(&repo, "ada@example.com").await;
        let setup = repo.setup_two_factor(&user.id, &keys()).await.unwrap();
        repo.verify_and_enable_two_factor(&user.id, &current_totp_code(&setup.secret), &KEY).await.unwrap();

        repo.disable_two_factor(&user.id).await.unwrap();
        let stored = repo.get_user_by_id(&user.id).await.unwrap().unwrap();
        assert!(!stored.two_factor_enabled);
        assert!(stored.two_factor_secret.is_none());
        assert!(stored.backup_code_hashes.is_empty());
    }

    #[rocket::async_test]
    async fn regenerate_replaces_every_code() {
        let repo = memory_repo();
        let user = create_verified_user(&repo, "ada@example.com").await;
        let setup = repo.setup_two_factor(&user.id, &keys()).await.unwrap();
        let old = repo.verify_and_enable_two_factor(&user.id, &current_totp_code(&setup.secret), &KEY).await.unwrap();

        let new = repo.regenerate_backup_codes(&user.id, &current_totp_code(&setup.secret), &KEY).await.unwrap();
        assert_eq!(new.len(), 10);
        assert!(!repo.verify_two_factor_token(&user.id, &old[0], &KEY).await.unwrap());
        assert!(repo.verify_two_factor_token(&user.id, &new[0], &KEY).await.unwrap());
    }

    #[rocket::async_test]
    async fn lockout_engages_after_max_attempts_and_resets() {
        let repo = memory_repo();
        let user_id = Uuid::new_v4();

        for _ in 0..4 {
            repo.record_failed_two_factor_attempt(&user_id, 5, Duration::minutes(15)).await.unwrap();
        }
        assert!(!repo.is_two_factor_locked(&user_id).await.unwrap());

        let attempts = repo.record_failed_two_factor_attempt(&user_id, 5, Duration::minutes(15)).await.unwrap();
        assert_eq!(attempts.failed_attempts, 5);
        assert!(repo.is_two_factor_locked(&user_id).await.unwrap());

        repo.reset_two_factor_attempts(&user_id).await.unwrap();
        assert!(!repo.is_two_factor_locked(&user_id).await.unwrap());
    }

    #[rocket::async_test]
    async fn expired_lockout_starts_counting_again() {
        let repo = memory_repo();
        let user_id = Uuid::new_v4();
        for _ in 0..5 {
            repo.record_failed_two_factor_attempt(&user_id, 5, Duration::seconds(-1)).await.unwrap();
        }
        assert!(!repo.is_two_factor_locked(&user_id).await.unwrap());

        let attempts = repo.record_failed_two_factor_attempt(&user_id, 5, Duration::minutes(15)).await.unwrap();
        assert_eq!(attempts.failed_attempts, 1);
    }
}
