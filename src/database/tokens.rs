use crate::database::repository::Repository;
use crate::database::user::user_key;
use crate::error::app_error::AppError;
use crate::models::user::User;
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use sha2::{Digest, Sha256};
use uuid::Uuid;

const INVALID_VERIFICATION_LINK: &str = "Invalid or expired verification link";
const INVALID_RESET_LINK: &str = "Invalid or expired reset link";

/// Generates a random 32-byte token. Returns `(plain_token, sha256_hex)`; only the digest is stored.
pub(crate) fn generate_token() -> (String, String) {
    let mut rng = rand::thread_rng();
    let token_bytes: [u8; 32] = rng.r#gen();
    let token = hex::encode(token_bytes);
    let token_hash = hash_token(&token);
    (token, token_hash)
}

pub(crate) fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.trim().as_bytes());
    hex::encode(hasher.finalize())
}

pub(crate) fn verification_key(token_hash: &str) -> String {
    format!("verification:token:{}", token_hash)
}

fn reset_key(token_hash: &str) -> String {
    format!("reset:token:{}", token_hash)
}

fn is_live(stored_hash: &Option<String>, expires_at: &Option<DateTime<Utc>>, token_hash: &str, now: DateTime<Utc>) -> bool {
    stored_hash.as_deref() == Some(token_hash) && expires_at.is_some_and(|at| at > now)
}

impl Repository {
    /// Consumes a verification token and marks the owner's email verified.
    ///
    /// The index entry is taken atomically first, so a token can only ever be
    /// presented once, and only then is its expiry checked.
    pub async fn verify_email(&self, token: &str) -> Result<User, AppError> {
        let token_hash = hash_token(token);
        let Some(raw_id) = self.store.take(&verification_key(&token_hash)).await? else {
            return Err(AppError::BadRequest(INVALID_VERIFICATION_LINK.to_string()));
        };
        let user_id = Uuid::parse_str(&raw_id)?;
        let now = Utc::now();

        let updated = self
            .modify(&user_key(&user_id), |user: &mut User| {
                if !is_live(&user.verification_token_hash, &user.verification_token_expires_at, &token_hash, now) {
                    return Err(AppError::BadRequest(INVALID_VERIFICATION_LINK.to_string()));
                }
                user.email_verified = true;
                user.verification_token_hash = None;
                user.verification_token_expires_at = None;
                Ok(())
            })
            .await?;

        updated.ok_or_else(|| AppError::BadRequest(INVALID_VERIFICATION_LINK.to_string()))
    }

    /// Issues a fresh verification token for an unverified account, replacing any previous one.
    pub async fn reissue_verification_token(&self, email: &str, ttl: Duration) -> Result<Option<(User, String)>, AppError> {
        let Some(user) = self.get_user_by_email(email).await? else {
            return Ok(None);
        };
        if user.email_verified {
            return Ok(None);
        }

        let (token, token_hash) = generate_token();
        let expires_at = Utc::now() + ttl;
        let updated = self
            .modify_with(&user_key(&user.id), |u: &mut User| {
                let previous = u.verification_token_hash.replace(token_hash.clone());
                u.verification_token_expires_at = Some(expires_at);
                Ok(previous)
            })
            .await?;

        let Some((user, previous)) = updated else {
            return Ok(None);
        };
        if let Some(previous) = previous {
            self.store.del(&verification_key(&previous)).await?;
        }
        self.store.set(&verification_key(&token_hash), &user.id.to_string()).await?;

        Ok(Some((user, token)))
    }

    /// Issues a password reset token. `None` when no account uses the email.
    pub async fn create_password_reset_token(&self, email: &str, ttl: Duration) -> Result<Option<(User, String)>, AppError> {
        let Some(user) = self.get_user_by_email(email).await? else {
            return Ok(None);
        };

        let (token, token_hash) = generate_token();
        let expires_at = Utc::now() + ttl;
        let updated = self
            .modify_with(&user_key(&user.id), |u: &mut User| {
                let previous = u.reset_token_hash.replace(token_hash.clone());
                u.reset_token_expires_at = Some(expires_at);
                Ok(previous)
            })
            .await?;

        let Some((user, previous)) = updated else {
            return Ok(None);
        };
        if let Some(previous) = previous {
            self.store.del(&reset_key(&previous)).await?;
        }
        self.store.set(&reset_key(&token_hash), &user.id.to_string()).await?;

        Ok(Some((user, token)))
    }

    /// Checks a reset token without consuming it.
    pub async fn validate_reset_token(&self, token: &str) -> Result<Option<User>, AppError> {
        let token_hash = hash_token(token);
        let Some(raw_id) = self.store.get(&reset_key(&token_hash)).await? else {
            return Ok(None);
        };
        let user_id = Uuid::parse_str(&raw_id)?;

        Ok(self
            .get_user_by_id(&user_id)
            .await?
            .filter(|user| is_live(&user.reset_token_hash, &user.reset_token_expires_at, &token_hash, Utc::now())))
    }

    /// Consumes a reset token, replaces the password and signs the user out everywhere.
    pub async fn reset_password(&self, token: &str, new_password: &str) -> Result<User, AppError> {
        let user = self
            .validate_reset_token(token)
            .await?
            .ok_or_else(|| AppError::BadRequest(INVALID_RESET_LINK.to_string()))?;
        user.security_settings.check_password(new_password).map_err(AppError::BadRequest)?;
        let new_hash = crate::database::user::hash_password(new_password)?;

        let token_hash = hash_token(token);
        if self.store.take(&reset_key(&token_hash)).await?.is_none() {
            return Err(AppError::BadRequest(INVALID_RESET_LINK.to_string()));
        }

        let now = Utc::now();
        let updated = self
            .modify(&user_key(&user.id), |u: &mut User| {
                if !is_live(&u.reset_token_hash, &u.reset_token_expires_at, &token_hash, now) {
                    return Err(AppError::BadRequest(INVALID_RESET_LINK.to_string()));
                }
                u.password_hash = new_hash.clone();
                u.reset_token_hash = None;
                u.reset_token_expires_at = None;
                u.sessions.clear();
                Ok(())
            })
            .await?;

        updated.ok_or_else(|| AppError::BadRequest(INVALID_RESET_LINK.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::memory_repo;

    #[test]
    fn tokens_are_unique_and_hashed() {
        let (a, a_hash) = generate_token();
        let (b, _) = generate_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), 64);
        assert_eq!(a_hash, hash_token(&a));
        assert_ne!(a, a_hash);
    }

    #[rocket::async_test]
    async fn verification_token_is_single_use() {
        let repo = memory_repo();
        let (user, token) = repo.create_user("Ada", "ada@example.com", "Abcdef12", Duration::hours(24)).await.unwrap();

        let verified = repo.verify_email(&token).await.unwrap();
        assert_eq!(verified.id, user.id);
        assert!(verified.email_verified);

        let err = repo.verify_email(&token).await.unwrap_err();
        assert_eq!(err.public_message(), INVALID_VERIFICATION_LINK);
    }

    #[rocket::async_test]
    async fn expired_verification_token_is_rejected() {
        let repo = memory_repo();
        let (_, token) = repo.create_user("Ada", "ada@example.com", "Abcdef12", Duration::seconds(-1)).await.unwrap();

        assert!(repo.verify_email(&token).await.is_err());
        let stored = repo.get_user_by_email("ada@example.com").await.unwrap().unwrap();
        assert!(!stored.email_verified);
    }

    #[rocket::async_test]
    async fn reissued_verification_token_replaces_previous() {
        let repo = memory_repo();
        let (_, first) = repo.create_user("Ada", "ada@example.com", "Abcdef12", Duration::hours(24)).await.unwrap();
        let (_, second) = repo.reissue_verification_token("ada@example.com", Duration::hours(24)).await.unwrap().unwrap();

        assert!(repo.verify_email(&first).await.is_err());
        assert!(repo.verify_email(&second).await.is_ok());
        assert!(repo.reissue_verification_token("ada@example.com", Duration::hours(24)).await.unwrap().is_none());
    }

    #[rocket::async_test]
    async fn reset_token_validation_does_not_consume() {
        let repo = memory_repo();
        repo.create_user("Ada", "ada@example.com", "Abcdef12", Duration::hours(24)).await.unwrap();
        let (_, token) = repo.create_password_reset_token("ada@example.com", Duration::hours(1)).await.unwrap().unwrap();

        assert!(repo.validate_reset_token(&token).await.unwrap().is_some());
        assert!(repo.validate_reset_token(&token).await.unwrap().is_some());
        assert!(repo.validate_reset_token("not-a-token").await.unwrap().is_none());
    }

    #[rocket::async_test]
    async fn reset_password_consumes_token_and_clears_sessions() {
        let repo = memory_repo();
        let (user, _) = repo.create_user("Ada", "ada@example.com", "Abcdef12", Duration::hours(24)).await.unwrap();
        repo.create_session(&user.id, "browser", "127.0.0.1").await.unwrap();
        let (_, token) = repo.create_password_reset_token("ada@example.com", Duration::hours(1)).await.unwrap().unwrap();

        let updated = repo.reset_password(&token, "Newpass12").await.unwrap();
        assert!(updated.sessions.is_empty());
        assert!(updated.reset_token_hash.is_none());
        assert!(repo.validate_credentials("ada@example.com", "Newpass12").await.unwrap().is_some());

        let err = repo.reset_password(&token, "Another12").await.unwrap_err();
        assert_eq!(err.public_message(), INVALID_RESET_LINK);
    }

    #[rocket::async_test]
    async fn expired_reset_token_fails_even_if_unused() {
        let repo = memory_repo();
        repo.create_user("Ada", "ada@example.com", "Abcdef12", Duration::hours(24)).await.unwrap();
        let (_, token) = repo.create_password_reset_token("ada@example.com", Duration::seconds(-1)).await.unwrap().unwrap();

        assert!(repo.validate_reset_token(&token).await.unwrap().is_none());
        assert!(repo.reset_password(&token, "Newpass12").await.is_err());
        assert!(repo.validate_credentials("ada@example.com", "Abcdef12").await.unwrap().is_some());
    }

    #[rocket::async_test]
    async fn newer_reset_token_invalidates_older() {
        let repo = memory_repo();
        repo.create_user("Ada", "ada@example.com", "Abcdef12", Duration::hours(24)).await.unwrap();
        let (_, first) = repo.create_password_reset_token("ada@example.com", Duration::hours(1)).await.unwrap().unwrap();
        let (_, second) = repo.create_password_reset_token("ada@example.com", Duration::hours(1)).await.unwrap().unwrap();

        assert!(repo.validate_reset_token(&first).await.unwrap().is_none());
        assert!(repo.validate_reset_token(&second).await.unwrap().is_some());
    }

    #[rocket::async_test]
    async fn unknown_email_gets_no_reset_token() {
        let repo = memory_repo();
        assert!(repo.create_password_reset_token("ghost@example.com", Duration::hours(1)).await.unwrap().is_none());
    }
}
