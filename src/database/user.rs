use crate::database::repository::Repository;
use crate::database::tokens::{generate_token, verification_key};
use crate::error::app_error::AppError;
use crate::models::user::{SecuritySettings, SecuritySettingsRequest, UpdateProfileRequest, User, UserResponse, UserStatus};
use argon2::Argon2;
use chrono::{Duration, Utc};
use password_hash::rand_core::OsRng;
use password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use std::sync::LazyLock;
use uuid::Uuid;

/// A real Argon2 hash computed once, verified against when the email is unknown
/// so that both failure paths cost the same.
static DUMMY_HASH: LazyLock<Option<String>> = LazyLock::new(|| hash_password("dummy-never-matches").ok());

pub(crate) fn user_key(id: &Uuid) -> String {
    format!("user:{}", id)
}

fn email_key(email: &str) -> String {
    format!("user:email:{}", normalize_email(email))
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub(crate) fn hash_password(password: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default().hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

fn password_matches(user: &User, password: &str) -> Result<bool, AppError> {
    let parsed = PasswordHash::new(&user.password_hash).map_err(|e| AppError::password_hash("Failed to parse stored password hash", e))?;
    Ok(Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok())
}

fn dummy_verify(password: &str) {
    if let Some(hash) = DUMMY_HASH.as_deref()
        && let Ok(parsed) = PasswordHash::new(hash)
    {
        let _ = Argon2::default().verify_password(password.as_bytes(), &parsed);
    }
}

impl Repository {
    /// Registers a new account and issues its email verification token.
    ///
    /// The email index is claimed before the record is written, so two concurrent
    /// signups for one address cannot both succeed.
    pub async fn create_user(&self, name: &str, email: &str, password: &str, verification_ttl: Duration) -> Result<(UserResponse, String), AppError> {
        let id = Uuid::new_v4();
        let email = normalize_email(email);

        if !self.store.set_if_absent(&email_key(&email), &id.to_string()).await? {
            return Err(AppError::UserAlreadyExists(email));
        }

        let password_hash = match hash_password(password) {
            Ok(hash) => hash,
            Err(e) => {
                self.store.del(&email_key(&email)).await?;
                return Err(e);
            }
        };

        let (token, token_hash) = generate_token();
        let now = Utc::now();
        let user = User {
            id,
            name: name.trim().to_string(),
            email,
            password_hash,
            image: None,
            status: UserStatus::Online,
            email_verified: false,
            verification_token_hash: Some(token_hash.clone()),
            verification_token_expires_at: Some(now + verification_ttl),
            reset_token_hash: None,
            reset_token_expires_at: None,
            two_factor_enabled: false,
            two_factor_secret: None,
            backup_code_hashes: Vec::new(),
            sessions: Vec::new(),
            security_settings: SecuritySettings::default(),
            version: 0,
            created_at: now,
            updated_at: now,
        };

        self.insert(&user_key(&id), &user).await?;
        self.store.set(&verification_key(&token_hash), &id.to_string()).await?;

        tracing::info!(user_id = %id, "user created");
        Ok((UserResponse::from(&user), token))
    }

    pub async fn get_user_by_id(&self, id: &Uuid) -> Result<Option<User>, AppError> {
        self.load(&user_key(id)).await
    }

    pub async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        match self.store.get(&email_key(email)).await? {
            Some(raw_id) => {
                let id = Uuid::parse_str(&raw_id)?;
                self.get_user_by_id(&id).await
            }
            None => Ok(None),
        }
    }

    pub async fn get_users_by_ids(&self, ids: &[Uuid]) -> Result<Vec<User>, AppError> {
        self.load_many(ids.iter().map(user_key)).await
    }

    /// `None` for an unknown email and for a wrong password alike.
    pub async fn validate_credentials(&self, email: &str, password: &str) -> Result<Option<User>, AppError> {
        match self.get_user_by_email(email).await? {
            Some(user) => {
                if password_matches(&user, password)? {
                    Ok(Some(user))
                } else {
                    Ok(None)
                }
            }
            None => {
                dummy_verify(password);
                Ok(None)
            }
        }
    }

    pub fn verify_password(&self, user: &User, password: &str) -> Result<(), AppError> {
        if password_matches(user, password)? {
            Ok(())
        } else {
            Err(AppError::InvalidCredentials)
        }
    }

    pub async fn update_profile(&self, id: &Uuid, request: &UpdateProfileRequest) -> Result<Option<User>, AppError> {
        self.modify(&user_key(id), |user: &mut User| {
            if let Some(name) = &request.name {
                user.name = name.trim().to_string();
            }
            if let Some(image) = &request.image {
                user.image = Some(image.clone());
            }
            Ok(())
        })
        .await
    }

    /// Replaces the password after checking the current one. Every other session of the
    /// user is signed out; `keep_session` stays valid.
    pub async fn change_password(&self, id: &Uuid, keep_session: &str, current_password: &str, new_password: &str) -> Result<(), AppError> {
        let user = self.get_user_by_id(id).await?.ok_or(AppError::UserNotFound)?;
        if !password_matches(&user, current_password)? {
            return Err(AppError::BadRequest("Current password is incorrect".to_string()));
        }
        user.security_settings.check_password(new_password).map_err(AppError::BadRequest)?;

        let new_hash = hash_password(new_password)?;
        self.modify(&user_key(id), |user: &mut User| {
            user.password_hash = new_hash.clone();
            user.sessions.retain(|s| s.id == keep_session);
            Ok(())
        })
        .await?
        .ok_or(AppError::UserNotFound)?;

        Ok(())
    }

    pub async fn update_security_settings(&self, id: &Uuid, request: &SecuritySettingsRequest) -> Result<Option<User>, AppError> {
        self.modify(&user_key(id), |user: &mut User| {
            request.apply(&mut user.security_settings);
            Ok(())
        })
        .await
    }

    pub async fn update_user_status(&self, id: &Uuid, status: UserStatus) -> Result<Option<User>, AppError> {
        self.modify(&user_key(id), |user: &mut User| {
            user.status = status;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::memory_repo;

    #[rocket::async_test]
    async fn create_user_never_stores_plaintext_password() {
        let repo = memory_repo();
        let (user, token) = repo.create_user("Ada", "Ada@Example.com", "Abcdef12", Duration::hours(24)).await.unwrap();

        assert_eq!(user.email, "ada@example.com");
        assert!(!user.email_verified);
        assert_eq!(token.len(), 64);

        let raw = repo.store.get(&user_key(&user.id)).await.unwrap().unwrap();
        assert!(!raw.contains("Abcdef12"));
        assert!(!raw.contains(&token));
    }

    #[rocket::async_test]
    async fn duplicate_email_is_rejected() {
        let repo = memory_repo();
        repo.create_user("Ada", "ada@example.com", "Abcdef12", Duration::hours(24)).await.unwrap();
        let err = repo.create_user("Other", " ADA@example.com ", "Abcdef12", Duration::hours(24)).await.unwrap_err();
        assert!(matches!(err, AppError::UserAlreadyExists(_)));
    }

    #[rocket::async_test]
    async fn validate_credentials_hides_which_part_failed() {
        let repo = memory_repo();
        repo.create_user("Ada", "ada@example.com", "Abcdef12", Duration::hours(24)).await.unwrap();

        assert!(repo.validate_credentials("ada@example.com", "Abcdef12").await.unwrap().is_some());
        assert!(repo.validate_credentials("ada@example.com", "wrong").await.unwrap().is_none());
        assert!(repo.validate_credentials("nobody@example.com", "Abcdef12").await.unwrap().is_none());
    }

    #[rocket::async_test]
    async fn change_password_requires_current_and_keeps_only_current_session() {
        let repo = memory_repo();
        let (user, _) = repo.create_user("Ada", "ada@example.com", "Abcdef12", Duration::hours(24)).await.unwrap();
        let keep = repo.create_session(&user.id, "a", "127.0.0.1").await.unwrap().unwrap();
        let other = repo.create_session(&user.id, "b", "127.0.0.1").await.unwrap().unwrap();

        let err = repo.change_password(&user.id, &keep, "nope", "Newpass12").await.unwrap_err();
        assert_eq!(err.public_message(), "Current password is incorrect");

        let err = repo.change_password(&user.id, &keep, "Abcdef12", "weakpass").await.unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));

        repo.change_password(&user.id, &keep, "Abcdef12", "Newpass12").await.unwrap();
        let stored = repo.get_user_by_id(&user.id).await.unwrap().unwrap();
        assert!(stored.has_session(&keep));
        assert!(!stored.has_session(&other));
        assert!(repo.validate_credentials("ada@example.com", "Newpass12").await.unwrap().is_some());
    }

    #[rocket::async_test]
    async fn status_update_persists() {
        let repo = memory_repo();
        let (user, _) = repo.create_user("Ada", "ada@example.com", "Abcdef12", Duration::hours(24)).await.unwrap();
        let updated = repo.update_user_status(&user.id, UserStatus::Dnd).await.unwrap().unwrap();
        assert_eq!(updated.status, UserStatus::Dnd);
        assert!(repo.update_user_status(&Uuid::new_v4(), UserStatus::Idle).await.unwrap().is_none());
    }
}
