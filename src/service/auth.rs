use crate::config::Config;
use crate::database::repository::Repository;
use crate::error::app_error::AppError;
use crate::models::activity::ActivityAction;
use crate::models::user::User;
use crate::service::email::EmailService;
use chrono::{Duration, Utc};
use serde_json::json;
use uuid::Uuid;

/// Where a login request came from.
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub user_agent: Option<String>,
    pub ip: Option<String>,
}

impl ClientInfo {
    fn user_agent(&self) -> &str {
        self.user_agent.as_deref().unwrap_or("Unknown device")
    }

    fn ip(&self) -> &str {
        self.ip.as_deref().unwrap_or("Unknown location")
    }
}

/// What happened during a login attempt.
#[derive(Debug)]
pub enum LoginOutcome {
    /// Credentials accepted and a session was created.
    Success { user: User, session_id: String },
    /// Password accepted but a second factor is needed before a session is issued.
    TwoFactorRequired { user_id: Uuid },
}

pub struct AuthService<'a> {
    pub repo: &'a Repository,
    pub config: &'a Config,
    pub email: &'a EmailService,
}

impl<'a> AuthService<'a> {
    pub fn new(repo: &'a Repository, config: &'a Config, email: &'a EmailService) -> Self {
        Self { repo, config, email }
    }

    /// First login step. Wrong email and wrong password fail identically.
    pub async fn login_with_password(&self, email: &str, password: &str, client: &ClientInfo) -> Result<LoginOutcome, AppError> {
        let Some(user) = self.repo.validate_credentials(email, password).await? else {
            if let Some(existing) = self.repo.get_user_by_email(email).await? {
                let _ = self
                    .repo
                    .log_activity(
                        &existing.id,
                        ActivityAction::LoginFailed,
                        json!({ "reason": "invalid_password" }),
                        client.ip.as_deref(),
                        client.user_agent.as_deref(),
                    )
                    .await;
            }
            return Err(AppError::InvalidCredentials);
        };

        if !user.email_verified {
            return Err(AppError::EmailNotVerified);
        }

        if user.two_factor_enabled {
            tracing::info!(user_id = %user.id, "password accepted, second factor required");
            return Ok(LoginOutcome::TwoFactorRequired { user_id: user.id });
        }

        self.start_session(user, false, client).await
    }

    /// Second login step for accounts with two-factor enabled.
    pub async fn login_with_two_factor(&self, user_id: &Uuid, code: &str, client: &ClientInfo) -> Result<LoginOutcome, AppError> {
        let user = self.repo.get_user_by_id(user_id).await?.ok_or(AppError::InvalidTwoFactorCode)?;
        if !user.email_verified {
            return Err(AppError::EmailNotVerified);
        }
        if self.repo.is_two_factor_locked(user_id).await? {
            return Err(AppError::TwoFactorLocked);
        }

        let key = self.config.two_factor.parse_encryption_key().map_err(AppError::crypto)?;
        if !self.repo.verify_two_factor_token(user_id, code.trim(), &key).await? {
            let attempts = self
                .repo
                .record_failed_two_factor_attempt(
                    user_id,
                    self.config.two_factor.max_failed_attempts,
                    Duration::minutes(self.config.two_factor.lockout_minutes),
                )
                .await?;
            let _ = self
                .repo
                .log_activity(
                    user_id,
                    ActivityAction::TwoFactorFailed,
                    json!({ "failedAttempts": attempts.failed_attempts }),
                    client.ip.as_deref(),
                    client.user_agent.as_deref(),
                )
                .await;
            return Err(AppError::InvalidTwoFactorCode);
        }

        self.repo.reset_two_factor_attempts(user_id).await?;
        self.start_session(user, true, client).await
    }

    async fn start_session(&self, user: User, two_factor_used: bool, client: &ClientInfo) -> Result<LoginOutcome, AppError> {
        let session_id = self
            .repo
            .create_session(&user.id, client.user_agent(), client.ip())
            .await?
            .ok_or(AppError::UserNotFound)?;

        let _ = self
            .repo
            .log_activity(
                &user.id,
                ActivityAction::LoginSuccess,
                json!({ "twoFactorUsed": two_factor_used }),
                client.ip.as_deref(),
                client.user_agent.as_deref(),
            )
            .await;

        if user.security_settings.login_notifications {
            let email = self.email.clone();
            let to_email = user.email.clone();
            let to_name = user.name.clone();
            let device = client.user_agent().to_string();
            let location = client.ip().to_string();
            tokio::spawn(async move {
                if let Err(e) = email.send_login_notification_email(&to_email, &to_name, Utc::now(), &device, &location).await {
                    tracing::error!(error = ?e, "failed to send login notification email");
                }
            });
        }

        tracing::info!(user_id = %user.id, two_factor_used, "user logged in");
        Ok(LoginOutcome::Success { user, session_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::two_factor::{TotpKeys, current_totp_code};
    use crate::test_utils::{TEST_PASSWORD, create_verified_user, memory_repo, test_config};

    fn email_service(config: &Config) -> EmailService {
        EmailService::from_config(config).0
    }

    #[rocket::async_test]
    async fn wrong_password_and_unknown_email_fail_alike() {
        let repo = memory_repo();
        let config = test_config();
        let email = email_service(&config);
        let auth = AuthService::new(&repo, &config, &email);
        create_verified_user(&repo, "ada@example.com").await;

        let wrong = auth.login_with_password("ada@example.com", "Wrong1234", &ClientInfo::default()).await.unwrap_err();
        let unknown = auth.login_with_password("nobody@example.com", TEST_PASSWORD, &ClientInfo::default()).await.unwrap_err();
        assert_eq!(wrong.public_message(), "Invalid email or password");
        assert_eq!(unknown.public_message(), wrong.public_message());
    }

    #[rocket::async_test]
    async fn unverified_account_is_refused() {
        let repo = memory_repo();
        let config = test_config();
        let email = email_service(&config);
        let auth = AuthService::new(&repo, &config, &email);
        repo.create_user("Ada", "ada@example.com", TEST_PASSWORD, Duration::hours(24)).await.unwrap();

        let err = auth.login_with_password("ada@example.com", TEST_PASSWORD, &ClientInfo::default()).await.unwrap_err();
        assert_eq!(err.public_message(), "Please verify your email before logging in");
    }

    #[rocket::async_test]
    async fn password_login_creates_session() {
        let repo = memory_repo();
        let config = test_config();
        let email = email_service(&config);
        let auth = AuthService::new(&repo, &config, &email);
        let user = create_verified_user(&repo, "ada@example.com").await;

        match auth.login_with_password("ada@example.com", TEST_PASSWORD, &ClientInfo::default()).await.unwrap() {
            LoginOutcome::Success { session_id, .. } => {
                assert!(repo.get_session_user(&user.id, &session_id).await.unwrap().is_some());
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[rocket::async_test]
    async fn repeated_bad_codes_lock_the_second_step() {
        let repo = memory_repo();
        let mut config = test_config();
        config.two_factor.max_failed_attempts = 2;
        let email = email_service(&config);
        let auth = AuthService::new(&repo, &config, &email);
        let user = create_verified_user(&repo, "ada@example.com").await;

        let key = config.two_factor.parse_encryption_key().unwrap();
        let setup = repo
            .setup_two_factor(
                &user.id,
                &TotpKeys {
                    encryption_key: &key,
                    issuer: "CollabHub",
                },
            )
            .await
            .unwrap();
        repo.verify_and_enable_two_factor(&user.id, &current_totp_code(&setup.secret), &key).await.unwrap();

        assert!(matches!(
            auth.login_with_password("ada@example.com", TEST_PASSWORD, &ClientInfo::default()).await.unwrap(),
            LoginOutcome::TwoFactorRequired { user_id } if user_id == user.id
        ));

        for _ in 0..2 {
            let err = auth.login_with_two_factor(&user.id, "abcdef", &ClientInfo::default()).await.unwrap_err();
            assert!(matches!(err, AppError::InvalidTwoFactorCode));
        }
        let err = auth
            .login_with_two_factor(&user.id, &current_totp_code(&setup.secret), &ClientInfo::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::TwoFactorLocked));
    }
}
