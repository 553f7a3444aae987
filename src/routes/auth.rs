use crate::auth::{CurrentUser, clear_session_cookies, set_session_cookies};
use crate::config::Config;
use crate::database::repository::Repository;
use crate::error::app_error::AppError;
use crate::middleware::rate_limit::{AuthRateLimit, RateLimit};
use crate::middleware::{ClientIp, UserAgent};
use crate::models::activity::ActivityAction;
use crate::models::auth::{AuthResponse, LoginRequest, SuccessResponse};
use crate::models::password_reset::{ResendVerificationRequest, TokenRequest};
use crate::models::user::{SignupRequest, UserResponse};
use crate::service::auth::{AuthService, ClientInfo, LoginOutcome};
use crate::service::email::EmailService;
use chrono::Duration;
use rocket::http::{CookieJar, Status};
use rocket::serde::json::Json;
use rocket::{State, get, post};
use rocket_okapi::openapi;
use serde_json::json;
use validator::Validate;

const VERIFICATION_SENT_MESSAGE: &str = "If your account exists and is not yet verified, a new verification email has been sent.";

/// Register a new account and send the verification email
#[openapi(tag = "Auth")]
#[post("/signup", data = "<payload>")]
#[allow(clippy::too_many_arguments)]
pub async fn signup(
    repo: &State<Repository>,
    config: &State<Config>,
    email: &State<EmailService>,
    _rate_limit: AuthRateLimit,
    user_agent: UserAgent,
    client_ip: ClientIp,
    payload: Json<SignupRequest>,
) -> Result<(Status, Json<AuthResponse>), AppError> {
    payload.validate()?;

    let (user, token) = repo
        .create_user(
            &payload.name,
            &payload.email,
            &payload.password,
            Duration::seconds(config.tokens.verification_ttl_seconds),
        )
        .await?;

    let _ = repo
        .log_activity(
            &user.id,
            ActivityAction::UserRegistered,
            json!({ "email": user.email }),
            client_ip.0.as_deref(),
            user_agent.0.as_deref(),
        )
        .await;

    if let Err(e) = email.send_verification_email(&user.email, &user.name, &token).await {
        tracing::error!(error = ?e, user_id = %user.id, "failed to send verification email");
    }

    Ok((
        Status::Created,
        Json(AuthResponse {
            success: true,
            user: Some(user),
            message: Some("Account created. Please check your email to verify your account.".to_string()),
            ..Default::default()
        }),
    ))
}

/// Password login, or the second step of a two-factor login
#[openapi(tag = "Auth")]
#[post("/login", data = "<payload>")]
#[allow(clippy::too_many_arguments)]
pub async fn login(
    repo: &State<Repository>,
    config: &State<Config>,
    email: &State<EmailService>,
    cookies: &CookieJar<'_>,
    _rate_limit: AuthRateLimit,
    user_agent: UserAgent,
    client_ip: ClientIp,
    payload: Json<LoginRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    let service = AuthService::new(repo, config, email);
    let client = ClientInfo {
        user_agent: user_agent.0,
        ip: client_ip.0,
    };

    let outcome = match payload.into_inner() {
        LoginRequest::Password(step) => {
            step.validate()?;
            service.login_with_password(&step.email, &step.password, &client).await?
        }
        LoginRequest::TwoFactor(step) => {
            step.validate()?;
            service.login_with_two_factor(&step.user_id, &step.two_factor_code, &client).await?
        }
    };

    match outcome {
        LoginOutcome::Success { user, session_id } => {
            set_session_cookies(cookies, &config.session, &user.id, &session_id);
            Ok(Json(AuthResponse::signed_in(UserResponse::from(&user))))
        }
        LoginOutcome::TwoFactorRequired { user_id } => Ok(Json(AuthResponse::two_factor_required(user_id))),
    }
}

/// End the current session and clear the cookies
#[openapi(tag = "Auth")]
#[post("/logout")]
pub async fn logout(
    repo: &State<Repository>,
    cookies: &CookieJar<'_>,
    _rate_limit: RateLimit,
    user_agent: UserAgent,
    client_ip: ClientIp,
    current_user: Option<CurrentUser>,
) -> Result<Json<SuccessResponse>, AppError> {
    if let Some(current_user) = current_user {
        repo.delete_session(&current_user.id, &current_user.session_id).await?;
        let _ = repo
            .log_activity(
                &current_user.id,
                ActivityAction::Logout,
                json!({}),
                client_ip.0.as_deref(),
                user_agent.0.as_deref(),
            )
            .await;
    }
    clear_session_cookies(cookies);
    Ok(Json(SuccessResponse::ok()))
}

/// Consume an email verification token
#[openapi(tag = "Auth")]
#[post("/verify-email", data = "<payload>")]
pub async fn verify_email(
    repo: &State<Repository>,
    _rate_limit: AuthRateLimit,
    user_agent: UserAgent,
    client_ip: ClientIp,
    payload: Json<TokenRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    payload.validate()?;
    let user = repo.verify_email(&payload.token).await?;

    let _ = repo
        .log_activity(&user.id, ActivityAction::EmailVerified, json!({}), client_ip.0.as_deref(), user_agent.0.as_deref())
        .await;

    Ok(Json(AuthResponse::message("Email verified successfully. You can now log in.")))
}

/// Send a fresh verification email. Always answers with the same message.
#[openapi(tag = "Auth")]
#[post("/resend-verification", data = "<payload>")]
pub async fn resend_verification(
    repo: &State<Repository>,
    config: &State<Config>,
    email: &State<EmailService>,
    _rate_limit: AuthRateLimit,
    payload: Json<ResendVerificationRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    payload.validate()?;

    if let Some((user, token)) = repo
        .reissue_verification_token(&payload.email, Duration::seconds(config.tokens.verification_ttl_seconds))
        .await?
        && let Err(e) = email.send_verification_email(&user.email, &user.name, &token).await
    {
        tracing::error!(error = ?e, user_id = %user.id, "failed to resend verification email");
    }

    Ok(Json(AuthResponse::message(VERIFICATION_SENT_MESSAGE)))
}

/// The signed-in user
#[openapi(tag = "Auth")]
#[get("/me")]
pub async fn me(repo: &State<Repository>, _rate_limit: RateLimit, current_user: CurrentUser) -> Result<Json<UserResponse>, AppError> {
    let user = repo.get_user_by_id(&current_user.id).await?.ok_or(AppError::UserNotFound)?;
    Ok(Json(UserResponse::from(&user)))
}

pub fn routes() -> (Vec<rocket::Route>, okapi::openapi3::OpenApi) {
    rocket_okapi::openapi_get_routes_spec![signup, login, logout, verify_email, resend_verification, me]
}
