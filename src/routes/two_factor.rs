use crate::auth::CurrentUser;
use crate::config::Config;
use crate::database::repository::Repository;
use crate::database::two_factor::TotpKeys;
use crate::error::app_error::AppError;
use crate::middleware::rate_limit::{AuthRateLimit, RateLimit};
use crate::middleware::{ClientIp, UserAgent};
use crate::models::activity::ActivityAction;
use crate::models::auth::SuccessResponse;
use crate::models::two_factor::{BackupCodesResponse, TwoFactorDisableRequest, TwoFactorSetupResponse, TwoFactorStatus, TwoFactorVerifyRequest};
use rocket::serde::json::Json;
use rocket::{State, get, post};
use rocket_okapi::openapi;
use serde_json::json;
use validator::Validate;

fn encryption_key(config: &Config) -> Result<[u8; 32], AppError> {
    config.two_factor.parse_encryption_key().map_err(AppError::crypto)
}

/// Start enrollment: returns the secret, provisioning URI and QR code
#[openapi(tag = "Two-Factor Authentication")]
#[post("/setup")]
pub async fn setup_two_factor(
    repo: &State<Repository>,
    config: &State<Config>,
    _rate_limit: RateLimit,
    current_user: CurrentUser,
) -> Result<Json<TwoFactorSetupResponse>, AppError> {
    let key = encryption_key(config)?;
    let keys = TotpKeys {
        encryption_key: &key,
        issuer: &config.two_factor.issuer_name,
    };
    Ok(Json(repo.setup_two_factor(&current_user.id, &keys).await?))
}

/// Confirm enrollment with a live code. Returns the backup codes, shown only once.
#[openapi(tag = "Two-Factor Authentication")]
#[post("/verify", data = "<payload>")]
#[allow(clippy::too_many_arguments)]
pub async fn verify_two_factor(
    repo: &State<Repository>,
    config: &State<Config>,
    _rate_limit: AuthRateLimit,
    current_user: CurrentUser,
    user_agent: UserAgent,
    client_ip: ClientIp,
    payload: Json<TwoFactorVerifyRequest>,
) -> Result<Json<BackupCodesResponse>, AppError> {
    payload.validate()?;
    let key = encryption_key(config)?;
    let backup_codes = repo.verify_and_enable_two_factor(&current_user.id, payload.code.trim(), &key).await?;

    let _ = repo
        .log_activity(
            &current_user.id,
            ActivityAction::TwoFactorEnabled,
            json!({}),
            client_ip.0.as_deref(),
            user_agent.0.as_deref(),
        )
        .await;

    Ok(Json(BackupCodesResponse { success: true, backup_codes }))
}

/// Turn two-factor authentication off. Requires the account password.
#[openapi(tag = "Two-Factor Authentication")]
#[post("/disable", data = "<payload>")]
pub async fn disable_two_factor(
    repo: &State<Repository>,
    _rate_limit: AuthRateLimit,
    current_user: CurrentUser,
    user_agent: UserAgent,
    client_ip: ClientIp,
    payload: Json<TwoFactorDisableRequest>,
) -> Result<Json<SuccessResponse>, AppError> {
    payload.validate()?;
    let user = repo.get_user_by_id(&current_user.id).await?.ok_or(AppError::UserNotFound)?;
    if !user.two_factor_enabled {
        return Err(AppError::BadRequest("Two-factor authentication is not enabled".to_string()));
    }
    repo.verify_password(&user, &payload.password)
        .map_err(|_| AppError::BadRequest("Password is incorrect".to_string()))?;

    repo.disable_two_factor(&current_user.id).await?;

    let _ = repo
        .log_activity(
            &current_user.id,
            ActivityAction::TwoFactorDisabled,
            json!({}),
            client_ip.0.as_deref(),
            user_agent.0.as_deref(),
        )
        .await;

    Ok(Json(SuccessResponse::ok()))
}

/// Replace every backup code. Requires a live authenticator code.
#[openapi(tag = "Two-Factor Authentication")]
#[post("/backup-codes", data = "<payload>")]
#[allow(clippy::too_many_arguments)]
pub async fn regenerate_backup_codes(
    repo: &State<Repository>,
    config: &State<Config>,
    _rate_limit: AuthRateLimit,
    current_user: CurrentUser,
    user_agent: UserAgent,
    client_ip: ClientIp,
    payload: Json<TwoFactorVerifyRequest>,
) -> Result<Json<BackupCodesResponse>, AppError> {
    payload.validate()?;
    let key = encryption_key(config)?;
    let backup_codes = repo.regenerate_backup_codes(&current_user.id, payload.code.trim(), &key).await?;

    let _ = repo
        .log_activity(
            &current_user.id,
            ActivityAction::BackupCodesRegenerated,
            json!({}),
            client_ip.0.as_deref(),
            user_agent.0.as_deref(),
        )
        .await;

    Ok(Json(BackupCodesResponse { success: true, backup_codes }))
}

#[openapi(tag = "Two-Factor Authentication")]
#[get("/status")]
pub async fn get_two_factor_status(repo: &State<Repository>, _rate_limit: RateLimit, current_user: CurrentUser) -> Result<Json<TwoFactorStatus>, AppError> {
    Ok(Json(repo.two_factor_status(&current_user.id).await?))
}

pub fn routes() -> (Vec<rocket::Route>, okapi::openapi3::OpenApi) {
    rocket_okapi::openapi_get_routes_spec![
        setup_two_factor,
        verify_two_factor,
        disable_two_factor,
        regenerate_backup_codes,
        get_two_factor_status
    ]
}
