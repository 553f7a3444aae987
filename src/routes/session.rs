use crate::auth::{CurrentUser, clear_session_cookies};
use crate::database::repository::Repository;
use crate::error::app_error::AppError;
use crate::middleware::rate_limit::RateLimit;
use crate::middleware::{ClientIp, UserAgent};
use crate::models::activity::ActivityAction;
use crate::models::session::{RevokedSessionsResponse, SessionResponse};
use rocket::http::CookieJar;
use rocket::serde::json::Json;
use rocket::{State, delete, get, post};
use rocket_okapi::openapi;
use serde_json::json;

/// Active sessions of the signed-in user, most recently active first
#[openapi(tag = "Sessions")]
#[get("/")]
pub async fn list_sessions(repo: &State<Repository>, _rate_limit: RateLimit, current_user: CurrentUser) -> Result<Json<Vec<SessionResponse>>, AppError> {
    let mut sessions: Vec<SessionResponse> = repo
        .list_sessions(&current_user.id)
        .await?
        .iter()
        .map(|s| SessionResponse::from_session(s, &current_user.session_id))
        .collect();
    sessions.sort_by(|a, b| b.last_active.cmp(&a.last_active));
    Ok(Json(sessions))
}

/// Sign out one session. Revoking the current session also clears its cookies.
#[openapi(tag = "Sessions")]
#[delete("/<session_id>")]
pub async fn revoke_session(
    repo: &State<Repository>,
    cookies: &CookieJar<'_>,
    _rate_limit: RateLimit,
    current_user: CurrentUser,
    user_agent: UserAgent,
    client_ip: ClientIp,
    session_id: &str,
) -> Result<Json<RevokedSessionsResponse>, AppError> {
    if !repo.delete_session(&current_user.id, session_id).await? {
        return Err(AppError::not_found("Session"));
    }

    let _ = repo
        .log_activity(
            &current_user.id,
            ActivityAction::SessionRevoked,
            json!({ "current": session_id == current_user.session_id }),
            client_ip.0.as_deref(),
            user_agent.0.as_deref(),
        )
        .await;

    if session_id == current_user.session_id {
        clear_session_cookies(cookies);
    }

    Ok(Json(RevokedSessionsResponse { success: true, revoked: 1 }))
}

/// Sign out every session except the one making the request
#[openapi(tag = "Sessions")]
#[post("/revoke-others")]
pub async fn revoke_other_sessions(
    repo: &State<Repository>,
    _rate_limit: RateLimit,
    current_user: CurrentUser,
    user_agent: UserAgent,
    client_ip: ClientIp,
) -> Result<Json<RevokedSessionsResponse>, AppError> {
    let revoked = repo.delete_other_sessions(&current_user.id, &current_user.session_id).await?;

    if revoked > 0 {
        let _ = repo
            .log_activity(
                &current_user.id,
                ActivityAction::SessionRevoked,
                json!({ "revoked": revoked }),
                client_ip.0.as_deref(),
                user_agent.0.as_deref(),
            )
            .await;
    }

    Ok(Json(RevokedSessionsResponse { success: true, revoked }))
}

pub fn routes() -> (Vec<rocket::Route>, okapi::openapi3::OpenApi) {
    rocket_okapi::openapi_get_routes_spec![list_sessions, revoke_session, revoke_other_sessions]
}
