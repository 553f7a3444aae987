use crate::config::SessionConfig;
use crate::database::repository::Repository;
use crate::error::app_error::AppError;
use rocket::http::{Cookie, CookieJar, SameSite, Status};
use rocket::outcome::Outcome;
use rocket::request::{FromRequest, Outcome as RequestOutcome, Request};
use rocket_okapi::r#gen::OpenApiGenerator;
use rocket_okapi::okapi::openapi3::{Object, RefOr, Response as OpenApiResponse, Responses, SecurityRequirement, SecurityScheme, SecuritySchemeData};
use rocket_okapi::request::{OpenApiFromRequest, RequestHeaderInput};
use serde::Serialize;
use uuid::Uuid;

pub const USER_COOKIE: &str = "user_id";
pub const SESSION_COOKIE: &str = "session_id";

#[derive(Debug, Clone, Serialize)]
pub struct CurrentUser {
    pub id: Uuid,
    pub session_id: String,
}

fn session_cookie(name: &'static str, value: String, config: &SessionConfig) -> Cookie<'static> {
    Cookie::build((name, value))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Strict)
        .secure(config.cookie_secure)
        .max_age(rocket::time::Duration::seconds(config.max_age_seconds))
        .build()
}

pub fn set_session_cookies(cookies: &CookieJar<'_>, config: &SessionConfig, user_id: &Uuid, session_id: &str) {
    cookies.add_private(session_cookie(USER_COOKIE, user_id.to_string(), config));
    cookies.add_private(session_cookie(SESSION_COOKIE, session_id.to_string(), config));
}

pub fn clear_session_cookies(cookies: &CookieJar<'_>) {
    cookies.remove_private(Cookie::build(USER_COOKIE).path("/").build());
    cookies.remove_private(Cookie::build(SESSION_COOKIE).path("/").build());
}

/// The user id and session id carried by the private cookies, if both are present and well formed.
pub(crate) fn read_session_cookies(cookies: &CookieJar<'_>) -> Option<(Uuid, String)> {
    let user_id = Uuid::parse_str(cookies.get_private(USER_COOKIE)?.value()).ok()?;
    let session_id = cookies.get_private(SESSION_COOKIE)?.value().to_string();
    if session_id.is_empty() {
        return None;
    }
    Some((user_id, session_id))
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for CurrentUser {
    type Error = AppError;

    async fn from_request(req: &'r Request<'_>) -> RequestOutcome<Self, Self::Error> {
        let Some((user_id, session_id)) = read_session_cookies(req.cookies()) else {
            return Outcome::Error((Status::Unauthorized, AppError::Unauthorized));
        };

        let repo = match req.rocket().state::<Repository>() {
            Some(repo) => repo,
            None => return Outcome::Error((Status::InternalServerError, AppError::internal("Repository is not managed"))),
        };

        match repo.get_session_user(&user_id, &session_id).await {
            Ok(Some(user)) => {
                if let Err(e) = repo.update_session_activity(&user, &session_id).await {
                    tracing::warn!(error = ?e, user_id = %user.id, "failed to record session activity");
                }
                let current_user = CurrentUser { id: user.id, session_id };
                req.local_cache(|| Some(current_user.clone()));
                Outcome::Success(current_user)
            }
            Ok(None) => Outcome::Error((Status::Unauthorized, AppError::Unauthorized)),
            Err(err) => Outcome::Error((Status::InternalServerError, err)),
        }
    }
}

const SECURITY_SCHEME: &str = "sessionCookies";

impl<'a> OpenApiFromRequest<'a> for CurrentUser {
    fn from_request_input(_gen: &mut OpenApiGenerator, _name: String, _required: bool) -> rocket_okapi::Result<RequestHeaderInput> {
        let scheme = SecurityScheme {
            description: Some("Private `user_id` and `session_id` cookies set by POST /auth/login.".to_string()),
            data: SecuritySchemeData::ApiKey {
                name: SESSION_COOKIE.to_string(),
                location: "cookie".to_string(),
            },
            extensions: Object::default(),
        };
        let mut requirement = SecurityRequirement::new();
        requirement.insert(SECURITY_SCHEME.to_string(), Vec::new());
        Ok(RequestHeaderInput::Security(SECURITY_SCHEME.to_string(), scheme, requirement))
    }

    fn get_responses(_gen: &mut OpenApiGenerator) -> rocket_okapi::Result<Responses> {
        let mut responses = Responses::default();
        responses.responses.insert(
            "401".to_string(),
            RefOr::Object(OpenApiResponse {
                description: "No valid session".to_string(),
                ..Default::default()
            }),
        );
        Ok(responses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_cookie_attributes() {
        let config = SessionConfig {
            cookie_secure: true,
            max_age_seconds: 604_800,
        };
        let cookie = session_cookie(SESSION_COOKIE, "abc".to_string(), &config);
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Strict));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.max_age(), Some(rocket::time::Duration::seconds(604_800)));
    }
}
