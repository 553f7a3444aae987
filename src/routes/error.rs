use crate::middleware::rate_limit::RateLimitRetryAfter;
use rocket::http::Header;
use rocket::serde::Serialize;
use rocket::serde::json::Json;
use rocket::{Request, Responder, catch};

#[derive(Serialize)]
#[serde(crate = "rocket::serde")]
pub struct Error {
    pub success: bool,
    pub error: String,
}

fn error(message: &str) -> Json<Error> {
    Json(Error {
        success: false,
        error: message.to_string(),
    })
}

#[derive(Responder)]
#[response(status = 429, content_type = "json")]
pub struct TooManyRequests {
    inner: Json<Error>,
    retry_after: Header<'static>,
}

#[catch(400)]
pub fn bad_request(_: &Request) -> Json<Error> {
    error("Bad request")
}

#[catch(401)]
pub fn unauthorized(_: &Request) -> Json<Error> {
    error("Unauthorized")
}

#[catch(403)]
pub fn forbidden(_: &Request) -> Json<Error> {
    error("Forbidden")
}

#[catch(404)]
pub fn not_found(_: &Request) -> Json<Error> {
    error("Not found")
}

#[catch(409)]
pub fn conflict(_: &Request) -> Json<Error> {
    error("Conflict")
}

#[catch(422)]
pub fn unprocessable_entity(_: &Request) -> Json<Error> {
    error("Invalid request body")
}

#[catch(429)]
pub fn too_many_requests(req: &Request) -> TooManyRequests {
    let retry_after = req.local_cache(|| None::<RateLimitRetryAfter>).as_ref().map(|r| r.0).unwrap_or(60);
    TooManyRequests {
        inner: error("Too many requests. Please try again later."),
        retry_after: Header::new("Retry-After", retry_after.to_string()),
    }
}

#[catch(500)]
pub fn internal_error(_: &Request) -> Json<Error> {
    error(crate::error::app_error::GENERIC_ERROR_MESSAGE)
}

pub fn catchers() -> Vec<rocket::Catcher> {
    rocket::catchers![
        bad_request,
        unauthorized,
        forbidden,
        not_found,
        conflict,
        unprocessable_entity,
        too_many_requests,
        internal_error
    ]
}
