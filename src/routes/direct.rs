use crate::auth::CurrentUser;
use crate::database::repository::Repository;
use crate::error::app_error::AppError;
use crate::middleware::rate_limit::RateLimit;
use crate::models::message::{Message, MessageRequest, message_limit};
use crate::realtime::{RealtimeHub, ServerEvent};
use crate::routes::channel::parse_cursor;
use crate::service::notification::notify_direct_message;
use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::{State, get, post};
use rocket_okapi::openapi;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

/// Conversation with another user, newest first
#[openapi(tag = "Direct Messages")]
#[get("/<user_id>?<limit>&<before>")]
pub async fn list_direct_messages(
    repo: &State<Repository>,
    _rate_limit: RateLimit,
    current_user: CurrentUser,
    user_id: &str,
    limit: Option<usize>,
    before: Option<&str>,
) -> Result<Json<Vec<Message>>, AppError> {
    let other = Uuid::parse_str(user_id)?;
    let cursor = parse_cursor(before)?;
    let messages = repo
        .list_direct_messages(&current_user.id, &other, message_limit(limit), cursor.as_ref())
        .await?;
    Ok(Json(messages))
}

/// Requires a shared workspace or an accepted friendship, and no block either way
#[openapi(tag = "Direct Messages")]
#[post("/<user_id>", data = "<payload>")]
pub async fn send_direct_message(
    repo: &State<Repository>,
    hub: &State<Arc<RealtimeHub>>,
    _rate_limit: RateLimit,
    current_user: CurrentUser,
    user_id: &str,
    payload: Json<MessageRequest>,
) -> Result<(Status, Json<Message>), AppError> {
    payload.validate()?;
    let recipient = Uuid::parse_str(user_id)?;
    let message = repo.create_direct_message(&current_user.id, &recipient, &payload).await?;

    hub.send_to_user(&current_user.id, ServerEvent::MessageNew(message.clone())).await;
    hub.send_to_user(&recipient, ServerEvent::MessageNew(message.clone())).await;
    if let Some(sender) = repo.get_user_by_id(&current_user.id).await? {
        notify_direct_message(repo, hub, &sender, &recipient, &message).await;
    }

    Ok((Status::Created, Json(message)))
}

pub fn routes() -> (Vec<rocket::Route>, okapi::openapi3::OpenApi) {
    rocket_okapi::openapi_get_routes_spec![list_direct_messages, send_direct_message]
}
