use crate::auth::CurrentUser;
use crate::database::repository::Repository;
use crate::error::app_error::AppError;
use crate::middleware::rate_limit::RateLimit;
use crate::models::auth::SuccessResponse;
use crate::models::friendship::{FriendEntry, FriendRequest, Friendship};
use crate::models::notification::{NewNotification, NotificationType, SourceType};
use crate::realtime::RealtimeHub;
use crate::service::notification::notify;
use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::{State, delete, get, post};
use rocket_okapi::openapi;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

fn friendship_notification(recipient: Uuid, friendship: &Friendship, title: &str, message: String) -> NewNotification {
    NewNotification {
        user_id: recipient,
        notification_type: NotificationType::FriendRequest,
        title: title.to_string(),
        message,
        source_id: Some(friendship.id),
        source_type: Some(SourceType::Friendship),
    }
}

#[openapi(tag = "Friends")]
#[get("/")]
pub async fn list_friends(repo: &State<Repository>, _rate_limit: RateLimit, current_user: CurrentUser) -> Result<Json<Vec<FriendEntry>>, AppError> {
    Ok(Json(repo.list_friends(&current_user.id).await?))
}

/// Incoming requests waiting for an answer
#[openapi(tag = "Friends")]
#[get("/pending")]
pub async fn list_pending(repo: &State<Repository>, _rate_limit: RateLimit, current_user: CurrentUser) -> Result<Json<Vec<FriendEntry>>, AppError> {
    Ok(Json(repo.list_pending_requests(&current_user.id).await?))
}

#[openapi(tag = "Friends")]
#[get("/blocked")]
pub async fn list_blocked(repo: &State<Repository>, _rate_limit: RateLimit, current_user: CurrentUser) -> Result<Json<Vec<FriendEntry>>, AppError> {
    Ok(Json(repo.list_blocked(&current_user.id).await?))
}

#[openapi(tag = "Friends")]
#[post("/requests", data = "<payload>")]
pub async fn send_request(
    repo: &State<Repository>,
    hub: &State<Arc<RealtimeHub>>,
    _rate_limit: RateLimit,
    current_user: CurrentUser,
    payload: Json<FriendRequest>,
) -> Result<(Status, Json<Friendship>), AppError> {
    payload.validate()?;
    let (friendship, target) = repo.send_friend_request(&current_user.id, &payload.email).await?;

    if let Some(sender) = repo.get_user_by_id(&current_user.id).await? {
        let message = format!("{} sent you a friend request", sender.name);
        notify(repo, hub, friendship_notification(target.id, &friendship, "Friend Request", message)).await;
    }

    Ok((Status::Created, Json(friendship)))
}

/// Recipient only
#[openapi(tag = "Friends")]
#[post("/requests/<id>/accept")]
pub async fn accept_request(
    repo: &State<Repository>,
    hub: &State<Arc<RealtimeHub>>,
    _rate_limit: RateLimit,
    current_user: CurrentUser,
    id: &str,
) -> Result<Json<Friendship>, AppError> {
    let uuid = Uuid::parse_str(id)?;
    let friendship = repo.accept_friend_request(&uuid, &current_user.id).await?;
    hub.refresh_presence(&[friendship.user_id, friendship.friend_id]).await;

    if let Some(accepter) = repo.get_user_by_id(&current_user.id).await? {
        let message = format!("{} accepted your friend request", accepter.name);
        notify(repo, hub, friendship_notification(friendship.user_id, &friendship, "Friend Request Accepted", message)).await;
    }

    Ok(Json(friendship))
}

/// Recipient only
#[openapi(tag = "Friends")]
#[post("/requests/<id>/reject")]
pub async fn reject_request(repo: &State<Repository>, _rate_limit: RateLimit, current_user: CurrentUser, id: &str) -> Result<Json<Friendship>, AppError> {
    let uuid = Uuid::parse_str(id)?;
    Ok(Json(repo.reject_friend_request(&uuid, &current_user.id).await?))
}

#[openapi(tag = "Friends")]
#[post("/<user_id>/block")]
pub async fn block_user(
    repo: &State<Repository>,
    hub: &State<Arc<RealtimeHub>>,
    _rate_limit: RateLimit,
    current_user: CurrentUser,
    user_id: &str,
) -> Result<Json<Friendship>, AppError> {
    let other = Uuid::parse_str(user_id)?;
    let friendship = repo.block_user(&current_user.id, &other).await?;
    hub.refresh_presence(&[current_user.id, other]).await;
    Ok(Json(friendship))
}

#[openapi(tag = "Friends")]
#[delete("/<user_id>/block")]
pub async fn unblock_user(repo: &State<Repository>, _rate_limit: RateLimit, current_user: CurrentUser, user_id: &str) -> Result<Json<SuccessResponse>, AppError> {
    let other = Uuid::parse_str(user_id)?;
    repo.unblock_user(&current_user.id, &other).await?;
    Ok(Json(SuccessResponse::ok()))
}

#[openapi(tag = "Friends")]
#[delete("/<user_id>")]
pub async fn remove_friend(
    repo: &State<Repository>,
    hub: &State<Arc<RealtimeHub>>,
    _rate_limit: RateLimit,
    current_user: CurrentUser,
    user_id: &str,
) -> Result<Json<SuccessResponse>, AppError> {
    let other = Uuid::parse_str(user_id)?;
    repo.remove_friend(&current_user.id, &other).await?;
    hub.refresh_presence(&[current_user.id, other]).await;
    Ok(Json(SuccessResponse::ok()))
}

pub fn routes() -> (Vec<rocket::Route>, okapi::openapi3::OpenApi) {
    rocket_okapi::openapi_get_routes_spec![
        list_friends,
        list_pending,
        list_blocked,
        send_request,
        accept_request,
        reject_request,
        block_user,
        unblock_user,
        remove_friend
    ]
}
