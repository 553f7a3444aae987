use crate::auth::CurrentUser;
use crate::database::repository::Repository;
use crate::error::app_error::AppError;
use crate::middleware::rate_limit::RateLimit;
use crate::models::auth::SuccessResponse;
use crate::models::message::{EditMessageRequest, Message, ReactionRequest};
use crate::realtime::{RealtimeHub, ServerEvent};
use crate::service::notification::notify_reaction;
use rocket::serde::json::Json;
use rocket::{State, delete, post, put};
use rocket_okapi::openapi;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

/// Channel messages go to the channel room, direct messages to both participants.
async fn publish(hub: &RealtimeHub, message: &Message, event: ServerEvent) {
    match message.recipient_id {
        Some(recipient) => {
            hub.send_to_user(&message.user_id, event.clone()).await;
            if recipient != message.user_id {
                hub.send_to_user(&recipient, event).await;
            }
        }
        None => hub.send_to_channel(&message.channel_id, event).await,
    }
}

/// Author only
#[openapi(tag = "Messages")]
#[put("/<id>", data = "<payload>")]
pub async fn edit_message(
    repo: &State<Repository>,
    hub: &State<Arc<RealtimeHub>>,
    _rate_limit: RateLimit,
    current_user: CurrentUser,
    id: &str,
    payload: Json<EditMessageRequest>,
) -> Result<Json<Message>, AppError> {
    payload.validate()?;
    let uuid = Uuid::parse_str(id)?;
    let message = repo.edit_message(&uuid, &payload.content, &current_user.id).await?;
    publish(hub, &message, ServerEvent::MessageUpdated(message.clone())).await;
    Ok(Json(message))
}

/// Author only
#[openapi(tag = "Messages")]
#[delete("/<id>")]
pub async fn delete_message(
    repo: &State<Repository>,
    hub: &State<Arc<RealtimeHub>>,
    _rate_limit: RateLimit,
    current_user: CurrentUser,
    id: &str,
) -> Result<Json<SuccessResponse>, AppError> {
    let uuid = Uuid::parse_str(id)?;
    let message = repo.delete_message(&uuid, &current_user.id).await?;
    let event = ServerEvent::MessageDeleted {
        message_id: message.id,
        channel_id: message.channel_id,
    };
    publish(hub, &message, event).await;
    Ok(Json(SuccessResponse::ok()))
}

/// Pins an unpinned message and unpins a pinned one
#[openapi(tag = "Messages")]
#[post("/<id>/pin")]
pub async fn toggle_pin(
    repo: &State<Repository>,
    hub: &State<Arc<RealtimeHub>>,
    _rate_limit: RateLimit,
    current_user: CurrentUser,
    id: &str,
) -> Result<Json<Message>, AppError> {
    let uuid = Uuid::parse_str(id)?;
    let message = repo.toggle_pin(&uuid, &current_user.id).await?;
    publish(hub, &message, ServerEvent::MessageUpdated(message.clone())).await;
    Ok(Json(message))
}

#[openapi(tag = "Messages")]
#[post("/<id>/reactions", data = "<payload>")]
pub async fn add_reaction(
    repo: &State<Repository>,
    hub: &State<Arc<RealtimeHub>>,
    _rate_limit: RateLimit,
    current_user: CurrentUser,
    id: &str,
    payload: Json<ReactionRequest>,
) -> Result<Json<Message>, AppError> {
    payload.validate()?;
    let uuid = Uuid::parse_str(id)?;
    let message = repo.add_reaction(&uuid, &payload.emoji, &current_user.id).await?;
    publish(hub, &message, ServerEvent::MessageUpdated(message.clone())).await;

    if let Some(reactor) = repo.get_user_by_id(&current_user.id).await? {
        notify_reaction(repo, hub, &reactor, &message, &payload.emoji).await;
    }
    Ok(Json(message))
}

#[openapi(tag = "Messages")]
#[delete("/<id>/reactions", data = "<payload>")]
pub async fn remove_reaction(
    repo: &State<Repository>,
    hub: &State<Arc<RealtimeHub>>,
    _rate_limit: RateLimit,
    current_user: CurrentUser,
    id: &str,
    payload: Json<ReactionRequest>,
) -> Result<Json<Message>, AppError> {
    payload.validate()?;
    let uuid = Uuid::parse_str(id)?;
    let message = repo.remove_reaction(&uuid, &payload.emoji, &current_user.id).await?;
    publish(hub, &message, ServerEvent::MessageUpdated(message.clone())).await;
    Ok(Json(message))
}

pub fn routes() -> (Vec<rocket::Route>, okapi::openapi3::OpenApi) {
    rocket_okapi::openapi_get_routes_spec![edit_message, delete_message, toggle_pin, add_reaction, remove_reaction]
}

#[cfg(test)]
mod tests {
    use crate::models::message::MessageRequest;
    use crate::test_utils::{API, client_repo, create_channel, create_verified_user, create_workspace, login, test_client};
    use rocket::http::{ContentType, Status};
    use serde_json::{Value, json};

    fn text(content: &str) -> MessageRequest {
        MessageRequest {
            content: content.to_string(),
            reply_to_id: None,
            attachments: Vec::new(),
        }
    }

    #[rocket::async_test]
    async fn only_author_edits_and_deletes() {
        let client = test_client().await;
        let repo = client_repo(&client);
        let alice = create_verified_user(repo, "alice@example.com").await;
        let bob = create_verified_user(repo, "bob@example.com").await;
        let workspace = create_workspace(repo, &alice.id, "Design").await;
        repo.add_workspace_member(&workspace.id, &bob.id).await.unwrap();
        let channel = create_channel(repo, &workspace.id, &alice.id, "general").await;
        let message = repo.create_channel_message(&channel.id, &text("first draft"), &alice.id).await.unwrap();

        login(&client, "bob@example.com").await;
        let response = client
            .put(format!("{}/messages/{}", API, message.id))
            .header(ContentType::JSON)
            .body(json!({ "content": "hijacked" }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Forbidden);
        let response = client.delete(format!("{}/messages/{}", API, message.id)).dispatch().await;
        assert_eq!(response.status(), Status::Forbidden);

        login(&client, "alice@example.com").await;
        let response = client
            .put(format!("{}/messages/{}", API, message.id))
            .header(ContentType::JSON)
            .body(json!({ "content": "final" }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
        let body: Value = response.into_json().await.expect("message body");
        assert_eq!(body["content"], "final");
        assert_eq!(body["edited"], true);

        let response = client.delete(format!("{}/messages/{}", API, message.id)).dispatch().await;
        assert_eq!(response.status(), Status::Ok);
        assert!(repo.get_message(&message.id).await.unwrap().is_none());
    }

    #[rocket::async_test]
    async fn reactions_and_pins() {
        let client = test_client().await;
        let repo = client_repo(&client);
        let alice = create_verified_user(repo, "alice@example.com").await;
        let bob = create_verified_user(repo, "bob@example.com").await;
        let workspace = create_workspace(repo, &alice.id, "Design").await;
        repo.add_workspace_member(&workspace.id, &bob.id).await.unwrap();
        let channel = create_channel(repo, &workspace.id, &alice.id, "general").await;
        let message = repo.create_channel_message(&channel.id, &text("ship it"), &alice.id).await.unwrap();

        login(&client, "bob@example.com").await;
        let response = client
            .post(format!("{}/messages/{}/reactions", API, message.id))
            .header(ContentType::JSON)
            .body(json!({ "emoji": "👍" }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
        let body: Value = response.into_json().await.expect("message body");
        assert_eq!(body["reactions"]["👍"], json!([bob.id]));

        let notifications = repo.list_notifications(&alice.id, 10, 0, false).await.unwrap();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].message, "bob reacted with 👍 to your message");

        let response = client
            .delete(format!("{}/messages/{}/reactions", API, message.id))
            .header(ContentType::JSON)
            .body(json!({ "emoji": "👍" }).to_string())
            .dispatch()
            .await;
        let body: Value = response.into_json().await.expect("message body");
        assert_eq!(body["reactions"], json!({}));

        let response = client.post(format!("{}/messages/{}/pin", API, message.id)).dispatch().await;
        let body: Value = response.into_json().await.expect("message body");
        assert_eq!(body["isPinned"], true);

        let pinned: Vec<Value> = client
            .get(format!("{}/channels/{}/pinned", API, channel.id))
            .dispatch()
            .await
            .into_json()
            .await
            .expect("pinned body");
        assert_eq!(pinned.len(), 1);

        client.post(format!("{}/messages/{}/pin", API, message.id)).dispatch().await;
        assert!(repo.list_pinned_messages(&channel.id).await.unwrap().is_empty());
    }
}
