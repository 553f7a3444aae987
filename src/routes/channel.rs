use crate::auth::CurrentUser;
use crate::database::repository::Repository;
use crate::error::app_error::AppError;
use crate::middleware::rate_limit::RateLimit;
use crate::models::auth::SuccessResponse;
use crate::models::channel::{Channel, ChannelUpdateRequest};
use crate::models::document::Document;
use crate::models::message::{Message, MessageRequest, message_limit};
use crate::realtime::{RealtimeHub, ServerEvent};
use crate::service::notification::notify_mentions;
use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::{State, delete, get, post, put};
use rocket_okapi::openapi;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

/// Parses the optional `before` cursor of a message listing.
pub(crate) fn parse_cursor(before: Option<&str>) -> Result<Option<Uuid>, AppError> {
    before.map(Uuid::parse_str).transpose().map_err(AppError::from)
}

#[openapi(tag = "Channels")]
#[get("/<id>")]
pub async fn get_channel(repo: &State<Repository>, _rate_limit: RateLimit, current_user: CurrentUser, id: &str) -> Result<Json<Channel>, AppError> {
    let uuid = Uuid::parse_str(id)?;
    let (channel, _) = repo.channel_for_member(&uuid, &current_user.id).await?;
    Ok(Json(channel))
}

/// Workspace owner only
#[openapi(tag = "Channels")]
#[put("/<id>", data = "<payload>")]
pub async fn update_channel(
    repo: &State<Repository>,
    _rate_limit: RateLimit,
    current_user: CurrentUser,
    id: &str,
    payload: Json<ChannelUpdateRequest>,
) -> Result<Json<Channel>, AppError> {
    payload.validate()?;
    let uuid = Uuid::parse_str(id)?;
    Ok(Json(repo.update_channel(&uuid, &payload, &current_user.id).await?))
}

/// Workspace owner only. Messages go with the channel; its documents stay in the workspace.
#[openapi(tag = "Channels")]
#[delete("/<id>")]
pub async fn delete_channel(
    repo: &State<Repository>,
    hub: &State<Arc<RealtimeHub>>,
    _rate_limit: RateLimit,
    current_user: CurrentUser,
    id: &str,
) -> Result<Json<SuccessResponse>, AppError> {
    let uuid = Uuid::parse_str(id)?;
    repo.delete_channel(&uuid, &current_user.id).await?;
    hub.close_channel(&uuid).await;
    Ok(Json(SuccessResponse::ok()))
}

/// Newest first. Pass the oldest id seen as `before` to page back.
#[openapi(tag = "Channels")]
#[get("/<id>/messages?<limit>&<before>")]
pub async fn list_messages(
    repo: &State<Repository>,
    _rate_limit: RateLimit,
    current_user: CurrentUser,
    id: &str,
    limit: Option<usize>,
    before: Option<&str>,
) -> Result<Json<Vec<Message>>, AppError> {
    let uuid = Uuid::parse_str(id)?;
    let cursor = parse_cursor(before)?;
    let messages = repo
        .list_channel_messages(&uuid, &current_user.id, message_limit(limit), cursor.as_ref())
        .await?;
    Ok(Json(messages))
}

#[openapi(tag = "Channels")]
#[post("/<id>/messages", data = "<payload>")]
pub async fn post_message(
    repo: &State<Repository>,
    hub: &State<Arc<RealtimeHub>>,
    _rate_limit: RateLimit,
    current_user: CurrentUser,
    id: &str,
    payload: Json<MessageRequest>,
) -> Result<(Status, Json<Message>), AppError> {
    payload.validate()?;
    let uuid = Uuid::parse_str(id)?;
    let (channel, _) = repo.channel_for_member(&uuid, &current_user.id).await?;
    let message = repo.create_channel_message(&uuid, &payload, &current_user.id).await?;

    hub.send_to_channel(&channel.id, ServerEvent::MessageNew(message.clone())).await;
    if let Some(author) = repo.get_user_by_id(&current_user.id).await? {
        notify_mentions(repo, hub, &author, &channel, &message).await;
    }

    Ok((Status::Created, Json(message)))
}

#[openapi(tag = "Channels")]
#[get("/<id>/pinned")]
pub async fn list_pinned(repo: &State<Repository>, _rate_limit: RateLimit, current_user: CurrentUser, id: &str) -> Result<Json<Vec<Message>>, AppError> {
    let uuid = Uuid::parse_str(id)?;
    repo.channel_for_member(&uuid, &current_user.id).await?;
    Ok(Json(repo.list_pinned_messages(&uuid).await?))
}

#[openapi(tag = "Channels")]
#[get("/<id>/documents")]
pub async fn list_documents(repo: &State<Repository>, _rate_limit: RateLimit, current_user: CurrentUser, id: &str) -> Result<Json<Vec<Document>>, AppError> {
    let uuid = Uuid::parse_str(id)?;
    repo.channel_for_member(&uuid, &current_user.id).await?;
    Ok(Json(repo.list_channel_documents(&uuid).await?))
}

pub fn routes() -> (Vec<rocket::Route>, okapi::openapi3::OpenApi) {
    rocket_okapi::openapi_get_routes_spec![get_channel, update_channel, delete_channel, list_messages, post_message, list_pinned, list_documents]
}

#[cfg(test)]
mod tests {
    use crate::test_utils::{API, client_repo, create_channel, create_verified_user, create_workspace, login, signed_in_user, test_client};
    use rocket::http::{ContentType, Status};
    use rocket::local::asynchronous::Client;
    use serde_json::{Value, json};

    async fn post_message(client: &Client, channel: &str, content: &str) -> (Status, Value) {
        let response = client
            .post(format!("{}/channels/{}/messages", API, channel))
            .header(ContentType::JSON)
            .body(json!({ "content": content }).to_string())
            .dispatch()
            .await;
        let status = response.status();
        (status, response.into_json::<Value>().await.unwrap_or(Value::Null))
    }

    async fn list(client: &Client, path: &str) -> (Status, Vec<Value>) {
        let response = client.get(format!("{}{}", API, path)).dispatch().await;
        let status = response.status();
        (status, response.into_json::<Vec<Value>>().await.unwrap_or_default())
    }

    #[rocket::async_test]
    async fn messages_page_newest_first() {
        let client = test_client().await;
        let alice = signed_in_user(&client, "alice@example.com").await;
        let repo = client_repo(&client);
        let workspace = create_workspace(repo, &alice.id, "Design").await;
        let channel = create_channel(repo, &workspace.id, &alice.id, "general").await;
        let channel_id = channel.id.to_string();

        for n in 1..=5 {
            let (status, _) = post_message(&client, &channel_id, &format!("message {}", n)).await;
            assert_eq!(status, Status::Created);
        }

        let (_, page) = list(&client, &format!("/channels/{}/messages?limit=2", channel_id)).await;
        let contents: Vec<&str> = page.iter().filter_map(|m| m["content"].as_str()).collect();
        assert_eq!(contents, vec!["message 5", "message 4"]);

        let cursor = page[1]["id"].as_str().expect("message id");
        let (_, older) = list(&client, &format!("/channels/{}/messages?limit=10&before={}", channel_id, cursor)).await;
        let contents: Vec<&str> = older.iter().filter_map(|m| m["content"].as_str()).collect();
        assert_eq!(contents, vec!["message 3", "message 2", "message 1"]);

        let (status, _) = list(&client, &format!("/channels/{}/messages?before={}", channel_id, uuid::Uuid::new_v4())).await;
        assert_eq!(status, Status::BadRequest);
    }

    #[rocket::async_test]
    async fn non_members_cannot_read_or_post() {
        let client = test_client().await;
        let repo = client_repo(&client);
        let alice = create_verified_user(repo, "alice@example.com").await;
        let workspace = create_workspace(repo, &alice.id, "Design").await;
        let channel = create_channel(repo, &workspace.id, &alice.id, "general").await;

        signed_in_user(&client, "eve@example.com").await;
        let (status, _) = post_message(&client, &channel.id.to_string(), "hello").await;
        assert_eq!(status, Status::Forbidden);
        let (status, _) = list(&client, &format!("/channels/{}/messages", channel.id)).await;
        assert_eq!(status, Status::Forbidden);
    }

    #[rocket::async_test]
    async fn mention_creates_notification() {
        let client = test_client().await;
        let repo = client_repo(&client);
        let alice = create_verified_user(repo, "alice@example.com").await;
        let bob = create_verified_user(repo, "bob@example.com").await;
        let workspace = create_workspace(repo, &alice.id, "Design").await;
        repo.add_workspace_member(&workspace.id, &bob.id).await.unwrap();
        let channel = create_channel(repo, &workspace.id, &alice.id, "general").await;

        login(&client, "bob@example.com").await;
        let (status, _) = post_message(&client, &channel.id.to_string(), &format!("@{} take a look", alice.id)).await;
        assert_eq!(status, Status::Created);

        let notifications = repo.list_notifications(&alice.id, 10, 0, false).await.unwrap();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].title, "You were mentioned");
    }

    #[rocket::async_test]
    async fn only_owner_renames_channel() {
        let client = test_client().await;
        let repo = client_repo(&client);
        let alice = create_verified_user(repo, "alice@example.com").await;
        let bob = create_verified_user(repo, "bob@example.com").await;
        let workspace = create_workspace(repo, &alice.id, "Design").await;
        repo.add_workspace_member(&workspace.id, &bob.id).await.unwrap();
        let channel = create_channel(repo, &workspace.id, &alice.id, "general").await;

        login(&client, "bob@example.com").await;
        let response = client
            .put(format!("{}/channels/{}", API, channel.id))
            .header(ContentType::JSON)
            .body(json!({ "name": "random" }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Forbidden);

        login(&client, "alice@example.com").await;
        let response = client
            .put(format!("{}/channels/{}", API, channel.id))
            .header(ContentType::JSON)
            .body(json!({ "name": "random" }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
        let body: Value = response.into_json().await.expect("channel body");
        assert_eq!(body["name"], "random");
    }
}
