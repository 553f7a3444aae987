use crate::auth::CurrentUser;
use crate::database::repository::Repository;
use crate::error::app_error::AppError;
use crate::middleware::rate_limit::RateLimit;
use crate::models::auth::SuccessResponse;
use crate::models::notification::{MarkedReadResponse, Notification, UnreadCount, notification_limit};
use rocket::serde::json::Json;
use rocket::{State, delete, get, post};
use rocket_okapi::openapi;
use uuid::Uuid;

/// Newest first. `unread=true` filters before paging.
#[openapi(tag = "Notifications")]
#[get("/?<limit>&<offset>&<unread>")]
pub async fn list_notifications(
    repo: &State<Repository>,
    _rate_limit: RateLimit,
    current_user: CurrentUser,
    limit: Option<usize>,
    offset: Option<usize>,
    unread: Option<bool>,
) -> Result<Json<Vec<Notification>>, AppError> {
    let notifications = repo
        .list_notifications(&current_user.id, notification_limit(limit), offset.unwrap_or(0), unread.unwrap_or(false))
        .await?;
    Ok(Json(notifications))
}

#[openapi(tag = "Notifications")]
#[get("/unread-count")]
pub async fn unread_count(repo: &State<Repository>, _rate_limit: RateLimit, current_user: CurrentUser) -> Result<Json<UnreadCount>, AppError> {
    let count = repo.unread_notification_count(&current_user.id).await?;
    Ok(Json(UnreadCount { count }))
}

#[openapi(tag = "Notifications")]
#[post("/<id>/read")]
pub async fn mark_read(repo: &State<Repository>, _rate_limit: RateLimit, current_user: CurrentUser, id: &str) -> Result<Json<Notification>, AppError> {
    let uuid = Uuid::parse_str(id)?;
    Ok(Json(repo.mark_notification_read(&uuid, &current_user.id).await?))
}

#[openapi(tag = "Notifications")]
#[post("/read-all")]
pub async fn mark_all_read(repo: &State<Repository>, _rate_limit: RateLimit, current_user: CurrentUser) -> Result<Json<MarkedReadResponse>, AppError> {
    let updated = repo.mark_all_notifications_read(&current_user.id).await?;
    Ok(Json(MarkedReadResponse { success: true, updated }))
}

#[openapi(tag = "Notifications")]
#[delete("/<id>")]
pub async fn delete_notification(repo: &State<Repository>, _rate_limit: RateLimit, current_user: CurrentUser, id: &str) -> Result<Json<SuccessResponse>, AppError> {
    let uuid = Uuid::parse_str(id)?;
    repo.delete_notification(&uuid, &current_user.id).await?;
    Ok(Json(SuccessResponse::ok()))
}

pub fn routes() -> (Vec<rocket::Route>, okapi::openapi3::OpenApi) {
    rocket_okapi::openapi_get_routes_spec![list_notifications, unread_count, mark_read, mark_all_read, delete_notification]
}

#[cfg(test)]
mod tests {
    use crate::models::notification::{NewNotification, NotificationType};
    use crate::test_utils::{API, client_repo, create_verified_user, login, signed_in_user, test_client};
    use rocket::http::Status;
    use rocket::local::asynchronous::Client;
    use serde_json::Value;
    use uuid::Uuid;

    fn new_for(user_id: Uuid, title: &str) -> NewNotification {
        NewNotification {
            user_id,
            notification_type: NotificationType::Message,
            title: title.to_string(),
            message: format!("{} body", title),
            source_id: None,
            source_type: None,
        }
    }

    async fn get_json(client: &Client, path: &str) -> Value {
        client
            .get(format!("{}/notifications{}", API, path))
            .dispatch()
            .await
            .into_json()
            .await
            .expect("notifications body")
    }

    #[rocket::async_test]
    async fn unread_count_follows_reads() {
        let client = test_client().await;
        let user = signed_in_user(&client, "ada@example.com").await;
        let repo = client_repo(&client);
        let first = repo.create_notification(new_for(user.id, "first")).await.unwrap();
        repo.create_notification(new_for(user.id, "second")).await.unwrap();
        repo.create_notification(new_for(user.id, "third")).await.unwrap();

        assert_eq!(get_json(&client, "/unread-count").await["count"], 3);
        let page = get_json(&client, "?limit=2&offset=1").await;
        let titles: Vec<&str> = page.as_array().unwrap().iter().filter_map(|n| n["title"].as_str()).collect();
        assert_eq!(titles, vec!["second", "first"]);

        let response = client.post(format!("{}/notifications/{}/read", API, first.id)).dispatch().await;
        assert_eq!(response.status(), Status::Ok);
        assert_eq!(get_json(&client, "/unread-count").await["count"], 2);
        assert_eq!(get_json(&client, "?unread=true").await.as_array().map(Vec::len), Some(2));

        let response = client.post(format!("{}/notifications/read-all", API)).dispatch().await;
        let body: Value = response.into_json().await.expect("read-all body");
        assert_eq!(body["updated"], 2);
        assert_eq!(get_json(&client, "/unread-count").await["count"], 0);
    }

    #[rocket::async_test]
    async fn others_cannot_touch_my_notifications() {
        let client = test_client().await;
        let repo = client_repo(&client);
        let ada = create_verified_user(repo, "ada@example.com").await;
        let notification = repo.create_notification(new_for(ada.id, "private")).await.unwrap();

        signed_in_user(&client, "eve@example.com").await;
        let response = client.post(format!("{}/notifications/{}/read", API, notification.id)).dispatch().await;
        assert_eq!(response.status(), Status::Forbidden);
        let response = client.delete(format!("{}/notifications/{}", API, notification.id)).dispatch().await;
        assert_eq!(response.status(), Status::Forbidden);

        login(&client, "ada@example.com").await;
        let response = client.delete(format!("{}/notifications/{}", API, notification.id)).dispatch().await;
        assert_eq!(response.status(), Status::Ok);
        assert_eq!(get_json(&client, "").await.as_array().map(Vec::len), Some(0));
    }
}
