use crate::auth::CurrentUser;
use crate::database::repository::Repository;
use crate::error::app_error::AppError;
use crate::middleware::rate_limit::{AuthRateLimit, RateLimit};
use crate::middleware::{ClientIp, UserAgent};
use crate::models::activity::{Activity, ActivityAction, activity_limit};
use crate::models::auth::SuccessResponse;
use crate::models::user::{ChangePasswordRequest, SecuritySettingsRequest, StatusRequest, UpdateProfileRequest, UserResponse};
use crate::realtime::hub::RealtimeHub;
use rocket::serde::json::Json;
use rocket::{State, get, post, put};
use rocket_okapi::openapi;
use serde_json::json;
use std::sync::Arc;
use validator::Validate;

#[openapi(tag = "Users")]
#[put("/profile", data = "<payload>")]
pub async fn update_profile(
    repo: &State<Repository>,
    _rate_limit: RateLimit,
    current_user: CurrentUser,
    payload: Json<UpdateProfileRequest>,
) -> Result<Json<UserResponse>, AppError> {
    payload.validate()?;
    let user = repo.update_profile(&current_user.id, &payload).await?.ok_or(AppError::UserNotFound)?;
    Ok(Json(UserResponse::from(&user)))
}

/// Change the password. Every other session is signed out.
#[openapi(tag = "Users")]
#[post("/password", data = "<payload>")]
pub async fn change_password(
    repo: &State<Repository>,
    _rate_limit: AuthRateLimit,
    current_user: CurrentUser,
    user_agent: UserAgent,
    client_ip: ClientIp,
    payload: Json<ChangePasswordRequest>,
) -> Result<Json<SuccessResponse>, AppError> {
    payload.validate()?;
    repo.change_password(&current_user.id, &current_user.session_id, &payload.current_password, &payload.new_password)
        .await?;

    let _ = repo
        .log_activity(
            &current_user.id,
            ActivityAction::PasswordChanged,
            json!({}),
            client_ip.0.as_deref(),
            user_agent.0.as_deref(),
        )
        .await;

    Ok(Json(SuccessResponse::ok()))
}

#[openapi(tag = "Users")]
#[put("/security-settings", data = "<payload>")]
pub async fn update_security_settings(
    repo: &State<Repository>,
    _rate_limit: RateLimit,
    current_user: CurrentUser,
    user_agent: UserAgent,
    client_ip: ClientIp,
    payload: Json<SecuritySettingsRequest>,
) -> Result<Json<UserResponse>, AppError> {
    payload.validate()?;
    let user = repo
        .update_security_settings(&current_user.id, &payload)
        .await?
        .ok_or(AppError::UserNotFound)?;

    let _ = repo
        .log_activity(
            &current_user.id,
            ActivityAction::SecuritySettingsUpdated,
            serde_json::to_value(&user.security_settings).unwrap_or_default(),
            client_ip.0.as_deref(),
            user_agent.0.as_deref(),
        )
        .await;

    Ok(Json(UserResponse::from(&user)))
}

/// Set the presence status and push it to connected contacts
#[openapi(tag = "Users")]
#[put("/status", data = "<payload>")]
pub async fn update_status(
    repo: &State<Repository>,
    hub: &State<Arc<RealtimeHub>>,
    _rate_limit: RateLimit,
    current_user: CurrentUser,
    payload: Json<StatusRequest>,
) -> Result<Json<UserResponse>, AppError> {
    let user = repo
        .update_user_status(&current_user.id, payload.status)
        .await?
        .ok_or(AppError::UserNotFound)?;
    hub.broadcast_status(&user.id, user.status).await;
    Ok(Json(UserResponse::from(&user)))
}

/// Security log of the signed-in user, newest first
#[openapi(tag = "Users")]
#[get("/activities?<limit>")]
pub async fn list_activities(
    repo: &State<Repository>,
    _rate_limit: RateLimit,
    current_user: CurrentUser,
    limit: Option<usize>,
) -> Result<Json<Vec<Activity>>, AppError> {
    Ok(Json(repo.list_activities(&current_user.id, activity_limit(limit)).await?))
}

pub fn routes() -> (Vec<rocket::Route>, okapi::openapi3::OpenApi) {
    rocket_okapi::openapi_get_routes_spec![update_profile, change_password, update_security_settings, update_status, list_activities]
}

#[cfg(test)]
mod tests {
    use crate::test_utils::{API, TEST_PASSWORD, client_repo, signed_in_user, test_client};
    use rocket::http::{ContentType, Status};
    use rocket::local::asynchronous::Client;
    use serde_json::{Value, json};

    async fn send(client: &Client, put: bool, path: &str, body: Value) -> (Status, Value) {
        let url = format!("{}/users{}", API, path);
        let request = if put { client.put(url) } else { client.post(url) };
        let response = request.header(ContentType::JSON).body(body.to_string()).dispatch().await;
        let status = response.status();
        (status, response.into_json::<Value>().await.unwrap_or(Value::Null))
    }

    #[rocket::async_test]
    async fn profile_update_changes_name_only() {
        let client = test_client().await;
        signed_in_user(&client, "ada@example.com").await;

        let (status, body) = send(&client, true, "/profile", json!({ "name": "Ada Lovelace" })).await;
        assert_eq!(status, Status::Ok);
        assert_eq!(body["name"], "Ada Lovelace");
        assert_eq!(body["email"], "ada@example.com");
        assert!(body.get("passwordHash").is_none());

        let (status, _) = send(&client, true, "/profile", json!({ "image": "not a url" })).await;
        assert_eq!(status, Status::UnprocessableEntity);
    }

    #[rocket::async_test]
    async fn password_change_keeps_current_session_only() {
        let client = test_client().await;
        let user = signed_in_user(&client, "ada@example.com").await;
        let repo = client_repo(&client);
        repo.create_session(&user.id, "phone", "10.0.0.9").await.unwrap();

        let (status, body) = send(
            &client,
            false,
            "/password",
            json!({ "currentPassword": "Wrong1234", "newPassword": "Brandnew99", "confirmPassword": "Brandnew99" }),
        )
        .await;
        assert_eq!(status, Status::BadRequest);
        assert_eq!(body["error"], "Current password is incorrect");

        let (status, _) = send(
            &client,
            false,
            "/password",
            json!({ "currentPassword": TEST_PASSWORD, "newPassword": "Brandnew99", "confirmPassword": "Brandnew99" }),
        )
        .await;
        assert_eq!(status, Status::Ok);
        assert_eq!(repo.list_sessions(&user.id).await.unwrap().len(), 1);

        let response = client.get(format!("{}/auth/me", API)).dispatch().await;
        assert_eq!(response.status(), Status::Ok);

        let activities: Vec<Value> = client
            .get(format!("{}/users/activities?limit=5", API))
            .dispatch()
            .await
            .into_json()
            .await
            .expect("activities body");
        assert_eq!(activities[0]["action"], "password_changed");
    }

    #[rocket::async_test]
    async fn stricter_policy_applies_to_next_change() {
        let client = test_client().await;
        signed_in_user(&client, "ada@example.com").await;

        let (status, body) = send(&client, true, "/security-settings", json!({ "passwordRequireSymbols": true })).await;
        assert_eq!(status, Status::Ok);
        assert_eq!(body["securitySettings"]["passwordRequireSymbols"], true);

        let (status, body) = send(
            &client,
            false,
            "/password",
            json!({ "currentPassword": TEST_PASSWORD, "newPassword": "Brandnew99", "confirmPassword": "Brandnew99" }),
        )
        .await;
        assert_eq!(status, Status::BadRequest);
        assert_eq!(body["error"], "Password must contain at least one symbol");
    }

    #[rocket::async_test]
    async fn status_is_persisted() {
        let client = test_client().await;
        let user = signed_in_user(&client, "ada@example.com").await;

        let (status, body) = send(&client, true, "/status", json!({ "status": "dnd" })).await;
        assert_eq!(status, Status::Ok);
        assert_eq!(body["status"], "dnd");

        let stored = client_repo(&client).get_user_by_id(&user.id).await.unwrap().unwrap();
        assert_eq!(stored.status, crate::models::user::UserStatus::Dnd);
    }
}
