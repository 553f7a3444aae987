use crate::config::Config;
use crate::database::repository::Repository;
use crate::error::app_error::AppError;
use crate::middleware::rate_limit::AuthRateLimit;
use crate::middleware::{ClientIp, UserAgent};
use crate::models::activity::ActivityAction;
use crate::models::auth::AuthResponse;
use crate::models::password_reset::{PasswordResetConfirmRequest, PasswordResetRequest, RESET_REQUESTED_MESSAGE, TokenRequest, TokenValidationResponse};
use crate::service::email::EmailService;
use chrono::Duration;
use rocket::serde::json::Json;
use rocket::{State, post};
use rocket_okapi::openapi;
use serde_json::json;
use validator::Validate;

/// Request a password reset link. Answers identically whether or not the account exists.
#[openapi(tag = "Password Reset")]
#[post("/request", data = "<payload>")]
#[allow(clippy::too_many_arguments)]
pub async fn request_password_reset(
    repo: &State<Repository>,
    config: &State<Config>,
    email: &State<EmailService>,
    _rate_limit: AuthRateLimit,
    user_agent: UserAgent,
    client_ip: ClientIp,
    payload: Json<PasswordResetRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    payload.validate()?;

    let issued = repo
        .create_password_reset_token(&payload.email, Duration::seconds(config.tokens.password_reset_ttl_seconds))
        .await;

    match issued {
        Ok(Some((user, token))) => {
            let _ = repo
                .log_activity(
                    &user.id,
                    ActivityAction::PasswordResetRequested,
                    json!({}),
                    client_ip.0.as_deref(),
                    user_agent.0.as_deref(),
                )
                .await;

            if let Err(e) = email.send_password_reset_email(&user.email, &user.name, &token).await {
                tracing::error!(error = ?e, user_id = %user.id, "failed to send password reset email");
            }
        }
        Ok(None) => {
            tracing::info!("password reset requested for unknown email");
        }
        Err(e) => {
            tracing::error!(error = ?e, "failed to issue password reset token");
        }
    }

    Ok(Json(AuthResponse::message(RESET_REQUESTED_MESSAGE)))
}

/// Check whether a reset token is still usable without consuming it
#[openapi(tag = "Password Reset")]
#[post("/validate", data = "<payload>")]
pub async fn validate_password_reset_token(
    repo: &State<Repository>,
    _rate_limit: AuthRateLimit,
    payload: Json<TokenRequest>,
) -> Result<Json<TokenValidationResponse>, AppError> {
    if payload.validate().is_err() {
        return Ok(Json(TokenValidationResponse { valid: false, email: None }));
    }

    let response = match repo.validate_reset_token(&payload.token).await? {
        Some(user) => TokenValidationResponse {
            valid: true,
            email: Some(user.email),
        },
        None => TokenValidationResponse { valid: false, email: None },
    };
    Ok(Json(response))
}

/// Set a new password with a reset token. Signs the account out everywhere.
#[openapi(tag = "Password Reset")]
#[post("/confirm", data = "<payload>")]
pub async fn confirm_password_reset(
    repo: &State<Repository>,
    _rate_limit: AuthRateLimit,
    user_agent: UserAgent,
    client_ip: ClientIp,
    payload: Json<PasswordResetConfirmRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    payload.validate()?;

    let user = repo.reset_password(&payload.token, &payload.password).await?;

    let _ = repo
        .log_activity(&user.id, ActivityAction::PasswordReset, json!({}), client_ip.0.as_deref(), user_agent.0.as_deref())
        .await;

    Ok(Json(AuthResponse::message("Your password has been reset. You can now log in with your new password.")))
}

pub fn routes() -> (Vec<rocket::Route>, okapi::openapi3::OpenApi) {
    rocket_okapi::openapi_get_routes_spec![request_password_reset, validate_password_reset_token, confirm_password_reset]
}

#[cfg(test)]
mod tests {
    use crate::service::email::OutboxMailer;
    use crate::test_utils::{API, client_repo, create_verified_user, login, test_client};
    use rocket::http::{ContentType, Status};
    use rocket::local::asynchronous::Client;
    use serde_json::{Value, json};

    async fn post_json(client: &Client, path: &str, body: Value) -> (Status, Value) {
        let response = client
            .post(format!("{}/password-reset{}", API, path))
            .header(ContentType::JSON)
            .body(body.to_string())
            .dispatch()
            .await;
        let status = response.status();
        (status, response.into_json::<Value>().await.unwrap_or(Value::Null))
    }

    #[rocket::async_test]
    async fn unknown_email_gets_success_and_no_mail() {
        let client = test_client().await;
        let (status, body) = post_json(&client, "/request", json!({ "email": "nobody@example.com" })).await;
        assert_eq!(status, Status::Ok);
        assert_eq!(body["success"], true);

        let outbox = client.rocket().state::<OutboxMailer>().expect("outbox mailer");
        assert!(outbox.sent().await.is_empty());
    }

    #[rocket::async_test]
    async fn reset_replaces_password_and_signs_out() {
        let client = test_client().await;
        create_verified_user(client_repo(&client), "ada@example.com").await;
        login(&client, "ada@example.com").await;

        let (status, _) = post_json(&client, "/request", json!({ "email": "ada@example.com" })).await;
        assert_eq!(status, Status::Ok);

        // Signing in also mails a login notice from a background task.
        let outbox = client.rocket().state::<OutboxMailer>().expect("outbox mailer");
        let sent: Vec<_> = outbox
            .sent_to("ada@example.com")
            .await
            .into_iter()
            .filter(|mail| mail.subject == "Reset your CollabHub password")
            .collect();
        assert_eq!(sent.len(), 1);
        let body = &sent[0].text_body;
        let start = body.find("token=").expect("reset link") + "token=".len();
        let token: String = body[start..].chars().take_while(|c| c.is_ascii_hexdigit()).collect();

        let (_, validation) = post_json(&client, "/validate", json!({ "token": token })).await;
        assert_eq!(validation, json!({ "valid": true, "email": "ada@example.com" }));

        let (status, _) = post_json(
            &client,
            "/confirm",
            json!({ "token": token, "password": "Brandnew99", "confirmPassword": "Brandnew99" }),
        )
        .await;
        assert_eq!(status, Status::Ok);

        let response = client.get(format!("{}/auth/me", API)).dispatch().await;
        assert_eq!(response.status(), Status::Unauthorized);

        let (status, _) = post_json(
            &client,
            "/confirm",
            json!({ "token": token, "password": "Another99", "confirmPassword": "Another99" }),
        )
        .await;
        assert_eq!(status, Status::BadRequest);

        let (_, validation) = post_json(&client, "/validate", json!({ "token": token })).await;
        assert_eq!(validation, json!({ "valid": false }));
    }
}
