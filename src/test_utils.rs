use crate::config::{Config, MailTransport, StoreBackend};
use crate::database::memory_store::MemoryStore;
use crate::database::repository::Repository;
use crate::models::channel::{Channel, ChannelRequest, ChannelType};
use crate::models::user::User;
use crate::models::workspace::{Workspace, WorkspaceRequest};
use chrono::Duration;
use rocket::http::{ContentType, Status};
use rocket::local::asynchronous::Client;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

pub const TEST_PASSWORD: &str = "Abcdef12";
pub const API: &str = "/api/v1";

pub fn memory_repo() -> Repository {
    Repository::new(Arc::new(MemoryStore::new()))
}

/// In-memory store, outbox mailer and limits high enough that tests never trip them.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.store.backend = StoreBackend::Memory;
    config.email.transport = MailTransport::Outbox;
    config.email.enabled = true;
    config.session.cookie_secure = false;
    config.api.enable_swagger = false;
    config.api.enable_seed = true;
    config.rate_limit.read_limit = 10_000;
    config.rate_limit.mutation_limit = 10_000;
    config.rate_limit.auth_limit = 10_000;
    config
}

/// Signs up with [`TEST_PASSWORD`] and verifies the address. The name is the local part of the email.
pub async fn create_verified_user(repo: &Repository, email: &str) -> User {
    let name = email.split('@').next().unwrap_or(email);
    let (created, token) = repo.create_user(name, email, TEST_PASSWORD, Duration::hours(24)).await.expect("create user");
    repo.verify_email(&token).await.expect("verify email");
    repo.get_user_by_id(&created.id).await.expect("load user").expect("user exists")
}

pub async fn create_workspace(repo: &Repository, owner: &Uuid, name: &str) -> Workspace {
    let request = WorkspaceRequest {
        name: name.to_string(),
        description: None,
    };
    repo.create_workspace(&request, owner).await.expect("create workspace")
}

pub async fn create_channel(repo: &Repository, workspace_id: &Uuid, actor: &Uuid, name: &str) -> Channel {
    let request = ChannelRequest {
        name: name.to_string(),
        description: None,
        channel_type: ChannelType::Text,
    };
    repo.create_channel(workspace_id, &request, actor).await.expect("create channel")
}

pub async fn test_client() -> Client {
    Client::tracked(crate::build_rocket(test_config())).await.expect("valid rocket instance")
}

pub fn client_repo(client: &Client) -> &Repository {
    client.rocket().state::<Repository>().expect("repository is managed")
}

/// Logs in with [`TEST_PASSWORD`]; the tracked client keeps the session cookies.
pub async fn login(client: &Client, email: &str) {
    let response = client
        .post(format!("{}/auth/login", API))
        .header(ContentType::JSON)
        .body(json!({ "email": email, "password": TEST_PASSWORD }).to_string())
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok, "login as {}", email);
}

/// Creates a verified account directly in the store and logs the client in as it.
pub async fn signed_in_user(client: &Client, email: &str) -> User {
    let user = create_verified_user(client_repo(client), email).await;
    login(client, email).await;
    user
}
