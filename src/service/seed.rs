use crate::database::repository::Repository;
use crate::error::app_error::AppError;
use crate::models::channel::{ChannelRequest, ChannelType};
use crate::models::document::DocumentRequest;
use crate::models::message::MessageRequest;
use crate::models::notification::{NewNotification, NotificationType, SourceType};
use crate::models::user::User;
use crate::models::workspace::WorkspaceRequest;
use chrono::Duration;
use rocket::serde::Serialize;
use schemars::JsonSchema;
use uuid::Uuid;

/// Shared password of every demo account.
pub const SEED_PASSWORD: &str = "Password123";

const SEED_USERS: [(&str, &str); 3] = [
    ("Alice Smith", "alice@example.com"),
    ("Bob Johnson", "bob@example.com"),
    ("Charlie Brown", "charlie@example.com"),
];

#[derive(Serialize, Debug, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SeedUser {
    pub id: Uuid,
    pub name: String,
    pub email: String,
}

#[derive(Serialize, Debug, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SeedResponse {
    pub success: bool,
    pub message: String,
    /// False when the demo data was already present.
    pub created: bool,
    pub users: Vec<SeedUser>,
    pub password: &'static str,
}

fn seed_user(user: &User) -> SeedUser {
    SeedUser {
        id: user.id,
        name: user.name.clone(),
        email: user.email.clone(),
    }
}

async fn create_seed_user(repo: &Repository, name: &str, email: &str) -> Result<User, AppError> {
    let (created, token) = repo.create_user(name, email, SEED_PASSWORD, Duration::hours(24)).await?;
    repo.verify_email(&token).await?;
    repo.get_user_by_id(&created.id).await?.ok_or(AppError::UserNotFound)
}

fn message(content: &str) -> MessageRequest {
    MessageRequest {
        content: content.to_string(),
        reply_to_id: None,
        attachments: Vec::new(),
    }
}

fn channel(name: &str, description: &str, channel_type: ChannelType) -> ChannelRequest {
    ChannelRequest {
        name: name.to_string(),
        description: Some(description.to_string()),
        channel_type,
    }
}

/// Creates verified demo accounts with workspaces, channels, messages, documents and friendships.
///
/// Running it again once the first demo account exists changes nothing and reports the existing accounts.
pub async fn seed_demo_data(repo: &Repository) -> Result<SeedResponse, AppError> {
    if repo.get_user_by_email(SEED_USERS[0].1).await?.is_some() {
        let mut users = Vec::new();
        for (_, email) in SEED_USERS {
            if let Some(user) = repo.get_user_by_email(email).await? {
                users.push(seed_user(&user));
            }
        }
        tracing::info!("demo data already present, skipping seed");
        return Ok(SeedResponse {
            success: true,
            message: "Seed data already exists".to_string(),
            created: false,
            users,
            password: SEED_PASSWORD,
        });
    }

    let alice = create_seed_user(repo, SEED_USERS[0].0, SEED_USERS[0].1).await?;
    let bob = create_seed_user(repo, SEED_USERS[1].0, SEED_USERS[1].1).await?;
    let charlie = create_seed_user(repo, SEED_USERS[2].0, SEED_USERS[2].1).await?;

    let design = repo
        .create_workspace(
            &WorkspaceRequest {
                name: "Design Team".to_string(),
                description: Some("Workspace for the design team".to_string()),
            },
            &alice.id,
        )
        .await?;
    let development = repo
        .create_workspace(
            &WorkspaceRequest {
                name: "Development Team".to_string(),
                description: Some("Workspace for the development team".to_string()),
            },
            &bob.id,
        )
        .await?;

    repo.add_workspace_member(&design.id, &bob.id).await?;
    repo.add_workspace_member(&design.id, &charlie.id).await?;
    repo.add_workspace_member(&development.id, &alice.id).await?;
    repo.add_workspace_member(&development.id, &charlie.id).await?;

    let general = repo
        .create_channel(&design.id, &channel("general", "General discussion", ChannelType::Text), &alice.id)
        .await?;
    let ideas = repo
        .create_channel(
            &design.id,
            &channel("design-ideas", "Share design ideas and feedback", ChannelType::Text),
            &alice.id,
        )
        .await?;
    repo.create_channel(&design.id, &channel("voice-chat", "Voice discussions", ChannelType::Voice), &alice.id)
        .await?;
    let docs = repo
        .create_channel(
            &design.id,
            &channel("documentation", "Project documentation", ChannelType::Document),
            &alice.id,
        )
        .await?;

    repo.create_channel_message(&general.id, &message("Welcome to the Design Team workspace!"), &alice.id)
        .await?;
    repo.create_channel_message(&general.id, &message("Thanks for the invite!"), &bob.id).await?;
    repo.create_channel_message(&general.id, &message("Excited to collaborate with everyone!"), &charlie.id)
        .await?;
    repo.create_channel_message(&ideas.id, &message("I have some new design ideas to share."), &alice.id)
        .await?;
    let reply = repo
        .create_channel_message(&ideas.id, &message(&format!("@{} Looking forward to seeing them!", alice.id)), &bob.id)
        .await?;

    repo.create_document(
        &design.id,
        &DocumentRequest {
            title: "Design System Guidelines".to_string(),
            content: "# Design System Guidelines\n\nThis document outlines our design system principles and components.".to_string(),
            channel_id: Some(docs.id),
        },
        &alice.id,
    )
    .await?;
    repo.create_document(
        &design.id,
        &DocumentRequest {
            title: "Project Roadmap".to_string(),
            content: "# Project Roadmap\n\n## Q1 Goals\n- Finalize design system\n- Implement core components\n\n## Q2 Goals\n- User testing\n- Refinement based on feedback"
                .to_string(),
            channel_id: Some(docs.id),
        },
        &bob.id,
    )
    .await?;

    let (alice_bob, _) = repo.send_friend_request(&alice.id, &bob.email).await?;
    repo.accept_friend_request(&alice_bob.id, &bob.id).await?;
    let (alice_charlie, _) = repo.send_friend_request(&alice.id, &charlie.email).await?;
    repo.accept_friend_request(&alice_charlie.id, &charlie.id).await?;
    let (bob_charlie, _) = repo.send_friend_request(&bob.id, &charlie.email).await?;

    repo.create_notification(NewNotification {
        user_id: charlie.id,
        notification_type: NotificationType::FriendRequest,
        title: "Friend Request".to_string(),
        message: format!("{} sent you a friend request", bob.name),
        source_id: Some(bob_charlie.id),
        source_type: Some(SourceType::Friendship),
    })
    .await?;
    repo.create_notification(NewNotification {
        user_id: alice.id,
        notification_type: NotificationType::Mention,
        title: "You were mentioned".to_string(),
        message: format!("{} mentioned you in {}", bob.name, ideas.name),
        source_id: Some(reply.id),
        source_type: Some(SourceType::Message),
    })
    .await?;

    tracing::info!(users = SEED_USERS.len(), "demo data seeded");

    Ok(SeedResponse {
        success: true,
        message: "Seed data created successfully".to_string(),
        created: true,
        users: [&alice, &bob, &charlie].into_iter().map(seed_user).collect(),
        password: SEED_PASSWORD,
    })
}
