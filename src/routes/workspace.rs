use crate::auth::CurrentUser;
use crate::database::repository::Repository;
use crate::error::app_error::AppError;
use crate::middleware::rate_limit::RateLimit;
use crate::models::auth::SuccessResponse;
use crate::models::channel::{Channel, ChannelRequest};
use crate::models::document::{Document, DocumentRequest};
use crate::models::notification::{NewNotification, NotificationType, SourceType};
use crate::models::user::UserSummary;
use crate::models::workspace::{InviteRequest, Workspace, WorkspaceRequest};
use crate::realtime::RealtimeHub;
use crate::service::notification::notify;
use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::{State, delete, get, post, put};
use rocket_okapi::openapi;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

#[openapi(tag = "Workspaces")]
#[post("/", data = "<payload>")]
pub async fn create_workspace(
    repo: &State<Repository>,
    _rate_limit: RateLimit,
    current_user: CurrentUser,
    payload: Json<WorkspaceRequest>,
) -> Result<(Status, Json<Workspace>), AppError> {
    payload.validate()?;
    let workspace = repo.create_workspace(&payload, &current_user.id).await?;
    Ok((Status::Created, Json(workspace)))
}

/// Workspaces the signed-in user belongs to
#[openapi(tag = "Workspaces")]
#[get("/")]
pub async fn list_workspaces(repo: &State<Repository>, _rate_limit: RateLimit, current_user: CurrentUser) -> Result<Json<Vec<Workspace>>, AppError> {
    Ok(Json(repo.list_workspaces_for_user(&current_user.id).await?))
}

#[openapi(tag = "Workspaces")]
#[get("/<id>")]
pub async fn get_workspace(repo: &State<Repository>, _rate_limit: RateLimit, current_user: CurrentUser, id: &str) -> Result<Json<Workspace>, AppError> {
    let uuid = Uuid::parse_str(id)?;
    Ok(Json(repo.workspace_for_member(&uuid, &current_user.id).await?))
}

#[openapi(tag = "Workspaces")]
#[put("/<id>", data = "<payload>")]
pub async fn update_workspace(
    repo: &State<Repository>,
    _rate_limit: RateLimit,
    current_user: CurrentUser,
    id: &str,
    payload: Json<WorkspaceRequest>,
) -> Result<Json<Workspace>, AppError> {
    payload.validate()?;
    let uuid = Uuid::parse_str(id)?;
    Ok(Json(repo.update_workspace(&uuid, &payload, &current_user.id).await?))
}

/// Owner only. Channels, messages and documents go with it.
#[openapi(tag = "Workspaces")]
#[delete("/<id>")]
pub async fn delete_workspace(
    repo: &State<Repository>,
    hub: &State<Arc<RealtimeHub>>,
    _rate_limit: RateLimit,
    current_user: CurrentUser,
    id: &str,
) -> Result<Json<SuccessResponse>, AppError> {
    let uuid = Uuid::parse_str(id)?;
    let workspace = repo.delete_workspace(&uuid, &current_user.id).await?;
    for member in &workspace.members {
        hub.evict(member, &workspace.id).await;
    }
    hub.refresh_presence(&workspace.members).await;
    Ok(Json(SuccessResponse::ok()))
}

#[openapi(tag = "Workspaces")]
#[get("/<id>/members")]
pub async fn list_members(repo: &State<Repository>, _rate_limit: RateLimit, current_user: CurrentUser, id: &str) -> Result<Json<Vec<UserSummary>>, AppError> {
    let uuid = Uuid::parse_str(id)?;
    let workspace = repo.workspace_for_member(&uuid, &current_user.id).await?;
    Ok(Json(repo.list_workspace_members(&workspace).await?))
}

/// Add a registered user by email and notify them
#[openapi(tag = "Workspaces")]
#[post("/<id>/invite", data = "<payload>")]
pub async fn invite_member(
    repo: &State<Repository>,
    hub: &State<Arc<RealtimeHub>>,
    _rate_limit: RateLimit,
    current_user: CurrentUser,
    id: &str,
    payload: Json<InviteRequest>,
) -> Result<Json<Vec<UserSummary>>, AppError> {
    payload.validate()?;
    let uuid = Uuid::parse_str(id)?;
    let workspace = repo.workspace_for_member(&uuid, &current_user.id).await?;
    let invitee = repo.get_user_by_email(&payload.email).await?.ok_or(AppError::UserNotFound)?;
    if workspace.is_member(&invitee.id) {
        return Err(AppError::Conflict("User is already a member of this workspace".to_string()));
    }

    let workspace = repo.add_workspace_member(&uuid, &invitee.id).await?;
    hub.refresh_presence(&workspace.members).await;

    notify(
        repo,
        hub,
        NewNotification {
            user_id: invitee.id,
            notification_type: NotificationType::WorkspaceInvite,
            title: "Workspace Invitation".to_string(),
            message: format!("You have been invited to join the workspace \"{}\"", workspace.name),
            source_id: Some(workspace.id),
            source_type: Some(SourceType::Workspace),
        },
    )
    .await;

    Ok(Json(repo.list_workspace_members(&workspace).await?))
}

/// The owner removes a member, or a member leaves
#[openapi(tag = "Workspaces")]
#[delete("/<id>/members/<user_id>")]
pub async fn remove_member(
    repo: &State<Repository>,
    hub: &State<Arc<RealtimeHub>>,
    _rate_limit: RateLimit,
    current_user: CurrentUser,
    id: &str,
    user_id: &str,
) -> Result<Json<SuccessResponse>, AppError> {
    let uuid = Uuid::parse_str(id)?;
    let member = Uuid::parse_str(user_id)?;
    let workspace = repo.remove_workspace_member(&uuid, &member, &current_user.id).await?;
    hub.evict(&member, &workspace.id).await;

    let mut affected = workspace.members.clone();
    affected.push(member);
    hub.refresh_presence(&affected).await;
    Ok(Json(SuccessResponse::ok()))
}

#[openapi(tag = "Workspaces")]
#[get("/<id>/channels")]
pub async fn list_channels(repo: &State<Repository>, _rate_limit: RateLimit, current_user: CurrentUser, id: &str) -> Result<Json<Vec<Channel>>, AppError> {
    let uuid = Uuid::parse_str(id)?;
    repo.workspace_for_member(&uuid, &current_user.id).await?;
    Ok(Json(repo.list_channels(&uuid).await?))
}

#[openapi(tag = "Workspaces")]
#[post("/<id>/channels", data = "<payload>")]
pub async fn create_channel(
    repo: &State<Repository>,
    _rate_limit: RateLimit,
    current_user: CurrentUser,
    id: &str,
    payload: Json<ChannelRequest>,
) -> Result<(Status, Json<Channel>), AppError> {
    payload.validate()?;
    let uuid = Uuid::parse_str(id)?;
    let channel = repo.create_channel(&uuid, &payload, &current_user.id).await?;
    Ok((Status::Created, Json(channel)))
}

#[openapi(tag = "Workspaces")]
#[get("/<id>/documents")]
pub async fn list_documents(repo: &State<Repository>, _rate_limit: RateLimit, current_user: CurrentUser, id: &str) -> Result<Json<Vec<Document>>, AppError> {
    let uuid = Uuid::parse_str(id)?;
    repo.workspace_for_member(&uuid, &current_user.id).await?;
    Ok(Json(repo.list_workspace_documents(&uuid).await?))
}

#[openapi(tag = "Workspaces")]
#[post("/<id>/documents", data = "<payload>")]
pub async fn create_document(
    repo: &State<Repository>,
    _rate_limit: RateLimit,
    current_user: CurrentUser,
    id: &str,
    payload: Json<DocumentRequest>,
) -> Result<(Status, Json<Document>), AppError> {
    payload.validate()?;
    let uuid = Uuid::parse_str(id)?;
    let document = repo.create_document(&uuid, &payload, &current_user.id).await?;
    Ok((Status::Created, Json(document)))
}

pub fn routes() -> (Vec<rocket::Route>, okapi::openapi3::OpenApi) {
    rocket_okapi::openapi_get_routes_spec![
        create_workspace,
        list_workspaces,
        get_workspace,
        update_workspace,
        delete_workspace,
        list_members,
        invite_member,
        remove_member,
        list_channels,
        create_channel,
        list_documents,
        create_document
    ]
}
