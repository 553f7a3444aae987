use crate::auth::CurrentUser;
use crate::database::repository::Repository;
use crate::error::app_error::AppError;
use crate::middleware::rate_limit::RateLimit;
use crate::models::auth::SuccessResponse;
use crate::models::document::{CollaboratorRequest, Document, DocumentUpdateRequest};
use crate::models::notification::{NewNotification, NotificationType, SourceType};
use crate::realtime::RealtimeHub;
use crate::service::notification::notify;
use rocket::serde::json::Json;
use rocket::{State, delete, get, post, put};
use rocket_okapi::openapi;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

/// Documents the signed-in user collaborates on
#[openapi(tag = "Documents")]
#[get("/")]
pub async fn list_my_documents(repo: &State<Repository>, _rate_limit: RateLimit, current_user: CurrentUser) -> Result<Json<Vec<Document>>, AppError> {
    Ok(Json(repo.list_user_documents(&current_user.id).await?))
}

#[openapi(tag = "Documents")]
#[get("/<id>")]
pub async fn get_document(repo: &State<Repository>, _rate_limit: RateLimit, current_user: CurrentUser, id: &str) -> Result<Json<Document>, AppError> {
    let uuid = Uuid::parse_str(id)?;
    Ok(Json(repo.document_for_viewer(&uuid, &current_user.id).await?))
}

/// Collaborators only. Open editors receive the saved content as a regular update.
#[openapi(tag = "Documents")]
#[put("/<id>", data = "<payload>")]
pub async fn update_document(
    repo: &State<Repository>,
    hub: &State<Arc<RealtimeHub>>,
    _rate_limit: RateLimit,
    current_user: CurrentUser,
    id: &str,
    payload: Json<DocumentUpdateRequest>,
) -> Result<Json<Document>, AppError> {
    payload.validate()?;
    let uuid = Uuid::parse_str(id)?;
    let document = repo.update_document(&uuid, &payload, &current_user.id).await?;
    if payload.content.is_some() {
        hub.publish_document_save(&document.id, &document.content, &current_user.id).await;
    }
    Ok(Json(document))
}

/// Creator only
#[openapi(tag = "Documents")]
#[delete("/<id>")]
pub async fn delete_document(
    repo: &State<Repository>,
    hub: &State<Arc<RealtimeHub>>,
    _rate_limit: RateLimit,
    current_user: CurrentUser,
    id: &str,
) -> Result<Json<SuccessResponse>, AppError> {
    let uuid = Uuid::parse_str(id)?;
    repo.delete_document(&uuid, &current_user.id).await?;
    hub.close_document(&uuid).await;
    Ok(Json(SuccessResponse::ok()))
}

/// Share with a registered user by email
#[openapi(tag = "Documents")]
#[post("/<id>/collaborators", data = "<payload>")]
pub async fn add_collaborator(
    repo: &State<Repository>,
    hub: &State<Arc<RealtimeHub>>,
    _rate_limit: RateLimit,
    current_user: CurrentUser,
    id: &str,
    payload: Json<CollaboratorRequest>,
) -> Result<Json<Document>, AppError> {
    payload.validate()?;
    let uuid = Uuid::parse_str(id)?;
    let collaborator = repo.get_user_by_email(&payload.email).await?.ok_or(AppError::UserNotFound)?;
    let already_shared = repo.get_document(&uuid).await?.is_some_and(|d| d.is_collaborator(&collaborator.id));
    let document = repo.add_collaborator(&uuid, &collaborator.id, &current_user.id).await?;

    if !already_shared && let Some(sharer) = repo.get_user_by_id(&current_user.id).await? {
        notify(
            repo,
            hub,
            NewNotification {
                user_id: collaborator.id,
                notification_type: NotificationType::DocumentShare,
                title: "Document Shared".to_string(),
                message: format!("{} has shared the document \"{}\" with you", sharer.name, document.title),
                source_id: Some(document.id),
                source_type: Some(SourceType::Document),
            },
        )
        .await;
    }

    Ok(Json(document))
}

/// Workspace members keep read access and stay in the live room
#[openapi(tag = "Documents")]
#[delete("/<id>/collaborators/<user_id>")]
pub async fn remove_collaborator(
    repo: &State<Repository>,
    hub: &State<Arc<RealtimeHub>>,
    _rate_limit: RateLimit,
    current_user: CurrentUser,
    id: &str,
    user_id: &str,
) -> Result<Json<Document>, AppError> {
    let uuid = Uuid::parse_str(id)?;
    let collaborator = Uuid::parse_str(user_id)?;
    let document = repo.remove_collaborator(&uuid, &collaborator, &current_user.id).await?;
    hub.revoke_document(&collaborator, &document.id).await;
    Ok(Json(document))
}

pub fn routes() -> (Vec<rocket::Route>, okapi::openapi3::OpenApi) {
    rocket_okapi::openapi_get_routes_spec![
        list_my_documents,
        get_document,
        update_document,
        delete_document,
        add_collaborator,
        remove_collaborator
    ]
}
