use crate::database::repository::Repository;
use crate::error::app_error::AppError;
use crate::models::user::UserSummary;
use crate::models::workspace::{Workspace, WorkspaceRequest, placeholder_image};
use chrono::Utc;
use std::collections::HashSet;
use uuid::Uuid;

pub(crate) fn workspace_key(id: &Uuid) -> String {
    format!("workspace:{}", id)
}

pub(crate) fn user_workspaces_key(user_id: &Uuid) -> String {
    format!("user:workspaces:{}", user_id)
}

pub(crate) fn workspace_channels_key(id: &Uuid) -> String {
    format!("workspace:channels:{}", id)
}

pub(crate) fn workspace_documents_key(id: &Uuid) -> String {
    format!("workspace:documents:{}", id)
}

fn parse_ids(raw: Vec<String>) -> Vec<Uuid> {
    raw.iter().filter_map(|id| Uuid::parse_str(id).ok()).collect()
}

impl Repository {
    pub async fn create_workspace(&self, request: &WorkspaceRequest, owner_id: &Uuid) -> Result<Workspace, AppError> {
        let now = Utc::now();
        let name = request.name.trim().to_string();
        let workspace = Workspace {
            id: Uuid::new_v4(),
            image: Some(placeholder_image(&name)),
            name,
            description: request.description.clone(),
            owner_id: *owner_id,
            members: vec![*owner_id],
            version: 0,
            created_at: now,
            updated_at: now,
        };

        self.insert(&workspace_key(&workspace.id), &workspace).await?;
        self.store.sadd(&user_workspaces_key(owner_id), &workspace.id.to_string()).await?;

        tracing::info!(workspace_id = %workspace.id, owner_id = %owner_id, "workspace created");
        Ok(workspace)
    }

    pub async fn get_workspace(&self, id: &Uuid) -> Result<Option<Workspace>, AppError> {
        self.load(&workspace_key(id)).await
    }

    /// Loads a workspace the user belongs to.
    pub async fn workspace_for_member(&self, id: &Uuid, user_id: &Uuid) -> Result<Workspace, AppError> {
        let workspace = self.get_workspace(id).await?.ok_or_else(|| AppError::not_found("Workspace"))?;
        if !workspace.is_member(user_id) {
            return Err(AppError::forbidden("access this workspace"));
        }
        Ok(workspace)
    }

    pub async fn update_workspace(&self, id: &Uuid, request: &WorkspaceRequest, actor: &Uuid) -> Result<Workspace, AppError> {
        self.modify(&workspace_key(id), |workspace: &mut Workspace| {
            if !workspace.is_owner(actor) {
                return Err(AppError::forbidden("update this workspace"));
            }
            workspace.name = request.name.trim().to_string();
            workspace.description = request.description.clone();
            Ok(())
        })
        .await?
        .ok_or_else(|| AppError::not_found("Workspace"))
    }

    /// Deletes the workspace together with its channels, their messages and its documents.
    pub async fn delete_workspace(&self, id: &Uuid, actor: &Uuid) -> Result<Workspace, AppError> {
        let workspace = self.get_workspace(id).await?.ok_or_else(|| AppError::not_found("Workspace"))?;
        if !workspace.is_owner(actor) {
            return Err(AppError::forbidden("delete this workspace"));
        }

        for channel_id in parse_ids(self.store.smembers(&workspace_channels_key(id)).await?) {
            if let Some(channel) = self.get_channel(&channel_id).await? {
                self.purge_channel(&channel).await?;
            }
        }
        for document_id in parse_ids(self.store.smembers(&workspace_documents_key(id)).await?) {
            if let Some(document) = self.get_document(&document_id).await? {
                self.purge_document(&document).await?;
            }
        }
        for member in &workspace.members {
            self.store.srem(&user_workspaces_key(member), &id.to_string()).await?;
        }
        self.store.del(&workspace_channels_key(id)).await?;
        self.store.del(&workspace_documents_key(id)).await?;
        self.store.del(&workspace_key(id)).await?;

        tracing::info!(workspace_id = %id, "workspace deleted");
        Ok(workspace)
    }

    /// Oldest first.
    pub async fn list_workspaces_for_user(&self, user_id: &Uuid) -> Result<Vec<Workspace>, AppError> {
        let ids = parse_ids(self.store.smembers(&user_workspaces_key(user_id)).await?);
        let mut workspaces: Vec<Workspace> = self.load_many(ids.iter().map(workspace_key)).await?;
        workspaces.sort_by_key(|w| w.created_at);
        Ok(workspaces)
    }

    /// Adds a member. Adding an existing member is a no-op.
    pub async fn add_workspace_member(&self, id: &Uuid, user_id: &Uuid) -> Result<Workspace, AppError> {
        let workspace = self
            .modify(&workspace_key(id), |workspace: &mut Workspace| {
                if !workspace.is_member(user_id) {
                    workspace.members.push(*user_id);
                }
                Ok(())
            })
            .await?
            .ok_or_else(|| AppError::not_found("Workspace"))?;
        self.store.sadd(&user_workspaces_key(user_id), &id.to_string()).await?;
        Ok(workspace)
    }

    /// The owner may remove anyone but themselves; members may remove themselves.
    pub async fn remove_workspace_member(&self, id: &Uuid, user_id: &Uuid, actor: &Uuid) -> Result<Workspace, AppError> {
        let workspace = self
            .modify(&workspace_key(id), |workspace: &mut Workspace| {
                if !workspace.is_owner(actor) && actor != user_id {
                    return Err(AppError::forbidden("remove members from this workspace"));
                }
                if workspace.is_owner(user_id) {
                    return Err(AppError::BadRequest("Cannot remove the workspace owner".to_string()));
                }
                workspace.members.retain(|m| m != user_id);
                Ok(())
            })
            .await?
            .ok_or_else(|| AppError::not_found("Workspace"))?;
        self.store.srem(&user_workspaces_key(user_id), &id.to_string()).await?;
        Ok(workspace)
    }

    pub async fn is_workspace_member(&self, id: &Uuid, user_id: &Uuid) -> Result<bool, AppError> {
        self.store.sismember(&user_workspaces_key(user_id), &id.to_string()).await
    }

    pub async fn list_workspace_members(&self, workspace: &Workspace) -> Result<Vec<UserSummary>, AppError> {
        let users = self.get_users_by_ids(&workspace.members).await?;
        Ok(users.iter().map(UserSummary::from).collect())
    }

    pub async fn shares_workspace(&self, a: &Uuid, b: &Uuid) -> Result<bool, AppError> {
        let ours: HashSet<String> = self.store.smembers(&user_workspaces_key(a)).await?.into_iter().collect();
        let theirs = self.store.smembers(&user_workspaces_key(b)).await?;
        Ok(theirs.iter().any(|id| ours.contains(id)))
    }

    /// Everyone who shares at least one workspace with `user_id`.
    pub async fn workspace_peers(&self, user_id: &Uuid) -> Result<HashSet<Uuid>, AppError> {
        let mut peers = HashSet::new();
        for workspace in self.list_workspaces_for_user(user_id).await? {
            peers.extend(workspace.members.iter().copied().filter(|m| m != user_id));
        }
        Ok(peers)
    }
}
