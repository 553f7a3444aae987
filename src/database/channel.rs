use crate::database::repository::Repository;
use crate::database::workspace::workspace_channels_key;
use crate::error::app_error::AppError;
use crate::models::channel::{Channel, ChannelRequest, ChannelUpdateRequest};
use crate::models::document::Document;
use crate::models::workspace::Workspace;
use chrono::Utc;
use uuid::Uuid;

pub(crate) fn channel_key(id: &Uuid) -> String {
    format!("channel:{}", id)
}

pub(crate) fn channel_documents_key(id: &Uuid) -> String {
    format!("channel:documents:{}", id)
}

impl Repository {
    pub async fn create_channel(&self, workspace_id: &Uuid, request: &ChannelRequest, actor: &Uuid) -> Result<Channel, AppError> {
        let workspace = self.get_workspace(workspace_id).await?.ok_or_else(|| AppError::not_found("Workspace"))?;
        if !workspace.is_member(actor) {
            return Err(AppError::forbidden("create channels in this workspace"));
        }

        let now = Utc::now();
        let channel = Channel {
            id: Uuid::new_v4(),
            name: request.name.trim().to_string(),
            description: request.description.clone(),
            workspace_id: *workspace_id,
            channel_type: request.channel_type,
            version: 0,
            created_at: now,
            updated_at: now,
        };

        self.insert(&channel_key(&channel.id), &channel).await?;
        self.store.sadd(&workspace_channels_key(workspace_id), &channel.id.to_string()).await?;
        Ok(channel)
    }

    pub async fn get_channel(&self, id: &Uuid) -> Result<Option<Channel>, AppError> {
        self.load(&channel_key(id)).await
    }

    /// Loads a channel together with its workspace, provided the user is a member.
    pub async fn channel_for_member(&self, id: &Uuid, user_id: &Uuid) -> Result<(Channel, Workspace), AppError> {
        let channel = self.get_channel(id).await?.ok_or_else(|| AppError::not_found("Channel"))?;
        let workspace = self
            .get_workspace(&channel.workspace_id)
            .await?
            .ok_or_else(|| AppError::not_found("Workspace"))?;
        if !workspace.is_member(user_id) {
            return Err(AppError::forbidden("access this channel"));
        }
        Ok((channel, workspace))
    }

    async fn channel_for_owner(&self, id: &Uuid, actor: &Uuid, action: &str) -> Result<Channel, AppError> {
        let channel = self.get_channel(id).await?.ok_or_else(|| AppError::not_found("Channel"))?;
        let workspace = self.get_workspace(&channel.workspace_id).await?;
        if !workspace.is_some_and(|w| w.is_owner(actor)) {
            return Err(AppError::forbidden(action));
        }
        Ok(channel)
    }

    pub async fn update_channel(&self, id: &Uuid, request: &ChannelUpdateRequest, actor: &Uuid) -> Result<Channel, AppError> {
        self.channel_for_owner(id, actor, "update this channel").await?;
        self.modify(&channel_key(id), |channel: &mut Channel| {
            channel.name = request.name.trim().to_string();
            channel.description = request.description.clone();
            Ok(())
        })
        .await?
        .ok_or_else(|| AppError::not_found("Channel"))
    }

    pub async fn delete_channel(&self, id: &Uuid, actor: &Uuid) -> Result<Channel, AppError> {
        let channel = self.channel_for_owner(id, actor, "delete this channel").await?;
        self.purge_channel(&channel).await?;
        Ok(channel)
    }

    /// Removes the channel, its messages and pins. Documents in it stay in the workspace.
    pub(crate) async fn purge_channel(&self, channel: &Channel) -> Result<(), AppError> {
        self.purge_channel_messages(&channel.id).await?;

        let documents_key = channel_documents_key(&channel.id);
        for raw_id in self.store.smembers(&documents_key).await? {
            let document_id = Uuid::parse_str(&raw_id)?;
            self.modify(&crate::database::document::document_key(&document_id), |document: &mut Document| {
                document.channel_id = None;
                Ok(())
            })
            .await?;
        }
        self.store.del(&documents_key).await?;

        self.store.srem(&workspace_channels_key(&channel.workspace_id), &channel.id.to_string()).await?;
        self.store.del(&channel_key(&channel.id)).await?;
        tracing::info!(channel_id = %channel.id, "channel deleted");
        Ok(())
    }

    /// Oldest first.
    pub async fn list_channels(&self, workspace_id: &Uuid) -> Result<Vec<Channel>, AppError> {
        let ids = self.store.smembers(&workspace_channels_key(workspace_id)).await?;
        let mut channels: Vec<Channel> = self.load_many(ids.iter().filter_map(|id| Uuid::parse_str(id).ok()).map(|id| channel_key(&id)).collect::<Vec<_>>()).await?;
        channels.sort_by_key(|c| c.created_at);
        Ok(channels)
    }
}
