use crate::database::channel::channel_documents_key;
use crate::database::repository::Repository;
use crate::database::workspace::workspace_documents_key;
use crate::error::app_error::AppError;
use crate::models::document::{Document, DocumentRequest, DocumentUpdateRequest};
use chrono::Utc;
use uuid::Uuid;

pub(crate) fn document_key(id: &Uuid) -> String {
    format!("document:{}", id)
}

fn user_documents_key(user_id: &Uuid) -> String {
    format!("user:documents:{}", user_id)
}

impl Repository {
    pub async fn create_document(&self, workspace_id: &Uuid, request: &DocumentRequest, actor: &Uuid) -> Result<Document, AppError> {
        let workspace = self.get_workspace(workspace_id).await?.ok_or_else(|| AppError::not_found("Workspace"))?;
        if !workspace.is_member(actor) {
            return Err(AppError::forbidden("create documents in this workspace"));
        }
        if let Some(channel_id) = &request.channel_id {
            let channel = self.get_channel(channel_id).await?;
            if !channel.is_some_and(|c| c.workspace_id == *workspace_id) {
                return Err(AppError::BadRequest("Invalid channel".to_string()));
            }
        }

        let now = Utc::now();
        let document = Document {
            id: Uuid::new_v4(),
            title: request.title.trim().to_string(),
            content: request.content.clone(),
            channel_id: request.channel_id,
            workspace_id: *workspace_id,
            created_by: *actor,
            collaborators: vec![*actor],
            version: 0,
            created_at: now,
            updated_at: now,
        };

        let id = document.id.to_string();
        self.insert(&document_key(&document.id), &document).await?;
        self.store.sadd(&workspace_documents_key(workspace_id), &id).await?;
        self.store.sadd(&user_documents_key(actor), &id).await?;
        if let Some(channel_id) = &document.channel_id {
            self.store.sadd(&channel_documents_key(channel_id), &id).await?;
        }
        Ok(document)
    }

    pub async fn get_document(&self, id: &Uuid) -> Result<Option<Document>, AppError> {
        self.load(&document_key(id)).await
    }

    /// Collaborators and members of the document's workspace may read it.
    pub async fn document_for_viewer(&self, id: &Uuid, user_id: &Uuid) -> Result<Document, AppError> {
        let document = self.get_document(id).await?.ok_or_else(|| AppError::not_found("Document"))?;
        if document.is_collaborator(user_id) || self.is_workspace_member(&document.workspace_id, user_id).await? {
            Ok(document)
        } else {
            Err(AppError::forbidden("view this document"))
        }
    }

    pub async fn update_document(&self, id: &Uuid, request: &DocumentUpdateRequest, actor: &Uuid) -> Result<Document, AppError> {
        self.modify(&document_key(id), |document: &mut Document| {
            if !document.is_collaborator(actor) {
                return Err(AppError::forbidden("edit this document"));
            }
            document.title = request.title.trim().to_string();
            if let Some(content) = &request.content {
                document.content = content.clone();
            }
            Ok(())
        })
        .await?
        .ok_or_else(|| AppError::not_found("Document"))
    }

    pub async fn delete_document(&self, id: &Uuid, actor: &Uuid) -> Result<Document, AppError> {
        let document = self.get_document(id).await?.ok_or_else(|| AppError::not_found("Document"))?;
        if document.created_by != *actor {
            return Err(AppError::forbidden("delete this document"));
        }
        self.purge_document(&document).await?;
        Ok(document)
    }

    pub(crate) async fn purge_document(&self, document: &Document) -> Result<(), AppError> {
        let id = document.id.to_string();
        self.store.srem(&workspace_documents_key(&document.workspace_id), &id).await?;
        if let Some(channel_id) = &document.channel_id {
            self.store.srem(&channel_documents_key(channel_id), &id).await?;
        }
        for collaborator in &document.collaborators {
            self.store.srem(&user_documents_key(collaborator), &id).await?;
        }
        self.store.del(&document_key(&document.id)).await
    }

    async fn documents_in(&self, index_key: &str) -> Result<Vec<Document>, AppError> {
        let ids = self.store.smembers(index_key).await?;
        let mut documents: Vec<Document> = self
            .load_many(ids.iter().filter_map(|id| Uuid::parse_str(id).ok()).map(|id| document_key(&id)).collect::<Vec<_>>())
            .await?;
        documents.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(documents)
    }

    /// Most recently updated first, as are the other document listings.
    pub async fn list_workspace_documents(&self, workspace_id: &Uuid) -> Result<Vec<Document>, AppError> {
        self.documents_in(&workspace_documents_key(workspace_id)).await
    }

    pub async fn list_channel_documents(&self, channel_id: &Uuid) -> Result<Vec<Document>, AppError> {
        self.documents_in(&channel_documents_key(channel_id)).await
    }

    pub async fn list_user_documents(&self, user_id: &Uuid) -> Result<Vec<Document>, AppError> {
        self.documents_in(&user_documents_key(user_id)).await
    }

    /// Only the creator shares. Sharing with an existing collaborator is a no-op.
    pub async fn add_collaborator(&self, id: &Uuid, user_id: &Uuid, actor: &Uuid) -> Result<Document, AppError> {
        let document = self
            .modify(&document_key(id), |document: &mut Document| {
                if document.created_by != *actor {
                    return Err(AppError::forbidden("share this document"));
                }
                if !document.is_collaborator(user_id) {
                    document.collaborators.push(*user_id);
                }
                Ok(())
            })
            .await?
            .ok_or_else(|| AppError::not_found("Document"))?;
        self.store.sadd(&user_documents_key(user_id), &id.to_string()).await?;
        Ok(document)
    }

    pub async fn remove_collaborator(&self, id: &Uuid, user_id: &Uuid, actor: &Uuid) -> Result<Document, AppError> {
        let document = self
            .modify(&document_key(id), |document: &mut Document| {
                if document.created_by != *actor {
                    return Err(AppError::forbidden("manage collaborators of this document"));
                }
                if document.created_by == *user_id {
                    return Err(AppError::BadRequest("Cannot remove the document creator".to_string()));
                }
                document.collaborators.retain(|c| c != user_id);
                Ok(())
            })
            .await?
            .ok_or_else(|| AppError::not_found("Document"))?;
        self.store.srem(&user_documents_key(user_id), &id.to_string()).await?;
        Ok(document)
    }
}
