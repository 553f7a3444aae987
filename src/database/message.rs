use crate::database::repository::{Repository, now_score};
use crate::error::app_error::AppError;
use crate::models::message::{Message, MessageRequest};
use chrono::Utc;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Namespace for deterministic direct-conversation ids.
const DIRECT_CONVERSATION_NAMESPACE: Uuid = Uuid::from_u128(0x6c1f_58a2_93d4_4b7e_a0c5_2f8e_91d3_7b40);

pub(crate) fn message_key(id: &Uuid) -> String {
    format!("message:{}", id)
}

fn channel_messages_key(channel_id: &Uuid) -> String {
    format!("channel:messages:{}", channel_id)
}

fn channel_pinned_key(channel_id: &Uuid) -> String {
    format!("channel:pinned:{}", channel_id)
}

/// Same id for `(a, b)` and `(b, a)`.
pub fn conversation_id(a: &Uuid, b: &Uuid) -> Uuid {
    let (low, high) = if a <= b { (a, b) } else { (b, a) };
    Uuid::new_v5(&DIRECT_CONVERSATION_NAMESPACE, format!("{}:{}", low, high).as_bytes())
}

impl Repository {
    async fn insert_message(&self, channel_id: Uuid, author: &Uuid, recipient_id: Option<Uuid>, request: &MessageRequest) -> Result<Message, AppError> {
        if let Some(reply_to) = &request.reply_to_id {
            let target = self.get_message(reply_to).await?;
            if !target.is_some_and(|m| m.channel_id == channel_id) {
                return Err(AppError::BadRequest("Reply target not found".to_string()));
            }
        }

        let now = Utc::now();
        let message = Message {
            id: Uuid::new_v4(),
            content: request.content.clone(),
            channel_id,
            user_id: *author,
            recipient_id,
            reply_to_id: request.reply_to_id,
            attachments: request.attachments.clone(),
            reactions: BTreeMap::new(),
            is_pinned: false,
            edited: false,
            version: 0,
            created_at: now,
            updated_at: now,
        };

        self.insert(&message_key(&message.id), &message).await?;
        self.store.zadd(&channel_messages_key(&channel_id), &message.id.to_string(), now_score()).await?;
        Ok(message)
    }

    /// Posts to a channel of a workspace the author belongs to.
    pub async fn create_channel_message(&self, channel_id: &Uuid, request: &MessageRequest, author: &Uuid) -> Result<Message, AppError> {
        self.channel_for_member(channel_id, author).await?;
        self.insert_message(*channel_id, author, None, request).await
    }

    /// Direct messages need a shared workspace or an accepted friendship, and no block either way.
    pub async fn ensure_can_direct_message(&self, sender: &Uuid, recipient: &Uuid) -> Result<(), AppError> {
        if sender == recipient {
            return Err(AppError::BadRequest("You cannot send a direct message to yourself".to_string()));
        }
        if self.get_user_by_id(recipient).await?.is_none() {
            return Err(AppError::UserNotFound);
        }
        if self.is_blocked_between(sender, recipient).await? {
            return Err(AppError::forbidden("message this user"));
        }
        if self.are_friends(sender, recipient).await? || self.shares_workspace(sender, recipient).await? {
            return Ok(());
        }
        Err(AppError::forbidden("message this user"))
    }

    pub async fn create_direct_message(&self, sender: &Uuid, recipient: &Uuid, request: &MessageRequest) -> Result<Message, AppError> {
        self.ensure_can_direct_message(sender, recipient).await?;
        self.insert_message(conversation_id(sender, recipient), sender, Some(*recipient), request).await
    }

    pub async fn get_message(&self, id: &Uuid) -> Result<Option<Message>, AppError> {
        self.load(&message_key(id)).await
    }

    /// Loads a message the user can see: a direct message they take part in, or a
    /// channel message in a workspace they belong to.
    pub async fn message_for_participant(&self, id: &Uuid, user_id: &Uuid) -> Result<Message, AppError> {
        let message = self.get_message(id).await?.ok_or_else(|| AppError::not_found("Message"))?;
        if let Some(recipient) = message.recipient_id {
            if message.user_id != *user_id && recipient != *user_id {
                return Err(AppError::forbidden("access this message"));
            }
        } else {
            self.channel_for_member(&message.channel_id, user_id).await?;
        }
        Ok(message)
    }

    pub async fn edit_message(&self, id: &Uuid, content: &str, actor: &Uuid) -> Result<Message, AppError> {
        self.modify(&message_key(id), |message: &mut Message| {
            if message.user_id != *actor {
                return Err(AppError::forbidden("edit this message"));
            }
            message.content = content.to_string();
            message.edited = true;
            Ok(())
        })
        .await?
        .ok_or_else(|| AppError::not_found("Message"))
    }

    pub async fn delete_message(&self, id: &Uuid, actor: &Uuid) -> Result<Message, AppError> {
        let message = self.get_message(id).await?.ok_or_else(|| AppError::not_found("Message"))?;
        if message.user_id != *actor {
            return Err(AppError::forbidden("delete this message"));
        }

        self.store.zrem(&channel_messages_key(&message.channel_id), &id.to_string()).await?;
        self.store.srem(&channel_pinned_key(&message.channel_id), &id.to_string()).await?;
        self.store.del(&message_key(id)).await?;
        Ok(message)
    }

    /// Newest first. `before` names a message of the same channel; only strictly older ones follow.
    pub async fn list_messages(&self, channel_id: &Uuid, limit: usize, before: Option<&Uuid>) -> Result<Vec<Message>, AppError> {
        let key = channel_messages_key(channel_id);
        let ids = match before {
            Some(cursor) => {
                let score = self
                    .store
                    .zscore(&key, &cursor.to_string())
                    .await?
                    .ok_or_else(|| AppError::BadRequest("Invalid pagination cursor".to_string()))?;
                self.store.zrevrange_before(&key, score, limit).await?
            }
            None if limit == 0 => Vec::new(),
            None => self.store.zrevrange(&key, 0, limit - 1).await?,
        };

        self.load_many(ids.iter().filter_map(|id| Uuid::parse_str(id).ok()).map(|id| message_key(&id)).collect::<Vec<_>>()).await
    }

    pub async fn list_channel_messages(&self, channel_id: &Uuid, user_id: &Uuid, limit: usize, before: Option<&Uuid>) -> Result<Vec<Message>, AppError> {
        self.channel_for_member(channel_id, user_id).await?;
        self.list_messages(channel_id, limit, before).await
    }

    pub async fn list_direct_messages(&self, user_id: &Uuid, other: &Uuid, limit: usize, before: Option<&Uuid>) -> Result<Vec<Message>, AppError> {
        self.list_messages(&conversation_id(user_id, other), limit, before).await
    }

    pub async fn toggle_pin(&self, id: &Uuid, actor: &Uuid) -> Result<Message, AppError> {
        self.message_for_participant(id, actor).await?;
        let message = self
            .modify(&message_key(id), |message: &mut Message| {
                message.is_pinned = !message.is_pinned;
                Ok(())
            })
            .await?
            .ok_or_else(|| AppError::not_found("Message"))?;

        let pinned_key = channel_pinned_key(&message.channel_id);
        if message.is_pinned {
            self.store.sadd(&pinned_key, &id.to_string()).await?;
        } else {
            self.store.srem(&pinned_key, &id.to_string()).await?;
        }
        Ok(message)
    }

    /// Newest first.
    pub async fn list_pinned_messages(&self, channel_id: &Uuid) -> Result<Vec<Message>, AppError> {
        let ids = self.store.smembers(&channel_pinned_key(channel_id)).await?;
        let mut messages: Vec<Message> = self.load_many(ids.iter().filter_map(|id| Uuid::parse_str(id).ok()).map(|id| message_key(&id)).collect::<Vec<_>>()).await?;
        messages.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(messages)
    }

    pub async fn add_reaction(&self, id: &Uuid, emoji: &str, actor: &Uuid) -> Result<Message, AppError> {
        self.message_for_participant(id, actor).await?;
        self.modify(&message_key(id), |message: &mut Message| {
            message.add_reaction(emoji, *actor);
            Ok(())
        })
        .await?
        .ok_or_else(|| AppError::not_found("Message"))
    }

    pub async fn remove_reaction(&self, id: &Uuid, emoji: &str, actor: &Uuid) -> Result<Message, AppError> {
        self.message_for_participant(id, actor).await?;
        self.modify(&message_key(id), |message: &mut Message| {
            message.remove_reaction(emoji, *actor);
            Ok(())
        })
        .await?
        .ok_or_else(|| AppError::not_found("Message"))
    }

    pub(crate) async fn purge_channel_messages(&self, channel_id: &Uuid) -> Result<(), AppError> {
        let key = channel_messages_key(channel_id);
        for raw_id in self.store.zrange_all(&key).await? {
            if let Ok(id) = Uuid::parse_str(&raw_id) {
                self.store.del(&message_key(&id)).await?;
            }
        }
        self.store.del(&key).await?;
        self.store.del(&channel_pinned_key(channel_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{create_channel, create_verified_user, create_workspace, memory_repo};

    fn text(content: &str) -> MessageRequest {
        MessageRequest {
            content: content.to_string(),
            reply_to_id: None,
            attachments: Vec::new(),
        }
    }

    #[test]
    fn conversation_id_is_symmetric() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_eq!(conversation_id(&a, &b), conversation_id(&b, &a));
        assert_ne!(conversation_id(&a, &b), conversation_id(&a, &Uuid::new_v4()));
    }

    #[rocket::async_test]
    async fn pagination_walks_backwards_without_overlap() {
        let repo = memory_repo();
        let owner = create_verified_user(&repo, "owner@example.com").await;
        let workspace = create_workspace(&repo, &owner.id, "Design").await;
        let channel = create_channel(&repo, &workspace.id, &owner.id, "general").await;

        let mut sent = Vec::new();
        for i in 0..5 {
            sent.push(repo.create_channel_message(&channel.id, &text(&format!("m{}", i)), &owner.id).await.unwrap());
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }

        let first = repo.list_channel_messages(&channel.id, &owner.id, 2, None).await.unwrap();
        assert_eq!(first.iter().map(|m| m.content.as_str()).collect::<Vec<_>>(), vec!["m4", "m3"]);

        let second = repo.list_channel_messages(&channel.id, &owner.id, 2, Some(&first[1].id)).await.unwrap();
        assert_eq!(second.iter().map(|m| m.content.as_str()).collect::<Vec<_>>(), vec!["m2", "m1"]);

        let last = repo.list_channel_messages(&channel.id, &owner.id, 2, Some(&second[1].id)).await.unwrap();
        assert_eq!(last.len(), 1);
        assert_eq!(last[0].id, sent[0].id);

        let err = repo.list_channel_messages(&channel.id, &owner.id, 2, Some(&Uuid::new_v4())).await.unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[rocket::async_test]
    async fn only_author_edits_and_deletes() {
        let repo = memory_repo();
        let owner = create_verified_user(&repo, "owner@example.com").await;
        let member = create_verified_user(&repo, "member@example.com").await;
        let workspace = create_workspace(&repo, &owner.id, "Design").await;
        repo.add_workspace_member(&workspace.id, &member.id).await.unwrap();
        let channel = create_channel(&repo, &workspace.id, &owner.id, "general").await;
        let message = repo.create_channel_message(&channel.id, &text("hello"), &owner.id).await.unwrap();

        let err = repo.edit_message(&message.id, "hijacked", &member.id).await.unwrap_err();
        assert_eq!(err.public_message(), "You do not have permission to edit this message");
        assert!(repo.delete_message(&message.id, &member.id).await.is_err());

        let edited = repo.edit_message(&message.id, "hello there", &owner.id).await.unwrap();
        assert!(edited.edited);
        repo.delete_message(&message.id, &owner.id).await.unwrap();
        assert!(repo.list_messages(&channel.id, 10, None).await.unwrap().is_empty());
    }

    #[rocket::async_test]
    async fn outsiders_cannot_post() {
        let repo = memory_repo();
        let owner = create_verified_user(&repo, "owner@example.com").await;
        let outsider = create_verified_user(&repo, "outsider@example.com").await;
        let workspace = create_workspace(&repo, &owner.id, "Design").await;
        let channel = create_channel(&repo, &workspace.id, &owner.id, "general").await;

        let err = repo.create_channel_message(&channel.id, &text("hi"), &outsider.id).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[rocket::async_test]
    async fn pin_toggles_and_indexes() {
        let repo = memory_repo();
        let owner = create_verified_user(&repo, "owner@example.com").await;
        let workspace = create_workspace(&repo, &owner.id, "Design").await;
        let channel = create_channel(&repo, &workspace.id, &owner.id, "general").await;
        let message = repo.create_channel_message(&channel.id, &text("pin me"), &owner.id).await.unwrap();

        assert!(repo.toggle_pin(&message.id, &owner.id).await.unwrap().is_pinned);
        assert_eq!(repo.list_pinned_messages(&channel.id).await.unwrap().len(), 1);
        assert!(!repo.toggle_pin(&message.id, &owner.id).await.unwrap().is_pinned);
        assert!(repo.list_pinned_messages(&channel.id).await.unwrap().is_empty());
    }

    #[rocket::async_test]
    async fn reactions_add_and_remove() {
        let repo = memory_repo();
        let owner = create_verified_user(&repo, "owner@example.com").await;
        let workspace = create_workspace(&repo, &owner.id, "Design").await;
        let channel = create_channel(&repo, &workspace.id, &owner.id, "general").await;
        let message = repo.create_channel_message(&channel.id, &text("react"), &owner.id).await.unwrap();

        let reacted = repo.add_reaction(&message.id, "🎉", &owner.id).await.unwrap();
        assert_eq!(reacted.reactions["🎉"], vec![owner.id]);
        let cleared = repo.remove_reaction(&message.id, "🎉", &owner.id).await.unwrap();
        assert!(cleared.reactions.is_empty());
    }

    #[rocket::async_test]
    async fn direct_messages_need_a_relationship() {
        let repo = memory_repo();
        let a = create_verified_user(&repo, "a@example.com").await;
        let b = create_verified_user(&repo, "b@example.com").await;

        let err = repo.create_direct_message(&a.id, &b.id, &text("hi")).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        let workspace = create_workspace(&repo, &a.id, "Shared").await;
        repo.add_workspace_member(&workspace.id, &b.id).await.unwrap();
        let sent = repo.create_direct_message(&a.id, &b.id, &text("hi")).await.unwrap();
        assert_eq!(sent.channel_id, conversation_id(&a.id, &b.id));

        let seen_by_b = repo.list_direct_messages(&b.id, &a.id, 10, None).await.unwrap();
        assert_eq!(seen_by_b.len(), 1);

        repo.block_user(&b.id, &a.id).await.unwrap();
        assert!(repo.create_direct_message(&a.id, &b.id, &text("hello?")).await.is_err());
    }
}
