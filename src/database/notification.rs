use crate::database::repository::{Repository, now_score};
use crate::error::app_error::AppError;
use crate::models::notification::{NewNotification, Notification};
use chrono::Utc;
use uuid::Uuid;

fn notification_key(id: &Uuid) -> String {
    format!("notification:{}", id)
}

fn user_notifications_key(user_id: &Uuid) -> String {
    format!("user:notifications:{}", user_id)
}

/// Same scores as the full index, holding only unread ids.
fn user_unread_key(user_id: &Uuid) -> String {
    format!("user:notifications:unread:{}", user_id)
}

impl Repository {
    pub async fn create_notification(&self, new: NewNotification) -> Result<Notification, AppError> {
        let now = Utc::now();
        let notification = Notification {
            id: Uuid::new_v4(),
            user_id: new.user_id,
            notification_type: new.notification_type,
            title: new.title,
            message: new.message,
            source_id: new.source_id,
            source_type: new.source_type,
            read: false,
            version: 0,
            created_at: now,
            updated_at: now,
        };

        self.insert(&notification_key(&notification.id), &notification).await?;
        let member = notification.id.to_string();
        let score = now_score();
        self.store.zadd(&user_notifications_key(&notification.user_id), &member, score).await?;
        self.store.zadd(&user_unread_key(&notification.user_id), &member, score).await?;
        Ok(notification)
    }

    pub async fn get_notification(&self, id: &Uuid) -> Result<Option<Notification>, AppError> {
        self.load(&notification_key(id)).await
    }

    fn ensure_recipient(notification: &Notification, actor: &Uuid) -> Result<(), AppError> {
        if notification.user_id == *actor {
            Ok(())
        } else {
            Err(AppError::forbidden("manage this notification"))
        }
    }

    pub async fn mark_notification_read(&self, id: &Uuid, actor: &Uuid) -> Result<Notification, AppError> {
        let notification = self
            .modify(&notification_key(id), |notification: &mut Notification| {
                Self::ensure_recipient(notification, actor)?;
                notification.read = true;
                Ok(())
            })
            .await?
            .ok_or_else(|| AppError::not_found("Notification"))?;
        self.store.zrem(&user_unread_key(actor), &id.to_string()).await?;
        Ok(notification)
    }

    /// Returns how many notifications changed. Only the unread index is walked.
    pub async fn mark_all_notifications_read(&self, user_id: &Uuid) -> Result<usize, AppError> {
        let unread_key = user_unread_key(user_id);
        let mut changed = 0;
        for member in self.store.zrange_all(&unread_key).await? {
            if let Ok(id) = Uuid::parse_str(&member) {
                let updated = self
                    .modify_with(&notification_key(&id), |n: &mut Notification| {
                        let was_unread = !n.read;
                        n.read = true;
                        Ok(was_unread)
                    })
                    .await?;
                if updated.is_some_and(|(_, was_unread)| was_unread) {
                    changed += 1;
                }
            }
            self.store.zrem(&unread_key, &member).await?;
        }
        Ok(changed)
    }

    pub async fn delete_notification(&self, id: &Uuid, actor: &Uuid) -> Result<(), AppError> {
        let notification = self.get_notification(id).await?.ok_or_else(|| AppError::not_found("Notification"))?;
        Self::ensure_recipient(&notification, actor)?;
        let member = id.to_string();
        self.store.zrem(&user_notifications_key(actor), &member).await?;
        self.store.zrem(&user_unread_key(actor), &member).await?;
        self.store.del(&notification_key(id)).await
    }

    /// Newest first. Only the requested page is read from the index.
    pub async fn list_notifications(&self, user_id: &Uuid, limit: usize, offset: usize, unread_only: bool) -> Result<Vec<Notification>, AppError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let key = if unread_only { user_unread_key(user_id) } else { user_notifications_key(user_id) };
        let ids = self.store.zrevrange(&key, offset, offset.saturating_add(limit - 1)).await?;
        let page: Vec<Notification> = self
            .load_many(ids.iter().filter_map(|id| Uuid::parse_str(id).ok()).map(|id| notification_key(&id)).collect::<Vec<_>>())
            .await?;
        Ok(page.into_iter().filter(|n| !unread_only || !n.read).collect())
    }

    pub async fn unread_notification_count(&self, user_id: &Uuid) -> Result<usize, AppError> {
        self.store.zcard(&user_unread_key(user_id)).await
    }
}
