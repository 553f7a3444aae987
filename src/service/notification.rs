use crate::database::repository::Repository;
use crate::models::channel::Channel;
use crate::models::message::{Message, extract_mentions};
use crate::models::notification::{NewNotification, Notification, NotificationType, SourceType};
use crate::models::user::User;
use crate::realtime::{RealtimeHub, ServerEvent};
use uuid::Uuid;

/// Persists a notification and pushes it to the recipient's open sockets.
///
/// Notifications are a side effect of an action that already succeeded, so
/// failures are logged and swallowed.
pub async fn notify(repo: &Repository, hub: &RealtimeHub, new: NewNotification) -> Option<Notification> {
    let user_id = new.user_id;
    match repo.create_notification(new).await {
        Ok(notification) => {
            hub.send_to_user(&user_id, ServerEvent::NotificationNew(notification.clone())).await;
            Some(notification)
        }
        Err(e) => {
            tracing::error!(error = ?e, user_id = %user_id, "failed to create notification");
            None
        }
    }
}

/// Notifies every workspace member mentioned as `@<uuid>` in a channel message, except the author.
pub async fn notify_mentions(repo: &Repository, hub: &RealtimeHub, author: &User, channel: &Channel, message: &Message) -> usize {
    let mut notified = 0;
    for mentioned in extract_mentions(&message.content) {
        if mentioned == author.id {
            continue;
        }
        match repo.is_workspace_member(&channel.workspace_id, &mentioned).await {
            Ok(true) => {}
            Ok(false) => continue,
            Err(e) => {
                tracing::warn!(error = ?e, mentioned = %mentioned, "could not resolve mention");
                continue;
            }
        }

        let created = notify(
            repo,
            hub,
            NewNotification {
                user_id: mentioned,
                notification_type: NotificationType::Mention,
                title: "You were mentioned".to_string(),
                message: format!("{} mentioned you in {}", author.name, channel.name),
                source_id: Some(message.id),
                source_type: Some(SourceType::Message),
            },
        )
        .await;
        if created.is_some() {
            notified += 1;
        }
    }
    notified
}

pub async fn notify_reaction(repo: &Repository, hub: &RealtimeHub, reactor: &User, message: &Message, emoji: &str) {
    if message.user_id == reactor.id {
        return;
    }
    notify(
        repo,
        hub,
        NewNotification {
            user_id: message.user_id,
            notification_type: NotificationType::Reaction,
            title: "New reaction".to_string(),
            message: format!("{} reacted with {} to your message", reactor.name, emoji),
            source_id: Some(message.id),
            source_type: Some(SourceType::Message),
        },
    )
    .await;
}

pub async fn notify_direct_message(repo: &Repository, hub: &RealtimeHub, sender: &User, recipient: &Uuid, message: &Message) {
    notify(
        repo,
        hub,
        NewNotification {
            user_id: *recipient,
            notification_type: NotificationType::Message,
            title: "New Message".to_string(),
            message: format!("{} sent you a message", sender.name),
            source_id: Some(message.id),
            source_type: Some(SourceType::Message),
        },
    )
    .await;
}
