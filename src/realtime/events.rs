use crate::models::message::Message;
use crate::models::notification::Notification;
use crate::models::user::UserStatus;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Frames sent by clients: `{"event": "<name>", "data": {...}}`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all_fields = "camelCase")]
pub enum ClientEvent {
    #[serde(rename = "authenticate")]
    Authenticate { user_id: Uuid },
    #[serde(rename = "channel:join")]
    ChannelJoin { channel_id: Uuid },
    #[serde(rename = "channel:leave")]
    ChannelLeave { channel_id: Uuid },
    #[serde(rename = "document:join")]
    DocumentJoin { document_id: Uuid },
    #[serde(rename = "document:leave")]
    DocumentLeave { document_id: Uuid },
    /// `revision` is the revision the edit was based on; absent means "apply unconditionally".
    #[serde(rename = "document:update")]
    DocumentUpdate {
        document_id: Uuid,
        content: String,
        #[serde(default)]
        revision: Option<u64>,
    },
    #[serde(rename = "typing:start")]
    TypingStart { channel_id: Uuid },
    #[serde(rename = "typing:stop")]
    TypingStop { channel_id: Uuid },
    #[serde(rename = "user:status")]
    UserStatus { status: UserStatus },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    #[serde(rename = "user:status")]
    UserStatus { user_id: Uuid, status: UserStatus },
    #[serde(rename = "document:update")]
    DocumentUpdate {
        document_id: Uuid,
        content: String,
        user_id: Uuid,
        revision: u64,
    },
    /// Sent to a connection joining a document room.
    #[serde(rename = "document:state")]
    DocumentState { document_id: Uuid, content: String, revision: u64 },
    /// Confirms the sender's update and the revision it was assigned.
    #[serde(rename = "document:ack")]
    DocumentAck { document_id: Uuid, revision: u64 },
    /// The sender's update was based on a stale revision and was dropped.
    #[serde(rename = "document:resync")]
    DocumentResync { document_id: Uuid, content: String, revision: u64 },
    #[serde(rename = "typing:start")]
    TypingStart { channel_id: Uuid, user_id: Uuid },
    #[serde(rename = "typing:stop")]
    TypingStop { channel_id: Uuid, user_id: Uuid },
    #[serde(rename = "message:new")]
    MessageNew(Message),
    #[serde(rename = "message:updated")]
    MessageUpdated(Message),
    #[serde(rename = "message:deleted")]
    MessageDeleted { message_id: Uuid, channel_id: Uuid },
    #[serde(rename = "notification:new")]
    NotificationNew(Notification),
    #[serde(rename = "error")]
    Error { message: String },
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error { message: message.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn client_frames_parse() {
        let channel_id = Uuid::new_v4();
        let raw = json!({ "event": "channel:join", "data": { "channelId": channel_id } });
        assert_eq!(serde_json::from_value::<ClientEvent>(raw).unwrap(), ClientEvent::ChannelJoin { channel_id });

        let raw = json!({ "event": "user:status", "data": { "status": "dnd" } });
        assert_eq!(
            serde_json::from_value::<ClientEvent>(raw).unwrap(),
            ClientEvent::UserStatus { status: UserStatus::Dnd }
        );
    }

    #[test]
    fn revision_is_optional() {
        let document_id = Uuid::new_v4();
        let raw = json!({ "event": "document:update", "data": { "documentId": document_id, "content": "# Notes" } });
        match serde_json::from_value::<ClientEvent>(raw).unwrap() {
            ClientEvent::DocumentUpdate { revision, .. } => assert_eq!(revision, None),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn unknown_events_are_rejected() {
        let raw = json!({ "event": "server:shutdown", "data": {} });
        assert!(serde_json::from_value::<ClientEvent>(raw).is_err());
    }

    #[test]
    fn server_frames_use_event_and_data() {
        let user_id = Uuid::new_v4();
        let value = serde_json::to_value(ServerEvent::UserStatus {
            user_id,
            status: UserStatus::Online,
        })
        .unwrap();
        assert_eq!(value, json!({ "event": "user:status", "data": { "userId": user_id, "status": "online" } }));

        let value = serde_json::to_value(ServerEvent::error("Unauthorized")).unwrap();
        assert_eq!(value, json!({ "event": "error", "data": { "message": "Unauthorized" } }));
    }
}
