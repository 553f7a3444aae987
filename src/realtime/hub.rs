use crate::config::{PresenceScope, RealtimeConfig};
use crate::database::repository::Repository;
use crate::error::app_error::AppError;
use crate::models::document::Document;
use crate::models::user::UserStatus;
use crate::realtime::events::{ClientEvent, ServerEvent};
use std::collections::{HashMap, HashSet};
use tokio::sync::{Mutex, RwLock, mpsc};
use uuid::Uuid;

pub type ConnectionId = Uuid;

/// Sender half feeding one websocket.
pub type EventSender = mpsc::UnboundedSender<ServerEvent>;

struct Connection {
    /// Set once the connection authenticates.
    user_id: Option<Uuid>,
    /// User named by the session cookies on the upgrade request, if any.
    session_user: Option<Uuid>,
    /// Joined channel rooms, keyed by channel with the owning workspace as value.
    channels: HashMap<Uuid, Uuid>,
    /// Joined document rooms, keyed by document with the owning workspace as value.
    documents: HashMap<Uuid, Uuid>,
    sender: EventSender,
}

impl Connection {
    fn is_user(&self, user_id: &Uuid) -> bool {
        self.user_id.as_ref() == Some(user_id)
    }
}

/// Authoritative copy of a document while at least one connection has it open.
struct DocumentState {
    content: String,
    revision: u64,
}

/// Connection table, room membership and per-document sequencing.
///
/// Lock order is `documents` before `connections` wherever both are held.
pub struct RealtimeHub {
    repo: Repository,
    config: RealtimeConfig,
    connections: RwLock<HashMap<ConnectionId, Connection>>,
    /// For each authenticated user, the users allowed to see their status.
    audiences: RwLock<HashMap<Uuid, HashSet<Uuid>>>,
    documents: Mutex<HashMap<Uuid, DocumentState>>,
}

impl RealtimeHub {
    pub fn new(repo: Repository, config: RealtimeConfig) -> Self {
        Self {
            repo,
            config,
            connections: RwLock::new(HashMap::new()),
            audiences: RwLock::new(HashMap::new()),
            documents: Mutex::new(HashMap::new()),
        }
    }

    /// Registers an anonymous connection and returns the stream of events destined for it.
    pub async fn connect(&self, session_user: Option<Uuid>) -> (ConnectionId, mpsc::UnboundedReceiver<ServerEvent>) {
        let id = Uuid::new_v4();
        let (sender, receiver) = mpsc::unbounded_channel();
        self.connections.write().await.insert(
            id,
            Connection {
                user_id: None,
                session_user,
                channels: HashMap::new(),
                documents: HashMap::new(),
                sender,
            },
        );
        tracing::info!(connection_id = %id, "realtime connection opened");
        (id, receiver)
    }

    pub async fn disconnect(&self, connection_id: ConnectionId) {
        let Some(connection) = self.connections.write().await.remove(&connection_id) else {
            return;
        };

        for document_id in connection.documents.keys() {
            self.release_document_if_idle(document_id).await;
        }

        if let Some(user_id) = connection.user_id {
            self.go_offline_if_idle(&user_id).await;
        }

        tracing::info!(connection_id = %connection_id, user_id = ?connection.user_id, "realtime connection closed");
    }

    /// Applies one client event. Failures are reported to the connection as an `error` event.
    pub async fn handle(&self, connection_id: ConnectionId, event: ClientEvent) {
        if let Err(e) = self.dispatch(connection_id, event).await {
            if e.is_internal() {
                tracing::error!(error = ?e, connection_id = %connection_id, "realtime event failed");
            } else {
                tracing::debug!(error = %e, connection_id = %connection_id, "realtime event rejected");
            }
            self.send_to_connection(&connection_id, ServerEvent::error(e.public_message())).await;
        }
    }

    async fn is_connected(&self, user_id: &Uuid) -> bool {
        self.connections.read().await.values().any(|c| c.is_user(user_id))
    }

    /// Marks the user offline once their last connection is gone. A connection that
    /// authenticates while the status is being written wins, and keeps them online.
    async fn go_offline_if_idle(&self, user_id: &Uuid) {
        if self.is_connected(user_id).await {
            return;
        }
        if let Err(e) = self.repo.update_user_status(user_id, UserStatus::Offline).await {
            tracing::error!(error = ?e, user_id = %user_id, "failed to persist offline status");
        }

        let audience = self.status_audience(user_id).await;
        {
            // Authentication waits on this guard, so its online event follows ours.
            let connections = self.connections.read().await;
            if !connections.values().any(|c| c.is_user(user_id)) {
                deliver_status(&connections, user_id, UserStatus::Offline, audience.as_ref());
                drop(connections);

                let mut audiences = self.audiences.write().await;
                if !self.is_connected(user_id).await {
                    audiences.remove(user_id);
                }
                return;
            }
        }

        if let Err(e) = self.repo.update_user_status(user_id, UserStatus::Online).await {
            tracing::error!(error = ?e, user_id = %user_id, "failed to restore online status");
        }
        tracing::debug!(user_id = %user_id, "user reconnected while going offline");
    }

    async fn dispatch(&self, connection_id: ConnectionId, event: ClientEvent) -> Result<(), AppError> {
        match event {
            ClientEvent::Authenticate { user_id } => self.authenticate(connection_id, user_id).await,
            ClientEvent::ChannelJoin { channel_id } => {
                let user_id = self.require_user(&connection_id).await?;
                let (channel, _) = self.repo.channel_for_member(&channel_id, &user_id).await?;
                if let Some(connection) = self.connections.write().await.get_mut(&connection_id) {
                    connection.channels.insert(channel_id, channel.workspace_id);
                }
                Ok(())
            }
            ClientEvent::ChannelLeave { channel_id } => {
                if let Some(connection) = self.connections.write().await.get_mut(&connection_id) {
                    connection.channels.remove(&channel_id);
                }
                Ok(())
            }
            ClientEvent::DocumentJoin { document_id } => self.join_document(connection_id, document_id).await,
            ClientEvent::DocumentLeave { document_id } => {
                self.leave_document(&connection_id, &document_id).await;
                Ok(())
            }
            ClientEvent::DocumentUpdate {
                document_id,
                content,
                revision,
            } => self.relay_document_update(connection_id, document_id, content, revision).await,
            ClientEvent::TypingStart { channel_id } => {
                let user_id = self.require_user(&connection_id).await?;
                self.relay_typing(connection_id, user_id, channel_id, ServerEvent::TypingStart { channel_id, user_id }).await
            }
            ClientEvent::TypingStop { channel_id } => {
                let user_id = self.require_user(&connection_id).await?;
                self.relay_typing(connection_id, user_id, channel_id, ServerEvent::TypingStop { channel_id, user_id }).await
            }
            ClientEvent::UserStatus { status } => {
                let user_id = self.require_user(&connection_id).await?;
                self.repo.update_user_status(&user_id, status).await?.ok_or(AppError::UserNotFound)?;
                self.broadcast_status(&user_id, status).await;
                Ok(())
            }
        }
    }

    async fn authenticate(&self, connection_id: ConnectionId, user_id: Uuid) -> Result<(), AppError> {
        let (bound, session_user) = match self.connections.read().await.get(&connection_id) {
            Some(connection) => (connection.user_id, connection.session_user),
            None => return Ok(()),
        };

        match bound {
            Some(current) if current == user_id => return Ok(()),
            Some(_) => return Err(AppError::BadRequest("Connection is already authenticated".to_string())),
            None => {}
        }
        if self.config.require_session && session_user != Some(user_id) {
            return Err(AppError::Unauthorized);
        }
        if self.repo.get_user_by_id(&user_id).await?.is_none() {
            return Err(AppError::UserNotFound);
        }

        let audience = match self.config.presence_scope {
            PresenceScope::Contacts => Some(self.compute_audience(&user_id).await?),
            PresenceScope::Global => None,
        };
        match self.connections.write().await.get_mut(&connection_id) {
            Some(connection) => connection.user_id = Some(user_id),
            None => return Ok(()),
        }
        if let Some(audience) = audience {
            self.audiences.write().await.insert(user_id, audience);
        }

        self.repo.update_user_status(&user_id, UserStatus::Online).await?;
        self.broadcast_status(&user_id, UserStatus::Online).await;
        tracing::info!(connection_id = %connection_id, user_id = %user_id, "realtime connection authenticated");
        Ok(())
    }

    async fn require_user(&self, connection_id: &ConnectionId) -> Result<Uuid, AppError> {
        self.connections
            .read()
            .await
            .get(connection_id)
            .and_then(|c| c.user_id)
            .ok_or(AppError::Unauthorized)
    }

    async fn compute_audience(&self, user_id: &Uuid) -> Result<HashSet<Uuid>, AppError> {
        let mut audience = self.repo.workspace_peers(user_id).await?;
        audience.extend(self.repo.friend_ids(user_id).await?);
        Ok(audience)
    }

    /// Recomputes who sees the status of each listed user that is currently connected.
    /// Call after workspace membership or friendship changes.
    pub async fn refresh_presence(&self, user_ids: &[Uuid]) {
        if self.config.presence_scope != PresenceScope::Contacts {
            return;
        }
        for user_id in user_ids {
            if !self.audiences.read().await.contains_key(user_id) {
                continue;
            }
            match self.compute_audience(user_id).await {
                Ok(audience) => {
                    self.audiences.write().await.insert(*user_id, audience);
                }
                Err(e) => tracing::error!(error = ?e, user_id = %user_id, "failed to refresh presence audience"),
            }
        }
    }

    /// `None` means everyone may see the user's status.
    async fn status_audience(&self, user_id: &Uuid) -> Option<HashSet<Uuid>> {
        match self.config.presence_scope {
            PresenceScope::Global => None,
            PresenceScope::Contacts => Some(self.audiences.read().await.get(user_id).cloned().unwrap_or_default()),
        }
    }

    /// Pushes a status change to everyone allowed to see it.
    pub async fn broadcast_status(&self, user_id: &Uuid, status: UserStatus) {
        let audience = self.status_audience(user_id).await;
        let connections = self.connections.read().await;
        deliver_status(&connections, user_id, status, audience.as_ref());
    }

    async fn join_document(&self, connection_id: ConnectionId, document_id: Uuid) -> Result<(), AppError> {
        let user_id = self.require_user(&connection_id).await?;
        let document = self.repo.document_for_viewer(&document_id, &user_id).await?;
        self.enter_document(connection_id, document).await;
        Ok(())
    }

    /// Adds the connection to the room and sends it the live state. Nothing is loaded
    /// when the connection closed while access was being checked.
    async fn enter_document(&self, connection_id: ConnectionId, document: Document) {
        let mut documents = self.documents.lock().await;
        let mut connections = self.connections.write().await;
        let Some(connection) = connections.get_mut(&connection_id) else {
            return;
        };
        let state = documents.entry(document.id).or_insert_with(|| DocumentState {
            content: document.content,
            revision: 0,
        });
        connection.documents.insert(document.id, document.workspace_id);
        let _ = connection.sender.send(ServerEvent::DocumentState {
            document_id: document.id,
            content: state.content.clone(),
            revision: state.revision,
        });
    }

    /// Sequences an edit and fans it out to the room minus the sender. Holding the
    /// document lock while sending keeps every receiver's stream in the same order.
    /// Access is checked again on every edit, so a revoked viewer is dropped from the room.
    async fn relay_document_update(&self, connection_id: ConnectionId, document_id: Uuid, content: String, revision: Option<u64>) -> Result<(), AppError> {
        let user_id = self.require_user(&connection_id).await?;
        if let Err(e) = self.repo.document_for_viewer(&document_id, &user_id).await {
            if !e.is_internal() {
                self.leave_document(&connection_id, &document_id).await;
            }
            return Err(e);
        }

        let mut documents = self.documents.lock().await;
        let connections = self.connections.read().await;
        let Some(sender) = connections.get(&connection_id) else {
            return Ok(());
        };
        let state = match documents.get_mut(&document_id) {
            Some(state) if sender.documents.contains_key(&document_id) => state,
            _ => return Err(AppError::BadRequest("Join the document before editing it".to_string())),
        };

        if let Some(base) = revision
            && base != state.revision
        {
            let _ = sender.sender.send(ServerEvent::DocumentResync {
                document_id,
                content: state.content.clone(),
                revision: state.revision,
            });
            tracing::debug!(document_id = %document_id, base, current = state.revision, "stale document update dropped");
            return Ok(());
        }

        state.revision += 1;
        state.content = content.clone();
        let event = ServerEvent::DocumentUpdate {
            document_id,
            content,
            user_id,
            revision: state.revision,
        };
        for (id, connection) in connections.iter() {
            if *id != connection_id && connection.documents.contains_key(&document_id) {
                let _ = connection.sender.send(event.clone());
            }
        }
        let _ = sender.sender.send(ServerEvent::DocumentAck {
            document_id,
            revision: state.revision,
        });
        Ok(())
    }

    /// Folds a save made outside the websocket into the live sequence of an open document,
    /// so editors in the room converge on the stored content. No-op when nobody has it open.
    pub async fn publish_document_save(&self, document_id: &Uuid, content: &str, user_id: &Uuid) {
        let mut documents = self.documents.lock().await;
        let Some(state) = documents.get_mut(document_id) else {
            return;
        };
        if state.content == content {
            return;
        }

        state.revision += 1;
        state.content = content.to_string();
        let event = ServerEvent::DocumentUpdate {
            document_id: *document_id,
            content: state.content.clone(),
            user_id: *user_id,
            revision: state.revision,
        };
        let connections = self.connections.read().await;
        for connection in connections.values() {
            if connection.documents.contains_key(document_id) {
                let _ = connection.sender.send(event.clone());
            }
        }
    }

    async fn release_document_if_idle(&self, document_id: &Uuid) {
        let mut documents = self.documents.lock().await;
        let in_use = self.connections.read().await.values().any(|c| c.documents.contains_key(document_id));
        if !in_use {
            documents.remove(document_id);
        }
    }

    async fn leave_document(&self, connection_id: &ConnectionId, document_id: &Uuid) {
        let was_member = match self.connections.write().await.get_mut(connection_id) {
            Some(connection) => connection.documents.remove(document_id).is_some(),
            None => false,
        };
        if was_member {
            self.release_document_if_idle(document_id).await;
        }
    }

    /// Drops every room of `workspace_id` held by the user's connections.
    /// Call after the user leaves or is removed from the workspace, or it is deleted.
    pub async fn evict(&self, user_id: &Uuid, workspace_id: &Uuid) {
        let mut released = HashSet::new();
        let mut evicted = 0;
        {
            let mut connections = self.connections.write().await;
            for connection in connections.values_mut().filter(|c| c.is_user(user_id)) {
                let before = connection.channels.len() + connection.documents.len();
                connection.channels.retain(|_, workspace| *workspace != *workspace_id);
                connection.documents.retain(|document_id, workspace| {
                    let keep = *workspace != *workspace_id;
                    if !keep {
                        released.insert(*document_id);
                    }
                    keep
                });
                evicted += before - connection.channels.len() - connection.documents.len();
            }
        }
        for document_id in &released {
            self.release_document_if_idle(document_id).await;
        }
        if evicted > 0 {
            tracing::info!(user_id = %user_id, workspace_id = %workspace_id, rooms = evicted, "evicted user from workspace rooms");
        }
    }

    /// Drops the user from the document room unless they can still view it,
    /// as a workspace member for instance. Call after a collaborator is removed.
    pub async fn revoke_document(&self, user_id: &Uuid, document_id: &Uuid) {
        match self.repo.document_for_viewer(document_id, user_id).await {
            Ok(_) => return,
            Err(e) if e.is_internal() => {
                tracing::error!(error = ?e, user_id = %user_id, document_id = %document_id, "failed to recheck document access");
                return;
            }
            Err(_) => {}
        }
        let holders: Vec<ConnectionId> = self
            .connections
            .read()
            .await
            .iter()
            .filter(|(_, c)| c.is_user(user_id) && c.documents.contains_key(document_id))
            .map(|(id, _)| *id)
            .collect();
        for connection_id in &holders {
            self.leave_document(connection_id, document_id).await;
        }
    }

    pub async fn close_channel(&self, channel_id: &Uuid) {
        for connection in self.connections.write().await.values_mut() {
            connection.channels.remove(channel_id);
        }
    }

    /// Empties the room of a deleted document.
    pub async fn close_document(&self, document_id: &Uuid) {
        let mut documents = self.documents.lock().await;
        let mut connections = self.connections.write().await;
        for connection in connections.values_mut() {
            connection.documents.remove(document_id);
        }
        documents.remove(document_id);
    }

    /// Membership is checked again before relaying, so a removed member is dropped from the room.
    async fn relay_typing(&self, connection_id: ConnectionId, user_id: Uuid, channel_id: Uuid, event: ServerEvent) -> Result<(), AppError> {
        if let Err(e) = self.repo.channel_for_member(&channel_id, &user_id).await {
            if !e.is_internal()
                && let Some(connection) = self.connections.write().await.get_mut(&connection_id)
            {
                connection.channels.remove(&channel_id);
            }
            return Err(e);
        }

        let connections = self.connections.read().await;
        if !connections.get(&connection_id).is_some_and(|c| c.channels.contains_key(&channel_id)) {
            return Err(AppError::BadRequest("Join the channel first".to_string()));
        }
        for (id, connection) in connections.iter() {
            if *id != connection_id && connection.channels.contains_key(&channel_id) {
                let _ = connection.sender.send(event.clone());
            }
        }
        Ok(())
    }

    async fn send_to_connection(&self, connection_id: &ConnectionId, event: ServerEvent) {
        if let Some(connection) = self.connections.read().await.get(connection_id) {
            let _ = connection.sender.send(event);
        }
    }

    /// Returns how many connections received the event.
    pub async fn send_to_user(&self, user_id: &Uuid, event: ServerEvent) -> usize {
        let connections = self.connections.read().await;
        let mut count = 0;
        for connection in connections.values() {
            if connection.is_user(user_id) {
                let _ = connection.sender.send(event.clone());
                count += 1;
            }
        }
        count
    }

    /// Delivers to every connection in the channel room.
    pub async fn send_to_channel(&self, channel_id: &Uuid, event: ServerEvent) {
        let connections = self.connections.read().await;
        for connection in connections.values() {
            if connection.channels.contains_key(channel_id) {
                let _ = connection.sender.send(event.clone());
            }
        }
    }

    pub async fn send_error(&self, connection_id: &ConnectionId, message: &str) {
        self.send_to_connection(connection_id, ServerEvent::error(message)).await;
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }
}

fn deliver_status(connections: &HashMap<ConnectionId, Connection>, user_id: &Uuid, status: UserStatus, audience: Option<&HashSet<Uuid>>) {
    let event = ServerEvent::UserStatus { user_id: *user_id, status };
    for connection in connections.values() {
        let deliver = match (audience, connection.user_id) {
            (None, _) => true,
            (Some(_), Some(recipient)) if recipient == *user_id => true,
            (Some(audience), Some(recipient)) => audience.contains(&recipient),
            (Some(_), None) => false,
        };
        if deliver {
            let _ = connection.sender.send(event.clone());
        }
    }
}
