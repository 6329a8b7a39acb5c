use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use huddle_types::error::{ChatError, ChatResult};
use huddle_types::events::{ClientCommand, MemberStatus, ServerEvent};
use huddle_types::models::{AttachmentRef, Message, MessageType, Room};

use crate::identity::Identity;
use crate::registry::{ConnId, ConnectionRegistry};
use crate::store::Store;

/// Longest accepted message body, in characters.
pub const MAX_CONTENT_CHARS: usize = 1000;

/// Default per-connection outbound queue length.
pub const DEFAULT_OUTBOUND_QUEUE: usize = 256;

/// Validates room requests against membership, persists messages and fans
/// events out to live connections. Holds no state of its own beyond the
/// per-room send locks.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    store: Store,
    registry: ConnectionRegistry,
    outbound_queue: usize,

    /// Serializes append + fan-out per room so delivery order matches append order
    room_locks: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
}

impl Dispatcher {
    pub fn new(store: Store, outbound_queue: usize) -> Self {
        let registry = ConnectionRegistry::new(store.clone());
        Self {
            inner: Arc::new(DispatcherInner {
                store,
                registry,
                outbound_queue: outbound_queue.max(1),
                room_locks: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn store(&self) -> &Store {
        &self.inner.store
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.inner.registry
    }

    pub fn outbound_queue(&self) -> usize {
        self.inner.outbound_queue
    }

    // -- Connection lifecycle --

    /// Registers an authenticated connection and acknowledges it.
    pub fn handle_connect(
        &self,
        conn_id: ConnId,
        identity: Identity,
        outbound: mpsc::Sender<ServerEvent>,
    ) -> CancellationToken {
        let ack = ServerEvent::ConnectionEstablished {
            user_id: identity.user_id,
            username: identity.username.clone(),
        };
        let closed = self.registry().on_connect(conn_id, identity, outbound);
        let _ = self.registry().deliver(conn_id, ack);
        closed
    }

    /// Full cleanup after the transport closed. Remaining viewers of each
    /// room the connection had joined see it leave.
    pub fn handle_disconnect(&self, conn_id: ConnId) {
        let identity = self.registry().identity_for(conn_id);
        let rooms = self.registry().rooms_of(conn_id);
        if !self.registry().on_disconnect(conn_id) {
            return;
        }

        if let Some(identity) = identity {
            for room_id in rooms {
                self.broadcast_status(room_id, conn_id, &identity, MemberStatus::Left);
            }
        }
    }

    pub async fn handle_command(&self, conn_id: ConnId, cmd: ClientCommand) -> ChatResult<()> {
        match cmd {
            // Connections are identified before they reach the dispatcher.
            ClientCommand::Identify { .. } => Ok(()),
            ClientCommand::Join { room_id } => self.handle_join(conn_id, room_id).await,
            ClientCommand::Leave { room_id } => {
                self.handle_leave(conn_id, room_id);
                Ok(())
            }
            ClientCommand::Send {
                room_id,
                content,
                message_type,
                attachment,
            } => self
                .handle_send(conn_id, room_id, content, message_type, attachment)
                .await
                .map(|_| ()),
        }
    }

    // -- Room operations --

    pub async fn handle_join(&self, conn_id: ConnId, room_id: Uuid) -> ChatResult<()> {
        let identity = self.resolve(conn_id)?;
        let room = self.store().get_room(room_id).await?;
        if !room.has_member(identity.user_id) {
            warn!(
                "{} ({}) tried to join room {} without membership",
                identity.username, identity.user_id, room_id
            );
            return Err(ChatError::Forbidden);
        }

        let rejoin = self.registry().is_subscribed(conn_id, room_id);
        if !self.registry().subscribe(conn_id, room_id).await? {
            // Membership was confirmed above, so the connection went away meanwhile.
            return Err(ChatError::Unauthenticated);
        }

        let _ = self.registry().deliver(
            conn_id,
            ServerEvent::RoomJoined {
                room_id,
                kind: room.kind,
            },
        );
        if !rejoin {
            info!("{} ({}) joined room {}", identity.username, identity.user_id, room_id);
            self.broadcast_status(room_id, conn_id, &identity, MemberStatus::Joined);
        }
        Ok(())
    }

    /// Unsubscribes if subscribed; otherwise does nothing.
    pub fn handle_leave(&self, conn_id: ConnId, room_id: Uuid) {
        let Some(identity) = self.registry().identity_for(conn_id) else {
            return;
        };
        if !self.registry().unsubscribe(conn_id, room_id) {
            return;
        }

        info!("{} ({}) left room {}", identity.username, identity.user_id, room_id);
        let _ = self
            .registry()
            .deliver(conn_id, ServerEvent::RoomLeft { room_id });
        self.broadcast_status(room_id, conn_id, &identity, MemberStatus::Left);
    }

    pub async fn handle_send(
        &self,
        conn_id: ConnId,
        room_id: Uuid,
        content: String,
        message_type: MessageType,
        attachment: Option<AttachmentRef>,
    ) -> ChatResult<Message> {
        let identity = self.resolve(conn_id)?;
        self.send_message(&identity, room_id, content, message_type, attachment)
            .await
    }

    /// Checks membership, persists, then delivers. Nothing is persisted or
    /// delivered if a check fails; once the append succeeds the message
    /// stays even if some deliveries fail.
    pub async fn send_message(
        &self,
        sender: &Identity,
        room_id: Uuid,
        content: String,
        message_type: MessageType,
        attachment: Option<AttachmentRef>,
    ) -> ChatResult<Message> {
        let room = self.store().get_room(room_id).await?;
        if !room.has_member(sender.user_id) {
            warn!(
                "{} ({}) tried to send to room {} without membership",
                sender.username, sender.user_id, room_id
            );
            return Err(ChatError::Forbidden);
        }

        if content.trim().is_empty() && attachment.is_none() {
            return Err(ChatError::invalid("message has no content or attachment"));
        }
        if content.chars().count() > MAX_CONTENT_CHARS {
            return Err(ChatError::invalid(format!(
                "message exceeds {} characters",
                MAX_CONTENT_CHARS
            )));
        }

        let lock = self.room_lock(room_id);
        let result = {
            let _guard = lock.lock().await;
            let result = self
                .store()
                .append(room_id, sender.user_id, content, message_type, attachment)
                .await;
            if let Ok(message) = &result {
                // Members may have been added while this send waited for the lock.
                let current = self.store().get_room(room_id).await.unwrap_or(room);
                self.fan_out(&current, message);
            }
            result
        };
        drop(lock);
        self.release_room_lock(room_id);

        result
    }

    fn fan_out(&self, room: &Room, message: &Message) {
        let subscribers = self.registry().connections_for(room.id);
        let delivered = self
            .registry()
            .deliver_many(subscribers, &ServerEvent::new_message(message));

        let notification = ServerEvent::notification(message);
        let notified: usize = room
            .member_ids()
            .filter(|&id| id != message.sender_id)
            .map(|id| {
                let conns = self.registry().connections_for_user(id);
                self.registry().deliver_many(conns, &notification)
            })
            .sum();

        debug!(
            "Message {} in room {}: {} deliveries, {} notifications",
            message.id, room.id, delivered, notified
        );
    }

    // -- Queries --

    /// Room history for a member.
    pub async fn history(
        &self,
        user_id: Uuid,
        room_id: Uuid,
        since_id: Option<i64>,
        limit: Option<u32>,
    ) -> ChatResult<Vec<Message>> {
        if !self.store().is_member(room_id, user_id).await? {
            return Err(ChatError::Forbidden);
        }
        self.store().list_by_room(room_id, since_id, limit).await
    }

    pub async fn search(
        &self,
        user_id: Uuid,
        query: String,
        limit: Option<u32>,
    ) -> ChatResult<Vec<Message>> {
        self.store().search(user_id, query, limit).await
    }

    /// Tells each listed member, on their personal channel, that they now
    /// belong to `room`.
    pub fn announce_room<I>(&self, room: &Room, members: I)
    where
        I: IntoIterator<Item = Uuid>,
    {
        for user_id in members {
            let event = ServerEvent::RoomAdded {
                room_id: room.id,
                kind: room.kind,
                display_name: room.label_for(user_id),
            };
            let conns = self.registry().connections_for_user(user_id);
            self.registry().deliver_many(conns, &event);
        }
    }

    // -- Helpers --

    fn resolve(&self, conn_id: ConnId) -> ChatResult<Identity> {
        self.registry()
            .identity_for(conn_id)
            .ok_or(ChatError::Unauthenticated)
    }

    fn broadcast_status(&self, room_id: Uuid, origin: ConnId, identity: &Identity, status: MemberStatus) {
        let others = self
            .registry()
            .connections_for(room_id)
            .into_iter()
            .filter(|&c| c != origin);
        self.registry().deliver_many(
            others,
            &ServerEvent::StatusUpdate {
                room_id,
                user_id: identity.user_id,
                username: identity.username.clone(),
                status,
            },
        );
    }

    fn room_lock(&self, room_id: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        self.inner
            .room_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(room_id)
            .or_default()
            .clone()
    }

    fn release_room_lock(&self, room_id: Uuid) {
        let mut locks = self
            .inner
            .room_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if locks
            .get(&room_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&room_id);
        }
    }
}
