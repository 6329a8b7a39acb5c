use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use huddle_types::error::{ChatError, ChatResult};
use huddle_types::events::ServerEvent;

use crate::identity::Identity;
use crate::store::Store;

pub type ConnId = Uuid;

struct LiveConnection {
    identity: Identity,
    /// Bounded outbound queue drained by the connection's writer task.
    outbound: mpsc::Sender<ServerEvent>,
    rooms: HashSet<Uuid>,
    closed: CancellationToken,
}

#[derive(Default)]
struct RegistryState {
    connections: HashMap<ConnId, LiveConnection>,
    /// room_id -> subscribed connections
    rooms: HashMap<Uuid, HashSet<ConnId>>,
    /// user_id -> connections (the user's personal channel)
    users: HashMap<Uuid, HashSet<ConnId>>,
}

/// In-memory map of live connections, their room subscriptions and their
/// users' personal channels. One lock guards all three indexes; it is never
/// held across a storage call or an await.
#[derive(Clone)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<RegistryState>>,
    store: Store,
}

impl ConnectionRegistry {
    pub fn new(store: Store) -> Self {
        Self {
            inner: Arc::new(RwLock::new(RegistryState::default())),
            store,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a connection and subscribes it to its user's personal channel.
    /// The returned token is cancelled when the registry drops the connection.
    pub fn on_connect(
        &self,
        conn_id: ConnId,
        identity: Identity,
        outbound: mpsc::Sender<ServerEvent>,
    ) -> CancellationToken {
        let closed = CancellationToken::new();
        let user_id = identity.user_id;

        let previous = {
            let mut state = self.write();
            let previous = remove_connection(&mut state, conn_id);
            state.users.entry(user_id).or_default().insert(conn_id);
            state.connections.insert(
                conn_id,
                LiveConnection {
                    identity,
                    outbound,
                    rooms: HashSet::new(),
                    closed: closed.clone(),
                },
            );
            previous
        };

        if let Some(old) = previous {
            warn!("Connection {} re-registered, dropping previous state", conn_id);
            old.closed.cancel();
        }
        debug!("Connection {} registered for user {}", conn_id, user_id);
        closed
    }

    /// Removes a connection and all of its subscriptions. Returns `false` if
    /// it was already gone.
    pub fn on_disconnect(&self, conn_id: ConnId) -> bool {
        let removed = remove_connection(&mut self.write(), conn_id);
        match removed {
            Some(conn) => {
                conn.closed.cancel();
                debug!(
                    "Connection {} ({}) removed from {} rooms",
                    conn_id,
                    conn.identity.username,
                    conn.rooms.len()
                );
                true
            }
            None => false,
        }
    }

    pub fn identity_for(&self, conn_id: ConnId) -> Option<Identity> {
        self.read()
            .connections
            .get(&conn_id)
            .map(|c| c.identity.clone())
    }

    /// Subscribes the connection to a room if its user is a member. Returns
    /// `Ok(false)` and changes nothing when the connection is unknown or the
    /// user is not a member.
    pub async fn subscribe(&self, conn_id: ConnId, room_id: Uuid) -> ChatResult<bool> {
        let Some(identity) = self.identity_for(conn_id) else {
            return Ok(false);
        };

        if !self.store.is_member(room_id, identity.user_id).await? {
            return Ok(false);
        }

        let mut state = self.write();
        // The connection may have gone away while membership was checked.
        let Some(conn) = state.connections.get_mut(&conn_id) else {
            return Ok(false);
        };
        conn.rooms.insert(room_id);
        state.rooms.entry(room_id).or_default().insert(conn_id);
        Ok(true)
    }

    /// Returns whether the connection was subscribed.
    pub fn unsubscribe(&self, conn_id: ConnId, room_id: Uuid) -> bool {
        let mut state = self.write();
        let was_subscribed = state
            .connections
            .get_mut(&conn_id)
            .is_some_and(|conn| conn.rooms.remove(&room_id));
        if was_subscribed {
            detach(&mut state.rooms, room_id, conn_id);
        }
        was_subscribed
    }

    pub fn is_subscribed(&self, conn_id: ConnId, room_id: Uuid) -> bool {
        self.read()
            .connections
            .get(&conn_id)
            .is_some_and(|conn| conn.rooms.contains(&room_id))
    }

    pub fn rooms_of(&self, conn_id: ConnId) -> HashSet<Uuid> {
        self.read()
            .connections
            .get(&conn_id)
            .map(|conn| conn.rooms.clone())
            .unwrap_or_default()
    }

    pub fn connections_for(&self, room_id: Uuid) -> HashSet<ConnId> {
        self.read().rooms.get(&room_id).cloned().unwrap_or_default()
    }

    pub fn connections_for_user(&self, user_id: Uuid) -> HashSet<ConnId> {
        self.read().users.get(&user_id).cloned().unwrap_or_default()
    }

    pub fn connection_count(&self) -> usize {
        self.read().connections.len()
    }

    /// Queues an event for one connection without waiting. A full or closed
    /// queue evicts the connection.
    pub fn deliver(&self, conn_id: ConnId, event: ServerEvent) -> ChatResult<()> {
        let outbound = self
            .read()
            .connections
            .get(&conn_id)
            .map(|c| c.outbound.clone())
            .ok_or_else(|| ChatError::Delivery(format!("connection {} is gone", conn_id)))?;

        let reason = match outbound.try_send(event) {
            Ok(()) => return Ok(()),
            Err(TrySendError::Full(_)) => "outbound queue full",
            Err(TrySendError::Closed(_)) => "outbound queue closed",
        };

        warn!("Evicting connection {}: {}", conn_id, reason);
        self.on_disconnect(conn_id);
        Err(ChatError::Delivery(format!("connection {}: {}", conn_id, reason)))
    }

    /// Delivers to every listed connection; failures are local to each
    /// connection. Returns how many deliveries succeeded.
    pub fn deliver_many<I>(&self, conn_ids: I, event: &ServerEvent) -> usize
    where
        I: IntoIterator<Item = ConnId>,
    {
        conn_ids
            .into_iter()
            .filter(|&conn_id| self.deliver(conn_id, event.clone()).is_ok())
            .count()
    }

    /// Cancels every live connection; used on shutdown.
    pub fn close_all(&self) {
        let state = self.read();
        for conn in state.connections.values() {
            conn.closed.cancel();
        }
        info!("Closing {} live connections", state.connections.len());
    }
}

fn remove_connection(state: &mut RegistryState, conn_id: ConnId) -> Option<LiveConnection> {
    let conn = state.connections.remove(&conn_id)?;
    for room_id in &conn.rooms {
        detach(&mut state.rooms, *room_id, conn_id);
    }
    detach(&mut state.users, conn.identity.user_id, conn_id);
    Some(conn)
}

fn detach(index: &mut HashMap<Uuid, HashSet<ConnId>>, key: Uuid, conn_id: ConnId) {
    if let Some(set) = index.get_mut(&key) {
        set.remove(&conn_id);
        if set.is_empty() {
            index.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use huddle_db::Database;

    use super::*;

    struct Harness {
        registry: ConnectionRegistry,
        db: Arc<Database>,
    }

    fn harness() -> Harness {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let store = Store::new(db.clone(), Duration::from_secs(5));
        Harness {
            registry: ConnectionRegistry::new(store),
            db,
        }
    }

    fn user(h: &Harness, name: &str) -> Identity {
        let id = Uuid::new_v4();
        h.db.create_user(id, name, "x").unwrap();
        Identity {
            user_id: id,
            username: name.into(),
        }
    }

    fn connect(h: &Harness, identity: &Identity, capacity: usize) -> (ConnId, mpsc::Receiver<ServerEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(capacity);
        h.registry.on_connect(conn_id, identity.clone(), tx);
        (conn_id, rx)
    }

    #[tokio::test]
    async fn connect_joins_personal_channel() {
        let h = harness();
        let bossm = user(&h, "Bossm");
        let (c1, _rx1) = connect(&h, &bossm, 8);
        let (c2, _rx2) = connect(&h, &bossm, 8);

        assert_eq!(
            h.registry.connections_for_user(bossm.user_id),
            HashSet::from([c1, c2])
        );
        assert_eq!(h.registry.identity_for(c1), Some(bossm));
    }

    #[tokio::test]
    async fn subscribe_requires_membership() {
        let h = harness();
        let bossm = user(&h, "Bossm");
        let jam = user(&h, "Jam");
        let buboy = user(&h, "Buboy");
        let room = h.db.get_or_create_direct(bossm.user_id, jam.user_id).unwrap();

        let (member, _rx1) = connect(&h, &bossm, 8);
        let (outsider, _rx2) = connect(&h, &buboy, 8);

        assert!(h.registry.subscribe(member, room.id).await.unwrap());
        assert!(!h.registry.subscribe(outsider, room.id).await.unwrap());
        assert_eq!(h.registry.connections_for(room.id), HashSet::from([member]));
        assert!(!h.registry.is_subscribed(outsider, room.id));
    }

    #[tokio::test]
    async fn disconnect_cleans_up_everything() {
        let h = harness();
        let bossm = user(&h, "Bossm");
        let jam = user(&h, "Jam");
        let room = h.db.get_or_create_direct(bossm.user_id, jam.user_id).unwrap();

        let conn_id = Uuid::new_v4();
        let (tx, _rx) = mpsc::channel(8);
        let closed = h.registry.on_connect(conn_id, bossm.clone(), tx);
        assert!(h.registry.subscribe(conn_id, room.id).await.unwrap());

        assert!(h.registry.on_disconnect(conn_id));
        assert!(closed.is_cancelled());
        assert!(h.registry.connections_for(room.id).is_empty());
        assert!(h.registry.connections_for_user(bossm.user_id).is_empty());
        assert_eq!(h.registry.connection_count(), 0);

        // idempotent, and the connection can no longer subscribe
        assert!(!h.registry.on_disconnect(conn_id));
        assert!(!h.registry.subscribe(conn_id, room.id).await.unwrap());
        assert!(h.registry.connections_for(room.id).is_empty());
    }

    #[tokio::test]
    async fn unsubscribe_reports_prior_state() {
        let h = harness();
        let bossm = user(&h, "Bossm");
        let room = h.db.create_group(bossm.user_id, "band", &[bossm.user_id]).unwrap();
        let (conn_id, _rx) = connect(&h, &bossm, 8);

        assert!(!h.registry.unsubscribe(conn_id, room.id));
        h.registry.subscribe(conn_id, room.id).await.unwrap();
        assert!(h.registry.unsubscribe(conn_id, room.id));
        assert!(h.registry.connections_for(room.id).is_empty());
    }

    #[tokio::test]
    async fn full_queue_evicts_only_that_connection() {
        let h = harness();
        let bossm = user(&h, "Bossm");
        let jam = user(&h, "Jam");
        let (slow, _slow_rx) = connect(&h, &bossm, 1);
        let (fast, mut fast_rx) = connect(&h, &jam, 8);

        let event = ServerEvent::RoomLeft {
            room_id: Uuid::new_v4(),
        };
        assert_eq!(h.registry.deliver_many([slow, fast], &event), 2);
        // slow's single slot is now taken
        assert_eq!(h.registry.deliver_many([slow, fast], &event), 1);

        assert!(h.registry.identity_for(slow).is_none());
        assert!(h.registry.identity_for(fast).is_some());
        assert_eq!(fast_rx.try_recv().unwrap(), event);
        assert_eq!(fast_rx.try_recv().unwrap(), event);
    }

    #[tokio::test]
    async fn closed_queue_is_a_delivery_failure() {
        let h = harness();
        let bossm = user(&h, "Bossm");
        let (conn_id, rx) = connect(&h, &bossm, 4);
        drop(rx);

        let result = h.registry.deliver(conn_id, ServerEvent::RoomLeft { room_id: Uuid::nil() });
        assert!(matches!(result, Err(ChatError::Delivery(_))));
        assert_eq!(h.registry.connection_count(), 0);
    }
}
