use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinError;
use tracing::{error, warn};
use uuid::Uuid;

use huddle_db::{CommitGate, Database, DbResult};
use huddle_types::error::{ChatError, ChatResult};
use huddle_types::models::{AttachmentRef, Message, MessageType, Room, RoomKind, User};

/// Async handle to the database. Each call runs on the blocking pool and is
/// bounded by `timeout`; an expired call is reported as a storage failure.
#[derive(Clone)]
pub struct Store {
    db: Arc<Database>,
    timeout: Duration,
}

impl Store {
    pub fn new(db: Arc<Database>, timeout: Duration) -> Self {
        Self { db, timeout }
    }

    async fn run<F, T>(&self, op: &'static str, f: F) -> ChatResult<T>
    where
        F: FnOnce(&Database) -> DbResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        let mut task = tokio::task::spawn_blocking(move || f(&db));

        match tokio::time::timeout(self.timeout, &mut task).await {
            Err(_) => Err(self.timed_out(op)),
            Ok(joined) => finish(op, joined),
        }
    }

    /// Like `run`, for writes that must land before the timeout or not at
    /// all. On expiry the gate is closed so the write rolls back; if it had
    /// already committed, its result is reported instead.
    async fn run_gated<F, T>(&self, op: &'static str, f: F) -> ChatResult<T>
    where
        F: FnOnce(&Database, &CommitGate) -> DbResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let gate = CommitGate::new();
        let writer_gate = gate.clone();
        let db = self.db.clone();
        let mut task = tokio::task::spawn_blocking(move || f(&db, &writer_gate));

        match tokio::time::timeout(self.timeout, &mut task).await {
            Ok(joined) => finish(op, joined),
            Err(_) if gate.close() => Err(self.timed_out(op)),
            Err(_) => finish(op, task.await),
        }
    }

    fn timed_out(&self, op: &str) -> ChatError {
        warn!("Storage call {} timed out after {:?}", op, self.timeout);
        ChatError::Storage(format!("{} timed out", op))
    }

    // -- Users --

    pub async fn create_user(&self, username: String, password_hash: String) -> ChatResult<User> {
        self.run("create_user", move |db| {
            db.create_user(Uuid::new_v4(), &username, &password_hash)
        })
        .await
    }

    /// The user and stored password hash for `username`, if registered.
    pub async fn credentials(&self, username: String) -> ChatResult<Option<(User, String)>> {
        self.run("credentials", move |db| {
            db.get_user_by_username(&username)?
                .map(|row| Ok((row.to_user()?, row.password)))
                .transpose()
        })
        .await
    }

    pub async fn list_users(&self) -> ChatResult<Vec<User>> {
        self.run("list_users", |db| db.list_users()).await
    }

    // -- Rooms --

    pub async fn get_or_create_direct(&self, user_a: Uuid, user_b: Uuid) -> ChatResult<Room> {
        self.run("get_or_create_direct", move |db| db.get_or_create_direct(user_a, user_b))
            .await
    }

    pub async fn create_group(
        &self,
        creator: Uuid,
        name: String,
        member_ids: Vec<Uuid>,
    ) -> ChatResult<Room> {
        self.run("create_group", move |db| db.create_group(creator, &name, &member_ids))
            .await
    }

    pub async fn add_member(&self, room_id: Uuid, user_id: Uuid) -> ChatResult<Room> {
        self.run("add_member", move |db| db.add_member(room_id, user_id))
            .await
    }

    pub async fn is_member(&self, room_id: Uuid, user_id: Uuid) -> ChatResult<bool> {
        self.run("is_member", move |db| db.is_member(room_id, user_id))
            .await
    }

    pub async fn get_room(&self, room_id: Uuid) -> ChatResult<Room> {
        self.run("get_room", move |db| db.get_room(room_id)).await
    }

    pub async fn list_rooms_for_user(
        &self,
        user_id: Uuid,
        kind: Option<RoomKind>,
    ) -> ChatResult<Vec<Room>> {
        self.run("list_rooms_for_user", move |db| db.list_rooms_for_user(user_id, kind))
            .await
    }

    // -- Messages --

    pub async fn append(
        &self,
        room_id: Uuid,
        sender_id: Uuid,
        content: String,
        message_type: MessageType,
        attachment: Option<AttachmentRef>,
    ) -> ChatResult<Message> {
        self.run_gated("append", move |db, gate| {
            db.append_gated(
                room_id,
                sender_id,
                &content,
                message_type,
                attachment.as_ref(),
                gate,
            )
        })
        .await
    }

    pub async fn list_by_room(
        &self,
        room_id: Uuid,
        since_id: Option<i64>,
        limit: Option<u32>,
    ) -> ChatResult<Vec<Message>> {
        self.run("list_by_room", move |db| db.list_by_room(room_id, since_id, limit))
            .await
    }

    pub async fn search(
        &self,
        user_id: Uuid,
        query: String,
        limit: Option<u32>,
    ) -> ChatResult<Vec<Message>> {
        self.run("search", move |db| db.search(user_id, &query, limit))
            .await
    }
}

fn finish<T>(op: &str, joined: Result<DbResult<T>, JoinError>) -> ChatResult<T> {
    match joined {
        Err(e) => {
            error!("spawn_blocking join error in {}: {}", op, e);
            Err(ChatError::storage(e))
        }
        Ok(result) => result.map_err(|e| {
            let err = ChatError::from(e);
            if matches!(err, ChatError::Storage(_)) {
                error!("Storage call {} failed: {}", op, err);
            }
            err
        }),
    }
}
