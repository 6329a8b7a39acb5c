//! Message store: an append-only log per room.
//!
//! Membership is not checked here; callers gate appends on room membership
//! before reaching the store.

use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use huddle_types::models::{AttachmentRef, Message, MessageType};

use crate::models::MessageRow;
use crate::queries::username_of;
use crate::{CommitGate, Database, DbError, DbResult, OptionalExt, format_ts, parse_ts};

pub const DEFAULT_HISTORY_LIMIT: u32 = 50;
pub const MAX_HISTORY_LIMIT: u32 = 200;
pub const SEARCH_LIMIT: u32 = 20;

impl Database {
    /// Persists a message and returns the stored record. The timestamp never
    /// goes backwards within a room; ties are ordered by the assigned id.
    pub fn append(
        &self,
        room_id: Uuid,
        sender_id: Uuid,
        content: &str,
        message_type: MessageType,
        attachment: Option<&AttachmentRef>,
    ) -> DbResult<Message> {
        self.append_gated(
            room_id,
            sender_id,
            content,
            message_type,
            attachment,
            &CommitGate::new(),
        )
    }

    /// [`Database::append`] that commits only through `gate`. A closed gate
    /// rolls the insert back and yields `DbError::Abandoned`.
    pub fn append_gated(
        &self,
        room_id: Uuid,
        sender_id: Uuid,
        content: &str,
        message_type: MessageType,
        attachment: Option<&AttachmentRef>,
        gate: &CommitGate,
    ) -> DbResult<Message> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let rid = room_id.to_string();

            tx.query_row("SELECT 1 FROM rooms WHERE id = ?1", [&rid], |_| Ok(()))
                .optional()?
                .ok_or_else(|| DbError::NotFound(format!("room {}", room_id)))?;
            let sender_name = username_of(&tx, sender_id)?;

            let last: Option<String> = tx
                .query_row(
                    "SELECT created_at FROM messages WHERE room_id = ?1 ORDER BY id DESC LIMIT 1",
                    [&rid],
                    |row| row.get(0),
                )
                .optional()?;
            let created_at = monotonic_now(last.as_deref().map(parse_ts).transpose()?);

            tx.execute(
                "INSERT INTO messages
                    (room_id, sender_id, content, content_folded, message_type,
                     attachment_path, attachment_name, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    rid,
                    sender_id.to_string(),
                    content,
                    fold(content),
                    message_type.as_str(),
                    attachment.map(|a| a.path.as_str()),
                    attachment.map(|a| a.original_name.as_str()),
                    format_ts(created_at),
                ],
            )?;
            let id = tx.last_insert_rowid();
            gate.commit_with(|| Ok(tx.commit()?))?;

            debug!("Appended message {} to room {}", id, room_id);
            Ok(Message {
                id,
                room_id,
                sender_id,
                sender_name,
                content: content.to_string(),
                message_type,
                attachment: attachment.cloned(),
                created_at,
            })
        })
    }

    /// Messages in a room, oldest first.
    ///
    /// With `since_id`, returns up to `limit` messages after that id. Without
    /// it, returns the most recent `limit` messages.
    pub fn list_by_room(
        &self,
        room_id: Uuid,
        since_id: Option<i64>,
        limit: Option<u32>,
    ) -> DbResult<Vec<Message>> {
        let limit = limit
            .unwrap_or(DEFAULT_HISTORY_LIMIT)
            .clamp(1, MAX_HISTORY_LIMIT);

        self.with_conn(|conn| {
            let rid = room_id.to_string();
            conn.query_row("SELECT 1 FROM rooms WHERE id = ?1", [&rid], |_| Ok(()))
                .optional()?
                .ok_or_else(|| DbError::NotFound(format!("room {}", room_id)))?;

            let rows = match since_id {
                Some(since) => {
                    let sql = format!(
                        "SELECT {} FROM messages m
                         LEFT JOIN users u ON u.id = m.sender_id
                         WHERE m.room_id = ?1 AND m.id > ?2
                         ORDER BY m.created_at ASC, m.id ASC
                         LIMIT ?3",
                        MessageRow::COLUMNS
                    );
                    let mut stmt = conn.prepare(&sql)?;
                    stmt.query_map(rusqlite::params![rid, since, limit], MessageRow::from_row)?
                        .collect::<Result<Vec<_>, _>>()?
                }
                None => {
                    let sql = format!(
                        "SELECT {} FROM messages m
                         LEFT JOIN users u ON u.id = m.sender_id
                         WHERE m.room_id = ?1
                         ORDER BY m.created_at DESC, m.id DESC
                         LIMIT ?2",
                        MessageRow::COLUMNS
                    );
                    let mut stmt = conn.prepare(&sql)?;
                    let mut rows = stmt
                        .query_map(rusqlite::params![rid, limit], MessageRow::from_row)?
                        .collect::<Result<Vec<_>, _>>()?;
                    rows.reverse();
                    rows
                }
            };

            rows.into_iter().map(MessageRow::into_message).collect()
        })
    }

    /// Case-insensitive substring search over the rooms `user_id` belongs to,
    /// most recent first.
    pub fn search(&self, user_id: Uuid, query: &str, limit: Option<u32>) -> DbResult<Vec<Message>> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(vec![]);
        }
        let limit = limit.unwrap_or(SEARCH_LIMIT).clamp(1, SEARCH_LIMIT);
        let pattern = format!("%{}%", escape_like(&fold(query)));

        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM messages m
                 JOIN room_members rm ON rm.room_id = m.room_id AND rm.user_id = ?1
                 LEFT JOIN users u ON u.id = m.sender_id
                 WHERE m.content_folded LIKE ?2 ESCAPE '\\'
                 ORDER BY m.created_at DESC, m.id DESC
                 LIMIT ?3",
                MessageRow::COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(
                    rusqlite::params![user_id.to_string(), pattern, limit],
                    MessageRow::from_row,
                )?
                .collect::<Result<Vec<_>, _>>()?;

            rows.into_iter().map(MessageRow::into_message).collect()
        })
    }

    pub fn count_messages(&self, room_id: Uuid) -> DbResult<i64> {
        self.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE room_id = ?1",
                [room_id.to_string()],
                |row| row.get(0),
            )?)
        })
    }
}

/// Case folding used for search. Applied in Rust on both the stored text and
/// the query, since SQLite only folds ASCII.
pub(crate) fn fold(text: &str) -> String {
    text.to_lowercase()
}

fn monotonic_now(last: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let now = Utc::now();
    match last {
        Some(last) if last > now => last,
        _ => now,
    }
}

fn escape_like(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
