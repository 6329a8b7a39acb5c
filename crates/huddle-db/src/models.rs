//! Database row types. These map directly to SQLite rows and are converted
//! into the shared models in `huddle-types` at the crate boundary.

use huddle_types::models::{AttachmentRef, Message, MessageType, User};

use crate::{DbError, DbResult, parse_ts, parse_uuid};

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub password: String,
    pub created_at: String,
}

impl UserRow {
    pub fn to_user(&self) -> DbResult<User> {
        Ok(User {
            id: parse_uuid(&self.id)?,
            username: self.username.clone(),
            created_at: parse_ts(&self.created_at)?,
        })
    }
}

pub struct MessageRow {
    pub id: i64,
    pub room_id: String,
    pub sender_id: String,
    pub sender_name: Option<String>,
    pub content: String,
    pub message_type: String,
    pub attachment_path: Option<String>,
    pub attachment_name: Option<String>,
    pub created_at: String,
}

impl MessageRow {
    pub const COLUMNS: &'static str = "m.id, m.room_id, m.sender_id, u.username, m.content, \
         m.message_type, m.attachment_path, m.attachment_name, m.created_at";

    pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            room_id: row.get(1)?,
            sender_id: row.get(2)?,
            sender_name: row.get(3)?,
            content: row.get(4)?,
            message_type: row.get(5)?,
            attachment_path: row.get(6)?,
            attachment_name: row.get(7)?,
            created_at: row.get(8)?,
        })
    }

    pub fn into_message(self) -> DbResult<Message> {
        let message_type: MessageType = self
            .message_type
            .parse()
            .map_err(|e| DbError::Corrupt(format!("message {}: {}", self.id, e)))?;

        let attachment = match (self.attachment_path, self.attachment_name) {
            (Some(path), Some(original_name)) => Some(AttachmentRef {
                path,
                original_name,
            }),
            _ => None,
        };

        Ok(Message {
            id: self.id,
            room_id: parse_uuid(&self.room_id)?,
            sender_id: parse_uuid(&self.sender_id)?,
            sender_name: self.sender_name.unwrap_or_else(|| "unknown".to_string()),
            content: self.content,
            message_type,
            attachment,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}
