use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ChatError, ErrorKind};
use crate::models::{AttachmentRef, Message, MessageType, RoomKind};

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ServerEvent {
    /// Server confirms the connection is authenticated and registered
    ConnectionEstablished { user_id: Uuid, username: String },

    /// Acknowledges a join, sent to the requesting connection only
    RoomJoined { room_id: Uuid, kind: RoomKind },

    /// Acknowledges a leave
    RoomLeft { room_id: Uuid },

    /// A message was persisted in a room this connection is subscribed to
    NewMessage {
        id: i64,
        room_id: Uuid,
        content: String,
        message_type: MessageType,
        attachment: Option<AttachmentRef>,
        sender_id: Uuid,
        sender_name: String,
        timestamp: DateTime<Utc>,
    },

    /// Badge/toast for a member who may not be viewing the room
    NewNotification {
        room_id: Uuid,
        sender_id: Uuid,
        summary: String,
        timestamp: DateTime<Utc>,
    },

    /// Another connection joined or left a room this connection is viewing
    StatusUpdate {
        room_id: Uuid,
        user_id: Uuid,
        username: String,
        status: MemberStatus,
    },

    /// The user was made a member of a room
    RoomAdded {
        room_id: Uuid,
        kind: RoomKind,
        display_name: String,
    },

    /// A request from this connection was rejected
    Error {
        kind: ErrorKind,
        message: String,
        room_id: Option<Uuid>,
    },
}

impl ServerEvent {
    pub fn new_message(message: &Message) -> Self {
        Self::NewMessage {
            id: message.id,
            room_id: message.room_id,
            content: message.content.clone(),
            message_type: message.message_type,
            attachment: message.attachment.clone(),
            sender_id: message.sender_id,
            sender_name: message.sender_name.clone(),
            timestamp: message.created_at,
        }
    }

    pub fn notification(message: &Message) -> Self {
        Self::NewNotification {
            room_id: message.room_id,
            sender_id: message.sender_id,
            summary: message.summary(),
            timestamp: message.created_at,
        }
    }

    pub fn error(err: &ChatError, room_id: Option<Uuid>) -> Self {
        Self::Error {
            kind: err.kind(),
            message: err.to_string(),
            room_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberStatus {
    Joined,
    Left,
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ClientCommand {
    /// Authenticate a connection that did not present a token at upgrade
    Identify { token: String },

    /// Start receiving a room's messages
    Join { room_id: Uuid },

    /// Stop receiving a room's messages
    Leave { room_id: Uuid },

    /// Post a message to a room
    Send {
        room_id: Uuid,
        #[serde(default)]
        content: String,
        #[serde(default)]
        message_type: MessageType,
        #[serde(default)]
        attachment: Option<AttachmentRef>,
    },
}

impl ClientCommand {
    pub fn room_id(&self) -> Option<Uuid> {
        match self {
            Self::Join { room_id } | Self::Leave { room_id } | Self::Send { room_id, .. } => {
                Some(*room_id)
            }
            Self::Identify { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn send_command_defaults_type_and_attachment() {
        let room_id = Uuid::new_v4();
        let raw = json!({ "type": "Send", "data": { "room_id": room_id, "content": "hello" } });

        let cmd: ClientCommand = serde_json::from_value(raw).unwrap();
        match cmd {
            ClientCommand::Send {
                room_id: rid,
                content,
                message_type,
                attachment,
            } => {
                assert_eq!(rid, room_id);
                assert_eq!(content, "hello");
                assert_eq!(message_type, MessageType::Text);
                assert!(attachment.is_none());
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn error_event_carries_snake_case_kind() {
        let event = ServerEvent::error(&ChatError::Forbidden, None);
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "Error");
        assert_eq!(value["data"]["kind"], "forbidden");
    }

    #[test]
    fn room_kind_serializes_lowercase() {
        let event = ServerEvent::RoomJoined {
            room_id: Uuid::nil(),
            kind: RoomKind::Direct,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["data"]["kind"], "direct");
    }
}
