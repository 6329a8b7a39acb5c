use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{AttachmentRef, Member, MessageType, Room, RoomKind};

// -- JWT Claims --

/// JWT claims shared by the REST middleware and gateway authentication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuthResponse {
    pub user_id: Uuid,
    pub username: String,
    pub token: String,
}

// -- Rooms --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DirectRoomRequest {
    pub user_id: Uuid,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupRoomRequest {
    pub name: String,
    #[serde(default)]
    pub member_ids: Vec<Uuid>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AddMemberRequest {
    pub user_id: Uuid,
}

/// A room as presented to one particular user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomResponse {
    pub id: Uuid,
    pub kind: RoomKind,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
    pub members: Vec<Member>,
}

impl RoomResponse {
    pub fn for_viewer(room: Room, viewer: Uuid) -> Self {
        Self {
            display_name: room.label_for(viewer),
            id: room.id,
            kind: room.kind,
            created_at: room.created_at,
            members: room.members,
        }
    }
}

// -- Messages --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub message_type: MessageType,
    #[serde(default)]
    pub attachment: Option<AttachmentRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub message_id: i64,
    pub content: String,
    pub sender_name: String,
    pub timestamp: DateTime<Utc>,
    pub room_id: Uuid,
}

// -- Attachments --

#[derive(Debug, Serialize, Deserialize)]
pub struct AttachmentResponse {
    pub path: String,
    pub original_name: String,
    pub message_type: MessageType,
}
