use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Longest notification summary before it gets truncated.
const SUMMARY_MAX_CHARS: usize = 80;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomKind {
    Direct,
    Group,
}

impl RoomKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Group => "group",
        }
    }
}

impl fmt::Display for RoomKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoomKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "direct" => Ok(Self::Direct),
            "group" => Ok(Self::Group),
            other => Err(format!("unknown room kind '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: Uuid,
    pub username: String,
}

/// A conversation scope. Direct rooms never carry a stored name; their label
/// depends on who is looking (see [`Room::label_for`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub id: Uuid,
    pub kind: RoomKind,
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Insertion-ordered member list.
    pub members: Vec<Member>,
}

impl Room {
    pub fn has_member(&self, user_id: Uuid) -> bool {
        self.members.iter().any(|m| m.id == user_id)
    }

    pub fn member_ids(&self) -> impl Iterator<Item = Uuid> + '_ {
        self.members.iter().map(|m| m.id)
    }

    /// Display label as seen by `viewer`: the group name, or the other party
    /// of a direct room.
    pub fn label_for(&self, viewer: Uuid) -> String {
        match self.kind {
            RoomKind::Group => self.name.clone().unwrap_or_default(),
            RoomKind::Direct => self
                .members
                .iter()
                .find(|m| m.id != viewer)
                .or_else(|| self.members.first())
                .map(|m| m.username.clone())
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Text,
    Image,
    File,
    Voice,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::File => "file",
            Self::Voice => "voice",
        }
    }

    /// Classify an attachment by its (lowercase) file extension.
    pub fn from_extension(ext: &str) -> Self {
        match ext {
            "png" | "jpg" | "jpeg" | "gif" | "webp" => Self::Image,
            "mp3" | "wav" | "ogg" | "webm" | "m4a" => Self::Voice,
            _ => Self::File,
        }
    }
}

impl FromStr for MessageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "image" => Ok(Self::Image),
            "file" => Ok(Self::File),
            "voice" => Ok(Self::Voice),
            other => Err(format!("unknown message type '{}'", other)),
        }
    }
}

/// Reference to a stored blob. The blob itself lives with the attachment store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub path: String,
    pub original_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub room_id: Uuid,
    pub sender_id: Uuid,
    pub sender_name: String,
    pub content: String,
    pub message_type: MessageType,
    pub attachment: Option<AttachmentRef>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Short text used for badge/toast notifications.
    pub fn summary(&self) -> String {
        let content = self.content.trim();
        if content.is_empty() {
            return match self.message_type {
                MessageType::Image => "sent an image".into(),
                MessageType::Voice => "sent a voice message".into(),
                MessageType::File | MessageType::Text => "sent a file".into(),
            };
        }

        if content.chars().count() <= SUMMARY_MAX_CHARS {
            return content.to_string();
        }
        let mut short: String = content.chars().take(SUMMARY_MAX_CHARS).collect();
        short.push('…');
        short
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(name: &str) -> Member {
        Member {
            id: Uuid::new_v4(),
            username: name.into(),
        }
    }

    fn message(content: &str, message_type: MessageType) -> Message {
        Message {
            id: 1,
            room_id: Uuid::new_v4(),
            sender_id: Uuid::new_v4(),
            sender_name: "Bossm".into(),
            content: content.into(),
            message_type,
            attachment: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn direct_label_is_the_other_party() {
        let bossm = member("Bossm");
        let jam = member("Jam");
        let room = Room {
            id: Uuid::new_v4(),
            kind: RoomKind::Direct,
            name: None,
            created_at: Utc::now(),
            members: vec![bossm.clone(), jam.clone()],
        };

        assert_eq!(room.label_for(bossm.id), "Jam");
        assert_eq!(room.label_for(jam.id), "Bossm");
    }

    #[test]
    fn group_label_is_the_name() {
        let bossm = member("Bossm");
        let room = Room {
            id: Uuid::new_v4(),
            kind: RoomKind::Group,
            name: Some("band".into()),
            created_at: Utc::now(),
            members: vec![bossm.clone()],
        };
        assert_eq!(room.label_for(bossm.id), "band");
    }

    #[test]
    fn summary_truncates_long_content() {
        let long = "x".repeat(200);
        let summary = message(&long, MessageType::Text).summary();
        assert_eq!(summary.chars().count(), SUMMARY_MAX_CHARS + 1);
        assert!(summary.ends_with('…'));
    }

    #[test]
    fn summary_describes_bare_attachments() {
        assert_eq!(message("", MessageType::Image).summary(), "sent an image");
        assert_eq!(message("  ", MessageType::Voice).summary(), "sent a voice message");
        assert_eq!(message("look", MessageType::Image).summary(), "look");
    }

    #[test]
    fn extension_classification() {
        assert_eq!(MessageType::from_extension("jpeg"), MessageType::Image);
        assert_eq!(MessageType::from_extension("ogg"), MessageType::Voice);
        assert_eq!(MessageType::from_extension("pdf"), MessageType::File);
    }
}
