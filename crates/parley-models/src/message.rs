use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::attachment::Attachment;
use crate::conversation::EncryptionMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    System,
    Image,
    File,
    Audio,
    Video,
    Location,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::System => "system",
            Self::Image => "image",
            Self::File => "file",
            Self::Audio => "audio",
            Self::Video => "video",
            Self::Location => "location",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "text" => Some(Self::Text),
            "system" => Some(Self::System),
            "image" => Some(Self::Image),
            "file" => Some(Self::File),
            "audio" => Some(Self::Audio),
            "video" => Some(Self::Video),
            "location" => Some(Self::Location),
            _ => None,
        }
    }

    pub fn is_system(self) -> bool {
        matches!(self, Self::System)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardSource {
    pub message_id: i64,
    pub conversation_id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MessageSender {
    User {
        id: i64,
        username: String,
        display_name: Option<String>,
        avatar: Option<String>,
    },
    Anonymous {
        id: i64,
        nickname: String,
    },
}

impl MessageSender {
    pub fn display_name(&self) -> &str {
        match self {
            Self::User {
                username,
                display_name,
                ..
            } => display_name.as_deref().unwrap_or(username),
            Self::Anonymous { nickname, .. } => nickname,
        }
    }

    pub fn user_id(&self) -> Option<i64> {
        match self {
            Self::User { id, .. } => Some(*id),
            Self::Anonymous { .. } => None,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, Self::Anonymous { .. })
    }
}

/// A persisted message with its sender and attachments hydrated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub conversation_id: i64,
    pub sender: MessageSender,
    /// Empty whenever `is_encrypted` is true.
    pub content: String,
    pub original_language: String,
    pub kind: MessageKind,
    pub is_encrypted: bool,
    pub encryption_mode: Option<EncryptionMode>,
    pub encrypted_content: Option<String>,
    pub encryption_metadata: Option<serde_json::Value>,
    pub reply_to_id: Option<i64>,
    pub forwarded_from: Option<ForwardSource>,
    pub attachments: Vec<Attachment>,
    pub validated_mentions: Vec<String>,
    pub created_at: DateTime<Utc>,
}
