use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::conversation::ConversationKind;
use crate::message::MessageKind;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationSender {
    pub user_id: Option<i64>,
    pub display_name: String,
    pub avatar: Option<String>,
    pub is_anonymous: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationConversation {
    pub id: i64,
    pub identifier: String,
    pub title: Option<String>,
    pub kind: ConversationKind,
    pub member_ids: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationMessage {
    pub id: i64,
    pub kind: MessageKind,
    /// Absent for encrypted messages.
    pub excerpt: Option<String>,
    pub has_attachments: bool,
    pub created_at: DateTime<Utc>,
}

/// One fan-out request per message, covering every validated mention target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationBatchRequest {
    pub target_user_ids: Vec<i64>,
    pub sender: NotificationSender,
    pub conversation: NotificationConversation,
    pub message: NotificationMessage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranslationPriority {
    High,
    Medium,
    Low,
}

impl TranslationPriority {
    /// Short texts jump the queue.
    pub fn for_text(text: &str) -> Self {
        match text.chars().count() {
            0..=99 => Self::High,
            100..=499 => Self::Medium,
            _ => Self::Low,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslationJob {
    pub job_id: Uuid,
    pub message_id: i64,
    pub conversation_id: i64,
    pub source_language: String,
    pub target_languages: Vec<String>,
    pub text: String,
    pub priority: TranslationPriority,
}
