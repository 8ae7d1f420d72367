use crate::collaborators::NotificationSink;
use parley_models::conversation::Conversation;
use parley_models::message::{Message, MessageSender};
use parley_models::notification::{
    NotificationBatchRequest, NotificationConversation, NotificationMessage, NotificationSender,
};
use std::sync::Arc;

/// Shorten to at most `max_chars` characters, ending in "..." when cut.
pub fn truncate_excerpt(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let kept: String = text.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

pub fn build_batch(
    target_user_ids: &[i64],
    message: &Message,
    conversation: &Conversation,
    excerpt_length: usize,
) -> NotificationBatchRequest {
    let sender = match &message.sender {
        MessageSender::User { id, avatar, .. } => NotificationSender {
            user_id: Some(*id),
            display_name: message.sender.display_name().to_string(),
            avatar: avatar.clone(),
            is_anonymous: false,
        },
        MessageSender::Anonymous { nickname, .. } => NotificationSender {
            user_id: None,
            display_name: nickname.clone(),
            avatar: None,
            is_anonymous: true,
        },
    };
    // Never leak plaintext of an encrypted message into a push payload.
    let excerpt = if message.is_encrypted || message.content.is_empty() {
        None
    } else {
        Some(truncate_excerpt(&message.content, excerpt_length))
    };

    NotificationBatchRequest {
        target_user_ids: target_user_ids.to_vec(),
        sender,
        conversation: NotificationConversation {
            id: conversation.id,
            identifier: conversation.identifier.clone(),
            title: conversation.title.clone(),
            kind: conversation.kind,
            member_ids: conversation.member_ids(),
        },
        message: NotificationMessage {
            id: message.id,
            kind: message.kind,
            excerpt,
            has_attachments: !message.attachments.is_empty(),
            created_at: message.created_at,
        },
    }
}

pub struct NotificationFanout {
    sink: Arc<dyn NotificationSink>,
    excerpt_length: usize,
}

impl NotificationFanout {
    pub fn new(sink: Arc<dyn NotificationSink>, excerpt_length: usize) -> Self {
        Self {
            sink,
            excerpt_length,
        }
    }

    /// One batched call per message. Returns how many targets were handed
    /// off; delivery failures are logged and count as zero.
    pub async fn notify(
        &self,
        target_user_ids: &[i64],
        message: &Message,
        conversation: &Conversation,
    ) -> usize {
        if target_user_ids.is_empty() {
            return 0;
        }
        let batch = build_batch(target_user_ids, message, conversation, self.excerpt_length);
        match self.sink.send_batch(batch).await {
            Ok(()) => {
                tracing::debug!(
                    message_id = message.id,
                    targets = target_user_ids.len(),
                    "mention notifications queued"
                );
                target_user_ids.len()
            }
            Err(e) => {
                tracing::error!(
                    message_id = message.id,
                    error = %e,
                    "mention notification failed"
                );
                0
            }
        }
    }
}
