use crate::error::PipelineError;
use crate::validator::ResolvedSender;
use chrono::{DateTime, Utc};
use parley_db::messages::{CreatedMessage, NewMessage};
use parley_db::DbPool;
use parley_models::encryption::EncryptionContext;
use parley_models::message::{ForwardSource, Message, MessageKind};
use parley_models::request::MessageRequest;

/// A request after rewriting and encryption selection, ready to store.
#[derive(Debug)]
pub struct ProcessedMessage<'a> {
    pub request: &'a MessageRequest,
    pub conversation_id: i64,
    pub sender: &'a ResolvedSender,
    /// Content after link rewriting.
    pub content: &'a str,
    pub language: &'a str,
    pub encryption: &'a EncryptionContext,
    pub created_at: DateTime<Utc>,
}

pub struct Persistor {
    pool: DbPool,
    worker_id: u16,
}

impl Persistor {
    pub fn new(pool: DbPool, worker_id: u16) -> Self {
        Self { pool, worker_id }
    }

    /// One transaction: the message row, its reply reference and attachment
    /// claims. Returns the hydrated message.
    pub async fn save(&self, processed: &ProcessedMessage<'_>) -> Result<Message, PipelineError> {
        let request = processed.request;
        let encryption = processed.encryption;
        let metadata = encryption.metadata_json();
        let stored_content = if encryption.is_encrypted() {
            ""
        } else {
            processed.content
        };

        let new = NewMessage {
            id: parley_util::snowflake::generate(self.worker_id),
            conversation_id: processed.conversation_id,
            sender: processed.sender.sender_ref(),
            content: stored_content,
            original_language: processed.language,
            message_type: request.kind.as_str(),
            is_encrypted: encryption.is_encrypted(),
            encryption_mode: encryption.mode().map(|mode| mode.as_str()),
            encrypted_content: encryption.ciphertext(),
            encryption_metadata: metadata.as_ref(),
            reply_to_id: request.reply_to_id,
            forwarded_from: request
                .forwarded_from
                .as_ref()
                .map(|source| (source.message_id, source.conversation_id)),
            attachment_ids: &request.attachment_ids,
            created_at: processed.created_at,
        };

        let created = parley_db::messages::create_message(&self.pool, &new).await?;
        tracing::debug!(
            message_id = created.message.id,
            conversation_id = created.message.conversation_id,
            encrypted = created.message.is_encrypted,
            attachments = created.attachments.len(),
            "message persisted"
        );
        Ok(into_message(created))
    }
}

fn into_message(created: CreatedMessage) -> Message {
    let CreatedMessage {
        message: row,
        sender,
        attachments,
        ..
    } = created;
    let forwarded_from = match (row.forwarded_from_id, row.forwarded_from_conversation_id) {
        (Some(message_id), Some(conversation_id)) => Some(ForwardSource {
            message_id,
            conversation_id,
        }),
        _ => None,
    };

    Message {
        id: row.id,
        conversation_id: row.conversation_id,
        sender,
        content: row.content,
        original_language: row.original_language,
        kind: MessageKind::parse(&row.message_type).unwrap_or_default(),
        is_encrypted: row.is_encrypted,
        encryption_mode: row
            .encryption_mode
            .as_deref()
            .and_then(parley_models::conversation::EncryptionMode::parse),
        encrypted_content: row.encrypted_content,
        encryption_metadata: row.encryption_metadata,
        reply_to_id: row.reply_to_id,
        forwarded_from,
        attachments: attachments.into_iter().map(Into::into).collect(),
        validated_mentions: row.validated_mentions,
        created_at: row.created_at,
    }
}
