use crate::attachments::{claim_for_message, AttachmentRow};
use crate::{
    bool_from_any_row, bool_to_db, datetime_from_db_text, datetime_to_db_text, json_from_db_text,
    DbError, DbPool,
};
use chrono::{DateTime, Utc};
use parley_models::message::MessageSender;
use sqlx::Row;

/// Who wrote a message (or uploaded an attachment).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderRef {
    User(i64),
    Anonymous(i64),
}

impl SenderRef {
    /// `(user column, anonymous column)`
    pub(crate) fn columns(self) -> (Option<i64>, Option<i64>) {
        match self {
            Self::User(id) => (Some(id), None),
            Self::Anonymous(id) => (None, Some(id)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: i64,
    pub conversation_id: i64,
    pub sender_id: Option<i64>,
    pub anonymous_sender_id: Option<i64>,
    pub content: String,
    pub original_language: String,
    pub message_type: String,
    pub is_encrypted: bool,
    pub encryption_mode: Option<String>,
    pub encrypted_content: Option<String>,
    pub encryption_metadata: Option<serde_json::Value>,
    pub reply_to_id: Option<i64>,
    pub forwarded_from_id: Option<i64>,
    pub forwarded_from_conversation_id: Option<i64>,
    pub validated_mentions: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::any::AnyRow> for MessageRow {
    fn from_row(row: &'r sqlx::any::AnyRow) -> Result<Self, sqlx::Error> {
        let metadata_raw: Option<String> = row.try_get("encryption_metadata")?;
        let mentions_raw: String = row.try_get("validated_mentions")?;
        let created_at_raw: String = row.try_get("created_at")?;
        Ok(Self {
            id: row.try_get("id")?,
            conversation_id: row.try_get("conversation_id")?,
            sender_id: row.try_get("sender_id")?,
            anonymous_sender_id: row.try_get("anonymous_sender_id")?,
            content: row.try_get("content")?,
            original_language: row.try_get("original_language")?,
            message_type: row.try_get("message_type")?,
            is_encrypted: bool_from_any_row(row, "is_encrypted")?,
            encryption_mode: row.try_get("encryption_mode")?,
            encrypted_content: row.try_get("encrypted_content")?,
            encryption_metadata: metadata_raw
                .as_deref()
                .map(json_from_db_text)
                .transpose()?,
            reply_to_id: row.try_get("reply_to_id")?,
            forwarded_from_id: row.try_get("forwarded_from_id")?,
            forwarded_from_conversation_id: row.try_get("forwarded_from_conversation_id")?,
            validated_mentions: parse_validated_mentions(&mentions_raw)?,
            created_at: datetime_from_db_text(&created_at_raw)?,
        })
    }
}

fn parse_validated_mentions(raw: &str) -> Result<Vec<String>, sqlx::Error> {
    serde_json::from_str(raw)
        .map_err(|e| sqlx::Error::Protocol(format!("invalid validated_mentions: {e}")))
}

const MESSAGE_COLUMNS: &str = "id, conversation_id, sender_id, anonymous_sender_id, content, original_language, message_type, is_encrypted, encryption_mode, encrypted_content, encryption_metadata, reply_to_id, forwarded_from_id, forwarded_from_conversation_id, validated_mentions, created_at";

/// Everything needed to write one message row and its relations.
#[derive(Debug, Clone)]
pub struct NewMessage<'a> {
    pub id: i64,
    pub conversation_id: i64,
    pub sender: SenderRef,
    /// Empty when the body is stored as ciphertext.
    pub content: &'a str,
    pub original_language: &'a str,
    pub message_type: &'a str,
    pub is_encrypted: bool,
    pub encryption_mode: Option<&'a str>,
    pub encrypted_content: Option<&'a str>,
    pub encryption_metadata: Option<&'a serde_json::Value>,
    pub reply_to_id: Option<i64>,
    /// `(message_id, conversation_id)` of the forwarded original.
    pub forwarded_from: Option<(i64, i64)>,
    pub attachment_ids: &'a [i64],
    pub created_at: DateTime<Utc>,
}

/// A committed message with its sender and claimed attachments.
#[derive(Debug, Clone)]
pub struct CreatedMessage {
    pub message: MessageRow,
    pub sender: MessageSender,
    pub attachments: Vec<AttachmentRow>,
    /// The requested reply target did not exist in this conversation.
    pub reply_dropped: bool,
}

/// Writes the message, its reply reference and attachment claims in one
/// transaction, then hydrates the sender before committing.
pub async fn create_message(
    pool: &DbPool,
    new: &NewMessage<'_>,
) -> Result<CreatedMessage, DbError> {
    let mut tx = pool.begin().await?;

    let reply_to_id = match new.reply_to_id {
        Some(reply_id) => {
            sqlx::query_scalar::<_, i64>(
                "SELECT id FROM messages WHERE id = $1 AND conversation_id = $2",
            )
            .bind(reply_id)
            .bind(new.conversation_id)
            .fetch_optional(&mut *tx)
            .await?
        }
        None => None,
    };
    let reply_dropped = new.reply_to_id.is_some() && reply_to_id.is_none();
    if reply_dropped {
        tracing::warn!(
            conversation_id = new.conversation_id,
            reply_to_id = new.reply_to_id,
            "reply target not found in conversation, dropping reference"
        );
    }

    let (sender_id, anonymous_sender_id) = new.sender.columns();
    let (forwarded_from_id, forwarded_from_conversation_id) = new.forwarded_from.unzip();
    let metadata_text = new.encryption_metadata.map(|value| value.to_string());

    let message = sqlx::query_as::<_, MessageRow>(&format!(
        "INSERT INTO messages (id, conversation_id, sender_id, anonymous_sender_id, content, original_language, message_type, is_encrypted, encryption_mode, encrypted_content, encryption_metadata, reply_to_id, forwarded_from_id, forwarded_from_conversation_id, validated_mentions, created_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, '[]', $15)
         RETURNING {MESSAGE_COLUMNS}"
    ))
    .bind(new.id)
    .bind(new.conversation_id)
    .bind(sender_id)
    .bind(anonymous_sender_id)
    .bind(new.content)
    .bind(new.original_language)
    .bind(new.message_type)
    .bind(bool_to_db(new.is_encrypted))
    .bind(new.encryption_mode)
    .bind(new.encrypted_content)
    .bind(metadata_text)
    .bind(reply_to_id)
    .bind(forwarded_from_id)
    .bind(forwarded_from_conversation_id)
    .bind(datetime_to_db_text(new.created_at))
    .fetch_one(&mut *tx)
    .await?;

    let attachments = if new.attachment_ids.is_empty() {
        Vec::new()
    } else {
        claim_for_message(&mut tx, message.id, new.sender, new.attachment_ids).await?
    };

    let sender = hydrate_sender(&mut tx, new.sender).await?;

    tx.commit().await?;
    Ok(CreatedMessage {
        message,
        sender,
        attachments,
        reply_dropped,
    })
}

async fn hydrate_sender(
    conn: &mut sqlx::AnyConnection,
    sender: SenderRef,
) -> Result<MessageSender, DbError> {
    match sender {
        SenderRef::User(id) => {
            let row = sqlx::query(
                "SELECT id, username, display_name, avatar FROM users WHERE id = $1",
            )
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or(DbError::NotFound)?;
            Ok(MessageSender::User {
                id: row.try_get("id")?,
                username: row.try_get("username")?,
                display_name: row.try_get("display_name")?,
                avatar: row.try_get("avatar")?,
            })
        }
        SenderRef::Anonymous(id) => {
            let row = sqlx::query("SELECT id, nickname FROM anonymous_participants WHERE id = $1")
                .bind(id)
                .fetch_optional(&mut *conn)
                .await?
                .ok_or(DbError::NotFound)?;
            Ok(MessageSender::Anonymous {
                id: row.try_get("id")?,
                nickname: row.try_get("nickname")?,
            })
        }
    }
}

pub async fn get_message(pool: &DbPool, id: i64) -> Result<Option<MessageRow>, DbError> {
    let row = sqlx::query_as::<_, MessageRow>(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// The only mutation a message sees after creation besides link backfill.
pub async fn set_validated_mentions(
    pool: &DbPool,
    id: i64,
    usernames: &[String],
) -> Result<(), DbError> {
    let encoded = serde_json::to_string(usernames).unwrap_or_else(|_| "[]".to_string());
    let result = sqlx::query("UPDATE messages SET validated_mentions = $2 WHERE id = $1")
        .bind(id)
        .bind(encoded)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attachments::create_attachment;
    use crate::testing;

    fn new_message<'a>(id: i64, content: &'a str, attachment_ids: &'a [i64]) -> NewMessage<'a> {
        NewMessage {
            id,
            conversation_id: 1,
            sender: SenderRef::User(10),
            content,
            original_language: "en",
            message_type: "text",
            is_encrypted: false,
            encryption_mode: None,
            encrypted_content: None,
            encryption_metadata: None,
            reply_to_id: None,
            forwarded_from: None,
            attachment_ids,
            created_at: Utc::now(),
        }
    }

    async fn seeded_pool() -> DbPool {
        let pool = testing::pool().await;
        testing::seed_conversation(&pool, 1, "general").await;
        testing::seed_conversation(&pool, 2, "other").await;
        testing::seed_user(&pool, 10, "alice").await;
        testing::seed_user(&pool, 11, "bob").await;
        pool
    }

    #[tokio::test]
    async fn create_hydrates_sender_and_claims_attachments() {
        let pool = seeded_pool().await;
        create_attachment(&pool, 500, SenderRef::User(10), "a.txt", None, 3, "u/a")
            .await
            .unwrap();
        create_attachment(&pool, 501, SenderRef::User(11), "b.txt", None, 3, "u/b")
            .await
            .unwrap();

        let created = create_message(&pool, &new_message(100, "hi", &[500, 501]))
            .await
            .unwrap();
        assert_eq!(created.message.content, "hi");
        assert!(matches!(
            created.sender,
            MessageSender::User { id: 10, ref username, .. } if username == "alice"
        ));
        let claimed: Vec<i64> = created.attachments.iter().map(|a| a.id).collect();
        assert_eq!(claimed, vec![500]);

        // Already claimed.
        let again = create_message(&pool, &new_message(101, "again", &[500]))
            .await
            .unwrap();
        assert!(again.attachments.is_empty());
    }

    #[tokio::test]
    async fn reply_outside_conversation_is_dropped() {
        let pool = seeded_pool().await;
        let mut elsewhere = new_message(100, "elsewhere", &[]);
        elsewhere.conversation_id = 2;
        create_message(&pool, &elsewhere).await.unwrap();
        create_message(&pool, &new_message(101, "root", &[]))
            .await
            .unwrap();

        let mut reply = new_message(102, "reply", &[]);
        reply.reply_to_id = Some(101);
        let created = create_message(&pool, &reply).await.unwrap();
        assert_eq!(created.message.reply_to_id, Some(101));
        assert!(!created.reply_dropped);

        let mut cross = new_message(103, "cross", &[]);
        cross.reply_to_id = Some(100);
        let created = create_message(&pool, &cross).await.unwrap();
        assert_eq!(created.message.reply_to_id, None);
        assert!(created.reply_dropped);
    }

    #[tokio::test]
    async fn encrypted_fields_and_mentions_persist() {
        let pool = seeded_pool().await;
        let metadata = serde_json::json!({"mode": "server", "key_id": "K1"});
        let mut sealed = new_message(100, "", &[]);
        sealed.is_encrypted = true;
        sealed.encryption_mode = Some("server");
        sealed.encrypted_content = Some("Y2lwaGVy");
        sealed.encryption_metadata = Some(&metadata);
        create_message(&pool, &sealed).await.unwrap();

        set_validated_mentions(&pool, 100, &["bob".to_string()])
            .await
            .unwrap();
        let row = get_message(&pool, 100).await.unwrap().unwrap();
        assert!(row.is_encrypted);
        assert_eq!(row.content, "");
        assert_eq!(row.encryption_metadata, Some(metadata));
        assert_eq!(row.validated_mentions, vec!["bob"]);
    }

    #[tokio::test]
    async fn unknown_sender_rolls_back() {
        let pool = seeded_pool().await;
        let mut ghost = new_message(100, "boo", &[]);
        ghost.sender = SenderRef::Anonymous(999);
        // Foreign key or hydration failure, either way nothing is stored.
        assert!(create_message(&pool, &ghost).await.is_err());
        assert!(get_message(&pool, 100).await.unwrap().is_none());
    }
}
