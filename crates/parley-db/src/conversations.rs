use crate::{
    bool_from_any_row, bool_to_db, datetime_from_db_text, datetime_to_db_text, DbError, DbPool,
};
use chrono::{DateTime, Utc};
use parley_models::conversation::{Conversation, ConversationKind, EncryptionSetting, Membership};
use sqlx::Row;

#[derive(Debug, Clone)]
pub struct ConversationRow {
    pub id: i64,
    pub identifier: String,
    pub kind: String,
    pub title: Option<String>,
    pub allow_anonymous: bool,
    pub encryption_mode: Option<String>,
    pub encryption_enabled_at: Option<DateTime<Utc>>,
    pub server_key_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::any::AnyRow> for ConversationRow {
    fn from_row(row: &'r sqlx::any::AnyRow) -> Result<Self, sqlx::Error> {
        let enabled_at_raw: Option<String> = row.try_get("encryption_enabled_at")?;
        let created_at_raw: String = row.try_get("created_at")?;
        Ok(Self {
            id: row.try_get("id")?,
            identifier: row.try_get("identifier")?,
            kind: row.try_get("kind")?,
            title: row.try_get("title")?,
            allow_anonymous: bool_from_any_row(row, "allow_anonymous")?,
            encryption_mode: row.try_get("encryption_mode")?,
            encryption_enabled_at: enabled_at_raw
                .as_deref()
                .map(datetime_from_db_text)
                .transpose()?,
            server_key_id: row.try_get("server_key_id")?,
            created_at: datetime_from_db_text(&created_at_raw)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct MemberRow {
    pub conversation_id: i64,
    pub user_id: i64,
    pub is_active: bool,
    pub can_send_messages: bool,
}

impl<'r> sqlx::FromRow<'r, sqlx::any::AnyRow> for MemberRow {
    fn from_row(row: &'r sqlx::any::AnyRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            conversation_id: row.try_get("conversation_id")?,
            user_id: row.try_get("user_id")?,
            is_active: bool_from_any_row(row, "is_active")?,
            can_send_messages: bool_from_any_row(row, "can_send_messages")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewConversation<'a> {
    pub id: i64,
    pub identifier: &'a str,
    pub kind: &'a str,
    pub title: Option<&'a str>,
    pub allow_anonymous: bool,
}

const CONVERSATION_COLUMNS: &str = "id, identifier, kind, title, allow_anonymous, encryption_mode, encryption_enabled_at, server_key_id, created_at";

pub async fn create_conversation(
    pool: &DbPool,
    new: &NewConversation<'_>,
) -> Result<ConversationRow, DbError> {
    let row = sqlx::query_as::<_, ConversationRow>(&format!(
        "INSERT INTO conversations (id, identifier, kind, title, allow_anonymous, created_at)
         VALUES ($1, $2, $3, $4, $5, $6)
         RETURNING {CONVERSATION_COLUMNS}"
    ))
    .bind(new.id)
    .bind(new.identifier)
    .bind(new.kind)
    .bind(new.title)
    .bind(bool_to_db(new.allow_anonymous))
    .bind(datetime_to_db_text(Utc::now()))
    .fetch_one(pool)
    .await?;
    Ok(row)
}

pub async fn get_conversation(pool: &DbPool, id: i64) -> Result<Option<ConversationRow>, DbError> {
    let row = sqlx::query_as::<_, ConversationRow>(&format!(
        "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Identifier (slug) to id.
pub async fn resolve_identifier(pool: &DbPool, identifier: &str) -> Result<Option<i64>, DbError> {
    let id: Option<i64> = sqlx::query_scalar("SELECT id FROM conversations WHERE identifier = $1")
        .bind(identifier)
        .fetch_optional(pool)
        .await?;
    Ok(id)
}

/// Configure (or clear, with `mode = None`) a conversation's encryption.
pub async fn set_encryption(
    pool: &DbPool,
    id: i64,
    mode: Option<&str>,
    enabled_at: Option<DateTime<Utc>>,
    server_key_id: Option<&str>,
) -> Result<(), DbError> {
    let result = sqlx::query(
        "UPDATE conversations
         SET encryption_mode = $2, encryption_enabled_at = $3, server_key_id = $4
         WHERE id = $1",
    )
    .bind(id)
    .bind(mode)
    .bind(enabled_at.map(datetime_to_db_text))
    .bind(server_key_id)
    .execute(pool)
    .await?;
    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }
    Ok(())
}

pub async fn add_member(
    pool: &DbPool,
    conversation_id: i64,
    user_id: i64,
    can_send_messages: bool,
) -> Result<(), DbError> {
    sqlx::query(
        "INSERT INTO conversation_members (conversation_id, user_id, can_send_messages, joined_at)
         VALUES ($1, $2, $3, $4)",
    )
    .bind(conversation_id)
    .bind(user_id)
    .bind(bool_to_db(can_send_messages))
    .bind(datetime_to_db_text(Utc::now()))
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_active_members(
    pool: &DbPool,
    conversation_id: i64,
) -> Result<Vec<MemberRow>, DbError> {
    let rows = sqlx::query_as::<_, MemberRow>(
        "SELECT conversation_id, user_id, is_active, can_send_messages
         FROM conversation_members
         WHERE conversation_id = $1 AND is_active = 1
         ORDER BY user_id",
    )
    .bind(conversation_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Conversation record plus its active membership.
pub async fn load_conversation(pool: &DbPool, id: i64) -> Result<Option<Conversation>, DbError> {
    let Some(row) = get_conversation(pool, id).await? else {
        return Ok(None);
    };
    let members = get_active_members(pool, id).await?;
    let kind = ConversationKind::parse(&row.kind).ok_or_else(|| {
        DbError::Sqlx(sqlx::Error::Protocol(format!(
            "conversation {} has unknown kind '{}'",
            row.id, row.kind
        )))
    })?;

    Ok(Some(Conversation {
        id: row.id,
        identifier: row.identifier,
        kind,
        title: row.title,
        allow_anonymous: row.allow_anonymous,
        encryption: EncryptionSetting::from_db(row.encryption_mode.as_deref()),
        encryption_enabled_at: row.encryption_enabled_at,
        server_key_id: row.server_key_id,
        members: members
            .into_iter()
            .map(|m| Membership {
                user_id: m.user_id,
                can_send_messages: m.can_send_messages,
            })
            .collect(),
        created_at: row.created_at,
    }))
}

/// Distinct preferred languages of active members and anonymous participants.
pub async fn participant_languages(
    pool: &DbPool,
    conversation_id: i64,
) -> Result<Vec<String>, DbError> {
    let languages: Vec<String> = sqlx::query_scalar(
        "SELECT u.system_language AS language
         FROM conversation_members m
         JOIN users u ON u.id = m.user_id
         WHERE m.conversation_id = $1 AND m.is_active = 1 AND u.is_active = 1
         UNION
         SELECT language
         FROM anonymous_participants
         WHERE conversation_id = $2 AND is_active = 1
         ORDER BY language",
    )
    .bind(conversation_id)
    .bind(conversation_id)
    .fetch_all(pool)
    .await?;
    Ok(languages)
}
