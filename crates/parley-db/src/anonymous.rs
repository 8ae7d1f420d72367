use crate::{bool_from_any_row, bool_to_db, DbError, DbPool};
use parley_models::user::AnonymousParticipant;
use sqlx::Row;

#[derive(Debug, Clone)]
pub struct AnonymousRow {
    pub id: i64,
    pub session_token: String,
    pub conversation_id: i64,
    pub nickname: String,
    pub language: String,
    pub is_active: bool,
    pub can_send_messages: bool,
}

impl<'r> sqlx::FromRow<'r, sqlx::any::AnyRow> for AnonymousRow {
    fn from_row(row: &'r sqlx::any::AnyRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            session_token: row.try_get("session_token")?,
            conversation_id: row.try_get("conversation_id")?,
            nickname: row.try_get("nickname")?,
            language: row.try_get("language")?,
            is_active: bool_from_any_row(row, "is_active")?,
            can_send_messages: bool_from_any_row(row, "can_send_messages")?,
        })
    }
}

impl From<AnonymousRow> for AnonymousParticipant {
    fn from(row: AnonymousRow) -> Self {
        Self {
            id: row.id,
            conversation_id: row.conversation_id,
            nickname: row.nickname,
            is_active: row.is_active,
            can_send_messages: row.can_send_messages,
            language: Some(row.language),
        }
    }
}

const ANON_COLUMNS: &str =
    "id, session_token, conversation_id, nickname, language, is_active, can_send_messages";

pub async fn create_participant(
    pool: &DbPool,
    id: i64,
    session_token: &str,
    conversation_id: i64,
    nickname: &str,
    language: &str,
    can_send_messages: bool,
) -> Result<AnonymousRow, DbError> {
    let row = sqlx::query_as::<_, AnonymousRow>(&format!(
        "INSERT INTO anonymous_participants (id, session_token, conversation_id, nickname, language, can_send_messages)
         VALUES ($1, $2, $3, $4, $5, $6)
         RETURNING {ANON_COLUMNS}"
    ))
    .bind(id)
    .bind(session_token)
    .bind(conversation_id)
    .bind(nickname)
    .bind(language)
    .bind(bool_to_db(can_send_messages))
    .fetch_one(pool)
    .await?;
    Ok(row)
}

pub async fn get_by_session_token(
    pool: &DbPool,
    session_token: &str,
) -> Result<Option<AnonymousRow>, DbError> {
    let row = sqlx::query_as::<_, AnonymousRow>(&format!(
        "SELECT {ANON_COLUMNS} FROM anonymous_participants WHERE session_token = $1"
    ))
    .bind(session_token)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}
