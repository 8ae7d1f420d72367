use crate::{bool_from_any_row, datetime_from_db_text, datetime_to_db_text, DbError, DbPool};
use chrono::{DateTime, Utc};
use parley_models::link::TrackingLink;
use sqlx::Row;

#[derive(Debug, Clone)]
pub struct TrackingLinkRow {
    pub id: i64,
    pub token: String,
    pub original_url: String,
    pub conversation_id: i64,
    pub created_by: Option<i64>,
    pub message_id: Option<i64>,
    pub is_active: bool,
    pub click_count: i64,
    pub created_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::any::AnyRow> for TrackingLinkRow {
    fn from_row(row: &'r sqlx::any::AnyRow) -> Result<Self, sqlx::Error> {
        let created_at_raw: String = row.try_get("created_at")?;
        Ok(Self {
            id: row.try_get("id")?,
            token: row.try_get("token")?,
            original_url: row.try_get("original_url")?,
            conversation_id: row.try_get("conversation_id")?,
            created_by: row.try_get("created_by")?,
            message_id: row.try_get("message_id")?,
            is_active: bool_from_any_row(row, "is_active")?,
            click_count: row.try_get("click_count")?,
            created_at: datetime_from_db_text(&created_at_raw)?,
        })
    }
}

impl From<TrackingLinkRow> for TrackingLink {
    fn from(row: TrackingLinkRow) -> Self {
        Self {
            id: row.id,
            token: row.token,
            original_url: row.original_url,
            conversation_id: row.conversation_id,
            created_by: row.created_by,
            message_id: row.message_id,
            is_active: row.is_active,
            click_count: row.click_count,
            created_at: row.created_at,
        }
    }
}

const LINK_COLUMNS: &str = "id, token, original_url, conversation_id, created_by, message_id, is_active, click_count, created_at";

/// The live link for `(url, conversation)`, if any.
pub async fn find_live_link(
    pool: &DbPool,
    original_url: &str,
    conversation_id: i64,
) -> Result<Option<TrackingLinkRow>, DbError> {
    let row = sqlx::query_as::<_, TrackingLinkRow>(&format!(
        "SELECT {LINK_COLUMNS} FROM tracking_links
         WHERE original_url = $1 AND conversation_id = $2 AND is_active = 1"
    ))
    .bind(original_url)
    .bind(conversation_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn get_link_by_token(
    pool: &DbPool,
    token: &str,
) -> Result<Option<TrackingLinkRow>, DbError> {
    let row = sqlx::query_as::<_, TrackingLinkRow>(&format!(
        "SELECT {LINK_COLUMNS} FROM tracking_links WHERE token = $1"
    ))
    .bind(token)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Plain insert. Conflicts on the token or on the live `(url, conversation)`
/// pair surface as unique violations for the caller to resolve.
pub async fn insert_link(
    pool: &DbPool,
    id: i64,
    token: &str,
    original_url: &str,
    conversation_id: i64,
    created_by: Option<i64>,
) -> Result<TrackingLinkRow, DbError> {
    let row = sqlx::query_as::<_, TrackingLinkRow>(&format!(
        "INSERT INTO tracking_links (id, token, original_url, conversation_id, created_by, created_at)
         VALUES ($1, $2, $3, $4, $5, $6)
         RETURNING {LINK_COLUMNS}"
    ))
    .bind(id)
    .bind(token)
    .bind(original_url)
    .bind(conversation_id)
    .bind(created_by)
    .bind(datetime_to_db_text(Utc::now()))
    .fetch_one(pool)
    .await?;
    Ok(row)
}

/// Attach still-unowned links named by `tokens` to `message_id`. Returns the
/// number of links claimed.
pub async fn backfill_message_id(
    pool: &DbPool,
    conversation_id: i64,
    message_id: i64,
    tokens: &[String],
) -> Result<u64, DbError> {
    let mut claimed = 0;
    for token in tokens {
        let result = sqlx::query(
            "UPDATE tracking_links SET message_id = $1
             WHERE token = $2 AND conversation_id = $3 AND message_id IS NULL",
        )
        .bind(message_id)
        .bind(token)
        .bind(conversation_id)
        .execute(pool)
        .await?;
        claimed += result.rows_affected();
    }
    Ok(claimed)
}
