use crate::messages::SenderRef;
use crate::{DbError, DbPool};
use parley_models::attachment::Attachment;
use sqlx::Row;

#[derive(Debug, Clone)]
pub struct AttachmentRow {
    pub id: i64,
    pub uploader_id: Option<i64>,
    pub anonymous_uploader_id: Option<i64>,
    pub message_id: Option<i64>,
    pub filename: String,
    pub mime_type: Option<String>,
    pub size: i64,
    pub url: String,
}

impl<'r> sqlx::FromRow<'r, sqlx::any::AnyRow> for AttachmentRow {
    fn from_row(row: &'r sqlx::any::AnyRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            uploader_id: row.try_get("uploader_id")?,
            anonymous_uploader_id: row.try_get("anonymous_uploader_id")?,
            message_id: row.try_get("message_id")?,
            filename: row.try_get("filename")?,
            mime_type: row.try_get("mime_type")?,
            size: row.try_get("size")?,
            url: row.try_get("url")?,
        })
    }
}

impl From<AttachmentRow> for Attachment {
    fn from(row: AttachmentRow) -> Self {
        Self {
            id: row.id,
            filename: row.filename,
            mime_type: row.mime_type,
            size: row.size,
            url: row.url,
        }
    }
}

const ATTACHMENT_COLUMNS: &str =
    "id, uploader_id, anonymous_uploader_id, message_id, filename, mime_type, size, url";

/// Registers an uploaded file. Uploading itself happens elsewhere.
pub async fn create_attachment(
    pool: &DbPool,
    id: i64,
    uploader: SenderRef,
    filename: &str,
    mime_type: Option<&str>,
    size: i64,
    url: &str,
) -> Result<AttachmentRow, DbError> {
    let (uploader_id, anonymous_uploader_id) = uploader.columns();
    let row = sqlx::query_as::<_, AttachmentRow>(&format!(
        "INSERT INTO attachments (id, uploader_id, anonymous_uploader_id, filename, mime_type, size, url)
         VALUES ($1, $2, $3, $4, $5, $6, $7)
         RETURNING {ATTACHMENT_COLUMNS}"
    ))
    .bind(id)
    .bind(uploader_id)
    .bind(anonymous_uploader_id)
    .bind(filename)
    .bind(mime_type)
    .bind(size)
    .bind(url)
    .fetch_one(pool)
    .await?;
    Ok(row)
}

/// Binds unclaimed attachments uploaded by `uploader` to `message_id`.
/// Returns the attachments now owned by the message; ids that were already
/// claimed or belong to someone else are skipped.
pub(crate) async fn claim_for_message(
    conn: &mut sqlx::AnyConnection,
    message_id: i64,
    uploader: SenderRef,
    attachment_ids: &[i64],
) -> Result<Vec<AttachmentRow>, sqlx::Error> {
    let (uploader_id, anonymous_uploader_id) = uploader.columns();
    let mut claimed = Vec::with_capacity(attachment_ids.len());
    for id in attachment_ids {
        let row = sqlx::query_as::<_, AttachmentRow>(&format!(
            "UPDATE attachments
             SET message_id = $2
             WHERE id = $1
               AND message_id IS NULL
               AND (uploader_id = $3 OR anonymous_uploader_id = $4)
             RETURNING {ATTACHMENT_COLUMNS}"
        ))
        .bind(*id)
        .bind(message_id)
        .bind(uploader_id)
        .bind(anonymous_uploader_id)
        .fetch_optional(&mut *conn)
        .await?;
        match row {
            Some(row) => claimed.push(row),
            None => tracing::warn!(
                attachment_id = *id,
                message_id,
                "attachment not claimable, skipping"
            ),
        }
    }
    Ok(claimed)
}
