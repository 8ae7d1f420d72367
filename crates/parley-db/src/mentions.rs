use crate::{datetime_from_db_text, datetime_to_db_text, DbError, DbPool};
use chrono::{DateTime, Utc};
use parley_models::mention::Mention;
use sqlx::Row;

#[derive(Debug, Clone)]
pub struct MentionRow {
    pub message_id: i64,
    pub user_id: i64,
    pub created_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::any::AnyRow> for MentionRow {
    fn from_row(row: &'r sqlx::any::AnyRow) -> Result<Self, sqlx::Error> {
        let created_at_raw: String = row.try_get("created_at")?;
        Ok(Self {
            message_id: row.try_get("message_id")?,
            user_id: row.try_get("user_id")?,
            created_at: datetime_from_db_text(&created_at_raw)?,
        })
    }
}

impl From<MentionRow> for Mention {
    fn from(row: MentionRow) -> Self {
        Self {
            message_id: row.message_id,
            user_id: row.user_id,
            created_at: row.created_at,
        }
    }
}

/// Single multi-row insert scoped to one message. Pairs that already exist
/// are left alone; returns the number of rows written.
pub async fn insert_mentions(
    pool: &DbPool,
    message_id: i64,
    user_ids: &[i64],
) -> Result<u64, DbError> {
    if user_ids.is_empty() {
        return Ok(0);
    }
    let values = (0..user_ids.len())
        .map(|i| format!("($1, ${}, $2)", i + 3))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "INSERT INTO mentions (message_id, user_id, created_at) VALUES {values}
         ON CONFLICT (message_id, user_id) DO NOTHING"
    );
    let mut query = sqlx::query(&sql)
        .bind(message_id)
        .bind(datetime_to_db_text(Utc::now()));
    for user_id in user_ids {
        query = query.bind(*user_id);
    }
    let result = query.execute(pool).await?;
    Ok(result.rows_affected())
}

pub async fn get_message_mentions(
    pool: &DbPool,
    message_id: i64,
) -> Result<Vec<MentionRow>, DbError> {
    let rows = sqlx::query_as::<_, MentionRow>(
        "SELECT message_id, user_id, created_at FROM mentions
         WHERE message_id = $1 ORDER BY user_id",
    )
    .bind(message_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[tokio::test]
    async fn batch_insert_ignores_existing_pairs() {
        let pool = testing::pool().await;
        testing::seed_conversation(&pool, 1, "general").await;
        for (id, name) in [(10, "alice"), (11, "bob"), (12, "carol")] {
            testing::seed_user(&pool, id, name).await;
        }
        sqlx::query(
            "INSERT INTO messages (id, conversation_id, sender_id, created_at)
             VALUES (100, 1, 10, '2026-01-01 00:00:00')",
        )
        .execute(&pool)
        .await
        .unwrap();

        assert_eq!(insert_mentions(&pool, 100, &[11, 12]).await.unwrap(), 2);
        assert_eq!(insert_mentions(&pool, 100, &[12]).await.unwrap(), 0);
        assert_eq!(insert_mentions(&pool, 100, &[]).await.unwrap(), 0);

        let mentions: Vec<Mention> = get_message_mentions(&pool, 100)
            .await
            .unwrap()
            .into_iter()
            .map(Into::into)
            .collect();
        let users: Vec<i64> = mentions.iter().map(|m| m.user_id).collect();
        assert_eq!(users, vec![11, 12]);
    }
}
