use crate::{bool_from_any_row, DbError, DbPool};
use parley_models::user::{User, UserRole};
use sqlx::Row;

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub display_name: Option<String>,
    pub avatar: Option<String>,
    pub role: String,
    pub is_active: bool,
    pub system_language: String,
}

impl<'r> sqlx::FromRow<'r, sqlx::any::AnyRow> for UserRow {
    fn from_row(row: &'r sqlx::any::AnyRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            username: row.try_get("username")?,
            display_name: row.try_get("display_name")?,
            avatar: row.try_get("avatar")?,
            role: row.try_get("role")?,
            is_active: bool_from_any_row(row, "is_active")?,
            system_language: row.try_get("system_language")?,
        })
    }
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            role: UserRole::parse(&row.role),
            username: row.username,
            display_name: row.display_name,
            avatar: row.avatar,
            is_active: row.is_active,
            system_language: Some(row.system_language),
        }
    }
}

const USER_COLUMNS: &str = "id, username, display_name, avatar, role, is_active, system_language";

pub async fn create_user(
    pool: &DbPool,
    id: i64,
    username: &str,
    display_name: Option<&str>,
    role: &str,
    system_language: &str,
) -> Result<UserRow, DbError> {
    let row = sqlx::query_as::<_, UserRow>(&format!(
        "INSERT INTO users (id, username, display_name, role, system_language)
         VALUES ($1, $2, $3, $4, $5)
         RETURNING {USER_COLUMNS}"
    ))
    .bind(id)
    .bind(username)
    .bind(display_name)
    .bind(role)
    .bind(system_language)
    .fetch_one(pool)
    .await?;
    Ok(row)
}

pub async fn get_user(pool: &DbPool, id: i64) -> Result<Option<UserRow>, DbError> {
    let row = sqlx::query_as::<_, UserRow>(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Case-insensitive lookup; unknown names are simply absent from the result.
pub async fn get_users_by_usernames(
    pool: &DbPool,
    usernames: &[String],
) -> Result<Vec<UserRow>, DbError> {
    if usernames.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders = (1..=usernames.len())
        .map(|i| format!("${i}"))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "SELECT {USER_COLUMNS} FROM users WHERE LOWER(username) IN ({placeholders})"
    );
    let mut query = sqlx::query_as::<_, UserRow>(&sql);
    for name in usernames {
        query = query.bind(name.to_lowercase());
    }
    Ok(query.fetch_all(pool).await?)
}

pub async fn get_users_by_ids(pool: &DbPool, ids: &[i64]) -> Result<Vec<UserRow>, DbError> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders = (1..=ids.len())
        .map(|i| format!("${i}"))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id IN ({placeholders})");
    let mut query = sqlx::query_as::<_, UserRow>(&sql);
    for id in ids {
        query = query.bind(*id);
    }
    Ok(query.fetch_all(pool).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[tokio::test]
    async fn username_lookup_is_case_insensitive() {
        let pool = testing::pool().await;
        create_user(&pool, 1, "Alice", Some("Alice A."), "admin", "fr")
            .await
            .unwrap();
        testing::seed_user(&pool, 2, "bob").await;

        let rows = get_users_by_usernames(&pool, &["ALICE".into(), "carol".into()])
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        let user: User = rows[0].clone().into();
        assert_eq!(user.role, UserRole::Admin);
        assert_eq!(user.system_language.as_deref(), Some("fr"));
    }

    #[tokio::test]
    async fn deactivation_is_persisted() {
        let pool = testing::pool().await;
        testing::seed_user(&pool, 1, "alice").await;
        assert_eq!(testing::deactivate_user(&pool, 1).await, 1);
        assert!(!get_user(&pool, 1).await.unwrap().unwrap().is_active);
        assert_eq!(testing::deactivate_user(&pool, 99).await, 0);
    }

    #[tokio::test]
    async fn duplicate_username_is_a_unique_violation() {
        let pool = testing::pool().await;
        testing::seed_user(&pool, 1, "alice").await;
        let err = create_user(&pool, 2, "ALICE", None, "user", "en")
            .await
            .unwrap_err();
        assert!(err.is_unique_violation());
    }
}
