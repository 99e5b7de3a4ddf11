use crate::{datetime_from_db_text, datetime_to_db_text, DbError, DbPool};
use chrono::{DateTime, Utc};
use sqlx::Row;
use threadcast_models::user::User;

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub created_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::any::AnyRow> for UserRow {
    fn from_row(row: &'r sqlx::any::AnyRow) -> Result<Self, sqlx::Error> {
        let created_at_raw: String = row.try_get("created_at")?;
        Ok(Self {
            id: row.try_get("id")?,
            username: row.try_get("username")?,
            created_at: datetime_from_db_text(&created_at_raw)?,
        })
    }
}

impl UserRow {
    pub fn into_user(self) -> User {
        User {
            id: self.id,
            username: self.username,
            created_at: self.created_at,
        }
    }
}

pub async fn create_user(
    pool: &DbPool,
    id: i64,
    username: &str,
    created_at: DateTime<Utc>,
) -> Result<UserRow, DbError> {
    let row = sqlx::query_as::<_, UserRow>(
        "INSERT INTO users (id, username, created_at)
         VALUES ($1, $2, $3)
         RETURNING id, username, created_at",
    )
    .bind(id)
    .bind(username)
    .bind(datetime_to_db_text(created_at))
    .fetch_one(pool)
    .await?;
    Ok(row)
}

pub async fn get_user(pool: &DbPool, id: i64) -> Result<Option<UserRow>, DbError> {
    let row = sqlx::query_as::<_, UserRow>(
        "SELECT id, username, created_at FROM users WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    async fn test_pool() -> DbPool {
        let pool = crate::create_pool("sqlite::memory:", 1).await.unwrap();
        crate::run_migrations(&pool).await.unwrap();
        pool
    }

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 10, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_create_and_get_user() {
        let pool = test_pool().await;
        let created = create_user(&pool, 1, "martin", ts()).await.unwrap();
        assert_eq!(created.username, "martin");

        let fetched = get_user(&pool, 1).await.unwrap().unwrap();
        assert_eq!(fetched.id, 1);
        assert_eq!(fetched.created_at, ts());
    }

    #[tokio::test]
    async fn test_get_user_not_found() {
        let pool = test_pool().await;
        assert!(get_user(&pool, 42).await.unwrap().is_none());
    }
}
