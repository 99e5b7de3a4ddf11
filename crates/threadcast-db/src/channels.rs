use crate::{
    bool_from_any_row, datetime_from_db_text, datetime_to_db_text, ids_from_db_text,
    ids_to_db_text, DbError, DbPool,
};
use chrono::{DateTime, Utc};
use sqlx::Row;
use threadcast_models::channel::{Channel, ChannelStatus, ChannelType};

#[derive(Debug, Clone)]
pub struct ChannelRow {
    pub id: i64,
    pub name: Option<String>,
    pub description: Option<String>,
    pub slug: Option<String>,
    pub channel_type: i16,
    pub status: i16,
    pub threading_enabled: bool,
    pub allowed_user_ids: String,
    pub allowed_group_ids: String,
    pub last_bus_sequence: i64,
    pub user_count: i32,
    pub created_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::any::AnyRow> for ChannelRow {
    fn from_row(row: &'r sqlx::any::AnyRow) -> Result<Self, sqlx::Error> {
        let created_at_raw: String = row.try_get("created_at")?;
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            slug: row.try_get("slug")?,
            channel_type: row.try_get("channel_type")?,
            status: row.try_get("status")?,
            threading_enabled: bool_from_any_row(row, "threading_enabled")?,
            allowed_user_ids: row.try_get("allowed_user_ids")?,
            allowed_group_ids: row.try_get("allowed_group_ids")?,
            last_bus_sequence: row.try_get("last_bus_sequence")?,
            user_count: row.try_get("user_count")?,
            created_at: datetime_from_db_text(&created_at_raw)?,
        })
    }
}

impl ChannelRow {
    pub fn into_channel(self) -> Result<Channel, DbError> {
        let channel_type = match self.channel_type {
            0 => ChannelType::Category,
            1 => ChannelType::DirectMessage,
            other => {
                return Err(DbError::Sqlx(sqlx::Error::Protocol(format!(
                    "unknown channel type {other}"
                ))))
            }
        };
        let status = match self.status {
            0 => ChannelStatus::Open,
            1 => ChannelStatus::Closed,
            2 => ChannelStatus::Archived,
            other => {
                return Err(DbError::Sqlx(sqlx::Error::Protocol(format!(
                    "unknown channel status {other}"
                ))))
            }
        };
        Ok(Channel {
            id: self.id,
            channel_type,
            name: self.name,
            description: self.description,
            slug: self.slug,
            status,
            threading_enabled: self.threading_enabled,
            allowed_user_ids: ids_from_db_text(&self.allowed_user_ids)?,
            allowed_group_ids: ids_from_db_text(&self.allowed_group_ids)?,
            last_bus_sequence: self.last_bus_sequence,
            user_count: self.user_count,
            created_at: self.created_at,
        })
    }
}

#[allow(clippy::too_many_arguments)]
pub async fn create_channel(
    pool: &DbPool,
    id: i64,
    name: Option<&str>,
    channel_type: i16,
    threading_enabled: bool,
    allowed_user_ids: &[i64],
    allowed_group_ids: &[i64],
    created_at: DateTime<Utc>,
) -> Result<ChannelRow, DbError> {
    let row = sqlx::query_as::<_, ChannelRow>(
        "INSERT INTO channels (id, name, channel_type, threading_enabled, allowed_user_ids, allowed_group_ids, created_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7)
         RETURNING id, name, description, slug, channel_type, status, threading_enabled, allowed_user_ids, allowed_group_ids, last_bus_sequence, user_count, created_at",
    )
    .bind(id)
    .bind(name)
    .bind(channel_type)
    .bind(threading_enabled)
    .bind(ids_to_db_text(allowed_user_ids))
    .bind(ids_to_db_text(allowed_group_ids))
    .bind(datetime_to_db_text(created_at))
    .fetch_one(pool)
    .await?;
    Ok(row)
}

pub async fn get_channel(pool: &DbPool, id: i64) -> Result<Option<ChannelRow>, DbError> {
    let row = sqlx::query_as::<_, ChannelRow>(
        "SELECT id, name, description, slug, channel_type, status, threading_enabled, allowed_user_ids, allowed_group_ids, last_bus_sequence, user_count, created_at
         FROM channels WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn get_channels(pool: &DbPool, ids: &[i64]) -> Result<Vec<ChannelRow>, DbError> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("${}", i)).collect();
    let sql = format!(
        "SELECT id, name, description, slug, channel_type, status, threading_enabled, allowed_user_ids, allowed_group_ids, last_bus_sequence, user_count, created_at
         FROM channels WHERE id IN ({}) ORDER BY id",
        placeholders.join(", ")
    );
    let mut query = sqlx::query_as::<_, ChannelRow>(&sql);
    for id in ids {
        query = query.bind(id);
    }
    let rows = query.fetch_all(pool).await?;
    Ok(rows)
}

pub async fn set_status(pool: &DbPool, id: i64, status: i16) -> Result<bool, DbError> {
    let result = sqlx::query("UPDATE channels SET status = $2 WHERE id = $1")
        .bind(id)
        .bind(status)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Records the bus sequence of the latest root-topic publish. Only moves
/// forward; stale sequences from racing publishers are ignored.
pub async fn bump_last_bus_sequence(
    pool: &DbPool,
    id: i64,
    sequence: i64,
) -> Result<(), DbError> {
    sqlx::query(
        "UPDATE channels SET last_bus_sequence = $2
         WHERE id = $1 AND last_bus_sequence < $2",
    )
    .bind(id)
    .bind(sequence)
    .execute(pool)
    .await?;
    Ok(())
}

/// Recomputes `user_count` from the membership table.
pub async fn recount_members(pool: &DbPool, id: i64) -> Result<i32, DbError> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM channel_memberships
         WHERE channel_id = $1 AND following = TRUE",
    )
    .bind(id)
    .fetch_one(pool)
    .await?;
    sqlx::query("UPDATE channels SET user_count = $2 WHERE id = $1")
        .bind(id)
        .bind(count)
        .execute(pool)
        .await?;
    Ok(count as i32)
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
    async fn test_create_channel_round_trips_allow_lists() {
        let pool = test_pool().await;
        let row = create_channel(&pool, 7, Some("support"), 0, true, &[], &[11, 12], ts())
            .await
            .unwrap();
        assert!(row.threading_enabled);

        let channel = row.into_channel().unwrap();
        assert_eq!(channel.channel_type, ChannelType::Category);
        assert_eq!(channel.status, ChannelStatus::Open);
        assert!(channel.allowed_user_ids.is_empty());
        assert_eq!(channel.allowed_group_ids, vec![11, 12]);
    }

    #[tokio::test]
    async fn test_get_channel_not_found() {
        let pool = test_pool().await;
        assert!(get_channel(&pool, 999).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_status() {
        let pool = test_pool().await;
        create_channel(&pool, 7, Some("support"), 0, false, &[], &[], ts())
            .await
            .unwrap();
        assert!(set_status(&pool, 7, 2).await.unwrap());

        let channel = get_channel(&pool, 7)
            .await
            .unwrap()
            .unwrap()
            .into_channel()
            .unwrap();
        assert_eq!(channel.status, ChannelStatus::Archived);
    }

    #[tokio::test]
    async fn test_bump_last_bus_sequence_never_goes_backwards() {
        let pool = test_pool().await;
        create_channel(&pool, 7, Some("support"), 0, false, &[], &[], ts())
            .await
            .unwrap();

        bump_last_bus_sequence(&pool, 7, 5).await.unwrap();
        bump_last_bus_sequence(&pool, 7, 3).await.unwrap();

        let row = get_channel(&pool, 7).await.unwrap().unwrap();
        assert_eq!(row.last_bus_sequence, 5);
    }
}
