use crate::{bool_from_any_row, datetime_from_db_text, datetime_to_db_text, DbError, DbPool};
use chrono::{DateTime, Utc};
use sqlx::Row;

#[derive(Debug, Clone)]
pub struct ChannelMembershipRow {
    pub user_id: i64,
    pub channel_id: i64,
    pub following: bool,
    pub last_read_message_id: i64,
    pub created_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::any::AnyRow> for ChannelMembershipRow {
    fn from_row(row: &'r sqlx::any::AnyRow) -> Result<Self, sqlx::Error> {
        let created_at_raw: String = row.try_get("created_at")?;
        Ok(Self {
            user_id: row.try_get("user_id")?,
            channel_id: row.try_get("channel_id")?,
            following: bool_from_any_row(row, "following")?,
            last_read_message_id: row.try_get("last_read_message_id")?,
            created_at: datetime_from_db_text(&created_at_raw)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ThreadMembershipRow {
    pub user_id: i64,
    pub thread_id: i64,
    pub last_read_message_id: i64,
    pub created_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::any::AnyRow> for ThreadMembershipRow {
    fn from_row(row: &'r sqlx::any::AnyRow) -> Result<Self, sqlx::Error> {
        let created_at_raw: String = row.try_get("created_at")?;
        Ok(Self {
            user_id: row.try_get("user_id")?,
            thread_id: row.try_get("thread_id")?,
            last_read_message_id: row.try_get("last_read_message_id")?,
            created_at: datetime_from_db_text(&created_at_raw)?,
        })
    }
}

/// Membership joined with its user, as needed for per-recipient channel
/// serialization.
#[derive(Debug, Clone)]
pub struct MembershipWithUserRow {
    pub user_id: i64,
    pub username: String,
    pub channel_id: i64,
    pub following: bool,
    pub last_read_message_id: i64,
}

impl<'r> sqlx::FromRow<'r, sqlx::any::AnyRow> for MembershipWithUserRow {
    fn from_row(row: &'r sqlx::any::AnyRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            user_id: row.try_get("user_id")?,
            username: row.try_get("username")?,
            channel_id: row.try_get("channel_id")?,
            following: bool_from_any_row(row, "following")?,
            last_read_message_id: row.try_get("last_read_message_id")?,
        })
    }
}

pub async fn join_channel(
    pool: &DbPool,
    user_id: i64,
    channel_id: i64,
    created_at: DateTime<Utc>,
) -> Result<ChannelMembershipRow, DbError> {
    let row = sqlx::query_as::<_, ChannelMembershipRow>(
        "INSERT INTO channel_memberships (user_id, channel_id, following, created_at)
         VALUES ($1, $2, TRUE, $3)
         ON CONFLICT (user_id, channel_id) DO UPDATE SET following = TRUE
         RETURNING user_id, channel_id, following, last_read_message_id, created_at",
    )
    .bind(user_id)
    .bind(channel_id)
    .bind(datetime_to_db_text(created_at))
    .fetch_one(pool)
    .await?;
    Ok(row)
}

/// Removes the membership row entirely. A later re-join starts from a
/// fresh zero read state rather than the old pointer.
pub async fn leave_channel(pool: &DbPool, user_id: i64, channel_id: i64) -> Result<bool, DbError> {
    let result =
        sqlx::query("DELETE FROM channel_memberships WHERE user_id = $1 AND channel_id = $2")
            .bind(user_id)
            .bind(channel_id)
            .execute(pool)
            .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn get_channel_membership(
    pool: &DbPool,
    user_id: i64,
    channel_id: i64,
) -> Result<Option<ChannelMembershipRow>, DbError> {
    let row = sqlx::query_as::<_, ChannelMembershipRow>(
        "SELECT user_id, channel_id, following, last_read_message_id, created_at
         FROM channel_memberships WHERE user_id = $1 AND channel_id = $2",
    )
    .bind(user_id)
    .bind(channel_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Advances the read pointer. Stale pointers are ignored so the pointer
/// never moves backwards.
pub async fn set_channel_last_read(
    pool: &DbPool,
    user_id: i64,
    channel_id: i64,
    message_id: i64,
) -> Result<bool, DbError> {
    let result = sqlx::query(
        "UPDATE channel_memberships SET last_read_message_id = $3
         WHERE user_id = $1 AND channel_id = $2 AND last_read_message_id < $3",
    )
    .bind(user_id)
    .bind(channel_id)
    .bind(message_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn join_thread(
    pool: &DbPool,
    user_id: i64,
    thread_id: i64,
    created_at: DateTime<Utc>,
) -> Result<ThreadMembershipRow, DbError> {
    let row = sqlx::query_as::<_, ThreadMembershipRow>(
        "INSERT INTO thread_memberships (user_id, thread_id, created_at)
         VALUES ($1, $2, $3)
         ON CONFLICT (user_id, thread_id) DO NOTHING
         RETURNING user_id, thread_id, last_read_message_id, created_at",
    )
    .bind(user_id)
    .bind(thread_id)
    .bind(datetime_to_db_text(created_at))
    .fetch_optional(pool)
    .await?;
    match row {
        Some(row) => Ok(row),
        // DO NOTHING returns no row on conflict; fetch the existing one.
        None => {
            let row = sqlx::query_as::<_, ThreadMembershipRow>(
                "SELECT user_id, thread_id, last_read_message_id, created_at
                 FROM thread_memberships WHERE user_id = $1 AND thread_id = $2",
            )
            .bind(user_id)
            .bind(thread_id)
            .fetch_one(pool)
            .await?;
            Ok(row)
        }
    }
}

pub async fn set_thread_last_read(
    pool: &DbPool,
    user_id: i64,
    thread_id: i64,
    message_id: i64,
) -> Result<bool, DbError> {
    let result = sqlx::query(
        "UPDATE thread_memberships SET last_read_message_id = $3
         WHERE user_id = $1 AND thread_id = $2 AND last_read_message_id < $3",
    )
    .bind(user_id)
    .bind(thread_id)
    .bind(message_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Batch-fetches memberships (with users) for a channel, restricted to
/// `user_ids`. One query feeds the whole per-recipient fan-out.
pub async fn memberships_with_users(
    pool: &DbPool,
    channel_id: i64,
    user_ids: &[i64],
) -> Result<Vec<MembershipWithUserRow>, DbError> {
    if user_ids.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders: Vec<String> = (2..user_ids.len() + 2).map(|i| format!("${}", i)).collect();
    let sql = format!(
        "SELECT cm.user_id, u.username, cm.channel_id, cm.following, cm.last_read_message_id
         FROM channel_memberships cm INNER JOIN users u ON u.id = cm.user_id
         WHERE cm.channel_id = $1 AND cm.user_id IN ({})
         ORDER BY cm.user_id",
        placeholders.join(", ")
    );
    let mut query = sqlx::query_as::<_, MembershipWithUserRow>(&sql);
    query = query.bind(channel_id);
    for id in user_ids {
        query = query.bind(id);
    }
    let rows = query.fetch_all(pool).await?;
    Ok(rows)
}

/// Usernames of the other members of a direct-message channel, for
/// viewer-relative channel titles.
pub async fn dm_counterpart_usernames(
    pool: &DbPool,
    channel_id: i64,
    viewer_id: i64,
) -> Result<Vec<String>, DbError> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT u.username
         FROM channel_memberships cm INNER JOIN users u ON u.id = cm.user_id
         WHERE cm.channel_id = $1 AND cm.user_id <> $2
         ORDER BY u.username",
    )
    .bind(channel_id)
    .bind(viewer_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(|(name,)| name).collect())
}
