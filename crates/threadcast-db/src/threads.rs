use crate::{datetime_from_db_text, datetime_to_db_text, DbError, DbPool};
use chrono::{DateTime, Utc};
use sqlx::Row;
use std::collections::HashMap;
use threadcast_models::thread::Thread;

#[derive(Debug, Clone)]
pub struct ThreadRow {
    pub id: i64,
    pub channel_id: i64,
    pub original_message_id: i64,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::any::AnyRow> for ThreadRow {
    fn from_row(row: &'r sqlx::any::AnyRow) -> Result<Self, sqlx::Error> {
        let created_at_raw: String = row.try_get("created_at")?;
        Ok(Self {
            id: row.try_get("id")?,
            channel_id: row.try_get("channel_id")?,
            original_message_id: row.try_get("original_message_id")?,
            title: row.try_get("title")?,
            created_at: datetime_from_db_text(&created_at_raw)?,
        })
    }
}

impl ThreadRow {
    pub fn into_thread(self) -> Thread {
        Thread {
            id: self.id,
            channel_id: self.channel_id,
            original_message_id: self.original_message_id,
            title: self.title,
            created_at: self.created_at,
        }
    }
}

/// Deleted message ids of one thread, for per-thread bulk-delete publishes.
#[derive(Debug, Clone)]
pub struct ThreadMessageGroup {
    pub thread_id: i64,
    pub original_message_id: i64,
    pub message_ids: Vec<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct ThreadParticipants {
    /// Heaviest posters first, capped at three.
    pub user_ids: Vec<i64>,
    pub total: i64,
}

#[derive(Debug, Clone)]
pub struct LastReplyRow {
    pub thread_id: i64,
    pub id: i64,
    pub author_id: i64,
    pub author_username: String,
    pub created_at: DateTime<Utc>,
    pub content: String,
}

impl<'r> sqlx::FromRow<'r, sqlx::any::AnyRow> for LastReplyRow {
    fn from_row(row: &'r sqlx::any::AnyRow) -> Result<Self, sqlx::Error> {
        let created_at_raw: String = row.try_get("created_at")?;
        Ok(Self {
            thread_id: row.try_get("thread_id")?,
            id: row.try_get("id")?,
            author_id: row.try_get("author_id")?,
            author_username: row.try_get("author_username")?,
            created_at: datetime_from_db_text(&created_at_raw)?,
            content: row.try_get("content")?,
        })
    }
}

pub async fn create_thread(
    pool: &DbPool,
    id: i64,
    channel_id: i64,
    original_message_id: i64,
    title: Option<&str>,
    created_at: DateTime<Utc>,
) -> Result<ThreadRow, DbError> {
    let row = sqlx::query_as::<_, ThreadRow>(
        "INSERT INTO threads (id, channel_id, original_message_id, title, created_at)
         VALUES ($1, $2, $3, $4, $5)
         RETURNING id, channel_id, original_message_id, title, created_at",
    )
    .bind(id)
    .bind(channel_id)
    .bind(original_message_id)
    .bind(title)
    .bind(datetime_to_db_text(created_at))
    .fetch_one(pool)
    .await?;

    // Attach the original message to its thread.
    sqlx::query("UPDATE messages SET thread_id = $1 WHERE id = $2 AND channel_id = $3")
        .bind(id)
        .bind(original_message_id)
        .bind(channel_id)
        .execute(pool)
        .await?;

    Ok(row)
}

pub async fn get_thread(pool: &DbPool, id: i64) -> Result<Option<ThreadRow>, DbError> {
    let row = sqlx::query_as::<_, ThreadRow>(
        "SELECT id, channel_id, original_message_id, title, created_at
         FROM threads WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn get_threads(pool: &DbPool, ids: &[i64]) -> Result<Vec<ThreadRow>, DbError> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("${}", i)).collect();
    let sql = format!(
        "SELECT id, channel_id, original_message_id, title, created_at
         FROM threads WHERE id IN ({}) ORDER BY id",
        placeholders.join(", ")
    );
    let mut query = sqlx::query_as::<_, ThreadRow>(&sql);
    for id in ids {
        query = query.bind(id);
    }
    let rows = query.fetch_all(pool).await?;
    Ok(rows)
}

/// Partitions `message_ids` by the thread each message belongs to.
/// Messages outside any thread are absent from the result.
pub async fn grouped_messages(
    pool: &DbPool,
    message_ids: &[i64],
) -> Result<Vec<ThreadMessageGroup>, DbError> {
    if message_ids.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders: Vec<String> = (1..=message_ids.len()).map(|i| format!("${}", i)).collect();
    let sql = format!(
        "SELECT m.id, m.thread_id, t.original_message_id
         FROM messages m INNER JOIN threads t ON t.id = m.thread_id
         WHERE m.id IN ({})
         ORDER BY m.thread_id, m.id",
        placeholders.join(", ")
    );
    let mut query = sqlx::query_as::<_, (i64, i64, i64)>(&sql);
    for id in message_ids {
        query = query.bind(id);
    }
    let rows = query.fetch_all(pool).await?;

    let mut groups: Vec<ThreadMessageGroup> = Vec::new();
    for (message_id, thread_id, original_message_id) in rows {
        match groups.last_mut() {
            Some(group) if group.thread_id == thread_id => group.message_ids.push(message_id),
            _ => groups.push(ThreadMessageGroup {
                thread_id,
                original_message_id,
                message_ids: vec![message_id],
            }),
        }
    }
    Ok(groups)
}

/// Surviving reply counts (original message excluded) per thread.
pub async fn reply_counts(
    pool: &DbPool,
    thread_ids: &[i64],
) -> Result<HashMap<i64, i64>, DbError> {
    if thread_ids.is_empty() {
        return Ok(HashMap::new());
    }
    let placeholders: Vec<String> = (1..=thread_ids.len()).map(|i| format!("${}", i)).collect();
    let sql = format!(
        "SELECT m.thread_id, COUNT(*)
         FROM messages m INNER JOIN threads t ON t.id = m.thread_id
         WHERE m.thread_id IN ({}) AND m.deleted_at IS NULL AND m.id <> t.original_message_id
         GROUP BY m.thread_id",
        placeholders.join(", ")
    );
    let mut query = sqlx::query_as::<_, (i64, i64)>(&sql);
    for id in thread_ids {
        query = query.bind(id);
    }
    let rows = query.fetch_all(pool).await?;
    Ok(rows.into_iter().collect())
}

pub async fn participants(
    pool: &DbPool,
    thread_ids: &[i64],
) -> Result<HashMap<i64, ThreadParticipants>, DbError> {
    if thread_ids.is_empty() {
        return Ok(HashMap::new());
    }
    let placeholders: Vec<String> = (1..=thread_ids.len()).map(|i| format!("${}", i)).collect();
    let sql = format!(
        "SELECT m.thread_id, m.author_id, COUNT(*) AS message_count
         FROM messages m
         WHERE m.thread_id IN ({}) AND m.deleted_at IS NULL
         GROUP BY m.thread_id, m.author_id
         ORDER BY m.thread_id, message_count DESC, m.author_id",
        placeholders.join(", ")
    );
    let mut query = sqlx::query_as::<_, (i64, i64, i64)>(&sql);
    for id in thread_ids {
        query = query.bind(id);
    }
    let rows = query.fetch_all(pool).await?;

    let mut result: HashMap<i64, ThreadParticipants> = HashMap::new();
    for (thread_id, author_id, _message_count) in rows {
        let entry = result.entry(thread_id).or_default();
        entry.total += 1;
        if entry.user_ids.len() < 3 {
            entry.user_ids.push(author_id);
        }
    }
    Ok(result)
}

/// Most recent surviving reply per thread, with author username for
/// preview payloads.
pub async fn last_replies(
    pool: &DbPool,
    thread_ids: &[i64],
) -> Result<HashMap<i64, LastReplyRow>, DbError> {
    if thread_ids.is_empty() {
        return Ok(HashMap::new());
    }
    let placeholders: Vec<String> = (1..=thread_ids.len()).map(|i| format!("${}", i)).collect();
    let sql = format!(
        "SELECT m.thread_id, m.id, m.author_id, u.username AS author_username, m.created_at, m.content
         FROM messages m INNER JOIN users u ON u.id = m.author_id
         WHERE m.id IN (
             SELECT MAX(m2.id)
             FROM messages m2 INNER JOIN threads t ON t.id = m2.thread_id
             WHERE m2.thread_id IN ({}) AND m2.deleted_at IS NULL AND m2.id <> t.original_message_id
             GROUP BY m2.thread_id
         )",
        placeholders.join(", ")
    );
    let mut query = sqlx::query_as::<_, LastReplyRow>(&sql);
    for id in thread_ids {
        query = query.bind(id);
    }
    let rows = query.fetch_all(pool).await?;
    Ok(rows.into_iter().map(|row| (row.thread_id, row)).collect())
}
