use crate::{datetime_from_db_text, datetime_to_db_text, DbError, DbPool};
use chrono::{DateTime, Utc};
use sqlx::Row;
use threadcast_models::message::Message;

#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: i64,
    pub channel_id: i64,
    pub author_id: i64,
    pub thread_id: Option<i64>,
    pub thread_original_message_id: Option<i64>,
    pub content: String,
    pub cooked: String,
    pub created_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_by_id: Option<i64>,
}

impl<'r> sqlx::FromRow<'r, sqlx::any::AnyRow> for MessageRow {
    fn from_row(row: &'r sqlx::any::AnyRow) -> Result<Self, sqlx::Error> {
        let created_at_raw: String = row.try_get("created_at")?;
        let edited_at_raw: Option<String> = row.try_get("edited_at")?;
        let deleted_at_raw: Option<String> = row.try_get("deleted_at")?;
        Ok(Self {
            id: row.try_get("id")?,
            channel_id: row.try_get("channel_id")?,
            author_id: row.try_get("author_id")?,
            thread_id: row.try_get("thread_id")?,
            thread_original_message_id: row.try_get("thread_original_message_id")?,
            content: row.try_get("content")?,
            cooked: row.try_get("cooked")?,
            created_at: datetime_from_db_text(&created_at_raw)?,
            edited_at: edited_at_raw
                .as_deref()
                .map(datetime_from_db_text)
                .transpose()?,
            deleted_at: deleted_at_raw
                .as_deref()
                .map(datetime_from_db_text)
                .transpose()?,
            deleted_by_id: row.try_get("deleted_by_id")?,
        })
    }
}

impl MessageRow {
    pub fn into_message(self) -> Message {
        Message {
            id: self.id,
            channel_id: self.channel_id,
            author_id: self.author_id,
            thread_id: self.thread_id,
            thread_original_message_id: self.thread_original_message_id,
            content: self.content,
            cooked: self.cooked,
            created_at: self.created_at,
            edited_at: self.edited_at,
            deleted_at: self.deleted_at,
            deleted_by_id: self.deleted_by_id,
        }
    }
}

pub async fn create_message(
    pool: &DbPool,
    id: i64,
    channel_id: i64,
    author_id: i64,
    content: &str,
    thread_id: Option<i64>,
    created_at: DateTime<Utc>,
) -> Result<MessageRow, DbError> {
    // The cooked body starts as the raw content; the cooking pipeline
    // replaces it asynchronously via `set_cooked`.
    sqlx::query(
        "INSERT INTO messages (id, channel_id, author_id, thread_id, content, cooked, created_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(id)
    .bind(channel_id)
    .bind(author_id)
    .bind(thread_id)
    .bind(content)
    .bind(content)
    .bind(datetime_to_db_text(created_at))
    .execute(pool)
    .await?;

    get_message(pool, id).await?.ok_or(DbError::NotFound)
}

pub async fn get_message(pool: &DbPool, id: i64) -> Result<Option<MessageRow>, DbError> {
    let row = sqlx::query_as::<_, MessageRow>(
        "SELECT m.id, m.channel_id, m.author_id, m.thread_id, t.original_message_id AS thread_original_message_id, m.content, m.cooked, m.created_at, m.edited_at, m.deleted_at, m.deleted_by_id
         FROM messages m LEFT JOIN threads t ON t.id = m.thread_id
         WHERE m.id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn set_cooked(pool: &DbPool, id: i64, cooked: &str) -> Result<Option<MessageRow>, DbError> {
    let result = sqlx::query("UPDATE messages SET cooked = $2 WHERE id = $1")
        .bind(id)
        .bind(cooked)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Ok(None);
    }
    get_message(pool, id).await
}

pub async fn update_content(
    pool: &DbPool,
    id: i64,
    content: &str,
    cooked: &str,
    edited_at: DateTime<Utc>,
) -> Result<Option<MessageRow>, DbError> {
    let result = sqlx::query(
        "UPDATE messages SET content = $2, cooked = $3, edited_at = $4 WHERE id = $1",
    )
    .bind(id)
    .bind(content)
    .bind(cooked)
    .bind(datetime_to_db_text(edited_at))
    .execute(pool)
    .await?;
    if result.rows_affected() == 0 {
        return Ok(None);
    }
    get_message(pool, id).await
}

pub async fn soft_delete(
    pool: &DbPool,
    id: i64,
    deleted_by_id: i64,
    deleted_at: DateTime<Utc>,
) -> Result<Option<MessageRow>, DbError> {
    let result = sqlx::query(
        "UPDATE messages SET deleted_at = $2, deleted_by_id = $3
         WHERE id = $1 AND deleted_at IS NULL",
    )
    .bind(id)
    .bind(datetime_to_db_text(deleted_at))
    .bind(deleted_by_id)
    .execute(pool)
    .await?;
    if result.rows_affected() == 0 {
        return Ok(None);
    }
    get_message(pool, id).await
}

pub async fn soft_delete_many(
    pool: &DbPool,
    ids: &[i64],
    deleted_by_id: i64,
    deleted_at: DateTime<Utc>,
) -> Result<u64, DbError> {
    const MAX_BULK_MESSAGE_IDS: usize = 500;
    if ids.is_empty() {
        return Ok(0);
    }
    if ids.len() > MAX_BULK_MESSAGE_IDS {
        return Err(DbError::Sqlx(sqlx::Error::Protocol(
            "too many message ids in bulk delete".to_string(),
        )));
    }
    let placeholders: Vec<String> = (3..ids.len() + 3).map(|i| format!("${}", i)).collect();
    let sql = format!(
        "UPDATE messages SET deleted_at = $1, deleted_by_id = $2
         WHERE deleted_at IS NULL AND id IN ({})",
        placeholders.join(", ")
    );
    let mut query = sqlx::query(&sql)
        .bind(datetime_to_db_text(deleted_at))
        .bind(deleted_by_id);
    for id in ids {
        query = query.bind(id);
    }
    let result = query.execute(pool).await?;
    Ok(result.rows_affected())
}

pub async fn restore(pool: &DbPool, id: i64) -> Result<Option<MessageRow>, DbError> {
    let result = sqlx::query(
        "UPDATE messages SET deleted_at = NULL, deleted_by_id = NULL
         WHERE id = $1 AND deleted_at IS NOT NULL",
    )
    .bind(id)
    .execute(pool)
    .await?;
    if result.rows_affected() == 0 {
        return Ok(None);
    }
    get_message(pool, id).await
}

/// Latest surviving message on the channel timeline strictly before
/// `anchor_id`. With `exclude_thread_replies`, thread replies are invisible
/// on the timeline and only thread original messages count.
pub async fn latest_not_deleted_channel_message_id(
    pool: &DbPool,
    channel_id: i64,
    anchor_id: i64,
    exclude_thread_replies: bool,
) -> Result<Option<i64>, DbError> {
    let id: Option<i64> = if exclude_thread_replies {
        sqlx::query_scalar(
            "SELECT MAX(m.id) FROM messages m LEFT JOIN threads t ON t.id = m.thread_id
             WHERE m.channel_id = $1 AND m.id < $2 AND m.deleted_at IS NULL
               AND (m.thread_id IS NULL OR t.original_message_id = m.id)",
        )
        .bind(channel_id)
        .bind(anchor_id)
        .fetch_one(pool)
        .await?
    } else {
        sqlx::query_scalar(
            "SELECT MAX(id) FROM messages
             WHERE channel_id = $1 AND id < $2 AND deleted_at IS NULL",
        )
        .bind(channel_id)
        .bind(anchor_id)
        .fetch_one(pool)
        .await?
    };
    Ok(id)
}

pub async fn latest_not_deleted_thread_message_id(
    pool: &DbPool,
    thread_id: i64,
    anchor_id: i64,
) -> Result<Option<i64>, DbError> {
    let id: Option<i64> = sqlx::query_scalar(
        "SELECT MAX(id) FROM messages
         WHERE thread_id = $1 AND id < $2 AND deleted_at IS NULL",
    )
    .bind(thread_id)
    .bind(anchor_id)
    .fetch_one(pool)
    .await?;
    Ok(id)
}

pub async fn add_mention(pool: &DbPool, message_id: i64, user_id: i64) -> Result<(), DbError> {
    sqlx::query(
        "INSERT INTO message_mentions (message_id, user_id) VALUES ($1, $2)
         ON CONFLICT (message_id, user_id) DO NOTHING",
    )
    .bind(message_id)
    .bind(user_id)
    .execute(pool)
    .await?;
    Ok(())
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

    async fn setup_channel(pool: &DbPool) -> (i64, i64) {
        let user_id = 1;
        let channel_id = 200;
        crate::users::create_user(pool, user_id, "author", ts())
            .await
            .unwrap();
        crate::channels::create_channel(pool, channel_id, Some("general"), 0, true, &[], &[], ts())
            .await
            .unwrap();
        (user_id, channel_id)
    }

    #[tokio::test]
    async fn test_create_message() {
        let pool = test_pool().await;
        let (user_id, channel_id) = setup_channel(&pool).await;
        let msg = create_message(&pool, 1000, channel_id, user_id, "Hello!", None, ts())
            .await
            .unwrap();
        assert_eq!(msg.id, 1000);
        assert_eq!(msg.cooked, "Hello!");
        assert!(msg.thread_id.is_none());
        assert!(msg.deleted_at.is_none());

        let model = msg.into_message();
        assert!(!model.is_thread_reply());
        assert!(!model.is_thread_original());
    }

    #[tokio::test]
    async fn test_thread_original_and_reply_flags() {
        let pool = test_pool().await;
        let (user_id, channel_id) = setup_channel(&pool).await;
        create_message(&pool, 1000, channel_id, user_id, "original", None, ts())
            .await
            .unwrap();
        crate::threads::create_thread(&pool, 77, channel_id, 1000, None, ts())
            .await
            .unwrap();
        let reply = create_message(&pool, 1001, channel_id, user_id, "reply", Some(77), ts())
            .await
            .unwrap();

        let original = get_message(&pool, 1000).await.unwrap().unwrap().into_message();
        assert!(original.is_thread_original());
        assert!(!original.is_thread_reply());

        let reply = reply.into_message();
        assert!(reply.is_thread_reply());
        assert_eq!(reply.thread_original_message_id, Some(1000));
    }

    #[tokio::test]
    async fn test_soft_delete_and_restore() {
        let pool = test_pool().await;
        let (user_id, channel_id) = setup_channel(&pool).await;
        create_message(&pool, 1000, channel_id, user_id, "bye", None, ts())
            .await
            .unwrap();

        let deleted = soft_delete(&pool, 1000, user_id, ts()).await.unwrap().unwrap();
        assert_eq!(deleted.deleted_by_id, Some(user_id));
        assert!(deleted.deleted_at.is_some());

        // Second delete is a no-op.
        assert!(soft_delete(&pool, 1000, user_id, ts()).await.unwrap().is_none());

        let restored = restore(&pool, 1000).await.unwrap().unwrap();
        assert!(restored.deleted_at.is_none());
        assert!(restored.deleted_by_id.is_none());
    }

    #[tokio::test]
    async fn test_soft_delete_many() {
        let pool = test_pool().await;
        let (user_id, channel_id) = setup_channel(&pool).await;
        for i in 0..4 {
            create_message(&pool, 1000 + i, channel_id, user_id, "m", None, ts())
                .await
                .unwrap();
        }
        let affected = soft_delete_many(&pool, &[1000, 1002], user_id, ts())
            .await
            .unwrap();
        assert_eq!(affected, 2);

        assert!(get_message(&pool, 1000).await.unwrap().unwrap().deleted_at.is_some());
        assert!(get_message(&pool, 1001).await.unwrap().unwrap().deleted_at.is_none());
    }

    #[tokio::test]
    async fn test_update_content_and_cooked() {
        let pool = test_pool().await;
        let (user_id, channel_id) = setup_channel(&pool).await;
        create_message(&pool, 1000, channel_id, user_id, "draft", None, ts())
            .await
            .unwrap();

        let edited = update_content(&pool, 1000, "final", "<p>final</p>", ts())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(edited.content, "final");
        assert_eq!(edited.cooked, "<p>final</p>");
        assert!(edited.edited_at.is_some());

        let cooked = set_cooked(&pool, 1000, "<p>recooked</p>").await.unwrap().unwrap();
        assert_eq!(cooked.cooked, "<p>recooked</p>");
    }

    #[tokio::test]
    async fn test_latest_not_deleted_channel_anchor_skips_thread_replies() {
        let pool = test_pool().await;
        let (user_id, channel_id) = setup_channel(&pool).await;
        create_message(&pool, 1000, channel_id, user_id, "original", None, ts())
            .await
            .unwrap();
        crate::threads::create_thread(&pool, 77, channel_id, 1000, None, ts())
            .await
            .unwrap();
        create_message(&pool, 1001, channel_id, user_id, "reply", Some(77), ts())
            .await
            .unwrap();
        create_message(&pool, 1002, channel_id, user_id, "timeline", None, ts())
            .await
            .unwrap();
        soft_delete(&pool, 1002, user_id, ts()).await.unwrap();

        let anchor = latest_not_deleted_channel_message_id(&pool, channel_id, 1003, true)
            .await
            .unwrap();
        assert_eq!(anchor, Some(1000));

        let anchor = latest_not_deleted_channel_message_id(&pool, channel_id, 1003, false)
            .await
            .unwrap();
        assert_eq!(anchor, Some(1001));
    }

    #[tokio::test]
    async fn test_latest_not_deleted_thread_anchor() {
        let pool = test_pool().await;
        let (user_id, channel_id) = setup_channel(&pool).await;
        create_message(&pool, 1000, channel_id, user_id, "original", None, ts())
            .await
            .unwrap();
        crate::threads::create_thread(&pool, 77, channel_id, 1000, None, ts())
            .await
            .unwrap();
        create_message(&pool, 1001, channel_id, user_id, "r1", Some(77), ts())
            .await
            .unwrap();
        create_message(&pool, 1002, channel_id, user_id, "r2", Some(77), ts())
            .await
            .unwrap();
        soft_delete(&pool, 1002, user_id, ts()).await.unwrap();

        let anchor = latest_not_deleted_thread_message_id(&pool, 77, 1003).await.unwrap();
        assert_eq!(anchor, Some(1001));

        let anchor = latest_not_deleted_thread_message_id(&pool, 77, 1001).await.unwrap();
        assert_eq!(anchor, Some(1000));
    }
}
