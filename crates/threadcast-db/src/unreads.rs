use crate::{DbError, DbPool};
use std::collections::HashMap;

/// Unread/mention counts for one followed channel membership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelUnreadRow {
    pub channel_id: i64,
    pub unread_count: i64,
    pub mention_count: i64,
}

/// Unread/mention counts for one thread membership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadUnreadRow {
    pub thread_id: i64,
    pub channel_id: i64,
    pub unread_count: i64,
    pub mention_count: i64,
}

// Counts are computed against canonical message state on every call.
// Nothing here increments or decrements stored counters, so they cannot
// drift or go negative.

/// Per-channel unread and mention counts for one user's followed
/// memberships, batched over `channel_ids`. Channels the user does not
/// follow produce no row. Thread replies are excluded from channel counts
/// when the channel has threading enabled; the thread original message
/// still counts toward the channel timeline.
pub async fn channel_unreads(
    pool: &DbPool,
    user_id: i64,
    channel_ids: &[i64],
) -> Result<Vec<ChannelUnreadRow>, DbError> {
    if channel_ids.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders: Vec<String> = (2..channel_ids.len() + 2).map(|i| format!("${}", i)).collect();

    let sql = format!(
        "SELECT cm.channel_id, COUNT(m.id) AS unread_count
         FROM channel_memberships cm
         INNER JOIN channels c ON c.id = cm.channel_id
         LEFT JOIN messages m
            ON m.channel_id = cm.channel_id
           AND m.deleted_at IS NULL
           AND m.author_id <> cm.user_id
           AND m.id > cm.last_read_message_id
           AND (c.threading_enabled = FALSE OR m.thread_id IS NULL OR EXISTS (
                SELECT 1 FROM threads t WHERE t.id = m.thread_id AND t.original_message_id = m.id))
         WHERE cm.user_id = $1 AND cm.following = TRUE AND cm.channel_id IN ({})
         GROUP BY cm.channel_id",
        placeholders.join(", ")
    );
    let mut query = sqlx::query_as::<_, (i64, i64)>(&sql);
    query = query.bind(user_id);
    for id in channel_ids {
        query = query.bind(id);
    }
    let unread_rows = query.fetch_all(pool).await?;

    let sql = format!(
        "SELECT m.channel_id, COUNT(*) AS mention_count
         FROM message_mentions mm
         INNER JOIN messages m ON m.id = mm.message_id
         INNER JOIN channels c ON c.id = m.channel_id
         INNER JOIN channel_memberships cm
            ON cm.channel_id = m.channel_id AND cm.user_id = mm.user_id
         WHERE mm.user_id = $1 AND cm.following = TRUE
           AND m.deleted_at IS NULL
           AND m.id > cm.last_read_message_id
           AND (c.threading_enabled = FALSE OR m.thread_id IS NULL OR EXISTS (
                SELECT 1 FROM threads t WHERE t.id = m.thread_id AND t.original_message_id = m.id))
           AND m.channel_id IN ({})
         GROUP BY m.channel_id",
        placeholders.join(", ")
    );
    let mut query = sqlx::query_as::<_, (i64, i64)>(&sql);
    query = query.bind(user_id);
    for id in channel_ids {
        query = query.bind(id);
    }
    let mention_rows: HashMap<i64, i64> = query.fetch_all(pool).await?.into_iter().collect();

    Ok(unread_rows
        .into_iter()
        .map(|(channel_id, unread_count)| ChannelUnreadRow {
            channel_id,
            unread_count,
            mention_count: mention_rows.get(&channel_id).copied().unwrap_or(0),
        })
        .collect())
}

/// Per-thread unread and mention counts for one user, for the given
/// thread ids.
pub async fn thread_unreads(
    pool: &DbPool,
    user_id: i64,
    thread_ids: &[i64],
) -> Result<Vec<ThreadUnreadRow>, DbError> {
    thread_unreads_scoped(pool, user_id, thread_ids, "tm.thread_id", "m.thread_id").await
}

/// Per-thread unread and mention counts for one user across every thread
/// of the given channels.
pub async fn thread_unreads_for_channels(
    pool: &DbPool,
    user_id: i64,
    channel_ids: &[i64],
) -> Result<Vec<ThreadUnreadRow>, DbError> {
    thread_unreads_scoped(pool, user_id, channel_ids, "t.channel_id", "t.channel_id").await
}

async fn thread_unreads_scoped(
    pool: &DbPool,
    user_id: i64,
    scope_ids: &[i64],
    unread_scope_column: &str,
    mention_scope_column: &str,
) -> Result<Vec<ThreadUnreadRow>, DbError> {
    if scope_ids.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders: Vec<String> = (2..scope_ids.len() + 2).map(|i| format!("${}", i)).collect();

    let sql = format!(
        "SELECT tm.thread_id, t.channel_id, COUNT(m.id) AS unread_count
         FROM thread_memberships tm
         INNER JOIN threads t ON t.id = tm.thread_id
         LEFT JOIN messages m
            ON m.thread_id = tm.thread_id
           AND m.deleted_at IS NULL
           AND m.author_id <> tm.user_id
           AND m.id > tm.last_read_message_id
           AND m.id <> t.original_message_id
         WHERE tm.user_id = $1 AND {} IN ({})
         GROUP BY tm.thread_id, t.channel_id",
        unread_scope_column,
        placeholders.join(", ")
    );
    let mut query = sqlx::query_as::<_, (i64, i64, i64)>(&sql);
    query = query.bind(user_id);
    for id in scope_ids {
        query = query.bind(id);
    }
    let unread_rows = query.fetch_all(pool).await?;

    let sql = format!(
        "SELECT m.thread_id, COUNT(*) AS mention_count
         FROM message_mentions mm
         INNER JOIN messages m ON m.id = mm.message_id
         INNER JOIN threads t ON t.id = m.thread_id
         INNER JOIN thread_memberships tm
            ON tm.thread_id = m.thread_id AND tm.user_id = mm.user_id
         WHERE mm.user_id = $1
           AND m.deleted_at IS NULL
           AND m.id > tm.last_read_message_id
           AND m.id <> t.original_message_id
           AND {} IN ({})
         GROUP BY m.thread_id",
        mention_scope_column,
        placeholders.join(", ")
    );
    let mut query = sqlx::query_as::<_, (i64, i64)>(&sql);
    query = query.bind(user_id);
    for id in scope_ids {
        query = query.bind(id);
    }
    let mention_rows: HashMap<i64, i64> = query.fetch_all(pool).await?.into_iter().collect();

    Ok(unread_rows
        .into_iter()
        .map(|(thread_id, channel_id, unread_count)| ThreadUnreadRow {
            thread_id,
            channel_id,
            unread_count,
            mention_count: mention_rows.get(&thread_id).copied().unwrap_or(0),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    async fn test_pool() -> DbPool {
        let pool = crate::create_pool("sqlite::memory:", 1).await.unwrap();
        crate::run_migrations(&pool).await.unwrap();
        pool
    }

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 10, 12, 0, 0).unwrap()
    }

    async fn setup(pool: &DbPool, threading_enabled: bool) -> (i64, i64) {
        let reader = 1;
        let writer = 2;
        let channel_id = 200;
        crate::users::create_user(pool, reader, "reader", ts()).await.unwrap();
        crate::users::create_user(pool, writer, "writer", ts()).await.unwrap();
        crate::channels::create_channel(
            pool,
            channel_id,
            Some("general"),
            0,
            threading_enabled,
            &[],
            &[],
            ts(),
        )
        .await
        .unwrap();
        crate::memberships::join_channel(pool, reader, channel_id, ts())
            .await
            .unwrap();
        (reader, channel_id)
    }

    #[tokio::test]
    async fn test_channel_unreads_basic_counts() {
        let pool = test_pool().await;
        let (reader, channel_id) = setup(&pool, false).await;
        for i in 0..3 {
            crate::messages::create_message(&pool, 1000 + i, channel_id, 2, "hi", None, ts())
                .await
                .unwrap();
        }
        crate::messages::add_mention(&pool, 1001, reader).await.unwrap();

        let rows = channel_unreads(&pool, reader, &[channel_id]).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].unread_count, 3);
        assert_eq!(rows[0].mention_count, 1);
    }

    #[tokio::test]
    async fn test_channel_unreads_zero_row_for_read_channel() {
        let pool = test_pool().await;
        let (reader, channel_id) = setup(&pool, false).await;
        crate::messages::create_message(&pool, 1000, channel_id, 2, "hi", None, ts())
            .await
            .unwrap();
        crate::memberships::set_channel_last_read(&pool, reader, channel_id, 1000)
            .await
            .unwrap();

        let rows = channel_unreads(&pool, reader, &[channel_id]).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].unread_count, 0);
        assert_eq!(rows[0].mention_count, 0);
    }

    #[tokio::test]
    async fn test_channel_unreads_skip_own_and_deleted_messages() {
        let pool = test_pool().await;
        let (reader, channel_id) = setup(&pool, false).await;
        crate::messages::create_message(&pool, 1000, channel_id, reader, "mine", None, ts())
            .await
            .unwrap();
        crate::messages::create_message(&pool, 1001, channel_id, 2, "theirs", None, ts())
            .await
            .unwrap();
        crate::messages::create_message(&pool, 1002, channel_id, 2, "gone", None, ts())
            .await
            .unwrap();
        crate::messages::soft_delete(&pool, 1002, 2, ts()).await.unwrap();

        let rows = channel_unreads(&pool, reader, &[channel_id]).await.unwrap();
        assert_eq!(rows[0].unread_count, 1);
    }

    #[tokio::test]
    async fn test_channel_unreads_exclude_thread_replies_when_threading_enabled() {
        let pool = test_pool().await;
        let (reader, channel_id) = setup(&pool, true).await;
        crate::messages::create_message(&pool, 1000, channel_id, 2, "original", None, ts())
            .await
            .unwrap();
        crate::threads::create_thread(&pool, 77, channel_id, 1000, None, ts())
            .await
            .unwrap();
        crate::messages::create_message(&pool, 1001, channel_id, 2, "reply", Some(77), ts())
            .await
            .unwrap();

        let rows = channel_unreads(&pool, reader, &[channel_id]).await.unwrap();
        // The thread original message counts; the reply does not.
        assert_eq!(rows[0].unread_count, 1);
    }

    #[tokio::test]
    async fn test_channel_unreads_count_thread_replies_when_threading_disabled() {
        let pool = test_pool().await;
        let (reader, channel_id) = setup(&pool, false).await;
        crate::messages::create_message(&pool, 1000, channel_id, 2, "original", None, ts())
            .await
            .unwrap();
        crate::threads::create_thread(&pool, 77, channel_id, 1000, None, ts())
            .await
            .unwrap();
        crate::messages::create_message(&pool, 1001, channel_id, 2, "reply", Some(77), ts())
            .await
            .unwrap();

        let rows = channel_unreads(&pool, reader, &[channel_id]).await.unwrap();
        assert_eq!(rows[0].unread_count, 2);
    }

    #[tokio::test]
    async fn test_channel_unreads_no_row_without_membership() {
        let pool = test_pool().await;
        let (_, channel_id) = setup(&pool, false).await;
        let rows = channel_unreads(&pool, 2, &[channel_id]).await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_thread_unreads_counts() {
        let pool = test_pool().await;
        let (reader, channel_id) = setup(&pool, true).await;
        crate::messages::create_message(&pool, 1000, channel_id, 2, "original", None, ts())
            .await
            .unwrap();
        crate::threads::create_thread(&pool, 77, channel_id, 1000, None, ts())
            .await
            .unwrap();
        crate::memberships::join_thread(&pool, reader, 77, ts()).await.unwrap();
        crate::messages::create_message(&pool, 1001, channel_id, 2, "r1", Some(77), ts())
            .await
            .unwrap();
        crate::messages::create_message(&pool, 1002, channel_id, 2, "r2", Some(77), ts())
            .await
            .unwrap();
        crate::messages::add_mention(&pool, 1002, reader).await.unwrap();

        let rows = thread_unreads(&pool, reader, &[77]).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].channel_id, channel_id);
        assert_eq!(rows[0].unread_count, 2);
        assert_eq!(rows[0].mention_count, 1);

        let rows = thread_unreads_for_channels(&pool, reader, &[channel_id])
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].unread_count, 2);
    }

    #[tokio::test]
    async fn test_thread_unreads_never_negative_after_read_past_end() {
        let pool = test_pool().await;
        let (reader, channel_id) = setup(&pool, true).await;
        crate::messages::create_message(&pool, 1000, channel_id, 2, "original", None, ts())
            .await
            .unwrap();
        crate::threads::create_thread(&pool, 77, channel_id, 1000, None, ts())
            .await
            .unwrap();
        crate::memberships::join_thread(&pool, reader, 77, ts()).await.unwrap();
        crate::memberships::set_thread_last_read(&pool, reader, 77, 5000)
            .await
            .unwrap();

        let rows = thread_unreads(&pool, reader, &[77]).await.unwrap();
        assert_eq!(rows[0].unread_count, 0);
        assert_eq!(rows[0].mention_count, 0);
    }
}
