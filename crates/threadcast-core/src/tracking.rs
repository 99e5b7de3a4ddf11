use crate::error::CoreError;
use crate::guardian::Guardian;
use crate::serialize::excerpt;
use std::collections::{HashMap, HashSet};
use threadcast_db::{channels, threads, unreads, DbPool};
use threadcast_models::tracking::{
    ChannelTrackingState, LastReplyDetails, ThreadOverview, ThreadTrackingState,
};

/// Parameters of one tracking-state report.
#[derive(Debug, Clone)]
pub struct TrackingQuery {
    pub channel_ids: Vec<i64>,
    pub thread_ids: Vec<i64>,
    pub include_threads: bool,
    pub include_read: bool,
    pub include_missing_memberships: bool,
    pub include_last_reply_details: bool,
}

impl Default for TrackingQuery {
    fn default() -> Self {
        Self {
            channel_ids: Vec::new(),
            thread_ids: Vec::new(),
            include_threads: false,
            include_read: true,
            include_missing_memberships: false,
            include_last_reply_details: false,
        }
    }
}

impl TrackingQuery {
    pub fn channels(channel_ids: Vec<i64>) -> Self {
        Self {
            channel_ids,
            ..Default::default()
        }
    }

    pub fn threads(thread_ids: Vec<i64>) -> Self {
        Self {
            thread_ids,
            include_threads: true,
            ..Default::default()
        }
    }
}

/// Unread/read state for one user across channels and threads.
///
/// The report is defensive by exclusion: ids the guardian cannot see, or
/// that do not exist, are simply absent. Callers routinely pass id lists
/// from stale client state, so absence is not an error.
#[derive(Debug, Clone, Default)]
pub struct TrackingReport {
    channel_tracking: HashMap<i64, ChannelTrackingState>,
    thread_tracking: HashMap<i64, ThreadTrackingState>,
    channel_thread_overviews: HashMap<i64, Vec<ThreadOverview>>,
}

impl TrackingReport {
    pub fn find_channel(&self, channel_id: i64) -> Option<ChannelTrackingState> {
        self.channel_tracking.get(&channel_id).copied()
    }

    pub fn find_thread(&self, thread_id: i64) -> Option<ThreadTrackingState> {
        self.thread_tracking.get(&thread_id).copied()
    }

    /// Unread threads of a channel, most recent reply first. Empty when
    /// the channel has none or is absent.
    pub fn find_channel_thread_overviews(&self, channel_id: i64) -> &[ThreadOverview] {
        self.channel_thread_overviews
            .get(&channel_id)
            .map(|overviews| overviews.as_slice())
            .unwrap_or(&[])
    }

    pub async fn query(
        pool: &DbPool,
        guardian: &Guardian,
        query: TrackingQuery,
    ) -> Result<Self, CoreError> {
        let mut report = TrackingReport::default();
        let Some(user_id) = guardian.user_id else {
            return Ok(report);
        };

        let mut visible_channel_ids = Vec::new();
        for row in channels::get_channels(pool, &query.channel_ids).await? {
            let channel = row.into_channel()?;
            if guardian.can_see_channel(&channel) {
                visible_channel_ids.push(channel.id);
            }
        }

        let mut followed = HashSet::new();
        for row in unreads::channel_unreads(pool, user_id, &visible_channel_ids).await? {
            followed.insert(row.channel_id);
            report.channel_tracking.insert(
                row.channel_id,
                ChannelTrackingState {
                    unread_count: row.unread_count,
                    mention_count: row.mention_count,
                },
            );
        }
        if query.include_missing_memberships {
            // Zero-state entries let clients render "0 unread" for channels
            // they preview but have not joined.
            for channel_id in &visible_channel_ids {
                if !followed.contains(channel_id) {
                    report
                        .channel_tracking
                        .insert(*channel_id, ChannelTrackingState::default());
                }
            }
        }
        if !query.include_read {
            report
                .channel_tracking
                .retain(|_, state| state.unread_count > 0 || state.mention_count > 0);
        }

        if query.include_threads {
            let (thread_rows, visible_thread_ids) = if query.thread_ids.is_empty() {
                let rows =
                    unreads::thread_unreads_for_channels(pool, user_id, &visible_channel_ids)
                        .await?;
                (rows, Vec::new())
            } else {
                let mut visible_thread_ids = Vec::new();
                let thread_rows = threads::get_threads(pool, &query.thread_ids).await?;
                let mut channel_ids: Vec<i64> =
                    thread_rows.iter().map(|row| row.channel_id).collect();
                channel_ids.sort_unstable();
                channel_ids.dedup();
                let mut channels_by_id = HashMap::new();
                for row in channels::get_channels(pool, &channel_ids).await? {
                    let channel = row.into_channel()?;
                    channels_by_id.insert(channel.id, channel);
                }
                for row in thread_rows {
                    let thread = row.into_thread();
                    let Some(channel) = channels_by_id.get(&thread.channel_id) else {
                        continue;
                    };
                    if guardian.can_see_thread(&thread, channel) {
                        visible_thread_ids.push(thread.id);
                    }
                }
                let rows = unreads::thread_unreads(pool, user_id, &visible_thread_ids).await?;
                (rows, visible_thread_ids)
            };

            let mut tracked = HashSet::new();
            for row in &thread_rows {
                tracked.insert(row.thread_id);
                report.thread_tracking.insert(
                    row.thread_id,
                    ThreadTrackingState {
                        unread_count: row.unread_count,
                        mention_count: row.mention_count,
                    },
                );
            }
            if query.include_missing_memberships {
                for thread_id in &visible_thread_ids {
                    if !tracked.contains(thread_id) {
                        report
                            .thread_tracking
                            .insert(*thread_id, ThreadTrackingState::default());
                    }
                }
            }
            if !query.include_read {
                report
                    .thread_tracking
                    .retain(|_, state| state.unread_count > 0 || state.mention_count > 0);
            }

            let unread_thread_ids: Vec<i64> = thread_rows
                .iter()
                .filter(|row| row.unread_count > 0 || row.mention_count > 0)
                .map(|row| row.thread_id)
                .collect();
            let last_replies = threads::last_replies(pool, &unread_thread_ids).await?;
            for row in &thread_rows {
                if row.unread_count == 0 && row.mention_count == 0 {
                    continue;
                }
                let Some(last_reply) = last_replies.get(&row.thread_id) else {
                    continue;
                };
                let details = query.include_last_reply_details.then(|| LastReplyDetails {
                    id: last_reply.id,
                    author_id: last_reply.author_id,
                    author_username: last_reply.author_username.clone(),
                    created_at: last_reply.created_at,
                    excerpt: excerpt(&last_reply.content),
                });
                report
                    .channel_thread_overviews
                    .entry(row.channel_id)
                    .or_default()
                    .push(ThreadOverview {
                        thread_id: row.thread_id,
                        last_reply_id: last_reply.id,
                        last_reply: details,
                    });
            }
            for overviews in report.channel_thread_overviews.values_mut() {
                overviews.sort_by(|a, b| b.last_reply_id.cmp(&a.last_reply_id));
            }
        }

        Ok(report)
    }
}
