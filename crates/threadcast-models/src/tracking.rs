use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per (user, channel) unread state. A projection of message existence
/// against the membership's last-read pointer, never stored counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelTrackingState {
    pub unread_count: i64,
    pub mention_count: i64,
}

/// Per (user, channel, thread) unread state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadTrackingState {
    pub unread_count: i64,
    pub mention_count: i64,
}

/// Summary of the most recent reply in a thread, for preview rendering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastReplyDetails {
    pub id: i64,
    pub author_id: i64,
    pub author_username: String,
    pub created_at: DateTime<Utc>,
    pub excerpt: String,
}

/// One entry of a channel's unread-thread overview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadOverview {
    pub thread_id: i64,
    pub last_reply_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_reply: Option<LastReplyDetails>,
}
