use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i16)]
pub enum ChannelType {
    Category = 0,
    DirectMessage = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum ChannelStatus {
    Open = 0,
    Closed = 1,
    Archived = 2,
}

impl ChannelStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
            Self::Archived => "archived",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub id: i64,
    pub channel_type: ChannelType,
    pub name: Option<String>,
    pub description: Option<String>,
    pub slug: Option<String>,
    pub status: ChannelStatus,
    pub threading_enabled: bool,
    /// Users allowed to subscribe to this channel's topics. Empty for
    /// group-scoped channels.
    pub allowed_user_ids: Vec<i64>,
    /// Groups allowed to subscribe. Empty for direct-message channels.
    pub allowed_group_ids: Vec<i64>,
    /// Sequence id of the last publish to the channel's root topic.
    pub last_bus_sequence: i64,
    pub user_count: i32,
    pub created_at: DateTime<Utc>,
}

impl Channel {
    pub fn is_direct_message(&self) -> bool {
        self.channel_type == ChannelType::DirectMessage
    }
}
