use threadcast_models::channel::Channel;
use threadcast_models::thread::Thread;

/// Capability check consumed by the tracking aggregator and per-recipient
/// serialization. Authentication itself happens upstream; a guardian only
/// carries the resolved user and its group ids.
#[derive(Debug, Clone, Default)]
pub struct Guardian {
    pub user_id: Option<i64>,
    pub group_ids: Vec<i64>,
}

impl Guardian {
    pub fn new(user_id: i64, group_ids: Vec<i64>) -> Self {
        Self {
            user_id: Some(user_id),
            group_ids,
        }
    }

    /// Guardian with no user. Serializing with it guarantees the payload
    /// carries no recipient-relative data.
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn can_see_channel(&self, channel: &Channel) -> bool {
        if channel.is_direct_message() {
            return match self.user_id {
                Some(user_id) => channel.allowed_user_ids.contains(&user_id),
                None => false,
            };
        }
        if channel.allowed_group_ids.is_empty() && channel.allowed_user_ids.is_empty() {
            return true;
        }
        if self
            .group_ids
            .iter()
            .any(|group| channel.allowed_group_ids.contains(group))
        {
            return true;
        }
        match self.user_id {
            Some(user_id) => channel.allowed_user_ids.contains(&user_id),
            None => false,
        }
    }

    pub fn can_see_thread(&self, thread: &Thread, channel: &Channel) -> bool {
        thread.channel_id == channel.id && self.can_see_channel(channel)
    }
}
