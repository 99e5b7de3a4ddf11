use threadcast_models::channel::Channel;
use threadcast_models::message::Message;

pub fn root_topic(channel_id: i64) -> String {
    format!("/chat/{channel_id}")
}

pub fn thread_topic(channel_id: i64, thread_id: i64) -> String {
    format!("{}/thread/{thread_id}", root_topic(channel_id))
}

pub fn new_messages_topic(channel_id: i64) -> String {
    format!("{}/new-messages", root_topic(channel_id))
}

pub fn new_mentions_topic(channel_id: i64) -> String {
    format!("{}/new-mentions", root_topic(channel_id))
}

pub fn kick_topic(channel_id: i64) -> String {
    format!("{}/kick", root_topic(channel_id))
}

pub fn user_tracking_topic(user_id: i64) -> String {
    format!("/chat/user-tracking-state/{user_id}")
}

pub fn bulk_user_tracking_topic(user_id: i64) -> String {
    format!("/chat/bulk-user-tracking-state/{user_id}")
}

pub const NEW_CHANNEL_TOPIC: &str = "/chat/new-channel";
pub const CHANNEL_EDITS_TOPIC: &str = "/chat/channel-edits";
pub const CHANNEL_STATUS_TOPIC: &str = "/chat/channel-status";
pub const CHANNEL_METADATA_TOPIC: &str = "/chat/channel-metadata";
pub const CHANNEL_ARCHIVE_STATUS_TOPIC: &str = "/chat/channel-archive-status";

/// Topics a message event must reach. Pure over its inputs.
///
/// With threading disabled every event lands on the root topic, whatever
/// the message's thread fields claim. A thread's original message reaches
/// both root and thread listeners. `staged_thread_id` lets an optimistic
/// client placeholder receive the event before the real thread id exists.
pub fn resolve_publish_targets(
    channel: &Channel,
    message: &Message,
    staged_thread_id: Option<i64>,
) -> Vec<String> {
    if !channel.threading_enabled {
        return vec![root_topic(channel.id)];
    }

    match message.thread_id {
        Some(thread_id) if message.is_thread_original() => {
            vec![
                root_topic(channel.id),
                thread_topic(channel.id, thread_id),
            ]
        }
        Some(thread_id) => {
            let mut targets = vec![thread_topic(channel.id, thread_id)];
            if let Some(staged_id) = staged_thread_id {
                if staged_id != thread_id {
                    targets.push(thread_topic(channel.id, staged_id));
                }
            }
            targets
        }
        None => match staged_thread_id {
            Some(staged_id) => vec![thread_topic(channel.id, staged_id)],
            None => vec![root_topic(channel.id)],
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use threadcast_models::channel::{ChannelStatus, ChannelType};

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 10, 12, 0, 0).unwrap()
    }

    fn channel(threading_enabled: bool) -> Channel {
        Channel {
            id: 4,
            channel_type: ChannelType::Category,
            name: Some("general".to_string()),
            description: None,
            slug: None,
            status: ChannelStatus::Open,
            threading_enabled,
            allowed_user_ids: vec![],
            allowed_group_ids: vec![],
            last_bus_sequence: 0,
            user_count: 0,
            created_at: ts(),
        }
    }

    fn message(thread_id: Option<i64>, thread_original_message_id: Option<i64>) -> Message {
        Message {
            id: 1000,
            channel_id: 4,
            author_id: 1,
            thread_id,
            thread_original_message_id,
            content: "hello".to_string(),
            cooked: "hello".to_string(),
            created_at: ts(),
            edited_at: None,
            deleted_at: None,
            deleted_by_id: None,
        }
    }

    #[test]
    fn threading_disabled_always_resolves_to_root() {
        let channel = channel(false);
        // Even a reply-shaped message stays on the root topic.
        let reply = message(Some(77), Some(900));
        assert_eq!(
            resolve_publish_targets(&channel, &reply, Some(88)),
            vec!["/chat/4".to_string()]
        );
    }

    #[test]
    fn thread_original_message_reaches_root_then_thread() {
        let channel = channel(true);
        let original = message(Some(77), Some(1000));
        assert_eq!(
            resolve_publish_targets(&channel, &original, None),
            vec!["/chat/4".to_string(), "/chat/4/thread/77".to_string()]
        );
    }

    #[test]
    fn thread_reply_resolves_to_thread_only() {
        let channel = channel(true);
        let reply = message(Some(77), Some(900));
        assert_eq!(
            resolve_publish_targets(&channel, &reply, None),
            vec!["/chat/4/thread/77".to_string()]
        );
    }

    #[test]
    fn staged_thread_hint_adds_placeholder_topic() {
        let channel = channel(true);
        let reply = message(Some(77), Some(900));
        assert_eq!(
            resolve_publish_targets(&channel, &reply, Some(88)),
            vec![
                "/chat/4/thread/77".to_string(),
                "/chat/4/thread/88".to_string()
            ]
        );
        // A hint equal to the real id is not duplicated.
        assert_eq!(
            resolve_publish_targets(&channel, &reply, Some(77)),
            vec!["/chat/4/thread/77".to_string()]
        );
    }

    #[test]
    fn staged_hint_without_persisted_thread_targets_the_placeholder() {
        let channel = channel(true);
        let unthreaded = message(None, None);
        assert_eq!(
            resolve_publish_targets(&channel, &unthreaded, Some(88)),
            vec!["/chat/4/thread/88".to_string()]
        );
    }

    #[test]
    fn plain_channel_message_resolves_to_root() {
        let channel = channel(true);
        let plain = message(None, None);
        assert_eq!(
            resolve_publish_targets(&channel, &plain, None),
            vec!["/chat/4".to_string()]
        );
    }
}
