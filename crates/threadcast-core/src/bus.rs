use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Delivery filter carried next to a payload, never inside it. `None` on
/// both axes means unrestricted delivery.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Audience {
    pub user_ids: Option<Vec<i64>>,
    pub group_ids: Option<Vec<i64>>,
}

impl Audience {
    pub fn everyone() -> Self {
        Self::default()
    }

    pub fn users(user_ids: Vec<i64>) -> Self {
        Self {
            user_ids: Some(user_ids),
            group_ids: None,
        }
    }

    pub fn groups(group_ids: Vec<i64>) -> Self {
        Self {
            user_ids: None,
            group_ids: Some(group_ids),
        }
    }

    /// A subscriber receives the envelope when no filter is set, or when
    /// it matches either the user list or one of its groups.
    pub fn should_receive(&self, user_id: i64, user_group_ids: &[i64]) -> bool {
        if self.user_ids.is_none() && self.group_ids.is_none() {
            return true;
        }
        if let Some(ids) = &self.user_ids {
            if ids.contains(&user_id) {
                return true;
            }
        }
        if let Some(ids) = &self.group_ids {
            if ids.iter().any(|group| user_group_ids.contains(group)) {
                return true;
            }
        }
        false
    }
}

#[derive(Debug, Clone)]
pub struct Envelope {
    pub topic: String,
    /// Bus-assigned, monotonically increasing per topic. Consumers detect
    /// gaps by comparing against the last sequence they saw.
    pub sequence: u64,
    pub payload: serde_json::Value,
    pub audience: Audience,
}

/// Broadcast-based pub/sub bus with string topics.
///
/// Publishing is fire-and-forget: delivery to a topic with no subscribers
/// is not an error, and nothing is retried. Per-topic FIFO order is
/// guaranteed; nothing is guaranteed across topics.
#[derive(Clone)]
pub struct MessageBus {
    sender: broadcast::Sender<Envelope>,
    sequences: Arc<DashMap<String, u64>>,
}

impl MessageBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            sequences: Arc::new(DashMap::new()),
        }
    }

    /// Publishes one payload to one topic and returns its sequence id.
    pub fn publish(
        &self,
        topic: &str,
        payload: serde_json::Value,
        audience: Audience,
    ) -> u64 {
        // The entry guard is held across the send so sequence order and
        // send order cannot diverge for a topic.
        let mut entry = self.sequences.entry(topic.to_string()).or_insert(0);
        *entry += 1;
        let sequence = *entry;
        // Ignore error if no receivers
        let _ = self.sender.send(Envelope {
            topic: topic.to_string(),
            sequence,
            payload,
            audience,
        });
        sequence
    }

    pub fn last_sequence(&self, topic: &str) -> u64 {
        self.sequences.get(topic).map(|entry| *entry).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.sender.subscribe()
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new(4096)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sequences_are_monotonic_per_topic() {
        let bus = MessageBus::default();
        assert_eq!(bus.publish("/chat/1", json!({}), Audience::everyone()), 1);
        assert_eq!(bus.publish("/chat/1", json!({}), Audience::everyone()), 2);
        assert_eq!(bus.publish("/chat/2", json!({}), Audience::everyone()), 1);
        assert_eq!(bus.last_sequence("/chat/1"), 2);
        assert_eq!(bus.last_sequence("/chat/2"), 1);
        assert_eq!(bus.last_sequence("/chat/3"), 0);
    }

    #[test]
    fn publish_without_subscribers_is_not_an_error() {
        let bus = MessageBus::default();
        assert_eq!(bus.publish("/chat/1", json!({"x": 1}), Audience::everyone()), 1);
    }

    #[tokio::test]
    async fn subscribers_see_envelopes_in_publish_order() {
        let bus = MessageBus::default();
        let mut rx = bus.subscribe();
        bus.publish("/chat/1", json!({"n": 1}), Audience::everyone());
        bus.publish("/chat/1", json!({"n": 2}), Audience::everyone());

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.sequence, 1);
        assert_eq!(second.sequence, 2);
        assert_eq!(second.payload["n"], 2);
    }

    #[test]
    fn audience_filters_users_and_groups() {
        let everyone = Audience::everyone();
        assert!(everyone.should_receive(1, &[]));

        let users = Audience::users(vec![1, 2]);
        assert!(users.should_receive(1, &[]));
        assert!(!users.should_receive(3, &[99]));

        let groups = Audience::groups(vec![10]);
        assert!(groups.should_receive(3, &[10, 11]));
        assert!(!groups.should_receive(3, &[11]));

        let both = Audience {
            user_ids: Some(vec![5]),
            group_ids: Some(vec![10]),
        };
        assert!(both.should_receive(5, &[]));
        assert!(both.should_receive(6, &[10]));
        assert!(!both.should_receive(6, &[]));
    }
}
