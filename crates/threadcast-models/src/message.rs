use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub channel_id: i64,
    pub author_id: i64,
    pub thread_id: Option<i64>,
    /// Id of the original message of the thread this message belongs to,
    /// when `thread_id` is set.
    pub thread_original_message_id: Option<i64>,
    pub content: String,
    /// Rendered message body, produced upstream by the cooking pipeline.
    pub cooked: String,
    pub created_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_by_id: Option<i64>,
}

impl Message {
    /// The message that opened its thread. Visible on both the channel
    /// timeline and the thread.
    pub fn is_thread_original(&self) -> bool {
        self.thread_id.is_some() && self.thread_original_message_id == Some(self.id)
    }

    /// A reply inside a thread, not the thread's original message.
    pub fn is_thread_reply(&self) -> bool {
        self.thread_id.is_some() && !self.is_thread_original()
    }
}
