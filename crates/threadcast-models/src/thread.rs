use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    pub id: i64,
    pub channel_id: i64,
    pub original_message_id: i64,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
}
