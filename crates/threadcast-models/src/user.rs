use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub created_at: DateTime<Utc>,
}

/// Author fields embedded in serialized message payloads. Deliberately
/// free of per-recipient data so one payload serves every subscriber.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageAuthor {
    pub id: i64,
    pub username: String,
}
