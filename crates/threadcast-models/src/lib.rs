pub mod channel;
pub mod event;
pub mod message;
pub mod thread;
pub mod tracking;
pub mod user;

/// Built-in staff group id, used for moderator-scoped publishes.
pub const STAFF_GROUP_ID: i64 = 3;
