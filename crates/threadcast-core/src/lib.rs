pub mod bus;
pub mod error;
pub mod guardian;
pub mod publisher;
pub mod serialize;
pub mod targets;
pub mod tracking;

pub use bus::{Audience, Envelope, MessageBus};
pub use error::CoreError;
pub use guardian::Guardian;
pub use publisher::Publisher;
pub use tracking::{TrackingQuery, TrackingReport};
