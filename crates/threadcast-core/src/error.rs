use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("not implemented: {0}")]
    Unimplemented(&'static str),
    #[error("tracking state query failed: {context}")]
    TrackingFailed { context: String },
    #[error("invariant violated: {0}")]
    Invariant(String),
    #[error("database error: {0}")]
    Database(#[from] threadcast_db::DbError),
}
