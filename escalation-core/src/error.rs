use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

/// Failures of the datastore ports.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("connection pool error: {0}")]
    Pool(String),

    #[error("could not decode row: {0}")]
    Decode(String),

    #[error("datastore unavailable: {0}")]
    Unavailable(String),
}

/// Failures of the Callback and Push channels.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("transport error: {0}")]
    Transport(String),

    /// The receiver reports the device or endpoint no longer exists.
    #[error("endpoint gone")]
    Gone,

    #[error("channel misconfigured: {0}")]
    Misconfigured(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}
