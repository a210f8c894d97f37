//! Error types for the datastore
//!
//! One variant per failure class a host can observe. Guard failures
//! (`Validation`, `NotSupported`) are raised before any I/O; store failures
//! carry the driver's message unmodified.

/// Main error type for datastore operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Handler error: {0}")]
    Handler(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Sink error: {0}")]
    Sink(String),
}

impl StoreError {
    /// HTTP status a host should answer with for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::Validation(_) => 400,
            Self::NotSupported(_) => 501,
            Self::Connection(_) => 503,
            Self::Database(_) => 503,
            Self::Stream(_) => 500,
            Self::Handler(_) => 500,
            Self::Serialization(_) => 400,
            Self::Sink(_) => 500,
        }
    }

    /// True for the guard failures that are raised before touching the store
    pub fn is_guard(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::NotSupported(_))
    }
}

impl From<mongodb::error::Error> for StoreError {
    fn from(err: mongodb::error::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<bson::ser::Error> for StoreError {
    fn from(err: bson::ser::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<bson::de::Error> for StoreError {
    fn from(err: bson::de::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(format!("JSON error: {}", err))
    }
}

/// Result type alias for datastore operations
pub type Result<T> = std::result::Result<T, StoreError>;
