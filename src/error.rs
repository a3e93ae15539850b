//! Error types for the registry, index, event log and their backends.

use thiserror::Error;

/// Main error type for courier operations.
#[derive(Debug, Error)]
pub enum CourierError {
    #[error("Connection {0} not found")]
    ConnectionNotFound(String),

    #[error("Invalid subscription request: {0}")]
    InvalidSubscriptionRequest(String),

    /// The push target reported the connection as permanently gone.
    #[error("Connection {0} is gone")]
    DeliveryGone(String),

    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("Store unavailable: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Malformed item in table {table}: {reason}")]
    MalformedItem { table: String, reason: String },

    #[error("Invalid store request: {0}")]
    InvalidRequest(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Invalid store format: {0}")]
    InvalidFormat(String),

    #[error("Store is locked by another process")]
    Locked,

    #[error("`{0}` is not provided in resolver context")]
    MissingContext(&'static str),

    #[error("{0} is read only")]
    ReadOnly(&'static str),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl CourierError {
    /// Whether an external scheduler may reasonably retry the failed unit of work.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CourierError::Store(_) | CourierError::Delivery(_) | CourierError::Io(_)
        )
    }
}

impl From<serde_json::Error> for CourierError {
    fn from(e: serde_json::Error) -> Self {
        CourierError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for CourierError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        CourierError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for CourierError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        CourierError::Deserialization(e.to_string())
    }
}

/// Result type for courier operations.
pub type Result<T> = std::result::Result<T, CourierError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(CourierError::Store("throttled".into()).is_transient());
        assert!(CourierError::Delivery("503".into()).is_transient());
        assert!(!CourierError::ConnectionNotFound("c1".into()).is_transient());
        assert!(!CourierError::InvalidSubscriptionRequest("x".into()).is_transient());
        assert!(!CourierError::ReadOnly("ArrayPubSub").is_transient());
    }

    #[test]
    fn test_messages() {
        let err = CourierError::ConnectionNotFound("abc".into());
        assert_eq!(err.to_string(), "Connection abc not found");

        let err = CourierError::MissingContext("connection");
        assert_eq!(err.to_string(), "`connection` is not provided in resolver context");
    }
}
