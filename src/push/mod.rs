//! Push capability: delivering bytes to a connection's transport endpoint.

#[cfg(feature = "http-push")]
mod http;

#[cfg(feature = "http-push")]
pub use http::HttpPushClient;

use async_trait::async_trait;
use thiserror::Error;

/// Failure reported by a [`PushClient`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PushError {
    /// The connection can never receive pushes again.
    #[error("connection is gone")]
    Gone,

    #[error("push failed: {0}")]
    Transient(String),
}

/// Transport-side operations the connection registry relies on.
#[async_trait]
pub trait PushClient: Send + Sync {
    async fn push(
        &self,
        endpoint: &str,
        connection_id: &str,
        payload: &[u8],
    ) -> Result<(), PushError>;

    /// Ask the transport to drop the socket. Best effort.
    async fn close(&self, endpoint: &str, connection_id: &str) -> Result<(), PushError>;
}

/// Push endpoint for a management API exposed at `domain/stage`.
pub fn endpoint_from_request(domain_name: &str, stage: &str) -> String {
    format!("{}/{}", domain_name, stage)
}
