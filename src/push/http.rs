//! HTTP management-API push client.
//!
//! `POST {endpoint}/@connections/{id}` delivers a payload and
//! `DELETE {endpoint}/@connections/{id}` drops the socket. A `410 Gone`
//! response marks the connection as permanently gone.

use super::{PushClient, PushError};
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use std::time::Duration;
use tracing::debug;

pub struct HttpPushClient {
    client: Client,
}

impl HttpPushClient {
    pub fn new() -> Result<Self, PushError> {
        Self::with_timeout(Duration::from_secs(10))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, PushError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PushError::Transient(e.to_string()))?;
        Ok(Self { client })
    }

    /// `{endpoint}/@connections/{id}`, with the id percent-encoded as a
    /// single path segment. Endpoints without a scheme default to https.
    fn connection_url(endpoint: &str, connection_id: &str) -> Result<Url, PushError> {
        let base = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            endpoint.to_string()
        } else {
            format!("https://{}", endpoint)
        };
        let mut url = Url::parse(&base)
            .map_err(|e| PushError::Transient(format!("invalid endpoint {}: {}", endpoint, e)))?;
        url.path_segments_mut()
            .map_err(|_| PushError::Transient(format!("invalid endpoint {}", endpoint)))?
            .pop_if_empty()
            .push("@connections")
            .push(connection_id);
        Ok(url)
    }

    fn check(status: StatusCode) -> Result<(), PushError> {
        if status.is_success() {
            Ok(())
        } else if status == StatusCode::GONE {
            Err(PushError::Gone)
        } else {
            Err(PushError::Transient(format!("unexpected status {}", status)))
        }
    }
}

#[async_trait]
impl PushClient for HttpPushClient {
    async fn push(
        &self,
        endpoint: &str,
        connection_id: &str,
        payload: &[u8],
    ) -> Result<(), PushError> {
        let url = Self::connection_url(endpoint, connection_id)?;
        let response = self
            .client
            .post(url)
            .body(payload.to_vec())
            .send()
            .await
            .map_err(|e| PushError::Transient(e.to_string()))?;
        debug!(connection_id, status = %response.status(), "push");
        Self::check(response.status())
    }

    async fn close(&self, endpoint: &str, connection_id: &str) -> Result<(), PushError> {
        let url = Self::connection_url(endpoint, connection_id)?;
        let response = self
            .client
            .delete(url)
            .send()
            .await
            .map_err(|e| PushError::Transient(e.to_string()))?;
        Self::check(response.status())
    }
}
