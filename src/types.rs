//! Core records persisted by the registry, index and event log.

use crate::error::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

/// Arbitrary key/value bag attached to a connection.
pub type Context = Map<String, Value>;

/// Time-sortable unique identifier of a logged event.
///
/// Backed by a UUIDv7 rendered as lowercase hex, so lexicographic order of
/// the string follows creation time.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(String);

impl EventId {
    pub fn generate() -> Self {
        EventId(Uuid::now_v7().to_string())
    }

    pub fn from_raw(s: impl Into<String>) -> Self {
        EventId(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Creation time in epoch milliseconds, read back from the UUIDv7.
    /// `None` for ids that are not time-based.
    pub fn created_at_millis(&self) -> Option<i64> {
        let (secs, nanos) = Uuid::parse_str(&self.0).ok()?.get_timestamp()?.to_unix();
        Some(secs as i64 * 1000 + i64::from(nanos / 1_000_000))
    }
}

impl fmt::Debug for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventId({})", self.0)
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Seconds since Unix epoch.
pub fn epoch_seconds() -> i64 {
    Utc::now().timestamp()
}

/// Expiry deadline `ttl_seconds` from now, rounded to whole seconds.
pub fn compute_ttl(ttl_seconds: u64) -> i64 {
    let now = Utc::now().timestamp_millis() as f64 / 1000.0;
    (now + ttl_seconds as f64).round() as i64
}

/// What the transport layer knows about a freshly opened connection.
#[derive(Clone, Debug)]
pub struct ConnectInfo {
    pub connection_id: String,
    pub endpoint: String,
}

impl ConnectInfo {
    pub fn new(connection_id: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            connection_id: connection_id.into(),
            endpoint: endpoint.into(),
        }
    }
}

/// Mutable state of a connection, always replaced as a whole.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionData {
    /// Push address of the transport endpoint.
    pub endpoint: String,
    #[serde(default)]
    pub context: Context,
    #[serde(default)]
    pub is_initialized: bool,
}

/// One client's live channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub id: String,
    pub data: ConnectionData,
    #[serde(default)]
    pub created_at: String,
}

/// Already-parsed operation the client subscribed with.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationRequest {
    pub operation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variables: Option<Value>,
}

impl OperationRequest {
    pub fn new(operation_id: impl Into<String>) -> Self {
        Self {
            operation_id: operation_id.into(),
            ..Default::default()
        }
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }
}

/// A client operation's registered interest in one event stream.
///
/// Carries a snapshot of the connection so fanout never reads the
/// connections table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscriber {
    pub event: String,
    pub subscription_id: String,
    pub connection: Connection,
    pub operation: OperationRequest,
    pub operation_id: String,
}

/// Reverse-index row: subscription id to event name.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionOperation {
    pub subscription_id: String,
    pub event: String,
}

/// A logged event. Immutable once written.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub event: String,
    /// Serialized JSON payload.
    pub payload: String,
    /// Expiry deadline in epoch seconds.
    pub ttl: i64,
}

impl Event {
    pub fn payload_value(&self) -> Result<Value> {
        Ok(serde_json::from_str(&self.payload)?)
    }

    pub fn is_expired_at(&self, now: i64) -> bool {
        self.ttl < now
    }
}

/// Input for publishing an event (before id and ttl are assigned).
#[derive(Clone, Debug, PartialEq)]
pub struct NewEvent {
    pub event: String,
    pub payload: String,
}

impl NewEvent {
    /// Create an event input with a JSON-serialized payload.
    pub fn json(event: impl Into<String>, payload: &impl Serialize) -> Result<Self> {
        Ok(Self {
            event: event.into(),
            payload: serde_json::to_string(payload)?,
        })
    }
}
