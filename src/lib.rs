//! # Courier
//!
//! Durable publish/subscribe and connection registry for clients attached
//! through managed push connections. No long-lived process keeps
//! subscription state in memory; everything lives in a [`Backend`].
//!
//! ## Core Concepts
//!
//! - **Connections**: one record per live client channel, hydrated per request
//! - **Subscriptions**: `(event name, subscription id)` rows plus a reverse
//!   index, written and removed together
//! - **Events**: append-only log with time-sortable ids and a TTL
//! - **Fanout**: pages through subscribers of each logged event and pushes
//!   the payload to their connections
//!
//! ## Example
//!
//! ```ignore
//! use courier::{ConnectInfo, Courier, CourierConfig, HttpPushClient, OperationRequest};
//!
//! let courier = Courier::in_memory(Arc::new(HttpPushClient::new()?), CourierConfig::default())?;
//!
//! // On connect
//! let connection = courier
//!     .connections()
//!     .register(ConnectInfo::new("abc", "example.com/dev"))
//!     .await?;
//!
//! // While resolving a subscription
//! let ctx = courier.registration_context(connection, OperationRequest::new("1"));
//! let stream = courier.pubsub().subscribe(["messageAdded"]).resolve(&ctx).await?;
//!
//! // Anywhere
//! courier.pubsub().publish("messageAdded", &json!({"text": "hi"})).await?;
//!
//! // In the dispatcher activation
//! let (report, cursor) = courier.dispatch_after(None, 100).await?;
//! ```

pub mod backend;
pub mod config;
pub mod connections;
pub mod courier;
pub mod error;
pub mod events;
pub mod fanout;
pub mod pubsub;
pub mod push;
pub mod subscriptions;
pub mod types;

// Re-exports
pub use backend::{Backend, FileBackend, MemoryBackend, Reaper};
pub use config::{CourierConfig, FileBackendConfig, HydrateOptions};
pub use connections::ConnectionRegistry;
pub use courier::Courier;
pub use error::{CourierError, Result};
pub use events::{EventLog, EventStore, EventTail, MemoryEventStore, TailFrom};
pub use fanout::{DataMessage, DispatchReport, FanoutDispatcher, PayloadFormatter, RawPayload};
pub use pubsub::{
    with_filter, ArrayPubSub, EventStream, PubSub, PubSubEngine, RecordedEvent, ResolverContext,
    SubscribeResolver,
};
#[cfg(feature = "http-push")]
pub use push::HttpPushClient;
pub use push::{endpoint_from_request, PushClient, PushError};
pub use subscriptions::{SubscriberPages, SubscriptionIndex, SUBSCRIPTION_ID_SEPARATOR};
pub use types::*;
