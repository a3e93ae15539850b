//! Pub/sub facade used by resolvers.
//!
//! Publishing only appends to an [`EventStore`]; delivery happens later in
//! the [`crate::fanout`] dispatcher. Subscribing persists a subscriber when
//! the client is registering and hands back an [`EventStream`] from the
//! configured [`PubSubEngine`].

mod array;
mod stream;

pub use array::{ArrayPubSub, RecordedEvent};
pub use stream::{with_filter, EventStream};

use crate::error::{CourierError, Result};
use crate::events::{EventLog, EventStore, TailFrom};
use crate::subscriptions::SubscriptionIndex;
use crate::types::{Connection, Event, NewEvent, OperationRequest};
use async_trait::async_trait;
use futures::StreamExt;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Source of event streams for resolvers.
#[async_trait]
pub trait PubSubEngine: Send + Sync {
    async fn publish(&self, event_name: &str, payload: Value) -> Result<()>;

    /// Payloads of events named in `names`, in publication order.
    fn async_iterator(&self, names: &[String]) -> EventStream;
}

#[async_trait]
impl PubSubEngine for EventLog {
    async fn publish(&self, event_name: &str, payload: Value) -> Result<()> {
        EventStore::publish(self, NewEvent::json(event_name, &payload)?).await?;
        Ok(())
    }

    /// Live tail: only events logged after this call are yielded.
    fn async_iterator(&self, names: &[String]) -> EventStream {
        let tail = self.tail(names, TailFrom::Now);
        EventStream::new(tail.map(|event| event.and_then(|event| event.payload_value())))
    }
}

/// Producer-side handle.
#[derive(Clone)]
pub struct PubSub {
    event_store: Arc<dyn EventStore>,
}

impl PubSub {
    pub fn new(event_store: Arc<dyn EventStore>) -> Self {
        Self { event_store }
    }

    /// Serialize `payload` and append it to the event store.
    ///
    /// Success means the event is durable; it says nothing about delivery.
    #[instrument(skip(self, payload))]
    pub async fn publish(&self, event_name: &str, payload: &impl Serialize) -> Result<Event> {
        if event_name.is_empty() {
            return Err(CourierError::InvalidSubscriptionRequest(
                "Event name must be nonempty string".into(),
            ));
        }
        let event = self
            .event_store
            .publish(NewEvent::json(event_name, payload)?)
            .await?;
        debug!(id = %event.id, "published");
        Ok(event)
    }

    /// Like [`PubSub::publish`], for event names arriving as untyped JSON.
    /// Anything but a non-empty string is rejected.
    pub async fn publish_json(&self, event_name: &Value, payload: &Value) -> Result<Event> {
        match event_name {
            Value::String(name) => self.publish(name, payload).await,
            other => Err(CourierError::InvalidSubscriptionRequest(format!(
                "Event name must be nonempty string, got {}",
                other
            ))),
        }
    }

    pub fn subscribe<I, S>(&self, names: I) -> SubscribeResolver
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        SubscribeResolver {
            names: names.into_iter().map(Into::into).collect(),
        }
    }
}

/// Per-request state a subscription resolver runs with.
#[derive(Clone)]
pub struct ResolverContext {
    pub engine: Arc<dyn PubSubEngine>,
    pub subscriptions: Option<Arc<SubscriptionIndex>>,
    pub connection: Option<Connection>,
    pub operation: Option<OperationRequest>,
    /// Set while the client is establishing the subscription.
    pub register_subscriptions: bool,
}

impl ResolverContext {
    pub fn registration(
        engine: Arc<dyn PubSubEngine>,
        subscriptions: Arc<SubscriptionIndex>,
        connection: Connection,
        operation: OperationRequest,
    ) -> Self {
        Self {
            engine,
            subscriptions: Some(subscriptions),
            connection: Some(connection),
            operation: Some(operation),
            register_subscriptions: true,
        }
    }

    /// Context for re-running a resolver over events without registering.
    pub fn replay(engine: Arc<dyn PubSubEngine>) -> Self {
        Self {
            engine,
            subscriptions: None,
            connection: None,
            operation: None,
            register_subscriptions: false,
        }
    }
}

/// Resolver returned by [`PubSub::subscribe`].
#[derive(Clone, Debug)]
pub struct SubscribeResolver {
    names: Vec<String>,
}

impl SubscribeResolver {
    pub fn event_names(&self) -> &[String] {
        &self.names
    }

    pub async fn resolve(&self, ctx: &ResolverContext) -> Result<EventStream> {
        if ctx.register_subscriptions {
            let connection = ctx
                .connection
                .as_ref()
                .ok_or(CourierError::MissingContext("connection"))?;
            let operation = ctx
                .operation
                .as_ref()
                .ok_or(CourierError::MissingContext("operation"))?;
            let subscriptions = ctx
                .subscriptions
                .as_ref()
                .ok_or(CourierError::MissingContext("subscriptions"))?;

            subscriptions
                .subscribe(&self.names, connection, operation)
                .await?;
        }
        Ok(ctx.engine.async_iterator(&self.names))
    }
}
