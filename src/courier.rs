//! Courier handle tying the stores, the facade and the dispatcher together.

use crate::backend::{Backend, FileBackend, MemoryBackend, Reaper};
use crate::config::{CourierConfig, FileBackendConfig};
use crate::connections::ConnectionRegistry;
use crate::error::Result;
use crate::events::EventLog;
use crate::fanout::{DispatchReport, FanoutDispatcher};
use crate::pubsub::{PubSub, PubSubEngine, ResolverContext};
use crate::push::PushClient;
use crate::subscriptions::SubscriptionIndex;
use crate::types::{Connection, EventId, OperationRequest};
use chrono::Utc;
use std::sync::Arc;
use tracing::debug;

/// Every component built over one backend and one push client.
///
/// Components are shared handles; a `Courier` holds no request state and
/// can serve any number of concurrent activations.
pub struct Courier {
    config: CourierConfig,
    backend: Arc<dyn Backend>,
    connections: Arc<ConnectionRegistry>,
    subscriptions: Arc<SubscriptionIndex>,
    events: Arc<EventLog>,
    pubsub: PubSub,
    dispatcher: FanoutDispatcher,
}

impl Courier {
    /// Build every component over `backend`. The config is validated first.
    pub fn new(
        backend: Arc<dyn Backend>,
        push: Arc<dyn PushClient>,
        config: CourierConfig,
    ) -> Result<Self> {
        config.validate()?;

        let subscriptions = Arc::new(SubscriptionIndex::new(Arc::clone(&backend), &config));
        let connections = Arc::new(ConnectionRegistry::new(
            Arc::clone(&backend),
            push,
            Arc::clone(&subscriptions),
            &config,
        ));
        let events = Arc::new(EventLog::new(Arc::clone(&backend), &config));
        let pubsub = PubSub::new(events.clone());
        let dispatcher = FanoutDispatcher::new(Arc::clone(&connections), Arc::clone(&subscriptions));

        Ok(Self {
            config,
            backend,
            connections,
            subscriptions,
            events,
            pubsub,
            dispatcher,
        })
    }

    pub fn in_memory(push: Arc<dyn PushClient>, config: CourierConfig) -> Result<Self> {
        Self::new(Arc::new(MemoryBackend::new()), push, config)
    }

    /// Open (or create) a durable data directory.
    pub fn open(
        backend: FileBackendConfig,
        push: Arc<dyn PushClient>,
        config: CourierConfig,
    ) -> Result<Self> {
        Self::new(Arc::new(FileBackend::open(backend)?), push, config)
    }

    pub fn config(&self) -> &CourierConfig {
        &self.config
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn connections(&self) -> &Arc<ConnectionRegistry> {
        &self.connections
    }

    pub fn subscriptions(&self) -> &Arc<SubscriptionIndex> {
        &self.subscriptions
    }

    pub fn events(&self) -> &Arc<EventLog> {
        &self.events
    }

    pub fn pubsub(&self) -> &PubSub {
        &self.pubsub
    }

    pub fn dispatcher(&self) -> &FanoutDispatcher {
        &self.dispatcher
    }

    /// Replace the dispatcher, e.g. to install another payload formatter.
    pub fn with_dispatcher(mut self, dispatcher: FanoutDispatcher) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    fn engine(&self) -> Arc<dyn PubSubEngine> {
        self.events.clone()
    }

    /// Context for a client establishing `operation` on `connection`.
    pub fn registration_context(
        &self,
        connection: Connection,
        operation: OperationRequest,
    ) -> ResolverContext {
        ResolverContext::registration(
            self.engine(),
            Arc::clone(&self.subscriptions),
            connection,
            operation,
        )
    }

    pub fn replay_context(&self) -> ResolverContext {
        ResolverContext::replay(self.engine())
    }

    /// One dispatcher pass over up to `limit` events logged after `after`.
    ///
    /// Only events older than `dispatchSettleMs` are dispatched; the rest of
    /// the batch waits for a later pass. Returns the report and the id to
    /// resume from. On error nothing is returned, so the caller retries the
    /// same batch.
    pub async fn dispatch_after(
        &self,
        after: Option<&EventId>,
        limit: usize,
    ) -> Result<(DispatchReport, Option<EventId>)> {
        self.dispatch_after_at(after, limit, Utc::now().timestamp_millis())
            .await
    }

    /// [`Self::dispatch_after`] with an explicit clock, in epoch milliseconds.
    ///
    /// A write still in flight when its id falls behind the settle horizon
    /// can be passed over by the cursor, so the window must exceed the
    /// slowest backend put.
    pub async fn dispatch_after_at(
        &self,
        after: Option<&EventId>,
        limit: usize,
        now_millis: i64,
    ) -> Result<(DispatchReport, Option<EventId>)> {
        let batch = self.events.events_after(after, limit).await?;
        let horizon = now_millis.saturating_sub(self.config.dispatch_settle_ms as i64);
        let settled = batch
            .iter()
            .take_while(|event| {
                event
                    .id
                    .created_at_millis()
                    .map_or(true, |created| created <= horizon)
            })
            .count();
        let batch = &batch[..settled];

        let report = self.dispatcher.dispatch(batch).await?;
        let next = batch
            .last()
            .map(|event| event.id.clone())
            .or_else(|| after.cloned());
        debug!(batch = batch.len(), "dispatch batch done");
        Ok((report, next))
    }

    /// Reaper over the events table's `ttl` attribute.
    pub fn reaper(&self) -> Reaper {
        Reaper::new(Arc::clone(&self.backend)).with_target(self.events.table().clone(), "ttl")
    }
}
