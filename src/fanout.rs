//! Fanout dispatcher: pushes each logged event to every current subscriber.
//!
//! One [`FanoutDispatcher::dispatch`] call is one pass over an externally
//! cut batch of events. The dispatcher keeps no state between passes and
//! never retries; a failed pass is retried by whoever scheduled it, which
//! may deliver some payloads twice.

use crate::connections::ConnectionRegistry;
use crate::error::{CourierError, Result};
use crate::subscriptions::SubscriptionIndex;
use crate::types::{epoch_seconds, Event, Subscriber};
use futures::future::join_all;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Turns an event into the bytes pushed to one subscriber.
pub trait PayloadFormatter: Send + Sync {
    fn format(&self, event: &Event, subscriber: &Subscriber) -> Result<Vec<u8>>;
}

/// The stored serialized payload, unchanged.
#[derive(Clone, Copy, Debug, Default)]
pub struct RawPayload;

impl PayloadFormatter for RawPayload {
    fn format(&self, event: &Event, _subscriber: &Subscriber) -> Result<Vec<u8>> {
        Ok(event.payload.as_bytes().to_vec())
    }
}

/// `{"id": <operationId>, "type": "data", "payload": <payload>}`, the data
/// frame subscription clients expect.
#[derive(Clone, Copy, Debug, Default)]
pub struct DataMessage;

impl PayloadFormatter for DataMessage {
    fn format(&self, event: &Event, subscriber: &Subscriber) -> Result<Vec<u8>> {
        let payload: Value = serde_json::from_str(&event.payload)?;
        let message = json!({
            "id": subscriber.operation_id,
            "type": "data",
            "payload": payload,
        });
        Ok(serde_json::to_vec(&message)?)
    }
}

/// Outcome of one dispatch pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Events fanned out.
    pub events: usize,
    /// Sends that completed, including connections found gone and
    /// unregistered on the way.
    pub deliveries: usize,
    /// Events past their TTL, left for the reaper.
    pub skipped_expired: usize,
}

pub struct FanoutDispatcher {
    registry: Arc<ConnectionRegistry>,
    subscriptions: Arc<SubscriptionIndex>,
    formatter: Arc<dyn PayloadFormatter>,
}

impl FanoutDispatcher {
    pub fn new(registry: Arc<ConnectionRegistry>, subscriptions: Arc<SubscriptionIndex>) -> Self {
        Self {
            registry,
            subscriptions,
            formatter: Arc::new(RawPayload),
        }
    }

    pub fn with_formatter(mut self, formatter: Arc<dyn PayloadFormatter>) -> Self {
        self.formatter = formatter;
        self
    }

    pub async fn dispatch(&self, events: &[Event]) -> Result<DispatchReport> {
        self.dispatch_at(events, epoch_seconds()).await
    }

    /// Dispatch with an explicit clock, in epoch seconds.
    ///
    /// Events are handled one after another. Subscribers of one event are
    /// pushed to concurrently, a page at a time; the first error of a page
    /// is returned once every send of that page has settled.
    #[instrument(skip_all, fields(events = events.len()))]
    pub async fn dispatch_at(&self, events: &[Event], now: i64) -> Result<DispatchReport> {
        let mut report = DispatchReport::default();

        for event in events {
            if event.is_expired_at(now) {
                debug!(id = %event.id, ttl = event.ttl, "skipping expired event");
                report.skipped_expired += 1;
                continue;
            }
            report.deliveries += self.dispatch_event(event).await?;
            report.events += 1;
        }

        info!(
            events = report.events,
            deliveries = report.deliveries,
            skipped_expired = report.skipped_expired,
            "dispatch pass complete"
        );
        Ok(report)
    }

    async fn dispatch_event(&self, event: &Event) -> Result<usize> {
        let mut pages = self.subscriptions.subscribers_by_event_name(&event.event);
        let mut delivered = 0;

        while let Some(page) = pages.next_page().await? {
            let sends = page.iter().map(|subscriber| self.send_one(event, subscriber));
            let results = join_all(sends).await;

            let mut first_error: Option<CourierError> = None;
            for result in results {
                match result {
                    Ok(()) => delivered += 1,
                    Err(err) => {
                        warn!(id = %event.id, error = %err, "send failed");
                        if first_error.is_none() {
                            first_error = Some(err);
                        }
                    }
                }
            }
            if let Some(err) = first_error {
                return Err(err);
            }
        }

        debug!(id = %event.id, event = %event.event, delivered, "event fanned out");
        Ok(delivered)
    }

    async fn send_one(&self, event: &Event, subscriber: &Subscriber) -> Result<()> {
        let payload = self.formatter.format(event, subscriber)?;
        self.registry.send(&subscriber.connection, &payload).await
    }
}
