//! Durable event log over a [`Backend`] table keyed by event id.

use super::EventStore;
use crate::backend::{from_item, to_item, Backend, Key, ScanFilter, TableSpec};
use crate::config::CourierConfig;
use crate::error::Result;
use crate::types::{compute_ttl, Event, EventId, NewEvent};
use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Unbounded stream of logged events.
pub type EventTail = BoxStream<'static, Result<Event>>;

/// Where a tail starts reading.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TailFrom {
    /// Oldest retained event.
    Beginning,
    /// Only events logged after the tail was created.
    Now,
    /// Events strictly after the given id.
    After(EventId),
}

/// Append-only store of published events.
///
/// Ids are time-sortable, so key order is publication order. Rows carry a
/// `ttl` deadline and are removed by the backend's reaper, never by this
/// type.
pub struct EventLog {
    backend: Arc<dyn Backend>,
    table: TableSpec,
    ttl_seconds: u64,
    page_size: usize,
    poll_interval: Duration,
}

impl EventLog {
    pub fn new(backend: Arc<dyn Backend>, config: &CourierConfig) -> Self {
        Self {
            backend,
            table: TableSpec::new(config.events_table.clone(), "id"),
            ttl_seconds: config.ttl_seconds,
            page_size: config.query_page_size,
            poll_interval: config.tail_poll_interval(),
        }
    }

    pub fn table(&self) -> &TableSpec {
        &self.table
    }

    pub async fn get(&self, id: &EventId) -> Result<Option<Event>> {
        match self.backend.get(&self.table, &Key::new(id.as_str())).await? {
            Some(item) => Ok(Some(from_item(&self.table, item)?)),
            None => Ok(None),
        }
    }

    /// Next `limit` events after `after`, in publication order.
    ///
    /// Schedulers use this to cut dispatcher batches.
    pub async fn events_after(&self, after: Option<&EventId>, limit: usize) -> Result<Vec<Event>> {
        let start = after.map(|id| Key::new(id.as_str()));
        let page = self
            .backend
            .scan(&self.table, &ScanFilter::All, limit, start.as_ref())
            .await?;
        page.items
            .into_iter()
            .map(|item| from_item(&self.table, item))
            .collect()
    }

    /// Follow the log for events named in `names`.
    ///
    /// The tail never ends: once caught up it polls again every
    /// `tailPollMs`. Events are read in id order, so an event whose write
    /// became visible after a later id was already read is not returned.
    pub fn tail(&self, names: &[String], from: TailFrom) -> EventTail {
        let cursor = match from {
            TailFrom::Beginning => None,
            TailFrom::Now => Some(Key::new(EventId::generate().as_str())),
            TailFrom::After(id) => Some(Key::new(id.as_str())),
        };

        let state = TailState {
            backend: Arc::clone(&self.backend),
            table: self.table.clone(),
            filter: ScanFilter::AnyOf {
                attribute: "event".to_string(),
                values: names.to_vec(),
            },
            cursor,
            buffer: VecDeque::new(),
            page_size: self.page_size,
            poll_interval: self.poll_interval,
        };

        Box::pin(stream::unfold(state, |mut state| async move {
            let next = state.next_event().await;
            Some((next, state))
        }))
    }
}

#[async_trait]
impl EventStore for EventLog {
    async fn publish(&self, event: NewEvent) -> Result<Event> {
        let event = Event {
            id: EventId::generate(),
            event: event.event,
            payload: event.payload,
            ttl: compute_ttl(self.ttl_seconds),
        };
        self.backend.put(&self.table, to_item(&event)?).await?;
        debug!(id = %event.id, event = %event.event, "event logged");
        Ok(event)
    }
}

struct TailState {
    backend: Arc<dyn Backend>,
    table: TableSpec,
    filter: ScanFilter,
    cursor: Option<Key>,
    buffer: VecDeque<Event>,
    page_size: usize,
    poll_interval: Duration,
}

impl TailState {
    async fn next_event(&mut self) -> Result<Event> {
        loop {
            if let Some(event) = self.buffer.pop_front() {
                return Ok(event);
            }

            let page = self
                .backend
                .scan(&self.table, &self.filter, self.page_size, self.cursor.as_ref())
                .await?;

            let caught_up = page.cursor.is_none();
            let mut last_matched = None;
            for item in page.items {
                let event: Event = from_item(&self.table, item)?;
                last_matched = Some(Key::new(event.id.as_str()));
                self.buffer.push_back(event);
            }

            // Unmatched rows after the last match are evaluated again on the
            // next poll, which is harmless.
            if let Some(next) = page.cursor.or(last_matched) {
                self.cursor = Some(next);
            }

            if caught_up && self.buffer.is_empty() {
                tokio::time::sleep(self.poll_interval).await;
            }
        }
    }
}
