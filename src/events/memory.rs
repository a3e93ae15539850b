//! In-process event store.

use super::EventStore;
use crate::error::Result;
use crate::types::{compute_ttl, Event, EventId, NewEvent};
use async_trait::async_trait;
use parking_lot::Mutex;

/// Keeps published events in a `Vec`. Nothing is ever delivered; useful
/// for asserting what a resolver published, or feeding an
/// [`crate::ArrayPubSub`].
pub struct MemoryEventStore {
    ttl_seconds: u64,
    events: Mutex<Vec<Event>>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::with_ttl(7200)
    }

    pub fn with_ttl(ttl_seconds: u64) -> Self {
        Self {
            ttl_seconds,
            events: Mutex::new(Vec::new()),
        }
    }

    /// Everything published so far, oldest first.
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl Default for MemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn publish(&self, event: NewEvent) -> Result<Event> {
        let event = Event {
            id: EventId::generate(),
            event: event.event,
            payload: event.payload,
            ttl: compute_ttl(self.ttl_seconds),
        };
        self.events.lock().push(event.clone());
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_records_in_order() {
        let store = MemoryEventStore::new();
        assert!(store.is_empty());

        store.publish(NewEvent::json("A", &json!(1)).unwrap()).await.unwrap();
        store.publish(NewEvent::json("B", &json!(2)).unwrap()).await.unwrap();

        let events = store.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event, "A");
        assert_eq!(events[1].payload, "2");
        assert!(events[0].id < events[1].id);
    }
}
