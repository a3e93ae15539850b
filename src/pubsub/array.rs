//! Fixed-sequence pub/sub double.

use super::{EventStream, PubSubEngine};
use crate::error::{CourierError, Result};
use crate::types::Event;
use async_trait::async_trait;
use serde_json::Value;

/// An event as recorded for replay.
#[derive(Clone, Debug, PartialEq)]
pub struct RecordedEvent {
    pub event: String,
    /// Either a JSON value or a serialized JSON string.
    pub payload: Value,
}

impl RecordedEvent {
    pub fn new(event: impl Into<String>, payload: Value) -> Self {
        Self {
            event: event.into(),
            payload,
        }
    }
}

impl From<&Event> for RecordedEvent {
    fn from(event: &Event) -> Self {
        Self {
            event: event.event.clone(),
            payload: Value::String(event.payload.clone()),
        }
    }
}

/// Read-only pub/sub already fed with every event that will ever be
/// published.
///
/// Each [`PubSubEngine::async_iterator`] call starts over from the first
/// recorded event and ends after the last one.
#[derive(Clone, Debug, Default)]
pub struct ArrayPubSub {
    events: Vec<RecordedEvent>,
}

impl ArrayPubSub {
    pub fn new(events: Vec<RecordedEvent>) -> Self {
        Self { events }
    }

    pub fn from_events(events: &[Event]) -> Self {
        Self::new(events.iter().map(RecordedEvent::from).collect())
    }

    pub async fn subscribe(&self, _names: &[String]) -> Result<()> {
        Err(CourierError::ReadOnly("ArrayPubSub"))
    }

    pub async fn unsubscribe(&self, _subscription_id: &str) -> Result<()> {
        Err(CourierError::ReadOnly("ArrayPubSub"))
    }

    fn decode(payload: &Value) -> Result<Value> {
        match payload {
            Value::String(text) => Ok(serde_json::from_str(text)
                .map_err(|e| CourierError::Deserialization(e.to_string()))?),
            other => Ok(other.clone()),
        }
    }
}

#[async_trait]
impl PubSubEngine for ArrayPubSub {
    async fn publish(&self, _event_name: &str, _payload: Value) -> Result<()> {
        Err(CourierError::ReadOnly("ArrayPubSub"))
    }

    fn async_iterator(&self, names: &[String]) -> EventStream {
        let payloads = self
            .events
            .iter()
            .filter(|recorded| names.contains(&recorded.event))
            .map(|recorded| Self::decode(&recorded.payload))
            .collect();
        EventStream::from_results(payloads)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn recorded() -> ArrayPubSub {
        ArrayPubSub::new(vec![
            RecordedEvent::new("A", json!({"x": 1})),
            RecordedEvent::new("B", json!("{\"x\":2}")),
        ])
    }

    async fn drain(mut events: EventStream) -> Vec<Value> {
        let mut out = Vec::new();
        while let Some(payload) = events.next_payload().await {
            out.push(payload.unwrap());
        }
        out
    }

    #[tokio::test]
    async fn test_filters_by_name_and_completes() {
        let pubsub = recorded();
        let payloads = drain(pubsub.async_iterator(&["A".to_string()])).await;
        assert_eq!(payloads, vec![json!({"x": 1})]);
    }

    #[tokio::test]
    async fn test_multiple_names_keep_recorded_order() {
        let pubsub = recorded();
        let payloads = drain(pubsub.async_iterator(&["B".to_string(), "A".to_string()])).await;
        assert_eq!(payloads, vec![json!({"x": 1}), json!({"x": 2})]);
    }

    #[tokio::test]
    async fn test_replays_logged_events() {
        use crate::events::{EventStore, MemoryEventStore};
        use crate::types::NewEvent;

        let store = MemoryEventStore::new();
        for (name, n) in [("A", 1), ("B", 2), ("A", 3)] {
            store
                .publish(NewEvent::json(name, &json!({"n": n})).unwrap())
                .await
                .unwrap();
        }

        let pubsub = ArrayPubSub::from_events(&store.events());
        let payloads = drain(pubsub.async_iterator(&["A".to_string()])).await;
        assert_eq!(payloads, vec![json!({"n": 1}), json!({"n": 3})]);
    }

    #[tokio::test]
    async fn test_each_call_starts_over() {
        let pubsub = recorded();
        let mut first = pubsub.async_iterator(&["A".to_string()]);
        assert!(first.next_payload().await.is_some());
        assert!(first.next_payload().await.is_none());

        let second = drain(pubsub.async_iterator(&["A".to_string()])).await;
        assert_eq!(second, vec![json!({"x": 1})]);
    }

    #[tokio::test]
    async fn test_writes_are_rejected() {
        let pubsub = recorded();
        assert!(matches!(
            pubsub.publish("A", json!({})).await,
            Err(CourierError::ReadOnly(_))
        ));
        assert!(matches!(
            pubsub.subscribe(&["A".to_string()]).await,
            Err(CourierError::ReadOnly(_))
        ));
        assert!(matches!(
            pubsub.unsubscribe("c1:op").await,
            Err(CourierError::ReadOnly(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_serialized_payload_surfaces_as_error() {
        let pubsub = ArrayPubSub::new(vec![RecordedEvent::new("A", json!("not json"))]);
        let mut events = pubsub.async_iterator(&["A".to_string()]);
        assert!(matches!(
            events.next_payload().await,
            Some(Err(CourierError::Deserialization(_)))
        ));
    }
}
