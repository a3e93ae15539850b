//! Single-pass event stream handed to resolvers.

use crate::error::Result;
use futures::future;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use serde_json::Value;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Payloads of matching events, in order. Not restartable: once an item
/// is taken it is gone, and some streams never end.
pub struct EventStream {
    inner: BoxStream<'static, Result<Value>>,
}

impl EventStream {
    pub fn new(inner: impl Stream<Item = Result<Value>> + Send + 'static) -> Self {
        Self {
            inner: Box::pin(inner),
        }
    }

    /// A finite stream over already-known items.
    pub fn from_results(items: Vec<Result<Value>>) -> Self {
        Self::new(stream::iter(items))
    }

    pub fn empty() -> Self {
        Self::new(stream::empty())
    }

    pub async fn next_payload(&mut self) -> Option<Result<Value>> {
        self.inner.next().await
    }
}

impl Stream for EventStream {
    type Item = Result<Value>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

/// Keep only payloads accepted by `predicate`. Errors always pass through.
pub fn with_filter<F>(events: EventStream, mut predicate: F) -> EventStream
where
    F: FnMut(&Value) -> bool + Send + 'static,
{
    EventStream::new(events.filter(move |item| {
        let keep = match item {
            Ok(payload) => predicate(payload),
            Err(_) => true,
        };
        future::ready(keep)
    }))
}
