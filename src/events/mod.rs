//! Durable event log and the event-store seam the pub/sub facade writes to.

mod log;
mod memory;

pub use log::{EventLog, EventTail, TailFrom};
pub use memory::MemoryEventStore;

use crate::error::Result;
use crate::types::{Event, NewEvent};
use async_trait::async_trait;

/// Append-only sink for published events.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Append `event`, assigning its id and retention deadline.
    ///
    /// Success means the event is stored, not that it was delivered.
    async fn publish(&self, event: NewEvent) -> Result<Event>;
}
