//! Subscription index: which operations of which connections listen to
//! which event names.
//!
//! # Example
//!
//! ```ignore
//! let index = SubscriptionIndex::new(backend, &CourierConfig::default());
//!
//! index.subscribe(&["chat".to_string()], &connection, &operation).await?;
//!
//! let mut pages = index.subscribers_by_event_name("chat");
//! while let Some(page) = pages.next_page().await? {
//!     for subscriber in page {
//!         println!("{} listens on {}", subscriber.connection.id, subscriber.event);
//!     }
//! }
//! ```

mod index;
mod pages;

pub use index::{SubscriptionIndex, SUBSCRIPTION_ID_SEPARATOR};
pub use pages::SubscriberPages;
