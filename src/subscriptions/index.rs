//! Dual-indexed subscription store.
//!
//! Table layouts:
//!
//! - Subscriptions: `event` (partition) + `subscriptionId` (sort); the full
//!   [`Subscriber`] row, including a snapshot of its connection
//! - SubscriptionOperations: `subscriptionId` (partition); the reverse index
//!   from a subscription to its event name
//!
//! Rows are created and deleted in pairs. Deleting a single subscription is
//! transactional; the per-connection sweep is not (see
//! [`SubscriptionIndex::unsubscribe_all_by_connection_id`]).

use super::pages::SubscriberPages;
use crate::backend::{from_item, to_item, Backend, Key, ScanFilter, TableSpec, WriteRequest};
use crate::config::CourierConfig;
use crate::error::{CourierError, Result};
use crate::types::{Connection, OperationRequest, Subscriber, SubscriptionOperation};
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Joins connection id and operation id into a subscription id.
///
/// Connection ids may not contain it, so a `connectionId:` prefix only
/// matches that connection's subscriptions.
pub const SUBSCRIPTION_ID_SEPARATOR: char = ':';

const EVENT_ATTRIBUTE: &str = "event";
const SUBSCRIPTION_ID_ATTRIBUTE: &str = "subscriptionId";

pub struct SubscriptionIndex {
    backend: Arc<dyn Backend>,
    subscriptions: TableSpec,
    operations: TableSpec,
    query_page_size: usize,
    scan_page_size: usize,
}

impl SubscriptionIndex {
    pub fn new(backend: Arc<dyn Backend>, config: &CourierConfig) -> Self {
        Self {
            backend,
            subscriptions: TableSpec::new(config.subscriptions_table.clone(), EVENT_ATTRIBUTE)
                .with_sort_key(SUBSCRIPTION_ID_ATTRIBUTE),
            operations: TableSpec::new(
                config.subscription_operations_table.clone(),
                SUBSCRIPTION_ID_ATTRIBUTE,
            ),
            query_page_size: config.query_page_size,
            scan_page_size: config.scan_page_size,
        }
    }

    pub fn subscriptions_table(&self) -> &TableSpec {
        &self.subscriptions
    }

    pub fn operations_table(&self) -> &TableSpec {
        &self.operations
    }

    pub fn generate_subscription_id(connection_id: &str, operation_id: &str) -> String {
        format!("{}{}{}", connection_id, SUBSCRIPTION_ID_SEPARATOR, operation_id)
    }

    /// Register `operation` of `connection` for exactly one event stream.
    ///
    /// Both rows are written in one batch.
    #[instrument(skip(self, connection, operation), fields(connection_id = %connection.id))]
    pub async fn subscribe(
        &self,
        names: &[String],
        connection: &Connection,
        operation: &OperationRequest,
    ) -> Result<Subscriber> {
        let [name] = names else {
            return Err(CourierError::InvalidSubscriptionRequest(format!(
                "Only one active operation per event name is allowed, got {} event names",
                names.len()
            )));
        };
        if name.is_empty() {
            return Err(CourierError::InvalidSubscriptionRequest(
                "Event name must be nonempty string".into(),
            ));
        }
        if connection.id.contains(SUBSCRIPTION_ID_SEPARATOR) {
            return Err(CourierError::InvalidSubscriptionRequest(format!(
                "connection id {} contains the reserved separator `{}`",
                connection.id, SUBSCRIPTION_ID_SEPARATOR
            )));
        }

        let subscription_id =
            Self::generate_subscription_id(&connection.id, &operation.operation_id);
        let subscriber = Subscriber {
            event: name.clone(),
            subscription_id: subscription_id.clone(),
            connection: connection.clone(),
            operation: operation.clone(),
            operation_id: operation.operation_id.clone(),
        };
        let reverse = SubscriptionOperation {
            subscription_id,
            event: name.clone(),
        };

        self.backend
            .batch_write(vec![
                WriteRequest::put(&self.subscriptions, to_item(&subscriber)?),
                WriteRequest::put(&self.operations, to_item(&reverse)?),
            ])
            .await?;

        debug!(event = %name, subscription_id = %subscriber.subscription_id, "subscribed");
        Ok(subscriber)
    }

    /// Fresh paginated lookup of every subscriber of `name`.
    pub fn subscribers_by_event_name(&self, name: &str) -> SubscriberPages {
        SubscriberPages::new(
            Arc::clone(&self.backend),
            self.subscriptions.clone(),
            name.to_string(),
            self.query_page_size,
        )
    }

    /// Remove a subscriber and its reverse-index row atomically.
    pub async fn unsubscribe(&self, subscriber: &Subscriber) -> Result<()> {
        let subscription_id =
            Self::generate_subscription_id(&subscriber.connection.id, &subscriber.operation_id);
        self.delete_pair(&subscriber.event, &subscription_id).await?;
        debug!(event = %subscriber.event, subscription_id = %subscription_id, "unsubscribed");
        Ok(())
    }

    /// Reverse-index row of one operation, if it is subscribed.
    pub async fn subscription_operation(
        &self,
        connection_id: &str,
        operation_id: &str,
    ) -> Result<Option<SubscriptionOperation>> {
        let key = Key::new(Self::generate_subscription_id(connection_id, operation_id));
        match self.backend.get(&self.operations, &key).await? {
            Some(item) => Ok(Some(from_item(&self.operations, item)?)),
            None => Ok(None),
        }
    }

    /// Remove one operation's subscription, resolving its event through the
    /// reverse index. Returns `false` when nothing was subscribed.
    pub async fn unsubscribe_operation(&self, connection_id: &str, operation_id: &str) -> Result<bool> {
        let Some(operation) = self.subscription_operation(connection_id, operation_id).await? else {
            debug!(connection_id, operation_id, "no subscription to remove");
            return Ok(false);
        };

        self.delete_pair(&operation.event, &operation.subscription_id).await?;
        debug!(
            event = %operation.event,
            subscription_id = %operation.subscription_id,
            "unsubscribed operation"
        );
        Ok(true)
    }

    /// Sweep every subscription of a connection, one scan page at a time.
    ///
    /// Each page is deleted from both tables with one batch write. Pages are
    /// not atomic with each other: an interrupted sweep leaves the unvisited
    /// rows in place until the sweep is run again.
    #[instrument(skip(self))]
    pub async fn unsubscribe_all_by_connection_id(&self, connection_id: &str) -> Result<usize> {
        let filter = ScanFilter::BeginsWith {
            attribute: SUBSCRIPTION_ID_ATTRIBUTE.to_string(),
            prefix: format!("{}{}", connection_id, SUBSCRIPTION_ID_SEPARATOR),
        };

        let mut removed = 0;
        let mut cursor = None;
        loop {
            let page = self
                .backend
                .scan(&self.subscriptions, &filter, self.scan_page_size, cursor.as_ref())
                .await?;

            if !page.items.is_empty() {
                let mut requests = Vec::with_capacity(page.items.len() * 2);
                for item in &page.items {
                    let key = self.subscriptions.key_of(item)?;
                    let subscription_id = key.sort.clone().unwrap_or_default();
                    requests.push(WriteRequest::delete(&self.subscriptions, key));
                    requests.push(WriteRequest::delete(&self.operations, Key::new(subscription_id)));
                }
                self.backend.batch_write(requests).await?;
                removed += page.items.len();
            }

            match page.cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        info!(connection_id, removed, "removed connection subscriptions");
        Ok(removed)
    }

    async fn delete_pair(&self, event: &str, subscription_id: &str) -> Result<()> {
        self.backend
            .transact_write(vec![
                WriteRequest::delete(&self.subscriptions, Key::with_sort(event, subscription_id)),
                WriteRequest::delete(&self.operations, Key::new(subscription_id)),
            ])
            .await
    }
}
