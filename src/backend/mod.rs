//! Backing-store capability shared by the connection registry, the
//! subscription index and the event log.
//!
//! The capability is deliberately small: point reads and writes, a
//! conditional attribute update, partition queries and filtered scans with
//! an explicit cursor, batch writes and small atomic transactions.
//!
//! Two implementations are provided:
//! - [`MemoryBackend`]: ordered in-memory tables, for tests and single-process use
//! - [`FileBackend`]: the same tables made durable by an append-only journal
//!
//! Pagination follows one rule everywhere: `limit` counts *evaluated*
//! items, and a cursor is returned whenever a page evaluated `limit`
//! items. A filtered scan page can therefore be empty and still carry a
//! cursor, and the last non-empty page of a query may carry a cursor
//! that leads to an empty page.

mod file;
mod journal;
mod memory;
mod reaper;
mod tables;

pub use file::FileBackend;
pub use memory::MemoryBackend;
pub use reaper::{ReapTarget, Reaper};

use crate::error::{CourierError, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A stored row.
pub type Item = Map<String, Value>;

/// Most requests a single batch write may carry.
pub const MAX_BATCH_ITEMS: usize = 25;

/// Most requests a single transaction may carry.
pub const MAX_TRANSACTION_ITEMS: usize = 25;

/// Name and key layout of a logical table.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableSpec {
    pub name: String,
    pub partition_key: String,
    pub sort_key: Option<String>,
}

impl TableSpec {
    pub fn new(name: impl Into<String>, partition_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            partition_key: partition_key.into(),
            sort_key: None,
        }
    }

    pub fn with_sort_key(mut self, sort_key: impl Into<String>) -> Self {
        self.sort_key = Some(sort_key.into());
        self
    }

    /// Extract the primary key of `item` according to this layout.
    pub fn key_of(&self, item: &Item) -> Result<Key> {
        let partition = self.string_attribute(item, &self.partition_key)?;
        let sort = match &self.sort_key {
            Some(name) => Some(self.string_attribute(item, name)?),
            None => None,
        };
        Ok(Key { partition, sort })
    }

    /// Check that `key` has exactly the components this layout requires.
    pub fn check_key(&self, key: &Key) -> Result<()> {
        if key.sort.is_some() != self.sort_key.is_some() {
            return Err(CourierError::InvalidRequest(format!(
                "key {:?} does not match the layout of table {}",
                key, self.name
            )));
        }
        Ok(())
    }

    fn string_attribute(&self, item: &Item, name: &str) -> Result<String> {
        match item.get(name) {
            Some(Value::String(s)) => Ok(s.clone()),
            Some(_) => Err(CourierError::MalformedItem {
                table: self.name.clone(),
                reason: format!("key attribute `{}` is not a string", name),
            }),
            None => Err(CourierError::MalformedItem {
                table: self.name.clone(),
                reason: format!("missing key attribute `{}`", name),
            }),
        }
    }
}

/// Primary key of a row; also used as the pagination cursor.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Key {
    pub partition: String,
    pub sort: Option<String>,
}

impl Key {
    pub fn new(partition: impl Into<String>) -> Self {
        Self {
            partition: partition.into(),
            sort: None,
        }
    }

    pub fn with_sort(partition: impl Into<String>, sort: impl Into<String>) -> Self {
        Self {
            partition: partition.into(),
            sort: Some(sort.into()),
        }
    }
}

/// One page of a query or scan.
#[derive(Clone, Debug, Default)]
pub struct Page {
    pub items: Vec<Item>,
    /// Exclusive start key of the next page; `None` once nothing remains.
    pub cursor: Option<Key>,
}

/// Row filter applied by [`Backend::scan`] after items are evaluated.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ScanFilter {
    All,
    /// String attribute starts with `prefix`.
    BeginsWith { attribute: String, prefix: String },
    /// String attribute equals one of `values`.
    AnyOf { attribute: String, values: Vec<String> },
    /// Numeric attribute holds an epoch-seconds deadline before `epoch_seconds`.
    ExpiredBefore { attribute: String, epoch_seconds: i64 },
}

impl ScanFilter {
    pub fn matches(&self, item: &Item) -> bool {
        match self {
            ScanFilter::All => true,
            ScanFilter::BeginsWith { attribute, prefix } => item
                .get(attribute)
                .and_then(Value::as_str)
                .is_some_and(|s| s.starts_with(prefix.as_str())),
            ScanFilter::AnyOf { attribute, values } => item
                .get(attribute)
                .and_then(Value::as_str)
                .is_some_and(|s| values.iter().any(|v| v == s)),
            ScanFilter::ExpiredBefore {
                attribute,
                epoch_seconds,
            } => item
                .get(attribute)
                .and_then(Value::as_i64)
                .is_some_and(|ttl| ttl < *epoch_seconds),
        }
    }
}

/// One element of a batch write or transaction.
#[derive(Clone, Debug, PartialEq)]
pub enum WriteRequest {
    Put { table: TableSpec, item: Item },
    Delete { table: TableSpec, key: Key },
}

impl WriteRequest {
    pub fn put(table: &TableSpec, item: Item) -> Self {
        WriteRequest::Put {
            table: table.clone(),
            item,
        }
    }

    pub fn delete(table: &TableSpec, key: Key) -> Self {
        WriteRequest::Delete {
            table: table.clone(),
            key,
        }
    }
}

/// Storage capability required by the stores.
///
/// Implementations must make [`Backend::transact_write`] all-or-nothing.
/// [`Backend::batch_write`] only promises that every request is attempted.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn get(&self, table: &TableSpec, key: &Key) -> Result<Option<Item>>;

    async fn put(&self, table: &TableSpec, item: Item) -> Result<()>;

    async fn delete(&self, table: &TableSpec, key: &Key) -> Result<()>;

    /// Set one attribute of an existing item. Returns `false` (and writes
    /// nothing) if the item does not exist.
    async fn update_attribute(
        &self,
        table: &TableSpec,
        key: &Key,
        attribute: &str,
        value: Value,
    ) -> Result<bool>;

    /// Items of one partition in sort-key order.
    async fn query(
        &self,
        table: &TableSpec,
        partition: &str,
        limit: usize,
        start: Option<&Key>,
    ) -> Result<Page>;

    /// All items of a table in key order, filtered after evaluation.
    async fn scan(
        &self,
        table: &TableSpec,
        filter: &ScanFilter,
        limit: usize,
        start: Option<&Key>,
    ) -> Result<Page>;

    async fn batch_write(&self, requests: Vec<WriteRequest>) -> Result<()>;

    async fn transact_write(&self, requests: Vec<WriteRequest>) -> Result<()>;
}

/// Encode a record as a row.
pub fn to_item<T: Serialize>(value: &T) -> Result<Item> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(CourierError::Serialization(format!(
            "expected an object, got {}",
            other
        ))),
    }
}

/// Decode a row into a record.
pub fn from_item<T: DeserializeOwned>(table: &TableSpec, item: Item) -> Result<T> {
    serde_json::from_value(Value::Object(item)).map_err(|e| CourierError::MalformedItem {
        table: table.name.clone(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item(value: Value) -> Item {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_key_of() {
        let table = TableSpec::new("Subscriptions", "event").with_sort_key("subscriptionId");
        let key = table
            .key_of(&item(json!({"event": "A", "subscriptionId": "c1:op1", "x": 1})))
            .unwrap();
        assert_eq!(key, Key::with_sort("A", "c1:op1"));

        let missing = table.key_of(&item(json!({"event": "A"})));
        assert!(matches!(missing, Err(CourierError::MalformedItem { .. })));

        let numeric = table.key_of(&item(json!({"event": 1, "subscriptionId": "x"})));
        assert!(matches!(numeric, Err(CourierError::MalformedItem { .. })));
    }

    #[test]
    fn test_check_key() {
        let table = TableSpec::new("Connections", "id");
        assert!(table.check_key(&Key::new("c1")).is_ok());
        assert!(table.check_key(&Key::with_sort("c1", "x")).is_err());
    }

    #[test]
    fn test_filters() {
        let row = item(json!({"subscriptionId": "c1:op", "event": "A", "ttl": 100}));

        assert!(ScanFilter::All.matches(&row));
        assert!(ScanFilter::BeginsWith {
            attribute: "subscriptionId".into(),
            prefix: "c1:".into()
        }
        .matches(&row));
        assert!(!ScanFilter::BeginsWith {
            attribute: "subscriptionId".into(),
            prefix: "c2:".into()
        }
        .matches(&row));
        assert!(ScanFilter::AnyOf {
            attribute: "event".into(),
            values: vec!["B".into(), "A".into()]
        }
        .matches(&row));
        assert!(ScanFilter::ExpiredBefore {
            attribute: "ttl".into(),
            epoch_seconds: 101
        }
        .matches(&row));
        assert!(!ScanFilter::ExpiredBefore {
            attribute: "ttl".into(),
            epoch_seconds: 100
        }
        .matches(&row));
    }
}
