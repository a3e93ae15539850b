//! In-memory backend.

use super::tables::Tables;
use super::{
    Backend, Item, Key, Page, ScanFilter, TableSpec, WriteRequest, MAX_BATCH_ITEMS,
    MAX_TRANSACTION_ITEMS,
};
use crate::error::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

/// Ordered in-memory tables. Every write applies under one lock, so
/// batches are as atomic as transactions here.
#[derive(Default)]
pub struct MemoryBackend {
    tables: RwLock<Tables>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows currently stored in `table`.
    pub fn item_count(&self, table: &str) -> usize {
        self.tables.read().len(table)
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn get(&self, table: &TableSpec, key: &Key) -> Result<Option<Item>> {
        self.tables.read().get(table, key)
    }

    async fn put(&self, table: &TableSpec, item: Item) -> Result<()> {
        let mutation = Tables::put_mutation(table, item)?;
        self.tables.write().apply(mutation);
        Ok(())
    }

    async fn delete(&self, table: &TableSpec, key: &Key) -> Result<()> {
        let mutation = Tables::delete_mutation(table, key)?;
        self.tables.write().apply(mutation);
        Ok(())
    }

    async fn update_attribute(
        &self,
        table: &TableSpec,
        key: &Key,
        attribute: &str,
        value: Value,
    ) -> Result<bool> {
        let mut tables = self.tables.write();
        match tables.set_attribute_mutation(table, key, attribute, value)? {
            Some(mutation) => {
                tables.apply(mutation);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn query(
        &self,
        table: &TableSpec,
        partition: &str,
        limit: usize,
        start: Option<&Key>,
    ) -> Result<Page> {
        self.tables.read().query(table, partition, limit, start)
    }

    async fn scan(
        &self,
        table: &TableSpec,
        filter: &ScanFilter,
        limit: usize,
        start: Option<&Key>,
    ) -> Result<Page> {
        self.tables.read().scan(table, filter, limit, start)
    }

    async fn batch_write(&self, requests: Vec<WriteRequest>) -> Result<()> {
        let mutations = Tables::write_mutations(requests, MAX_BATCH_ITEMS, false)?;
        let mut tables = self.tables.write();
        for mutation in mutations {
            tables.apply(mutation);
        }
        Ok(())
    }

    async fn transact_write(&self, requests: Vec<WriteRequest>) -> Result<()> {
        let mutations = Tables::write_mutations(requests, MAX_TRANSACTION_ITEMS, true)?;
        let mut tables = self.tables.write();
        for mutation in mutations {
            tables.apply(mutation);
        }
        Ok(())
    }
}
