//! Durable backend: in-memory tables rebuilt from an append-only journal.

use super::journal::Journal;
use super::tables::{Mutation, Tables};
use super::{
    Backend, Item, Key, Page, ScanFilter, TableSpec, WriteRequest, MAX_BATCH_ITEMS,
    MAX_TRANSACTION_ITEMS,
};
use crate::config::FileBackendConfig;
use crate::error::{CourierError, Result};
use async_trait::async_trait;
use fs2::FileExt;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::fs::{self, File, OpenOptions};
use std::path::Path;
use tracing::info;

const JOURNAL_FILE: &str = "courier.journal";
const LOCK_FILE: &str = "LOCK";

/// Tables persisted to `<path>/courier.journal`.
///
/// A write is journaled before it becomes visible to readers. Only one
/// process may hold a data directory open at a time.
pub struct FileBackend {
    config: FileBackendConfig,

    /// Lock file for exclusive access.
    _lock_file: File,

    tables: RwLock<Tables>,

    journal: Mutex<Journal>,
}

impl FileBackend {
    /// Open the data directory, replaying its journal.
    pub fn open(config: FileBackendConfig) -> Result<Self> {
        if !config.path.exists() {
            if !config.create_if_missing {
                return Err(CourierError::InvalidFormat(format!(
                    "data directory {} does not exist",
                    config.path.display()
                )));
            }
            fs::create_dir_all(&config.path)?;
        }

        let lock_file = Self::acquire_lock(&config.path)?;
        let (journal, frames) = Journal::open(config.path.join(JOURNAL_FILE), config.sync_writes)?;

        let mut tables = Tables::default();
        for frame in frames {
            for mutation in frame {
                tables.apply(mutation);
            }
        }

        info!(path = %config.path.display(), "file backend opened");

        Ok(Self {
            config,
            _lock_file: lock_file,
            tables: RwLock::new(tables),
            journal: Mutex::new(journal),
        })
    }

    fn acquire_lock(path: &Path) -> Result<File> {
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        lock_file.try_lock_exclusive().map_err(|_| CourierError::Locked)?;

        Ok(lock_file)
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Number of rows currently stored in `table`.
    pub fn item_count(&self, table: &str) -> usize {
        self.tables.read().len(table)
    }

    /// Rewrite the journal as one put per live row.
    pub fn compact(&self) -> Result<()> {
        let tables = self.tables.write();
        let mut journal = self.journal.lock();
        let before = journal.frame_count();
        journal.rewrite(tables.snapshot())?;
        info!(
            frames_before = before,
            frames_after = journal.frame_count(),
            "journal compacted"
        );
        Ok(())
    }

    /// Journal then apply, holding the table lock so journal order matches
    /// the order readers observe.
    fn commit(&self, tables: &mut Tables, mutations: Vec<Mutation>) -> Result<()> {
        self.journal.lock().append(&mutations)?;
        for mutation in mutations {
            tables.apply(mutation);
        }
        Ok(())
    }
}

#[async_trait]
impl Backend for FileBackend {
    async fn get(&self, table: &TableSpec, key: &Key) -> Result<Option<Item>> {
        self.tables.read().get(table, key)
    }

    async fn put(&self, table: &TableSpec, item: Item) -> Result<()> {
        let mutation = Tables::put_mutation(table, item)?;
        let mut tables = self.tables.write();
        self.commit(&mut tables, vec![mutation])
    }

    async fn delete(&self, table: &TableSpec, key: &Key) -> Result<()> {
        let mutation = Tables::delete_mutation(table, key)?;
        let mut tables = self.tables.write();
        self.commit(&mut tables, vec![mutation])
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
                self.commit(&mut tables, vec![mutation])?;
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
        self.commit(&mut tables, mutations)
    }

    async fn transact_write(&self, requests: Vec<WriteRequest>) -> Result<()> {
        let mutations = Tables::write_mutations(requests, MAX_TRANSACTION_ITEMS, true)?;
        let mut tables = self.tables.write();
        self.commit(&mut tables, mutations)
    }
}
