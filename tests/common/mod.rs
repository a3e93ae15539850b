//! Helpers shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use courier::backend::{Item, Key, Page, ScanFilter, TableSpec, WriteRequest};
use courier::{
    Backend, ConnectInfo, Connection, Courier, CourierConfig, CourierError, MemoryBackend,
    OperationRequest, PushClient, PushError, Result,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Once};

static TRACING: Once = Once::new();

/// Route tracing output through the test harness. `RUST_LOG`-free; debug
/// level so failures come with context.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init();
    });
}

/// Push client that records deliveries; connections can be marked gone or
/// failing.
#[derive(Default)]
pub struct RecordingPush {
    delivered: Mutex<Vec<(String, Vec<u8>)>>,
    closed: Mutex<Vec<String>>,
    gone: Mutex<HashSet<String>>,
    failing: Mutex<HashMap<String, String>>,
}

impl RecordingPush {
    pub fn mark_gone(&self, connection_id: &str) {
        self.gone.lock().insert(connection_id.to_string());
    }

    pub fn mark_failing(&self, connection_id: &str, reason: &str) {
        self.failing
            .lock()
            .insert(connection_id.to_string(), reason.to_string());
    }

    pub fn delivered_to(&self, connection_id: &str) -> Vec<Value> {
        self.delivered
            .lock()
            .iter()
            .filter(|(id, _)| id == connection_id)
            .map(|(_, payload)| serde_json::from_slice(payload).unwrap())
            .collect()
    }

    pub fn recipients(&self) -> HashSet<String> {
        self.delivered
            .lock()
            .iter()
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn closed(&self) -> Vec<String> {
        self.closed.lock().clone()
    }
}

#[async_trait]
impl PushClient for RecordingPush {
    async fn push(
        &self,
        _endpoint: &str,
        connection_id: &str,
        payload: &[u8],
    ) -> std::result::Result<(), PushError> {
        if self.gone.lock().contains(connection_id) {
            return Err(PushError::Gone);
        }
        if let Some(reason) = self.failing.lock().get(connection_id) {
            return Err(PushError::Transient(reason.clone()));
        }
        self.delivered
            .lock()
            .push((connection_id.to_string(), payload.to_vec()));
        Ok(())
    }

    async fn close(
        &self,
        _endpoint: &str,
        connection_id: &str,
    ) -> std::result::Result<(), PushError> {
        if self.gone.lock().contains(connection_id) {
            return Err(PushError::Gone);
        }
        self.closed.lock().push(connection_id.to_string());
        Ok(())
    }
}

/// Memory backend whose reads or writes can be switched to fail with a
/// transient store error.
#[derive(Default)]
pub struct FlakyBackend {
    inner: MemoryBackend,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl FlakyBackend {
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn item_count(&self, table: &str) -> usize {
        self.inner.item_count(table)
    }

    fn check_read(&self) -> Result<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(CourierError::Store("read capacity exceeded".into()));
        }
        Ok(())
    }

    fn check_write(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(CourierError::Store("write capacity exceeded".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl Backend for FlakyBackend {
    async fn get(&self, table: &TableSpec, key: &Key) -> Result<Option<Item>> {
        self.check_read()?;
        self.inner.get(table, key).await
    }

    async fn put(&self, table: &TableSpec, item: Item) -> Result<()> {
        self.check_write()?;
        self.inner.put(table, item).await
    }

    async fn delete(&self, table: &TableSpec, key: &Key) -> Result<()> {
        self.check_write()?;
        self.inner.delete(table, key).await
    }

    async fn update_attribute(
        &self,
        table: &TableSpec,
        key: &Key,
        attribute: &str,
        value: Value,
    ) -> Result<bool> {
        self.check_write()?;
        self.inner.update_attribute(table, key, attribute, value).await
    }

    async fn query(
        &self,
        table: &TableSpec,
        partition: &str,
        limit: usize,
        start: Option<&Key>,
    ) -> Result<Page> {
        self.check_read()?;
        self.inner.query(table, partition, limit, start).await
    }

    async fn scan(
        &self,
        table: &TableSpec,
        filter: &ScanFilter,
        limit: usize,
        start: Option<&Key>,
    ) -> Result<Page> {
        self.check_read()?;
        self.inner.scan(table, filter, limit, start).await
    }

    async fn batch_write(&self, requests: Vec<WriteRequest>) -> Result<()> {
        self.check_write()?;
        self.inner.batch_write(requests).await
    }

    async fn transact_write(&self, requests: Vec<WriteRequest>) -> Result<()> {
        self.check_write()?;
        self.inner.transact_write(requests).await
    }
}

/// Default config, except events are dispatchable as soon as they land.
pub fn immediate_dispatch() -> CourierConfig {
    CourierConfig {
        dispatch_settle_ms: 0,
        ..Default::default()
    }
}

pub fn memory_courier() -> (Courier, Arc<RecordingPush>) {
    init_tracing();
    let push = Arc::new(RecordingPush::default());
    let courier = Courier::in_memory(push.clone(), immediate_dispatch()).unwrap();
    (courier, push)
}

/// Register `id` and subscribe its operation `op_id` to `event`.
pub async fn connect_and_subscribe(
    courier: &Courier,
    id: &str,
    op_id: &str,
    event: &str,
) -> Connection {
    let connection = courier
        .connections()
        .register(ConnectInfo::new(id, "localhost/dev"))
        .await
        .unwrap();
    courier
        .subscriptions()
        .subscribe(&[event.to_string()], &connection, &OperationRequest::new(op_id))
        .await
        .unwrap();
    connection
}
