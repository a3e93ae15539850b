//! Background TTL retention.

use super::{Backend, ScanFilter, TableSpec, WriteRequest, MAX_BATCH_ITEMS};
use crate::error::Result;
use crate::types::epoch_seconds;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const REAP_SCAN_PAGE: usize = 100;

/// A table whose rows carry an epoch-seconds expiry attribute.
#[derive(Clone, Debug)]
pub struct ReapTarget {
    pub table: TableSpec,
    pub ttl_attribute: String,
}

/// Deletes rows whose TTL has passed. Expiry is eventual: a row stays
/// readable until the pass that finds it.
pub struct Reaper {
    backend: Arc<dyn Backend>,
    targets: Vec<ReapTarget>,
}

impl Reaper {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            targets: Vec::new(),
        }
    }

    pub fn with_target(mut self, table: TableSpec, ttl_attribute: impl Into<String>) -> Self {
        self.targets.push(ReapTarget {
            table,
            ttl_attribute: ttl_attribute.into(),
        });
        self
    }

    /// One pass over every target. Returns the number of rows deleted.
    pub async fn reap_once(&self, now: i64) -> Result<usize> {
        let mut removed = 0;
        for target in &self.targets {
            removed += self.reap_table(target, now).await?;
        }
        if removed > 0 {
            info!(removed, "reaped expired rows");
        }
        Ok(removed)
    }

    async fn reap_table(&self, target: &ReapTarget, now: i64) -> Result<usize> {
        let filter = ScanFilter::ExpiredBefore {
            attribute: target.ttl_attribute.clone(),
            epoch_seconds: now,
        };

        let mut removed = 0;
        let mut cursor = None;
        loop {
            let page = self
                .backend
                .scan(&target.table, &filter, REAP_SCAN_PAGE, cursor.as_ref())
                .await?;

            let deletes = page
                .items
                .iter()
                .map(|item| {
                    target
                        .table
                        .key_of(item)
                        .map(|key| WriteRequest::delete(&target.table, key))
                })
                .collect::<Result<Vec<_>>>()?;

            for chunk in deletes.chunks(MAX_BATCH_ITEMS) {
                self.backend.batch_write(chunk.to_vec()).await?;
                removed += chunk.len();
            }

            match page.cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        debug!(table = %target.table.name, removed, "reaper pass");
        Ok(removed)
    }

    /// Run a pass every `interval` until the handle is aborted. Failed passes
    /// are logged and retried on the next tick.
    pub fn spawn(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Err(e) = self.reap_once(epoch_seconds()).await {
                    warn!(error = %e, "reaper pass failed");
                }
            }
        })
    }
}
