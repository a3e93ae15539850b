//! Configuration surface shared by the stores.

use crate::backend::MAX_BATCH_ITEMS;
use crate::error::{CourierError, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Table names, retention and pagination settings.
///
/// Every field is optional when deserialized; missing fields take their
/// defaults.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct CourierConfig {
    pub connections_table: String,
    pub subscriptions_table: String,
    pub subscription_operations_table: String,
    pub events_table: String,

    /// Retention of logged events, in seconds.
    /// Default: 7200
    pub ttl_seconds: u64,

    /// Extra lookups `hydrate` performs after a miss.
    /// Default: 0
    pub retry_count: u32,

    /// Sleep between `hydrate` lookups, in milliseconds.
    /// Default: 50
    pub retry_timeout_ms: u64,

    /// Page size of the per-connection cleanup sweep.
    /// Default: 12
    pub scan_page_size: usize,

    /// Page size of subscriber lookups by event name.
    /// Default: 50
    pub query_page_size: usize,

    /// How long a caught-up event tail waits before polling again.
    /// Default: 250
    pub tail_poll_ms: u64,

    /// Interval between TTL reaper passes.
    /// Default: 60
    pub reaper_interval_secs: u64,

    /// Age an event id must reach before `dispatch_after` hands it out, in
    /// milliseconds. Ids are minted before the write lands, so a younger
    /// id may still be overtaken by an earlier one.
    /// Default: 1000
    pub dispatch_settle_ms: u64,
}

impl Default for CourierConfig {
    fn default() -> Self {
        Self {
            connections_table: "Connections".to_string(),
            subscriptions_table: "Subscriptions".to_string(),
            subscription_operations_table: "SubscriptionOperations".to_string(),
            events_table: "Events".to_string(),
            ttl_seconds: 7200,
            retry_count: 0,
            retry_timeout_ms: 50,
            scan_page_size: 12,
            query_page_size: 50,
            tail_poll_ms: 250,
            reaper_interval_secs: 60,
            dispatch_settle_ms: 1000,
        }
    }
}

impl CourierConfig {
    /// Parse a JSON document and validate it.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: CourierConfig = serde_json::from_str(json)
            .map_err(|e| CourierError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.query_page_size == 0 {
            return Err(CourierError::Config("queryPageSize must be positive".into()));
        }
        if self.scan_page_size == 0 {
            return Err(CourierError::Config("scanPageSize must be positive".into()));
        }
        // Each swept subscriber is deleted from both tables in one batch.
        if self.scan_page_size * 2 > MAX_BATCH_ITEMS {
            return Err(CourierError::Config(format!(
                "scanPageSize {} exceeds the batch limit ({} items per page)",
                self.scan_page_size,
                MAX_BATCH_ITEMS / 2
            )));
        }
        Ok(())
    }

    pub fn hydrate_options(&self) -> HydrateOptions {
        HydrateOptions {
            retry_count: self.retry_count,
            timeout: Duration::from_millis(self.retry_timeout_ms),
        }
    }

    pub fn tail_poll_interval(&self) -> Duration {
        Duration::from_millis(self.tail_poll_ms)
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_secs)
    }

    pub fn dispatch_settle(&self) -> Duration {
        Duration::from_millis(self.dispatch_settle_ms)
    }
}

/// Retry budget for `ConnectionRegistry::hydrate`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HydrateOptions {
    pub retry_count: u32,
    pub timeout: Duration,
}

impl Default for HydrateOptions {
    fn default() -> Self {
        Self {
            retry_count: 0,
            timeout: Duration::from_millis(50),
        }
    }
}

/// Durable backend configuration.
#[derive(Clone, Debug)]
pub struct FileBackendConfig {
    /// Directory holding the journal and lock file.
    pub path: PathBuf,

    /// fsync the journal after every frame.
    pub sync_writes: bool,

    /// Whether to create the directory if it doesn't exist.
    pub create_if_missing: bool,
}

impl Default for FileBackendConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./courier-data"),
            sync_writes: true,
            create_if_missing: true,
        }
    }
}
