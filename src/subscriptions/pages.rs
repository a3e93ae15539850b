//! Explicit-cursor pagination over the subscribers of one event.

use crate::backend::{from_item, Backend, Key, TableSpec};
use crate::error::Result;
use crate::types::Subscriber;
use std::sync::Arc;

/// Lazy, single-use sequence of subscriber pages.
///
/// Every call to [`crate::SubscriptionIndex::subscribers_by_event_name`]
/// starts a fresh cursor. The consumer drives pagination with
/// [`SubscriberPages::next_page`]; the sequence is exhausted once a fetch
/// returns no rows, or after a non-empty page that carried no cursor.
pub struct SubscriberPages {
    backend: Arc<dyn Backend>,
    table: TableSpec,
    event: String,
    page_size: usize,
    cursor: Option<Key>,
    done: bool,
}

impl SubscriberPages {
    pub(crate) fn new(
        backend: Arc<dyn Backend>,
        table: TableSpec,
        event: String,
        page_size: usize,
    ) -> Self {
        Self {
            backend,
            table,
            event,
            page_size,
            cursor: None,
            done: false,
        }
    }

    pub fn event(&self) -> &str {
        &self.event
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Fetch the next page. `Ok(None)` once exhausted.
    ///
    /// A failed fetch leaves the cursor untouched, so the caller may retry.
    pub async fn next_page(&mut self) -> Result<Option<Vec<Subscriber>>> {
        if self.done {
            return Ok(None);
        }

        let page = self
            .backend
            .query(&self.table, &self.event, self.page_size, self.cursor.as_ref())
            .await?;

        self.cursor = page.cursor;
        if self.cursor.is_none() {
            self.done = true;
        }

        if page.items.is_empty() {
            self.done = true;
            return Ok(None);
        }

        let subscribers = page
            .items
            .into_iter()
            .map(|item| from_item(&self.table, item))
            .collect::<Result<Vec<Subscriber>>>()?;
        Ok(Some(subscribers))
    }

    /// Drain every remaining page.
    pub async fn collect_all(mut self) -> Result<Vec<Subscriber>> {
        let mut all = Vec::new();
        while let Some(page) = self.next_page().await? {
            all.extend(page);
        }
        Ok(all)
    }
}
