//! Ordered in-memory tables and the mutations applied to them.

use super::{Item, Key, Page, ScanFilter, TableSpec, WriteRequest};
use crate::error::{CourierError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Bound;

/// Physical key: partition value, then sort value ("" when the table has none).
pub(crate) type StoredKey = (String, String);

/// A validated change to a single row. Applying one never fails.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub(crate) enum Mutation {
    Put {
        table: String,
        key: StoredKey,
        item: Item,
    },
    Delete {
        table: String,
        key: StoredKey,
    },
    SetAttribute {
        table: String,
        key: StoredKey,
        attribute: String,
        value: Value,
    },
}

fn stored(key: &Key) -> StoredKey {
    (key.partition.clone(), key.sort.clone().unwrap_or_default())
}

fn cursor_key(table: &TableSpec, key: &StoredKey) -> Key {
    Key {
        partition: key.0.clone(),
        sort: table.sort_key.as_ref().map(|_| key.1.clone()),
    }
}

#[derive(Default)]
pub(crate) struct Tables {
    tables: HashMap<String, BTreeMap<StoredKey, Item>>,
}

impl Tables {
    pub fn get(&self, table: &TableSpec, key: &Key) -> Result<Option<Item>> {
        table.check_key(key)?;
        Ok(self
            .tables
            .get(&table.name)
            .and_then(|rows| rows.get(&stored(key)))
            .cloned())
    }

    pub fn len(&self, table: &str) -> usize {
        self.tables.get(table).map_or(0, BTreeMap::len)
    }

    pub fn put_mutation(table: &TableSpec, item: Item) -> Result<Mutation> {
        let key = table.key_of(&item)?;
        Ok(Mutation::Put {
            table: table.name.clone(),
            key: stored(&key),
            item,
        })
    }

    pub fn delete_mutation(table: &TableSpec, key: &Key) -> Result<Mutation> {
        table.check_key(key)?;
        Ok(Mutation::Delete {
            table: table.name.clone(),
            key: stored(key),
        })
    }

    /// `None` when the target row does not exist.
    pub fn set_attribute_mutation(
        &self,
        table: &TableSpec,
        key: &Key,
        attribute: &str,
        value: Value,
    ) -> Result<Option<Mutation>> {
        if attribute == table.partition_key || table.sort_key.as_deref() == Some(attribute) {
            return Err(CourierError::InvalidRequest(format!(
                "cannot update key attribute `{}`",
                attribute
            )));
        }
        if self.get(table, key)?.is_none() {
            return Ok(None);
        }
        Ok(Some(Mutation::SetAttribute {
            table: table.name.clone(),
            key: stored(key),
            attribute: attribute.to_string(),
            value,
        }))
    }

    /// Validate a batch or transaction and turn it into mutations.
    pub fn write_mutations(
        requests: Vec<WriteRequest>,
        max_items: usize,
        distinct_keys: bool,
    ) -> Result<Vec<Mutation>> {
        if requests.is_empty() {
            return Err(CourierError::InvalidRequest("empty write request".into()));
        }
        if requests.len() > max_items {
            return Err(CourierError::InvalidRequest(format!(
                "{} requests exceed the limit of {}",
                requests.len(),
                max_items
            )));
        }

        let mutations = requests
            .into_iter()
            .map(|request| match request {
                WriteRequest::Put { table, item } => Self::put_mutation(&table, item),
                WriteRequest::Delete { table, key } => Self::delete_mutation(&table, &key),
            })
            .collect::<Result<Vec<_>>>()?;

        if distinct_keys {
            let mut seen = HashSet::new();
            for mutation in &mutations {
                if !seen.insert(mutation.target()) {
                    return Err(CourierError::InvalidRequest(
                        "transaction touches the same item more than once".into(),
                    ));
                }
            }
        }

        Ok(mutations)
    }

    pub fn apply(&mut self, mutation: Mutation) {
        match mutation {
            Mutation::Put { table, key, item } => {
                self.tables.entry(table).or_default().insert(key, item);
            }
            Mutation::Delete { table, key } => {
                if let Some(rows) = self.tables.get_mut(&table) {
                    rows.remove(&key);
                }
            }
            Mutation::SetAttribute {
                table,
                key,
                attribute,
                value,
            } => {
                if let Some(row) = self.tables.get_mut(&table).and_then(|rows| rows.get_mut(&key)) {
                    row.insert(attribute, value);
                }
            }
        }
    }

    pub fn query(
        &self,
        table: &TableSpec,
        partition: &str,
        limit: usize,
        start: Option<&Key>,
    ) -> Result<Page> {
        check_limit(limit)?;
        let Some(rows) = self.tables.get(&table.name) else {
            return Ok(Page::default());
        };

        let lower = match start {
            Some(key) => {
                table.check_key(key)?;
                if key.partition != partition {
                    return Err(CourierError::InvalidRequest(
                        "cursor belongs to a different partition".into(),
                    ));
                }
                Bound::Excluded(stored(key))
            }
            None => Bound::Included((partition.to_string(), String::new())),
        };

        let mut page = Page::default();
        let mut last = None;
        for (key, item) in rows
            .range((lower, Bound::Unbounded))
            .take_while(|(key, _)| key.0 == partition)
            .take(limit)
        {
            page.items.push(item.clone());
            last = Some(key);
        }

        if page.items.len() == limit {
            page.cursor = last.map(|key| cursor_key(table, key));
        }
        Ok(page)
    }

    pub fn scan(
        &self,
        table: &TableSpec,
        filter: &ScanFilter,
        limit: usize,
        start: Option<&Key>,
    ) -> Result<Page> {
        check_limit(limit)?;
        let Some(rows) = self.tables.get(&table.name) else {
            return Ok(Page::default());
        };

        let lower = match start {
            Some(key) => {
                table.check_key(key)?;
                Bound::Excluded(stored(key))
            }
            None => Bound::Unbounded,
        };

        let mut page = Page::default();
        let mut evaluated = 0;
        let mut last = None;
        for (key, item) in rows.range((lower, Bound::Unbounded)).take(limit) {
            evaluated += 1;
            last = Some(key);
            if filter.matches(item) {
                page.items.push(item.clone());
            }
        }

        if evaluated == limit {
            page.cursor = last.map(|key| cursor_key(table, key));
        }
        Ok(page)
    }

    /// Every live row as a put, for journal compaction.
    pub fn snapshot(&self) -> Vec<Mutation> {
        self.tables
            .iter()
            .flat_map(|(table, rows)| {
                rows.iter().map(move |(key, item)| Mutation::Put {
                    table: table.clone(),
                    key: key.clone(),
                    item: item.clone(),
                })
            })
            .collect()
    }
}

impl Mutation {
    fn target(&self) -> (&str, &StoredKey) {
        match self {
            Mutation::Put { table, key, .. }
            | Mutation::Delete { table, key }
            | Mutation::SetAttribute { table, key, .. } => (table.as_str(), key),
        }
    }
}

fn check_limit(limit: usize) -> Result<()> {
    if limit == 0 {
        return Err(CourierError::InvalidRequest("page limit must be positive".into()));
    }
    Ok(())
}
