//! In-process window record storage.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, trace};

use super::storage::{RateLimiterStorage, WindowRecord, WindowUpdate};
use crate::error::Result;

/// Window records kept in a concurrent map.
///
/// Updates for one key run under that key's shard lock. An expired record is
/// dropped when its key is next read; keys that are never read again stay
/// until [`purge_expired`](Self::purge_expired) runs, so long-lived stores
/// with many one-off keys should call it periodically.
#[derive(Debug, Default)]
pub struct MemoryRateLimiterStorage {
    records: DashMap<String, WindowRecord>,
}

impl MemoryRateLimiterStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of stored records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Clear all records.
    pub fn clear(&self) {
        self.records.clear();
    }

    /// Drop records whose window has closed. Returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let before = self.records.len();
        self.records.retain(|_, record| !record.is_expired(now));
        let purged = before.saturating_sub(self.records.len());
        if purged > 0 {
            debug!(purged = purged, "Purged expired window records");
        }
        purged
    }
}

#[async_trait]
impl RateLimiterStorage for MemoryRateLimiterStorage {
    fn kind(&self) -> &str {
        "memory"
    }

    async fn find(&self, key: &str) -> Result<Option<WindowRecord>> {
        let now = Utc::now();
        if self
            .records
            .remove_if(key, |_, record| record.is_expired(now))
            .is_some()
        {
            trace!(key = %key, "Dropped expired window record");
            return Ok(None);
        }
        Ok(self.records.get(key).map(|record| *record))
    }

    async fn upsert(&self, key: &str, update: WindowUpdate<'_>) -> Result<WindowRecord> {
        let record = match self.records.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                let next = update(Some(*entry.get()));
                entry.insert(next);
                next
            }
            Entry::Vacant(entry) => {
                let next = update(None);
                entry.insert(next);
                next
            }
        };
        Ok(record)
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.records.remove(key);
        Ok(())
    }
}
