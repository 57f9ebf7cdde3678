//! In-process counter store for tests and single-node deployments.

use super::{CounterSlot, CounterStore, StoreUnavailable, expiry_after};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;

struct Entry {
    count: u64,
    value: Option<Vec<u8>>,
    expires_at: DateTime<Utc>,
}

impl Entry {
    fn live(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// [`CounterStore`] backed by a mutex-guarded map.
///
/// Expired entries are swept on every mutation, so the map stays bounded by
/// the working set without a background task.
#[derive(Default)]
pub struct MemoryCounterStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryCounterStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries, for tests and introspection.
    pub async fn len(&self) -> usize {
        let now = Utc::now();
        let entries = self.entries.lock().await;
        entries.values().filter(|entry| entry.live(now)).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<CounterSlot, StoreUnavailable> {
        let now = Utc::now();
        let mut entries = self.entries.lock().await;
        entries.retain(|_, entry| entry.live(now));
        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            count: 0,
            value: None,
            expires_at: expiry_after(now, window),
        });
        entry.count += 1;
        Ok(CounterSlot {
            count: entry.count,
            expires_at: entry.expires_at,
        })
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreUnavailable> {
        let now = Utc::now();
        let entries = self.entries.lock().await;
        Ok(entries
            .get(key)
            .filter(|entry| entry.live(now))
            .and_then(|entry| entry.value.clone()))
    }

    async fn put(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StoreUnavailable> {
        let now = Utc::now();
        let mut entries = self.entries.lock().await;
        entries.retain(|_, entry| entry.live(now));
        entries.insert(
            key.to_string(),
            Entry {
                count: 0,
                value: Some(value.to_vec()),
                expires_at: expiry_after(now, ttl),
            },
        );
        Ok(())
    }

    async fn update(
        &self,
        key: &str,
        value: &[u8],
        ttl: Duration,
    ) -> Result<bool, StoreUnavailable> {
        let now = Utc::now();
        let mut entries = self.entries.lock().await;
        entries.retain(|_, entry| entry.live(now));
        match entries.get_mut(key) {
            Some(entry) => {
                entry.value = Some(value.to_vec());
                entry.expires_at = expiry_after(now, ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StoreUnavailable> {
        let mut entries = self.entries.lock().await;
        entries.remove(key);
        Ok(())
    }
}
