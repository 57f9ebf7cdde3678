//! Read-through cache for per-tenant dashboard aggregates.
//!
//! The aggregates (open case counts, unread messages, pending invoice
//! totals) are expensive joins owned by the host application; this module
//! only decides when to recompute. Cache-aside with best-effort
//! invalidation: writers invalidate after changing underlying records, and
//! staleness stays bounded by the entry TTL even when an invalidation is
//! lost. An unavailable store never blocks a dashboard; the aggregate is
//! computed directly and the cache is skipped.

use crate::store::{CounterStore, keys};
use anyhow::{Result, anyhow};
use serde::{Serialize, de::DeserializeOwned};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct MetricsCache {
    store: Arc<dyn CounterStore>,
    compute_timeout: Duration,
}

impl MetricsCache {
    #[must_use]
    pub fn new(store: Arc<dyn CounterStore>, compute_timeout: Duration) -> Self {
        Self {
            store,
            compute_timeout,
        }
    }

    /// Return the tenant's cached aggregate, computing and caching it for
    /// `ttl` on a miss. `compute` runs under a deadline so one slow
    /// aggregation cannot hold a dashboard request forever.
    pub async fn get_or_compute<T, F, Fut>(
        &self,
        tenant_id: Uuid,
        ttl: Duration,
        compute: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let key = keys::metrics(tenant_id);
        let cached = self.store.get(&key).await;
        match &cached {
            Ok(Some(bytes)) => match serde_json::from_slice::<T>(bytes) {
                Ok(value) => {
                    debug!(tenant_id = %tenant_id, "metrics cache hit");
                    return Ok(value);
                }
                Err(err) => {
                    warn!(tenant_id = %tenant_id, "cached metrics entry is malformed, recomputing: {err}");
                }
            },
            Ok(None) => {}
            Err(err) => {
                warn!(tenant_id = %tenant_id, "counter store unavailable, computing metrics without cache: {err}");
            }
        }

        let value = tokio::time::timeout(self.compute_timeout, compute())
            .await
            .map_err(|_| {
                anyhow!(
                    "metrics computation for tenant {tenant_id} timed out after {:?}",
                    self.compute_timeout
                )
            })??;

        // Skip the write-back when the store already failed the read; a
        // second failure would only add latency.
        if cached.is_ok() {
            match serde_json::to_vec(&value) {
                Ok(bytes) => {
                    if let Err(err) = self.store.put(&key, &bytes, ttl).await {
                        warn!(tenant_id = %tenant_id, "failed to cache computed metrics: {err}");
                    }
                }
                Err(err) => {
                    warn!(tenant_id = %tenant_id, "failed to serialize computed metrics: {err}");
                }
            }
        }
        Ok(value)
    }

    /// Drop the tenant's cached aggregate so the next read recomputes.
    /// Best-effort: on failure the stale entry still expires with its TTL.
    pub async fn invalidate(&self, tenant_id: Uuid) {
        if let Err(err) = self.store.delete(&keys::metrics(tenant_id)).await {
            warn!(tenant_id = %tenant_id, "metrics invalidation failed, entry expires with its ttl: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{CounterSlot, MemoryCounterStore, StoreUnavailable};
    use async_trait::async_trait;
    use serde::Deserialize;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    struct Summary {
        open_cases: u32,
        unread_messages: u32,
    }

    fn summary() -> Summary {
        Summary {
            open_cases: 3,
            unread_messages: 7,
        }
    }

    struct Rig {
        cache: MetricsCache,
        store: Arc<MemoryCounterStore>,
        computations: Arc<AtomicU32>,
    }

    fn rig() -> Rig {
        let store = Arc::new(MemoryCounterStore::new());
        Rig {
            cache: MetricsCache::new(Arc::clone(&store) as Arc<dyn CounterStore>, Duration::from_secs(5)),
            store,
            computations: Arc::new(AtomicU32::new(0)),
        }
    }

    impl Rig {
        async fn read(&self, tenant_id: Uuid, ttl: Duration) -> Result<Summary> {
            let computations = Arc::clone(&self.computations);
            self.cache
                .get_or_compute(tenant_id, ttl, move || async move {
                    computations.fetch_add(1, Ordering::SeqCst);
                    Ok(summary())
                })
                .await
        }
    }

    #[tokio::test]
    async fn second_read_is_served_from_cache() -> Result<()> {
        let rig = rig();
        let tenant = Uuid::new_v4();
        let ttl = Duration::from_secs(60);
        assert_eq!(rig.read(tenant, ttl).await?, summary());
        assert_eq!(rig.read(tenant, ttl).await?, summary());
        assert_eq!(rig.computations.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[tokio::test]
    async fn tenants_are_cached_separately() -> Result<()> {
        let rig = rig();
        let ttl = Duration::from_secs(60);
        rig.read(Uuid::new_v4(), ttl).await?;
        rig.read(Uuid::new_v4(), ttl).await?;
        assert_eq!(rig.computations.load(Ordering::SeqCst), 2);
        Ok(())
    }

    #[tokio::test]
    async fn invalidation_forces_a_recompute() -> Result<()> {
        let rig = rig();
        let tenant = Uuid::new_v4();
        let ttl = Duration::from_secs(60);
        rig.read(tenant, ttl).await?;
        rig.cache.invalidate(tenant).await;
        rig.read(tenant, ttl).await?;
        assert_eq!(rig.computations.load(Ordering::SeqCst), 2);
        Ok(())
    }

    #[tokio::test]
    async fn entries_expire_with_their_ttl() -> Result<()> {
        let rig = rig();
        let tenant = Uuid::new_v4();
        let ttl = Duration::from_millis(100);
        rig.read(tenant, ttl).await?;
        tokio::time::sleep(Duration::from_millis(250)).await;
        rig.read(tenant, ttl).await?;
        assert_eq!(rig.computations.load(Ordering::SeqCst), 2);
        Ok(())
    }

    #[tokio::test]
    async fn malformed_cache_entry_is_recomputed_and_replaced() -> Result<()> {
        let rig = rig();
        let tenant = Uuid::new_v4();
        let ttl = Duration::from_secs(60);
        rig.store
            .put(&keys::metrics(tenant), b"not json", ttl)
            .await?;
        assert_eq!(rig.read(tenant, ttl).await?, summary());
        assert_eq!(rig.computations.load(Ordering::SeqCst), 1);
        // The bad entry was overwritten, so the next read hits the cache.
        rig.read(tenant, ttl).await?;
        assert_eq!(rig.computations.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[tokio::test]
    async fn slow_computation_times_out() {
        let store = Arc::new(MemoryCounterStore::new());
        let cache = MetricsCache::new(store, Duration::from_millis(20));
        let result = cache
            .get_or_compute(Uuid::new_v4(), Duration::from_secs(60), || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(summary())
            })
            .await;
        assert!(result.is_err());
    }

    struct DownStore;

    #[async_trait]
    impl CounterStore for DownStore {
        async fn increment(
            &self,
            _key: &str,
            _window: Duration,
        ) -> Result<CounterSlot, StoreUnavailable> {
            Err(StoreUnavailable::from(anyhow!("store is down")))
        }

        async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, StoreUnavailable> {
            Err(StoreUnavailable::from(anyhow!("store is down")))
        }

        async fn put(
            &self,
            _key: &str,
            _value: &[u8],
            _ttl: Duration,
        ) -> Result<(), StoreUnavailable> {
            Err(StoreUnavailable::from(anyhow!("store is down")))
        }

        async fn update(
            &self,
            _key: &str,
            _value: &[u8],
            _ttl: Duration,
        ) -> Result<bool, StoreUnavailable> {
            Err(StoreUnavailable::from(anyhow!("store is down")))
        }

        async fn delete(&self, _key: &str) -> Result<(), StoreUnavailable> {
            Err(StoreUnavailable::from(anyhow!("store is down")))
        }
    }

    #[tokio::test]
    async fn unavailable_store_still_serves_computed_values() -> Result<()> {
        let cache = MetricsCache::new(Arc::new(DownStore), Duration::from_secs(5));
        let tenant = Uuid::new_v4();
        let computations = Arc::new(AtomicU32::new(0));
        for _ in 0..3 {
            let counter = Arc::clone(&computations);
            let value: Summary = cache
                .get_or_compute(tenant, Duration::from_secs(60), move || async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(summary())
                })
                .await?;
            assert_eq!(value, summary());
        }
        // Every read recomputes while the cache is unreachable.
        assert_eq!(computations.load(Ordering::SeqCst), 3);
        // Invalidation must not error either.
        cache.invalidate(tenant).await;
        Ok(())
    }
}
