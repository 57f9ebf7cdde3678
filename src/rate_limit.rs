//! Fixed-window rate limiting over the shared counter store.
//!
//! Availability beats abuse protection here: when the store cannot answer,
//! the request is allowed and the decision is marked degraded so the
//! fallback is visible in logs. Everything else about a tenant's data still
//! sits behind credential and session checks, which fail closed.

use crate::store::{CounterStore, keys};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Outcome of one rate-limit check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    /// Attempts left in the window after this one; 0 when denied.
    pub remaining: u32,
    /// Time until the window resets, suitable for a Retry-After header.
    pub reset_after: Duration,
    /// True when the store was unreachable and the limiter failed open.
    pub degraded: bool,
}

#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self { store }
    }

    /// Count this attempt and decide whether it may proceed.
    ///
    /// The counter is per `(action, identifier)` and counts every attempt,
    /// allowed or not, so hammering a denied identifier keeps it denied.
    pub async fn allow(
        &self,
        action: &str,
        identifier: &str,
        limit: u32,
        window: Duration,
    ) -> RateDecision {
        let key = keys::rate_limit(action, identifier);
        match self.store.increment(&key, window).await {
            Ok(slot) => {
                let allowed = slot.count <= u64::from(limit);
                let remaining =
                    u32::try_from(u64::from(limit).saturating_sub(slot.count)).unwrap_or(0);
                let reset_after = (slot.expires_at - Utc::now())
                    .to_std()
                    .unwrap_or(Duration::ZERO);
                if !allowed {
                    warn!(
                        action,
                        identifier,
                        count = slot.count,
                        limit,
                        "rate limit exceeded"
                    );
                }
                RateDecision {
                    allowed,
                    remaining,
                    reset_after,
                    degraded: false,
                }
            }
            Err(err) => {
                warn!(
                    action,
                    identifier,
                    "counter store unavailable, allowing without rate limit: {err}"
                );
                RateDecision {
                    allowed: true,
                    remaining: limit.saturating_sub(1),
                    reset_after: window,
                    degraded: true,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{CounterSlot, MemoryCounterStore, StoreUnavailable};
    use anyhow::anyhow;
    use async_trait::async_trait;

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
    async fn allows_up_to_the_limit_then_denies() {
        let limiter = RateLimiter::new(Arc::new(MemoryCounterStore::new()));
        let window = Duration::from_secs(60);
        for expected_remaining in [2, 1, 0] {
            let decision = limiter.allow("login", "a@example.com", 3, window).await;
            assert!(decision.allowed);
            assert!(!decision.degraded);
            assert_eq!(decision.remaining, expected_remaining);
        }
        let decision = limiter.allow("login", "a@example.com", 3, window).await;
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);
        assert!(decision.reset_after > Duration::ZERO);
    }

    #[tokio::test]
    async fn identifiers_and_actions_are_counted_separately() {
        let limiter = RateLimiter::new(Arc::new(MemoryCounterStore::new()));
        let window = Duration::from_secs(60);
        let _ = limiter.allow("login", "a@example.com", 1, window).await;
        let denied = limiter.allow("login", "a@example.com", 1, window).await;
        assert!(!denied.allowed);
        let other_identifier = limiter.allow("login", "b@example.com", 1, window).await;
        assert!(other_identifier.allowed);
        let other_action = limiter.allow("reset", "a@example.com", 1, window).await;
        assert!(other_action.allowed);
    }

    #[tokio::test]
    async fn window_expiry_resets_the_count() {
        let limiter = RateLimiter::new(Arc::new(MemoryCounterStore::new()));
        let window = Duration::from_millis(100);
        let _ = limiter.allow("login", "a@example.com", 1, window).await;
        let denied = limiter.allow("login", "a@example.com", 1, window).await;
        assert!(!denied.allowed);
        tokio::time::sleep(Duration::from_millis(250)).await;
        let decision = limiter.allow("login", "a@example.com", 1, window).await;
        assert!(decision.allowed);
    }

    #[tokio::test]
    async fn unavailable_store_fails_open_and_marks_degraded() {
        let limiter = RateLimiter::new(Arc::new(DownStore));
        let window = Duration::from_secs(60);
        for _ in 0..10 {
            let decision = limiter.allow("login", "a@example.com", 3, window).await;
            assert!(decision.allowed);
            assert!(decision.degraded);
        }
    }
}
