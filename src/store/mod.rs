//! Shared TTL key/value state for rate counters, sessions, and cached metrics.
//!
//! Everything that crosses requests outside the durable directory lives here,
//! under disjoint key prefixes so components cannot collide. Backends are
//! interchangeable: an in-process map for tests and single-node deployments,
//! and Postgres for multi-instance deployments. A failed operation always
//! surfaces as [`StoreUnavailable`]; each dependent component decides whether
//! that means "fail open" (rate limiting, metrics) or "deny" (sessions,
//! verification).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

mod memory;
mod postgres;

pub use memory::MemoryCounterStore;
pub use postgres::PgCounterStore;

/// The counter store could not answer (backend down, timed out, or corrupt).
///
/// Internal-only: dependents convert this into their degraded or deny
/// behavior instead of exposing it to portal users.
#[derive(Debug, thiserror::Error)]
#[error("counter store unavailable: {0}")]
pub struct StoreUnavailable(pub anyhow::Error);

impl From<anyhow::Error> for StoreUnavailable {
    fn from(err: anyhow::Error) -> Self {
        Self(err)
    }
}

/// Counter state after an increment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CounterSlot {
    /// Value after this increment; the first increment in a window yields 1.
    pub count: u64,
    /// When the window ends and the counter disappears.
    pub expires_at: DateTime<Utc>,
}

/// Shared, TTL-capable key/value backend.
///
/// Absence is a normal answer, not an error: an expired entry must behave
/// exactly like one that was never written, whether or not the backend has
/// physically evicted it.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment the integer counter at `key`, creating it with `window` as
    /// its lifetime when absent or expired. The window does not slide on
    /// subsequent increments.
    async fn increment(&self, key: &str, window: Duration) -> Result<CounterSlot, StoreUnavailable>;

    /// Fetch the value at `key`, or `None` when absent or expired.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreUnavailable>;

    /// Store `value` at `key` for `ttl`, replacing any previous entry.
    async fn put(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StoreUnavailable>;

    /// Replace the value at `key` and restart its `ttl`, but only while a
    /// live entry is present; returns whether one was. An absent or expired
    /// entry stays absent.
    async fn update(
        &self,
        key: &str,
        value: &[u8],
        ttl: Duration,
    ) -> Result<bool, StoreUnavailable>;

    /// Remove `key`. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StoreUnavailable>;
}

/// Key builders for the disjoint namespaces each component owns.
pub(crate) mod keys {
    use uuid::Uuid;

    pub(crate) fn rate_limit(action: &str, identifier: &str) -> String {
        format!("ratelimit:{action}:{identifier}")
    }

    pub(crate) fn session(token_digest: &str) -> String {
        format!("session:{token_digest}")
    }

    pub(crate) fn session_fence(subject: Uuid) -> String {
        format!("sessionfence:{subject}")
    }

    pub(crate) fn metrics(tenant_id: Uuid) -> String {
        format!("metrics:{tenant_id}")
    }
}

/// Absolute expiry for a TTL starting at `now`, saturating far in the future
/// rather than overflowing.
pub(crate) fn expiry_after(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
