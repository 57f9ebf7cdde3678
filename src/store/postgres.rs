//! Postgres-backed counter store.
//!
//! All entries share the `portal_kv` table (see `db/sql/01_portal.sql`): a
//! counter uses the `count` column, an opaque value the `value` column, and
//! both ride the same `expires_at`. The table is UNLOGGED because every entry is
//! reconstructible state with a TTL; losing it on a crash costs at most some
//! re-login and recomputation. Every operation runs under a deadline so a
//! stalled database turns into [`StoreUnavailable`] instead of a hung login.

use super::{CounterSlot, CounterStore, StoreUnavailable};
use anyhow::{Context, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use std::future::Future;
use std::time::Duration;
use tracing::Instrument;

const DEFAULT_OP_TIMEOUT: Duration = Duration::from_millis(2_000);

pub struct PgCounterStore {
    pool: PgPool,
    op_timeout: Duration,
}

impl PgCounterStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            op_timeout: DEFAULT_OP_TIMEOUT,
        }
    }

    /// Replace the per-operation deadline.
    #[must_use]
    pub fn with_op_timeout(mut self, op_timeout: Duration) -> Self {
        self.op_timeout = op_timeout;
        self
    }

    /// Drop entries whose TTL has passed; returns how many were removed.
    ///
    /// Reads already ignore expired rows, so this only reclaims space and can
    /// run from a maintenance task at any cadence.
    pub async fn purge_expired(&self) -> Result<u64, StoreUnavailable> {
        let query = "DELETE FROM portal_kv WHERE expires_at <= NOW()";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let result = self
            .bounded("purge expired entries", async {
                sqlx::query(query)
                    .execute(&self.pool)
                    .instrument(span)
                    .await
                    .context("Failed to purge expired entries")
            })
            .await?;
        Ok(result.rows_affected())
    }

    async fn bounded<T>(
        &self,
        op: &'static str,
        query: impl Future<Output = anyhow::Result<T>> + Send,
    ) -> Result<T, StoreUnavailable> {
        match tokio::time::timeout(self.op_timeout, query).await {
            Ok(result) => result.map_err(StoreUnavailable::from),
            Err(_) => Err(StoreUnavailable::from(anyhow!(
                "{op} timed out after {:?}",
                self.op_timeout
            ))),
        }
    }
}

#[async_trait]
impl CounterStore for PgCounterStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<CounterSlot, StoreUnavailable> {
        // An expired row is dead weight until the next purge; treat it as
        // absent so the counter restarts with a fresh window.
        let query = "INSERT INTO portal_kv (key, count, value, expires_at) \
             VALUES ($1, 1, NULL, NOW() + ($2 * INTERVAL '1 second')) \
             ON CONFLICT (key) DO UPDATE SET \
                 count = CASE WHEN portal_kv.expires_at <= NOW() THEN 1 ELSE portal_kv.count + 1 END, \
                 value = CASE WHEN portal_kv.expires_at <= NOW() THEN NULL ELSE portal_kv.value END, \
                 expires_at = CASE WHEN portal_kv.expires_at <= NOW() \
                     THEN NOW() + ($2 * INTERVAL '1 second') ELSE portal_kv.expires_at END \
             RETURNING count, expires_at";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        let window_seconds = i64::try_from(window.as_secs()).unwrap_or(i64::MAX);
        let row = self
            .bounded("counter increment", async {
                sqlx::query(query)
                    .bind(key)
                    .bind(window_seconds)
                    .fetch_one(&self.pool)
                    .instrument(span)
                    .await
                    .context("Failed to increment counter")
            })
            .await?;
        let count: i64 = row.get("count");
        let expires_at: DateTime<Utc> = row.get("expires_at");
        Ok(CounterSlot {
            count: u64::try_from(count).unwrap_or(0),
            expires_at,
        })
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreUnavailable> {
        let query = "SELECT value FROM portal_kv WHERE key = $1 AND expires_at > NOW()";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = self
            .bounded("value lookup", async {
                sqlx::query(query)
                    .bind(key)
                    .fetch_optional(&self.pool)
                    .instrument(span)
                    .await
                    .context("Failed to lookup value")
            })
            .await?;
        Ok(row.and_then(|row| row.get::<Option<Vec<u8>>, _>("value")))
    }

    async fn put(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StoreUnavailable> {
        let query = "INSERT INTO portal_kv (key, count, value, expires_at) \
             VALUES ($1, 0, $2, NOW() + ($3 * INTERVAL '1 second')) \
             ON CONFLICT (key) DO UPDATE SET \
                 count = 0, value = EXCLUDED.value, expires_at = EXCLUDED.expires_at";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        let ttl_seconds = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        self.bounded("value upsert", async {
            sqlx::query(query)
                .bind(key)
                .bind(value)
                .bind(ttl_seconds)
                .execute(&self.pool)
                .instrument(span)
                .await
                .context("Failed to store value")
        })
        .await?;
        Ok(())
    }

    async fn update(
        &self,
        key: &str,
        value: &[u8],
        ttl: Duration,
    ) -> Result<bool, StoreUnavailable> {
        // The expires_at guard makes replace-if-present atomic: an expired or
        // deleted row never comes back through this path.
        let query = "UPDATE portal_kv \
             SET value = $2, expires_at = NOW() + ($3 * INTERVAL '1 second') \
             WHERE key = $1 AND expires_at > NOW()";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let ttl_seconds = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        let result = self
            .bounded("value update", async {
                sqlx::query(query)
                    .bind(key)
                    .bind(value)
                    .bind(ttl_seconds)
                    .execute(&self.pool)
                    .instrument(span)
                    .await
                    .context("Failed to update value")
            })
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreUnavailable> {
        let query = "DELETE FROM portal_kv WHERE key = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        // Deleting an absent key is a no-op by contract; rows_affected is not
        // checked.
        self.bounded("value delete", async {
            sqlx::query(query)
                .bind(key)
                .execute(&self.pool)
                .instrument(span)
                .await
                .context("Failed to delete value")
        })
        .await?;
        Ok(())
    }
}
