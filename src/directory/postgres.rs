//! Postgres-backed directory over the host application's schema.
//!
//! Reads `portal_accounts` and `portal_tenants` (see `db/sql/01_portal.sql`).
//! The host owns those tables and their migrations; this module assumes the
//! columns exist and treats any query failure as fatal for the request.

use super::{AccountRecord, Directory, TenantRecord};
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};
use std::future::Future;
use std::time::Duration;
use tracing::Instrument;
use uuid::Uuid;

const DEFAULT_OP_TIMEOUT: Duration = Duration::from_millis(2_000);

pub struct PgDirectory {
    pool: PgPool,
    op_timeout: Duration,
}

impl PgDirectory {
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

    async fn bounded<T>(
        &self,
        op: &'static str,
        query: impl Future<Output = Result<T>> + Send,
    ) -> Result<T> {
        match tokio::time::timeout(self.op_timeout, query).await {
            Ok(result) => result,
            Err(_) => Err(anyhow!("{op} timed out after {:?}", self.op_timeout)),
        }
    }
}

fn account_from_row(row: &PgRow) -> AccountRecord {
    AccountRecord {
        account_id: row.get("id"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        tenant_id: row.get("tenant_id"),
        enabled: row.get("enabled"),
        failed_attempts: u32::try_from(row.get::<i32, _>("failed_attempts")).unwrap_or(0),
        locked_until: row.get("locked_until"),
        last_login_at: row.get("last_login_at"),
    }
}

#[async_trait]
impl Directory for PgDirectory {
    async fn find_account_by_email(&self, email: &str) -> Result<Option<AccountRecord>> {
        let query = "SELECT id, email, password_hash, tenant_id, enabled, \
             failed_attempts, locked_until, last_login_at \
             FROM portal_accounts WHERE email = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = self
            .bounded("account lookup", async {
                sqlx::query(query)
                    .bind(email)
                    .fetch_optional(&self.pool)
                    .instrument(span)
                    .await
                    .context("Failed to lookup account")
            })
            .await?;
        Ok(row.as_ref().map(account_from_row))
    }

    async fn find_tenant(&self, tenant_id: Uuid) -> Result<Option<TenantRecord>> {
        let query = "SELECT id, registry_code FROM portal_tenants WHERE id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = self
            .bounded("tenant lookup", async {
                sqlx::query(query)
                    .bind(tenant_id)
                    .fetch_optional(&self.pool)
                    .instrument(span)
                    .await
                    .context("Failed to lookup tenant")
            })
            .await?;
        Ok(row.map(|row| TenantRecord {
            tenant_id: row.get("id"),
            registry_code: row.get("registry_code"),
        }))
    }

    async fn register_failed_attempt(&self, account_id: Uuid) -> Result<u32> {
        let query = "UPDATE portal_accounts \
             SET failed_attempts = failed_attempts + 1, updated_at = NOW() \
             WHERE id = $1 RETURNING failed_attempts";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let row = self
            .bounded("failure bookkeeping", async {
                sqlx::query(query)
                    .bind(account_id)
                    .fetch_optional(&self.pool)
                    .instrument(span)
                    .await
                    .context("Failed to register failed attempt")
            })
            .await?
            .ok_or_else(|| anyhow!("account {account_id} disappeared during failure bookkeeping"))?;
        Ok(u32::try_from(row.get::<i32, _>("failed_attempts")).unwrap_or(u32::MAX))
    }

    async fn set_lockout(&self, account_id: Uuid, until: DateTime<Utc>) -> Result<()> {
        let query = "UPDATE portal_accounts \
             SET locked_until = $2, updated_at = NOW() WHERE id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        self.bounded("lockout write", async {
            sqlx::query(query)
                .bind(account_id)
                .bind(until)
                .execute(&self.pool)
                .instrument(span)
                .await
                .context("Failed to set lockout")
        })
        .await?;
        Ok(())
    }

    async fn record_login_success(&self, account_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        let query = "UPDATE portal_accounts \
             SET failed_attempts = 0, locked_until = NULL, last_login_at = $2, updated_at = NOW() \
             WHERE id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        self.bounded("success bookkeeping", async {
            sqlx::query(query)
                .bind(account_id)
                .bind(at)
                .execute(&self.pool)
                .instrument(span)
                .await
                .context("Failed to record login success")
        })
        .await?;
        Ok(())
    }
}
