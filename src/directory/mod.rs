//! Read and bookkeeping contracts against the durable business database.
//!
//! The portal's relational database owns tenants and their accounts; this
//! crate only reads the identity fields it needs and writes login
//! bookkeeping (failure counters, lockout deadlines, last-login stamps).
//! These are authoritative security records, so unlike the counter store,
//! failures here are loud: callers get the error instead of a degraded
//! fallback. Account provisioning itself belongs to the host application.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use uuid::Uuid;

mod memory;
mod postgres;

pub use memory::MemoryDirectory;
pub use postgres::PgDirectory;

/// Identity and login-bookkeeping fields of one portal account.
#[derive(Clone, Debug)]
pub struct AccountRecord {
    pub account_id: Uuid,
    /// Normalized login email, unique across all tenants.
    pub email: String,
    /// Salted hash of the account secret in PHC string format.
    pub password_hash: String,
    /// The one tenant this account belongs to.
    pub tenant_id: Uuid,
    pub enabled: bool,
    /// Consecutive failed logins since the last success.
    pub failed_attempts: u32,
    /// Lockout deadline; a value in the past means unlocked.
    pub locked_until: Option<DateTime<Utc>>,
    pub last_login_at: Option<DateTime<Utc>>,
}

/// Tenant fields the login path cares about.
#[derive(Clone, Debug)]
pub struct TenantRecord {
    pub tenant_id: Uuid,
    /// Official business registry code, when the tenant has one on file.
    pub registry_code: Option<String>,
}

#[async_trait]
pub trait Directory: Send + Sync {
    /// Look up an account by its normalized email.
    async fn find_account_by_email(&self, email: &str) -> Result<Option<AccountRecord>>;

    async fn find_tenant(&self, tenant_id: Uuid) -> Result<Option<TenantRecord>>;

    /// Bump the consecutive-failure counter and return the new count.
    async fn register_failed_attempt(&self, account_id: Uuid) -> Result<u32>;

    async fn set_lockout(&self, account_id: Uuid, until: DateTime<Utc>) -> Result<()>;

    /// Reset failure bookkeeping and stamp the login time.
    async fn record_login_success(&self, account_id: Uuid, at: DateTime<Utc>) -> Result<()>;
}

/// Normalize an email for lookups and comparisons.
#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Basic shape check on an already-normalized email.
#[must_use]
pub fn valid_email(email: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|regex| regex.is_match(email))
}

/// Normalize a business registry code for comparison: keep alphanumerics,
/// uppercased. `12.345.678/0001-95` and `12345678000195` compare equal.
#[must_use]
pub fn normalize_registry_code(code: &str) -> String {
    code.chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_uppercase())
        .collect()
}
