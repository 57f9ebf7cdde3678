//! Login verification outcomes that are not a success.

use std::time::Duration;

/// Why a login was refused.
///
/// Display strings are safe to show to the person logging in; everything more
/// specific goes to the audit log instead. `InvalidCredentials` deliberately
/// covers both unknown identifiers and wrong secrets.
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("invalid credentials")]
    InvalidCredentials,

    /// The supplied tenant identity value does not belong to the account's
    /// tenant.
    #[error("invalid credentials for this organization")]
    TenantMismatch,

    #[error("account access is disabled")]
    AccessDisabled,

    #[error("account temporarily locked; retry in {}s", .retry_after.as_secs())]
    TemporarilyLocked { retry_after: Duration },

    #[error("too many attempts; retry in {}s", .retry_after.as_secs())]
    RateLimited { retry_after: Duration },

    /// The authoritative directory failed mid-verification. Not a login
    /// outcome; surfaces as a server error, never as "invalid credentials".
    #[error("account directory error: {0}")]
    Directory(anyhow::Error),
}
