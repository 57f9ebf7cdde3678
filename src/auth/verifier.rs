//! The login decision.
//!
//! Flow Overview:
//!
//! 1) Gate on the login rate limit for the normalized identifier.
//! 2) Resolve the account; unknown identifiers fail generically.
//! 3) Refuse disabled accounts, then currently locked ones.
//! 4) Compare the secret against the stored salted hash; a mismatch counts
//!    toward the lockout threshold.
//! 5) Cross-check the optional tenant identity value; a mismatch counts like
//!    a wrong secret.
//! 6) On success, reset the failure bookkeeping and stamp the login time.
//!
//! Security boundaries: the lockout check always precedes the secret
//! comparison, so a locked account never confirms whether a guess was right.
//! Every refusal is logged with its specific reason while the returned error
//! stays generic.

use super::error::VerifyError;
use super::lockout::{LockoutPolicy, LockoutStatus};
use super::password::verify_password;
use crate::directory::{AccountRecord, Directory, normalize_email, normalize_registry_code};
use crate::rate_limit::RateLimiter;
use chrono::Utc;
use secrecy::SecretString;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Rate-limit action name for login attempts.
pub const LOGIN_ACTION: &str = "login";

/// Identity facts established by a successful verification.
///
/// Only [`CredentialVerifier::verify`] constructs this, which is what lets
/// role resolution trust it without re-checking anything.
#[derive(Clone, Debug)]
pub struct VerifiedIdentity {
    pub account_id: Uuid,
    /// Normalized login email.
    pub email: String,
    pub tenant_id: Uuid,
}

pub struct CredentialVerifier {
    directory: Arc<dyn Directory>,
    rate_limiter: RateLimiter,
    lockout: LockoutPolicy,
    login_limit: u32,
    login_window: Duration,
}

impl CredentialVerifier {
    #[must_use]
    pub fn new(
        directory: Arc<dyn Directory>,
        rate_limiter: RateLimiter,
        lockout: LockoutPolicy,
        login_limit: u32,
        login_window: Duration,
    ) -> Self {
        Self {
            directory,
            rate_limiter,
            lockout,
            login_limit,
            login_window,
        }
    }

    /// Verify a login attempt.
    ///
    /// `tenant_identity` is the optional organization registry code typed at
    /// the login form. When present it must match the account's tenant; an
    /// empty string is still checked, so callers that treat blank form input
    /// as absent must pass `None`.
    pub async fn verify(
        &self,
        identifier: &str,
        secret: &SecretString,
        tenant_identity: Option<&str>,
    ) -> Result<VerifiedIdentity, VerifyError> {
        let email = normalize_email(identifier);

        let decision = self
            .rate_limiter
            .allow(LOGIN_ACTION, &email, self.login_limit, self.login_window)
            .await;
        if !decision.allowed {
            warn!(email = %email, outcome = "rate_limited", "login rejected");
            return Err(VerifyError::RateLimited {
                retry_after: decision.reset_after,
            });
        }

        let Some(account) = self
            .directory
            .find_account_by_email(&email)
            .await
            .map_err(directory_error)?
        else {
            warn!(email = %email, outcome = "unknown_account", "login rejected");
            return Err(VerifyError::InvalidCredentials);
        };

        if !account.enabled {
            warn!(email = %email, outcome = "disabled", "login rejected");
            return Err(VerifyError::AccessDisabled);
        }

        let now = Utc::now();
        let status = LockoutStatus::of(&account, now);
        if let LockoutStatus::Locked { .. } = status {
            let retry_after = status.remaining(now).unwrap_or(Duration::ZERO);
            warn!(
                email = %email,
                outcome = "locked",
                retry_after_seconds = retry_after.as_secs(),
                "login rejected"
            );
            return Err(VerifyError::TemporarilyLocked { retry_after });
        }

        if !verify_password(secret, &account.password_hash) {
            self.register_failure(&account, "bad_secret").await?;
            return Err(VerifyError::InvalidCredentials);
        }

        if let Some(supplied) = tenant_identity {
            let tenant = self
                .directory
                .find_tenant(account.tenant_id)
                .await
                .map_err(directory_error)?
                .ok_or_else(|| {
                    directory_error(anyhow::anyhow!(
                        "tenant {} missing for account {}",
                        account.tenant_id,
                        account.account_id
                    ))
                })?;
            let matches = tenant
                .registry_code
                .as_deref()
                .is_some_and(|stored| {
                    normalize_registry_code(supplied) == normalize_registry_code(stored)
                });
            if !matches {
                self.register_failure(&account, "tenant_mismatch").await?;
                return Err(VerifyError::TenantMismatch);
            }
        }

        self.directory
            .record_login_success(account.account_id, Utc::now())
            .await
            .map_err(directory_error)?;
        info!(
            email = %email,
            account_id = %account.account_id,
            tenant_id = %account.tenant_id,
            outcome = "success",
            "login verified"
        );
        Ok(VerifiedIdentity {
            account_id: account.account_id,
            email,
            tenant_id: account.tenant_id,
        })
    }

    /// Count one failed attempt and arm the lockout when the threshold is
    /// reached. The counter only resets on success, so a failure right after
    /// a lock expires re-arms a full lockout immediately.
    async fn register_failure(
        &self,
        account: &AccountRecord,
        outcome: &'static str,
    ) -> Result<(), VerifyError> {
        let failures = self
            .directory
            .register_failed_attempt(account.account_id)
            .await
            .map_err(directory_error)?;
        if self.lockout.should_lock(failures) {
            let until = self.lockout.lock_until(Utc::now());
            self.directory
                .set_lockout(account.account_id, until)
                .await
                .map_err(directory_error)?;
            warn!(
                email = %account.email,
                outcome = outcome,
                failures,
                locked_until = %until,
                "login rejected; account locked"
            );
        } else {
            warn!(email = %account.email, outcome = outcome, failures, "login rejected");
        }
        Ok(())
    }
}

fn directory_error(err: anyhow::Error) -> VerifyError {
    error!("Account directory failure during verification: {err:#}");
    VerifyError::Directory(err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::password::hash_password;
    use crate::directory::MemoryDirectory;
    use crate::store::MemoryCounterStore;
    use anyhow::Result;

    const SECRET: &str = "teste123";

    struct Rig {
        verifier: CredentialVerifier,
        directory: Arc<MemoryDirectory>,
        account_id: Uuid,
        tenant_id: Uuid,
    }

    async fn rig(threshold: u32, lock_for: Duration, login_limit: u32) -> Result<Rig> {
        let directory = Arc::new(MemoryDirectory::new());
        let tenant_id = directory.insert_tenant(Some("12.345.678/0001-95")).await;
        let hash = hash_password(&SecretString::from(SECRET))?;
        let account_id = directory
            .insert_account("joao@empresa.com", &hash, tenant_id)
            .await;
        let verifier = CredentialVerifier::new(
            Arc::clone(&directory) as Arc<dyn Directory>,
            RateLimiter::new(Arc::new(MemoryCounterStore::new())),
            LockoutPolicy::new(threshold, lock_for),
            login_limit,
            Duration::from_secs(900),
        );
        Ok(Rig {
            verifier,
            directory,
            account_id,
            tenant_id,
        })
    }

    #[tokio::test]
    async fn valid_credentials_verify_and_stamp_the_login() -> Result<()> {
        let rig = rig(5, Duration::from_secs(1800), 100).await?;
        let identity = rig
            .verifier
            .verify("  Joao@Empresa.COM ", &SecretString::from(SECRET), None)
            .await
            .unwrap();
        assert_eq!(identity.account_id, rig.account_id);
        assert_eq!(identity.tenant_id, rig.tenant_id);
        assert_eq!(identity.email, "joao@empresa.com");
        let account = rig.directory.account(rig.account_id).await.unwrap();
        assert!(account.last_login_at.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn unknown_identifier_fails_generically() -> Result<()> {
        let rig = rig(5, Duration::from_secs(1800), 100).await?;
        let err = rig
            .verifier
            .verify("nobody@empresa.com", &SecretString::from(SECRET), None)
            .await
            .unwrap_err();
        assert!(matches!(err, VerifyError::InvalidCredentials));
        Ok(())
    }

    #[tokio::test]
    async fn wrong_secret_counts_toward_lockout() -> Result<()> {
        let rig = rig(5, Duration::from_secs(1800), 100).await?;
        let err = rig
            .verifier
            .verify("joao@empresa.com", &SecretString::from("wrong"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, VerifyError::InvalidCredentials));
        let account = rig.directory.account(rig.account_id).await.unwrap();
        assert_eq!(account.failed_attempts, 1);
        assert!(account.locked_until.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn lockout_arms_at_threshold_and_blocks_the_correct_secret() -> Result<()> {
        let rig = rig(2, Duration::from_secs(1800), 100).await?;
        for _ in 0..2 {
            let _ = rig
                .verifier
                .verify("joao@empresa.com", &SecretString::from("wrong"), None)
                .await;
        }
        let account = rig.directory.account(rig.account_id).await.unwrap();
        assert!(account.locked_until.is_some());
        let err = rig
            .verifier
            .verify("joao@empresa.com", &SecretString::from(SECRET), None)
            .await
            .unwrap_err();
        assert!(matches!(err, VerifyError::TemporarilyLocked { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn locked_account_does_not_reveal_secret_validity() -> Result<()> {
        let rig = rig(1, Duration::from_secs(1800), 100).await?;
        let _ = rig
            .verifier
            .verify("joao@empresa.com", &SecretString::from("wrong"), None)
            .await;
        let err = rig
            .verifier
            .verify("joao@empresa.com", &SecretString::from("wrong-again"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, VerifyError::TemporarilyLocked { .. }));
        // Nothing counted while locked.
        let account = rig.directory.account(rig.account_id).await.unwrap();
        assert_eq!(account.failed_attempts, 1);
        Ok(())
    }

    #[tokio::test]
    async fn success_resets_the_failure_count() -> Result<()> {
        let rig = rig(5, Duration::from_secs(1800), 100).await?;
        let _ = rig
            .verifier
            .verify("joao@empresa.com", &SecretString::from("wrong"), None)
            .await;
        rig.verifier
            .verify("joao@empresa.com", &SecretString::from(SECRET), None)
            .await
            .unwrap();
        let account = rig.directory.account(rig.account_id).await.unwrap();
        assert_eq!(account.failed_attempts, 0);
        Ok(())
    }

    #[tokio::test]
    async fn disabled_account_is_refused_before_the_secret_check() -> Result<()> {
        let rig = rig(5, Duration::from_secs(1800), 100).await?;
        rig.directory.set_enabled(rig.account_id, false).await;
        let err = rig
            .verifier
            .verify("joao@empresa.com", &SecretString::from("wrong"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, VerifyError::AccessDisabled));
        let account = rig.directory.account(rig.account_id).await.unwrap();
        assert_eq!(account.failed_attempts, 0);
        Ok(())
    }

    #[tokio::test]
    async fn tenant_identity_mismatch_counts_like_a_wrong_secret() -> Result<()> {
        let rig = rig(5, Duration::from_secs(1800), 100).await?;
        let err = rig
            .verifier
            .verify(
                "joao@empresa.com",
                &SecretString::from(SECRET),
                Some("99.999.999/0001-99"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, VerifyError::TenantMismatch));
        let account = rig.directory.account(rig.account_id).await.unwrap();
        assert_eq!(account.failed_attempts, 1);
        Ok(())
    }

    #[tokio::test]
    async fn tenant_identity_comparison_ignores_punctuation() -> Result<()> {
        let rig = rig(5, Duration::from_secs(1800), 100).await?;
        rig.verifier
            .verify(
                "joao@empresa.com",
                &SecretString::from(SECRET),
                Some("12345678000195"),
            )
            .await
            .unwrap();
        Ok(())
    }

    #[tokio::test]
    async fn rate_limit_applies_before_everything_else() -> Result<()> {
        let rig = rig(5, Duration::from_secs(1800), 2).await?;
        for _ in 0..2 {
            let _ = rig
                .verifier
                .verify("joao@empresa.com", &SecretString::from("wrong"), None)
                .await;
        }
        // Third attempt hits the limiter even with the correct secret, and
        // the account itself stays untouched.
        let err = rig
            .verifier
            .verify("joao@empresa.com", &SecretString::from(SECRET), None)
            .await
            .unwrap_err();
        let VerifyError::RateLimited { retry_after } = err else {
            panic!("expected RateLimited, got {err:?}");
        };
        assert!(retry_after > Duration::ZERO);
        let account = rig.directory.account(rig.account_id).await.unwrap();
        assert_eq!(account.failed_attempts, 2);
        Ok(())
    }

    #[tokio::test]
    async fn expired_lock_admits_the_correct_secret() -> Result<()> {
        let rig = rig(2, Duration::from_millis(100), 100).await?;
        for _ in 0..2 {
            let _ = rig
                .verifier
                .verify("joao@empresa.com", &SecretString::from("wrong"), None)
                .await;
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
        rig.verifier
            .verify("joao@empresa.com", &SecretString::from(SECRET), None)
            .await
            .unwrap();
        let account = rig.directory.account(rig.account_id).await.unwrap();
        assert_eq!(account.failed_attempts, 0);
        assert!(account.locked_until.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn failure_after_an_expired_lock_rearms_immediately() -> Result<()> {
        let rig = rig(2, Duration::from_millis(100), 100).await?;
        for _ in 0..2 {
            let _ = rig
                .verifier
                .verify("joao@empresa.com", &SecretString::from("wrong"), None)
                .await;
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
        let err = rig
            .verifier
            .verify("joao@empresa.com", &SecretString::from("wrong"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, VerifyError::InvalidCredentials));
        // The stale counter was still at the threshold, so that one failure
        // locked the account again.
        let account = rig.directory.account(rig.account_id).await.unwrap();
        assert!(account.locked_until.is_some_and(|until| until > Utc::now()));
        let err = rig
            .verifier
            .verify("joao@empresa.com", &SecretString::from(SECRET), None)
            .await
            .unwrap_err();
        assert!(matches!(err, VerifyError::TemporarilyLocked { .. }));
        Ok(())
    }
}
