//! One state value owning every component, wired from a [`PortalConfig`].
//!
//! Flow Overview:
//!
//! 1) `login` runs rate-limited credential verification, resolves the role,
//!    and issues a session.
//! 2) `authenticate` turns a presented token back into an authenticated
//!    context; the host's middleware calls it once per request.
//! 3) `permissions` answers action and tenant-scope questions for handlers.
//! 4) `dashboard` serves per-tenant aggregates through the metrics cache.
//!
//! The host hands in the two storage seams (directory and counter store) and
//! keeps ownership of HTTP, rendering, and the business schema.

use crate::access::{PermissionTable, Role, RoleResolver};
use crate::auth::{CredentialVerifier, LockoutPolicy, VerifyError};
use crate::config::PortalConfig;
use crate::directory::Directory;
use crate::metrics::MetricsCache;
use crate::rate_limit::RateLimiter;
use crate::session::{SessionError, SessionHandle, SessionManager};
use crate::store::{CounterStore, StoreUnavailable};
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Serialize, de::DeserializeOwned};
use std::future::Future;
use std::sync::Arc;
use uuid::Uuid;

/// Everything the host needs to set a session cookie and render the
/// post-login landing page.
#[derive(Debug)]
pub struct LoginSession {
    pub account_id: Uuid,
    pub email: String,
    pub role: Role,
    pub tenant_scope: Option<Uuid>,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum LoginError {
    /// The attempt was refused; map to a client response per variant.
    #[error(transparent)]
    Verify(#[from] VerifyError),

    /// Credentials were fine but no session could be issued; a server
    /// error, not a login refusal.
    #[error("session issuance failed: {0}")]
    Session(anyhow::Error),
}

pub struct PortalCore {
    config: PortalConfig,
    verifier: CredentialVerifier,
    sessions: SessionManager,
    roles: RoleResolver,
    permissions: PermissionTable,
    metrics: MetricsCache,
}

impl PortalCore {
    #[must_use]
    pub fn new(
        config: PortalConfig,
        directory: Arc<dyn Directory>,
        store: Arc<dyn CounterStore>,
    ) -> Self {
        let verifier = CredentialVerifier::new(
            directory,
            RateLimiter::new(Arc::clone(&store)),
            LockoutPolicy::new(config.lockout_threshold(), config.lockout_duration()),
            config.login_rate_limit(),
            config.login_rate_window(),
        );
        let sessions = SessionManager::new(Arc::clone(&store), config.session_ttl());
        let roles = RoleResolver::new(config.admin_emails());
        let metrics = MetricsCache::new(store, config.compute_timeout());
        Self {
            config,
            verifier,
            sessions,
            roles,
            permissions: PermissionTable::defaults(),
            metrics,
        }
    }

    /// Verify credentials and start a session.
    pub async fn login(
        &self,
        identifier: &str,
        secret: &SecretString,
        tenant_identity: Option<&str>,
    ) -> Result<LoginSession, LoginError> {
        let identity = self
            .verifier
            .verify(identifier, secret, tenant_identity)
            .await?;
        let assignment = self.roles.resolve(&identity);
        let issued = self
            .sessions
            .create(identity.account_id, assignment.role, assignment.tenant_scope)
            .await
            .map_err(LoginError::Session)?;
        Ok(LoginSession {
            account_id: identity.account_id,
            email: identity.email,
            role: assignment.role,
            tenant_scope: assignment.tenant_scope,
            token: issued.token,
            expires_at: issued.expires_at,
        })
    }

    /// Resolve a presented session token, sliding its expiry.
    pub async fn authenticate(&self, token: &str) -> Result<SessionHandle, SessionError> {
        self.sessions.validate(token).await
    }

    /// End one session; idempotent.
    pub async fn logout(&self, token: &str) -> Result<(), StoreUnavailable> {
        self.sessions.revoke(token).await
    }

    /// End every session the subject holds, for password changes and
    /// deactivations.
    pub async fn logout_all(&self, subject: Uuid) -> Result<(), StoreUnavailable> {
        self.sessions.revoke_all(subject).await
    }

    /// Per-tenant dashboard aggregate through the metrics cache.
    pub async fn dashboard<T, F, Fut>(&self, tenant_id: Uuid, compute: F) -> anyhow::Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        self.metrics
            .get_or_compute(tenant_id, self.config.metrics_ttl(), compute)
            .await
    }

    /// Drop a tenant's cached aggregate after its records changed.
    pub async fn invalidate_dashboard(&self, tenant_id: Uuid) {
        self.metrics.invalidate(tenant_id).await;
    }

    #[must_use]
    pub fn config(&self) -> &PortalConfig {
        &self.config
    }

    #[must_use]
    pub fn permissions(&self) -> &PermissionTable {
        &self.permissions
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }
}
