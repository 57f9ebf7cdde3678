//! Opaque session tokens over the counter store.
//!
//! Flow Overview:
//!
//! 1) `create` draws 32 bytes from the OS RNG and hands the encoded token to
//!    the caller; the store only ever sees its SHA-256 digest.
//! 2) `validate` resolves the digest, enforces expiry lazily, rejects
//!    sessions created at or before the subject's revocation fence, then
//!    slides the expiry window forward. The renewal is update-only, so it
//!    cannot write back a record a concurrent revoke already removed.
//! 3) `revoke` drops one session; `revoke_all` writes the fence that cuts
//!    off every session the subject already holds.
//!
//! Store failures during validation deny: an unverifiable token is treated
//! as no token at all.

use crate::access::Role;
use crate::store::{CounterStore, StoreUnavailable, expiry_after, keys};
use anyhow::{Context, Result, anyhow};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use rand::{RngCore, rngs::OsRng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};
use uuid::Uuid;

const TOKEN_BYTES: usize = 32;

/// What the store holds for one session, keyed by the token digest.
#[derive(Debug, Serialize, Deserialize)]
struct SessionRecord {
    subject: Uuid,
    role: Role,
    tenant_scope: Option<Uuid>,
    created_at: DateTime<Utc>,
    last_seen_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

/// A freshly issued session. The raw token exists only here and in the
/// caller's cookie; it cannot be recovered from the store.
#[derive(Debug)]
pub struct IssuedSession {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Authenticated context attached to a validated request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionHandle {
    pub subject: Uuid,
    pub role: Role,
    /// Tenant the session is confined to; `None` for administrators.
    pub tenant_scope: Option<Uuid>,
    pub expires_at: DateTime<Utc>,
}

/// Why a token did not resolve to a session. Both variants render the
/// request unauthenticated; the split only feeds messaging ("session
/// expired, sign in again" reads better than a bare login page).
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("no session")]
    NoSession,
    #[error("session expired")]
    SessionExpired,
}

#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn CounterStore>,
    ttl: Duration,
}

impl SessionManager {
    #[must_use]
    pub fn new(store: Arc<dyn CounterStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Issue a session for a verified subject.
    pub async fn create(
        &self,
        subject: Uuid,
        role: Role,
        tenant_scope: Option<Uuid>,
    ) -> Result<IssuedSession> {
        let token = generate_token()?;
        let now = Utc::now();
        let record = SessionRecord {
            subject,
            role,
            tenant_scope,
            created_at: now,
            last_seen_at: now,
            expires_at: expiry_after(now, self.ttl),
        };
        let bytes = serde_json::to_vec(&record).context("Failed to serialize session record")?;
        self.store
            .put(&keys::session(&token_digest(&token)), &bytes, self.ttl)
            .await
            .context("Failed to store session record")?;
        debug!(subject = %subject, "session issued");
        Ok(IssuedSession {
            token,
            expires_at: record.expires_at,
        })
    }

    /// Resolve a presented token, sliding the expiry on success.
    pub async fn validate(&self, token: &str) -> Result<SessionHandle, SessionError> {
        let key = keys::session(&token_digest(token));
        let bytes = match self.store.get(&key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return Err(SessionError::NoSession),
            Err(err) => {
                error!("Counter store unavailable during session validation, denying: {err}");
                return Err(SessionError::NoSession);
            }
        };
        let Ok(mut record) = serde_json::from_slice::<SessionRecord>(&bytes) else {
            error!("Stored session record is malformed, denying");
            if let Err(err) = self.store.delete(&key).await {
                warn!("Failed to drop malformed session record: {err}");
            }
            return Err(SessionError::NoSession);
        };

        let now = Utc::now();
        if now >= record.expires_at {
            // The store hides expired entries on its own; this in-record
            // check covers backends whose eviction lags.
            if let Err(err) = self.store.delete(&key).await {
                warn!("Failed to drop expired session record: {err}");
            }
            return Err(SessionError::SessionExpired);
        }

        match self.revocation_fence(record.subject).await {
            Ok(Some(fence)) if record.created_at <= fence => {
                if let Err(err) = self.store.delete(&key).await {
                    warn!("Failed to drop revoked session record: {err}");
                }
                return Err(SessionError::NoSession);
            }
            Ok(_) => {}
            Err(err) => {
                error!("Counter store unavailable during revocation check, denying: {err}");
                return Err(SessionError::NoSession);
            }
        }

        record.last_seen_at = now;
        record.expires_at = expiry_after(now, self.ttl);
        match serde_json::to_vec(&record) {
            Ok(renewed) => match self.store.update(&key, &renewed, self.ttl).await {
                Ok(true) => {}
                // The record vanished between lookup and renewal; a
                // concurrent revoke wins.
                Ok(false) => return Err(SessionError::NoSession),
                Err(err) => {
                    error!("Failed to renew session expiry, denying: {err}");
                    return Err(SessionError::NoSession);
                }
            },
            Err(err) => {
                error!("Failed to serialize renewed session record, denying: {err}");
                return Err(SessionError::NoSession);
            }
        }

        Ok(SessionHandle {
            subject: record.subject,
            role: record.role,
            tenant_scope: record.tenant_scope,
            expires_at: record.expires_at,
        })
    }

    /// Drop one session. Idempotent; revoking an unknown or already-revoked
    /// token is fine. Once the delete lands, an in-flight validation cannot
    /// write the record back.
    pub async fn revoke(&self, token: &str) -> Result<(), StoreUnavailable> {
        self.store
            .delete(&keys::session(&token_digest(token)))
            .await
    }

    /// Cut off every session the subject currently holds.
    ///
    /// Session records are only addressable by token digest, so instead of
    /// enumerating them this writes a fence timestamp; `validate` rejects any
    /// session created at or before it. The fence lives exactly one session
    /// TTL, after which every fenced session has expired on its own.
    pub async fn revoke_all(&self, subject: Uuid) -> Result<(), StoreUnavailable> {
        let fence = serde_json::to_vec(&Utc::now())
            .map_err(|err| StoreUnavailable::from(anyhow!("fence serialization: {err}")))?;
        self.store
            .put(&keys::session_fence(subject), &fence, self.ttl)
            .await
    }

    async fn revocation_fence(
        &self,
        subject: Uuid,
    ) -> Result<Option<DateTime<Utc>>, StoreUnavailable> {
        let key = keys::session_fence(subject);
        let Some(bytes) = self.store.get(&key).await? else {
            return Ok(None);
        };
        let fence = serde_json::from_slice::<DateTime<Utc>>(&bytes).map_err(|err| {
            StoreUnavailable::from(anyhow!("malformed revocation fence for {subject}: {err}"))
        })?;
        Ok(Some(fence))
    }
}

/// Create a session token from OS entropy.
fn generate_token() -> Result<String> {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("Failed to generate session token")?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// Digest a token for use as a store key; raw tokens never reach the store.
fn token_digest(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}
