//! # portaria
//!
//! Authentication, session, and access-control core for the client portal:
//! organizations ("tenants") and their people sign in to reach the cases,
//! documents, invoices, and messages that belong to their organization,
//! while firm-side operators oversee all of them. This crate owns who gets
//! in and what they may touch; HTTP routing, rendering, and the business
//! CRUD layer live in the host application and call in through
//! [`PortalCore`].
//!
//! ## Tenant model
//!
//! Every account belongs to exactly one tenant. Roles are derived at login,
//! never stored: accounts on the administrator allow-list become unscoped
//! administrators, everyone else a client confined to their tenant. All
//! tenant-owned reads pass through one choke point,
//! [`access::PermissionTable::can_access_tenant`].
//!
//! ## Login
//!
//! [`PortalCore::login`] checks, in order: the per-identifier rate limit,
//! account existence, the enabled flag, the lockout deadline, the salted
//! secret hash, and the optional tenant identity value. Consecutive
//! failures arm a timed lockout that expires lazily; refusals stay generic
//! toward the client while the audit log records the specific reason.
//!
//! ## Sessions
//!
//! Sessions are opaque random tokens stored by digest with a sliding
//! expiry. Single logout deletes the record; "log out everywhere" writes a
//! revocation fence that cuts off everything issued before it.
//!
//! ## Degraded modes
//!
//! Cross-request state (rate counters, sessions, cached dashboard
//! aggregates) lives in a TTL key/value store that may be unavailable.
//! Abuse protection and caching fail open with a logged fallback; anything
//! that grants access fails closed.

pub mod access;
pub mod auth;
pub mod config;
pub mod directory;
pub mod metrics;
pub mod rate_limit;
pub mod session;
pub mod state;
pub mod store;

pub use config::{ConfigError, PortalConfig};
pub use state::{LoginError, LoginSession, PortalCore};
