//! Progressive lockout read from account bookkeeping fields.
//!
//! The durable record keeps a consecutive-failure counter and a nullable
//! lockout deadline. Nothing ever clears the deadline on a timer; this module
//! interprets it lazily, so a deadline in the past simply reads as unlocked.

use crate::directory::AccountRecord;
use crate::store::expiry_after;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// How many consecutive failures lock an account, and for how long.
#[derive(Clone, Copy, Debug)]
pub struct LockoutPolicy {
    threshold: u32,
    duration: Duration,
}

impl LockoutPolicy {
    #[must_use]
    pub fn new(threshold: u32, duration: Duration) -> Self {
        Self {
            threshold,
            duration,
        }
    }

    #[must_use]
    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Whether `failed_attempts` consecutive failures warrant a lock.
    #[must_use]
    pub fn should_lock(&self, failed_attempts: u32) -> bool {
        failed_attempts >= self.threshold
    }

    /// Deadline for a lock starting at `now`.
    #[must_use]
    pub fn lock_until(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        expiry_after(now, self.duration)
    }
}

/// Lockout state of an account at one instant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockoutStatus {
    Unlocked { failures: u32 },
    Locked { until: DateTime<Utc> },
}

impl LockoutStatus {
    /// Interpret the bookkeeping fields at `now`. A deadline at or before
    /// `now` reads as unlocked; the stale counter stays visible so the next
    /// failure can re-arm the lock immediately.
    #[must_use]
    pub fn of(account: &AccountRecord, now: DateTime<Utc>) -> Self {
        match account.locked_until {
            Some(until) if now < until => Self::Locked { until },
            _ => Self::Unlocked {
                failures: account.failed_attempts,
            },
        }
    }

    /// Time left on the lock, `None` when unlocked.
    #[must_use]
    pub fn remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        match self {
            Self::Locked { until } => Some((*until - now).to_std().unwrap_or(Duration::ZERO)),
            Self::Unlocked { .. } => None,
        }
    }
}
