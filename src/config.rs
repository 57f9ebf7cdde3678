//! Runtime configuration with conservative defaults.
//!
//! Everything is overridable through `PORTARIA_*` environment variables read
//! once at startup. Invalid values are a fatal [`ConfigError`] so a
//! misconfigured deployment refuses to start instead of limping along with
//! half-applied settings.

use crate::directory::{normalize_email, valid_email};
use std::env;
use std::str::FromStr;
use std::time::Duration;

pub const ENV_SESSION_TTL: &str = "PORTARIA_SESSION_TTL_SECONDS";
pub const ENV_LOCKOUT_THRESHOLD: &str = "PORTARIA_LOCKOUT_THRESHOLD";
pub const ENV_LOCKOUT_SECONDS: &str = "PORTARIA_LOCKOUT_SECONDS";
pub const ENV_LOGIN_RATE_LIMIT: &str = "PORTARIA_LOGIN_RATE_LIMIT";
pub const ENV_LOGIN_RATE_WINDOW: &str = "PORTARIA_LOGIN_RATE_WINDOW_SECONDS";
pub const ENV_METRICS_TTL: &str = "PORTARIA_METRICS_TTL_SECONDS";
pub const ENV_STORE_TIMEOUT: &str = "PORTARIA_STORE_TIMEOUT_MS";
pub const ENV_COMPUTE_TIMEOUT: &str = "PORTARIA_COMPUTE_TIMEOUT_MS";
pub const ENV_ADMIN_EMAILS: &str = "PORTARIA_ADMIN_EMAILS";

const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(12 * 60 * 60);
const DEFAULT_LOCKOUT_THRESHOLD: u32 = 5;
const DEFAULT_LOCKOUT_DURATION: Duration = Duration::from_secs(30 * 60);
const DEFAULT_LOGIN_RATE_LIMIT: u32 = 5;
const DEFAULT_LOGIN_RATE_WINDOW: Duration = Duration::from_secs(15 * 60);
const DEFAULT_METRICS_TTL: Duration = Duration::from_secs(120);
const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_millis(2_000);
const DEFAULT_COMPUTE_TIMEOUT: Duration = Duration::from_millis(10_000);

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} is not a valid number: {value}")]
    NotANumber { var: &'static str, value: String },

    #[error("{var} must be greater than zero")]
    Zero { var: &'static str },

    #[error("{var} contains an invalid email: {value}")]
    InvalidAdminEmail { var: &'static str, value: String },
}

#[derive(Clone, Debug)]
pub struct PortalConfig {
    session_ttl: Duration,
    lockout_threshold: u32,
    lockout_duration: Duration,
    login_rate_limit: u32,
    login_rate_window: Duration,
    metrics_ttl: Duration,
    store_timeout: Duration,
    compute_timeout: Duration,
    admin_emails: Vec<String>,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            session_ttl: DEFAULT_SESSION_TTL,
            lockout_threshold: DEFAULT_LOCKOUT_THRESHOLD,
            lockout_duration: DEFAULT_LOCKOUT_DURATION,
            login_rate_limit: DEFAULT_LOGIN_RATE_LIMIT,
            login_rate_window: DEFAULT_LOGIN_RATE_WINDOW,
            metrics_ttl: DEFAULT_METRICS_TTL,
            store_timeout: DEFAULT_STORE_TIMEOUT,
            compute_timeout: DEFAULT_COMPUTE_TIMEOUT,
            admin_emails: Vec::new(),
        }
    }
}

impl PortalConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Read overrides from the environment on top of the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(value) = read_number::<u64>(ENV_SESSION_TTL)? {
            if value == 0 {
                return Err(ConfigError::Zero {
                    var: ENV_SESSION_TTL,
                });
            }
            config.session_ttl = Duration::from_secs(value);
        }
        if let Some(value) = read_number::<u32>(ENV_LOCKOUT_THRESHOLD)? {
            if value == 0 {
                return Err(ConfigError::Zero {
                    var: ENV_LOCKOUT_THRESHOLD,
                });
            }
            config.lockout_threshold = value;
        }
        if let Some(value) = read_number::<u64>(ENV_LOCKOUT_SECONDS)? {
            if value == 0 {
                return Err(ConfigError::Zero {
                    var: ENV_LOCKOUT_SECONDS,
                });
            }
            config.lockout_duration = Duration::from_secs(value);
        }
        if let Some(value) = read_number::<u32>(ENV_LOGIN_RATE_LIMIT)? {
            if value == 0 {
                return Err(ConfigError::Zero {
                    var: ENV_LOGIN_RATE_LIMIT,
                });
            }
            config.login_rate_limit = value;
        }
        if let Some(value) = read_number::<u64>(ENV_LOGIN_RATE_WINDOW)? {
            if value == 0 {
                return Err(ConfigError::Zero {
                    var: ENV_LOGIN_RATE_WINDOW,
                });
            }
            config.login_rate_window = Duration::from_secs(value);
        }
        if let Some(value) = read_number::<u64>(ENV_METRICS_TTL)? {
            if value == 0 {
                return Err(ConfigError::Zero {
                    var: ENV_METRICS_TTL,
                });
            }
            config.metrics_ttl = Duration::from_secs(value);
        }
        if let Some(value) = read_number::<u64>(ENV_STORE_TIMEOUT)? {
            if value == 0 {
                return Err(ConfigError::Zero {
                    var: ENV_STORE_TIMEOUT,
                });
            }
            config.store_timeout = Duration::from_millis(value);
        }
        if let Some(value) = read_number::<u64>(ENV_COMPUTE_TIMEOUT)? {
            if value == 0 {
                return Err(ConfigError::Zero {
                    var: ENV_COMPUTE_TIMEOUT,
                });
            }
            config.compute_timeout = Duration::from_millis(value);
        }
        if let Ok(raw) = env::var(ENV_ADMIN_EMAILS) {
            config.admin_emails = parse_admin_emails(&raw)?;
        }
        Ok(config)
    }

    #[must_use]
    pub fn with_session_ttl(mut self, session_ttl: Duration) -> Self {
        self.session_ttl = session_ttl;
        self
    }

    #[must_use]
    pub fn with_lockout_threshold(mut self, lockout_threshold: u32) -> Self {
        self.lockout_threshold = lockout_threshold;
        self
    }

    #[must_use]
    pub fn with_lockout_duration(mut self, lockout_duration: Duration) -> Self {
        self.lockout_duration = lockout_duration;
        self
    }

    #[must_use]
    pub fn with_login_rate_limit(mut self, login_rate_limit: u32) -> Self {
        self.login_rate_limit = login_rate_limit;
        self
    }

    #[must_use]
    pub fn with_login_rate_window(mut self, login_rate_window: Duration) -> Self {
        self.login_rate_window = login_rate_window;
        self
    }

    #[must_use]
    pub fn with_metrics_ttl(mut self, metrics_ttl: Duration) -> Self {
        self.metrics_ttl = metrics_ttl;
        self
    }

    #[must_use]
    pub fn with_store_timeout(mut self, store_timeout: Duration) -> Self {
        self.store_timeout = store_timeout;
        self
    }

    #[must_use]
    pub fn with_compute_timeout(mut self, compute_timeout: Duration) -> Self {
        self.compute_timeout = compute_timeout;
        self
    }

    /// Replace the administrator allow-list; entries are normalized like
    /// login identifiers.
    #[must_use]
    pub fn with_admin_emails<I, S>(mut self, admin_emails: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.admin_emails = admin_emails
            .into_iter()
            .map(|email| normalize_email(email.as_ref()))
            .collect();
        self
    }

    #[must_use]
    pub fn session_ttl(&self) -> Duration {
        self.session_ttl
    }

    #[must_use]
    pub fn lockout_threshold(&self) -> u32 {
        self.lockout_threshold
    }

    #[must_use]
    pub fn lockout_duration(&self) -> Duration {
        self.lockout_duration
    }

    #[must_use]
    pub fn login_rate_limit(&self) -> u32 {
        self.login_rate_limit
    }

    #[must_use]
    pub fn login_rate_window(&self) -> Duration {
        self.login_rate_window
    }

    #[must_use]
    pub fn metrics_ttl(&self) -> Duration {
        self.metrics_ttl
    }

    #[must_use]
    pub fn store_timeout(&self) -> Duration {
        self.store_timeout
    }

    #[must_use]
    pub fn compute_timeout(&self) -> Duration {
        self.compute_timeout
    }

    #[must_use]
    pub fn admin_emails(&self) -> &[String] {
        &self.admin_emails
    }
}

fn read_number<T: FromStr>(var: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(var) {
        Ok(raw) => match raw.trim().parse::<T>() {
            Ok(value) => Ok(Some(value)),
            Err(_) => Err(ConfigError::NotANumber { var, value: raw }),
        },
        Err(env::VarError::NotPresent) => Ok(None),
        Err(env::VarError::NotUnicode(_)) => Err(ConfigError::NotANumber {
            var,
            value: "<non-unicode>".to_string(),
        }),
    }
}

fn parse_admin_emails(raw: &str) -> Result<Vec<String>, ConfigError> {
    let mut emails = Vec::new();
    for entry in raw.split(',') {
        let email = normalize_email(entry);
        if email.is_empty() {
            continue;
        }
        if !valid_email(&email) {
            return Err(ConfigError::InvalidAdminEmail {
                var: ENV_ADMIN_EMAILS,
                value: entry.trim().to_string(),
            });
        }
        emails.push(email);
    }
    Ok(emails)
}
