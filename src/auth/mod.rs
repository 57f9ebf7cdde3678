//! Credential verification: secrets, lockout, and the login decision.

mod error;
mod lockout;
mod password;
mod verifier;

pub use error::VerifyError;
pub use lockout::{LockoutPolicy, LockoutStatus};
pub use password::{hash_password, verify_password};
pub use verifier::{CredentialVerifier, LOGIN_ACTION, VerifiedIdentity};
