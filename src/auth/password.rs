//! Salted secret hashing for portal credentials.

use anyhow::{Result, anyhow};
use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use secrecy::{ExposeSecret, SecretString};

/// Hash a plaintext secret into a PHC string with a fresh random salt.
///
/// Used by provisioning and tests; the login path only ever verifies.
pub fn hash_password(secret: &SecretString) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(secret.expose_secret().as_bytes(), &salt)
        .map_err(|err| anyhow!("Failed to hash secret: {err}"))?;
    Ok(hash.to_string())
}

/// Check a submitted secret against a stored PHC hash.
///
/// A malformed stored hash counts as a mismatch rather than an error, so the
/// caller's failure path stays uniform.
#[must_use]
pub fn verify_password(secret: &SecretString, stored_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(secret.expose_secret().as_bytes(), &parsed)
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_accepts_the_original_secret() -> Result<()> {
        let secret = SecretString::from("teste123");
        let hash = hash_password(&secret)?;
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password(&secret, &hash));
        Ok(())
    }

    #[test]
    fn wrong_secret_is_rejected() -> Result<()> {
        let hash = hash_password(&SecretString::from("teste123"))?;
        assert!(!verify_password(&SecretString::from("teste124"), &hash));
        assert!(!verify_password(&SecretString::from(""), &hash));
        Ok(())
    }

    #[test]
    fn same_secret_hashes_differently_per_salt() -> Result<()> {
        let secret = SecretString::from("teste123");
        assert_ne!(hash_password(&secret)?, hash_password(&secret)?);
        Ok(())
    }

    #[test]
    fn malformed_stored_hash_is_a_mismatch() {
        assert!(!verify_password(&SecretString::from("teste123"), "not-a-phc-string"));
        assert!(!verify_password(&SecretString::from("teste123"), ""));
    }
}
