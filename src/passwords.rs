//! Password hashing for the user sub-service, grounded in the same
//! Argon2-based `AuthService` pattern used elsewhere in the pack for
//! user credential storage (as opposed to the token hashing this crate's
//! teacher does with plain SHA-256).

use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;

use crate::errors::{QuotaError, QuotaResult};

pub fn hash_password(password: &str) -> QuotaResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| QuotaError::Internal(format!("password hashing failed: {e}")))
}

pub fn verify_password(password: &str, hash: &str) -> QuotaResult<bool> {
    let parsed = PasswordHash::new(hash).map_err(|e| QuotaError::Internal(format!("stored hash is malformed: {e}")))?;
    Ok(Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok())
}
