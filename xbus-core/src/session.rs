//! Password verification and token minting (§4.1 `login`, §6).
//!
//! The original source's `new_token()` is `uuid4().hex` — a bare random
//! token, not a JWT or signed cookie. We keep that shape (`new_token`
//! below) rather than inventing a signing scheme the source never had.
//! Password hashes are PHC strings (`$argon2id$...`), verified in constant
//! time via `argon2::PasswordVerifier`.

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use rand::rngs::OsRng;

/// Verify a plaintext password against a stored PHC hash (§4.1 `login`).
/// Returns `Ok(false)` for a wrong password, `Err` only if `stored_hash`
/// isn't a well-formed PHC string.
pub fn verify_password(stored_hash: &str, password: &str) -> anyhow::Result<bool> {
    let parsed = PasswordHash::new(stored_hash).map_err(|e| anyhow::anyhow!(e))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

/// Hash a plaintext password into a PHC string (role provisioning, tests).
pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!(e))?;
    Ok(hash.to_string())
}

/// A fresh opaque session token (`new_token` in the source: `uuid4().hex`).
pub fn new_token() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
