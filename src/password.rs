//! Password hashes for the bootstrap user and the login collaborator.
//!
//! Hashes are PBKDF2-SHA256 in PHC string form,
//! `$pbkdf2-sha256$i=<rounds>,l=32$<salt>$<hash>`. Verification reads the
//! rounds and salt back out of the stored string, so hashes written with other
//! round counts keep verifying.

use pbkdf2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use pbkdf2::{Params, Pbkdf2};
use rand::rngs::OsRng;
use tracing::warn;

use crate::error::{Error, Result};

#[cfg(not(test))]
const ROUNDS: u32 = 600_000;
// Test builds are unoptimised.
#[cfg(test)]
const ROUNDS: u32 = 1_000;

const OUTPUT_LEN: usize = 32;

pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let params = Params {
        rounds: ROUNDS,
        output_length: OUTPUT_LEN,
    };

    let hash = Pbkdf2
        .hash_password_customized(password.as_bytes(), None, None, params, &salt)
        .map_err(|e| Error::InvalidInput(format!("cannot hash password: {}", e)))?;

    Ok(hash.to_string())
}

/// Checks `password` against a stored PHC hash. The comparison is constant-time.
pub fn verify_password(stored: &str, password: &str) -> bool {
    match PasswordHash::new(stored) {
        Ok(parsed) => Pbkdf2.verify_password(password.as_bytes(), &parsed).is_ok(),
        Err(e) => {
            warn!(error = %e, "Stored password hash is unreadable");
            false
        }
    }
}
