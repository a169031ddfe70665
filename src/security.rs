//! Secret primitives: random identifier/secret generation and Argon2id
//! hashing of key secrets.
//!
//! Secrets are stored only as PHC-encoded Argon2id hashes (3 iterations,
//! 64 MiB, parallelism 1, 32-byte tag, 16-byte random salt).

use argon2::password_hash::{rand_core::OsRng, PasswordHash, SaltString};
use argon2::{Algorithm, Argon2, Params, PasswordHasher, PasswordVerifier, Version};
use once_cell::sync::Lazy;
use rand::Rng;
use thiserror::Error;

const KEY_ID_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
const SECRET_ALPHABET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

/// Default secret length in characters.
pub const SECRET_LENGTH: usize = 32;

#[derive(Debug, Error)]
#[error("argon2 hashing failed: {0}")]
pub struct HashError(String);

/// Generate a random key ID of the form `k_` + 7 alphanumeric characters.
pub fn generate_key_id() -> String {
    let mut rng = OsRng;
    let body: String = (0..7)
        .map(|_| KEY_ID_ALPHABET[rng.gen_range(0..KEY_ID_ALPHABET.len())] as char)
        .collect();
    format!("k_{body}")
}

/// Generate a random secret of `len` characters from the URL-safe alphabet
/// `[A-Za-z0-9-_]`.
pub fn generate_secret(len: usize) -> String {
    let mut rng = OsRng;
    (0..len)
        .map(|_| SECRET_ALPHABET[rng.gen_range(0..SECRET_ALPHABET.len())] as char)
        .collect()
}

/// Argon2id hasher with the service-wide profile.
#[derive(Clone, Default)]
pub struct SecretHasher;

static ARGON2: Lazy<Argon2<'static>> = Lazy::new(|| {
    // t=3, m=64 MiB, p=1, 32-byte output. Constant inputs, cannot fail.
    let params = Params::new(64 * 1024, 3, 1, Some(32)).expect("valid Argon2 parameters");
    Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
});

impl SecretHasher {
    pub fn new() -> Self {
        Self
    }

    /// Hash a secret, returning the PHC-encoded string (parameters and salt
    /// included).
    pub fn hash(&self, secret: &str) -> Result<String, HashError> {
        let salt = SaltString::generate(&mut OsRng);
        ARGON2
            .hash_password(secret.as_bytes(), &salt)
            .map(|h| h.to_string())
            .map_err(|e| HashError(e.to_string()))
    }

    /// Verify a secret against an encoded hash. Returns false on mismatch and
    /// on a malformed hash; never errors.
    pub fn verify(&self, secret: &str, encoded_hash: &str) -> bool {
        match PasswordHash::new(encoded_hash) {
            Ok(parsed) => ARGON2.verify_password(secret.as_bytes(), &parsed).is_ok(),
            Err(_) => false,
        }
    }
}
