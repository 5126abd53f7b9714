//! Opaque token generation and hashing.

use rand::Rng;
use sha2::{Digest, Sha256};

/// Random bytes per token
pub const TOKEN_BYTES: usize = 32;

/// Generate a cryptographically random token
///
/// Returns a hex string (64 characters) from 32 random bytes.
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rng().fill(&mut bytes);
    hex::encode(bytes)
}

/// SHA-256 of a token, hex-encoded. This is the only form that gets stored.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}
