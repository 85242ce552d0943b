//! Shared-secret verification.

use sha2::{Digest, Sha256};

/// Compare a presented token with the configured secret in constant time.
///
/// Both sides are hashed first so the comparison runs over fixed-length
/// digests regardless of input length. An empty secret never verifies.
pub fn verify_token(provided: &str, secret: &str) -> bool {
    if secret.is_empty() {
        return false;
    }
    let a = Sha256::digest(provided.as_bytes());
    let b = Sha256::digest(secret.as_bytes());
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
