//! Bearer and verification tokens.
//!
//! Tokens are 32 random bytes from the OS CSPRNG, URL-safe base64 encoded.
//! Only an HMAC-SHA256 of a token (keyed with the session secret) is ever
//! persisted, so a copy of the database does not yield usable credentials.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use hmac::{Hmac, Mac};
use rand::RngExt;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

const TOKEN_BYTES: usize = 32;

/// Generate a fresh random token.
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Keyed hasher for tokens stored at rest.
#[derive(Clone)]
pub struct TokenHasher {
    mac: HmacSha256,
}

impl std::fmt::Debug for TokenHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TokenHasher(..)")
    }
}

impl TokenHasher {
    pub fn new(secret: &str) -> Result<Self> {
        if secret.is_empty() {
            return Err(Error::validation("session secret is empty"));
        }
        let mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| Error::Internal(format!("HMAC key: {}", e)))?;
        Ok(Self { mac })
    }

    /// Hex-encoded HMAC of the token.
    pub fn hash(&self, token: &str) -> String {
        let mut mac = self.mac.clone();
        mac.update(token.as_bytes());
        hex_encode(&mac.finalize().into_bytes())
    }

    /// Constant-time check of `token` against a stored hash.
    pub fn verify(&self, token: &str, stored_hash: &str) -> bool {
        let Some(expected) = hex_decode(stored_hash) else {
            return false;
        };
        let mut mac = self.mac.clone();
        mac.update(token.as_bytes());
        mac.verify_slice(&expected).is_ok()
    }
}

/// Compute hex-encoded SHA-256.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex_encode(&hasher.finalize())
}

pub(crate) fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

pub(crate) fn hex_decode(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| s.get(i..i + 2).and_then(|h| u8::from_str_radix(h, 16).ok()))
        .collect()
}
