//! HMAC-SHA256 signing of evidence manifests
//!
//! The signing key is an explicit handle: the engine owns one
//! [`EvidenceSigner`] and passes it to every manifest build, never a
//! process-wide global.

use std::fmt;

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::EvidenceError;

type HmacSha256 = Hmac<Sha256>;

/// Minimum accepted key length in bytes
pub const MIN_KEY_LEN: usize = 16;

/// Holds a keyed HMAC-SHA256 instance
#[derive(Clone)]
pub struct EvidenceSigner {
    mac: HmacSha256,
    key_fingerprint: String,
}

impl EvidenceSigner {
    /// Create signer from raw key bytes
    ///
    /// # Errors
    /// Returns error if the key is shorter than [`MIN_KEY_LEN`]
    pub fn new(key: &[u8]) -> Result<Self, EvidenceError> {
        if key.len() < MIN_KEY_LEN {
            return Err(EvidenceError::InvalidKey(format!(
                "key must be at least {MIN_KEY_LEN} bytes, got {}",
                key.len()
            )));
        }
        let mac = HmacSha256::new_from_slice(key)
            .map_err(|err| EvidenceError::InvalidKey(err.to_string()))?;
        let key_fingerprint = crate::Sha256Digest::compute(key).short();
        Ok(Self {
            mac,
            key_fingerprint,
        })
    }

    /// Create signer from a hex-encoded key
    ///
    /// # Errors
    /// Returns error if the hex is malformed or the key too short
    pub fn from_hex(encoded: &str) -> Result<Self, EvidenceError> {
        let key = hex::decode(encoded.trim())?;
        Self::new(&key)
    }

    /// Sign payload, returning lowercase hex
    #[must_use]
    pub fn sign(&self, payload: &[u8]) -> String {
        let mut mac = self.mac.clone();
        mac.update(payload);
        hex::encode(mac.finalize().into_bytes())
    }

    /// Constant-time check of a hex signature (either case)
    #[must_use]
    pub fn verify(&self, payload: &[u8], signature_hex: &str) -> bool {
        let Ok(expected) = hex::decode(signature_hex.trim()) else {
            return false;
        };
        let mut mac = self.mac.clone();
        mac.update(payload);
        mac.verify_slice(&expected).is_ok()
    }

    /// Short public fingerprint of the key, safe to log
    #[inline]
    #[must_use]
    pub fn key_fingerprint(&self) -> &str {
        &self.key_fingerprint
    }
}

impl fmt::Debug for EvidenceSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvidenceSigner")
            .field("key_fingerprint", &self.key_fingerprint)
            .finish_non_exhaustive()
    }
}
