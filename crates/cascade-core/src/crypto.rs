//! Cryptographic helpers for Cascade.
//!
//! Provides two things:
//!   1. BLAKE3 hashing — configuration hashes
//!   2. Ed25519 verification of chain members' round-settings signatures
//!
//! Signing happens on the mix servers. The coordinator only verifies.

use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use thiserror::Error;

use crate::round::RoundSettings;

// ── BLAKE3 ────────────────────────────────────────────────────────────────────

/// Hash a byte slice, returning a 32-byte BLAKE3 digest.
pub fn hash(data: &[u8]) -> [u8; 32] {
    *blake3::hash(data).as_bytes()
}

// ── Ed25519 ───────────────────────────────────────────────────────────────────

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("invalid public key")]
    InvalidKey,
    #[error("signature must be 64 bytes, got {0}")]
    BadLength(usize),
    #[error("signature does not verify")]
    Mismatch,
}

/// Verify one member's signature over `settings`.
pub fn verify_settings(
    public_key: &[u8; 32],
    settings: &RoundSettings,
    signature: &[u8],
) -> Result<(), SignatureError> {
    let key = VerifyingKey::from_bytes(public_key).map_err(|_| SignatureError::InvalidKey)?;
    let sig: [u8; 64] = signature
        .try_into()
        .map_err(|_| SignatureError::BadLength(signature.len()))?;
    key.verify(&settings.signing_message(), &Signature::from_bytes(&sig))
        .map_err(|_| SignatureError::Mismatch)
}
