//! # Login signature verification (secp256k1)
//!
//! The signer sends:
//!
//! - `signature`: 128 hex characters, `r` then `s`, each a 32-byte big-endian
//!   integer. No recovery byte, no DER.
//! - `public_key`: 128 hex characters, the uncompressed point without its
//!   `04` prefix.
//! - `message`: arbitrary text, hashed with SHA-256 before verification.
//!
//! Verification fails closed: malformed input is simply "not valid".

use k256::ecdsa::{Signature, VerifyingKey, signature::hazmat::PrehashVerifier};
use sha2::{Digest, Sha256};

/// Hex length of an `r || s` signature.
pub const SIGNATURE_HEX_LEN: usize = 128;
/// Hex length of a public key without its `04` prefix.
pub const PUBLIC_KEY_HEX_LEN: usize = 128;

fn decode_signature(signature_hex: &str) -> Option<Signature> {
    if signature_hex.len() != SIGNATURE_HEX_LEN {
        return None;
    }
    let bytes = hex::decode(signature_hex).ok()?;
    let signature = Signature::from_slice(&bytes).ok()?;
    // Signers are not required to produce low-S signatures.
    Some(signature.normalize_s().unwrap_or(signature))
}

fn decode_public_key(public_key_hex: &str) -> Option<VerifyingKey> {
    if public_key_hex.len() != PUBLIC_KEY_HEX_LEN {
        return None;
    }
    let mut point = Vec::with_capacity(65);
    point.push(0x04);
    point.extend(hex::decode(public_key_hex).ok()?);
    VerifyingKey::from_sec1_bytes(&point).ok()
}

/// Verifies `signature_hex` over SHA-256(`message`) with `public_key_hex`.
///
/// Pure: the same triple always yields the same answer.
pub fn verify_signature(signature_hex: &str, message: &str, public_key_hex: &str) -> bool {
    let Some(signature) = decode_signature(signature_hex) else {
        tracing::debug!("Signature is not 64 bytes of r || s");
        return false;
    };
    let Some(verifying_key) = decode_public_key(public_key_hex) else {
        tracing::debug!("Public key is not an uncompressed secp256k1 point");
        return false;
    };

    let digest = Sha256::digest(message.as_bytes());
    verifying_key.verify_prehash(&digest, &signature).is_ok()
}
