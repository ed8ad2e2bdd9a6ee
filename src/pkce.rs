//! PKCE challenge derivation and verification (RFC 7636, S256 only).
//!
//! The bridge never generates verifiers — clients do. It only re-derives
//! the challenge from a presented verifier and compares it against the one
//! captured during the authorize leg.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::{Error, Result};

/// Compute the S256 code challenge for a verifier:
/// `BASE64URL-ENCODE(SHA256(ASCII(code_verifier)))`, without padding.
#[must_use]
pub fn challenge_from_verifier(verifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// Check a verifier against a previously-captured challenge.
///
/// The comparison is constant-time so the response cannot leak how much of
/// the challenge matched.
pub fn verify(verifier: &str, challenge: &str) -> Result<()> {
    let derived = challenge_from_verifier(verifier);

    if bool::from(derived.as_bytes().ct_eq(challenge.as_bytes())) {
        Ok(())
    } else {
        Err(Error::VerifierMismatch)
    }
}
