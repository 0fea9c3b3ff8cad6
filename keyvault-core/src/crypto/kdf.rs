//! PBKDF2-HMAC-SHA-256 key derivation for master and backup passwords.
//!
//! Parameters:
//! - 100 000 iterations (build-time floor; raising it requires a new
//!   envelope version so old data stays readable)
//! - 16-byte random salt
//! - 256-bit output

use crate::crypto::cipher::DerivedKey;
use crate::crypto::{CryptoError, Result};
use pbkdf2::pbkdf2_hmac;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroize;

/// Salt length in bytes.
pub const SALT_LEN: usize = 16;

/// Derived key length in bytes.
pub const KEY_LEN: usize = 32;

/// Build-time iteration count. May be raised (behind a new envelope
/// version), never lowered.
pub const PBKDF2_ITERATIONS: u32 = 100_000;

/// Domain-separation label mixed into the salt when deriving the stored
/// verifier tag, so the tag is never equal to the entry-wrapping key
/// derived from the same password and salt.
const VERIFIER_LABEL: &[u8] = b"keyvault/verifier/v1";

/// Parameters for a single PBKDF2 derivation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KdfParams {
    /// Salt for key derivation.
    pub salt: [u8; SALT_LEN],

    /// Iteration count.
    pub iterations: u32,
}

impl KdfParams {
    /// Fresh parameters with a random salt and the build-time iteration
    /// count.
    pub fn generate() -> Result<Self> {
        Ok(Self {
            salt: super::cipher::random_array()?,
            iterations: PBKDF2_ITERATIONS,
        })
    }

    /// Parameters with a caller-supplied salt (re-derivation paths).
    pub fn with_salt(salt: [u8; SALT_LEN]) -> Self {
        Self {
            salt,
            iterations: PBKDF2_ITERATIONS,
        }
    }

    /// Reject nonsensical parameters before burning CPU on them.
    pub fn validate(&self) -> Result<()> {
        if self.iterations < PBKDF2_ITERATIONS {
            return Err(CryptoError::KdfOverflow("iteration count below floor"));
        }
        Ok(())
    }
}

/// Derive a 256-bit wrapping key from a password.
pub fn derive_key(password: &[u8], params: &KdfParams) -> Result<DerivedKey> {
    params.validate()?;

    let mut out = [0u8; KEY_LEN];
    pbkdf2_hmac::<Sha256>(password, &params.salt, params.iterations, &mut out);

    let key = DerivedKey::from_bytes(out);
    out.zeroize();
    Ok(key)
}

/// Derive the verifier tag for a password.
///
/// Domain-separated from [`derive_key`] by appending a fixed label to the
/// salt input: verifier bytes stored on disk are a password check, never a
/// wrapping key.
pub fn derive_verifier_tag(password: &[u8], params: &KdfParams) -> Result<[u8; KEY_LEN]> {
    params.validate()?;

    let mut salt = Vec::with_capacity(SALT_LEN + VERIFIER_LABEL.len());
    salt.extend_from_slice(&params.salt);
    salt.extend_from_slice(VERIFIER_LABEL);

    let mut tag = [0u8; KEY_LEN];
    pbkdf2_hmac::<Sha256>(password, &salt, params.iterations, &mut tag);
    Ok(tag)
}
