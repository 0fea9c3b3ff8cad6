//! Portable envelope framing shared by entry secrets and full-vault
//! backups.
//!
//! Layout (concatenated bytes, big-endian):
//!
//! ```text
//! magic(2) | version(1) | salt(16) | nonce(12) | ciphertext_and_tag(n+16)
//! ```
//!
//! The version byte binds the KDF parameters: version 1 means
//! PBKDF2-HMAC-SHA-256 at 100 000 iterations. Raising the iteration count
//! means minting a new version value, so future verifiers stay
//! parameter-agnostic without a separate header field.

use crate::crypto::cipher::{self, DerivedKey, NONCE_LEN, TAG_LEN};
use crate::crypto::kdf::{self, KdfParams, PBKDF2_ITERATIONS, SALT_LEN};
use crate::crypto::{CryptoError, Result};
use zeroize::Zeroize;

/// Two-byte envelope magic.
pub const MAGIC: [u8; 2] = *b"KV";

/// Current envelope version.
pub const VERSION: u8 = 1;

const HEADER_LEN: usize = MAGIC.len() + 1 + SALT_LEN + NONCE_LEN;

/// Parsed view of an envelope byte string.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub version: u8,
    pub salt: [u8; SALT_LEN],
    pub nonce: [u8; NONCE_LEN],
    /// Ciphertext with the 16-byte GCM tag appended.
    pub ciphertext: Vec<u8>,
}

impl Envelope {
    /// Parse envelope bytes, distinguishing framing problems
    /// ([`CryptoError::InvalidEnvelope`]) from authentication failures
    /// discovered later when opening.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN + TAG_LEN {
            return Err(CryptoError::InvalidEnvelope("truncated"));
        }
        if bytes[..MAGIC.len()] != MAGIC {
            return Err(CryptoError::InvalidEnvelope("bad magic"));
        }

        let version = bytes[MAGIC.len()];
        if kdf_iterations_for_version(version).is_none() {
            return Err(CryptoError::InvalidEnvelope("unknown version"));
        }

        let mut salt = [0u8; SALT_LEN];
        salt.copy_from_slice(&bytes[3..3 + SALT_LEN]);

        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&bytes[3 + SALT_LEN..HEADER_LEN]);

        Ok(Self {
            version,
            salt,
            nonce,
            ciphertext: bytes[HEADER_LEN..].to_vec(),
        })
    }

    /// Serialize back to the wire layout.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.ciphertext.len());
        out.extend_from_slice(&MAGIC);
        out.push(self.version);
        out.extend_from_slice(&self.salt);
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.ciphertext);
        out
    }
}

/// KDF iteration count bound to an envelope version, or `None` for
/// versions this build does not understand.
pub fn kdf_iterations_for_version(version: u8) -> Option<u32> {
    match version {
        1 => Some(PBKDF2_ITERATIONS),
        _ => None,
    }
}

/// Seal plaintext under a password, deriving the key internally with a
/// fresh random salt.
pub fn seal_with_password(
    password: &[u8],
    associated_data: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>> {
    let params = KdfParams::generate()?;
    let key = kdf::derive_key(password, &params)?;
    seal_with_key(&key, &params.salt, associated_data, plaintext)
}

/// Seal plaintext under an already-derived key.
///
/// `salt` must be the salt the key was derived from; it is framed into the
/// envelope so a password-only opener can re-derive. This is the amortized
/// path for bulk operations (re-key, import).
pub fn seal_with_key(
    key: &DerivedKey,
    salt: &[u8; SALT_LEN],
    associated_data: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>> {
    let (nonce, ciphertext) = cipher::aead_seal(key, associated_data, plaintext)?;
    Ok(Envelope {
        version: VERSION,
        salt: *salt,
        nonce,
        ciphertext,
    }
    .to_bytes())
}

/// Open an envelope with a password, re-deriving the key from the framed
/// salt and the version-bound iteration count.
pub fn open_with_password(
    password: &[u8],
    associated_data: &[u8],
    bytes: &[u8],
) -> Result<Vec<u8>> {
    let envelope = Envelope::parse(bytes)?;
    let iterations = kdf_iterations_for_version(envelope.version)
        .ok_or(CryptoError::InvalidEnvelope("unknown version"))?;

    let params = KdfParams {
        salt: envelope.salt,
        iterations,
    };
    let key = kdf::derive_key(password, &params)?;
    let plaintext = cipher::aead_open(&key, &envelope.nonce, associated_data, &envelope.ciphertext);

    let mut salt = envelope.salt;
    salt.zeroize();
    plaintext
}

/// Open an envelope with an already-derived key.
///
/// The framed salt is not consulted; if the key does not match the
/// envelope the AEAD tag check fails with [`CryptoError::AuthFailure`].
pub fn open_with_key(key: &DerivedKey, associated_data: &[u8], bytes: &[u8]) -> Result<Vec<u8>> {
    let envelope = Envelope::parse(bytes)?;
    cipher::aead_open(key, &envelope.nonce, associated_data, &envelope.ciphertext)
}
