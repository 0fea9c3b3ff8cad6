//! Cryptographic primitives for the vault engine.
//!
//! This module provides:
//! - PBKDF2-HMAC-SHA-256 key derivation
//! - AES-256-GCM authenticated encryption
//! - The portable envelope framing shared by entries and backups
//! - The stored password verifier
//! - Secret generation

pub mod cipher;
pub mod envelope;
pub mod generate;
pub mod kdf;
pub mod verifier;

pub use cipher::{aead_open, aead_seal, ct_eq, random_array, random_bytes, DerivedKey};
pub use envelope::{
    open_with_key, open_with_password, seal_with_key, seal_with_password, Envelope,
};
pub use generate::generate_secret;
pub use kdf::{derive_key, derive_verifier_tag, KdfParams, KEY_LEN, PBKDF2_ITERATIONS, SALT_LEN};
pub use verifier::PasswordVerifier;

use thiserror::Error;

/// Failure modes of the cryptographic layer.
#[derive(Error, Debug)]
pub enum CryptoError {
    /// AEAD tag mismatch. For an envelope the vault wrote itself this means
    /// corruption; for a candidate password it means the password is wrong
    /// for that envelope.
    #[error("authentication failed")]
    AuthFailure,

    /// Truncated, mis-framed, or version-unknown envelope bytes.
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(&'static str),

    /// Nonsensical key-derivation parameter.
    #[error("kdf parameter out of range: {0}")]
    KdfOverflow(&'static str),

    /// The system RNG failed to produce bytes.
    #[error("random number generation failed")]
    RandomFailed,
}

/// Result type for crypto operations.
pub type Result<T> = std::result::Result<T, CryptoError>;
