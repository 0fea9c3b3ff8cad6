//! Stored password verifier: `salt || tag`.
//!
//! The verifier answers "is this password right?" without the stored bytes
//! ever acting as a wrapping key; the actual key is re-derived on every
//! unlock from the same salt. See [`crate::crypto::kdf::derive_verifier_tag`]
//! for the domain separation.

use crate::crypto::cipher::ct_eq;
use crate::crypto::kdf::{self, KdfParams, KEY_LEN, SALT_LEN};
use crate::crypto::Result;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

const BLOB_LEN: usize = SALT_LEN + KEY_LEN;

/// The salt+tag pair persisted in the vault root.
#[derive(Debug, Clone)]
pub struct PasswordVerifier {
    salt: [u8; SALT_LEN],
    tag: [u8; KEY_LEN],
}

impl PasswordVerifier {
    /// Install a verifier for a new master password. Called once at
    /// initialization (and again on re-key) with a fresh random salt.
    pub fn install(password: &[u8]) -> Result<Self> {
        let params = KdfParams::generate()?;
        let tag = kdf::derive_verifier_tag(password, &params)?;
        Ok(Self {
            salt: params.salt,
            tag,
        })
    }

    /// Re-derive and compare in constant time.
    pub fn verify(&self, password: &[u8]) -> Result<bool> {
        let params = KdfParams::with_salt(self.salt);
        let candidate = kdf::derive_verifier_tag(password, &params)?;
        Ok(ct_eq(&candidate, &self.tag))
    }

    /// The salt shared with the session's wrapping-key derivation.
    pub fn salt(&self) -> &[u8; SALT_LEN] {
        &self.salt
    }
}

// Persisted as one opaque base64 blob, matching the "verifier is opaque
// bytes" contract of the root record.
impl Serialize for PasswordVerifier {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut blob = [0u8; BLOB_LEN];
        blob[..SALT_LEN].copy_from_slice(&self.salt);
        blob[SALT_LEN..].copy_from_slice(&self.tag);
        serializer.serialize_str(&BASE64.encode(blob))
    }
}

impl<'de> Deserialize<'de> for PasswordVerifier {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        let blob = BASE64
            .decode(encoded.as_bytes())
            .map_err(D::Error::custom)?;
        if blob.len() != BLOB_LEN {
            return Err(D::Error::custom("verifier blob has wrong length"));
        }

        let mut salt = [0u8; SALT_LEN];
        salt.copy_from_slice(&blob[..SALT_LEN]);
        let mut tag = [0u8; KEY_LEN];
        tag.copy_from_slice(&blob[SALT_LEN..]);
        Ok(Self { salt, tag })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_then_verify() {
        let verifier = PasswordVerifier::install(b"correct horse battery staple").unwrap();
        assert!(verifier.verify(b"correct horse battery staple").unwrap());
        assert!(!verifier.verify(b"wrong").unwrap());
        assert!(!verifier.verify(b"").unwrap());
    }

    #[test]
    fn fresh_salt_per_install() {
        let a = PasswordVerifier::install(b"pw").unwrap();
        let b = PasswordVerifier::install(b"pw").unwrap();
        assert_ne!(a.salt(), b.salt());
        assert_ne!(a.tag, b.tag);
    }

    #[test]
    fn serde_roundtrip() {
        let verifier = PasswordVerifier::install(b"pw").unwrap();
        let json = serde_json::to_string(&verifier).unwrap();
        let back: PasswordVerifier = serde_json::from_str(&json).unwrap();
        assert_eq!(back.salt(), verifier.salt());
        assert!(back.verify(b"pw").unwrap());
    }

    #[test]
    fn malformed_blob_rejected() {
        assert!(serde_json::from_str::<PasswordVerifier>("\"AAAA\"").is_err());
        assert!(serde_json::from_str::<PasswordVerifier>("\"not base64!!\"").is_err());
    }
}
