//! AES-256-GCM sealing and opening, plus the small primitives the rest of
//! the crypto layer is built on: secure randomness, constant-time
//! comparison, and the zeroized key wrapper.

use crate::crypto::{CryptoError, Result};
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use subtle::ConstantTimeEq;
use zeroize::ZeroizeOnDrop;

/// AES-GCM nonce length in bytes.
pub const NONCE_LEN: usize = 12;

/// AES-GCM authentication tag length in bytes.
pub const TAG_LEN: usize = 16;

/// A 256-bit wrapping key derived from a password.
///
/// Owned by the session manager while the vault is unlocked; other
/// components borrow it for the length of a single call. Zeroized when
/// dropped.
#[derive(Clone, ZeroizeOnDrop)]
pub struct DerivedKey {
    key: [u8; 32],
}

impl DerivedKey {
    pub fn from_bytes(key: [u8; 32]) -> Self {
        Self { key }
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.key
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedKey").finish_non_exhaustive()
    }
}

/// Fill a buffer from the system CSPRNG.
pub fn random_bytes(buf: &mut [u8]) -> Result<()> {
    OsRng
        .try_fill_bytes(buf)
        .map_err(|_| CryptoError::RandomFailed)
}

/// A fixed-size array of CSPRNG bytes.
pub fn random_array<const N: usize>() -> Result<[u8; N]> {
    let mut out = [0u8; N];
    random_bytes(&mut out)?;
    Ok(out)
}

/// Seal `plaintext` under `key` with a fresh random nonce.
///
/// Returns the nonce and the ciphertext with the 16-byte tag appended.
/// Nonces are never reused: every call draws a new one from the CSPRNG.
pub fn aead_seal(
    key: &DerivedKey,
    associated_data: &[u8],
    plaintext: &[u8],
) -> Result<([u8; NONCE_LEN], Vec<u8>)> {
    let nonce_bytes: [u8; NONCE_LEN] = random_array()?;
    let cipher = Aes256Gcm::new(key.as_bytes().into());

    let ciphertext = cipher
        .encrypt(
            Nonce::from_slice(&nonce_bytes),
            Payload {
                msg: plaintext,
                aad: associated_data,
            },
        )
        .map_err(|_| CryptoError::AuthFailure)?;

    Ok((nonce_bytes, ciphertext))
}

/// Open ciphertext-with-tag sealed by [`aead_seal`].
///
/// A tag mismatch yields [`CryptoError::AuthFailure`]; this is the sole
/// signal that a password is wrong for an envelope, and callers decide
/// whether to surface it as a bad password or as corruption.
pub fn aead_open(
    key: &DerivedKey,
    nonce: &[u8; NONCE_LEN],
    associated_data: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>> {
    if ciphertext.len() < TAG_LEN {
        return Err(CryptoError::InvalidEnvelope("ciphertext shorter than tag"));
    }

    let cipher = Aes256Gcm::new(key.as_bytes().into());
    cipher
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad: associated_data,
            },
        )
        .map_err(|_| CryptoError::AuthFailure)
}

/// Constant-time equality for verifier tags and similar secrets.
///
/// Length mismatch returns early; lengths are public here.
pub fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> DerivedKey {
        DerivedKey::from_bytes([0x42; 32])
    }

    #[test]
    fn seal_open_roundtrip() {
        let key = test_key();
        let (nonce, ct) = aead_seal(&key, b"", b"sk-AAA").unwrap();
        let pt = aead_open(&key, &nonce, b"", &ct).unwrap();
        assert_eq!(pt, b"sk-AAA");
    }

    #[test]
    fn fresh_nonce_every_seal() {
        let key = test_key();
        let (n1, c1) = aead_seal(&key, b"", b"same").unwrap();
        let (n2, c2) = aead_seal(&key, b"", b"same").unwrap();
        assert_ne!(n1, n2);
        assert_ne!(c1, c2);
    }

    #[test]
    fn wrong_key_fails_auth() {
        let (nonce, ct) = aead_seal(&test_key(), b"", b"secret").unwrap();
        let other = DerivedKey::from_bytes([0x43; 32]);
        assert!(matches!(
            aead_open(&other, &nonce, b"", &ct),
            Err(CryptoError::AuthFailure)
        ));
    }

    #[test]
    fn mismatched_aad_fails_auth() {
        let key = test_key();
        let (nonce, ct) = aead_seal(&key, b"backup:v1", b"blob").unwrap();
        assert!(matches!(
            aead_open(&key, &nonce, b"", &ct),
            Err(CryptoError::AuthFailure)
        ));
    }

    #[test]
    fn every_flipped_bit_detected() {
        let key = test_key();
        let (nonce, ct) = aead_seal(&key, b"", b"tamper target").unwrap();

        for byte in 0..ct.len() {
            let mut mangled = ct.clone();
            mangled[byte] ^= 0x01;
            assert!(
                aead_open(&key, &nonce, b"", &mangled).is_err(),
                "flip at byte {byte} went undetected"
            );
        }
    }

    #[test]
    fn megabyte_payload_roundtrip() {
        let key = test_key();
        let plaintext: Vec<u8> = (0..1 << 20).map(|i| (i % 251) as u8).collect();

        let (nonce, ct) = aead_seal(&key, b"", &plaintext).unwrap();
        assert_eq!(aead_open(&key, &nonce, b"", &ct).unwrap(), plaintext);
    }

    #[test]
    fn ct_eq_behaviour() {
        assert!(ct_eq(b"abcdef", b"abcdef"));
        assert!(!ct_eq(b"abcdef", b"xbcdef"));
        assert!(!ct_eq(b"abcdef", b"abcdex"));
        assert!(!ct_eq(b"abc", b"abcd"));
        assert!(ct_eq(b"", b""));
    }

    #[test]
    fn random_arrays_differ() {
        let a: [u8; 16] = random_array().unwrap();
        let b: [u8; 16] = random_array().unwrap();
        assert_ne!(a, b);
    }
}
