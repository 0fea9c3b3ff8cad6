//! Secret generation over the URL-safe 64-character alphabet.

use crate::crypto::cipher::random_bytes;
use crate::crypto::Result;

const ALPHABET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

/// Generate a random secret of `length` characters.
///
/// CSPRNG bytes are mapped onto the alphabet with rejection sampling so
/// the distribution stays uniform for any alphabet size.
pub fn generate_secret(length: usize) -> Result<String> {
    let limit = 256 - (256 % ALPHABET.len());
    let mut out = String::with_capacity(length);
    let mut buf = [0u8; 64];

    while out.len() < length {
        random_bytes(&mut buf)?;
        for &byte in &buf {
            if (byte as usize) < limit {
                out.push(ALPHABET[byte as usize % ALPHABET.len()] as char);
                if out.len() == length {
                    break;
                }
            }
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn respects_length() {
        for len in [0, 1, 16, 64, 255] {
            assert_eq!(generate_secret(len).unwrap().len(), len);
        }
    }

    #[test]
    fn stays_in_alphabet() {
        let secret = generate_secret(512).unwrap();
        assert!(secret
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_'));
    }

    #[test]
    fn output_varies() {
        assert_ne!(generate_secret(32).unwrap(), generate_secret(32).unwrap());
    }
}
