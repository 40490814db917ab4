//! AES-256-GCM sealing for secrets stored at rest.
//!
//! Wire format: `hex(nonce || ciphertext+tag)` with a fresh random 12-byte
//! nonce per call. Plaintext only ever exists transiently in memory.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};

use crate::error::{CoreError, Result};

/// AES-256 needs exactly 32 key bytes.
pub const AES_KEY_LEN: usize = 32;
/// GCM standard nonce size.
pub const NONCE_LEN: usize = 12;

fn cipher(key: &str) -> Result<Aes256Gcm> {
    if key.len() != AES_KEY_LEN {
        return Err(CoreError::Crypto(format!(
            "AES key must be exactly {AES_KEY_LEN} bytes"
        )));
    }
    Aes256Gcm::new_from_slice(key.as_bytes()).map_err(|e| CoreError::Crypto(e.to_string()))
}

/// Seal `plaintext` and return the hex encoding of `nonce || ciphertext`.
pub fn encrypt(plaintext: &str, key: &str) -> Result<String> {
    let cipher = cipher(key)?;
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let sealed = cipher
        .encrypt(&nonce, plaintext.as_bytes())
        .map_err(|_| CoreError::Crypto("encryption failed".to_string()))?;

    let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&sealed);
    Ok(hex::encode(out))
}

/// Reverse of [`encrypt`]. Fails on a wrong key, bad hex, truncated input or
/// a tampered tag.
pub fn decrypt(encoded: &str, key: &str) -> Result<String> {
    let cipher = cipher(key)?;
    let raw = hex::decode(encoded).map_err(|e| CoreError::Crypto(e.to_string()))?;
    if raw.len() < NONCE_LEN {
        return Err(CoreError::Crypto("ciphertext too short".to_string()));
    }

    let (nonce, sealed) = raw.split_at(NONCE_LEN);
    let plain = cipher
        .decrypt(Nonce::from_slice(nonce), sealed)
        .map_err(|_| CoreError::Crypto("decryption failed".to_string()))?;
    String::from_utf8(plain).map_err(|e| CoreError::Crypto(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "0123456789abcdef0123456789abcdef";

    #[test]
    fn seal_and_open() {
        let sealed = encrypt("s3cret-pa55", KEY).unwrap();
        assert_ne!(sealed, "s3cret-pa55");
        assert_eq!(decrypt(&sealed, KEY).unwrap(), "s3cret-pa55");
    }

    #[test]
    fn nonce_differs_per_call() {
        let a = encrypt("same", KEY).unwrap();
        let b = encrypt("same", KEY).unwrap();
        assert_ne!(a, b);
        // 12-byte nonce + 4-byte plaintext + 16-byte tag, hex-encoded
        assert_eq!(a.len(), (NONCE_LEN + 4 + 16) * 2);
    }

    #[test]
    fn wrong_key_length_rejected() {
        let err = encrypt("x", "short").unwrap_err();
        assert!(err.to_string().contains("32 bytes"));
        assert!(decrypt("00", "short").is_err());
    }

    #[test]
    fn wrong_key_fails_to_open() {
        let sealed = encrypt("payload", KEY).unwrap();
        let other = "fedcba9876543210fedcba9876543210";
        assert!(decrypt(&sealed, other).is_err());
    }

    #[test]
    fn truncated_ciphertext_rejected() {
        let err = decrypt("abcd", KEY).unwrap_err();
        assert!(err.to_string().contains("too short"));
    }

    #[test]
    fn non_hex_rejected() {
        assert!(decrypt("not-hex!", KEY).is_err());
    }
}
