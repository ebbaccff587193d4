//! AES-256-GCM encryption for broker tokens.
//!
//! Each token is encrypted separately with a fresh random 12-byte IV.
//! The envelope carries ciphertext, IV and the detached 16-byte auth tag,
//! all hex-encoded for storage.

use crate::config::EncryptionKey;
use crate::error::AuthError;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Size of the IV in bytes (96 bits, standard for GCM)
const IV_SIZE: usize = 12;

/// Size of the GCM authentication tag in bytes
const TAG_SIZE: usize = 16;

/// One encrypted token, as stored at rest.
///
/// Immutable once created. Any single-character mutation of any field
/// makes decryption fail.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CipherEnvelope {
    /// Hex-encoded ciphertext (tag detached)
    pub ciphertext: String,
    /// Hex-encoded 12-byte IV
    pub iv: String,
    /// Hex-encoded 16-byte GCM authentication tag
    pub auth_tag: String,
}

/// Authenticated encryption of single token strings.
///
/// Construction requires a validated [`EncryptionKey`]; key problems are
/// caught at startup, never at first use.
pub struct TokenCipher {
    cipher: Aes256Gcm,
}

impl TokenCipher {
    pub fn new(key: &EncryptionKey) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes())),
        }
    }

    /// Encrypts a token with a fresh random IV.
    pub fn encrypt(&self, plaintext: &str) -> Result<CipherEnvelope, AuthError> {
        let mut iv = [0u8; IV_SIZE];
        OsRng.fill_bytes(&mut iv);

        let mut sealed = self
            .cipher
            .encrypt(Nonce::from_slice(&iv), plaintext.as_bytes())
            .map_err(|_| AuthError::Encryption)?;

        // aes-gcm appends the tag; the envelope stores it detached
        let tag = sealed.split_off(sealed.len() - TAG_SIZE);

        Ok(CipherEnvelope {
            ciphertext: hex::encode(&sealed),
            iv: hex::encode(iv),
            auth_tag: hex::encode(&tag),
        })
    }

    /// Decrypts an envelope.
    ///
    /// Any integrity failure — wrong IV, wrong ciphertext, wrong tag,
    /// malformed hex — yields the single generic [`AuthError::Decryption`].
    /// The error never reveals which component failed verification.
    pub fn decrypt(&self, envelope: &CipherEnvelope) -> Result<String, AuthError> {
        let mut ciphertext = hex::decode(&envelope.ciphertext).map_err(|_| AuthError::Decryption)?;
        let iv = hex::decode(&envelope.iv).map_err(|_| AuthError::Decryption)?;
        let tag = hex::decode(&envelope.auth_tag).map_err(|_| AuthError::Decryption)?;

        if iv.len() != IV_SIZE || tag.len() != TAG_SIZE {
            return Err(AuthError::Decryption);
        }

        ciphertext.extend_from_slice(&tag);

        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(&iv), ciphertext.as_ref())
            .map_err(|_| AuthError::Decryption)?;

        String::from_utf8(plaintext).map_err(|_| AuthError::Decryption)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cipher() -> TokenCipher {
        let key = EncryptionKey::from_hex(&"42".repeat(32)).unwrap();
        TokenCipher::new(&key)
    }

    /// Replaces the hex character at `index` with a different one.
    fn flip_hex_char(s: &str, index: usize) -> String {
        let mut chars: Vec<char> = s.chars().collect();
        chars[index] = if chars[index] == '0' { '1' } else { '0' };
        chars.into_iter().collect()
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let cipher = test_cipher();
        let plaintext = "my-secret-access-token-12345";

        let envelope = cipher.encrypt(plaintext).unwrap();
        assert_ne!(envelope.ciphertext, plaintext);
        assert_eq!(envelope.iv.len(), 24); // 12 bytes hex
        assert_eq!(envelope.auth_tag.len(), 32); // 16 bytes hex

        let decrypted = cipher.decrypt(&envelope).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_empty_string_roundtrip() {
        let cipher = test_cipher();

        let envelope = cipher.encrypt("").unwrap();
        assert!(envelope.ciphertext.is_empty());
        assert_eq!(envelope.auth_tag.len(), 32);

        assert_eq!(cipher.decrypt(&envelope).unwrap(), "");
    }

    #[test]
    fn test_fresh_iv_per_call() {
        let cipher = test_cipher();
        let plaintext = "same-plaintext";

        let a = cipher.encrypt(plaintext).unwrap();
        let b = cipher.encrypt(plaintext).unwrap();

        assert_ne!(a.iv, b.iv);
        assert_ne!(a.ciphertext, b.ciphertext);

        assert_eq!(cipher.decrypt(&a).unwrap(), plaintext);
        assert_eq!(cipher.decrypt(&b).unwrap(), plaintext);
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let cipher = test_cipher();
        let envelope = cipher.encrypt("secret").unwrap();

        for index in 0..envelope.ciphertext.len() {
            let tampered = CipherEnvelope {
                ciphertext: flip_hex_char(&envelope.ciphertext, index),
                ..envelope.clone()
            };
            assert!(matches!(
                cipher.decrypt(&tampered),
                Err(AuthError::Decryption)
            ));
        }
    }

    #[test]
    fn test_tampered_iv_fails() {
        let cipher = test_cipher();
        let envelope = cipher.encrypt("secret").unwrap();

        for index in 0..envelope.iv.len() {
            let tampered = CipherEnvelope {
                iv: flip_hex_char(&envelope.iv, index),
                ..envelope.clone()
            };
            assert!(matches!(
                cipher.decrypt(&tampered),
                Err(AuthError::Decryption)
            ));
        }
    }

    #[test]
    fn test_tampered_auth_tag_fails() {
        let cipher = test_cipher();
        let envelope = cipher.encrypt("secret").unwrap();

        for index in 0..envelope.auth_tag.len() {
            let tampered = CipherEnvelope {
                auth_tag: flip_hex_char(&envelope.auth_tag, index),
                ..envelope.clone()
            };
            assert!(matches!(
                cipher.decrypt(&tampered),
                Err(AuthError::Decryption)
            ));
        }
    }

    #[test]
    fn test_wrong_key_fails() {
        let cipher = test_cipher();
        let other = TokenCipher::new(&EncryptionKey::from_hex(&"43".repeat(32)).unwrap());

        let envelope = cipher.encrypt("secret").unwrap();
        assert!(matches!(other.decrypt(&envelope), Err(AuthError::Decryption)));
    }

    #[test]
    fn test_malformed_hex_fails() {
        let cipher = test_cipher();
        let mut envelope = cipher.encrypt("secret").unwrap();
        envelope.iv = "not-hex-at-all-not-hex-a".to_string();

        assert!(matches!(cipher.decrypt(&envelope), Err(AuthError::Decryption)));
    }
}
