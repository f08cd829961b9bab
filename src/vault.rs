//! OAuth credential encryption at rest (`oauth.encryptionKey`, §6).
//!
//! Grounded on the teacher's credential vault (`engine/skills/crypto.rs`):
//! AES-256-GCM with a random 12-byte nonce per encryption, the ciphertext
//! stored as `"aes:" + base64(nonce || ciphertext)`. Tetora derives the
//! 256-bit AES key from the configured passphrase via HKDF-SHA256 instead
//! of hashing it directly, so a short operator-chosen passphrase doesn't
//! become the raw key material.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hkdf::Hkdf;
use sha2::Sha256;

use crate::atoms::error::{TetoraError, TetoraResult};

const NONCE_LEN: usize = 12;
const VAULT_PREFIX: &str = "aes:";
const HKDF_INFO: &[u8] = b"tetora-oauth-vault-v1";

fn derive_key(passphrase: &str) -> [u8; 32] {
    let hk = Hkdf::<Sha256>::new(None, passphrase.as_bytes());
    let mut key = [0u8; 32];
    hk.expand(HKDF_INFO, &mut key).expect("32 bytes is a valid HKDF-SHA256 output length");
    key
}

fn random_nonce() -> TetoraResult<[u8; NONCE_LEN]> {
    let mut buf = [0u8; NONCE_LEN];
    getrandom::getrandom(&mut buf).map_err(|e| TetoraError::Internal(format!("failed to generate nonce: {}", e)))?;
    Ok(buf)
}

/// Encrypts `plaintext` with the key derived from `passphrase`, returning
/// an `"aes:"`-prefixed, base64-encoded payload safe to store as a SQL
/// TEXT column.
pub fn encrypt(passphrase: &str, plaintext: &str) -> TetoraResult<String> {
    let key_bytes = derive_key(passphrase);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key_bytes));
    let nonce_bytes = random_nonce()?;
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher.encrypt(nonce, plaintext.as_bytes()).map_err(|e| TetoraError::Internal(format!("vault encryption failed: {}", e)))?;

    let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    combined.extend_from_slice(&nonce_bytes);
    combined.extend_from_slice(&ciphertext);
    Ok(format!("{}{}", VAULT_PREFIX, BASE64.encode(combined)))
}

/// Decrypts a payload produced by [`encrypt`]. Returns the input unchanged
/// if it doesn't carry the `"aes:"` prefix, so credentials written before
/// `oauth.encryptionKey` was configured still read back as plaintext.
pub fn decrypt(passphrase: &str, payload: &str) -> TetoraResult<String> {
    let Some(encoded) = payload.strip_prefix(VAULT_PREFIX) else {
        return Ok(payload.to_string());
    };
    let combined = BASE64.decode(encoded).map_err(|e| TetoraError::Internal(format!("vault payload is not valid base64: {}", e)))?;
    if combined.len() < NONCE_LEN {
        return Err(TetoraError::Internal("vault payload is too short to contain a nonce".to_string()));
    }
    let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);

    let key_bytes = derive_key(passphrase);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key_bytes));
    let plaintext = cipher.decrypt(Nonce::from_slice(nonce_bytes), ciphertext).map_err(|_| TetoraError::Internal("vault decryption failed: wrong key or corrupted payload".to_string()))?;
    String::from_utf8(plaintext).map_err(|e| TetoraError::Internal(format!("decrypted vault payload is not valid utf-8: {}", e)))
}

/// `true` if `payload` looks like a vault-encrypted string rather than a
/// raw JSON credential blob.
pub fn is_encrypted(payload: &str) -> bool {
    payload.starts_with(VAULT_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_then_decrypt_round_trips() {
        let payload = r#"{"access_token":"ghp_example"}"#;
        let encrypted = encrypt("correct horse battery staple", payload).unwrap();
        assert!(is_encrypted(&encrypted));
        assert_ne!(encrypted, payload);
        assert_eq!(decrypt("correct horse battery staple", &encrypted).unwrap(), payload);
    }

    #[test]
    fn wrong_passphrase_fails_to_decrypt() {
        let encrypted = encrypt("passphrase-a", "secret").unwrap();
        assert!(decrypt("passphrase-b", &encrypted).is_err());
    }

    #[test]
    fn plaintext_payloads_pass_through_decrypt_unchanged() {
        assert_eq!(decrypt("any passphrase", "{\"token\":\"abc\"}").unwrap(), "{\"token\":\"abc\"}");
    }

    #[test]
    fn two_encryptions_of_the_same_plaintext_differ() {
        let a = encrypt("key", "same-plaintext").unwrap();
        let b = encrypt("key", "same-plaintext").unwrap();
        assert_ne!(a, b, "random nonce must vary per call");
    }
}
