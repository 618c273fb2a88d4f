//! AES-256-GCM sealing
//!
//! Every failure on the open side collapses into [`VaultError::DecryptionError`]
//! so callers cannot tell a wrong password from a tampered blob.

use crate::error::{VaultError, VaultResult};
use crate::identity::DerivedKey;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// 96-bit GCM nonce
pub const IV_LEN: usize = 12;

/// Ciphertext plus the IV it was sealed with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sealed {
    pub ciphertext: Vec<u8>,
    pub iv: Vec<u8>,
}

fn cipher_for(key: &DerivedKey) -> VaultResult<Aes256Gcm> {
    Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| VaultError::Encryption(format!("key init failed: {}", e)))
}

/// Seal raw bytes under a fresh random IV
pub fn seal_bytes(plaintext: &[u8], key: &DerivedKey) -> VaultResult<Sealed> {
    let cipher = cipher_for(key)?;
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&iv), plaintext)
        .map_err(|e| VaultError::Encryption(e.to_string()))?;

    Ok(Sealed {
        ciphertext,
        iv: iv.to_vec(),
    })
}

/// Open bytes sealed by [`seal_bytes`]
pub fn open_bytes(ciphertext: &[u8], key: &DerivedKey, iv: &[u8]) -> VaultResult<Vec<u8>> {
    if iv.len() != IV_LEN {
        return Err(VaultError::DecryptionError);
    }
    let cipher = cipher_for(key).map_err(|_| VaultError::DecryptionError)?;
    cipher
        .decrypt(Nonce::from_slice(iv), ciphertext)
        .map_err(|_| VaultError::DecryptionError)
}

/// Serialize `state` to JSON and seal it
pub fn encrypt<T: Serialize + ?Sized>(state: &T, key: &DerivedKey) -> VaultResult<Sealed> {
    let plaintext = serde_json::to_vec(state)?;
    seal_bytes(&plaintext, key)
}

/// Open and deserialize
pub fn decrypt<T: DeserializeOwned>(ciphertext: &[u8], key: &DerivedKey, iv: &[u8]) -> VaultResult<T> {
    let plaintext = open_bytes(ciphertext, key, iv)?;
    serde_json::from_slice(&plaintext).map_err(|_| VaultError::DecryptionError)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::KEY_LEN;
    use serde_json::json;

    fn key(byte: u8) -> DerivedKey {
        DerivedKey::from_bytes([byte; KEY_LEN])
    }

    #[test]
    fn roundtrip() {
        let state = json!({"envelopes": [{"id": "e1", "balance": 12.5}]});
        let sealed = encrypt(&state, &key(1)).unwrap();
        assert_eq!(sealed.iv.len(), IV_LEN);

        let back: serde_json::Value = decrypt(&sealed.ciphertext, &key(1), &sealed.iv).unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn fresh_iv_every_time() {
        let a = encrypt(&json!(1), &key(1)).unwrap();
        let b = encrypt(&json!(1), &key(1)).unwrap();
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn wrong_key_is_decryption_error() {
        let sealed = encrypt(&json!({"a": 1}), &key(1)).unwrap();
        let err = decrypt::<serde_json::Value>(&sealed.ciphertext, &key(2), &sealed.iv).unwrap_err();
        assert!(matches!(err, VaultError::DecryptionError));
        assert_eq!(err.to_string(), "Invalid credentials or corrupted data");
    }

    #[test]
    fn tampering_is_decryption_error() {
        let mut sealed = encrypt(&json!({"a": 1}), &key(1)).unwrap();
        sealed.ciphertext[0] ^= 0xff;
        assert!(matches!(
            decrypt::<serde_json::Value>(&sealed.ciphertext, &key(1), &sealed.iv),
            Err(VaultError::DecryptionError)
        ));
    }

    #[test]
    fn short_iv_is_decryption_error() {
        let sealed = encrypt(&json!({"a": 1}), &key(1)).unwrap();
        assert!(matches!(
            decrypt::<serde_json::Value>(&sealed.ciphertext, &key(1), &sealed.iv[..8]),
            Err(VaultError::DecryptionError)
        ));
    }

    #[test]
    fn wrong_shape_is_decryption_error() {
        let sealed = encrypt(&json!("just a string"), &key(1)).unwrap();
        assert!(matches!(
            decrypt::<Vec<u32>>(&sealed.ciphertext, &key(1), &sealed.iv),
            Err(VaultError::DecryptionError)
        ));
    }
}
