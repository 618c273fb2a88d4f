//! Password-based key derivation (Argon2id)

use crate::config::KdfConfig;
use crate::error::{VaultError, VaultResult};
use argon2::{Algorithm, Argon2, Params, Version};
use sha2::{Digest, Sha256};
use std::fmt;
use zeroize::Zeroize;

pub const KEY_LEN: usize = 32;
pub const SALT_LEN: usize = 16;

const SALT_DOMAIN: &[u8] = b"vvsync.salt.v1\n";

/// 256-bit symmetric key. Wiped from memory on drop.
#[derive(Clone)]
pub struct DerivedKey([u8; KEY_LEN]);

impl DerivedKey {
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    #[cfg(test)]
    pub(crate) fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }
}

impl Drop for DerivedKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DerivedKey([REDACTED])")
    }
}

impl PartialEq for DerivedKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.iter().zip(other.0.iter()).fold(0u8, |acc, (a, b)| acc | (a ^ b)) == 0
    }
}

impl Eq for DerivedKey {}

/// Salt for a password. Deterministic so every device derives the same key.
pub fn salt_for(password: &str) -> [u8; SALT_LEN] {
    let mut hasher = Sha256::new();
    hasher.update(SALT_DOMAIN);
    hasher.update(password.as_bytes());
    let digest = hasher.finalize();

    let mut salt = [0u8; SALT_LEN];
    salt.copy_from_slice(&digest[..SALT_LEN]);
    salt
}

/// Derive the vault key from a password.
///
/// Returns the key together with the salt it was derived with.
pub fn derive_key(password: &str, kdf: &KdfConfig) -> VaultResult<(DerivedKey, [u8; SALT_LEN])> {
    if password.is_empty() {
        return Err(VaultError::EmptyPassword);
    }

    let salt = salt_for(password);
    let key = derive_with_salt(password, &salt, kdf)?;
    Ok((key, salt))
}

/// Derive a key with an explicit salt, e.g. one read back from a stored blob
pub fn derive_with_salt(password: &str, salt: &[u8], kdf: &KdfConfig) -> VaultResult<DerivedKey> {
    let params = Params::new(kdf.memory_kib, kdf.iterations, kdf.parallelism, Some(KEY_LEN))
        .map_err(|e| VaultError::KeyDerivation(format!("invalid parameters: {}", e)))?;
    let argon = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut out = [0u8; KEY_LEN];
    argon
        .hash_password_into(password.as_bytes(), salt, &mut out)
        .map_err(|e| VaultError::KeyDerivation(e.to_string()))?;

    let key = DerivedKey(out);
    out.zeroize();
    Ok(key)
}

#[cfg(test)]
pub(crate) fn test_kdf() -> KdfConfig {
    KdfConfig {
        memory_kib: 64,
        iterations: 1,
        parallelism: 1,
    }
}
