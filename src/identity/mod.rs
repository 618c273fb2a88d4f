//! Identity derivation
//!
//! An [`Identity`] is everything a device knows after login: the vault key,
//! the salt it was derived with, and the budget id. Nothing here is ever
//! persisted; it is derived again at every unlock.

mod budget;
mod key;

pub use budget::{generate_budget_id, BudgetId};
pub use key::{derive_key, derive_with_salt, salt_for, DerivedKey, KEY_LEN, SALT_LEN};

#[cfg(test)]
pub(crate) use key::test_kdf;

use crate::config::KdfConfig;
use crate::error::VaultResult;
use tracing::debug;

/// Credentials-derived identity for one budget
#[derive(Debug, Clone)]
pub struct Identity {
    key: DerivedKey,
    salt: [u8; SALT_LEN],
    budget_id: BudgetId,
}

impl Identity {
    /// Derive the identity for a password and share code.
    ///
    /// CPU heavy; async callers should run it on a blocking thread.
    pub fn derive(password: &str, share_code: &str, kdf: &KdfConfig) -> VaultResult<Self> {
        let budget_id = generate_budget_id(password, share_code)?;
        let (key, salt) = derive_key(password, kdf)?;
        debug!("Derived identity for budget {}", budget_id.short());
        Ok(Self {
            key,
            salt,
            budget_id,
        })
    }

    pub fn key(&self) -> &DerivedKey {
        &self.key
    }

    pub fn salt(&self) -> &[u8; SALT_LEN] {
        &self.salt
    }

    pub fn budget_id(&self) -> &BudgetId {
        &self.budget_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VaultError;

    #[test]
    fn two_devices_agree() {
        let a = Identity::derive("hunter2", "ripple canyon violin budget", &test_kdf()).unwrap();
        let b = Identity::derive("hunter2", "Ripple Canyon Violin Budget", &test_kdf()).unwrap();
        assert_eq!(a.budget_id(), b.budget_id());
        assert_eq!(a.key(), b.key());
        assert_eq!(a.salt(), b.salt());
    }

    #[test]
    fn invalid_code_fails_before_kdf() {
        let err = Identity::derive("hunter2", "ripple canyon violet budget", &test_kdf()).unwrap_err();
        assert!(matches!(err, VaultError::InvalidShareCode(_)));
    }

    #[test]
    fn debug_hides_key() {
        let id = Identity::derive("hunter2", "ripple canyon violin budget", &test_kdf()).unwrap();
        let printed = format!("{:?}", id);
        assert!(printed.contains("REDACTED"));
        assert!(!printed.contains("hunter2"));
    }
}
