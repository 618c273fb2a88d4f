//! Budget identifiers
//!
//! A budget id is a pure function of the password and the normalized share
//! code, so devices agree on it without talking to anyone.

use crate::error::{VaultError, VaultResult};
use crate::share;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

const PREFIX: &str = "budget_";
const HEX_LEN: usize = 16;
const BUDGET_DOMAIN: &[u8] = b"vvsync.budget.v1\n";

/// `budget_` followed by 16 lowercase hex characters
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BudgetId(String);

impl BudgetId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Non-secret prefix safe for log lines
    pub fn short(&self) -> &str {
        let end = (PREFIX.len() + 8).min(self.0.len());
        &self.0[PREFIX.len()..end]
    }
}

impl fmt::Display for BudgetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for BudgetId {
    type Error = VaultError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let hex = value
            .strip_prefix(PREFIX)
            .ok_or_else(|| VaultError::User(format!("not a budget id: {}", value)))?;
        let valid = hex.len() == HEX_LEN
            && hex.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f'));
        if !valid {
            return Err(VaultError::User(format!("not a budget id: {}", value)));
        }
        Ok(Self(value))
    }
}

impl From<BudgetId> for String {
    fn from(id: BudgetId) -> Self {
        id.0
    }
}

/// Derive the budget id for a password + share code pair.
///
/// Input is checked before anything is hashed.
pub fn generate_budget_id(password: &str, share_code: &str) -> VaultResult<BudgetId> {
    if password.is_empty() {
        return Err(VaultError::EmptyPassword);
    }
    if !share::validate(share_code) {
        return Err(VaultError::InvalidShareCode(
            "expected four words from the share code word list".to_string(),
        ));
    }

    let normalized = share::normalize(share_code);
    let mut hasher = Sha256::new();
    hasher.update(BUDGET_DOMAIN);
    hasher.update(password.as_bytes());
    hasher.update(b"\n");
    hasher.update(normalized.as_bytes());
    let digest = hex::encode(hasher.finalize());

    Ok(BudgetId(format!("{}{}", PREFIX, &digest[..HEX_LEN])))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_across_formatting() {
        let a = generate_budget_id("hunter2", "ripple canyon violin budget").unwrap();
        let b = generate_budget_id("hunter2", "  Ripple CANYON  violin budget").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn matches_expected_shape() {
        let id = generate_budget_id("hunter2", "ripple canyon violin budget").unwrap();
        let hex = id.as_str().strip_prefix("budget_").unwrap();
        assert_eq!(hex.len(), 16);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(id.short().len(), 8);
        assert!(hex.starts_with(id.short()));
    }

    #[test]
    fn pinned_value_for_known_credentials() {
        let id = generate_budget_id("correct-horse", "ripple canyon violin budget").unwrap();
        assert_eq!(id.as_str(), "budget_111d062534ec1336");
    }

    #[test]
    fn differs_by_password_or_code() {
        let base = generate_budget_id("hunter2", "ripple canyon violin budget").unwrap();
        assert_ne!(
            base,
            generate_budget_id("hunter3", "ripple canyon violin budget").unwrap()
        );
        assert_ne!(
            base,
            generate_budget_id("hunter2", "ripple canyon violin bundle").unwrap()
        );
    }

    #[test]
    fn rejects_bad_input() {
        assert!(matches!(
            generate_budget_id("", "ripple canyon violin budget"),
            Err(VaultError::EmptyPassword)
        ));
        assert!(matches!(
            generate_budget_id("hunter2", "ripple canyon violet budget"),
            Err(VaultError::InvalidShareCode(_))
        ));
    }

    #[test]
    fn serde_validates() {
        let id: BudgetId = serde_json::from_str("\"budget_0123456789abcdef\"").unwrap();
        assert_eq!(id.short(), "01234567");
        assert!(serde_json::from_str::<BudgetId>("\"budget_XYZ\"").is_err());
    }
}
