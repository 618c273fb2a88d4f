//! Four-word share codes drawn from the BIP-39 English word list

use crate::error::{VaultError, VaultResult};
use bip39::Language;
use rand::rngs::OsRng;
use rand::seq::SliceRandom;
use std::fmt;

/// Number of words in a share code
pub const WORD_COUNT: usize = 4;

/// A validated, normalized share code.
///
/// Always four lowercase dictionary words joined by single spaces.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ShareCode(String);

impl ShareCode {
    /// Generate a fresh code from the OS random source
    pub fn generate() -> Self {
        let words = Language::English.word_list();
        let picked: Vec<&str> = (0..WORD_COUNT)
            .filter_map(|_| words.choose(&mut OsRng).copied())
            .collect();
        Self(picked.join(" "))
    }

    /// Normalize and validate user input
    pub fn parse(input: &str) -> VaultResult<Self> {
        let normalized = normalize(input);
        let words: Vec<&str> = normalized.split(' ').filter(|w| !w.is_empty()).collect();

        if words.len() != WORD_COUNT {
            return Err(VaultError::invalid_format(format!(
                "expected {} words, got {}",
                WORD_COUNT,
                words.len()
            )));
        }

        if let Some(unknown) = words.iter().find(|w| !is_dictionary_word(w)) {
            return Err(VaultError::invalid_format(format!(
                "'{}' is not in the word list",
                unknown
            )));
        }

        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn words(&self) -> impl Iterator<Item = &str> {
        self.0.split(' ')
    }

    /// Capitalized form for showing to people, e.g. "Ripple Canyon Violin Budget"
    pub fn display_form(&self) -> String {
        self.words().map(capitalize).collect::<Vec<_>>().join(" ")
    }
}

// Codes are shared secrets; keep them out of debug output.
impl fmt::Debug for ShareCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ShareCode(****)")
    }
}

impl fmt::Display for ShareCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for ShareCode {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Lowercase, trim and collapse runs of whitespace to a single space
pub fn normalize(input: &str) -> String {
    input
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// True if `input` normalizes to exactly four dictionary words
pub fn validate(input: &str) -> bool {
    ShareCode::parse(input).is_ok()
}

/// Capitalize each word of a valid code; anything else comes back untouched
pub fn format_for_display(input: &str) -> String {
    match ShareCode::parse(input) {
        Ok(code) => code.display_form(),
        Err(_) => input.to_string(),
    }
}

fn is_dictionary_word(word: &str) -> bool {
    Language::English.find_word(word).is_some()
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
