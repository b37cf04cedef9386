//! Core type definitions for koko-keywords
//!
//! These types are shared by the cache, the matcher and the ABI layer.

use std::collections::BTreeSet;
use std::fmt;

use crate::cache::CacheError;
use crate::config::ConfigError;
use crate::filter::FilterError;

// =============================================================================
// Keyword Entries
// =============================================================================

/// A flagged phrase and the categories it is tagged with.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeywordEntry {
    pub phrase: String,
    pub categories: BTreeSet<String>,
}

impl KeywordEntry {
    /// Create an entry. Categories are trimmed and lowercased; blank ones are dropped.
    pub fn new<I, S>(phrase: impl Into<String>, categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let categories = categories
            .into_iter()
            .map(|c| c.as_ref().trim().to_lowercase())
            .filter(|c| !c.is_empty())
            .collect();
        Self {
            phrase: phrase.into(),
            categories,
        }
    }

    /// Check if the entry is tagged with a (lowercased) category.
    #[inline]
    pub fn has_category(&self, category: &str) -> bool {
        self.categories.contains(category)
    }
}

// =============================================================================
// Cache Keys
// =============================================================================

/// Identifies a cached snapshot: the rolling default or a pinned version.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// The current published dataset
    Current,
    /// A specific, immutable dataset version
    Version(String),
}

impl CacheKey {
    pub fn from_version(version: Option<&str>) -> Self {
        match version {
            Some(v) => Self::Version(v.to_string()),
            None => Self::Current,
        }
    }

    /// Version id to request from the remote source, if pinned.
    pub fn version(&self) -> Option<&str> {
        match self {
            Self::Current => None,
            Self::Version(v) => Some(v),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Current => f.write_str("current"),
            Self::Version(v) => write!(f, "version {v}"),
        }
    }
}

// =============================================================================
// Normalization Policy
// =============================================================================

bitflags::bitflags! {
    /// How text and phrases are normalized before comparison.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Normalize: u8 {
        /// Lowercase (Unicode) before comparing
        const FOLD_CASE = 1 << 0;
        /// Delete apostrophes instead of treating them as separators ("it's" == "its")
        const DROP_APOSTROPHES = 1 << 1;
        /// Phrases must occur as whole word sequences
        const WHOLE_WORDS = 1 << 2;

        const DEFAULT = Self::FOLD_CASE.bits()
            | Self::DROP_APOSTROPHES.bits()
            | Self::WHOLE_WORDS.bits();
    }
}

impl Default for Normalize {
    fn default() -> Self {
        Self::DEFAULT
    }
}

// =============================================================================
// Match Result
// =============================================================================

/// ABI code: required credentials/URL not configured.
pub const CODE_NOT_CONFIGURED: i32 = -1;
/// ABI code: credentials rejected by the remote source.
pub const CODE_UNAUTHORIZED: i32 = -2;
/// ABI code: refresh failed and no usable snapshot.
pub const CODE_CACHE_UNAVAILABLE: i32 = -3;
/// ABI code: remote response could not be parsed.
pub const CODE_MALFORMED_PAYLOAD: i32 = -4;
/// ABI code: configured URL is invalid.
pub const CODE_INVALID_URL: i32 = -5;
/// ABI code: filter expression is invalid.
pub const CODE_INVALID_FILTER: i32 = -6;

/// Every way a match call can fail. Each variant has a stable ABI code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MatchError {
    #[error("not configured: {0}")]
    NotConfigured(String),
    #[error("invalid credentials")]
    Unauthorized,
    #[error("unable to refresh cache: {0}")]
    CacheUnavailable(String),
    #[error("unable to parse response: {0}")]
    MalformedPayload(String),
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("invalid filter: {0}")]
    InvalidFilter(String),
}

impl MatchError {
    /// Negative code used across the C ABI.
    pub fn code(&self) -> i32 {
        match self {
            Self::NotConfigured(_) => CODE_NOT_CONFIGURED,
            Self::Unauthorized => CODE_UNAUTHORIZED,
            Self::CacheUnavailable(_) => CODE_CACHE_UNAVAILABLE,
            Self::MalformedPayload(_) => CODE_MALFORMED_PAYLOAD,
            Self::InvalidUrl(_) => CODE_INVALID_URL,
            Self::InvalidFilter(_) => CODE_INVALID_FILTER,
        }
    }
}

/// Tagged result of a match: matched / not matched, or a specific failure.
pub type MatchResult = Result<bool, MatchError>;

/// Flatten a result into the boundary convention: 1, 0, or a negative code.
pub fn abi_code(result: &MatchResult) -> i32 {
    match result {
        Ok(true) => 1,
        Ok(false) => 0,
        Err(e) => e.code(),
    }
}

/// Human-readable description for an ABI code.
pub fn error_description(code: i32) -> &'static str {
    match code {
        1 => "Matched",
        0 => "Not matched",
        CODE_NOT_CONFIGURED => "KOKO_KEYWORDS_AUTH or KOKO_KEYWORDS_URL must be set",
        CODE_UNAUTHORIZED => {
            "Invalid credentials. Please confirm you are using valid credentials."
        }
        CODE_CACHE_UNAVAILABLE => {
            "Unable to refresh cache. Please try again; no cached keyword data is available."
        }
        CODE_MALFORMED_PAYLOAD => "Unable to parse response from API.",
        CODE_INVALID_URL => "Invalid url. Please ensure the url used is valid.",
        CODE_INVALID_FILTER => {
            "Invalid filter. Filters take the form category=<name>, joined with '&'."
        }
        _ => "Unknown error",
    }
}

impl From<ConfigError> for MatchError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::InvalidUrl(msg) => Self::InvalidUrl(msg),
            other => Self::NotConfigured(other.to_string()),
        }
    }
}

impl From<CacheError> for MatchError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::Unauthorized => Self::Unauthorized,
            CacheError::Malformed(msg) => Self::MalformedPayload(msg),
            CacheError::Unavailable(msg) => Self::CacheUnavailable(msg),
        }
    }
}

impl From<FilterError> for MatchError {
    fn from(err: FilterError) -> Self {
        Self::InvalidFilter(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_categories_are_normalized() {
        let entry = KeywordEntry::new("kms", [" Self-Harm ", "", "SUICIDE"]);
        assert!(entry.has_category("self-harm"));
        assert!(entry.has_category("suicide"));
        assert_eq!(entry.categories.len(), 2);
    }

    #[test]
    fn test_abi_codes() {
        assert_eq!(abi_code(&Ok(true)), 1);
        assert_eq!(abi_code(&Ok(false)), 0);
        assert_eq!(abi_code(&Err(MatchError::NotConfigured("x".into()))), -1);
        assert_eq!(abi_code(&Err(MatchError::Unauthorized)), -2);
        assert_eq!(abi_code(&Err(MatchError::CacheUnavailable("x".into()))), -3);
        assert_eq!(abi_code(&Err(MatchError::MalformedPayload("x".into()))), -4);
        assert_eq!(abi_code(&Err(MatchError::InvalidUrl("x".into()))), -5);
        assert_eq!(abi_code(&Err(MatchError::InvalidFilter("x".into()))), -6);
    }

    #[test]
    fn test_every_code_has_description() {
        for code in -6..=1 {
            assert_ne!(error_description(code), "Unknown error", "code {code}");
        }
        assert_eq!(error_description(-42), "Unknown error");
    }

    #[test]
    fn test_cache_key_version() {
        assert_eq!(CacheKey::from_version(None), CacheKey::Current);
        assert_eq!(CacheKey::from_version(Some("20220206")).version(), Some("20220206"));
        assert_eq!(CacheKey::Current.to_string(), "current");
    }

    #[test]
    fn test_default_normalize() {
        let n = Normalize::default();
        assert!(n.contains(Normalize::FOLD_CASE));
        assert!(n.contains(Normalize::DROP_APOSTROPHES));
        assert!(n.contains(Normalize::WHOLE_WORDS));
    }
}
