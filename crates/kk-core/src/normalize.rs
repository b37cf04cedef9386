//! Text normalization for keyword matching
//!
//! Text and phrases go through the same tokenizer so they compare on equal
//! terms. A word is a maximal run of alphanumeric characters; everything else
//! separates words.

use crate::types::Normalize;

// =============================================================================
// Tokenization
// =============================================================================

/// Check if a character is an apostrophe variant.
#[inline]
fn is_apostrophe(c: char) -> bool {
    matches!(c, '\'' | '\u{2019}' | '\u{02BC}' | '`')
}

/// Split text into normalized words.
pub fn words(text: &str, normalize: Normalize) -> Vec<String> {
    let fold_case = normalize.contains(Normalize::FOLD_CASE);
    let drop_apostrophes = normalize.contains(Normalize::DROP_APOSTROPHES);

    let mut words = Vec::new();
    let mut current = String::new();

    for c in text.chars() {
        if c.is_alphanumeric() {
            if fold_case {
                current.extend(c.to_lowercase());
            } else {
                current.push(c);
            }
        } else if drop_apostrophes && is_apostrophe(c) {
            // "it's" -> "its"
            continue;
        } else if !current.is_empty() {
            words.push(std::mem::take(&mut current));
        }
    }

    if !current.is_empty() {
        words.push(current);
    }

    words
}

/// Normalized text with words joined by single spaces.
pub fn normalize_text(text: &str, normalize: Normalize) -> String {
    words(text, normalize).join(" ")
}

// =============================================================================
// Sequence Matching
// =============================================================================

/// Check if `needle` occurs contiguously in `haystack`.
/// An empty needle never matches.
#[inline]
pub fn contains_words(haystack: &[String], needle: &[String]) -> bool {
    if needle.is_empty() || needle.len() > haystack.len() {
        return false;
    }
    haystack.windows(needle.len()).any(|window| window == needle)
}

/// Check if `needle` occurs in `haystack` starting at word `pos`.
#[inline]
pub fn words_at(haystack: &[String], pos: usize, needle: &[String]) -> bool {
    !needle.is_empty()
        && pos + needle.len() <= haystack.len()
        && haystack[pos..pos + needle.len()] == *needle
}
