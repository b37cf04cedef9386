//! Core Matching Engine
//!
//! This is the hot path - every `match` call ends up here. The matcher never
//! blocks or allocates beyond tokenizing the input text.
//!
//! Phrases are indexed by the hash of their first normalized word. Scanning
//! the text word by word, each word's posting list yields candidate entries,
//! which are verified against the full phrase and then against the filter.

use std::borrow::Cow;
use std::collections::HashMap;

use crate::filter::FilterPredicate;
use crate::hash::hash_word;
use crate::normalize::{contains_words, words, words_at};
use crate::snapshot::Snapshot;
use crate::types::{KeywordEntry, Normalize};

// =============================================================================
// Keyword Index
// =============================================================================

/// Normalized phrases plus a first-word dictionary over them.
#[derive(Debug, Clone)]
pub struct KeywordIndex {
    normalize: Normalize,
    /// Normalized words per entry, same order as the snapshot entries
    phrases: Vec<Vec<String>>,
    /// Space-joined phrases, only populated for substring matching
    joined: Vec<String>,
    /// First word hash -> ascending entry ids
    first_word: HashMap<u64, Vec<u32>>,
}

impl KeywordIndex {
    /// Build the index for a set of entries under a normalization policy.
    pub fn build(entries: &[KeywordEntry], normalize: Normalize) -> Self {
        let mut phrases = Vec::with_capacity(entries.len());
        let mut first_word: HashMap<u64, Vec<u32>> = HashMap::new();
        let mut skipped = 0usize;

        for (id, entry) in entries.iter().enumerate() {
            let phrase = words(&entry.phrase, normalize);
            match phrase.first() {
                Some(first) => first_word.entry(hash_word(first)).or_default().push(id as u32),
                None => skipped += 1,
            }
            phrases.push(phrase);
        }

        if skipped > 0 {
            log::debug!("{skipped} phrases normalize to no words and will never match");
        }

        let joined = if normalize.contains(Normalize::WHOLE_WORDS) {
            Vec::new()
        } else {
            phrases.iter().map(|p| p.join(" ")).collect()
        };

        Self {
            normalize,
            phrases,
            joined,
            first_word,
        }
    }

    pub fn normalize(&self) -> Normalize {
        self.normalize
    }

    /// Number of indexed entries.
    pub fn len(&self) -> usize {
        self.phrases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phrases.is_empty()
    }

    /// Normalized words of an entry's phrase.
    pub fn phrase_words(&self, entry_id: usize) -> Option<&[String]> {
        self.phrases.get(entry_id).map(Vec::as_slice)
    }

    /// Candidate entry ids whose phrase starts with `word`.
    pub fn candidates(&self, word: &str) -> &[u32] {
        self.first_word
            .get(&hash_word(word))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

// =============================================================================
// Matcher
// =============================================================================

/// Matches text against one snapshot.
pub struct Matcher<'a> {
    entries: &'a [KeywordEntry],
    index: Cow<'a, KeywordIndex>,
}

impl<'a> Matcher<'a> {
    /// Create a matcher over a snapshot, reusing its cached index when the
    /// policy matches.
    pub fn new(snapshot: &'a Snapshot, normalize: Normalize) -> Self {
        Self {
            entries: snapshot.entries(),
            index: snapshot.index(normalize),
        }
    }

    /// Check whether any entry accepted by `predicate` occurs in `text`.
    pub fn is_match(&self, text: &str, predicate: &FilterPredicate) -> bool {
        let text_words = words(text, self.index.normalize());
        if text_words.is_empty() {
            return false;
        }

        if self.index.normalize().contains(Normalize::WHOLE_WORDS) {
            self.match_words(&text_words, predicate)
        } else {
            self.match_substring(&text_words.join(" "), predicate)
        }
    }

    fn match_words(&self, text_words: &[String], predicate: &FilterPredicate) -> bool {
        for (pos, word) in text_words.iter().enumerate() {
            for &id in self.index.candidates(word) {
                let id = id as usize;
                let phrase = match self.index.phrase_words(id) {
                    Some(phrase) => phrase,
                    None => continue,
                };
                if words_at(text_words, pos, phrase) && predicate.accepts(&self.entries[id]) {
                    return true;
                }
            }
        }
        false
    }

    fn match_substring(&self, text: &str, predicate: &FilterPredicate) -> bool {
        self.index
            .joined
            .iter()
            .zip(self.entries)
            .any(|(phrase, entry)| {
                !phrase.is_empty() && predicate.accepts(entry) && text.contains(phrase.as_str())
            })
    }
}

/// Check whether any of `entries` occurs in `text`, scanning entries in order.
///
/// This is the unindexed form of [`Matcher::is_match`]; callers filter the
/// entry set beforehand.
pub fn is_match(text: &str, entries: &[KeywordEntry], normalize: Normalize) -> bool {
    let text_words = words(text, normalize);
    if text_words.is_empty() {
        return false;
    }

    if normalize.contains(Normalize::WHOLE_WORDS) {
        entries
            .iter()
            .any(|entry| contains_words(&text_words, &words(&entry.phrase, normalize)))
    } else {
        let text = text_words.join(" ");
        entries.iter().any(|entry| {
            let phrase = words(&entry.phrase, normalize).join(" ");
            !phrase.is_empty() && text.contains(&phrase)
        })
    }
}
