//! In-memory keyword snapshot

use std::borrow::Cow;
use std::sync::OnceLock;
use std::time::{Duration, SystemTime};

use super::SnapshotError;
use crate::matcher::KeywordIndex;
use crate::types::{KeywordEntry, Normalize};

/// One immutable version of the keyword dataset.
///
/// A refresh produces a new `Snapshot`; existing ones are never mutated.
/// The keyword index is built lazily on first match and cached.
#[derive(Debug, Clone)]
pub struct Snapshot {
    version: String,
    entries: Vec<KeywordEntry>,
    fetched_at: SystemTime,
    index: OnceLock<KeywordIndex>,
}

impl Snapshot {
    /// Create a snapshot. An empty entry set is rejected.
    pub fn new(
        version: impl Into<String>,
        entries: Vec<KeywordEntry>,
        fetched_at: SystemTime,
    ) -> Result<Self, SnapshotError> {
        if entries.is_empty() {
            return Err(SnapshotError::Empty);
        }
        Ok(Self {
            version: version.into(),
            entries,
            fetched_at,
            index: OnceLock::new(),
        })
    }

    /// Dataset version id as reported by the remote source.
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn entries(&self) -> &[KeywordEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn fetched_at(&self) -> SystemTime {
        self.fetched_at
    }

    /// Time since the snapshot was fetched (zero if the clock went backwards).
    pub fn age(&self) -> Duration {
        SystemTime::now()
            .duration_since(self.fetched_at)
            .unwrap_or(Duration::ZERO)
    }

    /// Check whether the snapshot has outlived `ttl`.
    pub fn is_stale(&self, ttl: Duration) -> bool {
        self.age() >= ttl
    }

    /// Keyword index for `normalize`. The first policy requested is cached;
    /// other policies get a freshly built index.
    pub fn index(&self, normalize: Normalize) -> Cow<'_, KeywordIndex> {
        let index = self
            .index
            .get_or_init(|| KeywordIndex::build(&self.entries, normalize));
        if index.normalize() == normalize {
            Cow::Borrowed(index)
        } else {
            Cow::Owned(KeywordIndex::build(&self.entries, normalize))
        }
    }
}

impl PartialEq for Snapshot {
    fn eq(&self, other: &Self) -> bool {
        self.version == other.version
            && self.entries == other.entries
            && self.fetched_at == other.fetched_at
    }
}

impl Eq for Snapshot {}
