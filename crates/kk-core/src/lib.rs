//! koko-keywords Core Library
//!
//! This crate provides the matching engine behind `match(text, filter, version)`:
//! a locally cached snapshot of a remote keyword dataset, refreshed on a TTL,
//! persisted to disk, and scanned with a word-boundary aware matcher.
//!
//! # Architecture
//!
//! An [`Engine`] owns its [`Config`] and a [`CacheManager`]. The cache manager
//! serves immutable [`Snapshot`]s behind `Arc`, so a match that started before a
//! refresh keeps working against the snapshot it was handed. Refreshes are
//! single-flight per cache key.
//!
//! # Modules
//!
//! - `types`: Shared type definitions, error codes and the normalization policy
//! - `hash`: Word hashing for the keyword index, CRC32 for snapshot files
//! - `normalize`: Text tokenization and normalization
//! - `filter`: Filter expression parsing (`category=...`)
//! - `matcher`: Keyword index and matching
//! - `snapshot`: Snapshot model and the KKS binary format
//! - `store`: On-disk snapshot store
//! - `fetcher`: Remote dataset retrieval
//! - `cache`: Snapshot cache with refresh coordination
//! - `config`: Engine configuration
//! - `engine`: The public matching entry point

pub mod cache;
pub mod config;
pub mod engine;
pub mod fetcher;
pub mod filter;
pub mod hash;
pub mod matcher;
pub mod normalize;
pub mod snapshot;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use cache::{CacheError, CacheManager, CacheStats};
pub use config::{Config, ConfigError};
pub use engine::Engine;
pub use fetcher::{FetchError, Fetcher, HttpFetcher, RawDatasetPayload, RawKeyword};
pub use filter::{parse_filter, FilterError, FilterPredicate};
pub use matcher::{is_match, KeywordIndex, Matcher};
pub use snapshot::Snapshot;
pub use store::{DiskStore, StoreError};
pub use types::{
    abi_code, error_description, CacheKey, KeywordEntry, MatchError, MatchResult, Normalize,
};
