//! Matching entry point

use std::sync::Arc;

use crate::cache::CacheManager;
use crate::config::Config;
use crate::fetcher::{Fetcher, HttpFetcher};
use crate::filter::parse_filter;
use crate::matcher::Matcher;
use crate::snapshot::Snapshot;
use crate::store::DiskStore;
use crate::types::{MatchError, MatchResult};

/// A keyword matching engine with its own cache.
///
/// Engines are independent: two engines never share snapshots, counters or
/// in-flight refreshes.
///
/// ```no_run
/// use kk_core::{Config, Engine};
///
/// let engine = Engine::new(Config::new("token", "https://api.kokocares.org/keywords")?)?;
/// if engine.is_match("sewerslide", "", None)? {
///     println!("flagged");
/// }
/// # Ok::<(), kk_core::MatchError>(())
/// ```
pub struct Engine {
    config: Config,
    cache: CacheManager,
}

impl Engine {
    /// Create an engine that fetches from the configured HTTP service.
    pub fn new(config: Config) -> Result<Self, MatchError> {
        let fetcher = HttpFetcher::new(&config).map_err(crate::cache::CacheError::from)?;
        Ok(Self::with_fetcher(config, Arc::new(fetcher)))
    }

    /// Create an engine configured from the environment.
    pub fn from_env() -> Result<Self, MatchError> {
        Self::new(Config::from_env()?)
    }

    /// Create an engine with a custom dataset source.
    pub fn with_fetcher(config: Config, fetcher: Arc<dyn Fetcher>) -> Self {
        let store = config.store_dir().map(DiskStore::new);
        let cache = CacheManager::new(fetcher, store, config.ttl(), config.refresh_backoff());
        log::debug!(
            "engine created (url {}, store dir {:?}, ttl {:?})",
            config.base_url(),
            cache.store().map(DiskStore::root),
            config.ttl()
        );
        Self { config, cache }
    }

    /// Check whether `text` contains a keyword accepted by `filter`.
    ///
    /// `version` pins a dataset version; `None` or an empty string uses the
    /// current dataset. The filter is validated before any network access.
    pub fn is_match(&self, text: &str, filter: &str, version: Option<&str>) -> MatchResult {
        let predicate = parse_filter(filter)?;
        let snapshot = self.snapshot(version)?;
        Ok(Matcher::new(&snapshot, self.config.normalize()).is_match(text, &predicate))
    }

    /// Make sure a snapshot is loaded, fetching it if needed.
    pub fn warm(&self, version: Option<&str>) -> Result<Arc<Snapshot>, MatchError> {
        self.snapshot(version)
    }

    /// Fetch the dataset now, ignoring the TTL.
    pub fn refresh(&self, version: Option<&str>) -> Result<Arc<Snapshot>, MatchError> {
        Ok(self.cache.refresh(pinned(version))?)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    /// Tear the engine down, logging its cache counters.
    pub fn shutdown(self) {
        let stats = self.cache.stats();
        log::info!(
            "engine shutdown: {} fetches ({} failed), {} stale serves, {} store failures",
            stats.fetches,
            stats.fetch_failures,
            stats.stale_serves,
            stats.store_failures
        );
    }

    fn snapshot(&self, version: Option<&str>) -> Result<Arc<Snapshot>, MatchError> {
        Ok(self.cache.get_snapshot(pinned(version))?)
    }
}

/// Empty version strings mean "not pinned".
fn pinned(version: Option<&str>) -> Option<&str> {
    version.map(str::trim).filter(|v| !v.is_empty())
}
