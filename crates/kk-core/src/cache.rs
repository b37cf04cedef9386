//! Snapshot cache with refresh coordination
//!
//! [`CacheManager`] serves keyword snapshots from memory, falls back to the
//! on-disk store on cold start, and fetches from the remote source when data
//! is missing or has outlived its TTL.
//!
//! - Reads are lock-free: the whole [`CacheState`] lives behind an `ArcSwap`
//!   and is replaced wholesale on every change.
//! - Stale-while-revalidate: stale data keeps being served while a refresh is
//!   attempted, and is only replaced on success.
//! - Single-flight: at most one fetch per [`CacheKey`] is in progress; other
//!   callers for that key wait for and share its result.
//! - Pinned versions are immutable and never expire.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant, SystemTime};

use arc_swap::ArcSwap;

use crate::fetcher::{FetchError, Fetcher};
use crate::snapshot::Snapshot;
use crate::store::DiskStore;
use crate::types::CacheKey;

/// Error type for cache lookups.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    #[error("credentials rejected by keyword service")]
    Unauthorized,
    #[error("{0}")]
    Unavailable(String),
    #[error("{0}")]
    Malformed(String),
}

impl From<FetchError> for CacheError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Unauthorized => Self::Unauthorized,
            FetchError::MalformedPayload(msg) => Self::Malformed(msg),
            err @ (FetchError::Unreachable(_) | FetchError::EmptyDataset) => {
                Self::Unavailable(err.to_string())
            }
        }
    }
}

/// Everything the cache holds, swapped as a unit.
#[derive(Debug, Clone, Default)]
pub struct CacheState {
    /// Latest snapshot of the rolling dataset
    pub current: Option<Arc<Snapshot>>,
    /// Pinned versions, keyed by version id
    pub pinned: HashMap<String, Arc<Snapshot>>,
    /// When the current dataset was fetched, including by an earlier process
    /// whose snapshot was loaded from disk
    pub last_refresh: Option<SystemTime>,
    /// Last failed refresh of the current dataset
    pub last_failure: Option<Instant>,
    /// Pinned versions whose last fetch failed, with the error to repeat
    /// until the backoff window has passed
    pub pinned_failures: HashMap<String, (Instant, CacheError)>,
}

/// Counter values at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub fetches: u64,
    pub fetch_failures: u64,
    pub store_failures: u64,
    pub stale_serves: u64,
}

#[derive(Debug, Default)]
struct Counters {
    fetches: AtomicU64,
    fetch_failures: AtomicU64,
    store_failures: AtomicU64,
    stale_serves: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

type FlightResult = Result<Arc<Snapshot>, CacheError>;

/// One in-progress fetch that followers can wait on.
struct Flight {
    result: Mutex<Option<FlightResult>>,
    done: Condvar,
}

impl Flight {
    fn new() -> Self {
        Self {
            result: Mutex::new(None),
            done: Condvar::new(),
        }
    }

    fn wait(&self) -> FlightResult {
        let mut slot = lock(&self.result);
        loop {
            if let Some(result) = slot.as_ref() {
                return result.clone();
            }
            slot = self.done.wait(slot).unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn complete(&self, result: FlightResult) {
        *lock(&self.result) = Some(result);
        self.done.notify_all();
    }
}

enum Role {
    Leader(Arc<Flight>),
    Follower(Arc<Flight>),
}

/// Held by a flight leader. Dropping it unregisters the flight, and releases
/// followers with an error if the leader never produced a result.
struct FlightGuard<'a> {
    flights: &'a Mutex<HashMap<CacheKey, Arc<Flight>>>,
    key: &'a CacheKey,
    flight: Arc<Flight>,
    completed: bool,
}

impl FlightGuard<'_> {
    fn finish(mut self, result: FlightResult) -> FlightResult {
        self.flight.complete(result.clone());
        self.completed = true;
        result
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        lock(self.flights).remove(self.key);
        if !self.completed {
            self.flight.complete(Err(CacheError::Unavailable(format!(
                "refresh of {} aborted",
                self.key
            ))));
        }
    }
}

/// Keyword snapshot cache for one engine.
pub struct CacheManager {
    fetcher: Arc<dyn Fetcher>,
    store: Option<DiskStore>,
    ttl: Duration,
    refresh_backoff: Duration,
    state: ArcSwap<CacheState>,
    flights: Mutex<HashMap<CacheKey, Arc<Flight>>>,
    counters: Counters,
}

impl CacheManager {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        store: Option<DiskStore>,
        ttl: Duration,
        refresh_backoff: Duration,
    ) -> Self {
        Self {
            fetcher,
            store,
            ttl,
            refresh_backoff,
            state: ArcSwap::from_pointee(CacheState::default()),
            flights: Mutex::new(HashMap::new()),
            counters: Counters::default(),
        }
    }

    /// Snapshot for a pinned version, or the current dataset when `None`.
    pub fn get_snapshot(&self, version: Option<&str>) -> Result<Arc<Snapshot>, CacheError> {
        match version {
            Some(version) => self.get_pinned(version),
            None => self.get_current(),
        }
    }

    /// Fetch now regardless of TTL. Pinned versions are immutable, so for them
    /// this is the same as [`CacheManager::get_snapshot`].
    pub fn refresh(&self, version: Option<&str>) -> Result<Arc<Snapshot>, CacheError> {
        if let Some(version) = version {
            return self.get_pinned(version);
        }

        self.single_flight(&CacheKey::Current, || match self.fetch_snapshot(None) {
            Ok(snapshot) => Ok(self.install_fetched(snapshot)),
            Err(err) => {
                self.record_failure();
                Err(err)
            }
        })
    }

    /// Current cache contents.
    pub fn state(&self) -> Arc<CacheState> {
        self.state.load_full()
    }

    pub fn current(&self) -> Option<Arc<Snapshot>> {
        self.state.load().current.clone()
    }

    pub fn store(&self) -> Option<&DiskStore> {
        self.store.as_ref()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            fetches: self.counters.fetches.load(Ordering::Relaxed),
            fetch_failures: self.counters.fetch_failures.load(Ordering::Relaxed),
            store_failures: self.counters.store_failures.load(Ordering::Relaxed),
            stale_serves: self.counters.stale_serves.load(Ordering::Relaxed),
        }
    }

    fn get_current(&self) -> Result<Arc<Snapshot>, CacheError> {
        {
            let state = self.state.load();
            if let Some(current) = &state.current {
                if !current.is_stale(self.ttl) {
                    return Ok(current.clone());
                }
                if self.in_backoff(&state) {
                    log::debug!("refresh backing off, serving stale dataset {}", current.version());
                    return Ok(self.serve_stale(current));
                }
                if self.flight_in_progress(&CacheKey::Current) {
                    log::debug!("refresh in flight, serving stale dataset {}", current.version());
                    return Ok(self.serve_stale(current));
                }
            }
        }
        self.refresh_current()
    }

    fn refresh_current(&self) -> Result<Arc<Snapshot>, CacheError> {
        self.single_flight(&CacheKey::Current, || {
            let mut stale = self.current();

            // Another leader may have just finished
            if let Some(current) = &stale {
                if !current.is_stale(self.ttl) {
                    return Ok(current.clone());
                }
            }

            if stale.is_none() {
                if let Some(snapshot) = self.load_from_store(&CacheKey::Current) {
                    let snapshot = Arc::new(snapshot);
                    self.install_current(snapshot.clone(), false);
                    if !snapshot.is_stale(self.ttl) {
                        log::info!("warm start from disk with dataset {}", snapshot.version());
                        return Ok(snapshot);
                    }
                    log::debug!("dataset {} on disk is stale, refreshing", snapshot.version());
                    stale = Some(snapshot);
                }
            }

            match self.fetch_snapshot(None) {
                Ok(snapshot) => Ok(self.install_fetched(snapshot)),
                Err(err) => {
                    self.record_failure();
                    match stale {
                        Some(stale) => {
                            log::warn!(
                                "refresh failed ({}), serving stale dataset {}",
                                err,
                                stale.version()
                            );
                            Ok(self.serve_stale(&stale))
                        }
                        None => Err(err),
                    }
                }
            }
        })
    }

    fn get_pinned(&self, version: &str) -> Result<Arc<Snapshot>, CacheError> {
        {
            let state = self.state.load();
            if let Some(snapshot) = state.pinned.get(version) {
                return Ok(snapshot.clone());
            }
            if let Some(err) = self.recent_pinned_failure(&state, version) {
                log::debug!("pinned version {version} failed recently, not refetching");
                return Err(err);
            }
        }

        let key = CacheKey::Version(version.to_string());
        self.single_flight(&key, || {
            if let Some(snapshot) = self.state.load().pinned.get(version) {
                return Ok(snapshot.clone());
            }

            match self.load_or_fetch_pinned(&key, version) {
                Ok(snapshot) => {
                    let snapshot = Arc::new(snapshot);
                    self.state.rcu(|state| {
                        let mut next = CacheState::clone(state);
                        next.pinned.insert(version.to_string(), snapshot.clone());
                        next.pinned_failures.remove(version);
                        next
                    });
                    Ok(snapshot)
                }
                Err(err) => {
                    self.record_pinned_failure(version, &err);
                    Err(err)
                }
            }
        })
    }

    fn load_or_fetch_pinned(&self, key: &CacheKey, version: &str) -> Result<Snapshot, CacheError> {
        if let Some(snapshot) = self.load_from_store(key) {
            if snapshot.version() == version {
                log::info!("loaded pinned dataset {version} from disk");
                return Ok(snapshot);
            }
        }

        let snapshot = self.fetch_snapshot(Some(version))?;
        if snapshot.version() != version {
            return Err(CacheError::Malformed(format!(
                "requested version {version}, received {}",
                snapshot.version()
            )));
        }
        self.persist(key, &snapshot);
        Ok(snapshot)
    }

    /// Run `work` as the single fetch for `key`, or wait for the one in progress.
    fn single_flight<F>(&self, key: &CacheKey, work: F) -> FlightResult
    where
        F: FnOnce() -> FlightResult,
    {
        let role = {
            let mut flights = lock(&self.flights);
            match flights.get(key) {
                Some(flight) => Role::Follower(flight.clone()),
                None => {
                    let flight = Arc::new(Flight::new());
                    flights.insert(key.clone(), flight.clone());
                    Role::Leader(flight)
                }
            }
        };

        match role {
            Role::Follower(flight) => {
                log::debug!("waiting for in-flight refresh of {key}");
                flight.wait()
            }
            Role::Leader(flight) => {
                let guard = FlightGuard {
                    flights: &self.flights,
                    key,
                    flight,
                    completed: false,
                };
                let result = work();
                guard.finish(result)
            }
        }
    }

    fn flight_in_progress(&self, key: &CacheKey) -> bool {
        lock(&self.flights).contains_key(key)
    }

    fn recent_pinned_failure(&self, state: &CacheState, version: &str) -> Option<CacheError> {
        state
            .pinned_failures
            .get(version)
            .filter(|(at, _)| at.elapsed() < self.refresh_backoff)
            .map(|(_, err)| err.clone())
    }

    /// Remember a failed pinned fetch for the backoff window. Expired entries
    /// are dropped here, so the map only holds versions that failed recently.
    fn record_pinned_failure(&self, version: &str, err: &CacheError) {
        if self.refresh_backoff.is_zero() {
            return;
        }
        self.state.rcu(|state| {
            let mut next = CacheState::clone(state);
            next.pinned_failures.retain(|_, (at, _)| at.elapsed() < self.refresh_backoff);
            next.pinned_failures.insert(version.to_string(), (Instant::now(), err.clone()));
            next
        });
    }

    fn in_backoff(&self, state: &CacheState) -> bool {
        state
            .last_failure
            .map_or(false, |at| at.elapsed() < self.refresh_backoff)
    }

    fn fetch_snapshot(&self, version: Option<&str>) -> Result<Snapshot, CacheError> {
        self.counters.fetches.fetch_add(1, Ordering::Relaxed);
        let result = self
            .fetcher
            .fetch(version)
            .and_then(|payload| payload.into_snapshot(SystemTime::now()));

        match result {
            Ok(snapshot) => {
                log::info!(
                    "fetched keyword dataset {} ({} entries)",
                    snapshot.version(),
                    snapshot.len()
                );
                Ok(snapshot)
            }
            Err(err) => {
                self.counters.fetch_failures.fetch_add(1, Ordering::Relaxed);
                log::warn!("keyword fetch failed: {err}");
                Err(err.into())
            }
        }
    }

    fn load_from_store(&self, key: &CacheKey) -> Option<Snapshot> {
        self.store.as_ref()?.load(key)
    }

    fn persist(&self, key: &CacheKey, snapshot: &Snapshot) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save(key, snapshot) {
                self.counters.store_failures.fetch_add(1, Ordering::Relaxed);
                log::warn!("failed to persist {key}: {e}");
            }
        }
    }

    fn install_fetched(&self, snapshot: Snapshot) -> Arc<Snapshot> {
        self.persist(&CacheKey::Current, &snapshot);
        let snapshot = Arc::new(snapshot);
        self.install_current(snapshot.clone(), true);
        snapshot
    }

    fn install_current(&self, snapshot: Arc<Snapshot>, fetched: bool) {
        self.state.rcu(|state| {
            let mut next = CacheState::clone(state);
            next.current = Some(snapshot.clone());
            next.last_refresh = Some(snapshot.fetched_at());
            if fetched {
                next.last_failure = None;
            }
            next
        });
    }

    fn record_failure(&self) {
        self.state.rcu(|state| {
            let mut next = CacheState::clone(state);
            next.last_failure = Some(Instant::now());
            next
        });
    }

    fn serve_stale(&self, snapshot: &Arc<Snapshot>) -> Arc<Snapshot> {
        self.counters.stale_serves.fetch_add(1, Ordering::Relaxed);
        snapshot.clone()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::sync::Barrier;
    use std::thread;

    use super::*;
    use crate::fetcher::{RawDatasetPayload, RawKeyword};

    struct StubFetcher {
        calls: AtomicUsize,
        fail: AtomicBool,
        delay: Duration,
    }

    impl StubFetcher {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
                delay: Duration::ZERO,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Fetcher for StubFetcher {
        fn fetch(&self, version: Option<&str>) -> Result<RawDatasetPayload, FetchError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            thread::sleep(self.delay);
            if self.fail.load(Ordering::SeqCst) {
                return Err(FetchError::Unreachable("offline".into()));
            }
            Ok(RawDatasetPayload {
                version: version.map_or_else(|| format!("v{n}"), str::to_string),
                keywords: vec![RawKeyword {
                    phrase: "sewerslide".into(),
                    categories: vec!["self-harm".into()],
                }],
            })
        }
    }

    fn manager(fetcher: Arc<StubFetcher>, ttl: Duration, backoff: Duration) -> CacheManager {
        CacheManager::new(fetcher, None, ttl, backoff)
    }

    #[test]
    fn fresh_snapshot_is_reused() {
        let fetcher = Arc::new(StubFetcher::new());
        let cache = manager(fetcher.clone(), Duration::from_secs(60), Duration::ZERO);
        let a = cache.get_snapshot(None).unwrap();
        let b = cache.get_snapshot(None).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(fetcher.calls(), 1);
        assert!(cache.state().last_refresh.is_some());
    }

    #[test]
    fn stale_snapshot_is_replaced() {
        let fetcher = Arc::new(StubFetcher::new());
        let cache = manager(fetcher.clone(), Duration::ZERO, Duration::ZERO);
        assert_eq!(cache.get_snapshot(None).unwrap().version(), "v1");
        assert_eq!(cache.get_snapshot(None).unwrap().version(), "v2");
        assert_eq!(fetcher.calls(), 2);
    }

    #[test]
    fn failed_refresh_serves_stale_then_backs_off() {
        let fetcher = Arc::new(StubFetcher::new());
        let cache = manager(fetcher.clone(), Duration::ZERO, Duration::from_secs(60));
        cache.get_snapshot(None).unwrap();

        fetcher.fail.store(true, Ordering::SeqCst);
        assert_eq!(cache.get_snapshot(None).unwrap().version(), "v1");
        assert_eq!(fetcher.calls(), 2);

        // within the backoff window nothing is fetched
        assert_eq!(cache.get_snapshot(None).unwrap().version(), "v1");
        assert_eq!(fetcher.calls(), 2);

        let stats = cache.stats();
        assert_eq!(stats.fetches, 2);
        assert_eq!(stats.fetch_failures, 1);
        assert_eq!(stats.stale_serves, 2);
    }

    #[test]
    fn failure_without_data_is_an_error() {
        let fetcher = Arc::new(StubFetcher::new());
        fetcher.fail.store(true, Ordering::SeqCst);
        let cache = manager(fetcher.clone(), Duration::from_secs(60), Duration::from_secs(60));
        assert!(matches!(cache.get_snapshot(None), Err(CacheError::Unavailable(_))));
        // no backoff without data to serve
        assert!(cache.get_snapshot(None).is_err());
        assert_eq!(fetcher.calls(), 2);
    }

    #[test]
    fn pinned_versions_are_independent() {
        let fetcher = Arc::new(StubFetcher::new());
        let cache = manager(fetcher.clone(), Duration::ZERO, Duration::ZERO);
        let pinned = cache.get_snapshot(Some("20220206")).unwrap();
        cache.get_snapshot(None).unwrap();
        cache.get_snapshot(None).unwrap();
        let again = cache.get_snapshot(Some("20220206")).unwrap();
        assert!(Arc::ptr_eq(&pinned, &again));
        assert_eq!(fetcher.calls(), 3);
    }

    #[test]
    fn concurrent_callers_share_one_fetch() {
        let fetcher = Arc::new(StubFetcher {
            delay: Duration::from_millis(100),
            ..StubFetcher::new()
        });
        let cache = Arc::new(manager(fetcher.clone(), Duration::from_secs(60), Duration::ZERO));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    cache.get_snapshot(None).map(|s| s.version().to_string())
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap().unwrap(), "v1");
        }
        assert_eq!(fetcher.calls(), 1);
    }

    #[test]
    fn panicking_leader_releases_followers() {
        struct PanicFetcher;
        impl Fetcher for PanicFetcher {
            fn fetch(&self, _: Option<&str>) -> Result<RawDatasetPayload, FetchError> {
                thread::sleep(Duration::from_millis(100));
                panic!("fetcher exploded");
            }
        }

        let cache = Arc::new(CacheManager::new(
            Arc::new(PanicFetcher),
            None,
            Duration::from_secs(60),
            Duration::ZERO,
        ));
        let leader = {
            let cache = cache.clone();
            thread::spawn(move || cache.get_snapshot(None))
        };
        thread::sleep(Duration::from_millis(20));
        let follower = {
            let cache = cache.clone();
            thread::spawn(move || cache.get_snapshot(None))
        };

        assert!(leader.join().is_err());
        assert!(follower.join().unwrap().is_err());
        assert!(!cache.flight_in_progress(&CacheKey::Current));
    }

    #[test]
    fn failed_pinned_version_backs_off() {
        let fetcher = Arc::new(StubFetcher::new());
        fetcher.fail.store(true, Ordering::SeqCst);
        let cache = manager(fetcher.clone(), Duration::from_secs(60), Duration::from_secs(60));

        assert!(matches!(cache.get_snapshot(Some("20220206")), Err(CacheError::Unavailable(_))));
        assert!(matches!(cache.get_snapshot(Some("20220206")), Err(CacheError::Unavailable(_))));
        assert_eq!(fetcher.calls(), 1);
        assert!(cache.state().pinned.is_empty());
        assert_eq!(cache.state().pinned_failures.len(), 1);

        // other versions are not affected
        fetcher.fail.store(false, Ordering::SeqCst);
        assert_eq!(cache.get_snapshot(Some("20230101")).unwrap().version(), "20230101");
        assert_eq!(fetcher.calls(), 2);
    }

    #[test]
    fn failed_pinned_version_retried_without_backoff() {
        let fetcher = Arc::new(StubFetcher::new());
        fetcher.fail.store(true, Ordering::SeqCst);
        let cache = manager(fetcher.clone(), Duration::from_secs(60), Duration::ZERO);

        assert!(cache.get_snapshot(Some("20220206")).is_err());
        fetcher.fail.store(false, Ordering::SeqCst);
        assert_eq!(cache.get_snapshot(Some("20220206")).unwrap().version(), "20220206");
        assert_eq!(fetcher.calls(), 2);
        assert!(cache.state().pinned_failures.is_empty());
    }

    #[test]
    fn disk_snapshot_sets_last_refresh() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::new(dir.path());
        let fetched_at = SystemTime::now() - Duration::from_secs(30);
        let snapshot = RawDatasetPayload {
            version: "20220206".into(),
            keywords: vec![RawKeyword {
                phrase: "sewerslide".into(),
                categories: Vec::new(),
            }],
        }
        .into_snapshot(fetched_at)
        .unwrap();
        store.save(&CacheKey::Current, &snapshot).unwrap();

        let fetcher = Arc::new(StubFetcher::new());
        let cache = CacheManager::new(
            fetcher.clone(),
            Some(store),
            Duration::from_secs(3600),
            Duration::ZERO,
        );
        assert_eq!(cache.get_snapshot(None).unwrap().version(), "20220206");
        assert_eq!(fetcher.calls(), 0);

        let last_refresh = cache.state().last_refresh.unwrap();
        let drift = last_refresh
            .duration_since(fetched_at)
            .unwrap_or_else(|e| e.duration());
        assert!(drift < Duration::from_millis(1), "{drift:?}");
    }

    #[test]
    fn fetch_error_mapping() {
        assert_eq!(CacheError::from(FetchError::Unauthorized), CacheError::Unauthorized);
        assert!(matches!(
            CacheError::from(FetchError::MalformedPayload("x".into())),
            CacheError::Malformed(_)
        ));
        assert!(matches!(
            CacheError::from(FetchError::EmptyDataset),
            CacheError::Unavailable(_)
        ));
    }
}
