//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use kk_core::{Config, Engine, FetchError, Fetcher, RawDatasetPayload, RawKeyword};

pub const PINNED_VERSION: &str = "20220206";

/// What the next fetches should do.
#[derive(Debug, Clone)]
pub enum Script {
    /// Serve the sample dataset, versioned by call count
    Serve,
    Fail(FetchError),
    /// Serve a payload with no keywords
    Empty,
}

/// Fake dataset source with a call counter.
pub struct ScriptedFetcher {
    calls: AtomicUsize,
    script: Mutex<Script>,
    delay: Duration,
}

impl ScriptedFetcher {
    pub fn new() -> Arc<Self> {
        Self::with_delay(Duration::ZERO)
    }

    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            script: Mutex::new(Script::Serve),
            delay,
        })
    }

    pub fn failing(err: FetchError) -> Arc<Self> {
        let fetcher = Self::new();
        fetcher.set(Script::Fail(err));
        fetcher
    }

    pub fn set(&self, script: Script) {
        *self.script.lock().unwrap() = script;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Fetcher for ScriptedFetcher {
    fn fetch(&self, version: Option<&str>) -> Result<RawDatasetPayload, FetchError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        let script = self.script.lock().unwrap().clone();
        match script {
            Script::Serve => Ok(sample_payload(
                version.map_or_else(|| format!("2023010{n}"), str::to_string),
            )),
            Script::Fail(err) => Err(err),
            Script::Empty => Ok(RawDatasetPayload {
                version: "empty".to_string(),
                keywords: Vec::new(),
            }),
        }
    }
}

/// Fetcher whose current-dataset fetches can be held open.
///
/// While the gate is closed, each fetch of the current dataset reports on the
/// `started` channel and then waits for a message on the `release` channel.
/// Pinned fetches never wait.
pub struct GatedFetcher {
    calls: AtomicUsize,
    gate: AtomicBool,
    started: Mutex<Sender<()>>,
    release: Mutex<Receiver<()>>,
}

pub struct Gate {
    pub started: Receiver<()>,
    pub release: Sender<()>,
}

impl GatedFetcher {
    pub fn new() -> (Arc<Self>, Gate) {
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let fetcher = Arc::new(Self {
            calls: AtomicUsize::new(0),
            gate: AtomicBool::new(true),
            started: Mutex::new(started_tx),
            release: Mutex::new(release_rx),
        });
        let gate = Gate {
            started: started_rx,
            release: release_tx,
        };
        (fetcher, gate)
    }

    pub fn close(&self, closed: bool) {
        self.gate.store(closed, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Fetcher for GatedFetcher {
    fn fetch(&self, version: Option<&str>) -> Result<RawDatasetPayload, FetchError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if version.is_none() && self.gate.load(Ordering::SeqCst) {
            let _ = self.started.lock().unwrap().send(());
            self.release
                .lock()
                .unwrap()
                .recv_timeout(Duration::from_secs(5))
                .map_err(|_| FetchError::Unreachable("gate never released".into()))?;
        }
        Ok(sample_payload(
            version.map_or_else(|| format!("2023010{n}"), str::to_string),
        ))
    }
}

impl Gate {
    /// Block until a gated fetch is in progress.
    pub fn wait_started(&self) {
        self.started
            .recv_timeout(Duration::from_secs(5))
            .expect("gated fetch never started");
    }

    pub fn open(&self) {
        self.release.send(()).unwrap();
    }
}

fn keyword(phrase: &str, categories: &[&str]) -> RawKeyword {
    RawKeyword {
        phrase: phrase.to_string(),
        categories: categories.iter().map(|c| c.to_string()).collect(),
    }
}

pub fn sample_payload(version: impl Into<String>) -> RawDatasetPayload {
    RawDatasetPayload {
        version: version.into(),
        keywords: vec![
            keyword("sewerslide", &["self-harm"]),
            keyword("kill myself", &["self-harm", "suicide"]),
            keyword("thinspo", &["eating-disorder"]),
            keyword("don't want to live", &["suicide"]),
            keyword("meditation", &["wellness"]),
        ],
    }
}

/// Config pointing nowhere; the fetcher decides what comes back.
pub fn config() -> Config {
    Config::new("test-token", "http://127.0.0.1:9/keywords")
        .unwrap()
        .without_store()
}

pub fn engine(fetcher: &Arc<ScriptedFetcher>) -> Engine {
    Engine::with_fetcher(config(), fetcher.clone())
}
