//! On-disk snapshot store
//!
//! One KKS file per cache key. The root is scoped per service endpoint by
//! [`crate::Config::store_dir`]:
//!
//! ```text
//! <root>/current.kks
//! <root>/versions/<version>.kks
//! ```
//!
//! Writes go to a uniquely named temp file in the target directory and are
//! renamed over the destination, so a concurrent load sees either the old file
//! or the new one, never a partial write.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::snapshot::{decode_snapshot, encode_snapshot, Snapshot, SnapshotError};
use crate::types::CacheKey;

const SNAPSHOT_EXT: &str = "kks";
const CURRENT_FILE: &str = "current.kks";
const VERSIONS_DIR: &str = "versions";

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Error type for snapshot persistence.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode snapshot: {0}")]
    Encode(#[from] SnapshotError),
    #[error("version id cannot be used as a file name: {0:?}")]
    InvalidKey(String),
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Snapshot store rooted at a cache directory.
#[derive(Debug, Clone)]
pub struct DiskStore {
    root: PathBuf,
}

impl DiskStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File backing a cache key.
    pub fn path_for(&self, key: &CacheKey) -> Result<PathBuf, StoreError> {
        match key {
            CacheKey::Current => Ok(self.root.join(CURRENT_FILE)),
            CacheKey::Version(version) => {
                if !is_valid_version_id(version) {
                    return Err(StoreError::InvalidKey(version.clone()));
                }
                Ok(self
                    .root
                    .join(VERSIONS_DIR)
                    .join(format!("{version}.{SNAPSHOT_EXT}")))
            }
        }
    }

    /// Load the snapshot for a key. Missing, unreadable or corrupt files yield `None`.
    pub fn load(&self, key: &CacheKey) -> Option<Snapshot> {
        let path = match self.path_for(key) {
            Ok(path) => path,
            Err(e) => {
                log::debug!("not loading {key} from store: {e}");
                return None;
            }
        };

        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                log::warn!("failed to read cached snapshot '{}': {}", path.display(), e);
                return None;
            }
        };

        match decode_snapshot(&bytes) {
            Ok(snapshot) => {
                log::debug!(
                    "loaded {} from '{}' (dataset {}, {} entries)",
                    key,
                    path.display(),
                    snapshot.version(),
                    snapshot.len()
                );
                Some(snapshot)
            }
            Err(e) => {
                log::warn!("ignoring invalid cached snapshot '{}': {}", path.display(), e);
                None
            }
        }
    }

    /// Persist a snapshot under a key, replacing any previous file atomically.
    pub fn save(&self, key: &CacheKey, snapshot: &Snapshot) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        let bytes = encode_snapshot(snapshot)?;
        write_atomic(&path, &bytes)
    }

    /// Pinned version ids present on disk, sorted.
    pub fn versions(&self) -> Result<Vec<String>, StoreError> {
        let dir = self.root.join(VERSIONS_DIR);
        let read_dir = match fs::read_dir(&dir) {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_err(&dir)(e)),
        };

        let mut versions = Vec::new();
        for item in read_dir {
            let path = item.map_err(io_err(&dir))?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(SNAPSHOT_EXT) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                versions.push(stem.to_string());
            }
        }
        versions.sort();
        Ok(versions)
    }
}

/// Version ids become file names: ASCII alphanumerics, `.`, `-`, `_`, no leading dot.
pub fn is_valid_version_id(version: &str) -> bool {
    !version.is_empty()
        && version.len() <= 128
        && !version.starts_with('.')
        && version
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'.' || b == b'-' || b == b'_')
}

/// Write content atomically (write-to-temp + rename).
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(io_err(parent))?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("snapshot");
    let tmp_path = parent.join(format!(
        ".{}.{}.{}.tmp",
        file_name,
        std::process::id(),
        TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));

    let result = (|| -> Result<(), StoreError> {
        let mut file = fs::File::create(&tmp_path).map_err(io_err(&tmp_path))?;
        file.write_all(bytes).map_err(io_err(&tmp_path))?;
        file.sync_all().map_err(io_err(&tmp_path))?;
        drop(file);

        // On Windows, rename fails if the destination exists; remove it first.
        #[cfg(target_os = "windows")]
        {
            let _ = fs::remove_file(path);
        }
        fs::rename(&tmp_path, path).map_err(io_err(path))
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result
}
