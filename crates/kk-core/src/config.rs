//! Engine configuration
//!
//! Resolved from the process environment by [`Config::from_env`], or from any
//! key lookup by [`Config::from_lookup`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::Url;

use crate::hash::hash_key;
use crate::types::Normalize;

pub const ENV_AUTH: &str = "KOKO_KEYWORDS_AUTH";
pub const ENV_URL: &str = "KOKO_KEYWORDS_URL";
pub const ENV_CACHE_DIR: &str = "KOKO_KEYWORDS_CACHE_DIR";
pub const ENV_LIB_PATH: &str = "KOKO_LIB_PATH";
pub const ENV_TTL_SECS: &str = "KOKO_KEYWORDS_TTL_SECS";
pub const ENV_TIMEOUT_SECS: &str = "KOKO_KEYWORDS_TIMEOUT_SECS";

pub const DEFAULT_URL: &str = "https://api.kokocares.org/keywords";
pub const DEFAULT_TTL: Duration = Duration::from_secs(6 * 60 * 60);
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_REFRESH_BACKOFF: Duration = Duration::from_secs(60);

const CACHE_DIR_NAME: &str = "koko_keywords";

/// Error type for configuration resolution.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(String),
    #[error("{0}")]
    InvalidUrl(String),
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },
}

/// Settings for one [`crate::Engine`].
#[derive(Debug, Clone)]
pub struct Config {
    auth_token: String,
    base_url: Url,
    cache_dir: Option<PathBuf>,
    lib_path: Option<PathBuf>,
    ttl: Duration,
    fetch_timeout: Duration,
    refresh_backoff: Duration,
    normalize: Normalize,
}

impl Config {
    /// Build a config from explicit credentials and service URL.
    ///
    /// Credentials embedded in the URL are ignored here; use
    /// [`Config::from_lookup`] for the environment resolution rules.
    pub fn new(auth_token: impl Into<String>, base_url: &str) -> Result<Self, ConfigError> {
        let auth_token = auth_token.into();
        if auth_token.trim().is_empty() {
            return Err(ConfigError::Missing(ENV_AUTH.to_string()));
        }
        let mut base_url = parse_url(base_url)?;
        take_userinfo(&mut base_url);

        Ok(Self {
            auth_token,
            base_url,
            cache_dir: Some(default_cache_dir()),
            lib_path: None,
            ttl: DEFAULT_TTL,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            refresh_backoff: DEFAULT_REFRESH_BACKOFF,
            normalize: Normalize::DEFAULT,
        })
    }

    /// Resolve from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve from an arbitrary key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let raw_url = get(ENV_URL).unwrap_or_else(|| DEFAULT_URL.to_string());
        let mut base_url = parse_url(&raw_url)?;
        let embedded = take_userinfo(&mut base_url);

        let auth_token = get(ENV_AUTH)
            .or(embedded)
            .ok_or_else(|| ConfigError::Missing(ENV_AUTH.to_string()))?;

        let mut config = Self::new(auth_token, base_url.as_str())?;
        if let Some(dir) = get(ENV_CACHE_DIR) {
            config.cache_dir = Some(PathBuf::from(dir));
        }
        config.lib_path = get(ENV_LIB_PATH).map(PathBuf::from);
        if let Some(value) = get(ENV_TTL_SECS) {
            config.ttl = parse_secs(ENV_TTL_SECS, &value)?;
        }
        if let Some(value) = get(ENV_TIMEOUT_SECS) {
            config.fetch_timeout = parse_secs(ENV_TIMEOUT_SECS, &value)?;
        }
        Ok(config)
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    /// Keep snapshots in memory only.
    pub fn without_store(mut self) -> Self {
        self.cache_dir = None;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn with_refresh_backoff(mut self, backoff: Duration) -> Self {
        self.refresh_backoff = backoff;
        self
    }

    pub fn with_normalize(mut self, normalize: Normalize) -> Self {
        self.normalize = normalize;
        self
    }

    pub fn auth_token(&self) -> &str {
        &self.auth_token
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Root of the on-disk cache, shared by every endpoint.
    pub fn cache_dir(&self) -> Option<&Path> {
        self.cache_dir.as_deref()
    }

    /// Directory holding this endpoint's snapshots: `<cache_dir>/<endpoint key>`.
    ///
    /// Configs for different service URLs never read each other's files.
    pub fn store_dir(&self) -> Option<PathBuf> {
        self.cache_dir
            .as_ref()
            .map(|dir| dir.join(endpoint_dir_name(&self.base_url)))
    }

    /// Native library location reported by the bindings, if set.
    pub fn lib_path(&self) -> Option<&Path> {
        self.lib_path.as_deref()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn fetch_timeout(&self) -> Duration {
        self.fetch_timeout
    }

    pub fn refresh_backoff(&self) -> Duration {
        self.refresh_backoff
    }

    pub fn normalize(&self) -> Normalize {
        self.normalize
    }
}

/// `<temp dir>/koko_keywords`
pub fn default_cache_dir() -> PathBuf {
    std::env::temp_dir().join(CACHE_DIR_NAME)
}

/// Hex xxHash64 of the credential-free service URL.
fn endpoint_dir_name(url: &Url) -> String {
    format!("{:016x}", hash_key(url.as_str()))
}

fn parse_url(raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw).map_err(|e| ConfigError::InvalidUrl(format!("{raw}: {e}")))?;
    match url.scheme() {
        "http" | "https" if url.host().is_some() => Ok(url),
        _ => Err(ConfigError::InvalidUrl(format!("{raw}: expected an http(s) url"))),
    }
}

/// Strip `user:password@` from the URL, returning it as a token.
fn take_userinfo(url: &mut Url) -> Option<String> {
    let user = url.username().to_string();
    let password = url.password().map(str::to_string);
    if user.is_empty() && password.is_none() {
        return None;
    }
    // Both setters only fail for URLs that cannot carry credentials.
    let _ = url.set_username("");
    let _ = url.set_password(None);
    Some(match password {
        Some(password) => format!("{user}:{password}"),
        None => user,
    })
}

fn parse_secs(key: &str, value: &str) -> Result<Duration, ConfigError> {
    value
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        })
}
