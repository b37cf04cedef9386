//! Remote dataset retrieval
//!
//! The [`Fetcher`] trait is the seam between the cache and the network.
//! [`HttpFetcher`] is the production implementation; tests plug in scripted
//! fetchers through [`crate::Engine::with_fetcher`].

use std::time::SystemTime;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::snapshot::Snapshot;
use crate::types::KeywordEntry;

/// Error type for remote fetches.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("credentials rejected by keyword service")]
    Unauthorized,
    #[error("keyword service unreachable: {0}")]
    Unreachable(String),
    #[error("malformed keyword payload: {0}")]
    MalformedPayload(String),
    #[error("keyword payload contains no usable entries")]
    EmptyDataset,
}

/// A keyword as delivered by the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawKeyword {
    pub phrase: String,
    #[serde(default)]
    pub categories: Vec<String>,
}

/// Response body of the keyword service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawDatasetPayload {
    pub version: String,
    pub keywords: Vec<RawKeyword>,
}

impl RawDatasetPayload {
    /// Number of keywords with a non-blank phrase.
    pub fn usable_count(&self) -> usize {
        self.keywords
            .iter()
            .filter(|k| !k.phrase.trim().is_empty())
            .count()
    }

    /// Convert into an immutable snapshot. Blank phrases are skipped.
    pub fn into_snapshot(self, fetched_at: SystemTime) -> Result<Snapshot, FetchError> {
        let total = self.keywords.len();
        let entries: Vec<KeywordEntry> = self
            .keywords
            .into_iter()
            .filter(|k| !k.phrase.trim().is_empty())
            .map(|k| KeywordEntry::new(k.phrase.trim(), k.categories))
            .collect();

        if entries.len() < total {
            log::warn!(
                "dataset {}: skipped {} keyword(s) with blank phrases",
                self.version,
                total - entries.len()
            );
        }

        Snapshot::new(self.version, entries, fetched_at).map_err(|_| FetchError::EmptyDataset)
    }
}

/// Source of keyword datasets.
pub trait Fetcher: Send + Sync {
    /// Fetch the current dataset, or a specific version when pinned.
    fn fetch(&self, version: Option<&str>) -> Result<RawDatasetPayload, FetchError>;
}

/// Fetcher backed by the HTTP keyword service.
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
    url: reqwest::Url,
    auth_token: String,
}

impl HttpFetcher {
    pub fn new(config: &Config) -> Result<Self, FetchError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(config.fetch_timeout())
            .user_agent(concat!("koko-keywords/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::Unreachable(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            url: config.base_url().clone(),
            auth_token: config.auth_token().to_string(),
        })
    }

    pub fn url(&self) -> &reqwest::Url {
        &self.url
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, version: Option<&str>) -> Result<RawDatasetPayload, FetchError> {
        log::debug!("fetching keywords from {} (version {:?})", self.url, version);

        let mut request = self.client.get(self.url.clone());
        if let Some(version) = version {
            request = request.query(&[("version", version)]);
        }
        request = match self.auth_token.split_once(':') {
            Some((user, password)) => request.basic_auth(user, Some(password)),
            None => request.bearer_auth(&self.auth_token),
        };

        let response = request
            .send()
            .map_err(|e| FetchError::Unreachable(format!("request to {} failed: {e}", self.url)))?;

        let status = response.status();
        let body = response
            .text()
            .map_err(|e| FetchError::Unreachable(format!("failed to read response body: {e}")))?;

        log::debug!("keyword service answered {} ({} bytes)", status, body.len());
        classify_response(status, &body)
    }
}

/// Turn a status and body into a payload or the matching error.
pub fn classify_response(status: StatusCode, body: &str) -> Result<RawDatasetPayload, FetchError> {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(FetchError::Unauthorized);
    }
    if !status.is_success() {
        return Err(FetchError::Unreachable(format!("HTTP {status}")));
    }
    parse_payload(body)
}

/// Parse a response body.
pub fn parse_payload(body: &str) -> Result<RawDatasetPayload, FetchError> {
    let payload: RawDatasetPayload =
        serde_json::from_str(body).map_err(|e| FetchError::MalformedPayload(e.to_string()))?;
    if payload.usable_count() == 0 {
        return Err(FetchError::EmptyDataset);
    }
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &str = r#"{
        "version": "20220206",
        "keywords": [
            {"phrase": "sewerslide", "categories": ["self-harm"]},
            {"phrase": "  "},
            {"phrase": "thinspo", "categories": ["eating-disorder"]}
        ]
    }"#;

    #[test]
    fn parses_payload() {
        let payload = parse_payload(BODY).unwrap();
        assert_eq!(payload.version, "20220206");
        assert_eq!(payload.keywords.len(), 3);
        assert!(payload.keywords[1].categories.is_empty());
        assert_eq!(payload.usable_count(), 2);
    }

    #[test]
    fn blank_phrases_are_skipped() {
        let snapshot = parse_payload(BODY)
            .unwrap()
            .into_snapshot(SystemTime::now())
            .unwrap();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.version(), "20220206");
    }

    #[test]
    fn empty_payload_is_rejected() {
        let body = r#"{"version": "1", "keywords": []}"#;
        assert_eq!(parse_payload(body), Err(FetchError::EmptyDataset));

        let payload = RawDatasetPayload {
            version: "1".into(),
            keywords: vec![RawKeyword {
                phrase: " ".into(),
                categories: vec![],
            }],
        };
        assert_eq!(payload.into_snapshot(SystemTime::now()), Err(FetchError::EmptyDataset));
    }

    #[test]
    fn malformed_payloads() {
        for body in ["", "not json", r#"{"keywords": []}"#, r#"{"version": 1, "keywords": []}"#] {
            assert!(
                matches!(parse_payload(body), Err(FetchError::MalformedPayload(_))),
                "{body:?}"
            );
        }
    }

    #[test]
    fn status_classification() {
        assert_eq!(
            classify_response(StatusCode::UNAUTHORIZED, BODY),
            Err(FetchError::Unauthorized)
        );
        assert_eq!(
            classify_response(StatusCode::FORBIDDEN, ""),
            Err(FetchError::Unauthorized)
        );
        assert!(matches!(
            classify_response(StatusCode::INTERNAL_SERVER_ERROR, BODY),
            Err(FetchError::Unreachable(_))
        ));
        assert!(classify_response(StatusCode::OK, BODY).is_ok());
    }
}
