//! Periodic upstream version check.
//!
//! Fetches the latest release tag and compares it byte-for-byte against the
//! version cached in the settings store. Any difference, including an unset
//! cache, counts as an update. The checker never mutates the cached value;
//! acting on the notification is the caller's decision.

use std::path::Path;
use std::path::PathBuf;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::config::Config;

pub const VERSION_FILENAME: &str = "version.json";

/// Record of the last successful fetch, persisted next to the settings file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    pub latest_version: String,
    // ISO-8601 timestamp (RFC3339)
    pub last_checked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
struct ReleaseInfo {
    tag_name: String,
}

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("version check failed: {0}")]
    Network(String),
    #[error("version endpoint returned HTTP status {0}")]
    HttpStatus(u16),
    #[error("version endpoint returned a malformed payload: {0}")]
    Malformed(String),
    #[error("failed to persist version cache: {0}")]
    Io(#[from] std::io::Error),
}

/// Outcome of one check cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionCheck {
    pub update_available: bool,
    pub latest: String,
    pub cached: Option<String>,
}

/// Stateless service comparing the cached version against upstream.
#[derive(Debug, Clone)]
pub struct VersionChecker {
    client: reqwest::Client,
    release_url: String,
    cache_file: PathBuf,
}

impl VersionChecker {
    pub fn new(config: &Config) -> Result<Self, UpdateError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("accentd/", env!("CARGO_PKG_VERSION")))
            .timeout(config.download_timeout)
            .build()
            .map_err(|err| UpdateError::Network(err.to_string()))?;
        Ok(Self {
            client,
            release_url: config.release_url.clone(),
            cache_file: config.version_cache_file(),
        })
    }

    /// Performs one check against `cached` (the `current-version` settings
    /// value). On success the fetched tag is mirrored into `version.json`.
    pub async fn check_once(&self, cached: Option<&str>) -> Result<VersionCheck, UpdateError> {
        let response = self
            .client
            .get(&self.release_url)
            .send()
            .await
            .map_err(|err| UpdateError::Network(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(UpdateError::HttpStatus(status.as_u16()));
        }
        let release: ReleaseInfo = response
            .json()
            .await
            .map_err(|err| UpdateError::Malformed(err.to_string()))?;
        let latest = release.tag_name;

        let info = VersionInfo {
            latest_version: latest.clone(),
            last_checked_at: Utc::now(),
        };
        self.write_cache(&info)?;

        let update_available = match cached {
            Some(current) if !current.is_empty() => current != latest,
            _ => true,
        };
        debug!(
            "version check: cached={cached:?} latest={latest} update_available={update_available}"
        );
        Ok(VersionCheck {
            update_available,
            latest,
            cached: cached.map(str::to_string),
        })
    }

    /// The record from the last successful fetch, if any.
    pub fn last_check(&self) -> Option<VersionInfo> {
        read_version_info(&self.cache_file)
    }

    fn write_cache(&self, info: &VersionInfo) -> Result<(), UpdateError> {
        if let Some(parent) = self.cache_file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string(info).map_err(|err| UpdateError::Malformed(err.to_string()))?;
        std::fs::write(&self.cache_file, format!("{json}\n"))?;
        Ok(())
    }
}

fn read_version_info(path: &Path) -> Option<VersionInfo> {
    let contents = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&contents).ok()
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::config::ConfigOverrides;
    use pretty_assertions::assert_eq;
    use wiremock::Mock;
    use wiremock::MockServer;
    use wiremock::ResponseTemplate;
    use wiremock::matchers::method;
    use wiremock::matchers::path;

    async fn checker_for(server: &MockServer) -> (VersionChecker, tempfile::TempDir) {
        let home = tempfile::tempdir().unwrap();
        let config = Config::load_with_overrides(ConfigOverrides {
            accentd_home: Some(home.path().to_path_buf()),
            release_url: Some(format!("{}/releases/latest", server.uri())),
            ..Default::default()
        })
        .unwrap();
        (VersionChecker::new(&config).unwrap(), home)
    }

    async fn mount_release(server: &MockServer, tag: &str) {
        Mock::given(method("GET"))
            .and(path("/releases/latest"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                serde_json::json!({ "tag_name": tag }).to_string(),
                "application/json",
            ))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn matching_versions_report_up_to_date() {
        let server = MockServer::start().await;
        mount_release(&server, "v1.0").await;
        let (checker, _home) = checker_for(&server).await;

        let check = checker.check_once(Some("v1.0")).await.unwrap();
        assert!(!check.update_available);
        assert_eq!(check.latest, "v1.0");
    }

    #[tokio::test]
    async fn newer_upstream_version_reports_update() {
        let server = MockServer::start().await;
        mount_release(&server, "v1.1").await;
        let (checker, _home) = checker_for(&server).await;

        let check = checker.check_once(Some("v1.0")).await.unwrap();
        assert!(check.update_available);
        assert_eq!(check.latest, "v1.1");
    }

    #[tokio::test]
    async fn unset_or_empty_cache_counts_as_update() {
        let server = MockServer::start().await;
        mount_release(&server, "v2.0").await;
        let (checker, _home) = checker_for(&server).await;

        assert!(checker.check_once(None).await.unwrap().update_available);
        assert!(checker.check_once(Some("")).await.unwrap().update_available);
    }

    #[tokio::test]
    async fn successful_check_persists_the_cache_record() {
        let server = MockServer::start().await;
        mount_release(&server, "v3.0").await;
        let (checker, _home) = checker_for(&server).await;

        checker.check_once(None).await.unwrap();
        let info = checker.last_check().unwrap();
        assert_eq!(info.latest_version, "v3.0");
    }

    #[tokio::test]
    async fn http_failure_is_a_distinct_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/releases/latest"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let (checker, _home) = checker_for(&server).await;

        let err = checker.check_once(Some("v1.0")).await.unwrap_err();
        assert!(matches!(err, UpdateError::HttpStatus(500)));
    }
}
