//! Configuration for catsync-engine
//!
//! Loaded from `catsync.toml` (see `catsync_common::config` for file
//! resolution). Every field has a default, so an empty or missing file is a
//! valid configuration.
//!
//! ```toml
//! [logging]
//! level = "info"
//!
//! [remote]
//! base_url = "https://catalog.example.com/api"
//! requests_per_second = 5
//! backoff_base_secs = 0.5
//! backoff_cap_secs = 30.0
//! max_attempts = 3
//!
//! [reconcile]
//! cache_ttl_secs = 300
//! duration_tolerance_secs = 5
//! ```

use catsync_common::config::{load_toml_config, resolve_config_path, resolve_secret, LoggingConfig};
use catsync_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "CATSYNC_CONFIG";
/// Environment variable carrying the catalog API token
pub const API_TOKEN_ENV_VAR: &str = "CATSYNC_API_TOKEN";
const APP_NAME: &str = "catsync";

/// Top-level configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub remote: RemoteConfig,
    pub reconcile: ReconcileConfig,
}

/// Remote catalog API and transport retry policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Base URL of the catalog API (no trailing slash needed)
    pub base_url: String,
    /// Bearer token; `CATSYNC_API_TOKEN` takes precedence
    pub api_token: Option<String>,
    /// Per-request timeout
    pub request_timeout_secs: u64,
    /// Entries requested per catalog listing page
    pub page_size: u32,
    /// Steady-state request quota; unlimited when absent
    pub requests_per_second: Option<u32>,
    /// First retry delay
    pub backoff_base_secs: f64,
    /// Upper bound for any computed retry delay
    pub backoff_cap_secs: f64,
    /// Total attempts per logical operation, including the first
    pub max_attempts: u32,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080/api".to_string(),
            api_token: None,
            request_timeout_secs: 30,
            page_size: 500,
            requests_per_second: None,
            backoff_base_secs: 0.5,
            backoff_cap_secs: 30.0,
            max_attempts: 3,
        }
    }
}

impl RemoteConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// First retry delay; zero when the configured value is not a valid duration
    pub fn backoff_base(&self) -> Duration {
        Duration::try_from_secs_f64(self.backoff_base_secs).unwrap_or_default()
    }

    /// Retry delay ceiling; zero when the configured value is not a valid duration
    pub fn backoff_cap(&self) -> Duration {
        Duration::try_from_secs_f64(self.backoff_cap_secs).unwrap_or_default()
    }

    /// Resolve the API token with ENV → TOML priority
    pub fn resolve_api_token(&self) -> Option<String> {
        resolve_secret(API_TOKEN_ENV_VAR, self.api_token.as_deref())
    }
}

/// Reconciliation behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Window within which the remote catalog is assumed unchanged
    pub cache_ttl_secs: u64,
    /// Maximum duration difference for a fingerprint match
    pub duration_tolerance_secs: u32,
    /// Fetch the catalog even when a still-valid snapshot was supplied
    pub force_refresh: bool,
    /// Compare raw metadata strings instead of normalized ones
    pub legacy_exact_match: bool,
    /// Refresh the catalog after each upload and confirm the new entry
    pub verify_uploads: bool,
    /// Tracks classified concurrently
    pub classify_concurrency: usize,
    /// Uploads/patches in flight at once
    pub action_concurrency: usize,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 300,
            duration_tolerance_secs: 5,
            force_refresh: false,
            legacy_exact_match: false,
            verify_uploads: false,
            classify_concurrency: 8,
            action_concurrency: 2,
        }
    }
}

impl ReconcileConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

impl AppConfig {
    /// Reject values that would panic or deadlock later
    pub fn validate(&self) -> Result<()> {
        let remote = &self.remote;
        if Duration::try_from_secs_f64(remote.backoff_base_secs).is_err() {
            return Err(Error::Config(format!(
                "remote.backoff_base_secs must be a non-negative duration, got {}",
                remote.backoff_base_secs
            )));
        }
        if Duration::try_from_secs_f64(remote.backoff_cap_secs).is_err() {
            return Err(Error::Config(format!(
                "remote.backoff_cap_secs must be a non-negative duration, got {}",
                remote.backoff_cap_secs
            )));
        }
        if remote.backoff_cap_secs < remote.backoff_base_secs {
            return Err(Error::Config(format!(
                "remote.backoff_cap_secs ({}) must be >= backoff_base_secs ({})",
                remote.backoff_cap_secs, remote.backoff_base_secs
            )));
        }
        if remote.max_attempts == 0 {
            return Err(Error::Config("remote.max_attempts must be at least 1".to_string()));
        }
        if remote.page_size == 0 {
            return Err(Error::Config("remote.page_size must be at least 1".to_string()));
        }
        if remote.requests_per_second == Some(0) {
            return Err(Error::Config(
                "remote.requests_per_second must be at least 1 (omit it for no quota)".to_string(),
            ));
        }
        if self.reconcile.classify_concurrency == 0 || self.reconcile.action_concurrency == 0 {
            return Err(Error::Config(
                "reconcile.classify_concurrency and action_concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Locate, load and validate the configuration file
///
/// **Priority:** CLI argument → `CATSYNC_CONFIG` → `~/.config/catsync/catsync.toml` → defaults
pub fn load_app_config(cli_path: Option<&Path>) -> Result<AppConfig> {
    let path = resolve_config_path(cli_path, CONFIG_ENV_VAR, APP_NAME);
    let config: AppConfig = load_toml_config(path.as_deref())?;
    config.validate()?;
    Ok(config)
}
