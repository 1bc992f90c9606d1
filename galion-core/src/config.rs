//! Runtime configuration, layered defaults -> file -> environment -> caller.
//!
//! Grounded on the teacher's `app_config.rs` layering (CLI flags overriding
//! a loaded file overriding built-in defaults); `galion-cli` is the caller
//! that applies the final environment/flag layer via [`Config::apply_env`]
//! before handing a `Config` to `galion-core`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration record for a Galion deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database_path: PathBuf,
    pub download_root: PathBuf,
    pub worker_count: usize,
    pub default_max_retries: u32,
    pub job_ttl: Duration,
    pub fingerprint_ttl: Duration,
    pub reaper_interval: Duration,
    pub stale_after: Duration,
    pub completed_log_capacity: usize,
    pub progress_min_interval: Duration,
    /// Default requests-per-minute budget for a platform with no entry in
    /// `rate_limit_overrides` (spec §6 `rate_limit_default_rpm`).
    pub rate_limit_default_rpm: u32,
    /// Per-platform-id overrides of the requests-per-minute budget.
    pub rate_limit_overrides: HashMap<String, u32>,
    /// Path to the external media-extractor binary invoked by
    /// extractor-delegating handlers (spec §6 `external_extractor_path`).
    pub external_extractor_path: PathBuf,
    /// Opaque reference to the out-of-scope encrypted credential store
    /// (spec §6 `credential_store_endpoint`); this crate only consults it
    /// through [`crate::sinks::CredentialStore`], never parses it.
    pub credential_store_endpoint: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("galion.db"),
            download_root: PathBuf::from("downloads"),
            worker_count: 4,
            default_max_retries: 3,
            job_ttl: Duration::from_secs(7 * 24 * 3600),
            fingerprint_ttl: Duration::from_secs(7 * 24 * 3600),
            reaper_interval: Duration::from_secs(60),
            stale_after: Duration::from_secs(10 * 60),
            completed_log_capacity: 1000,
            progress_min_interval: Duration::from_millis(500),
            rate_limit_default_rpm: 60,
            rate_limit_overrides: HashMap::new(),
            external_extractor_path: PathBuf::from("yt-dlp"),
            credential_store_endpoint: None,
        }
    }
}

impl Config {
    /// Requests-per-minute budget for `platform_id`: the per-platform
    /// override if one is configured, otherwise `rate_limit_default_rpm`.
    pub fn rate_limit_for(&self, platform_id: &str) -> u32 {
        self.rate_limit_overrides
            .get(platform_id)
            .copied()
            .unwrap_or(self.rate_limit_default_rpm)
    }
}

/// Errors loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid configuration: {reason}\n  Suggestion: {suggestion}")]
    Invalid {
        reason: String,
        suggestion: &'static str,
    },
}

impl Config {
    /// Loads defaults, then overlays a TOML file if present at `path`.
    pub fn load(path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(path) = path {
            if path.exists() {
                let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                config = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
                    path: path.to_path_buf(),
                    source,
                })?;
            }
        }
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Overlays `GALION_*` environment variables onto an already-loaded config.
    pub fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("GALION_WORKER_COUNT") {
            if let Ok(n) = v.parse() {
                self.worker_count = n;
            }
        }
        if let Ok(v) = std::env::var("GALION_DATABASE_PATH") {
            self.database_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("GALION_DOWNLOAD_ROOT") {
            self.download_root = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("GALION_MAX_RETRIES") {
            if let Ok(n) = v.parse() {
                self.default_max_retries = n;
            }
        }
        if let Ok(v) = std::env::var("GALION_EXTRACTOR_PATH") {
            self.external_extractor_path = PathBuf::from(v);
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_count == 0 {
            return Err(ConfigError::Invalid {
                reason: "worker_count must be at least 1".to_string(),
                suggestion: "set worker_count >= 1 in galion.toml or GALION_WORKER_COUNT",
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn env_override_takes_effect() {
        // SAFETY: test-only, single-threaded env mutation scoped to this test.
        unsafe {
            std::env::set_var("GALION_WORKER_COUNT", "7");
        }
        let mut config = Config::default();
        config.apply_env();
        unsafe {
            std::env::remove_var("GALION_WORKER_COUNT");
        }
        assert_eq!(config.worker_count, 7);
    }

    #[test]
    fn zero_workers_is_invalid() {
        let mut config = Config::default();
        config.worker_count = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rate_limit_falls_back_to_default_without_an_override() {
        let config = Config::default();
        assert_eq!(config.rate_limit_for("youtube"), config.rate_limit_default_rpm);
    }

    #[test]
    fn rate_limit_override_wins_for_its_platform() {
        let mut config = Config::default();
        config.rate_limit_overrides.insert("civitai".to_string(), 10);
        assert_eq!(config.rate_limit_for("civitai"), 10);
        assert_eq!(config.rate_limit_for("youtube"), config.rate_limit_default_rpm);
    }
}
