//! Process configuration.
//!
//! A single flat struct read from the environment at startup. There is no
//! other module-level mutable state in the workspace; everything downstream
//! receives its settings from here.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Result, StratusError};

/// Recognized settings, with their environment variable names.
#[derive(Debug, Clone)]
pub struct Config {
    /// `STORAGE_ROOT`: filesystem root for object payloads.
    pub storage_root: PathBuf,
    /// `DATABASE_URL`: metadata store DSN.
    pub database_url: String,
    /// `SYNC_INTERVAL`: reconciler period, seconds.
    pub sync_interval: Duration,
    /// `LIFECYCLE_INTERVAL`: lifecycle worker period, seconds.
    pub lifecycle_interval: Duration,
    /// `CONTAINER_RUNTIME_ENDPOINT`: host container runtime address.
    pub runtime_endpoint: String,
    /// `AUTO_MODE_SUPERNET`: CIDR the auto-mode fan-out carves from.
    pub auto_mode_supernet: String,
    /// `HOST_NETWORK_SUPERNET`: reserved range for per-VPC host CIDRs.
    pub host_network_supernet: String,
    /// `DEFAULT_PROJECT`: project used when a request names none.
    pub default_project: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_root: PathBuf::from("./stratus-data"),
            database_url: "sqlite://stratus.db?mode=rwc".to_string(),
            sync_interval: Duration::from_secs(5),
            lifecycle_interval: Duration::from_secs(300),
            runtime_endpoint: "unix:///var/run/docker.sock".to_string(),
            auto_mode_supernet: "10.128.0.0/9".to_string(),
            host_network_supernet: "172.24.0.0/13".to_string(),
            default_project: "local-project".to_string(),
        }
    }
}

impl Config {
    /// Build the configuration from the process environment, falling back
    /// to defaults for anything unset. Interval variables are whole
    /// seconds; a value that fails to parse is an error rather than a
    /// silent fallback.
    pub fn from_env() -> Result<Self> {
        let defaults = Config::default();
        Ok(Self {
            storage_root: env_var("STORAGE_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.storage_root),
            database_url: env_var("DATABASE_URL").unwrap_or(defaults.database_url),
            sync_interval: parse_secs("SYNC_INTERVAL", defaults.sync_interval)?,
            lifecycle_interval: parse_secs("LIFECYCLE_INTERVAL", defaults.lifecycle_interval)?,
            runtime_endpoint: env_var("CONTAINER_RUNTIME_ENDPOINT")
                .unwrap_or(defaults.runtime_endpoint),
            auto_mode_supernet: env_var("AUTO_MODE_SUPERNET").unwrap_or(defaults.auto_mode_supernet),
            host_network_supernet: env_var("HOST_NETWORK_SUPERNET")
                .unwrap_or(defaults.host_network_supernet),
            default_project: env_var("DEFAULT_PROJECT").unwrap_or(defaults.default_project),
        })
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn parse_secs(key: &str, default: Duration) -> Result<Duration> {
    match env_var(key) {
        None => Ok(default),
        Some(raw) => raw
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| StratusError::invalid_argument(format!("{key} must be whole seconds, got '{raw}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_self_contained() {
        let config = Config::default();
        assert_eq!(config.sync_interval, Duration::from_secs(5));
        assert_eq!(config.lifecycle_interval, Duration::from_secs(300));
        assert_eq!(config.auto_mode_supernet, "10.128.0.0/9");
        assert_eq!(config.default_project, "local-project");
        assert!(config.database_url.starts_with("sqlite:"));
    }
}
