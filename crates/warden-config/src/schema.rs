//! Raw configuration schema (as parsed from TOML)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Raw configuration as parsed from TOML
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawConfig {
    /// Config schema version
    pub config_version: u32,

    /// Sampling loop settings
    #[serde(default)]
    pub engine: RawEngineConfig,

    /// Remote sync settings
    #[serde(default)]
    pub sync: RawSyncConfig,

    /// Overlay messages
    #[serde(default)]
    pub messages: RawMessages,

    /// Storage locations
    #[serde(default)]
    pub paths: RawPaths,
}

/// Sampling loop settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawEngineConfig {
    /// Identifier of this device in the remote store
    pub device_id: Option<String>,

    /// How often the foreground app is sampled (default 5000)
    pub sample_interval_ms: Option<u64>,

    /// Trailing window of the usage-event query (default 6000)
    pub sample_window_ms: Option<u64>,

    /// Upper bound for one OS usage query (default 1000)
    pub os_query_timeout_ms: Option<u64>,

    /// Bounded wait for the first policy before running observe-only (default 3000)
    pub startup_fetch_timeout_ms: Option<u64>,

    /// Delay before the watchdog restarts a dead sampling loop (default 1000)
    pub restart_delay_ms: Option<u64>,
}

/// Remote sync settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawSyncConfig {
    /// Interval between usage pushes (default 60)
    pub push_interval_seconds: Option<u64>,

    /// Upper bound for one remote read or write (default 5000)
    pub remote_timeout_ms: Option<u64>,

    /// First retry delay after a remote failure (default 500)
    pub backoff_initial_ms: Option<u64>,

    /// Largest retry delay (default 60000)
    pub backoff_max_ms: Option<u64>,

    /// How often the document store is polled for changes (default 1000)
    pub poll_interval_ms: Option<u64>,
}

/// Overlay message per block reason
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawMessages {
    pub app_blocked: Option<String>,
    pub app_time_exceeded: Option<String>,
    pub total_time_exceeded: Option<String>,
}

/// Storage locations
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawPaths {
    /// Directory for the local usage/audit database
    pub data_dir: Option<PathBuf>,

    /// Root of the directory-backed document store
    pub document_dir: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_config() {
        let toml_str = r#"
            config_version = 1

            [engine]
            device_id = "android-1732956908781-54dxjp5yh"
            sample_interval_ms = 2000
            sample_window_ms = 3000

            [sync]
            push_interval_seconds = 30
            backoff_max_ms = 120000

            [messages]
            total_time_exceeded = "That's enough for today"

            [paths]
            document_dir = "/var/lib/warden/documents"
        "#;

        let config: RawConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.engine.sample_interval_ms, Some(2000));
        assert_eq!(config.sync.push_interval_seconds, Some(30));
        assert!(config.messages.app_blocked.is_none());
        assert!(config.paths.document_dir.is_some());
    }

    #[test]
    fn sections_are_optional() {
        let config: RawConfig = toml::from_str("config_version = 1").unwrap();
        assert!(config.engine.device_id.is_none());
        assert!(config.sync.remote_timeout_ms.is_none());
    }
}
