//! Validated engine configuration

use crate::schema::{RawConfig, RawEngineConfig, RawMessages, RawPaths, RawSyncConfig};
use std::path::PathBuf;
use std::time::Duration;
use warden_api::BlockReason;
use warden_util::{default_data_dir, DeviceId};

pub const DEFAULT_SAMPLE_INTERVAL_MS: u64 = 5_000;
pub const DEFAULT_SAMPLE_WINDOW_MS: u64 = 6_000;
pub const DEFAULT_OS_QUERY_TIMEOUT_MS: u64 = 1_000;
pub const DEFAULT_STARTUP_FETCH_TIMEOUT_MS: u64 = 3_000;
pub const DEFAULT_RESTART_DELAY_MS: u64 = 1_000;
pub const DEFAULT_PUSH_INTERVAL_SECONDS: u64 = 60;
pub const DEFAULT_REMOTE_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_BACKOFF_INITIAL_MS: u64 = 500;
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 60_000;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;

/// Validated configuration ready for use by the engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub device_id: DeviceId,
    pub sampling: SamplingConfig,
    pub sync: SyncConfig,
    pub messages: BlockMessages,
    pub paths: PathsConfig,
}

impl EngineConfig {
    /// Convert from raw config (after validation)
    pub fn from_raw(raw: RawConfig) -> Self {
        Self {
            device_id: DeviceId::new(raw.engine.device_id.clone().unwrap_or_default()),
            sampling: SamplingConfig::from_raw(&raw.engine),
            sync: SyncConfig::from_raw(&raw.sync),
            messages: BlockMessages::from_raw(raw.messages),
            paths: PathsConfig::from_raw(raw.paths),
        }
    }

    /// Defaults for a device, used by tests and embedders without a file
    pub fn for_device(device_id: impl Into<String>) -> Self {
        Self {
            device_id: DeviceId::new(device_id),
            sampling: SamplingConfig::from_raw(&RawEngineConfig::default()),
            sync: SyncConfig::from_raw(&RawSyncConfig::default()),
            messages: BlockMessages::default(),
            paths: PathsConfig::from_raw(RawPaths::default()),
        }
    }
}

/// Sampling loop cadence and bounds
#[derive(Debug, Clone)]
pub struct SamplingConfig {
    pub interval: Duration,
    pub window: Duration,
    pub os_query_timeout: Duration,
    pub startup_fetch_timeout: Duration,
    pub restart_delay: Duration,
}

impl SamplingConfig {
    fn from_raw(raw: &RawEngineConfig) -> Self {
        Self {
            interval: ms(raw.sample_interval_ms, DEFAULT_SAMPLE_INTERVAL_MS),
            window: ms(raw.sample_window_ms, DEFAULT_SAMPLE_WINDOW_MS),
            os_query_timeout: ms(raw.os_query_timeout_ms, DEFAULT_OS_QUERY_TIMEOUT_MS),
            startup_fetch_timeout: ms(
                raw.startup_fetch_timeout_ms,
                DEFAULT_STARTUP_FETCH_TIMEOUT_MS,
            ),
            restart_delay: ms(raw.restart_delay_ms, DEFAULT_RESTART_DELAY_MS),
        }
    }
}

/// Remote sync cadence and retry policy
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub push_interval: Duration,
    pub remote_timeout: Duration,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
    pub poll_interval: Duration,
}

impl SyncConfig {
    fn from_raw(raw: &RawSyncConfig) -> Self {
        Self {
            push_interval: Duration::from_secs(
                raw.push_interval_seconds
                    .unwrap_or(DEFAULT_PUSH_INTERVAL_SECONDS),
            ),
            remote_timeout: ms(raw.remote_timeout_ms, DEFAULT_REMOTE_TIMEOUT_MS),
            backoff_initial: ms(raw.backoff_initial_ms, DEFAULT_BACKOFF_INITIAL_MS),
            backoff_max: ms(raw.backoff_max_ms, DEFAULT_BACKOFF_MAX_MS),
            poll_interval: ms(raw.poll_interval_ms, DEFAULT_POLL_INTERVAL_MS),
        }
    }
}

/// Overlay text shown for each block reason
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockMessages {
    pub app_blocked: String,
    pub app_time_exceeded: String,
    pub total_time_exceeded: String,
}

impl BlockMessages {
    fn from_raw(raw: RawMessages) -> Self {
        let defaults = Self::default();
        Self {
            app_blocked: raw.app_blocked.unwrap_or(defaults.app_blocked),
            app_time_exceeded: raw.app_time_exceeded.unwrap_or(defaults.app_time_exceeded),
            total_time_exceeded: raw
                .total_time_exceeded
                .unwrap_or(defaults.total_time_exceeded),
        }
    }

    pub fn message_for(&self, reason: BlockReason) -> &str {
        match reason {
            BlockReason::AppBlocked => &self.app_blocked,
            BlockReason::AppTimeExceeded => &self.app_time_exceeded,
            BlockReason::TotalTimeExceeded => &self.total_time_exceeded,
        }
    }
}

impl Default for BlockMessages {
    fn default() -> Self {
        Self {
            app_blocked: BlockReason::AppBlocked.default_message().into(),
            app_time_exceeded: BlockReason::AppTimeExceeded.default_message().into(),
            total_time_exceeded: BlockReason::TotalTimeExceeded.default_message().into(),
        }
    }
}

/// Storage locations
#[derive(Debug, Clone)]
pub struct PathsConfig {
    pub data_dir: PathBuf,
    pub document_dir: PathBuf,
}

impl PathsConfig {
    fn from_raw(raw: RawPaths) -> Self {
        let data_dir = raw.data_dir.unwrap_or_else(default_data_dir);
        let document_dir = raw
            .document_dir
            .unwrap_or_else(|| data_dir.join("documents"));
        Self {
            data_dir,
            document_dir,
        }
    }
}

fn ms(value: Option<u64>, default: u64) -> Duration {
    Duration::from_millis(value.unwrap_or(default))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_fall_back_per_field() {
        let messages = BlockMessages::from_raw(RawMessages {
            app_blocked: Some("nope".into()),
            ..Default::default()
        });

        assert_eq!(messages.message_for(BlockReason::AppBlocked), "nope");
        assert_eq!(
            messages.message_for(BlockReason::TotalTimeExceeded),
            BlockReason::TotalTimeExceeded.default_message()
        );
    }

    #[test]
    fn document_dir_defaults_under_data_dir() {
        let paths = PathsConfig::from_raw(RawPaths {
            data_dir: Some(PathBuf::from("/srv/warden")),
            document_dir: None,
        });
        assert_eq!(paths.document_dir, PathBuf::from("/srv/warden/documents"));
    }

    #[test]
    fn for_device_uses_defaults() {
        let config = EngineConfig::for_device("tablet");
        assert_eq!(config.device_id.as_str(), "tablet");
        assert_eq!(config.sampling.os_query_timeout, Duration::from_secs(1));
        assert_eq!(config.sync.backoff_initial, Duration::from_millis(500));
    }
}
