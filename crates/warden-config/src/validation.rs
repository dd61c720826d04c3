//! Configuration validation

use crate::schema::RawConfig;
use crate::settings::{
    DEFAULT_BACKOFF_INITIAL_MS, DEFAULT_BACKOFF_MAX_MS, DEFAULT_PUSH_INTERVAL_SECONDS,
    DEFAULT_SAMPLE_INTERVAL_MS, DEFAULT_SAMPLE_WINDOW_MS,
};
use thiserror::Error;

/// Validation error
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    #[error("[{section}] {field}: {message}")]
    FieldError {
        section: &'static str,
        field: &'static str,
        message: String,
    },

    #[error("Sample window {window_ms}ms is shorter than sample interval {interval_ms}ms; foreground switches between ticks would be missed")]
    WindowShorterThanInterval { window_ms: u64, interval_ms: u64 },

    #[error("Push interval {push_ms}ms must not be shorter than sample interval {interval_ms}ms")]
    PushFasterThanSampling { push_ms: u64, interval_ms: u64 },

    #[error("Global config error: {0}")]
    GlobalError(String),
}

impl ValidationError {
    fn field(section: &'static str, field: &'static str, message: impl Into<String>) -> Self {
        Self::FieldError {
            section,
            field,
            message: message.into(),
        }
    }
}

/// Validate a raw configuration
pub fn validate_config(config: &RawConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    match config.engine.device_id.as_deref().map(str::trim) {
        None => errors.push(ValidationError::field("engine", "device_id", "is required")),
        Some("") => errors.push(ValidationError::field("engine", "device_id", "cannot be empty")),
        Some(id) if id.contains(['/', '\\']) => errors.push(ValidationError::field(
            "engine",
            "device_id",
            "cannot contain path separators",
        )),
        Some(_) => {}
    }

    let positive = [
        ("engine", "sample_interval_ms", config.engine.sample_interval_ms),
        ("engine", "sample_window_ms", config.engine.sample_window_ms),
        ("engine", "os_query_timeout_ms", config.engine.os_query_timeout_ms),
        ("engine", "restart_delay_ms", config.engine.restart_delay_ms),
        ("sync", "push_interval_seconds", config.sync.push_interval_seconds),
        ("sync", "remote_timeout_ms", config.sync.remote_timeout_ms),
        ("sync", "backoff_initial_ms", config.sync.backoff_initial_ms),
        ("sync", "backoff_max_ms", config.sync.backoff_max_ms),
        ("sync", "poll_interval_ms", config.sync.poll_interval_ms),
    ];
    for (section, field, value) in positive {
        if value == Some(0) {
            errors.push(ValidationError::field(section, field, "must be greater than zero"));
        }
    }

    let interval_ms = config
        .engine
        .sample_interval_ms
        .unwrap_or(DEFAULT_SAMPLE_INTERVAL_MS);
    let window_ms = config
        .engine
        .sample_window_ms
        .unwrap_or(DEFAULT_SAMPLE_WINDOW_MS);
    if interval_ms > 0 && window_ms > 0 && window_ms < interval_ms {
        errors.push(ValidationError::WindowShorterThanInterval {
            window_ms,
            interval_ms,
        });
    }

    let push_ms = config
        .sync
        .push_interval_seconds
        .unwrap_or(DEFAULT_PUSH_INTERVAL_SECONDS)
        .saturating_mul(1000);
    if push_ms > 0 && push_ms < interval_ms {
        errors.push(ValidationError::PushFasterThanSampling {
            push_ms,
            interval_ms,
        });
    }

    let backoff_initial = config
        .sync
        .backoff_initial_ms
        .unwrap_or(DEFAULT_BACKOFF_INITIAL_MS);
    let backoff_max = config.sync.backoff_max_ms.unwrap_or(DEFAULT_BACKOFF_MAX_MS);
    if backoff_max < backoff_initial {
        errors.push(ValidationError::GlobalError(format!(
            "backoff_max_ms ({}) is smaller than backoff_initial_ms ({})",
            backoff_max, backoff_initial
        )));
    }

    let messages = [
        ("app_blocked", &config.messages.app_blocked),
        ("app_time_exceeded", &config.messages.app_time_exceeded),
        ("total_time_exceeded", &config.messages.total_time_exceeded),
    ];
    for (field, message) in messages {
        if message.as_deref().is_some_and(|m| m.trim().is_empty()) {
            errors.push(ValidationError::field("messages", field, "cannot be empty"));
        }
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{RawEngineConfig, RawSyncConfig};

    fn config_with(engine: RawEngineConfig, sync: RawSyncConfig) -> RawConfig {
        RawConfig {
            config_version: 1,
            engine,
            sync,
            messages: Default::default(),
            paths: Default::default(),
        }
    }

    fn device() -> Option<String> {
        Some("tablet".into())
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = config_with(
            RawEngineConfig {
                device_id: device(),
                ..Default::default()
            },
            RawSyncConfig::default(),
        );
        assert!(validate_config(&config).is_empty());
    }

    #[test]
    fn test_missing_device_id() {
        let config = config_with(RawEngineConfig::default(), RawSyncConfig::default());
        let errors = validate_config(&config);
        assert!(errors.iter().any(|e| matches!(
            e,
            ValidationError::FieldError { field: "device_id", .. }
        )));
    }

    #[test]
    fn test_window_shorter_than_interval() {
        let config = config_with(
            RawEngineConfig {
                device_id: device(),
                sample_interval_ms: Some(5000),
                sample_window_ms: Some(1000),
                ..Default::default()
            },
            RawSyncConfig::default(),
        );
        let errors = validate_config(&config);
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::WindowShorterThanInterval { .. })));
    }

    #[test]
    fn test_push_must_be_coarser_than_sampling() {
        let config = config_with(
            RawEngineConfig {
                device_id: device(),
                sample_interval_ms: Some(10_000),
                sample_window_ms: Some(12_000),
                ..Default::default()
            },
            RawSyncConfig {
                push_interval_seconds: Some(5),
                ..Default::default()
            },
        );
        let errors = validate_config(&config);
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::PushFasterThanSampling { .. })));
    }

    #[test]
    fn test_backoff_bounds() {
        let config = config_with(
            RawEngineConfig {
                device_id: device(),
                ..Default::default()
            },
            RawSyncConfig {
                backoff_initial_ms: Some(10_000),
                backoff_max_ms: Some(100),
                ..Default::default()
            },
        );
        let errors = validate_config(&config);
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::GlobalError(_))));
    }
}
