use std::time::Duration;

use thiserror::Error;

use crate::engine::{EngineConfig, RetryPolicy};
use crate::services::session_timing::DurationPolicy;

#[derive(Debug, Clone)]
pub(crate) struct Settings {
    pub(super) server: ServerSettings,
    pub(super) runtime: RuntimeSettings,
    pub(super) api: ApiSettings,
    pub(super) cors: CorsSettings,
    pub(super) backend: BackendSettings,
    pub(super) engine: EngineSettings,
    pub(super) telemetry: TelemetrySettings,
}

#[derive(Debug, Clone)]
pub(crate) struct ServerSettings {
    pub(super) host: ServerHost,
    pub(super) port: ServerPort,
}

#[derive(Debug, Clone)]
pub(crate) struct ApiSettings {
    pub(crate) project_name: String,
    pub(crate) version: String,
    pub(crate) api_v1_str: String,
}

#[derive(Debug, Clone)]
pub(crate) struct CorsSettings {
    pub(crate) origins: Vec<String>,
}

#[derive(Debug, Clone)]
pub(crate) struct BackendSettings {
    pub(crate) base_url: String,
    pub(crate) api_token: String,
    pub(crate) request_timeout_seconds: u64,
    pub(crate) connect_timeout_seconds: u64,
}

#[derive(Debug, Clone)]
pub(crate) struct EngineSettings {
    pub(crate) tick_interval_ms: u64,
    pub(crate) low_time_warning_seconds: u64,
    pub(crate) forced_submit_max_attempts: u32,
    pub(crate) submit_retry_base_delay_ms: u64,
    pub(crate) submit_retry_max_delay_ms: u64,
    pub(crate) fallback_duration_seconds: u64,
    pub(crate) max_server_window_seconds: u64,
    pub(crate) max_exam_duration_seconds: u64,
    pub(crate) attempt_retention_seconds: u64,
}

#[derive(Debug, Clone)]
pub(crate) struct TelemetrySettings {
    pub(crate) log_level: String,
    pub(crate) json: bool,
    pub(crate) prometheus_enabled: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct RuntimeSettings {
    pub(crate) environment: Environment,
    pub(crate) strict_config: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Environment {
    Development,
    Production,
    Staging,
    Test,
}

impl Environment {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Staging => "staging",
            Self::Test => "test",
        }
    }

    pub(super) fn is_production(self) -> bool {
        matches!(self, Self::Production)
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ServerHost(pub(super) String);

#[derive(Debug, Clone, Copy)]
pub(crate) struct ServerPort(pub(super) u16);

#[derive(Debug, Error)]
pub(crate) enum ConfigError {
    #[error("invalid server host: {0}")]
    InvalidHost(String),
    #[error("invalid server port: {0}")]
    InvalidPort(String),
    #[error("invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },
    #[error("invalid cors origins: {0}")]
    InvalidCors(String),
    #[error("missing required secret for {0}")]
    MissingSecret(&'static str),
}

impl BackendSettings {
    /// Base URL without a trailing slash.
    pub(crate) fn base_url(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }
}

impl EngineSettings {
    pub(crate) fn engine_config(&self, request_timeout_seconds: u64) -> EngineConfig {
        EngineConfig {
            tick_interval: Duration::from_millis(self.tick_interval_ms),
            low_time_threshold: self.low_time_warning_seconds,
            retry: RetryPolicy {
                timeout: Duration::from_secs(request_timeout_seconds),
                forced_max_attempts: self.forced_submit_max_attempts,
                base_delay: Duration::from_millis(self.submit_retry_base_delay_ms),
                max_delay: Duration::from_millis(self.submit_retry_max_delay_ms),
            },
        }
    }

    pub(crate) fn duration_policy(&self) -> DurationPolicy {
        DurationPolicy {
            fallback_seconds: self.fallback_duration_seconds,
            max_server_window_seconds: self.max_server_window_seconds,
            max_exam_duration_seconds: self.max_exam_duration_seconds,
        }
    }

    pub(crate) fn attempt_retention(&self) -> Duration {
        Duration::from_secs(self.attempt_retention_seconds)
    }
}

impl ServerHost {
    pub(super) fn parse(value: String) -> Result<Self, ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::InvalidHost(value));
        }

        Ok(Self(value))
    }
}

impl ServerPort {
    pub(super) fn parse(value: String) -> Result<Self, ConfigError> {
        let parsed: u16 = value.parse().map_err(|_| ConfigError::InvalidPort(value.clone()))?;
        if parsed == 0 {
            return Err(ConfigError::InvalidPort(value));
        }

        Ok(Self(parsed))
    }
}
