use super::parsing::{
    env_optional, env_or_default, is_http_url, parse_bool, parse_cors_origins, parse_environment,
    parse_u32, parse_u64,
};
use super::types::{
    ApiSettings, BackendSettings, ConfigError, CorsSettings, EngineSettings, RuntimeSettings,
    ServerHost, ServerPort, ServerSettings, Settings, TelemetrySettings,
};

impl Settings {
    pub(crate) fn load() -> Result<Self, ConfigError> {
        let host = env_or_default("ENGINE_HOST", "0.0.0.0");
        let port = env_or_default("ENGINE_PORT", "8000");

        let environment =
            parse_environment(env_optional("ENGINE_ENV").or_else(|| env_optional("ENVIRONMENT")));
        let strict_config =
            env_optional("ENGINE_STRICT_CONFIG").map(|value| parse_bool(&value)).unwrap_or(false)
                || environment.is_production();

        let project_name = env_or_default("PROJECT_NAME", "Exam Session Engine");
        let version = env_or_default("VERSION", env!("CARGO_PKG_VERSION"));
        let api_v1_str = env_or_default("API_V1_STR", "/api/v1");

        let cors_origins = parse_cors_origins(env_optional("ENGINE_CORS_ORIGINS"))?;

        let backend_base_url = env_or_default("BACKEND_BASE_URL", "http://localhost:8080/api");
        let backend_api_token = env_or_default("BACKEND_API_TOKEN", "");
        let request_timeout_seconds = parse_u64(
            "BACKEND_REQUEST_TIMEOUT_SECONDS",
            env_or_default("BACKEND_REQUEST_TIMEOUT_SECONDS", "30"),
        )?;
        let connect_timeout_seconds = parse_u64(
            "BACKEND_CONNECT_TIMEOUT_SECONDS",
            env_or_default("BACKEND_CONNECT_TIMEOUT_SECONDS", "10"),
        )?;

        let tick_interval_ms =
            parse_u64("TICK_INTERVAL_MS", env_or_default("TICK_INTERVAL_MS", "1000"))?;
        let low_time_warning_seconds = parse_u64(
            "LOW_TIME_WARNING_SECONDS",
            env_or_default("LOW_TIME_WARNING_SECONDS", "300"),
        )?;
        let forced_submit_max_attempts = parse_u32(
            "FORCED_SUBMIT_MAX_ATTEMPTS",
            env_or_default("FORCED_SUBMIT_MAX_ATTEMPTS", "5"),
        )?;
        let submit_retry_base_delay_ms = parse_u64(
            "SUBMIT_RETRY_BASE_DELAY_MS",
            env_or_default("SUBMIT_RETRY_BASE_DELAY_MS", "1000"),
        )?;
        let submit_retry_max_delay_ms = parse_u64(
            "SUBMIT_RETRY_MAX_DELAY_MS",
            env_or_default("SUBMIT_RETRY_MAX_DELAY_MS", "16000"),
        )?;
        let fallback_duration_seconds = parse_u64(
            "FALLBACK_DURATION_SECONDS",
            env_or_default("FALLBACK_DURATION_SECONDS", "2700"),
        )?;
        let max_server_window_seconds = parse_u64(
            "MAX_SERVER_WINDOW_SECONDS",
            env_or_default("MAX_SERVER_WINDOW_SECONDS", "10800"),
        )?;

        let max_exam_duration_seconds = parse_u64(
            "MAX_EXAM_DURATION_SECONDS",
            env_or_default("MAX_EXAM_DURATION_SECONDS", "86400"),
        )?;
        let attempt_retention_seconds = parse_u64(
            "ATTEMPT_RETENTION_SECONDS",
            env_or_default("ATTEMPT_RETENTION_SECONDS", "300"),
        )?;

        let log_level = env_or_default("ENGINE_LOG_LEVEL", "info");
        let json = env_optional("ENGINE_LOG_JSON").map(|value| parse_bool(&value)).unwrap_or(false);
        let prometheus_enabled =
            env_optional("PROMETHEUS_ENABLED").map(|value| parse_bool(&value)).unwrap_or(false);

        let settings = Self {
            server: ServerSettings {
                host: ServerHost::parse(host)?,
                port: ServerPort::parse(port)?,
            },
            runtime: RuntimeSettings { environment, strict_config },
            api: ApiSettings { project_name, version, api_v1_str },
            cors: CorsSettings { origins: cors_origins },
            backend: BackendSettings {
                base_url: backend_base_url,
                api_token: backend_api_token,
                request_timeout_seconds,
                connect_timeout_seconds,
            },
            engine: EngineSettings {
                tick_interval_ms,
                low_time_warning_seconds,
                forced_submit_max_attempts,
                submit_retry_base_delay_ms,
                submit_retry_max_delay_ms,
                fallback_duration_seconds,
                max_server_window_seconds,
                max_exam_duration_seconds,
                attempt_retention_seconds,
            },
            telemetry: TelemetrySettings { log_level, json, prometheus_enabled },
        };

        settings.validate()?;
        Ok(settings)
    }

    pub(crate) fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host.0, self.server.port.0)
    }

    pub(crate) fn server_host(&self) -> &str {
        &self.server.host.0
    }

    pub(crate) fn server_port(&self) -> u16 {
        self.server.port.0
    }

    pub(crate) fn api(&self) -> &ApiSettings {
        &self.api
    }

    pub(crate) fn cors(&self) -> &CorsSettings {
        &self.cors
    }

    pub(crate) fn backend(&self) -> &BackendSettings {
        &self.backend
    }

    pub(crate) fn engine(&self) -> &EngineSettings {
        &self.engine
    }

    pub(crate) fn telemetry(&self) -> &TelemetrySettings {
        &self.telemetry
    }

    pub(crate) fn runtime(&self) -> &RuntimeSettings {
        &self.runtime
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !is_http_url(self.backend.base_url()) {
            return Err(ConfigError::InvalidValue {
                field: "BACKEND_BASE_URL",
                value: self.backend.base_url.clone(),
            });
        }

        if self.backend.request_timeout_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                field: "BACKEND_REQUEST_TIMEOUT_SECONDS",
                value: "0".to_string(),
            });
        }

        if self.engine.tick_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "TICK_INTERVAL_MS",
                value: "0".to_string(),
            });
        }

        if self.engine.forced_submit_max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "FORCED_SUBMIT_MAX_ATTEMPTS",
                value: "0".to_string(),
            });
        }

        if self.engine.submit_retry_base_delay_ms > self.engine.submit_retry_max_delay_ms {
            return Err(ConfigError::InvalidValue {
                field: "SUBMIT_RETRY_BASE_DELAY_MS",
                value: self.engine.submit_retry_base_delay_ms.to_string(),
            });
        }

        if self.engine.fallback_duration_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                field: "FALLBACK_DURATION_SECONDS",
                value: "0".to_string(),
            });
        }

        if self.engine.max_server_window_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                field: "MAX_SERVER_WINDOW_SECONDS",
                value: "0".to_string(),
            });
        }

        if self.engine.max_exam_duration_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                field: "MAX_EXAM_DURATION_SECONDS",
                value: "0".to_string(),
            });
        }

        if !(self.runtime.strict_config || self.runtime.environment.is_production()) {
            return Ok(());
        }

        if self.backend.api_token.is_empty() {
            return Err(ConfigError::MissingSecret("BACKEND_API_TOKEN"));
        }
        if !self.backend.base_url().starts_with("https://") {
            return Err(ConfigError::InvalidValue {
                field: "BACKEND_BASE_URL",
                value: self.backend.base_url.clone(),
            });
        }

        Ok(())
    }
}
