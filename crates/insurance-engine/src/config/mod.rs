use std::env;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use crate::workflows::underwriting::{
    OrchestratorSettings, SubmissionRules, DEFAULT_RETAINED_APPLICATIONS,
};

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the engine and its HTTP surface.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub orchestration: OrchestrationConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::parse(&var_or("APP_ENV", "development"));

        let host = var_or("APP_HOST", "127.0.0.1");
        let port = var_or("APP_PORT", "3000")
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = var_or("APP_LOG_LEVEL", "info");
        let ansi = parse_var::<bool>("APP_LOG_ANSI", false)?;

        let orchestration = OrchestrationConfig {
            max_iterations: parse_var("APP_MAX_ITERATIONS", OrchestrationConfig::DEFAULT_MAX_ITERATIONS)?,
            step_timeout: Duration::from_millis(parse_var(
                "APP_STEP_TIMEOUT_MS",
                OrchestrationConfig::DEFAULT_STEP_TIMEOUT_MS,
            )?),
            step_max_retries: parse_var(
                "APP_STEP_MAX_RETRIES",
                OrchestrationConfig::DEFAULT_STEP_MAX_RETRIES,
            )?,
            message_retention: parse_var(
                "APP_MESSAGE_RETENTION",
                OrchestrationConfig::DEFAULT_MESSAGE_RETENTION,
            )?,
            required_fields: var_or("APP_REQUIRED_FIELDS", "age,location")
                .split(',')
                .map(str::trim)
                .filter(|field| !field.is_empty())
                .map(str::to_string)
                .collect(),
        };

        if orchestration.max_iterations == 0 {
            return Err(ConfigError::InvalidNumber {
                key: "APP_MAX_ITERATIONS",
                value: "0".to_string(),
            });
        }

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level, ansi },
            orchestration,
        })
    }
}

fn var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_var<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidNumber { key, value: raw }),
        Err(_) => Ok(default),
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
    pub ansi: bool,
}

/// Limits applied to every application the orchestrator drives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestrationConfig {
    pub max_iterations: usize,
    pub step_timeout: Duration,
    pub step_max_retries: u32,
    /// Settled applications whose message logs stay queryable.
    pub message_retention: usize,
    pub required_fields: Vec<String>,
}

impl OrchestrationConfig {
    pub const DEFAULT_MAX_ITERATIONS: usize = 32;
    pub const DEFAULT_STEP_TIMEOUT_MS: u64 = 30_000;
    pub const DEFAULT_STEP_MAX_RETRIES: u32 = 2;
    pub const DEFAULT_MESSAGE_RETENTION: usize = DEFAULT_RETAINED_APPLICATIONS;

    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            max_iterations: self.max_iterations,
        }
    }

    pub fn submission_rules(&self) -> SubmissionRules {
        SubmissionRules {
            required_fields: self.required_fields.clone(),
        }
    }
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            max_iterations: Self::DEFAULT_MAX_ITERATIONS,
            step_timeout: Duration::from_millis(Self::DEFAULT_STEP_TIMEOUT_MS),
            step_max_retries: Self::DEFAULT_STEP_MAX_RETRIES,
            message_retention: Self::DEFAULT_MESSAGE_RETENTION,
            required_fields: SubmissionRules::default().required_fields,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("APP_PORT must be a valid u16")]
    InvalidPort,
    #[error("APP_HOST must parse to an IPv4 or IPv6 address")]
    InvalidHost {
        #[source]
        source: std::net::AddrParseError,
    },
    #[error("{key} has an invalid value '{value}'")]
    InvalidNumber { key: &'static str, value: String },
}
