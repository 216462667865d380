//! Global configuration parsing, validation, and environment overrides.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// Environment variable overriding the HTTP listening port.
pub const PORT_ENV_VAR: &str = "COURIER_PORT";

/// Connection establishment and recovery settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ConnectionConfig {
    /// Gateway endpoint every session connects to.
    #[serde(default = "default_gateway_url")]
    pub gateway_url: String,
    /// Fixed delay between reconnect attempts.
    #[serde(default = "default_reconnect_backoff_seconds")]
    pub reconnect_backoff_seconds: u64,
    /// How long a dispatcher waits for a connection to reach open.
    #[serde(default = "default_connect_timeout_seconds")]
    pub connect_timeout_seconds: u64,
}

fn default_gateway_url() -> String {
    "ws://127.0.0.1:9443/gateway".into()
}

fn default_reconnect_backoff_seconds() -> u64 {
    5
}

fn default_connect_timeout_seconds() -> u64 {
    30
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            gateway_url: default_gateway_url(),
            reconnect_backoff_seconds: default_reconnect_backoff_seconds(),
            connect_timeout_seconds: default_connect_timeout_seconds(),
        }
    }
}

/// Input caps enforced at session creation.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct LimitsConfig {
    /// Maximum payload count per session.
    #[serde(default = "default_max_payloads")]
    pub max_payloads: usize,
    /// Maximum credential blob size in bytes.
    #[serde(default = "default_max_credential_bytes")]
    pub max_credential_bytes: usize,
    /// Maximum pacing interval accepted from a creation request.
    #[serde(default = "default_max_pacing_seconds")]
    pub max_pacing_seconds: u64,
    /// Retained log records per session (oldest evicted first).
    #[serde(default = "default_log_buffer_cap")]
    pub log_buffer_cap: usize,
}

fn default_max_payloads() -> usize {
    500
}

fn default_max_credential_bytes() -> usize {
    64 * 1024
}

fn default_max_pacing_seconds() -> u64 {
    3600
}

fn default_log_buffer_cap() -> usize {
    1000
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_payloads: default_max_payloads(),
            max_credential_bytes: default_max_credential_bytes(),
            max_pacing_seconds: default_max_pacing_seconds(),
            log_buffer_cap: default_log_buffer_cap(),
        }
    }
}

/// Inactivity sweep settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ReaperConfig {
    /// Interval between sweeps.
    #[serde(default = "default_sweep_interval_seconds")]
    pub sweep_interval_seconds: u64,
    /// Sessions idle longer than this are stopped.
    #[serde(default = "default_inactivity_threshold_seconds")]
    pub inactivity_threshold_seconds: u64,
}

fn default_sweep_interval_seconds() -> u64 {
    300
}

fn default_inactivity_threshold_seconds() -> u64 {
    1800
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            sweep_interval_seconds: default_sweep_interval_seconds(),
            inactivity_threshold_seconds: default_inactivity_threshold_seconds(),
        }
    }
}

fn default_http_port() -> u16 {
    8321
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("courier-data")
}

/// Global configuration parsed from `config.toml`.
///
/// Every field has a default so the server starts without a config file;
/// [`PORT_ENV_VAR`] overrides the port regardless of the file contents.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct GlobalConfig {
    /// HTTP listening port.
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// Root directory for per-session credential material.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Gateway connectivity settings.
    pub connection: ConnectionConfig,
    /// Input caps.
    pub limits: LimitsConfig,
    /// Inactivity sweep settings.
    pub reaper: ReaperConfig,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            http_port: default_http_port(),
            data_dir: default_data_dir(),
            connection: ConnectionConfig::default(),
            limits: LimitsConfig::default(),
            reaper: ReaperConfig::default(),
        }
    }
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Build the default configuration with environment overrides applied.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if an override value is malformed or
    /// validation fails.
    pub fn load_default() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply [`PORT_ENV_VAR`] on top of whatever the file provided.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the variable is set but not a valid
    /// port number.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(raw) = env::var(PORT_ENV_VAR) {
            self.http_port = raw.parse().map_err(|_| {
                AppError::Config(format!("{PORT_ENV_VAR} is not a valid port: {raw}"))
            })?;
        }
        Ok(())
    }

    /// Fixed delay between reconnect attempts.
    #[must_use]
    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_secs(self.connection.reconnect_backoff_seconds)
    }

    /// Deadline for a dispatcher's wait-for-open after a failure.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connection.connect_timeout_seconds)
    }

    /// Interval between reaper sweeps.
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.reaper.sweep_interval_seconds)
    }

    /// Idle time after which a session is evicted.
    #[must_use]
    pub fn inactivity_threshold(&self) -> chrono::Duration {
        let seconds = i64::try_from(self.reaper.inactivity_threshold_seconds).unwrap_or(i64::MAX);
        chrono::Duration::seconds(seconds)
    }

    fn validate(&mut self) -> Result<()> {
        if self.limits.max_payloads == 0 {
            return Err(AppError::Config("max_payloads must be greater than zero".into()));
        }

        if self.limits.log_buffer_cap == 0 {
            return Err(AppError::Config("log_buffer_cap must be greater than zero".into()));
        }

        if self.reaper.inactivity_threshold_seconds == 0 {
            return Err(AppError::Config(
                "inactivity_threshold_seconds must be greater than zero".into(),
            ));
        }

        let url = &self.connection.gateway_url;
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(AppError::Config(format!(
                "gateway_url must be a ws:// or wss:// endpoint, got {url}"
            )));
        }

        Ok(())
    }
}
