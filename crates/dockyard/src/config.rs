// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for dockyard.
//!
//! Every knob is read from a `DOCKYARD_*` environment variable and falls back
//! to a default when unset, so `Config::default()` is a usable local setup.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Where the container engine lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEndpoint {
    /// Docker Engine API over plain TCP.
    Tcp { host: String, port: u16 },
    /// Docker Engine API over a Unix socket.
    Socket(PathBuf),
}

/// Settings for the engine command layer.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub endpoint: EngineEndpoint,
    /// Attempts per engine operation before the failure is surfaced.
    pub retries: u32,
}

/// Settings for the build orchestrator.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    /// Attempts while another build holds the slot.
    pub retries: u32,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
}

/// Settings for the run orchestrator.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub poll_interval: Duration,
    /// Remove the container once it exited.
    pub remove: bool,
    /// Timeout applied when a function does not set one.
    pub default_timeout_minutes: u32,
}

/// Separator settings for run log files.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Banner separator written around start/completion lines.
    pub separator_char: char,
    pub separator_length: usize,
    /// Separator used for the per-file header when logs are read back.
    pub header_separator_char: char,
    pub header_separator_length: usize,
}

impl LogConfig {
    pub fn separator(&self) -> String {
        self.separator_char
            .to_string()
            .repeat(self.separator_length)
    }

    pub fn header_separator(&self) -> String {
        self.header_separator_char
            .to_string()
            .repeat(self.header_separator_length)
    }
}

/// Settings for staging → active deployment.
#[derive(Debug, Clone)]
pub struct DeployConfig {
    pub retry_delay: Duration,
    pub retries: u32,
}

/// Maintenance cron expressions and retention windows.
#[derive(Debug, Clone)]
pub struct MaintenanceConfig {
    pub image_update_cron: String,
    pub run_records_cleanup_cron: String,
    pub run_records_retention_days: u32,
    pub logs_cleanup_cron: String,
    pub logs_retention_days: u32,
}

/// Dockyard configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite URL for functions and run records
    pub database_url: String,
    /// HTTP API listen address
    pub http_addr: SocketAddr,
    /// Root of the file/storage area
    pub base_path: PathBuf,
    /// Host-side override for the implicit volume bind (`<path>/<function>`)
    pub volume_path: Option<PathBuf>,
    /// JSON catalog of code types
    pub code_types_file: PathBuf,
    pub engine: EngineConfig,
    pub build: BuildConfig,
    pub run: RunConfig,
    pub logs: LogConfig,
    pub deploy: DeployConfig,
    pub maintenance: MaintenanceConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite:.data/dockyard.db?mode=rwc".to_string(),
            http_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            base_path: PathBuf::from(".data"),
            volume_path: None,
            code_types_file: PathBuf::from("config/code-types.json"),
            engine: EngineConfig {
                endpoint: EngineEndpoint::Tcp {
                    host: "localhost".to_string(),
                    port: 2375,
                },
                retries: 3,
            },
            build: BuildConfig {
                retries: 10,
                backoff_initial: Duration::from_millis(50),
                backoff_max: Duration::from_millis(5000),
            },
            run: RunConfig {
                poll_interval: Duration::from_millis(50),
                remove: true,
                default_timeout_minutes: 30,
            },
            logs: LogConfig {
                separator_char: '-',
                separator_length: 50,
                header_separator_char: '=',
                header_separator_length: 50,
            },
            deploy: DeployConfig {
                retry_delay: Duration::from_millis(200),
                retries: 3,
            },
            maintenance: MaintenanceConfig {
                image_update_cron: "0 0 4 * * *".to_string(),
                run_records_cleanup_cron: "0 0 4 * * 0".to_string(),
                run_records_retention_days: 30,
                logs_cleanup_cron: "0 0 4 * * 0".to_string(),
                logs_retention_days: 30,
            },
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let database_url = var("DOCKYARD_DATABASE_URL").unwrap_or(defaults.database_url);
        let http_addr = parsed("DOCKYARD_HTTP_ADDR", defaults.http_addr)?;
        let base_path = var("DOCKYARD_BASE_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.base_path);
        let volume_path = var("DOCKYARD_VOLUME_PATH").map(PathBuf::from);
        let code_types_file = var("DOCKYARD_CODE_TYPES_FILE")
            .map(PathBuf::from)
            .unwrap_or(defaults.code_types_file);

        let host = var("DOCKYARD_DOCKER_HOST").unwrap_or_else(|| "localhost".to_string());
        let endpoint = if let Some(path) = host.strip_prefix("unix://") {
            EngineEndpoint::Socket(PathBuf::from(path))
        } else if host.starts_with('/') {
            EngineEndpoint::Socket(PathBuf::from(host))
        } else {
            let port = var("DOCKYARD_DOCKER_PORT")
                .unwrap_or_else(|| "2375".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidPort)?;
            EngineEndpoint::Tcp { host, port }
        };

        let engine = EngineConfig {
            endpoint,
            retries: parsed("DOCKYARD_ENGINE_RETRIES", defaults.engine.retries)?,
        };

        let build = BuildConfig {
            retries: parsed("DOCKYARD_BUILD_RETRIES", defaults.build.retries)?,
            backoff_initial: millis("DOCKYARD_BUILD_BACKOFF_MS", defaults.build.backoff_initial)?,
            backoff_max: millis("DOCKYARD_BUILD_BACKOFF_MAX_MS", defaults.build.backoff_max)?,
        };

        let run = RunConfig {
            poll_interval: millis("DOCKYARD_RUN_POLL_MS", defaults.run.poll_interval)?,
            remove: var("DOCKYARD_RUN_REMOVE")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(defaults.run.remove),
            default_timeout_minutes: parsed(
                "DOCKYARD_RUN_DEFAULT_TIMEOUT_MINUTES",
                defaults.run.default_timeout_minutes,
            )?,
        };

        let logs = LogConfig {
            separator_char: parsed("DOCKYARD_LOG_SEPARATOR_CHAR", defaults.logs.separator_char)?,
            separator_length: parsed(
                "DOCKYARD_LOG_SEPARATOR_LENGTH",
                defaults.logs.separator_length,
            )?,
            header_separator_char: parsed(
                "DOCKYARD_LOG_HEADER_SEPARATOR_CHAR",
                defaults.logs.header_separator_char,
            )?,
            header_separator_length: parsed(
                "DOCKYARD_LOG_HEADER_SEPARATOR_LENGTH",
                defaults.logs.header_separator_length,
            )?,
        };

        let deploy = DeployConfig {
            retry_delay: millis("DOCKYARD_DEPLOY_RETRY_DELAY_MS", defaults.deploy.retry_delay)?,
            retries: parsed("DOCKYARD_DEPLOY_RETRIES", defaults.deploy.retries)?,
        };

        let m = defaults.maintenance;
        let maintenance = MaintenanceConfig {
            image_update_cron: var("DOCKYARD_IMAGE_UPDATE_CRON").unwrap_or(m.image_update_cron),
            run_records_cleanup_cron: var("DOCKYARD_RUN_RECORDS_CLEANUP_CRON")
                .unwrap_or(m.run_records_cleanup_cron),
            run_records_retention_days: parsed(
                "DOCKYARD_RUN_RECORDS_RETENTION_DAYS",
                m.run_records_retention_days,
            )?,
            logs_cleanup_cron: var("DOCKYARD_LOGS_CLEANUP_CRON").unwrap_or(m.logs_cleanup_cron),
            logs_retention_days: parsed("DOCKYARD_LOGS_RETENTION_DAYS", m.logs_retention_days)?,
        };

        Ok(Self {
            database_url,
            http_addr,
            base_path,
            volume_path,
            code_types_file,
            engine,
            build,
            run,
            logs,
            deploy,
            maintenance,
        })
    }
}

fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parsed<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match var(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { name, value: raw }),
        None => Ok(default),
    }
}

fn millis(name: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    parsed(name, default.as_millis() as u64).map(Duration::from_millis)
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The engine port number is invalid.
    #[error("Invalid port number")]
    InvalidPort,
    /// A variable is set but cannot be parsed.
    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
}
