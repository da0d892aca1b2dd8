//! Application configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable overrides. The configuration
//! file path defaults to `config.yaml` but can be specified via `-f` flag or `RESTARTCTL_CONFIG`
//! environment variable.
//!
//! ## Loading Priority
//!
//! Configuration sources are merged in the following order (later sources override earlier ones):
//!
//! 1. **YAML config file** - Base configuration (default: `config.yaml`)
//! 2. **Environment variables** - Variables prefixed with `RESTARTCTL_` override YAML values
//!
//! For nested config values, use double underscores in environment variables. For example,
//! `RESTARTCTL_RESTART__HISTORY_LIMIT=100` sets the `restart.history_limit` field.
//!
//! The same sources are re-read when a restart attempt reloads configuration, see
//! [`crate::config_store::LiveConfig`].
//!
//! ## Configuration Structure
//!
//! - **Server**: `host`, `port` - HTTP server binding configuration
//! - **Restart**: `restart.*` - Drain timeouts, history size, config file watching
//! - **Admission**: `admission.*` - How rejected requests are answered while restarting
//! - **Admin**: `admin.*` - How the principal requesting a restart is identified
//! - **Features**: `enable_metrics`, `enable_otel_export` - Optional feature toggles
//!
//! ## Environment Variable Examples
//!
//! ```bash
//! # Override server port
//! RESTARTCTL_PORT=8080
//!
//! # Wait at most two minutes for in-flight requests
//! RESTARTCTL_RESTART__DEFAULT_DRAIN_TIMEOUT=2m
//!
//! RESTARTCTL_ENABLE_METRICS=true
//! ```

use axum::http::HeaderName;
use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

use crate::errors::Error;

/// Upper bound on `restart.history_limit`; history is held in memory.
const MAX_HISTORY_LIMIT: usize = 10_000;

/// Simple CLI args - just for specifying config file
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "RESTARTCTL_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the server.
    #[arg(long)]
    pub validate: bool,
}

impl Args {
    /// Args pointing at a specific config file, used when the binary's CLI isn't involved.
    pub fn with_config(path: impl Into<String>) -> Self {
        Self {
            config: path.into(),
            validate: false,
        }
    }

    pub fn config_path(&self) -> PathBuf {
        PathBuf::from(&self.config)
    }
}

/// Main application configuration.
///
/// This is the root configuration structure loaded from YAML and environment variables.
/// All fields have sensible defaults defined in the `Default` implementation.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server host to bind to (e.g., "0.0.0.0" for all interfaces)
    pub host: String,
    /// HTTP server port to bind to
    pub port: u16,
    /// Enable Prometheus metrics endpoint at `/internal/metrics`
    pub enable_metrics: bool,
    /// Enable OpenTelemetry OTLP export for distributed tracing
    pub enable_otel_export: bool,
    /// Restart orchestration settings
    pub restart: RestartConfig,
    /// Admission control settings for the protected service routes
    pub admission: AdmissionConfig,
    /// Administrative surface settings
    pub admin: AdminConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            enable_metrics: false,
            enable_otel_export: false,
            restart: RestartConfig::default(),
            admission: AdmissionConfig::default(),
            admin: AdminConfig::default(),
        }
    }
}

/// Restart orchestration settings.
///
/// `history_limit`, `drain_poll_interval` and `estimate_padding` are re-read when an attempt
/// finishes, so values changed by a reloading restart apply from the next attempt on.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct RestartConfig {
    /// Number of finished attempts kept in the in-memory history (oldest dropped first)
    pub history_limit: usize,
    /// How often the drain step re-checks the in-flight count
    #[serde(with = "humantime_serde")]
    pub drain_poll_interval: Duration,
    /// Drain timeout used when a restart request doesn't specify one
    #[serde(with = "humantime_serde")]
    pub default_drain_timeout: Duration,
    /// Largest drain timeout a restart request may ask for
    #[serde(with = "humantime_serde")]
    pub max_drain_timeout: Duration,
    /// Added to the drain timeout when estimating how long an attempt takes
    #[serde(with = "humantime_serde")]
    pub estimate_padding: Duration,
    /// Request a reloading restart whenever the config file changes on disk
    pub watch_config_file: bool,
    /// Quiet period after the last file event before the watcher requests a restart
    #[serde(with = "humantime_serde")]
    pub watch_debounce: Duration,
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            history_limit: 50,
            drain_poll_interval: Duration::from_secs(1),
            default_drain_timeout: Duration::from_secs(30),
            max_drain_timeout: Duration::from_secs(600),
            estimate_padding: Duration::from_secs(10),
            watch_config_file: false,
            watch_debounce: Duration::from_secs(2),
        }
    }
}

/// How requests to the protected service routes are admitted.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct AdmissionConfig {
    /// Value of the `Retry-After` header sent with 503 responses while restarting
    #[serde(with = "humantime_serde")]
    pub retry_after: Duration,
    /// Header carrying the request id (echoed on every admitted response)
    pub request_id_header: String,
    /// Reuse a request id supplied by the client instead of generating one
    pub trust_client_request_id: bool,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            retry_after: Duration::from_secs(5),
            request_id_header: "x-request-id".to_string(),
            trust_client_request_id: false,
        }
    }
}

/// Administrative surface settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct AdminConfig {
    /// Header set by an authenticating proxy in front of the admin API.
    /// Takes precedence over the `requestor` field of request bodies.
    pub principal_header: String,
    /// Principal recorded when neither the header nor the body identifies the caller
    pub default_principal: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            principal_header: "x-restartctl-user".to_string(),
            default_principal: "anonymous".to_string(),
        }
    }
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let config: Self = Self::figment(args).extract()?;
        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    /// Validate the configuration for consistency and required fields
    pub fn validate(&self) -> Result<(), Error> {
        if self.port == 0 {
            return Err(Error::Internal {
                operation: "Config validation: port must be between 1 and 65535".to_string(),
            });
        }

        if self.restart.history_limit == 0 || self.restart.history_limit > MAX_HISTORY_LIMIT {
            return Err(Error::Internal {
                operation: format!(
                    "Config validation: restart.history_limit must be between 1 and {MAX_HISTORY_LIMIT} (got {})",
                    self.restart.history_limit
                ),
            });
        }

        if self.restart.drain_poll_interval.is_zero() {
            return Err(Error::Internal {
                operation: "Config validation: restart.drain_poll_interval must be greater than zero".to_string(),
            });
        }

        if self.restart.default_drain_timeout > self.restart.max_drain_timeout {
            return Err(Error::Internal {
                operation: format!(
                    "Config validation: restart.default_drain_timeout ({}) cannot be greater than restart.max_drain_timeout ({})",
                    humantime::format_duration(self.restart.default_drain_timeout),
                    humantime::format_duration(self.restart.max_drain_timeout)
                ),
            });
        }

        if self.admission.retry_after < Duration::from_secs(1) {
            return Err(Error::Internal {
                operation: "Config validation: admission.retry_after must be at least 1s".to_string(),
            });
        }

        if HeaderName::from_bytes(self.admission.request_id_header.as_bytes()).is_err() {
            return Err(Error::Internal {
                operation: format!(
                    "Config validation: admission.request_id_header '{}' is not a valid header name",
                    self.admission.request_id_header
                ),
            });
        }

        if HeaderName::from_bytes(self.admin.principal_header.as_bytes()).is_err() {
            return Err(Error::Internal {
                operation: format!(
                    "Config validation: admin.principal_header '{}' is not a valid header name",
                    self.admin.principal_header
                ),
            });
        }

        if self.admin.default_principal.trim().is_empty() {
            return Err(Error::Internal {
                operation: "Config validation: admin.default_principal cannot be empty".to_string(),
            });
        }

        Ok(())
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            // Load base config file
            .merge(Yaml::file(&args.config))
            // Environment variables can still override specific values
            .merge(Env::prefixed("RESTARTCTL_").split("__"))
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
