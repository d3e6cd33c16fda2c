//! Application configuration management.
//!
//! Configuration is loaded from an optional YAML file with environment variable overrides. The
//! configuration file path defaults to `config.yaml` but can be specified via `-f` flag or the
//! `FILE_RELAY_CONFIG` environment variable.
//!
//! ## Loading Priority
//!
//! Configuration sources are merged in the following order (later sources override earlier ones):
//!
//! 1. **YAML config file** - Base configuration (default: `config.yaml`, may be absent)
//! 2. **Environment variables** - Variables prefixed with `FILE_RELAY_` override YAML values
//! 3. **Legacy variables** - `PROXY_PORT`, `MAIN_SERVER` and `PROXY_API_KEY` map onto `port`,
//!    `main_server` and `api_key`, so existing deployments keep working unchanged
//!
//! For nested config values, use double underscores in environment variables. For example,
//! `FILE_RELAY_UPSTREAM__CONNECT_TIMEOUT=5s` sets the `upstream.connect_timeout` field.
//!
//! ## Usage
//!
//! ```no_run
//! use clap::Parser;
//! use file_relay::config::{Args, Config};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let args = Args::parse();
//! let config = Config::load(&args)?;
//!
//! println!("Relay will bind to {}", config.bind_address());
//! # Ok(())
//! # }
//! ```
//!
//! ## Environment Variable Examples
//!
//! ```bash
//! # Metadata service and its credential (required)
//! MAIN_SERVER="http://localhost:3000"
//! PROXY_API_KEY="secret"
//!
//! # Or, equivalently
//! FILE_RELAY_MAIN_SERVER="http://localhost:3000"
//! FILE_RELAY_API_KEY="secret"
//!
//! # Bound the idle time between body chunks on the file hop
//! FILE_RELAY_UPSTREAM__READ_TIMEOUT=2m
//! ```

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Yaml},
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use crate::errors::Error;

/// Simple CLI args - just for specifying config file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "FILE_RELAY_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the server.
    #[arg(long)]
    pub validate: bool,
}

/// Main application configuration.
///
/// Built once at startup and passed to [`crate::Application::new`]; nothing reads configuration
/// from ambient state after that.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server host to bind to (e.g., "0.0.0.0" for all interfaces)
    pub host: String,
    /// HTTP server port to bind to
    pub port: u16,
    /// Base URL of the metadata service (e.g., "http://localhost:3000"). Required.
    pub main_server: Option<Url>,
    /// Bearer credential sent on every metadata request. Required.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Outbound HTTP settings shared by both upstream hops
    pub upstream: UpstreamConfig,
    /// Enable OpenTelemetry OTLP export for distributed tracing
    pub enable_otel_export: bool,
}

/// Timeouts applied to the metadata and file requests.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct UpstreamConfig {
    /// Maximum time to establish a connection to either upstream
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Total time allowed for the metadata request, body included
    #[serde(with = "humantime_serde")]
    pub metadata_timeout: Duration,
    /// Maximum idle time between reads of an upstream body. Unset means wait indefinitely, which
    /// keeps arbitrarily slow file transfers alive.
    #[serde(with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub read_timeout: Option<Duration>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            metadata_timeout: Duration::from_secs(30),
            read_timeout: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 4000,
            main_server: None,
            api_key: None,
            upstream: UpstreamConfig::default(),
            enable_otel_export: false,
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
        let Some(main_server) = &self.main_server else {
            return Err(Error::Internal {
                operation: "Config validation: main_server is not configured. \
                 Please set MAIN_SERVER (or FILE_RELAY_MAIN_SERVER) or add main_server to the config file."
                    .to_string(),
            });
        };

        if !matches!(main_server.scheme(), "http" | "https") {
            return Err(Error::Internal {
                operation: format!(
                    "Config validation: main_server must be an http or https URL, got scheme '{}'",
                    main_server.scheme()
                ),
            });
        }

        if self.api_key.as_deref().is_none_or(str::is_empty) {
            return Err(Error::Internal {
                operation: "Config validation: api_key is not configured. \
                 Please set PROXY_API_KEY (or FILE_RELAY_API_KEY) or add api_key to the config file."
                    .to_string(),
            });
        }

        Ok(())
    }

    pub fn figment(args: &Args) -> Figment {
        let mut figment = Figment::new()
            // Load base config file
            .merge(Yaml::file(&args.config))
            // FILE_RELAY_CONFIG names the file itself and is consumed by clap
            .merge(Env::prefixed("FILE_RELAY_").ignore(&["config", "api_key"]).split("__"))
            // Variable names used by existing deployments
            .merge(Env::raw().only(&["PROXY_PORT"]).map(|_| "port".into()))
            .merge(Env::raw().only(&["MAIN_SERVER"]).map(|_| "main_server".into()));

        // Env providers parse values ("0123" would become 123), so the key is taken verbatim
        for var in ["FILE_RELAY_API_KEY", "PROXY_API_KEY"] {
            if let Ok(api_key) = std::env::var(var) {
                figment = figment.merge(Serialized::default("api_key", api_key));
            }
        }

        figment
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
