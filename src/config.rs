//! Configuration loading and types for blobgate.
//!
//! Configuration is read from a YAML file and deserialized into the
//! [`Config`] struct.  Each subsection governs a different part of the
//! system: networking, logging, observability, the upstream Azure
//! storage account, and copy-operation polling.

use serde::Deserialize;
use std::path::Path;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Observability settings (metrics + health probes).
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Upstream Azure Blob Storage settings.
    #[serde(default)]
    pub azure: AzureConfig,

    /// Server-side copy polling settings.
    #[serde(default)]
    pub copy: CopyConfig,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind host address.
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Graceful shutdown timeout in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: text or json.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Observability settings.
///
/// Controls Prometheus metrics collection and the health probe. Both are
/// enabled by default.
#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Enable Prometheus metrics collection and `/metrics` endpoint.
    #[serde(default = "default_true")]
    pub metrics: bool,

    /// Enable the `/health` probe.
    #[serde(default = "default_true")]
    pub health_check: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics: true,
            health_check: true,
        }
    }
}

/// Upstream Azure Blob Storage configuration.
///
/// The account key is resolved from `connection_string` here, or from the
/// `AZURE_STORAGE_KEY` / `AZURE_STORAGE_CONNECTION_STRING` /
/// `AZURE_STORAGE_SAS_TOKEN` environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AzureConfig {
    /// Azure storage account name.
    #[serde(default = "default_account")]
    pub account: String,

    /// Default container for blob operations.
    #[serde(default = "default_container")]
    pub container: String,

    /// Full connection string; alternative to environment-based credentials.
    #[serde(default)]
    pub connection_string: String,
}

impl Default for AzureConfig {
    fn default() -> Self {
        Self {
            account: default_account(),
            container: default_container(),
            connection_string: String::new(),
        }
    }
}

/// Server-side copy polling configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CopyConfig {
    /// Interval between destination-properties polls, in milliseconds.
    #[serde(default = "default_copy_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Maximum total wait for a copy to leave the pending state, in seconds.
    #[serde(default = "default_copy_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for CopyConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_copy_poll_interval_ms(),
            timeout_secs: default_copy_timeout_secs(),
        }
    }
}

// -- Defaults ----------------------------------------------------------------

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    9105
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_account() -> String {
    "devstoreaccount1".to_string()
}

fn default_container() -> String {
    "uploads".to_string()
}

fn default_copy_poll_interval_ms() -> u64 {
    1000
}

fn default_copy_timeout_secs() -> u64 {
    120
}

// -- Loader ------------------------------------------------------------------

/// Load and parse configuration from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    let config: Config = serde_yaml::from_str(&contents)?;
    Ok(config)
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 9105);
        assert_eq!(config.azure.container, "uploads");
        assert_eq!(config.copy.poll_interval_ms, 1000);
        assert_eq!(config.copy.timeout_secs, 120);
        assert!(config.observability.metrics);
    }

    #[test]
    fn test_parse_minimal_yaml() {
        let yaml = r#"
azure:
  account: prodstore
  container: documents
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.azure.account, "prodstore");
        assert_eq!(config.azure.container, "documents");
        // Untouched sections fall back to defaults.
        assert_eq!(config.server.port, 9105);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_parse_full_yaml() {
        let yaml = r#"
server:
  host: 127.0.0.1
  port: 8080
  shutdown_timeout: 5
logging:
  level: debug
  format: json
observability:
  metrics: false
  health_check: true
azure:
  account: mystore
  container: files
  connection_string: "DefaultEndpointsProtocol=https;AccountName=mystore;AccountKey=aGVsbG8=;EndpointSuffix=core.windows.net"
copy:
  poll_interval_ms: 250
  timeout_secs: 10
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.logging.format, "json");
        assert!(!config.observability.metrics);
        assert!(config.azure.connection_string.contains("AccountKey="));
        assert_eq!(config.copy.poll_interval_ms, 250);
        assert_eq!(config.copy.timeout_secs, 10);
    }
}
