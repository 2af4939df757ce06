//! # Configuration Management Module
//!
//! Typed configuration for the bridge, loaded from a TOML file and shared at
//! runtime through [`ConfigStore`].
//!
//! ## Configuration Structure
//!
//! - [`SerialConfig`] - Serial device settings (port, baud rate, framing)
//! - [`HttpConfig`] - Delivery endpoint and enable switch
//! - [`PipelineConfig`] - Batching and queue limits
//! - [`LoggingConfig`] - Process logging settings
//!
//! ## Usage
//!
//! ```rust,no_run
//! use serialbridge::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     println!("Serial Port: {}", config.serial.port);
//!     println!("Endpoint: {}", config.http.url);
//!
//!     Config::create_default("config.toml").await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration File Format
//!
//! ```toml
//! [serial]
//! port = "/dev/ttyUSB0"
//! baud_rate = 9600
//! data_bits = 8
//! stop_bits = 1
//! parity = "none"
//!
//! [http]
//! url = "http://example.com/api/v1/data"
//! enabled = true
//!
//! [pipeline]
//! max_buffer_size = 100
//! flush_interval_ms = 100
//! ```
//!
//! Every section falls back to its defaults, so partial files load. Serial
//! values are validated when a connection is attempted, not at load time: a
//! config with no port selected is perfectly valid to store.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::fs;

use crate::error::BridgeError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Serial line parity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Even,
    Odd,
    Mark,
    Space,
}

impl fmt::Display for Parity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Parity::None => "none",
            Parity::Even => "even",
            Parity::Odd => "odd",
            Parity::Mark => "mark",
            Parity::Space => "space",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Device path, e.g. `/dev/ttyUSB0` or `COM3`. Empty means "not selected".
    pub port: String,
    pub baud_rate: u32,
    pub data_bits: u8,
    pub stop_bits: u8,
    pub parity: Parity,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: 9600,
            data_bits: 8,
            stop_bits: 1,
            parity: Parity::None,
        }
    }
}

impl SerialConfig {
    /// Check the values a device open depends on. Parity support is backend
    /// specific and checked by the opener.
    pub fn validate(&self) -> std::result::Result<(), BridgeError> {
        if self.port.trim().is_empty() {
            return Err(BridgeError::MissingPort);
        }
        if self.baud_rate == 0 {
            return Err(BridgeError::InvalidSetting {
                field: "baud rate",
                value: self.baud_rate.to_string(),
            });
        }
        if !(5..=8).contains(&self.data_bits) {
            return Err(BridgeError::InvalidSetting {
                field: "data bits",
                value: self.data_bits.to_string(),
            });
        }
        if !matches!(self.stop_bits, 1 | 2) {
            return Err(BridgeError::InvalidSetting {
                field: "stop bits",
                value: self.stop_bits.to_string(),
            });
        }
        Ok(())
    }

    /// Short human description used in connect logs: `9600, 8, 1, none`.
    pub fn line_settings(&self) -> String {
        format!(
            "{}, {}, {}, {}",
            self.baud_rate, self.data_bits, self.stop_bits, self.parity
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub url: String,
    /// When false every delivery is skipped and reported as informational.
    pub enabled: bool,
    /// Per-request timeout covering connect, send and response body.
    pub timeout_ms: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            url: "http://example.com/api/v1/data".to_string(),
            enabled: false, // Disabled until a real endpoint is configured
            timeout_ms: 5000,
        }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Chunk count that forces an immediate flush.
    pub max_buffer_size: usize,
    /// Delay between the first buffered chunk and a timer-driven flush (ms).
    pub flush_interval_ms: u64,
    /// Maximum number of pending (not yet started) delivery jobs.
    pub request_queue_limit: usize,
    /// Maximum number of deliveries in flight at once.
    pub max_concurrent_requests: usize,
    /// Also deliver serial link log lines to the endpoint as log jobs.
    pub forward_logs: bool,
    /// Interval for periodic pipeline stats in the process log (0 disables).
    pub stats_interval_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_buffer_size: 100,
            flush_interval_ms: 100,
            request_queue_limit: 50,
            max_concurrent_requests: 3,
            forward_logs: true,
            stats_interval_ms: 30_000,
        }
    }
}

impl PipelineConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn stats_interval(&self) -> Option<Duration> {
        (self.stats_interval_ms > 0).then(|| Duration::from_millis(self.stats_interval_ms))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        config.validate()?;
        Ok(config)
    }

    /// Write this configuration to a file
    pub async fn save(&self, path: &str) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| anyhow!("Failed to serialize config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        Config::default().save(path).await
    }

    /// Reject pipeline limits that would stall the bridge.
    pub fn validate(&self) -> std::result::Result<(), BridgeError> {
        let p = &self.pipeline;
        if p.max_buffer_size == 0 {
            return Err(BridgeError::InvalidConfig(
                "pipeline.max_buffer_size must be > 0".into(),
            ));
        }
        if p.request_queue_limit == 0 {
            return Err(BridgeError::InvalidConfig(
                "pipeline.request_queue_limit must be > 0".into(),
            ));
        }
        if p.max_concurrent_requests == 0 {
            return Err(BridgeError::InvalidConfig(
                "pipeline.max_concurrent_requests must be > 0".into(),
            ));
        }
        if self.http.timeout_ms == 0 {
            return Err(BridgeError::InvalidConfig(
                "http.timeout_ms must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Shared, mutable view of the active configuration (`getConfig`/`setConfig`).
///
/// Readers take a snapshot; the dispatcher re-reads the HTTP section on every
/// attempt so endpoint changes apply to the next delivery.
#[derive(Debug, Clone, Default)]
pub struct ConfigStore {
    inner: Arc<RwLock<Config>>,
}

impl ConfigStore {
    pub fn new(config: Config) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    pub fn get(&self) -> Config {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn set(&self, config: Config) {
        *self.inner.write().unwrap_or_else(|e| e.into_inner()) = config;
    }

    pub fn serial(&self) -> SerialConfig {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .serial
            .clone()
    }

    pub fn http(&self) -> HttpConfig {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .http
            .clone()
    }

    pub fn pipeline(&self) -> PipelineConfig {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .pipeline
            .clone()
    }

    pub fn set_http(&self, http: HttpConfig) {
        self.inner.write().unwrap_or_else(|e| e.into_inner()).http = http;
    }
}
