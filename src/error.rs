//! Error taxonomy for the bridge.
//!
//! Every failure the pipeline can hit falls into one of four kinds (see
//! [`ErrorKind`]). None of them are allowed to take the process down: callers
//! report them through the event sink and carry on.

use thiserror::Error;

/// Coarse classification used when reporting failures to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing or invalid settings (port, URL, bit/parity values).
    Configuration,
    /// Serial device open/read/close failures.
    Device,
    /// HTTP delivery failures (timeout, error status, transport).
    Delivery,
    /// The delivery queue was full and the job was dropped.
    Capacity,
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("no serial configuration available")]
    NoConfiguration,

    #[error("no serial port selected")]
    MissingPort,

    #[error("invalid {field}: {value}")]
    InvalidSetting { field: &'static str, value: String },

    #[error("parity '{0}' is not supported by the serial backend")]
    UnsupportedParity(String),

    #[error("HTTP URL not configured")]
    MissingUrl,

    #[error("invalid HTTP URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("serial device error: {0}")]
    Device(String),

    #[error("delivery queue full ({limit} pending)")]
    QueueFull { limit: usize },

    #[error("delivery queue is shut down")]
    QueueClosed,

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
}

impl BridgeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BridgeError::NoConfiguration
            | BridgeError::MissingPort
            | BridgeError::InvalidSetting { .. }
            | BridgeError::UnsupportedParity(_)
            | BridgeError::MissingUrl
            | BridgeError::InvalidUrl { .. }
            | BridgeError::InvalidConfig(_) => ErrorKind::Configuration,
            BridgeError::Device(_) => ErrorKind::Device,
            BridgeError::Http(_) => ErrorKind::Delivery,
            BridgeError::QueueFull { .. } | BridgeError::QueueClosed => ErrorKind::Capacity,
        }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
