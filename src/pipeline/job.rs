//! Delivery job definitions.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

use crate::events::LogType;

/// Severity carried by a forwarded log job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Success,
    Error,
    Http,
}

impl LogLevel {
    /// Map an observer log type to a deliverable level. Raw data lines are
    /// never delivered as log jobs.
    pub fn from_log_type(kind: LogType) -> Option<Self> {
        match kind {
            LogType::Info => Some(LogLevel::Info),
            LogType::Success => Some(LogLevel::Success),
            LogType::Error => Some(LogLevel::Error),
            LogType::Http => Some(LogLevel::Http),
            LogType::Data => None,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Info => "info",
            LogLevel::Success => "success",
            LogLevel::Error => "error",
            LogLevel::Http => "http",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobKind {
    Data { payload: Vec<u8> },
    Log { level: LogLevel, message: String },
}

/// One unit of outbound work. `enqueued_at` only documents FIFO position; jobs
/// never expire.
#[derive(Debug, Clone)]
pub struct DeliveryJob {
    pub kind: JobKind,
    pub enqueued_at: Instant,
}

impl DeliveryJob {
    pub fn data(payload: Vec<u8>) -> Self {
        Self {
            kind: JobKind::Data { payload },
            enqueued_at: Instant::now(),
        }
    }

    pub fn log(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            kind: JobKind::Log {
                level,
                message: message.into(),
            },
            enqueued_at: Instant::now(),
        }
    }

    /// Short label for drop/progress logs, e.g. `data(12 bytes)`.
    pub fn describe(&self) -> String {
        match &self.kind {
            JobKind::Data { payload } => format!("data({} bytes)", payload.len()),
            JobKind::Log { level, .. } => format!("log({})", level),
        }
    }
}
