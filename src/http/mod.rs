//! HTTP delivery of batches and forwarded log lines.
//!
//! One call to [`HttpDispatcher::deliver`] is one attempt: no retries, no
//! backoff. Every attempt, whatever its result, publishes exactly one
//! [`HttpLogRecord`] and exactly one human-readable log entry.
//!
//! Wire format (`Content-Type: application/json`):
//!
//! ```text
//! data: {"data_raw": "<lowercase hex>", "timestamp": <epoch ms>}
//! log:  {"level": "info", "message": "...", "timestamp": "<ISO-8601>"}
//! ```

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use log::{debug, warn};
use reqwest::header::CONTENT_TYPE;
use serde::Serialize;
use std::sync::Arc;
use tokio::time::timeout;

use crate::config::{ConfigStore, HttpConfig};
use crate::error::BridgeError;
use crate::events::{EventSink, HttpLogRecord, LogEntry, LogType};
use crate::metrics::PipelineMetrics;
use crate::pipeline::{DeliveryJob, Dispatch, JobKind, LogLevel};

/// Result of a single delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Delivery disabled; nothing was sent.
    Skipped { message: String },
    /// A response with a non-error status was received.
    Success { code: u16, message: String },
    /// An error status (`code` = status) or no response at all (`code` = 0).
    Failure {
        code: u16,
        message: String,
        detail: String,
    },
}

impl DeliveryOutcome {
    pub fn code(&self) -> u16 {
        match self {
            DeliveryOutcome::Skipped { .. } => 0,
            DeliveryOutcome::Success { code, .. } | DeliveryOutcome::Failure { code, .. } => *code,
        }
    }

    pub fn is_success(&self) -> bool {
        !matches!(self, DeliveryOutcome::Failure { .. })
    }
}

#[derive(Debug, Serialize)]
struct DataPayload {
    data_raw: String,
    timestamp: i64,
}

#[derive(Debug, Serialize)]
struct LogPayload<'a> {
    level: LogLevel,
    message: &'a str,
    timestamp: String,
}

/// Performs delivery attempts against the currently configured endpoint.
pub struct HttpDispatcher {
    client: reqwest::Client,
    config: ConfigStore,
    sink: Arc<dyn EventSink>,
    metrics: Arc<PipelineMetrics>,
}

impl HttpDispatcher {
    pub fn new(config: ConfigStore, sink: Arc<dyn EventSink>, metrics: Arc<PipelineMetrics>) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            sink,
            metrics,
        }
    }

    /// Run one attempt for `job` and report it.
    pub async fn deliver(&self, job: &DeliveryJob) -> DeliveryOutcome {
        // Snapshot per attempt so config changes apply to the next delivery.
        let http = self.config.http();
        let body = build_payload(job);

        let (outcome, response) = if !http.enabled {
            let message = match job.kind {
                JobKind::Data { .. } => "HTTP transmission is disabled",
                JobKind::Log { .. } => "HTTP logging is disabled",
            };
            (
                DeliveryOutcome::Skipped {
                    message: message.to_string(),
                },
                None,
            )
        } else {
            self.post(&http, &body).await
        };

        self.report(job, &outcome, body, response);
        outcome
    }

    async fn post(
        &self,
        http: &HttpConfig,
        body: &serde_json::Value,
    ) -> (DeliveryOutcome, Option<String>) {
        let url = match endpoint(http) {
            Ok(url) => url,
            Err(e) => {
                return (
                    DeliveryOutcome::Failure {
                        code: 0,
                        message: e.to_string(),
                        detail: e.to_string(),
                    },
                    None,
                )
            }
        };

        debug!("POST {} ({} ms timeout)", url, http.timeout_ms);
        let request = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .json(body);

        let exchange = async {
            let response = request.send().await?;
            let status = response.status();
            let reason = reason_phrase(&response);
            let text = response.text().await.unwrap_or_default();
            Ok::<_, reqwest::Error>((status, reason, text))
        };

        match timeout(http.timeout(), exchange).await {
            Err(_) => (
                DeliveryOutcome::Failure {
                    code: 0,
                    message: "Request timed out".to_string(),
                    detail: format!("no response within {} ms", http.timeout_ms),
                },
                None,
            ),
            Ok(Err(e)) => (
                DeliveryOutcome::Failure {
                    code: 0,
                    message: "No response".to_string(),
                    detail: BridgeError::Http(e).to_string(),
                },
                None,
            ),
            Ok(Ok((status, reason, text))) => {
                let code = status.as_u16();
                let response = (!text.is_empty()).then_some(text);
                if status.is_success() {
                    (DeliveryOutcome::Success { code, message: reason }, response)
                } else {
                    (
                        DeliveryOutcome::Failure {
                            code,
                            detail: format!("HTTP status {} {}", code, reason),
                            message: reason,
                        },
                        response,
                    )
                }
            }
        }
    }

    fn report(
        &self,
        job: &DeliveryJob,
        outcome: &DeliveryOutcome,
        request: serde_json::Value,
        response: Option<String>,
    ) {
        let (record, entry) = match outcome {
            DeliveryOutcome::Skipped { message } => {
                self.metrics.inc_deliveries_skipped();
                (
                    HttpLogRecord {
                        code: 0,
                        message: message.clone(),
                        request: None,
                        response: None,
                        error: None,
                        timestamp: Utc::now(),
                    },
                    LogEntry::new(
                        LogType::Info,
                        format!("{}; {} not sent", message, job.describe()),
                    ),
                )
            }
            DeliveryOutcome::Success { code, message } => {
                self.metrics.inc_deliveries_ok();
                (
                    HttpLogRecord {
                        code: *code,
                        message: message.clone(),
                        request: Some(request),
                        response,
                        error: None,
                        timestamp: Utc::now(),
                    },
                    LogEntry::new(
                        LogType::Success,
                        format!("HTTP POST succeeded ({} {})", code, message),
                    ),
                )
            }
            DeliveryOutcome::Failure {
                code,
                message,
                detail,
            } => {
                self.metrics.inc_deliveries_failed();
                warn!("delivery of {} failed: {} ({})", job.describe(), message, detail);
                let text = if *code == 0 {
                    format!("HTTP POST failed: {} ({})", message, detail)
                } else {
                    format!("HTTP POST failed: {} {}", code, message)
                };
                (
                    HttpLogRecord {
                        code: *code,
                        message: message.clone(),
                        request: Some(request),
                        response,
                        error: Some(detail.clone()),
                        timestamp: Utc::now(),
                    },
                    LogEntry::new(LogType::Error, text),
                )
            }
        };
        self.sink.publish_http_log(record);
        self.sink.publish_log(entry);
    }
}

#[async_trait]
impl Dispatch for HttpDispatcher {
    async fn dispatch(&self, job: DeliveryJob) {
        self.deliver(&job).await;
    }
}

fn endpoint(http: &HttpConfig) -> Result<reqwest::Url, BridgeError> {
    let raw = http.url.trim();
    if raw.is_empty() {
        return Err(BridgeError::MissingUrl);
    }
    reqwest::Url::parse(raw).map_err(|e| BridgeError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })
}

/// The status line's reason phrase as sent by the server. hyper only keeps
/// it when it differs from the canonical one.
fn reason_phrase(response: &reqwest::Response) -> String {
    match response.extensions().get::<hyper::ext::ReasonPhrase>() {
        Some(phrase) => String::from_utf8_lossy(phrase.as_bytes()).into_owned(),
        None => response
            .status()
            .canonical_reason()
            .unwrap_or("")
            .to_string(),
    }
}

fn build_payload(job: &DeliveryJob) -> serde_json::Value {
    let value = match &job.kind {
        JobKind::Data { payload } => serde_json::to_value(DataPayload {
            data_raw: hex::encode(payload),
            timestamp: Utc::now().timestamp_millis(),
        }),
        JobKind::Log { level, message } => serde_json::to_value(LogPayload {
            level: *level,
            message,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        }),
    };
    value.unwrap_or(serde_json::Value::Null)
}
