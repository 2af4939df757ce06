//! # serialbridge - Serial to HTTP bridge
//!
//! serialbridge reads raw bytes from a serial device, groups them into batches
//! and POSTs each batch as JSON to a configured HTTP endpoint. Link lifecycle
//! and every delivery attempt are reported to an injected observer.
//!
//! ## Features
//!
//! - **Batching**: chunks are flushed by count (default 100) or after a short
//!   idle timer (default 100 ms), whichever comes first.
//! - **Bounded delivery**: at most 50 pending jobs and 3 requests in flight;
//!   overflow is dropped and reported, never blocks the reader.
//! - **Audit trail**: one structured HTTP record and one log line per attempt.
//! - **Log forwarding**: link log lines can be delivered to the same endpoint.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use serialbridge::bridge::Bridge;
//! use serialbridge::config::Config;
//! use serialbridge::events::LogSink;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     let bridge = Bridge::new(config, Arc::new(LogSink))?;
//!     bridge.connect().await?;
//!     tokio::signal::ctrl_c().await?;
//!     bridge.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`bridge`] - component wiring and host-facing commands
//! - [`serial`] - device access and the connection state machine
//! - [`pipeline`] - batcher, bounded queue and job types
//! - [`http`] - single-attempt delivery and outcome reporting
//! - [`events`] - observer contract and stock sinks
//! - [`config`] - TOML configuration and the shared config store
//! - [`error`] - error taxonomy
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   chunks   ┌─────────────┐  jobs  ┌───────────────┐
//! │  SerialLink  │ ─────────► │ ByteBatcher │ ─────► │ DeliveryQueue │
//! └──────────────┘            └─────────────┘        └───────────────┘
//!        │ status / logs                                     │ ≤ N in flight
//!        ▼                                                   ▼
//! ┌──────────────┐        records + logs             ┌───────────────┐
//! │  EventSink   │ ◄──────────────────────────────── │ HttpDispatcher│
//! └──────────────┘                                   └───────────────┘
//! ```

pub mod bridge;
pub mod config;
pub mod error;
pub mod events;
pub mod http;
pub mod logutil;
pub mod metrics;
pub mod pipeline;
pub mod serial;
