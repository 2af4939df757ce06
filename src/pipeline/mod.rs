//! # Buffered Delivery Pipeline
//!
//! ```text
//! serial chunks ──► ByteBatcher ──► DeliveryQueue ──► Dispatch (HTTP)
//!                   (size/time)     (bounded FIFO,     (one attempt,
//!                                    N slots)           record + log)
//! ```
//!
//! - [`batcher`] - chunk accumulation and flush policy
//! - [`queue`] - bounded, concurrency-capped job queue
//! - [`job`] - data and log job types

pub mod batcher;
pub mod job;
pub mod queue;

pub use batcher::{BatchBuffer, BatchPolicy, BatcherHandle, ByteBatcher};
pub use job::{DeliveryJob, JobKind, LogLevel};
pub use queue::{start_queue, DeliveryQueue, Dispatch, QueueConfig, QueueStats, QueueWorkers};
