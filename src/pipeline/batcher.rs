//! Size/time based batching of raw serial chunks.
//!
//! Chunks are appended to a [`BatchBuffer`]. The buffer is flushed into a
//! single data job when it holds `max_chunks` chunks, or when `flush_interval`
//! has passed since the first chunk after the previous flush, whichever comes
//! first. Buffer and timer live on one home task, so a threshold flush and a
//! timer flush can never interleave.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

use super::job::DeliveryJob;
use super::queue::DeliveryQueue;
use crate::config::PipelineConfig;
use crate::error::BridgeError;
use crate::events::{EventSink, LogType};
use crate::logutil::hex_preview;
use crate::metrics::PipelineMetrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPolicy {
    pub max_chunks: usize,
    pub flush_interval: Duration,
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self {
            max_chunks: 100,
            flush_interval: Duration::from_millis(100),
        }
    }
}

impl From<&PipelineConfig> for BatchPolicy {
    fn from(p: &PipelineConfig) -> Self {
        Self {
            max_chunks: p.max_buffer_size.max(1),
            flush_interval: p.flush_interval(),
        }
    }
}

/// Ordered chunks received since the last flush.
#[derive(Debug, Default)]
pub struct BatchBuffer {
    chunks: Vec<Vec<u8>>,
    max_chunks: usize,
}

impl BatchBuffer {
    pub fn new(max_chunks: usize) -> Self {
        Self {
            chunks: Vec::new(),
            max_chunks: max_chunks.max(1),
        }
    }

    /// Append a chunk; returns true when the buffer reached its chunk limit
    /// and must be flushed now.
    pub fn push(&mut self, chunk: Vec<u8>) -> bool {
        self.chunks.push(chunk);
        self.chunks.len() >= self.max_chunks
    }

    /// Concatenate and clear. Returns `None` when there are no bytes.
    pub fn take(&mut self) -> Option<Vec<u8>> {
        let chunks = std::mem::take(&mut self.chunks);
        let batch = chunks.concat();
        (!batch.is_empty()).then_some(batch)
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

enum BatcherCommand {
    Bytes(Vec<u8>),
    Flush(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

/// Producer side of a running batcher.
#[derive(Clone, Debug)]
pub struct BatcherHandle {
    tx: mpsc::UnboundedSender<BatcherCommand>,
}

impl std::fmt::Debug for BatcherCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BatcherCommand::Bytes(b) => write!(f, "Bytes({})", b.len()),
            BatcherCommand::Flush(_) => f.write_str("Flush"),
            BatcherCommand::Shutdown(_) => f.write_str("Shutdown"),
        }
    }
}

impl BatcherHandle {
    /// Hand a chunk to the batcher. Never blocks.
    pub fn push(&self, chunk: Vec<u8>) {
        if self.tx.send(BatcherCommand::Bytes(chunk)).is_err() {
            log::debug!("batcher stopped; chunk discarded");
        }
    }

    /// Flush whatever is buffered right now and wait until it was enqueued.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(BatcherCommand::Flush(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    /// Flush the remainder and stop the home task.
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(BatcherCommand::Shutdown(tx)).is_ok() {
            let _ = rx.await;
        }
    }
}

pub struct ByteBatcher {
    buffer: BatchBuffer,
    policy: BatchPolicy,
    queue: DeliveryQueue,
    sink: Arc<dyn EventSink>,
    metrics: Arc<PipelineMetrics>,
}

impl ByteBatcher {
    pub fn new(
        policy: BatchPolicy,
        queue: DeliveryQueue,
        sink: Arc<dyn EventSink>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            buffer: BatchBuffer::new(policy.max_chunks),
            policy,
            queue,
            sink,
            metrics,
        }
    }

    /// Start the home task.
    pub fn spawn(self) -> (BatcherHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(self.run(rx));
        (BatcherHandle { tx }, handle)
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<BatcherCommand>) {
        let mut deadline: Option<Instant> = None;
        loop {
            let armed = deadline;
            let timer = async move {
                match armed {
                    Some(at) => sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };
            tokio::select! {
                cmd = rx.recv() => match cmd {
                    Some(BatcherCommand::Bytes(chunk)) => self.on_bytes(chunk, &mut deadline),
                    Some(BatcherCommand::Flush(done)) => {
                        deadline = None;
                        self.flush();
                        let _ = done.send(());
                    }
                    Some(BatcherCommand::Shutdown(done)) => {
                        self.flush();
                        let _ = done.send(());
                        break;
                    }
                    None => {
                        self.flush();
                        break;
                    }
                },
                _ = timer => {
                    deadline = None;
                    self.flush();
                }
            }
        }
        log::debug!("batcher task terminated");
    }

    fn on_bytes(&mut self, chunk: Vec<u8>, deadline: &mut Option<Instant>) {
        self.metrics.inc_chunks_received();
        if self.buffer.push(chunk) {
            // Threshold wins over the timer; disarm it.
            *deadline = None;
            self.flush();
        } else if deadline.is_none() {
            *deadline = Some(Instant::now() + self.policy.flush_interval);
        }
    }

    fn flush(&mut self) {
        let chunk_count = self.buffer.len();
        let Some(batch) = self.buffer.take() else {
            return;
        };
        self.metrics.inc_batches_flushed();
        let len = batch.len();
        log::debug!(
            "flushing batch: {} chunks, {} bytes [{}]",
            chunk_count,
            len,
            hex_preview(&batch, 16)
        );
        match self.queue.enqueue(DeliveryJob::data(batch)) {
            Ok(()) => {}
            Err(e @ BridgeError::QueueFull { .. }) => {
                self.sink
                    .log(LogType::Error, &format!("Dropped {}-byte batch: {}", len, e));
            }
            Err(e) => {
                log::warn!("could not enqueue {}-byte batch: {}", len, e);
            }
        }
    }
}
