//! Bounded delivery queue with a fixed concurrency budget.
//!
//! Jobs wait in a bounded channel (`request_queue_limit`). A single loop task
//! owns the receiving end: it takes a slot from a semaphore sized
//! `max_concurrent_requests`, pops the head job and runs it on its own task.
//! The slot is released when the dispatch completes, so:
//!
//! * start order is FIFO (one popper),
//! * completion order is not (slots finish independently),
//! * at most `max_concurrent_requests` dispatches are in flight,
//! * pending jobs never exceed the channel bound; a full queue rejects the new
//!   job instead of blocking the producer.
//!
//! Data and log jobs share the same queue and slots.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::task::JoinHandle;

use super::job::DeliveryJob;
use crate::config::PipelineConfig;
use crate::error::BridgeError;
use crate::metrics::PipelineMetrics;

/// Executes one job to completion. Implementations report their own outcome;
/// the queue only tracks slots.
#[async_trait]
pub trait Dispatch: Send + Sync + 'static {
    async fn dispatch(&self, job: DeliveryJob);
}

#[derive(Debug, Clone, Copy)]
pub struct QueueConfig {
    pub limit: usize,
    pub concurrency: usize,
}

impl From<&PipelineConfig> for QueueConfig {
    fn from(p: &PipelineConfig) -> Self {
        Self {
            limit: p.request_queue_limit,
            concurrency: p.max_concurrent_requests,
        }
    }
}

/// Producer handle. Cheap to clone; every producer enqueues into the same FIFO.
#[derive(Clone, Debug)]
pub struct DeliveryQueue {
    tx: mpsc::Sender<DeliveryJob>,
    limit: usize,
    metrics: Arc<PipelineMetrics>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    pub pending: usize,
    pub in_flight: usize,
    pub limit: usize,
}

impl DeliveryQueue {
    /// Add a job at the tail. Rejects immediately when `limit` jobs are already
    /// pending; the rejected job is dropped and the caller reports it.
    pub fn enqueue(&self, job: DeliveryJob) -> Result<(), BridgeError> {
        match self.tx.try_send(job) {
            Ok(()) => {
                self.metrics.inc_jobs_accepted();
                Ok(())
            }
            Err(TrySendError::Full(job)) => {
                self.metrics.inc_jobs_dropped();
                log::warn!(
                    "delivery queue full ({} pending): dropped {}",
                    self.limit,
                    job.describe()
                );
                Err(BridgeError::QueueFull { limit: self.limit })
            }
            Err(TrySendError::Closed(job)) => {
                log::debug!("delivery queue closed: discarded {}", job.describe());
                Err(BridgeError::QueueClosed)
            }
        }
    }

    pub fn pending(&self) -> usize {
        self.limit - self.tx.capacity()
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            pending: self.pending(),
            in_flight: self.metrics.snapshot().in_flight,
            limit: self.limit,
        }
    }
}

/// Owner handle for the dispatch loop. Dropping it closes the queue as well.
#[derive(Debug)]
pub struct QueueWorkers {
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl QueueWorkers {
    /// Stop accepting jobs, run everything already pending and wait until the
    /// last in-flight dispatch finishes.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Err(e) = (&mut self.handle).await {
            log::error!("delivery loop ended abnormally: {}", e);
        }
    }
}

pub fn start_queue(
    cfg: QueueConfig,
    dispatcher: Arc<dyn Dispatch>,
    metrics: Arc<PipelineMetrics>,
) -> (DeliveryQueue, QueueWorkers) {
    let limit = cfg.limit.max(1);
    let concurrency = cfg.concurrency.max(1);
    let (tx, mut rx) = mpsc::channel::<DeliveryJob>(limit);
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
    let slots = Arc::new(Semaphore::new(concurrency));

    let queue = DeliveryQueue {
        tx,
        limit,
        metrics: metrics.clone(),
    };

    let handle = tokio::spawn(async move {
        let mut closing = false;
        loop {
            // Take a slot before popping so waiting jobs stay counted as pending.
            let permit = match slots.clone().acquire_owned().await {
                Ok(p) => p,
                Err(_) => break,
            };
            let next = if closing {
                rx.recv().await
            } else {
                tokio::select! {
                    job = rx.recv() => job,
                    _ = &mut shutdown_rx => {
                        closing = true;
                        rx.close();
                        log::debug!("delivery queue closing; draining pending jobs");
                        rx.recv().await
                    }
                }
            };
            let Some(job) = next else { break };

            let in_flight = metrics.dispatch_started();
            log::trace!("dispatching {} (in_flight={})", job.describe(), in_flight);
            let dispatcher = dispatcher.clone();
            let metrics = metrics.clone();
            tokio::spawn(async move {
                dispatcher.dispatch(job).await;
                metrics.dispatch_finished();
                drop(permit);
            });
        }

        // Wait for in-flight dispatches to hand back their slots.
        let _ = slots.acquire_many(concurrency as u32).await;
        log::debug!("delivery queue loop terminated");
    });

    (
        queue,
        QueueWorkers {
            shutdown_tx: Some(shutdown_tx),
            handle,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::job::JobKind;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Records payloads in dispatch start order.
    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<Vec<u8>>>,
    }

    #[async_trait]
    impl Dispatch for Recorder {
        async fn dispatch(&self, job: DeliveryJob) {
            if let JobKind::Data { payload } = job.kind {
                self.seen.lock().unwrap().push(payload);
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }

    fn cfg(limit: usize, concurrency: usize) -> QueueConfig {
        QueueConfig { limit, concurrency }
    }

    #[tokio::test]
    async fn shutdown_drains_pending_jobs() {
        let recorder = Arc::new(Recorder::default());
        let metrics = Arc::new(PipelineMetrics::new());
        let (queue, workers) = start_queue(cfg(8, 2), recorder.clone(), metrics.clone());
        for i in 0..6u8 {
            queue.enqueue(DeliveryJob::data(vec![i])).unwrap();
        }
        workers.shutdown().await;

        let seen = recorder.seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 6);
        assert_eq!(metrics.snapshot().in_flight, 0);
        assert!(matches!(
            queue.enqueue(DeliveryJob::data(vec![9])),
            Err(BridgeError::QueueClosed)
        ));
    }

    #[tokio::test]
    async fn single_slot_preserves_order() {
        let recorder = Arc::new(Recorder::default());
        let metrics = Arc::new(PipelineMetrics::new());
        let (queue, workers) = start_queue(cfg(16, 1), recorder.clone(), metrics);
        for i in 0..10u8 {
            queue.enqueue(DeliveryJob::data(vec![i])).unwrap();
        }
        workers.shutdown().await;
        let seen: Vec<u8> = recorder.seen.lock().unwrap().iter().map(|p| p[0]).collect();
        assert_eq!(seen, (0..10).collect::<Vec<u8>>());
    }

    #[test]
    fn queue_config_from_pipeline_defaults() {
        let q = QueueConfig::from(&PipelineConfig::default());
        assert_eq!(q.limit, 50);
        assert_eq!(q.concurrency, 3);
    }
}
