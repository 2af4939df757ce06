//! Capacity, concurrency and start-order behavior of the delivery queue.
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_test::{assert_err, assert_ok};

use serialbridge::error::BridgeError;
use serialbridge::metrics::PipelineMetrics;
use serialbridge::pipeline::{start_queue, DeliveryJob, Dispatch, JobKind, LogLevel, QueueConfig};

/// Records start order, then blocks until the test opens the gate.
struct GatedDispatch {
    started: Mutex<Vec<u32>>,
    gate: Semaphore,
}

impl GatedDispatch {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            started: Mutex::new(Vec::new()),
            gate: Semaphore::new(0),
        })
    }

    fn started(&self) -> Vec<u32> {
        self.started.lock().unwrap().clone()
    }
}

#[async_trait]
impl Dispatch for GatedDispatch {
    async fn dispatch(&self, job: DeliveryJob) {
        let id = match job.kind {
            JobKind::Data { payload } => u32::from_be_bytes(payload[..4].try_into().unwrap()),
            JobKind::Log { message, .. } => message.parse().unwrap(),
        };
        self.started.lock().unwrap().push(id);
        if let Ok(permit) = self.gate.acquire().await {
            permit.forget();
        }
    }
}

fn job(id: u32) -> DeliveryJob {
    DeliveryJob::data(id.to_be_bytes().to_vec())
}

async fn wait_started(d: &GatedDispatch, n: usize) {
    for _ in 0..200 {
        if d.started().len() >= n {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("only {} dispatches started", d.started().len());
}

#[tokio::test]
async fn full_queue_rejects_and_concurrency_is_capped() {
    let dispatch = GatedDispatch::new();
    let metrics = Arc::new(PipelineMetrics::new());
    let (queue, workers) = start_queue(
        QueueConfig {
            limit: 50,
            concurrency: 3,
        },
        dispatch.clone(),
        metrics.clone(),
    );

    let mut accepted = Vec::new();
    for id in 0..50 {
        assert_ok!(queue.enqueue(job(id)));
        accepted.push(id);
    }
    // The loop has not run yet: 50 pending, the 51st is dropped.
    assert!(matches!(
        queue.enqueue(job(50)),
        Err(BridgeError::QueueFull { limit: 50 })
    ));

    wait_started(&dispatch, 3).await;
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(dispatch.started(), vec![0, 1, 2]);
    assert_eq!(metrics.snapshot().in_flight, 3);
    assert_eq!(queue.pending(), 47);

    for id in 51..54 {
        assert_ok!(queue.enqueue(job(id)));
        accepted.push(id);
    }
    assert_err!(queue.enqueue(job(54)));

    dispatch.gate.add_permits(1000);
    workers.shutdown().await;

    assert_eq!(dispatch.started(), accepted);
    let snap = metrics.snapshot();
    assert_eq!(snap.jobs_accepted, 53);
    assert_eq!(snap.jobs_dropped, 2);
    assert_eq!(snap.peak_in_flight, 3);
    assert_eq!(snap.in_flight, 0);
}

#[tokio::test]
async fn data_and_log_jobs_share_one_fifo() {
    let dispatch = GatedDispatch::new();
    dispatch.gate.add_permits(1000);
    let metrics = Arc::new(PipelineMetrics::new());
    let (queue, workers) = start_queue(
        QueueConfig {
            limit: 10,
            concurrency: 1,
        },
        dispatch.clone(),
        metrics,
    );

    queue.enqueue(job(1)).unwrap();
    queue.enqueue(DeliveryJob::log(LogLevel::Info, "2")).unwrap();
    queue.enqueue(job(3)).unwrap();
    queue.enqueue(DeliveryJob::log(LogLevel::Error, "4")).unwrap();
    workers.shutdown().await;

    assert_eq!(dispatch.started(), vec![1, 2, 3, 4]);
}

/// Completion order may differ from start order across slots.
#[tokio::test]
async fn completion_is_not_ordered() {
    struct Sleepy {
        finished: Mutex<Vec<u32>>,
    }

    #[async_trait]
    impl Dispatch for Sleepy {
        async fn dispatch(&self, job: DeliveryJob) {
            let JobKind::Data { payload } = job.kind else {
                return;
            };
            let id = payload[0] as u32;
            let ms = if id == 0 { 80 } else { 5 };
            tokio::time::sleep(Duration::from_millis(ms)).await;
            self.finished.lock().unwrap().push(id);
        }
    }

    let sleepy = Arc::new(Sleepy {
        finished: Mutex::new(Vec::new()),
    });
    let (queue, workers) = start_queue(
        QueueConfig {
            limit: 10,
            concurrency: 2,
        },
        sleepy.clone(),
        Arc::new(PipelineMetrics::new()),
    );
    queue.enqueue(DeliveryJob::data(vec![0])).unwrap();
    queue.enqueue(DeliveryJob::data(vec![1])).unwrap();
    workers.shutdown().await;

    assert_eq!(*sleepy.finished.lock().unwrap(), vec![1, 0]);
}
