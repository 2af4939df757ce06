//! Process-level wiring of the bridge.
//!
//! [`Bridge`] is built once at start-up and owns every component: config
//! store, metrics, delivery queue, batcher and serial link. Hosts (the CLI,
//! a UI) talk to it through the inbound commands below and observe it through
//! the [`EventSink`] they pass in.

use log::{debug, info};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::config::{Config, ConfigStore};
use crate::error::BridgeError;
use crate::events::{ConnectionState, EventSink, LogType};
use crate::http::HttpDispatcher;
use crate::metrics::{MetricsSnapshot, PipelineMetrics};
use crate::pipeline::{
    start_queue, BatchPolicy, BatcherHandle, ByteBatcher, DeliveryJob, DeliveryQueue, LogLevel,
    QueueConfig, QueueStats, QueueWorkers,
};
use crate::serial::{DeviceOpener, LinkReporter, PortInfo, SerialLink};

pub struct Bridge {
    config: ConfigStore,
    sink: Arc<dyn EventSink>,
    metrics: Arc<PipelineMetrics>,
    queue: DeliveryQueue,
    batcher: BatcherHandle,
    link: SerialLink,
    tasks: Mutex<Option<(QueueWorkers, JoinHandle<()>)>>,
}

impl Bridge {
    /// Bridge backed by real serial devices. Must be called inside a Tokio
    /// runtime.
    #[cfg(feature = "serial")]
    pub fn new(config: Config, sink: Arc<dyn EventSink>) -> Result<Self, BridgeError> {
        Self::with_opener(config, sink, Arc::new(crate::serial::SerialPortOpener))
    }

    /// Bridge with a custom device backend (simulator, tests).
    pub fn with_opener(
        config: Config,
        sink: Arc<dyn EventSink>,
        opener: Arc<dyn DeviceOpener>,
    ) -> Result<Self, BridgeError> {
        config.validate()?;
        let store = ConfigStore::new(config);
        let pipeline = store.pipeline();
        let metrics = Arc::new(PipelineMetrics::new());

        let dispatcher = Arc::new(HttpDispatcher::new(
            store.clone(),
            sink.clone(),
            metrics.clone(),
        ));
        let (queue, workers) =
            start_queue(QueueConfig::from(&pipeline), dispatcher, metrics.clone());
        let (batcher, batcher_task) = ByteBatcher::new(
            BatchPolicy::from(&pipeline),
            queue.clone(),
            sink.clone(),
            metrics.clone(),
        )
        .spawn();
        let reporter = LinkReporter::new(sink.clone(), queue.clone(), store.clone());
        let link = SerialLink::new(opener, reporter, batcher.clone());

        debug!(
            "bridge ready: batch {} chunks/{} ms, queue {} x {}",
            pipeline.max_buffer_size,
            pipeline.flush_interval_ms,
            pipeline.request_queue_limit,
            pipeline.max_concurrent_requests
        );

        Ok(Self {
            config: store,
            sink,
            metrics,
            queue,
            batcher,
            link,
            tasks: Mutex::new(Some((workers, batcher_task))),
        })
    }

    pub fn list_ports(&self) -> Vec<PortInfo> {
        self.link.list_ports()
    }

    pub fn config(&self) -> Config {
        self.config.get()
    }

    /// Replace the configuration. Serial and HTTP settings apply to the next
    /// connect/delivery; pipeline sizing is fixed for the bridge's lifetime.
    pub fn set_config(&self, config: Config) -> Result<(), BridgeError> {
        config.validate()?;
        self.config.set(config);
        info!("configuration updated");
        Ok(())
    }

    /// Connect using the serial section of the current configuration.
    pub async fn connect(&self) -> Result<(), BridgeError> {
        self.link.connect(Some(self.config.serial())).await
    }

    pub async fn disconnect(&self) {
        self.link.disconnect().await;
    }

    pub fn status(&self) -> String {
        self.link.status()
    }

    pub fn state(&self) -> ConnectionState {
        self.link.state()
    }

    /// Enqueue a data job directly, bypassing the batcher.
    pub fn send_data(&self, payload: Vec<u8>) -> Result<(), BridgeError> {
        self.submit(DeliveryJob::data(payload))
    }

    pub fn send_log(&self, level: LogLevel, message: impl Into<String>) -> Result<(), BridgeError> {
        self.submit(DeliveryJob::log(level, message))
    }

    fn submit(&self, job: DeliveryJob) -> Result<(), BridgeError> {
        let what = job.describe();
        self.queue.enqueue(job).map_err(|e| {
            if let BridgeError::QueueFull { .. } = e {
                self.sink
                    .log(LogType::Error, &format!("Dropped {}: {}", what, e));
            }
            e
        })
    }

    /// Push whatever the batcher holds into the queue now.
    pub async fn flush(&self) {
        self.batcher.flush().await;
    }

    pub fn stats(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    /// Disconnect, flush the last batch and wait for pending deliveries.
    /// Later calls are no-ops.
    pub async fn shutdown(&self) {
        let Some((workers, batcher_task)) = self.tasks.lock().await.take() else {
            return;
        };
        self.link.disconnect().await;
        self.batcher.shutdown().await;
        if let Err(e) = batcher_task.await {
            log::error!("batcher task ended abnormally: {}", e);
        }
        workers.shutdown().await;
        info!("bridge stopped: {}", self.metrics.snapshot());
    }
}
