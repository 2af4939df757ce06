//! # Serial Link
//!
//! Owns at most one open device and moves it through
//! `disconnected → connecting → connected → (error | disconnected)`.
//!
//! A blocking reader thread pulls bytes off the device and hands them to a
//! pump task, which logs each chunk as text and pushes it into the batcher.
//! Every transition is published to the [`EventSink`] and, when
//! `pipeline.forward_logs` is set, info/success/error lines are also enqueued
//! as log jobs for the HTTP endpoint.
//!
//! Transitions are serialized by one async mutex; a generation counter makes
//! late chunks and faults from a previous device harmless.

pub mod device;
pub mod sim;

use log::{debug, error, info, warn};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

pub use device::{DeviceOpener, PortInfo, SerialDevice};
#[cfg(feature = "serial")]
pub use device::SerialPortOpener;
pub use sim::{SimulatedFeed, SimulatedOpener};

use crate::config::{ConfigStore, SerialConfig};
use crate::error::BridgeError;
use crate::events::{ConnectionState, EventSink, LogEntry, LogType};
use crate::logutil::escape_log;
use crate::pipeline::{BatcherHandle, DeliveryJob, DeliveryQueue, LogLevel};

const READ_BUF: usize = 1024;

enum DeviceEvent {
    Data(Vec<u8>),
    Fault(String),
}

/// Publishes link notifications and optionally forwards them as log jobs.
#[derive(Clone)]
pub struct LinkReporter {
    sink: Arc<dyn EventSink>,
    queue: DeliveryQueue,
    config: ConfigStore,
}

impl LinkReporter {
    pub fn new(sink: Arc<dyn EventSink>, queue: DeliveryQueue, config: ConfigStore) -> Self {
        Self {
            sink,
            queue,
            config,
        }
    }

    pub fn status(&self, state: ConnectionState, detail: Option<String>) {
        self.sink.publish_status(state, detail);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogType::Info, message.into());
    }

    pub fn success(&self, message: impl Into<String>) {
        self.log(LogType::Success, message.into());
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(LogType::Error, message.into());
    }

    /// Raw device text; shown to observers, never forwarded.
    pub fn data(&self, chunk: &[u8]) {
        let text = String::from_utf8_lossy(chunk).into_owned();
        debug!("rx {} bytes: {}", chunk.len(), escape_log(&text));
        self.sink.publish_log(LogEntry::new(LogType::Data, text));
    }

    fn log(&self, kind: LogType, message: String) {
        self.sink.publish_log(LogEntry::new(kind, message.clone()));
        let Some(level) = LogLevel::from_log_type(kind) else {
            return;
        };
        if !self.config.pipeline().forward_logs {
            return;
        }
        match self.queue.enqueue(DeliveryJob::log(level, message)) {
            Ok(()) => {}
            Err(e @ BridgeError::QueueFull { .. }) => {
                // Straight to the sink: going through `log` again would recurse.
                self.sink
                    .log(LogType::Error, &format!("Dropped forwarded log line: {}", e));
            }
            Err(e) => debug!("log line not forwarded: {}", e),
        }
    }
}

#[derive(Debug, Clone)]
struct LinkState {
    state: ConnectionState,
    port: Option<String>,
    generation: u64,
}

/// The live device: reader thread plus its stop flag.
struct ActiveConnection {
    generation: u64,
    stop: Arc<AtomicBool>,
    reader: Option<JoinHandle<io::Result<()>>>,
}

impl Drop for ActiveConnection {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

struct LinkCore {
    active: Mutex<Option<ActiveConnection>>,
    state: RwLock<LinkState>,
    generation: AtomicU64,
    opener: Arc<dyn DeviceOpener>,
    reporter: LinkReporter,
    batcher: BatcherHandle,
}

/// Serial connection manager. Cheap to clone; clones share the device.
#[derive(Clone)]
pub struct SerialLink {
    core: Arc<LinkCore>,
}

impl SerialLink {
    pub fn new(opener: Arc<dyn DeviceOpener>, reporter: LinkReporter, batcher: BatcherHandle) -> Self {
        Self {
            core: Arc::new(LinkCore {
                active: Mutex::new(None),
                state: RwLock::new(LinkState {
                    state: ConnectionState::Disconnected,
                    port: None,
                    generation: 0,
                }),
                generation: AtomicU64::new(0),
                opener,
                reporter,
                batcher,
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.core.read_state().state
    }

    pub fn port(&self) -> Option<String> {
        self.core.read_state().port
    }

    /// Human readable status, e.g. `connected (/dev/ttyUSB0)`.
    pub fn status(&self) -> String {
        let s = self.core.read_state();
        match (s.state, s.port) {
            (ConnectionState::Connected, Some(port)) => format!("connected ({})", port),
            (state, _) => state.to_string(),
        }
    }

    pub fn list_ports(&self) -> Vec<PortInfo> {
        match self.core.opener.list_ports() {
            Ok(ports) => ports,
            Err(e) => {
                self.core
                    .reporter
                    .error(format!("Failed to list serial ports: {}", e));
                Vec::new()
            }
        }
    }

    /// Open the configured device and start reading.
    ///
    /// An already open device is disconnected first. Settings problems are
    /// reported as a single error log and leave the state untouched; open
    /// failures move the link to `Error`.
    pub async fn connect(&self, config: Option<SerialConfig>) -> Result<(), BridgeError> {
        let core = &self.core;
        let mut active = core.active.lock().await;
        core.close_active(&mut active).await;

        let config = match config {
            Some(c) => c,
            None => return Err(core.config_failure(BridgeError::NoConfiguration)),
        };
        if let Err(e) = config.validate().and_then(|_| core.opener.check(&config)) {
            return Err(core.config_failure(e));
        }

        core.set_state(ConnectionState::Connecting, None, None);
        core.reporter
            .status(ConnectionState::Connecting, Some(config.port.clone()));
        core.reporter.info(format!(
            "Connecting to {} ({})...",
            config.port,
            config.line_settings()
        ));

        let device = match core.opener.open(&config).await {
            Ok(device) => device,
            Err(e) => {
                error!("Failed to open {}: {}", config.port, e);
                core.set_state(ConnectionState::Error, None, None);
                core.reporter
                    .error(format!("Failed to open {}: {}", config.port, e));
                core.reporter
                    .status(ConnectionState::Error, Some(e.to_string()));
                return Err(e);
            }
        };

        let generation = core.generation.fetch_add(1, Ordering::SeqCst) + 1;
        core.set_state(
            ConnectionState::Connected,
            Some(config.port.clone()),
            Some(generation),
        );
        info!("Serial port {} open ({})", config.port, config.line_settings());
        core.reporter
            .status(ConnectionState::Connected, Some(config.port.clone()));
        core.reporter
            .success(format!("Serial port connected ({})", config.port));

        let stop = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::unbounded_channel();
        let reader = spawn_reader(device, stop.clone(), tx);
        tokio::spawn(pump(Arc::downgrade(&self.core), generation, rx));

        *active = Some(ActiveConnection {
            generation,
            stop,
            reader: Some(reader),
        });
        Ok(())
    }

    /// Stop reading and release the device. No-op unless connected.
    pub async fn disconnect(&self) {
        let mut active = self.core.active.lock().await;
        self.core.close_active(&mut active).await;
    }
}

impl LinkCore {
    fn read_state(&self) -> LinkState {
        self.state.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn set_state(&self, state: ConnectionState, port: Option<String>, generation: Option<u64>) {
        let mut s = self.state.write().unwrap_or_else(|e| e.into_inner());
        s.state = state;
        s.port = port;
        if let Some(g) = generation {
            s.generation = g;
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        let s = self.state.read().unwrap_or_else(|e| e.into_inner());
        s.state == ConnectionState::Connected && s.generation == generation
    }

    fn config_failure(&self, e: BridgeError) -> BridgeError {
        warn!("serial connect rejected: {}", e);
        self.reporter.error(format!("Cannot connect: {}", e));
        e
    }

    /// Deliberate shutdown of the live device, if any.
    async fn close_active(&self, active: &mut Option<ActiveConnection>) {
        let Some(mut conn) = active.take() else {
            return;
        };
        let port = self.read_state().port.unwrap_or_default();
        // Flip state first so the pump ignores anything still in flight.
        self.set_state(ConnectionState::Disconnected, None, None);
        conn.stop.store(true, Ordering::SeqCst);

        if let Some(reader) = conn.reader.take() {
            match reader.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!("closing {} failed: {}", port, e);
                    self.reporter
                        .error(format!("Error while closing {}: {}", port, e));
                }
                Err(e) => {
                    error!("serial reader for {} ended abnormally: {}", port, e);
                    self.reporter
                        .error(format!("Serial reader ended abnormally: {}", e));
                }
            }
        }

        self.reporter.status(ConnectionState::Disconnected, None);
        self.reporter
            .info(format!("Serial port disconnected ({})", port));
    }

    /// Device failure while connected. The reader already dropped the device,
    /// so nothing is closed here.
    async fn fail(&self, generation: u64, reason: String) {
        let mut active = self.active.lock().await;
        let owns = matches!(active.as_ref(), Some(c) if c.generation == generation);
        if !owns || !self.is_current(generation) {
            return;
        }
        let port = self.read_state().port.unwrap_or_default();
        if let Some(mut conn) = active.take() {
            if let Some(reader) = conn.reader.take() {
                let _ = reader.await;
            }
        }
        error!("serial port {} failed: {}", port, reason);
        self.set_state(ConnectionState::Error, None, None);
        self.reporter
            .error(format!("Serial port {} error: {}", port, reason));
        self.reporter.status(ConnectionState::Error, Some(reason));
    }
}

fn spawn_reader(
    mut device: Box<dyn SerialDevice>,
    stop: Arc<AtomicBool>,
    tx: mpsc::UnboundedSender<DeviceEvent>,
) -> JoinHandle<io::Result<()>> {
    tokio::task::spawn_blocking(move || {
        let mut buf = [0u8; READ_BUF];
        while !stop.load(Ordering::SeqCst) {
            match device.read(&mut buf) {
                Ok(0) => {
                    let _ = tx.send(DeviceEvent::Fault("device disconnected".to_string()));
                    return Ok(());
                }
                Ok(n) => {
                    let _ = tx.send(DeviceEvent::Data(buf[..n].to_vec()));
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::TimedOut
                            | io::ErrorKind::WouldBlock
                            | io::ErrorKind::Interrupted
                    ) => {}
                Err(e) => {
                    let _ = tx.send(DeviceEvent::Fault(e.to_string()));
                    return Ok(());
                }
            }
        }
        device.close()
    })
}

async fn pump(core: Weak<LinkCore>, generation: u64, mut rx: mpsc::UnboundedReceiver<DeviceEvent>) {
    while let Some(event) = rx.recv().await {
        // Link dropped: its connection's stop flag is already set.
        let Some(core) = core.upgrade() else { break };
        match event {
            DeviceEvent::Data(chunk) => {
                if !core.is_current(generation) {
                    continue;
                }
                core.reporter.data(&chunk);
                core.batcher.push(chunk);
            }
            DeviceEvent::Fault(reason) => {
                core.fail(generation, reason).await;
                break;
            }
        }
    }
    debug!("serial pump for generation {} finished", generation);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::events::{BridgeEvent, ChannelSink};
    use crate::metrics::PipelineMetrics;
    use crate::pipeline::{start_queue, BatchPolicy, ByteBatcher, Dispatch, QueueConfig};
    use async_trait::async_trait;

    struct Discard;

    #[async_trait]
    impl Dispatch for Discard {
        async fn dispatch(&self, _job: DeliveryJob) {}
    }

    fn link(opener: SimulatedOpener) -> (SerialLink, mpsc::UnboundedReceiver<BridgeEvent>) {
        let (sink, rx) = ChannelSink::new();
        let sink: Arc<dyn EventSink> = Arc::new(sink);
        let metrics = Arc::new(PipelineMetrics::new());
        let (queue, _workers) = start_queue(
            QueueConfig {
                limit: 8,
                concurrency: 1,
            },
            Arc::new(Discard),
            metrics.clone(),
        );
        let (batcher, _task) =
            ByteBatcher::new(BatchPolicy::default(), queue.clone(), sink.clone(), metrics).spawn();
        let reporter = LinkReporter::new(sink, queue, ConfigStore::new(Config::default()));
        (SerialLink::new(Arc::new(opener), reporter, batcher), rx)
    }

    fn statuses(rx: &mut mpsc::UnboundedReceiver<BridgeEvent>) -> Vec<ConnectionState> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            if let BridgeEvent::Status(s) = ev {
                out.push(s.state);
            }
        }
        out
    }

    #[tokio::test]
    async fn status_string_names_port() {
        let opener = SimulatedOpener::new();
        let (link, _rx) = link(opener);
        assert_eq!(link.status(), "disconnected");
        let cfg = SerialConfig {
            port: "/dev/sim0".into(),
            ..SerialConfig::default()
        };
        link.connect(Some(cfg)).await.unwrap();
        assert_eq!(link.status(), "connected (/dev/sim0)");
        link.disconnect().await;
        assert_eq!(link.status(), "disconnected");
    }

    #[tokio::test]
    async fn reconnect_closes_previous_device_first() {
        let opener = SimulatedOpener::new();
        let (link, mut rx) = link(opener.clone());
        let cfg = SerialConfig {
            port: "/dev/sim0".into(),
            ..SerialConfig::default()
        };
        link.connect(Some(cfg.clone())).await.unwrap();
        link.connect(Some(cfg)).await.unwrap();
        assert_eq!(opener.close_count(), 1);
        assert_eq!(
            statuses(&mut rx),
            vec![
                ConnectionState::Connecting,
                ConnectionState::Connected,
                ConnectionState::Disconnected,
                ConnectionState::Connecting,
                ConnectionState::Connected,
            ]
        );
        link.disconnect().await;
    }

    #[tokio::test]
    async fn missing_configuration_is_a_single_error_log() {
        let opener = SimulatedOpener::new();
        let (link, mut rx) = link(opener.clone());
        let err = link.connect(None).await.unwrap_err();
        assert!(matches!(err, BridgeError::NoConfiguration));
        assert!(opener.open_attempts().is_empty());
        let events: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], BridgeEvent::Log(l) if l.kind == LogType::Error));
        assert_eq!(link.state(), ConnectionState::Disconnected);
    }
}
