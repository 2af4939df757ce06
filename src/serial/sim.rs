//! In-process serial device for tests and dry runs.
//!
//! A [`SimulatedOpener`] hands out devices whose bytes are fed from the test
//! through a [`SimulatedFeed`]. It records how often open/close were called so
//! tests can check the link never touches the device when it must not.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::io;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::device::{DeviceOpener, PortInfo, SerialDevice};
use crate::config::SerialConfig;
use crate::error::BridgeError;

const POLL: Duration = Duration::from_millis(20);

enum SimInput {
    Bytes(Vec<u8>),
    Fail(String),
    Unplug,
}

#[derive(Default)]
struct SimState {
    ports: Vec<PortInfo>,
    open_error: Option<String>,
    close_error: Option<String>,
    opened: Vec<SerialConfig>,
    closes: usize,
    feed: Option<Sender<SimInput>>,
}

#[derive(Clone, Default)]
pub struct SimulatedOpener {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedOpener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advertise a port in `list_ports`.
    pub fn with_port(self, path: &str) -> Self {
        self.lock().ports.push(PortInfo {
            path: path.to_string(),
            manufacturer: Some("Simulated".to_string()),
            product_id: None,
            vendor_id: None,
        });
        self
    }

    /// Make every following open fail with `message`.
    pub fn fail_open(&self, message: &str) {
        self.lock().open_error = Some(message.to_string());
    }

    pub fn allow_open(&self) {
        self.lock().open_error = None;
    }

    /// Make closing the current device report `message`.
    pub fn fail_close(&self, message: &str) {
        self.lock().close_error = Some(message.to_string());
    }

    /// Configurations passed to successful and failed open attempts.
    pub fn open_attempts(&self) -> Vec<SerialConfig> {
        self.lock().opened.clone()
    }

    pub fn close_count(&self) -> usize {
        self.lock().closes
    }

    /// Pull the cable on the open device: its next read returns `Ok(0)`.
    pub fn unplug(&self) {
        if let Some(tx) = self.lock().feed.take() {
            let _ = tx.send(SimInput::Unplug);
        }
    }

    /// Feed for the most recently opened device.
    pub fn feed(&self) -> Option<SimulatedFeed> {
        self.lock().feed.clone().map(|tx| SimulatedFeed { tx })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl DeviceOpener for SimulatedOpener {
    async fn open(&self, config: &SerialConfig) -> Result<Box<dyn SerialDevice>, BridgeError> {
        let mut state = self.lock();
        state.opened.push(config.clone());
        if let Some(msg) = &state.open_error {
            return Err(BridgeError::Device(msg.clone()));
        }
        let (tx, rx) = mpsc::channel();
        state.feed = Some(tx);
        Ok(Box::new(SimulatedDevice {
            rx,
            pending: VecDeque::new(),
            state: self.state.clone(),
        }))
    }

    fn list_ports(&self) -> Result<Vec<PortInfo>, BridgeError> {
        Ok(self.lock().ports.clone())
    }
}

/// Test-side handle that drives one simulated device.
#[derive(Clone)]
pub struct SimulatedFeed {
    tx: Sender<SimInput>,
}

impl SimulatedFeed {
    /// Deliver one chunk, returned by a single device read.
    pub fn send(&self, bytes: &[u8]) -> bool {
        self.tx.send(SimInput::Bytes(bytes.to_vec())).is_ok()
    }

    /// Make the next read fail with an I/O error.
    pub fn fail(&self, message: &str) -> bool {
        self.tx.send(SimInput::Fail(message.to_string())).is_ok()
    }
}

pub struct SimulatedDevice {
    rx: Receiver<SimInput>,
    pending: VecDeque<u8>,
    state: Arc<Mutex<SimState>>,
}

impl SerialDevice for SimulatedDevice {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pending.is_empty() {
            match self.rx.recv_timeout(POLL) {
                Ok(SimInput::Bytes(bytes)) => self.pending.extend(bytes),
                Ok(SimInput::Fail(msg)) => return Err(io::Error::new(io::ErrorKind::Other, msg)),
                Ok(SimInput::Unplug) => return Ok(0),
                Err(RecvTimeoutError::Timeout) => {
                    return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"))
                }
                Err(RecvTimeoutError::Disconnected) => return Ok(0),
            }
        }
        let n = buf.len().min(self.pending.len());
        for (slot, byte) in buf.iter_mut().zip(self.pending.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn close(self: Box<Self>) -> io::Result<()> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.closes += 1;
        state.feed = None;
        match state.close_error.take() {
            Some(msg) => Err(io::Error::new(io::ErrorKind::Other, msg)),
            None => Ok(()),
        }
    }
}
