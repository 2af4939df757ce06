// Device access for the serial link.
//
// The link never talks to `serialport` directly: it opens devices through a
// `DeviceOpener` and reads them through `SerialDevice`, which keeps the state
// machine testable with the in-process simulator in `sim.rs`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io;

use crate::config::SerialConfig;
use crate::error::BridgeError;

/// A port as reported to the host's port picker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortInfo {
    pub path: String,
    pub manufacturer: Option<String>,
    pub product_id: Option<String>,
    pub vendor_id: Option<String>,
}

/// An open device. Reads are blocking with a short timeout and run on a
/// dedicated blocking thread.
pub trait SerialDevice: Send {
    /// Read available bytes. `Err(TimedOut)`/`Err(WouldBlock)` mean "nothing
    /// yet"; `Ok(0)` means the device went away.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Release the device. Called once, on deliberate disconnect only.
    fn close(self: Box<Self>) -> io::Result<()>;
}

#[async_trait]
pub trait DeviceOpener: Send + Sync {
    /// Reject settings this backend cannot express, before any open attempt.
    fn check(&self, _config: &SerialConfig) -> Result<(), BridgeError> {
        Ok(())
    }

    async fn open(&self, config: &SerialConfig) -> Result<Box<dyn SerialDevice>, BridgeError>;

    fn list_ports(&self) -> Result<Vec<PortInfo>, BridgeError> {
        Ok(Vec::new())
    }
}

#[cfg(feature = "serial")]
pub use self::hw::SerialPortOpener;

#[cfg(feature = "serial")]
mod hw {
    use super::*;
    use crate::config::Parity;
    use serialport::{DataBits, Parity as SpParity, SerialPort, SerialPortType, StopBits};
    use std::io::Read;
    use std::time::Duration;

    const READ_TIMEOUT: Duration = Duration::from_millis(50);

    /// Opens real devices through the `serialport` crate.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct SerialPortOpener;

    struct PortDevice {
        port: Box<dyn SerialPort>,
    }

    impl SerialDevice for PortDevice {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.port.read(buf)
        }

        fn close(self: Box<Self>) -> io::Result<()> {
            self.port.clear(serialport::ClearBuffer::All)?;
            drop(self.port);
            Ok(())
        }
    }

    pub(super) fn to_serialport_parity(p: Parity) -> Result<SpParity, BridgeError> {
        match p {
            Parity::None => Ok(SpParity::None),
            Parity::Odd => Ok(SpParity::Odd),
            Parity::Even => Ok(SpParity::Even),
            Parity::Mark | Parity::Space => Err(BridgeError::UnsupportedParity(p.to_string())),
        }
    }

    pub(super) fn to_serialport_data_bits(bits: u8) -> Result<DataBits, BridgeError> {
        match bits {
            5 => Ok(DataBits::Five),
            6 => Ok(DataBits::Six),
            7 => Ok(DataBits::Seven),
            8 => Ok(DataBits::Eight),
            other => Err(BridgeError::InvalidSetting {
                field: "data bits",
                value: other.to_string(),
            }),
        }
    }

    pub(super) fn to_serialport_stop_bits(bits: u8) -> Result<StopBits, BridgeError> {
        match bits {
            1 => Ok(StopBits::One),
            2 => Ok(StopBits::Two),
            other => Err(BridgeError::InvalidSetting {
                field: "stop bits",
                value: other.to_string(),
            }),
        }
    }

    #[async_trait]
    impl DeviceOpener for SerialPortOpener {
        fn check(&self, config: &SerialConfig) -> Result<(), BridgeError> {
            to_serialport_parity(config.parity)?;
            to_serialport_data_bits(config.data_bits)?;
            to_serialport_stop_bits(config.stop_bits)?;
            Ok(())
        }

        async fn open(&self, config: &SerialConfig) -> Result<Box<dyn SerialDevice>, BridgeError> {
            let parity = to_serialport_parity(config.parity)?;
            let data_bits = to_serialport_data_bits(config.data_bits)?;
            let stop_bits = to_serialport_stop_bits(config.stop_bits)?;
            let path = config.port.clone();
            let baud = config.baud_rate;

            log::debug!("Opening serial port {} at {} baud", path, baud);
            let opened = tokio::task::spawn_blocking(move || {
                serialport::new(&path, baud)
                    .data_bits(data_bits)
                    .stop_bits(stop_bits)
                    .parity(parity)
                    .timeout(READ_TIMEOUT)
                    .open()
            })
            .await
            .map_err(|e| BridgeError::Device(format!("open task failed: {}", e)))?;

            let port = opened.map_err(|e| BridgeError::Device(e.to_string()))?;
            Ok(Box::new(PortDevice { port }))
        }

        fn list_ports(&self) -> Result<Vec<PortInfo>, BridgeError> {
            let ports = serialport::available_ports()
                .map_err(|e| BridgeError::Device(format!("failed to enumerate ports: {}", e)))?;
            Ok(ports
                .into_iter()
                .map(|p| match p.port_type {
                    SerialPortType::UsbPort(info) => PortInfo {
                        path: p.port_name,
                        manufacturer: info.manufacturer,
                        product_id: Some(format!("{:04x}", info.pid)),
                        vendor_id: Some(format!("{:04x}", info.vid)),
                    },
                    _ => PortInfo {
                        path: p.port_name,
                        manufacturer: None,
                        product_id: None,
                        vendor_id: None,
                    },
                })
                .collect())
        }
    }
}

#[cfg(all(test, feature = "serial"))]
mod tests {
    use super::hw::*;
    use super::*;
    use crate::config::Parity;

    #[test]
    fn mark_and_space_parity_are_rejected() {
        assert!(to_serialport_parity(Parity::Even).is_ok());
        assert!(matches!(
            to_serialport_parity(Parity::Mark),
            Err(BridgeError::UnsupportedParity(p)) if p == "mark"
        ));
        assert!(to_serialport_parity(Parity::Space).is_err());
    }

    #[test]
    fn bit_conversions_do_not_coerce() {
        assert!(matches!(to_serialport_data_bits(5), Ok(serialport::DataBits::Five)));
        assert!(to_serialport_data_bits(9).is_err());
        assert!(matches!(to_serialport_stop_bits(2), Ok(serialport::StopBits::Two)));
        assert!(to_serialport_stop_bits(0).is_err());
    }

    #[test]
    fn check_reports_configuration_errors() {
        let opener = SerialPortOpener;
        let mut cfg = SerialConfig {
            port: "/dev/ttyUSB0".into(),
            ..SerialConfig::default()
        };
        assert!(opener.check(&cfg).is_ok());
        cfg.parity = Parity::Space;
        let err = opener.check(&cfg).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);
    }
}
