//! Device discovery over the serial port list
//!
//! The target board is identified by a substring of the port's human readable
//! description. Enumeration is repeated on every lookup because the board
//! re-enumerates (and may change port) after being flashed.

use serialport::{SerialPortInfo, SerialPortType};
use thiserror::Error;
use tracing::debug;

/// A serial port as reported by the OS
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    /// Port name (e.g., COM3, /dev/ttyACM0)
    pub port: String,
    /// Human readable description
    pub description: String,
}

impl Device {
    /// Create a device entry
    pub fn new(port: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            description: description.into(),
        }
    }
}

impl From<SerialPortInfo> for Device {
    fn from(info: SerialPortInfo) -> Self {
        let description = match info.port_type {
            SerialPortType::UsbPort(usb) => usb
                .product
                .or(usb.manufacturer)
                .unwrap_or_else(|| format!("USB {:04x}:{:04x}", usb.vid, usb.pid)),
            SerialPortType::BluetoothPort => "Bluetooth".to_string(),
            SerialPortType::PciPort => "PCI".to_string(),
            SerialPortType::Unknown => String::new(),
        };

        Self {
            port: info.port_name,
            description,
        }
    }
}

/// Device lookup errors
#[derive(Error, Debug)]
pub enum DeviceError {
    /// The OS refused to enumerate ports
    #[error("Port enumeration failed: {0}")]
    Enumeration(String),
}

/// Source of the current port list
#[cfg_attr(test, mockall::automock)]
pub trait PortEnumerator {
    /// List the ports visible right now, in OS order
    fn available(&self) -> Result<Vec<Device>, DeviceError>;
}

/// Port enumeration backed by the `serialport` crate
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemPorts;

impl PortEnumerator for SystemPorts {
    fn available(&self) -> Result<Vec<Device>, DeviceError> {
        serialport::available_ports()
            .map(|ports| ports.into_iter().map(Device::from).collect())
            .map_err(|e| DeviceError::Enumeration(e.to_string()))
    }
}

/// Finds the attached board by description substring
pub struct DeviceLocator {
    ports: Box<dyn PortEnumerator + Send + Sync>,
}

impl DeviceLocator {
    /// Create a locator over the given port source
    pub fn new(ports: Box<dyn PortEnumerator + Send + Sync>) -> Self {
        Self { ports }
    }

    /// Locator over the system's serial ports
    pub fn system() -> Self {
        Self::new(Box::new(SystemPorts))
    }

    /// List all currently visible ports
    pub fn ports(&self) -> Result<Vec<Device>, DeviceError> {
        self.ports.available()
    }

    /// First port whose description contains `identifier` (case-sensitive).
    ///
    /// Returns `Ok(None)` when nothing matches. With several matching boards
    /// the winner depends on the OS enumeration order.
    pub fn find_device(&self, identifier: &str) -> Result<Option<Device>, DeviceError> {
        let ports = self.ports.available()?;
        let found = ports
            .iter()
            .find(|d| d.description.contains(identifier))
            .cloned();

        if found.is_none() {
            debug!(
                "No port matches {:?}; visible: {:?}",
                identifier,
                ports.iter().map(|d| (&d.port, &d.description)).collect::<Vec<_>>()
            );
        }

        Ok(found)
    }
}
