//! Locating the target board among attached serial devices.

use std::fmt;

use serde::Serialize;

use crate::{pklog_debug, Result};

/// USB vendor id of the Raspberry Pi Pico.
pub const PICO_VENDOR_ID: u16 = 0x2E8A;

/// Product ids the board enumerates with in bootloader and runtime modes.
pub const PICO_PRODUCT_IDS: [u16; 2] = [0x000A, 0x000B];

/// One serial port as reported by the operating system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortInfo {
    /// Connection path or name (`/dev/ttyACM0`, `COM3`, ...).
    pub name: String,
    /// USB ids, absent for non-USB ports.
    pub vid: Option<u16>,
    pub pid: Option<u16>,
    pub product: Option<String>,
}

impl PortInfo {
    pub fn usb(name: &str, vid: u16, pid: u16) -> Self {
        Self {
            name: name.to_string(),
            vid: Some(vid),
            pid: Some(pid),
            product: None,
        }
    }

    pub fn non_usb(name: &str) -> Self {
        Self {
            name: name.to_string(),
            vid: None,
            pid: None,
            product: None,
        }
    }

    pub fn is_pico(&self) -> bool {
        match (self.vid, self.pid) {
            (Some(vid), Some(pid)) => vid == PICO_VENDOR_ID && PICO_PRODUCT_IDS.contains(&pid),
            _ => false,
        }
    }
}

/// A discovered board. Valid for one orchestration run only; a replug
/// produces a new handle on the next lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceHandle {
    pub path: String,
    pub vid: u16,
    pub pid: u16,
}

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path)
    }
}

/// Source of the attached serial port list.
pub trait PortEnumerator: Send {
    fn ports(&self) -> Result<Vec<PortInfo>>;
}

/// Enumerates ports through the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemPorts;

impl PortEnumerator for SystemPorts {
    fn ports(&self) -> Result<Vec<PortInfo>> {
        let ports = serialport::available_ports()?;
        Ok(ports
            .into_iter()
            .map(|p| match p.port_type {
                serialport::SerialPortType::UsbPort(usb) => PortInfo {
                    name: p.port_name,
                    vid: Some(usb.vid),
                    pid: Some(usb.pid),
                    product: usb.product,
                },
                _ => PortInfo::non_usb(&p.port_name),
            })
            .collect())
    }
}

/// Finds the board among the ports an enumerator reports.
pub struct DeviceLocator {
    ports: Box<dyn PortEnumerator>,
}

impl DeviceLocator {
    pub fn new(ports: Box<dyn PortEnumerator>) -> Self {
        Self { ports }
    }

    pub fn system() -> Self {
        Self::new(Box::new(SystemPorts))
    }

    /// First matching device in enumeration order, or `None` when no board
    /// is attached.
    pub fn locate(&self) -> Result<Option<DeviceHandle>> {
        let ports = self.ports.ports()?;
        pklog_debug!("DeviceLocator::locate enumerated {} ports", ports.len());
        let found = ports.into_iter().find(PortInfo::is_pico).and_then(|p| {
            Some(DeviceHandle {
                path: p.name,
                vid: p.vid?,
                pid: p.pid?,
            })
        });
        match &found {
            Some(handle) => pklog_debug!(
                "Board found at {} ({:04x}:{:04x})",
                handle.path,
                handle.vid,
                handle.pid
            ),
            None => pklog_debug!("No board among enumerated ports"),
        }
        Ok(found)
    }

    /// Every port with a flag telling whether it is the board.
    pub fn list(&self) -> Result<Vec<(PortInfo, bool)>> {
        Ok(self
            .ports
            .ports()?
            .into_iter()
            .map(|p| {
                let matched = p.is_pico();
                (p, matched)
            })
            .collect())
    }
}
