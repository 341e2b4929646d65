//! Serial port discovery and USB-UART bridge classification.
//!
//! FIU boards are reached through a USB-UART bridge; the bridge's VID/PID
//! is all there is to go on when picking a port automatically.

use crate::error::{Error, Result};

#[cfg(feature = "native")]
use log::{debug, info, trace};

/// USB-UART bridge families seen on FIU test benches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeKind {
    /// WCH CH340/CH341.
    Ch340,
    /// Silicon Labs CP210x.
    Cp210x,
    /// FTDI FT232/FT2232/FT4232.
    Ftdi,
    /// Prolific PL2303.
    Prolific,
    /// ST-LINK virtual COM port.
    StLink,
    /// Not a recognised bridge.
    Unknown,
}

/// VID and accepted PIDs per bridge. An empty PID list accepts any PID.
const KNOWN_BRIDGES: &[(u16, &[u16], BridgeKind)] = &[
    (
        0x1A86,
        &[0x7523, 0x7522, 0x5523, 0x5512, 0x55D4],
        BridgeKind::Ch340,
    ),
    (0x10C4, &[0xEA60, 0xEA70, 0xEA71, 0xEA63], BridgeKind::Cp210x),
    (
        0x0403,
        &[0x6001, 0x6010, 0x6011, 0x6014, 0x6015],
        BridgeKind::Ftdi,
    ),
    (0x067B, &[0x2303, 0x23A3, 0x23C3, 0x23D3], BridgeKind::Prolific),
    (
        0x0483,
        &[0x374B, 0x3752, 0x374E, 0x3753],
        BridgeKind::StLink,
    ),
];

impl BridgeKind {
    /// Classify a USB VID/PID pair.
    #[must_use]
    pub fn from_vid_pid(vid: u16, pid: u16) -> Self {
        KNOWN_BRIDGES
            .iter()
            .find(|(known_vid, pids, _)| vid == *known_vid && (pids.is_empty() || pids.contains(&pid)))
            .map_or(Self::Unknown, |(_, _, kind)| *kind)
    }

    /// Display name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Ch340 => "CH340/CH341",
            Self::Cp210x => "CP210x",
            Self::Ftdi => "FTDI",
            Self::Prolific => "PL2303",
            Self::StLink => "ST-LINK VCP",
            Self::Unknown => "Unknown",
        }
    }

    /// Whether the bridge was recognised.
    pub fn is_known(self) -> bool {
        !matches!(self, Self::Unknown)
    }

    /// Auto-selection rank, lower is preferred.
    fn rank(self) -> u8 {
        match self {
            Self::Ch340 | Self::Cp210x => 0,
            Self::Ftdi | Self::StLink => 1,
            Self::Prolific => 2,
            Self::Unknown => 3,
        }
    }
}

/// An enumerated serial port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedPort {
    /// Port name/path (e.g., "/dev/ttyUSB0" or "COM3").
    pub name: String,
    /// Classified bridge.
    pub bridge: BridgeKind,
    /// USB Vendor ID, for USB ports.
    pub vid: Option<u16>,
    /// USB Product ID, for USB ports.
    pub pid: Option<u16>,
    /// Manufacturer string reported by the device.
    pub manufacturer: Option<String>,
    /// Product string reported by the device.
    pub product: Option<String>,
    /// USB serial number.
    pub serial: Option<String>,
}

impl DetectedPort {
    /// Non-USB port with no metadata.
    pub fn plain(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bridge: BridgeKind::Unknown,
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
            serial: None,
        }
    }

    /// One-line description for listings.
    pub fn describe(&self) -> String {
        let bridge = if self.bridge.is_known() {
            format!(" [{}]", self.bridge.name())
        } else if let (Some(vid), Some(pid)) = (self.vid, self.pid) {
            format!(" [VID:{vid:04X} PID:{pid:04X}]")
        } else {
            String::new()
        };
        let product = self
            .product
            .as_ref()
            .map(|p| format!(" - {p}"))
            .unwrap_or_default();
        format!("{}{bridge}{product}", self.name)
    }
}

/// Enumerate serial ports with USB metadata.
#[cfg(feature = "native")]
pub fn detect_ports() -> Vec<DetectedPort> {
    let ports = match serialport::available_ports() {
        Ok(ports) => ports,
        Err(e) => {
            debug!("Failed to enumerate serial ports: {e}");
            return Vec::new();
        },
    };

    ports
        .into_iter()
        .map(|info| {
            let mut port = DetectedPort::plain(info.port_name);
            if let serialport::SerialPortType::UsbPort(usb) = info.port_type {
                port.bridge = BridgeKind::from_vid_pid(usb.vid, usb.pid);
                port.vid = Some(usb.vid);
                port.pid = Some(usb.pid);
                port.manufacturer = usb.manufacturer;
                port.product = usb.product;
                port.serial = usb.serial_number;
                trace!(
                    "USB port {} VID {:04X} PID {:04X} -> {:?}",
                    port.name, usb.vid, usb.pid, port.bridge
                );
            }
            port
        })
        .collect()
}

/// Enumerate serial ports. Always empty without the `native` feature.
#[cfg(not(feature = "native"))]
pub fn detect_ports() -> Vec<DetectedPort> {
    Vec::new()
}

/// Pick the preferred port from `ports`.
///
/// Recognised bridges win over unknown ports; among equals the first
/// enumerated port wins.
pub fn select_port(ports: &[DetectedPort]) -> Result<&DetectedPort> {
    ports
        .iter()
        .enumerate()
        .min_by_key(|(index, port)| (port.bridge.rank(), *index))
        .map(|(_, port)| port)
        .ok_or(Error::DeviceNotFound)
}

/// Pick a port automatically from the enumerated ones.
#[cfg(feature = "native")]
pub fn auto_detect_port() -> Result<DetectedPort> {
    let ports = detect_ports();
    let port = select_port(&ports)?;
    info!("Auto-detected {} ({})", port.name, port.bridge.name());
    Ok(port.clone())
}
