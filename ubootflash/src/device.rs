//! Serial adapter discovery.
//!
//! Boards running U-Boot are almost always reached through a USB-UART
//! bridge. Ports are classified by VID/PID so auto-selection can prefer a
//! real adapter over built-in UARTs.

#[cfg(feature = "native")]
use log::{debug, trace};

use crate::port::PortInfo;
#[cfg(feature = "native")]
use crate::port::{NativePortEnumerator, PortEnumerator};

/// USB-UART bridge families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum AdapterKind {
    /// CH340/CH341.
    Ch340,
    /// Silicon Labs CP210x.
    Cp210x,
    /// FTDI FT232/FT2232/FT4232.
    Ftdi,
    /// Prolific PL2303.
    Prolific,
    /// Anything else, including non-USB ports.
    Unknown,
}

const KNOWN_ADAPTERS: &[(u16, &[u16], AdapterKind)] = &[
    (
        0x1A86,
        &[0x7523, 0x7522, 0x5523, 0x5512, 0x55D4],
        AdapterKind::Ch340,
    ),
    (0x10C4, &[0xEA60, 0xEA70, 0xEA71, 0xEA63], AdapterKind::Cp210x),
    (
        0x0403,
        &[0x6001, 0x6010, 0x6011, 0x6014, 0x6015],
        AdapterKind::Ftdi,
    ),
    (0x067B, &[0x2303, 0x23A3, 0x23C3, 0x23D3], AdapterKind::Prolific),
];

impl AdapterKind {
    /// Classify a USB VID/PID pair.
    #[must_use]
    pub fn from_vid_pid(vid: u16, pid: u16) -> Self {
        KNOWN_ADAPTERS
            .iter()
            .find(|(known_vid, pids, _)| vid == *known_vid && pids.contains(&pid))
            .map_or(Self::Unknown, |(_, _, kind)| *kind)
    }

    /// Display name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ch340 => "CH340/CH341",
            Self::Cp210x => "CP210x",
            Self::Ftdi => "FTDI",
            Self::Prolific => "PL2303",
            Self::Unknown => "Unknown",
        }
    }

    /// Whether this is a recognised bridge.
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

/// A serial port with its adapter classification.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DetectedPort {
    /// Port path (e.g. "/dev/ttyUSB0" or "COM3").
    pub name: String,
    /// Classified adapter.
    pub adapter: AdapterKind,
    /// USB Vendor ID.
    pub vid: Option<u16>,
    /// USB Product ID.
    pub pid: Option<u16>,
    /// Manufacturer string.
    pub manufacturer: Option<String>,
    /// Product string.
    pub product: Option<String>,
    /// Serial number.
    pub serial_number: Option<String>,
}

impl From<PortInfo> for DetectedPort {
    fn from(info: PortInfo) -> Self {
        let adapter = match (info.vid, info.pid) {
            (Some(vid), Some(pid)) => AdapterKind::from_vid_pid(vid, pid),
            _ => AdapterKind::Unknown,
        };
        Self {
            name: info.name,
            adapter,
            vid: info.vid,
            pid: info.pid,
            manufacturer: info.manufacturer,
            product: info.product,
            serial_number: info.serial_number,
        }
    }
}

impl DetectedPort {
    /// Whether the port sits on a USB bus.
    pub fn is_usb(&self) -> bool {
        self.vid
            .is_some()
    }
}

/// Enumerate serial ports. Enumeration failures yield an empty list.
#[cfg(feature = "native")]
pub fn detect_ports() -> Vec<DetectedPort> {
    match NativePortEnumerator::list_ports() {
        Ok(ports) => ports
            .into_iter()
            .map(DetectedPort::from)
            .inspect(|p| trace!("Found port {} ({})", p.name, p.adapter.name()))
            .collect(),
        Err(e) => {
            debug!("Failed to enumerate serial ports: {e}");
            Vec::new()
        },
    }
}

/// Pick the most plausible port from `ports`.
///
/// Known bridges win over other USB ports, which win over everything else.
pub fn pick_port(ports: &[DetectedPort]) -> Option<&DetectedPort> {
    ports
        .iter()
        .find(|p| p.adapter.is_known())
        .or_else(|| ports.iter().find(|p| p.is_usb()))
        .or_else(|| ports.first())
}

/// One display line per port.
pub fn format_port_list(ports: &[DetectedPort]) -> Vec<String> {
    ports
        .iter()
        .map(|port| {
            let adapter = if port.adapter.is_known() {
                format!(" [{}]", port.adapter.name())
            } else if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
                format!(" [VID:{vid:04X} PID:{pid:04X}]")
            } else {
                String::new()
            };
            let product = port
                .product
                .as_ref()
                .map(|p| format!(" - {p}"))
                .unwrap_or_default();
            format!("{}{adapter}{product}", port.name)
        })
        .collect()
}
