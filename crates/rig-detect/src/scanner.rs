//! Serial port scanner

use serde::Serialize;
use serialport::{available_ports, SerialPortType};
use tracing::{debug, info};

use crate::error::DetectError;

/// Physical kind of a serial endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PortKind {
    Usb,
    Pci,
    Bluetooth,
    Unknown,
}

/// A local serial endpoint a rig may sit behind
///
/// The USB fields are `None` for anything that is not a USB adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SerialPortInfo {
    /// Path or name the port opens under (`/dev/ttyUSB0`, `COM3`)
    pub port: String,
    pub kind: PortKind,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
    pub serial_number: Option<String>,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
}

impl SerialPortInfo {
    fn from_serialport(name: String, port_type: &SerialPortType) -> Self {
        let bare = |kind| Self {
            port: name.clone(),
            kind,
            vid: None,
            pid: None,
            serial_number: None,
            manufacturer: None,
            product: None,
        };

        match port_type {
            SerialPortType::UsbPort(usb) => Self {
                port: name.clone(),
                kind: PortKind::Usb,
                vid: Some(usb.vid),
                pid: Some(usb.pid),
                serial_number: usb.serial_number.clone(),
                manufacturer: usb.manufacturer.clone(),
                product: usb.product.clone(),
            },
            SerialPortType::PciPort => bare(PortKind::Pci),
            SerialPortType::BluetoothPort => bare(PortKind::Bluetooth),
            SerialPortType::Unknown => bare(PortKind::Unknown),
        }
    }

    /// One-line description for pickers and logs
    pub fn description(&self) -> String {
        match (&self.manufacturer, &self.product) {
            (Some(m), Some(p)) => format!("{} {}", m, p),
            (None, Some(p)) => p.clone(),
            (Some(m), None) => m.clone(),
            (None, None) => match self.kind {
                PortKind::Usb => match (self.vid, self.pid) {
                    (Some(vid), Some(pid)) => format!("USB {:04x}:{:04x}", vid, pid),
                    _ => "USB serial".to_string(),
                },
                PortKind::Pci => "PCI serial".to_string(),
                PortKind::Bluetooth => "Bluetooth serial".to_string(),
                PortKind::Unknown => "Serial port".to_string(),
            },
        }
    }
}

/// Which ports the scanner leaves out
#[derive(Debug, Clone, Default)]
pub struct ScannerConfig {
    /// Substrings of port names to hide
    pub skip_patterns: Vec<String>,
}

/// Lists the serial endpoints a rig adapter could open
#[derive(Debug)]
pub struct PortScanner {
    config: ScannerConfig,
}

impl PortScanner {
    /// Scanner hiding Bluetooth and debug consoles
    pub fn new() -> Self {
        Self {
            config: ScannerConfig {
                skip_patterns: vec![
                    // Bluetooth ports on macOS
                    "Bluetooth".to_string(),
                    // Debug/logging ports
                    "debug".to_string(),
                ],
            },
        }
    }

    pub fn with_config(config: ScannerConfig) -> Self {
        Self { config }
    }

    /// Ports currently present, sorted by name
    pub fn enumerate_ports(&self) -> Result<Vec<SerialPortInfo>, DetectError> {
        debug!("Listing serial ports");
        let ports = available_ports().map_err(|e| DetectError::EnumerationFailed(e.to_string()))?;

        let result = self.filter(
            ports
                .into_iter()
                .map(|p| SerialPortInfo::from_serialport(p.port_name, &p.port_type)),
        );

        if result.is_empty() {
            info!("No serial ports found");
        } else {
            info!("Found {} serial port(s)", result.len());
            for port in &result {
                debug!("  {} - {}", port.port, port.description());
            }
        }

        Ok(result)
    }

    fn filter(&self, ports: impl Iterator<Item = SerialPortInfo>) -> Vec<SerialPortInfo> {
        let mut result: Vec<_> = ports.filter(|p| !self.should_skip_port(p)).collect();
        result.sort_by(|a, b| a.port.cmp(&b.port));
        result
    }

    fn should_skip_port(&self, port: &SerialPortInfo) -> bool {
        self.config
            .skip_patterns
            .iter()
            .any(|pattern| port.port.contains(pattern.as_str()))
    }
}

impl Default for PortScanner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serialport::UsbPortInfo;

    fn ftdi() -> SerialPortType {
        SerialPortType::UsbPort(UsbPortInfo {
            vid: 0x0403,
            pid: 0x6001,
            serial_number: Some("12345".to_string()),
            manufacturer: Some("FTDI".to_string()),
            product: Some("FT232R".to_string()),
        })
    }

    #[test]
    fn test_serial_port_info_from_usb() {
        let info = SerialPortInfo::from_serialport("/dev/ttyUSB0".to_string(), &ftdi());

        assert_eq!(info.kind, PortKind::Usb);
        assert_eq!(info.vid, Some(0x0403));
        assert_eq!(info.pid, Some(0x6001));
        assert_eq!(info.description(), "FTDI FT232R");
    }

    #[test]
    fn test_description_without_strings() {
        let info = SerialPortInfo::from_serialport("/dev/ttyS0".to_string(), &SerialPortType::PciPort);
        assert_eq!(info.description(), "PCI serial");
    }

    #[test]
    fn test_skip_patterns_and_ordering() {
        let scanner = PortScanner::new();
        let ports = vec![
            SerialPortInfo::from_serialport("/dev/ttyUSB1".into(), &ftdi()),
            SerialPortInfo::from_serialport(
                "/dev/cu.Bluetooth-Incoming-Port".into(),
                &SerialPortType::BluetoothPort,
            ),
            SerialPortInfo::from_serialport("/dev/ttyUSB0".into(), &ftdi()),
        ];

        let names: Vec<_> = scanner
            .filter(ports.into_iter())
            .into_iter()
            .map(|p| p.port)
            .collect();
        assert_eq!(names, vec!["/dev/ttyUSB0", "/dev/ttyUSB1"]);
    }

    #[test]
    fn test_custom_skip_patterns() {
        let scanner = PortScanner::with_config(ScannerConfig {
            skip_patterns: vec!["ttyS".into()],
        });
        let ports = vec![
            SerialPortInfo::from_serialport("/dev/ttyS0".into(), &SerialPortType::PciPort),
            SerialPortInfo::from_serialport("/dev/ttyUSB0".into(), &ftdi()),
        ];
        let kept = scanner.filter(ports.into_iter());
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].port, "/dev/ttyUSB0");
    }

    #[test]
    fn test_serializes_for_the_api() {
        let info = SerialPortInfo::from_serialport("/dev/ttyUSB0".to_string(), &ftdi());
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["kind"], "usb");
        assert_eq!(json["port"], "/dev/ttyUSB0");
    }
}
