//! Serial line settings and port opening
//!
//! [`test_open`] answers "can this path be opened at this baud rate?"
//! without writing a byte, so a setup page can validate a candidate
//! port while the radio is attached.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, warn};

use crate::error::DetectError;

/// Baud rates offered for CAT links
pub const SUPPORTED_BAUD_RATES: &[u32] = &[1200, 2400, 4800, 9600, 19200, 38400, 57600, 115200];

/// Stop bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StopBits {
    #[default]
    #[serde(rename = "1")]
    One,
    #[serde(rename = "2")]
    Two,
}

impl From<StopBits> for tokio_serial::StopBits {
    fn from(value: StopBits) -> Self {
        match value {
            StopBits::One => tokio_serial::StopBits::One,
            StopBits::Two => tokio_serial::StopBits::Two,
        }
    }
}

/// Parity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

impl From<Parity> for tokio_serial::Parity {
    fn from(value: Parity) -> Self {
        match value {
            Parity::None => tokio_serial::Parity::None,
            Parity::Odd => tokio_serial::Parity::Odd,
            Parity::Even => tokio_serial::Parity::Even,
        }
    }
}

/// Everything needed to open a CAT serial link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    /// Port name (e.g., /dev/ttyUSB0, COM3)
    pub path: String,
    pub baud_rate: u32,
    pub stop_bits: StopBits,
    pub parity: Parity,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            path: String::new(),
            baud_rate: 9600,
            stop_bits: StopBits::One,
            parity: Parity::None,
        }
    }
}

impl SerialSettings {
    /// Settings for `path` at `baud_rate`, 8N1
    pub fn new(path: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            path: path.into(),
            baud_rate,
            ..Self::default()
        }
    }

    /// Reject settings no port could be opened with
    pub fn validate(&self) -> Result<(), DetectError> {
        if self.path.trim().is_empty() {
            return Err(DetectError::InvalidSettings("no serial port selected".into()));
        }
        if self.baud_rate == 0 {
            return Err(DetectError::InvalidSettings("baud rate must be non-zero".into()));
        }
        if !SUPPORTED_BAUD_RATES.contains(&self.baud_rate) {
            debug!("Non-standard baud rate {} for {}", self.baud_rate, self.path);
        }
        Ok(())
    }
}

fn classify(port: &str, e: tokio_serial::Error) -> DetectError {
    match e.kind {
        tokio_serial::ErrorKind::NoDevice => DetectError::NotFound(port.to_string()),
        tokio_serial::ErrorKind::Io(std::io::ErrorKind::NotFound) => {
            DetectError::NotFound(port.to_string())
        }
        tokio_serial::ErrorKind::InvalidInput => DetectError::InvalidSettings(e.description),
        _ if e.description.to_ascii_lowercase().contains("busy") => {
            DetectError::PortBusy(port.to_string())
        }
        _ => DetectError::OpenFailed {
            port: port.to_string(),
            reason: e.description,
        },
    }
}

/// Open a serial port as an async stream
///
/// Must be called from within a tokio runtime.
pub fn open_serial(settings: &SerialSettings) -> Result<SerialStream, DetectError> {
    settings.validate()?;
    debug!(
        "Opening {} at {} baud ({:?}, {:?})",
        settings.path, settings.baud_rate, settings.stop_bits, settings.parity
    );

    tokio_serial::new(&settings.path, settings.baud_rate)
        .stop_bits(settings.stop_bits.into())
        .parity(settings.parity.into())
        .data_bits(tokio_serial::DataBits::Eight)
        .timeout(Duration::from_millis(100))
        .open_native_async()
        .map_err(|e| classify(&settings.path, e))
}

/// Test-open a port at the given baud rate and close it again
///
/// Nothing is written to the port.
pub async fn test_open(port_name: &str, baud_rate: u32) -> Result<(), DetectError> {
    let settings = SerialSettings::new(port_name, baud_rate);
    match open_serial(&settings) {
        Ok(stream) => {
            drop(stream);
            debug!("Test-open of {} at {} baud succeeded", port_name, baud_rate);
            Ok(())
        }
        Err(e) => {
            warn!("Test-open of {} at {} baud failed: {}", port_name, baud_rate, e);
            Err(e)
        }
    }
}
