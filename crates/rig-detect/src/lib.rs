//! Rig Serial Port Library
//!
//! Serial port enumeration, line settings and a side-effect-free test-open
//! for CAT-capable transceivers.
//!
//! # Example
//!
//! ```rust,no_run
//! use rig_detect::PortScanner;
//!
//! let scanner = PortScanner::new();
//! let ports = scanner.enumerate_ports().unwrap();
//!
//! for port in ports {
//!     println!("Found port: {}", port.port);
//! }
//! ```

pub mod error;
pub mod probe;
pub mod scanner;

pub use error::DetectError;
pub use probe::{open_serial, test_open, Parity, SerialSettings, StopBits, SUPPORTED_BAUD_RATES};
pub use scanner::{PortKind, PortScanner, SerialPortInfo};
