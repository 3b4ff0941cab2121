//! Error types for serial port access

use thiserror::Error;

/// Errors that can occur while listing or opening serial ports
#[derive(Debug, Error)]
pub enum DetectError {
    /// Failed to enumerate serial ports
    #[error("failed to enumerate ports: {0}")]
    EnumerationFailed(String),

    /// Port does not exist
    #[error("no such port: {0}")]
    NotFound(String),

    /// Failed to open serial port
    #[error("failed to open port {port}: {reason}")]
    OpenFailed { port: String, reason: String },

    /// Port busy or in use
    #[error("port {0} is busy or in use")]
    PortBusy(String),

    /// Line settings the port cannot be opened with
    #[error("invalid serial settings: {0}")]
    InvalidSettings(String),
}
