//! Error types for CAT protocol parsing and encoding

use thiserror::Error;

/// Errors that can occur while parsing protocol data
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Invalid frame structure
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// Line or frame is shorter than the fields it must carry
    #[error("truncated reply: need {needed} bytes, got {actual}")]
    Truncated { needed: usize, actual: usize },

    /// Unknown or unsupported command
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// Invalid BCD encoding
    #[error("invalid BCD digit: 0x{0:02X}")]
    InvalidBcd(u8),

    /// Invalid frequency value
    #[error("invalid frequency: {0}")]
    InvalidFrequency(String),
}

/// Errors raised while encoding outbound commands
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Parse error
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// Frequency does not fit the protocol's digit field
    #[error("frequency {hz} Hz does not fit {digits} digits")]
    FrequencyOutOfRange { hz: u64, digits: usize },

    /// No code (or alias) exists for the requested mode
    #[error("mode not supported by {protocol}: {mode}")]
    UnsupportedMode { protocol: &'static str, mode: String },
}
