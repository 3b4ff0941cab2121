//! Error types for the decoder feed and the relay client

use thiserror::Error;

/// Errors raised while decoding one datagram
///
/// Any of these aborts the datagram only; the listener keeps running.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Datagram does not start with the feed's magic number
    #[error("bad magic 0x{0:08X}")]
    BadMagic(u32),

    /// Datagram ended in the middle of a field
    #[error("truncated {field}: need {needed} bytes, {remaining} left")]
    Truncated {
        field: &'static str,
        needed: usize,
        remaining: usize,
    },

    /// String field is not valid UTF-8
    #[error("invalid UTF-8 in {0}")]
    InvalidUtf8(&'static str),
}

/// Errors raised by the relay path
#[derive(Debug, Error)]
pub enum RelayError {
    /// Endpoint rejected our credentials (HTTP 401/403)
    #[error("authentication rejected (HTTP {status})")]
    Auth { status: u16 },

    /// Endpoint answered with a non-success status
    #[error("server error (HTTP {status})")]
    Server { status: u16 },

    /// Request never got an answer (DNS, connect, timeout, TLS)
    #[error("transport error: {0}")]
    Transport(String),

    /// Required relay settings are missing
    #[error("relay not configured: {0}")]
    Config(String),

    /// Local socket error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RelayError {
    /// True for credential rejections
    pub fn is_auth(&self) -> bool {
        matches!(self, RelayError::Auth { .. })
    }
}

impl From<reqwest::Error> for RelayError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) if status.as_u16() == 401 || status.as_u16() == 403 => RelayError::Auth {
                status: status.as_u16(),
            },
            Some(status) => RelayError::Server {
                status: status.as_u16(),
            },
            None => RelayError::Transport(e.to_string()),
        }
    }
}
