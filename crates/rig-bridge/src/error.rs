//! Error types for the bridge

use rig_detect::DetectError;
use rig_protocol::ProtocolError;
use rig_relay::RelayError;
use thiserror::Error;

/// Errors surfaced by the bridge command surface
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Transmit control is switched off in the configuration
    #[error("PTT control is disabled (radio.ptt_enabled is false)")]
    PttDisabled,

    /// No rig adapter is active
    #[error("no active rig adapter")]
    NoActiveRig,

    /// The adapter's task is gone
    #[error("rig adapter {0} is not running")]
    AdapterStopped(&'static str),

    /// No adapter or integration with this id
    #[error("unknown adapter: {0}")]
    UnknownAdapter(String),

    /// Route lookup failed
    #[error("no route for {0}")]
    RouteNotFound(String),

    /// Command could not be encoded for the radio
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Serial enumeration or open failed
    #[error("serial port error: {0}")]
    Serial(#[from] DetectError),

    /// Relay could not start
    #[error("relay error: {0}")]
    Relay(#[from] RelayError),

    /// Backend (flrig, rigctld, logger) failed or answered garbage
    #[error("backend error: {0}")]
    Backend(String),

    /// Required settings are missing or invalid
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The owning task has stopped
    #[error("bridge is shut down")]
    ShutDown,
}

impl From<reqwest::Error> for BridgeError {
    fn from(e: reqwest::Error) -> Self {
        BridgeError::Backend(e.to_string())
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(e: serde_json::Error) -> Self {
        BridgeError::Config(e.to_string())
    }
}
