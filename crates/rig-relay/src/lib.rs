//! Decoder Feed Relay Library
//!
//! Listens for the UDP feed a digital-mode decoder (WSJT-X, JTDX) emits,
//! parses its datagrams and forwards them upstream in batches:
//!
//! - **wsjtx**: `QDataStream` datagram decoding
//! - **queue**: ordered pending queue with front requeue on failure
//! - **backoff**: flush interval schedule driven by consecutive errors
//! - **client**: the batch transport seam and its HTTP implementation
//! - **relay**: the runner that ties them together
//!
//! # Example
//!
//! ```rust
//! use rig_relay::wsjtx::{decode_datagram, decode_datagram_bytes, WsjtxMessage};
//!
//! let data = decode_datagram_bytes("WSJT-X", 0, -10, 1200, "CQ K1ABC FN42");
//! let dgram = decode_datagram(&data).unwrap().unwrap();
//! assert!(matches!(dgram.message, WsjtxMessage::Decode(_)));
//! ```

pub mod backoff;
pub mod client;
pub mod error;
pub mod queue;
pub mod relay;
pub mod wsjtx;

pub use client::{BatchTransport, HttpTransport};
pub use error::{DecodeError, RelayError};
pub use queue::{RelayMessage, RelayQueue};
pub use relay::{start_relay, RelayConfig, RelayCore, RelayHandle, RelayStatus};
