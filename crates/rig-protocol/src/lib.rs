//! Rig Protocol Library
//!
//! Parsing and encoding for the transceiver control protocols the bridge
//! talks to directly:
//!
//! - **Yaesu ASCII**: semicolon-terminated commands (FT-991/FTDX series)
//! - **Kenwood**: semicolon-terminated commands (TS-590/TS-2000 layout)
//! - **Icom CI-V**: framed variable-length binary messages with address-based routing
//!
//! # Architecture
//!
//! Each protocol module provides:
//! - A streaming frame splitter that handles partial data ([`FrameCodec`])
//! - Command encoding to protocol-specific bytes
//! - Conversion of radio replies into normalized [`RadioReport`]s
//!
//! Nothing here performs I/O. The bridge owns the transports and feeds the
//! bytes it reads through these codecs.
//!
//! # Example
//!
//! ```rust
//! use rig_protocol::{ascii::AsciiCodec, yaesu, FrameCodec, RadioReport};
//!
//! let dialect = yaesu::dialect();
//! let mut codec = AsciiCodec::new();
//! codec.push_bytes(b"IF001014074000+000000C00000;");
//!
//! let line = codec.next_line().unwrap();
//! let reports = dialect.reports_for_line(&line);
//! assert_eq!(reports[0], RadioReport::Frequency { hz: 14_074_000 });
//! ```

pub mod ascii;
pub mod error;
pub mod icom;
pub mod kenwood;
pub mod mode;
pub mod yaesu;

pub use ascii::{AsciiCodec, AsciiDialect, AsciiReply};
pub use error::{ParseError, ProtocolError};
pub use icom::{CivFramer, CivReply};
pub use mode::{tags, ModeTable};

/// Identifies which wire protocol a serial radio speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Protocol {
    /// Yaesu ASCII protocol (semicolon-terminated for FT-991/FTDX series)
    YaesuAscii,
    /// Kenwood protocol (ASCII semicolon-terminated)
    Kenwood,
    /// Icom CI-V protocol (framed variable-length messages)
    IcomCiv,
}

impl Protocol {
    /// Returns a human-readable name for the protocol
    pub fn name(&self) -> &'static str {
        match self {
            Protocol::YaesuAscii => "Yaesu ASCII",
            Protocol::Kenwood => "Kenwood",
            Protocol::IcomCiv => "Icom CI-V",
        }
    }
}

/// A single normalized observation reported by a radio
///
/// Parsers return these instead of mutating state so that an unrecognized
/// mode code simply yields no `Mode` report and the last known value stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioReport {
    /// VFO frequency in Hz
    Frequency { hz: u64 },
    /// Operating mode tag
    Mode { mode: &'static str },
    /// Filter width (Hz or device-specific index)
    FilterWidth { width: u32 },
    /// Transmit state
    Ptt { active: bool },
}

/// Trait for streaming splitters that cut a byte stream into frames
pub trait FrameCodec {
    /// Push raw bytes into the codec's buffer
    fn push_bytes(&mut self, data: &[u8]);

    /// Try to extract the next complete frame from the buffer
    fn next_frame(&mut self) -> Option<Vec<u8>>;

    /// Clear the internal buffer
    fn clear(&mut self);
}
