//! ASCII CAT framing shared by the Yaesu and Kenwood families
//!
//! Both families speak semicolon-terminated commands with a two-letter
//! prefix. They differ only in field widths, offsets and mode codes, which
//! an [`AsciiDialect`] captures as data. The dialects themselves live in
//! [`crate::yaesu`] and [`crate::kenwood`].
//!
//! Polling uses the composite `IF` status reply so frequency, mode and (where
//! the family carries it) PTT arrive in one line instead of three racing
//! round trips.

use std::ops::Range;

use crate::error::{ParseError, ProtocolError};
use crate::mode::ModeTable;
use crate::{FrameCodec, RadioReport};

/// ASCII command terminator
pub const TERMINATOR: u8 = b';';

/// Maximum command length (reasonable limit to prevent buffer overflow)
const MAX_COMMAND_LEN: usize = 64;

/// Fixed-width positions inside the composite `IF` status reply
///
/// Offsets count from the start of the line, `IF` prefix included.
#[derive(Debug, Clone)]
pub struct StatusLayout {
    /// Decimal frequency digits
    pub frequency: Range<usize>,
    /// Single mode code character
    pub mode: usize,
    /// TX flag character, if the family reports it in the status line
    pub ptt: Option<usize>,
    /// Length of a complete reply line (without terminator)
    pub line_len: usize,
}

impl StatusLayout {
    /// Shortest line that still carries every field we read
    pub fn min_len(&self) -> usize {
        let ptt_end = self.ptt.map(|p| p + 1).unwrap_or(0);
        self.frequency.end.max(self.mode + 1).max(ptt_end)
    }
}

/// How a standalone `TX` reply is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxReply {
    /// Any `TX` line means transmitting (`RX` means receive)
    AlwaysTransmit,
    /// `TX0` means receive, any other digit means transmitting
    DigitNonZero,
}

/// Everything that distinguishes one ASCII CAT family from another
#[derive(Debug, Clone)]
pub struct AsciiDialect {
    /// Family name for logs
    pub name: &'static str,
    /// Composite status reply layout
    pub status: StatusLayout,
    /// Width of the zero-padded `FA` frequency field
    pub frequency_digits: usize,
    /// Mode code table
    pub modes: ModeTable<char>,
    /// Prefix preceding the mode code in `MD` commands
    pub mode_prefix: &'static str,
    /// Bytes written on each poll
    pub poll: &'static str,
    /// Command that keys the transmitter
    pub ptt_on: &'static str,
    /// Command that returns to receive
    pub ptt_off: &'static str,
    /// Interpretation of standalone `TX` replies
    pub tx_reply: TxReply,
}

/// A parsed reply line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AsciiReply {
    /// Composite status: frequency, mode (None if the code is unknown) and PTT
    Status {
        frequency_hz: u64,
        mode: Option<&'static str>,
        ptt: Option<bool>,
    },
    /// Standalone frequency reply
    Frequency(u64),
    /// Standalone mode reply (None if the code is unknown)
    Mode(Option<&'static str>),
    /// TX/RX acknowledgement
    Ptt(bool),
    /// Anything else: query echoes, `?`, vendor chatter
    Other(String),
}

impl AsciiReply {
    /// Normalized state reports carried by this reply
    ///
    /// Unknown mode codes produce no mode report, so the previously known
    /// mode stays in place.
    pub fn reports(&self) -> Vec<RadioReport> {
        match self {
            AsciiReply::Status {
                frequency_hz,
                mode,
                ptt,
            } => {
                let mut reports = vec![RadioReport::Frequency { hz: *frequency_hz }];
                if let Some(mode) = mode {
                    reports.push(RadioReport::Mode { mode: *mode });
                }
                if let Some(active) = ptt {
                    reports.push(RadioReport::Ptt { active: *active });
                }
                reports
            }
            AsciiReply::Frequency(hz) => vec![RadioReport::Frequency { hz: *hz }],
            AsciiReply::Mode(Some(mode)) => vec![RadioReport::Mode { mode: *mode }],
            AsciiReply::Mode(None) => Vec::new(),
            AsciiReply::Ptt(active) => vec![RadioReport::Ptt { active: *active }],
            AsciiReply::Other(_) => Vec::new(),
        }
    }
}

fn parse_digits(field: &str) -> Result<u64, ParseError> {
    if field.is_empty() || !field.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ParseError::InvalidFrequency(field.to_string()));
    }
    field
        .parse::<u64>()
        .map_err(|_| ParseError::InvalidFrequency(field.to_string()))
}

impl AsciiDialect {
    /// Bytes to write for one poll cycle
    pub fn poll_command(&self) -> &'static [u8] {
        self.poll.as_bytes()
    }

    /// Parse one reply line (terminator already stripped)
    pub fn parse_line(&self, line: &str) -> Result<AsciiReply, ParseError> {
        let line = line.trim();
        let Some(prefix) = line.get(..2) else {
            return Err(ParseError::InvalidFrame(format!(
                "{} line too short: {:?}",
                self.name, line
            )));
        };
        let params = &line[2..];

        match prefix {
            "IF" if params.is_empty() => Ok(AsciiReply::Other(line.to_string())),
            "IF" => self.parse_status(line),
            "FA" if params.is_empty() => Ok(AsciiReply::Other(line.to_string())),
            "FA" => parse_digits(params).map(AsciiReply::Frequency),
            "MD" => {
                let code_pos = self.mode_prefix.len();
                match line.get(code_pos..).and_then(|rest| rest.chars().next()) {
                    Some(code) => Ok(AsciiReply::Mode(self.modes.tag(code))),
                    None => Ok(AsciiReply::Other(line.to_string())),
                }
            }
            "TX" => match self.tx_reply {
                TxReply::AlwaysTransmit => Ok(AsciiReply::Ptt(true)),
                TxReply::DigitNonZero => match params.chars().next() {
                    Some('0') => Ok(AsciiReply::Ptt(false)),
                    Some(c) if c.is_ascii_digit() => Ok(AsciiReply::Ptt(true)),
                    _ => Ok(AsciiReply::Other(line.to_string())),
                },
            },
            "RX" => Ok(AsciiReply::Ptt(false)),
            _ => Ok(AsciiReply::Other(line.to_string())),
        }
    }

    fn parse_status(&self, line: &str) -> Result<AsciiReply, ParseError> {
        let layout = &self.status;
        let needed = layout.min_len();
        if line.len() < needed {
            return Err(ParseError::Truncated {
                needed,
                actual: line.len(),
            });
        }

        let field = line
            .get(layout.frequency.clone())
            .ok_or_else(|| ParseError::InvalidFrequency(line.to_string()))?;
        let frequency_hz = parse_digits(field)?;

        let bytes = line.as_bytes();
        let mode = self.modes.tag(bytes[layout.mode] as char);
        let ptt = layout.ptt.map(|p| bytes[p] != b'0');

        Ok(AsciiReply::Status {
            frequency_hz,
            mode,
            ptt,
        })
    }

    /// Parse one line straight into state reports, logging rather than failing
    pub fn reports_for_line(&self, line: &str) -> Vec<RadioReport> {
        match self.parse_line(line) {
            Ok(AsciiReply::Other(text)) => {
                tracing::debug!("{}: ignoring reply {:?}", self.name, text);
                Vec::new()
            }
            Ok(reply) => reply.reports(),
            Err(e) => {
                tracing::debug!("{}: dropping unparsable line {:?}: {}", self.name, line, e);
                Vec::new()
            }
        }
    }

    fn check_digits(&self, hz: u64, digits: usize) -> Result<(), ProtocolError> {
        if digits < 20 && hz >= 10u64.pow(digits as u32) {
            return Err(ProtocolError::FrequencyOutOfRange { hz, digits });
        }
        Ok(())
    }

    /// Encode a set-frequency command
    pub fn encode_frequency(&self, hz: u64) -> Result<Vec<u8>, ProtocolError> {
        let width = self.frequency_digits;
        self.check_digits(hz, width)?;
        Ok(format!("FA{:0width$};", hz, width = width).into_bytes())
    }

    /// Encode a set-mode command, resolving informal tags through the alias table
    pub fn encode_mode(&self, tag: &str) -> Result<Vec<u8>, ProtocolError> {
        let code = self
            .modes
            .code(tag)
            .ok_or_else(|| ProtocolError::UnsupportedMode {
                protocol: self.name,
                mode: tag.to_string(),
            })?;
        Ok(format!("{}{};", self.mode_prefix, code).into_bytes())
    }

    /// Encode a PTT command
    pub fn encode_ptt(&self, on: bool) -> Vec<u8> {
        let cmd = if on { self.ptt_on } else { self.ptt_off };
        format!("{};", cmd).into_bytes()
    }

    /// Build the `IF` status line a radio in this state would send
    pub fn status_line(&self, hz: u64, tag: &str, ptt: bool) -> Result<Vec<u8>, ProtocolError> {
        let layout = &self.status;
        let width = layout.frequency.len();
        self.check_digits(hz, width)?;
        let code = self
            .modes
            .code(tag)
            .ok_or_else(|| ProtocolError::UnsupportedMode {
                protocol: self.name,
                mode: tag.to_string(),
            })?;

        let mut line = vec![b'0'; layout.line_len];
        line[..2].copy_from_slice(b"IF");
        let freq = format!("{:0width$}", hz, width = width);
        line[layout.frequency.clone()].copy_from_slice(freq.as_bytes());
        line[layout.mode] = code as u8;
        if let Some(p) = layout.ptt {
            line[p] = if ptt { b'1' } else { b'0' };
        }
        line.push(TERMINATOR);
        Ok(line)
    }

    /// Build the standalone TX state reply
    pub fn tx_state_line(&self, ptt: bool) -> Vec<u8> {
        let line: &[u8] = match (self.tx_reply, ptt) {
            (TxReply::DigitNonZero, true) => b"TX1;",
            (TxReply::DigitNonZero, false) => b"TX0;",
            (TxReply::AlwaysTransmit, true) => b"TX0;",
            (TxReply::AlwaysTransmit, false) => b"RX;",
        };
        line.to_vec()
    }

    /// Build everything a radio in this state would send back for one poll
    ///
    /// Mirrors [`AsciiDialect::parse_line`]; used by simulators and tests.
    pub fn status_reply(&self, hz: u64, tag: &str, ptt: bool) -> Result<Vec<u8>, ProtocolError> {
        let mut reply = self.status_line(hz, tag, ptt)?;
        if self.status.ptt.is_none() {
            reply.extend(self.tx_state_line(ptt));
        }
        Ok(reply)
    }
}

/// Streaming splitter for semicolon-terminated lines
#[derive(Debug)]
pub struct AsciiCodec {
    buffer: Vec<u8>,
}

impl AsciiCodec {
    /// Create a new ASCII codec
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(64),
        }
    }

    /// Take the next complete line as text (terminator stripped)
    pub fn next_line(&mut self) -> Option<String> {
        self.next_frame().map(|frame| {
            String::from_utf8_lossy(&frame[..frame.len() - 1]).into_owned()
        })
    }
}

impl Default for AsciiCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCodec for AsciiCodec {
    fn push_bytes(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);

        // Prevent buffer overflow
        if self.buffer.len() > MAX_COMMAND_LEN * 4 {
            // Keep only the last portion
            let start = self.buffer.len() - MAX_COMMAND_LEN;
            self.buffer.drain(..start);
        }
    }

    fn next_frame(&mut self) -> Option<Vec<u8>> {
        let term_pos = self.buffer.iter().position(|&b| b == TERMINATOR)?;
        Some(self.buffer.drain(..=term_pos).collect())
    }

    fn clear(&mut self) {
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::AsciiCodec;
    use crate::FrameCodec;

    #[test]
    fn test_streaming_lines() {
        let mut codec = AsciiCodec::new();

        codec.push_bytes(b"FA000142");
        assert!(codec.next_line().is_none());

        codec.push_bytes(b"50000;MD2;");
        assert_eq!(codec.next_line().as_deref(), Some("FA00014250000"));
        assert_eq!(codec.next_line().as_deref(), Some("MD2"));
        assert!(codec.next_line().is_none());
    }

    #[test]
    fn test_overflow_keeps_tail() {
        let mut codec = AsciiCodec::new();
        codec.push_bytes(&[b'x'; 300]);
        codec.push_bytes(b"RX;");
        let line = codec.next_line().unwrap();
        assert!(line.ends_with("RX"));
        assert!(line.len() < 100);
    }

    mod status_round_trip {
        use crate::ascii::{AsciiCodec, AsciiDialect};
        use crate::{kenwood, yaesu, FrameCodec, RadioReport};
        use proptest::prelude::*;

        fn replay(dialect: &AsciiDialect, bytes: &[u8]) -> Vec<RadioReport> {
            let mut codec = AsciiCodec::new();
            codec.push_bytes(bytes);
            let mut reports = Vec::new();
            while let Some(line) = codec.next_line() {
                reports.extend(dialect.reports_for_line(&line));
            }
            reports
        }

        // Tags both families can represent
        const TAGS: [&str; 8] = ["LSB", "USB", "CW", "FM", "AM", "RTTY", "CW-R", "RTTY-R"];

        fn check(
            dialect: AsciiDialect,
            hz: u64,
            idx: usize,
            ptt: bool,
        ) -> Result<(), TestCaseError> {
            let tag = TAGS[idx % TAGS.len()];
            let reply = dialect.status_reply(hz, tag, ptt).unwrap();
            let reports = replay(&dialect, &reply);
            prop_assert_eq!(
                reports,
                vec![
                    RadioReport::Frequency { hz },
                    RadioReport::Mode { mode: tag },
                    RadioReport::Ptt { active: ptt },
                ]
            );
            Ok(())
        }

        proptest! {
            #[test]
            fn test_yaesu_status_round_trips(hz in 30_000u64..470_000_000, idx in 0usize..8, ptt: bool) {
                check(yaesu::dialect(), hz, idx, ptt)?;
            }

            #[test]
            fn test_kenwood_status_round_trips(hz in 30_000u64..470_000_000, idx in 0usize..8, ptt: bool) {
                check(kenwood::dialect(), hz, idx, ptt)?;
            }
        }
    }
}
