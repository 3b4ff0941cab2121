//! Virtual radio simulation
//!
//! A simulated transceiver that answers CAT queries the way the real radio
//! would: `IF;` gets a status line, CI-V read commands get BCD replies, set
//! commands change state. Bytes go in through [`VirtualRadio::handle_input`]
//! and the replies come back out of it.

use rig_protocol::ascii::{AsciiCodec, AsciiDialect, TxReply};
use rig_protocol::icom::{self, cmd, CivFramer, DEFAULT_RADIO_ADDR, PREAMBLE, TERMINATOR};
use rig_protocol::{kenwood, yaesu, FrameCodec, Protocol};
use tracing::{debug, trace};

/// A simulated radio that generates protocol-accurate replies
#[derive(Debug)]
pub struct VirtualRadio {
    protocol: Protocol,
    frequency_hz: u64,
    mode: &'static str,
    filter: u8,
    ptt: bool,
    civ_address: u8,
    ascii: AsciiCodec,
    civ: CivFramer,
}

impl VirtualRadio {
    /// Create a radio on 20m FT8 (14.074 MHz USB)
    pub fn new(protocol: Protocol) -> Self {
        Self {
            protocol,
            frequency_hz: 14_074_000,
            mode: "USB",
            filter: 1,
            ptt: false,
            civ_address: DEFAULT_RADIO_ADDR,
            ascii: AsciiCodec::new(),
            civ: CivFramer::new(),
        }
    }

    /// Answer CI-V frames addressed to `addr` instead of the default
    pub fn with_civ_address(mut self, addr: u8) -> Self {
        self.civ_address = addr;
        self
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn frequency_hz(&self) -> u64 {
        self.frequency_hz
    }

    pub fn mode(&self) -> &'static str {
        self.mode
    }

    pub fn ptt(&self) -> bool {
        self.ptt
    }

    pub fn civ_address(&self) -> u8 {
        self.civ_address
    }

    fn dialect(&self) -> Option<AsciiDialect> {
        match self.protocol {
            Protocol::YaesuAscii => Some(yaesu::dialect()),
            Protocol::Kenwood => Some(kenwood::dialect()),
            Protocol::IcomCiv => None,
        }
    }

    /// Tune from the front panel
    pub fn set_frequency(&mut self, hz: u64) {
        self.frequency_hz = hz;
    }

    /// Change mode from the front panel; returns false if the radio lacks it
    pub fn set_mode(&mut self, tag: &str) -> bool {
        let canonical = match self.dialect() {
            Some(d) => d.modes.code(tag).and_then(|c| d.modes.tag(c)),
            None => icom::MODES.code(tag).and_then(|c| icom::MODES.tag(c)),
        };
        match canonical {
            Some(mode) => {
                self.mode = mode;
                true
            }
            None => false,
        }
    }

    /// Key or unkey from the front panel
    pub fn set_ptt(&mut self, on: bool) {
        self.ptt = on;
    }

    /// Feed bytes written by the controller; returns the radio's replies
    pub fn handle_input(&mut self, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        match self.dialect() {
            Some(dialect) => {
                self.ascii.push_bytes(data);
                while let Some(line) = self.ascii.next_line() {
                    out.extend(self.handle_ascii_line(&dialect, &line));
                }
            }
            None => {
                self.civ.push_bytes(data);
                while let Some(frame) = self.civ.next_frame() {
                    out.extend(self.handle_civ_frame(&frame));
                }
            }
        }
        out
    }

    fn handle_ascii_line(&mut self, dialect: &AsciiDialect, line: &str) -> Vec<u8> {
        trace!("Virtual {} got {:?}", dialect.name, line);
        let reject = b"?;".to_vec();
        let Some(prefix) = line.get(..2) else {
            return reject;
        };
        let params = &line[2..];

        match prefix {
            "IF" => dialect
                .status_line(self.frequency_hz, self.mode, self.ptt)
                .unwrap_or(reject),
            "FA" if params.is_empty() => format!(
                "FA{:0width$};",
                self.frequency_hz,
                width = dialect.frequency_digits
            )
            .into_bytes(),
            "FA" => match params.parse::<u64>() {
                Ok(hz) => {
                    self.frequency_hz = hz;
                    Vec::new()
                }
                Err(_) => reject,
            },
            "MD" => {
                let Some(rest) = line.strip_prefix(dialect.mode_prefix) else {
                    return reject;
                };
                match rest.chars().next() {
                    None => match dialect.modes.code(self.mode) {
                        Some(code) => format!("{}{};", dialect.mode_prefix, code).into_bytes(),
                        None => reject,
                    },
                    Some(code) => match dialect.modes.tag(code) {
                        Some(mode) => {
                            self.mode = mode;
                            Vec::new()
                        }
                        None => reject,
                    },
                }
            }
            "TX" => match dialect.tx_reply {
                TxReply::DigitNonZero if params.is_empty() => dialect.tx_state_line(self.ptt),
                TxReply::DigitNonZero => {
                    self.ptt = params != "0";
                    Vec::new()
                }
                TxReply::AlwaysTransmit => {
                    self.ptt = true;
                    Vec::new()
                }
            },
            "RX" => {
                self.ptt = false;
                Vec::new()
            }
            _ => {
                debug!("Virtual {} rejecting {:?}", dialect.name, line);
                reject
            }
        }
    }

    fn civ_frame(&self, to: u8, command: u8, data: &[u8]) -> Vec<u8> {
        let mut out = vec![PREAMBLE, PREAMBLE, to, self.civ_address, command];
        out.extend_from_slice(data);
        out.push(TERMINATOR);
        out
    }

    fn handle_civ_frame(&mut self, frame: &[u8]) -> Vec<u8> {
        if frame[2] != self.civ_address {
            return Vec::new();
        }
        let from = frame[3];
        let command = frame[4];
        let data = &frame[5..frame.len() - 1];
        let ok = self.civ_frame(from, cmd::OK, &[]);
        let ng = self.civ_frame(from, cmd::NG, &[]);

        match (command, data) {
            (cmd::READ_FREQUENCY, []) => match icom::frequency_to_bcd(self.frequency_hz) {
                Ok(bcd) => self.civ_frame(from, cmd::READ_FREQUENCY, &bcd),
                Err(_) => ng,
            },
            (cmd::READ_MODE, []) => match icom::MODES.code(self.mode) {
                Some(code) => self.civ_frame(from, cmd::READ_MODE, &[code, self.filter]),
                None => ng,
            },
            (cmd::PTT, [cmd::PTT_SUB]) => {
                self.civ_frame(from, cmd::PTT, &[cmd::PTT_SUB, u8::from(self.ptt)])
            }
            (cmd::SET_FREQUENCY, bcd) => match icom::bcd_to_frequency(bcd) {
                Ok(hz) => {
                    self.frequency_hz = hz;
                    ok
                }
                Err(_) => ng,
            },
            (cmd::SET_MODE, [code, rest @ ..]) => match icom::MODES.tag(*code) {
                Some(mode) => {
                    self.mode = mode;
                    if let Some(filter) = rest.first() {
                        self.filter = *filter;
                    }
                    ok
                }
                None => ng,
            },
            (cmd::PTT, [cmd::PTT_SUB, state]) => {
                self.ptt = *state != 0;
                ok
            }
            _ => ng,
        }
    }

    /// Unsolicited (transceive) frequency and mode frames for the controller
    pub fn transceive_frames(&self) -> Vec<u8> {
        let mut out = Vec::new();
        if let Ok(bcd) = icom::frequency_to_bcd(self.frequency_hz) {
            out.extend(self.civ_frame(icom::CONTROLLER_ADDR, cmd::FREQUENCY, &bcd));
        }
        if let Some(code) = icom::MODES.code(self.mode) {
            out.extend(self.civ_frame(icom::CONTROLLER_ADDR, cmd::MODE, &[code, self.filter]));
        }
        out
    }
}
