//! Wire protocols spoken over a serial link
//!
//! A [`WireProtocol`] turns poll cycles and control requests into bytes and
//! turns whatever the radio sends back into [`RadioReport`]s. It keeps its
//! own framing buffer, so reads may be chunked arbitrarily.

use rig_protocol::ascii::{AsciiCodec, AsciiDialect};
use rig_protocol::icom::{parse_frame, CivEncoder, CivFramer, CivReply};
use rig_protocol::{kenwood, yaesu, FrameCodec, Protocol, ProtocolError, RadioReport};
use tracing::{debug, trace, warn};

use super::RigCommand;

/// Request/response codec for one serial radio family
pub trait WireProtocol: Send {
    fn name(&self) -> &'static str;

    /// Bytes for one poll cycle
    fn poll(&self) -> Vec<u8>;

    /// Feed received bytes; returns the reports they complete
    fn feed(&mut self, data: &[u8]) -> Vec<RadioReport>;

    /// Bytes for a control request
    fn encode(&self, command: &RigCommand) -> Result<Vec<u8>, ProtocolError>;
}

/// Which wire protocol a serial adapter speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireKind {
    Yaesu,
    Kenwood,
    Icom { address: u8 },
}

impl WireKind {
    pub fn protocol(&self) -> Protocol {
        match self {
            WireKind::Yaesu => Protocol::YaesuAscii,
            WireKind::Kenwood => Protocol::Kenwood,
            WireKind::Icom { .. } => Protocol::IcomCiv,
        }
    }

    /// Adapter id of this family
    pub fn id(&self) -> &'static str {
        match self {
            WireKind::Yaesu => "yaesu",
            WireKind::Kenwood => "kenwood",
            WireKind::Icom { .. } => "icom",
        }
    }

    /// Fresh codec with empty buffers
    pub fn build(&self) -> Box<dyn WireProtocol> {
        match self {
            WireKind::Yaesu => Box::new(AsciiWire::new(yaesu::dialect())),
            WireKind::Kenwood => Box::new(AsciiWire::new(kenwood::dialect())),
            WireKind::Icom { address } => Box::new(CivWire::new(*address)),
        }
    }
}

/// Semicolon-terminated ASCII CAT
#[derive(Debug)]
pub struct AsciiWire {
    dialect: AsciiDialect,
    codec: AsciiCodec,
}

impl AsciiWire {
    pub fn new(dialect: AsciiDialect) -> Self {
        Self {
            dialect,
            codec: AsciiCodec::new(),
        }
    }
}

impl WireProtocol for AsciiWire {
    fn name(&self) -> &'static str {
        self.dialect.name
    }

    fn poll(&self) -> Vec<u8> {
        self.dialect.poll_command().to_vec()
    }

    fn feed(&mut self, data: &[u8]) -> Vec<RadioReport> {
        self.codec.push_bytes(data);
        let mut reports = Vec::new();
        while let Some(line) = self.codec.next_line() {
            reports.extend(self.dialect.reports_for_line(&line));
        }
        reports
    }

    fn encode(&self, command: &RigCommand) -> Result<Vec<u8>, ProtocolError> {
        match command {
            RigCommand::SetFrequency(hz) => self.dialect.encode_frequency(*hz),
            RigCommand::SetMode(tag) => self.dialect.encode_mode(tag),
            RigCommand::SetPtt(on) => Ok(self.dialect.encode_ptt(*on)),
        }
    }
}

/// Icom CI-V
///
/// Only frames addressed to the controller are looked at; echoes of our own
/// commands and traffic between other stations on the bus fall through.
#[derive(Debug)]
pub struct CivWire {
    encoder: CivEncoder,
    framer: CivFramer,
}

impl CivWire {
    /// Talk to the radio at `address`
    pub fn new(address: u8) -> Self {
        Self {
            encoder: CivEncoder::new(address),
            framer: CivFramer::new(),
        }
    }
}

impl WireProtocol for CivWire {
    fn name(&self) -> &'static str {
        Protocol::IcomCiv.name()
    }

    fn poll(&self) -> Vec<u8> {
        self.encoder.poll()
    }

    fn feed(&mut self, data: &[u8]) -> Vec<RadioReport> {
        self.framer.push_bytes(data);
        let mut reports = Vec::new();
        while let Some(raw) = self.framer.next_frame() {
            let frame = match parse_frame(&raw) {
                Ok(frame) => frame,
                Err(e) => {
                    debug!("CI-V: dropping frame {:02X?}: {}", raw, e);
                    continue;
                }
            };
            if frame.to_addr != self.encoder.controller {
                trace!("CI-V: ignoring frame for {:02X}", frame.to_addr);
                continue;
            }
            match &frame.reply {
                CivReply::Ng => warn!("CI-V: radio {:02X} rejected a command", frame.from_addr),
                CivReply::Ok => trace!("CI-V: radio {:02X} acknowledged", frame.from_addr),
                reply => reports.extend(reply.reports()),
            }
        }
        reports
    }

    fn encode(&self, command: &RigCommand) -> Result<Vec<u8>, ProtocolError> {
        match command {
            RigCommand::SetFrequency(hz) => self.encoder.set_frequency(*hz),
            RigCommand::SetMode(tag) => self.encoder.set_mode(tag),
            RigCommand::SetPtt(on) => Ok(self.encoder.set_ptt(*on)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rig_protocol::icom::{cmd, frequency_to_bcd, reply_frame};

    #[test]
    fn test_yaesu_ft8_status_line() {
        let mut wire = WireKind::Yaesu.build();
        assert_eq!(wire.poll(), b"IF;TX;");
        let reports = wire.feed(b"IF001014074000+000000200000;TX0;");
        assert_eq!(
            reports,
            vec![
                RadioReport::Frequency { hz: 14_074_000 },
                RadioReport::Mode { mode: "USB" },
                RadioReport::Ptt { active: false },
            ]
        );
    }

    #[test]
    fn test_ascii_chatter_is_dropped() {
        let mut wire = WireKind::Kenwood.build();
        assert!(wire.feed(b"?;ID019;").is_empty());
        assert_eq!(
            wire.feed(b"FA00007074"),
            Vec::<RadioReport>::new()
        );
        assert_eq!(
            wire.feed(b"000;"),
            vec![RadioReport::Frequency { hz: 7_074_000 }]
        );
    }

    #[test]
    fn test_ascii_encode() {
        let wire = WireKind::Kenwood.build();
        assert_eq!(
            wire.encode(&RigCommand::SetFrequency(14_074_000)).unwrap(),
            b"FA00014074000;"
        );
        assert_eq!(wire.encode(&RigCommand::SetPtt(false)).unwrap(), b"RX;");
        assert!(wire.encode(&RigCommand::SetMode("DV".into())).is_err());
    }

    #[test]
    fn test_civ_split_mid_preamble() {
        let frame = reply_frame(0x94, cmd::READ_FREQUENCY, &frequency_to_bcd(14_074_000).unwrap());
        let mut wire = CivWire::new(0x94);

        assert!(wire.feed(&frame[..1]).is_empty());
        assert_eq!(
            wire.feed(&frame[1..]),
            vec![RadioReport::Frequency { hz: 14_074_000 }]
        );
    }

    #[test]
    fn test_civ_address_filter() {
        let mut wire = CivWire::new(0x94);
        let enc = CivEncoder::new(0x94);

        // Our own command echoed back on the bus
        assert!(wire.feed(&enc.set_frequency(7_074_000).unwrap()).is_empty());

        // A frame from another controller's conversation
        let mut other = reply_frame(0x70, cmd::FREQUENCY, &frequency_to_bcd(3_573_000).unwrap());
        other[2] = 0xE1;
        assert!(wire.feed(&other).is_empty());
    }

    #[test]
    fn test_civ_ng_and_ok_do_not_report() {
        let mut wire = CivWire::new(0x94);
        let mut data = reply_frame(0x94, cmd::NG, &[]);
        data.extend(reply_frame(0x94, cmd::OK, &[]));
        assert!(wire.feed(&data).is_empty());
    }

    #[test]
    fn test_civ_mode_carries_filter() {
        let mut wire = CivWire::new(0x94);
        let reports = wire.feed(&reply_frame(0x94, cmd::MODE, &[0x03, 0x02]));
        assert_eq!(
            reports,
            vec![
                RadioReport::Mode { mode: "CW" },
                RadioReport::FilterWidth { width: 2 },
            ]
        );
    }
}
