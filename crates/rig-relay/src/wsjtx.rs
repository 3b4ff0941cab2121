//! WSJT-X UDP message decoding
//!
//! WSJT-X (and JTDX, MSHV) announce decodes, status changes and logged QSOs
//! as UDP datagrams serialized with Qt's `QDataStream`: big-endian integers,
//! `u32` length-prefixed UTF-8 strings (`0xFFFFFFFF` = null) and a packed
//! date-time of julian day, milliseconds since midnight and a time spec.
//!
//! Every datagram starts with:
//! ```text
//! magic u32 = 0xADBCCBDA | schema u32 | type u32 | id utf8
//! ```
//! followed by the type-specific payload. Newer schema versions append
//! fields; those are decoded when present and left as `None` otherwise.

use bytes::{Buf, BufMut, BytesMut};
use serde::Serialize;

use crate::error::DecodeError;

/// Leading magic number of every datagram
pub const MAGIC: u32 = 0xADBC_CBDA;
/// Schema we announce when writing datagrams
pub const SCHEMA: u32 = 3;

/// Message type codes
pub mod kind {
    pub const HEARTBEAT: u32 = 0;
    pub const STATUS: u32 = 1;
    pub const DECODE: u32 = 2;
    pub const CLEAR: u32 = 3;
    pub const QSO_LOGGED: u32 = 5;
    pub const CLOSE: u32 = 6;
    pub const WSPR_DECODE: u32 = 10;
    pub const LOGGED_ADIF: u32 = 12;
}

const NULL_STRING: u32 = 0xFFFF_FFFF;
/// `Qt::OffsetFromUTC`: a signed offset in seconds follows
const TIMESPEC_OFFSET: u8 = 2;

/// Time of day (`QTime`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QTime {
    pub ms_since_midnight: u32,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl QTime {
    pub fn from_ms(ms: u32) -> Self {
        Self {
            ms_since_midnight: ms,
            hour: (ms / 3_600_000 % 24) as u8,
            minute: (ms / 60_000 % 60) as u8,
            second: (ms / 1_000 % 60) as u8,
        }
    }
}

/// Date and time (`QDateTime`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QDateTime {
    pub julian_day: i64,
    pub time: QTime,
    pub timespec: u8,
    /// Offset from UTC in seconds, present only for offset time specs
    pub utc_offset: Option<i32>,
}

/// Type 0: client liveness
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Heartbeat {
    pub max_schema: u32,
    pub version: Option<String>,
    pub revision: Option<String>,
}

/// Type 1: dial frequency, mode and TX/RX state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Status {
    pub dial_frequency: u64,
    pub mode: Option<String>,
    pub dx_call: Option<String>,
    pub report: Option<String>,
    pub tx_mode: Option<String>,
    pub tx_enabled: bool,
    pub transmitting: bool,
    pub decoding: bool,
    pub rx_df: u32,
    pub tx_df: u32,
    pub de_call: Option<String>,
    pub de_grid: Option<String>,
    pub dx_grid: Option<String>,
    pub tx_watchdog: bool,
    pub sub_mode: Option<String>,
    pub fast_mode: bool,
    pub special_op_mode: Option<u8>,
    pub frequency_tolerance: Option<u32>,
    pub tr_period: Option<u32>,
    pub configuration_name: Option<String>,
    pub tx_message: Option<String>,
}

/// Type 2: one decoded message
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decode {
    pub new: bool,
    pub time: QTime,
    pub snr: i32,
    pub delta_time: f64,
    pub delta_frequency: u32,
    pub mode: Option<String>,
    pub message: Option<String>,
    pub low_confidence: Option<bool>,
    pub off_air: Option<bool>,
}

/// Type 3: band activity / rx frequency window cleared
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Clear {
    pub window: Option<u8>,
}

/// Type 5: QSO logged
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QsoLogged {
    pub time_off: QDateTime,
    pub dx_call: Option<String>,
    pub dx_grid: Option<String>,
    pub tx_frequency: u64,
    pub mode: Option<String>,
    pub report_sent: Option<String>,
    pub report_received: Option<String>,
    pub tx_power: Option<String>,
    pub comments: Option<String>,
    pub name: Option<String>,
    pub time_on: QDateTime,
    pub operator_call: Option<String>,
    pub my_call: Option<String>,
    pub my_grid: Option<String>,
    pub exchange_sent: Option<String>,
    pub exchange_received: Option<String>,
    pub adif_propagation_mode: Option<String>,
}

/// Type 10: WSPR decode
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WsprDecode {
    pub new: bool,
    pub time: QTime,
    pub snr: i32,
    pub delta_time: f64,
    pub frequency: u64,
    pub drift: i32,
    pub callsign: Option<String>,
    pub grid: Option<String>,
    pub power: i32,
    pub off_air: Option<bool>,
}

/// Type 12: logged QSO as an ADIF record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoggedAdif {
    pub adif: Option<String>,
}

/// A decoded message payload
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsjtxMessage {
    Heartbeat(Heartbeat),
    Status(Status),
    Decode(Decode),
    Clear(Clear),
    QsoLogged(QsoLogged),
    Close,
    WsprDecode(WsprDecode),
    LoggedAdif(LoggedAdif),
}

impl WsjtxMessage {
    /// True for decode-carrying messages (JT/FT and WSPR)
    pub fn is_decode(&self) -> bool {
        matches!(self, WsjtxMessage::Decode(_) | WsjtxMessage::WsprDecode(_))
    }

    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            WsjtxMessage::Heartbeat(_) => "heartbeat",
            WsjtxMessage::Status(_) => "status",
            WsjtxMessage::Decode(_) => "decode",
            WsjtxMessage::Clear(_) => "clear",
            WsjtxMessage::QsoLogged(_) => "qso_logged",
            WsjtxMessage::Close => "close",
            WsjtxMessage::WsprDecode(_) => "wspr_decode",
            WsjtxMessage::LoggedAdif(_) => "logged_adif",
        }
    }
}

/// A datagram with its header
#[derive(Debug, Clone, PartialEq)]
pub struct Datagram {
    pub schema: u32,
    /// Client id (usually "WSJT-X", or the configured rig name)
    pub id: Option<String>,
    pub message: WsjtxMessage,
}

struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn need(&self, n: usize, field: &'static str) -> Result<(), DecodeError> {
        if self.buf.remaining() < n {
            return Err(DecodeError::Truncated {
                field,
                needed: n,
                remaining: self.buf.remaining(),
            });
        }
        Ok(())
    }

    fn has_more(&self) -> bool {
        self.buf.has_remaining()
    }

    fn u8(&mut self, field: &'static str) -> Result<u8, DecodeError> {
        self.need(1, field)?;
        Ok(self.buf.get_u8())
    }

    fn bool(&mut self, field: &'static str) -> Result<bool, DecodeError> {
        Ok(self.u8(field)? != 0)
    }

    fn u32(&mut self, field: &'static str) -> Result<u32, DecodeError> {
        self.need(4, field)?;
        Ok(self.buf.get_u32())
    }

    fn i32(&mut self, field: &'static str) -> Result<i32, DecodeError> {
        self.need(4, field)?;
        Ok(self.buf.get_i32())
    }

    fn u64(&mut self, field: &'static str) -> Result<u64, DecodeError> {
        self.need(8, field)?;
        Ok(self.buf.get_u64())
    }

    fn i64(&mut self, field: &'static str) -> Result<i64, DecodeError> {
        self.need(8, field)?;
        Ok(self.buf.get_i64())
    }

    fn f64(&mut self, field: &'static str) -> Result<f64, DecodeError> {
        self.need(8, field)?;
        Ok(self.buf.get_f64())
    }

    fn utf8(&mut self, field: &'static str) -> Result<Option<String>, DecodeError> {
        let len = self.u32(field)?;
        if len == NULL_STRING {
            return Ok(None);
        }
        let len = len as usize;
        self.need(len, field)?;
        let text = std::str::from_utf8(&self.buf[..len])
            .map_err(|_| DecodeError::InvalidUtf8(field))?
            .to_string();
        self.buf.advance(len);
        Ok(Some(text))
    }

    fn time(&mut self, field: &'static str) -> Result<QTime, DecodeError> {
        Ok(QTime::from_ms(self.u32(field)?))
    }

    fn datetime(&mut self, field: &'static str) -> Result<QDateTime, DecodeError> {
        let julian_day = self.i64(field)?;
        let time = self.time(field)?;
        let timespec = self.u8(field)?;
        let utc_offset = if timespec == TIMESPEC_OFFSET {
            Some(self.i32(field)?)
        } else {
            None
        };
        Ok(QDateTime {
            julian_day,
            time,
            timespec,
            utc_offset,
        })
    }

    /// Read a trailing field only if bytes remain
    fn opt<T>(
        &mut self,
        read: impl FnOnce(&mut Self) -> Result<T, DecodeError>,
    ) -> Result<Option<T>, DecodeError> {
        if self.has_more() {
            read(self).map(Some)
        } else {
            Ok(None)
        }
    }

    fn opt_utf8(&mut self, field: &'static str) -> Result<Option<String>, DecodeError> {
        Ok(self.opt(|r| r.utf8(field))?.flatten())
    }
}

/// Decode one datagram
///
/// Returns `Ok(None)` for well-formed datagrams of types the relay does not
/// handle (replies, halt-tx and other inbound-only messages).
pub fn decode_datagram(data: &[u8]) -> Result<Option<Datagram>, DecodeError> {
    let mut r = Reader { buf: data };

    let magic = r.u32("magic")?;
    if magic != MAGIC {
        return Err(DecodeError::BadMagic(magic));
    }
    let schema = r.u32("schema")?;
    let message_type = r.u32("type")?;
    let id = r.utf8("id")?;

    let message = match message_type {
        kind::HEARTBEAT => WsjtxMessage::Heartbeat(Heartbeat {
            max_schema: r.u32("max_schema")?,
            version: r.opt_utf8("version")?,
            revision: r.opt_utf8("revision")?,
        }),
        kind::STATUS => WsjtxMessage::Status(Status {
            dial_frequency: r.u64("dial_frequency")?,
            mode: r.utf8("mode")?,
            dx_call: r.utf8("dx_call")?,
            report: r.utf8("report")?,
            tx_mode: r.utf8("tx_mode")?,
            tx_enabled: r.bool("tx_enabled")?,
            transmitting: r.bool("transmitting")?,
            decoding: r.bool("decoding")?,
            rx_df: r.u32("rx_df")?,
            tx_df: r.u32("tx_df")?,
            de_call: r.utf8("de_call")?,
            de_grid: r.utf8("de_grid")?,
            dx_grid: r.utf8("dx_grid")?,
            tx_watchdog: r.bool("tx_watchdog")?,
            sub_mode: r.utf8("sub_mode")?,
            fast_mode: r.bool("fast_mode")?,
            special_op_mode: r.opt(|r| r.u8("special_op_mode"))?,
            frequency_tolerance: r.opt(|r| r.u32("frequency_tolerance"))?,
            tr_period: r.opt(|r| r.u32("tr_period"))?,
            configuration_name: r.opt_utf8("configuration_name")?,
            tx_message: r.opt_utf8("tx_message")?,
        }),
        kind::DECODE => WsjtxMessage::Decode(Decode {
            new: r.bool("new")?,
            time: r.time("time")?,
            snr: r.i32("snr")?,
            delta_time: r.f64("delta_time")?,
            delta_frequency: r.u32("delta_frequency")?,
            mode: r.utf8("mode")?,
            message: r.utf8("message")?,
            low_confidence: r.opt(|r| r.bool("low_confidence"))?,
            off_air: r.opt(|r| r.bool("off_air"))?,
        }),
        kind::CLEAR => WsjtxMessage::Clear(Clear {
            window: r.opt(|r| r.u8("window"))?,
        }),
        kind::QSO_LOGGED => WsjtxMessage::QsoLogged(QsoLogged {
            time_off: r.datetime("time_off")?,
            dx_call: r.utf8("dx_call")?,
            dx_grid: r.utf8("dx_grid")?,
            tx_frequency: r.u64("tx_frequency")?,
            mode: r.utf8("mode")?,
            report_sent: r.utf8("report_sent")?,
            report_received: r.utf8("report_received")?,
            tx_power: r.utf8("tx_power")?,
            comments: r.utf8("comments")?,
            name: r.utf8("name")?,
            time_on: r.datetime("time_on")?,
            operator_call: r.opt_utf8("operator_call")?,
            my_call: r.opt_utf8("my_call")?,
            my_grid: r.opt_utf8("my_grid")?,
            exchange_sent: r.opt_utf8("exchange_sent")?,
            exchange_received: r.opt_utf8("exchange_received")?,
            adif_propagation_mode: r.opt_utf8("adif_propagation_mode")?,
        }),
        kind::CLOSE => WsjtxMessage::Close,
        kind::WSPR_DECODE => WsjtxMessage::WsprDecode(WsprDecode {
            new: r.bool("new")?,
            time: r.time("time")?,
            snr: r.i32("snr")?,
            delta_time: r.f64("delta_time")?,
            frequency: r.u64("frequency")?,
            drift: r.i32("drift")?,
            callsign: r.utf8("callsign")?,
            grid: r.utf8("grid")?,
            power: r.i32("power")?,
            off_air: r.opt(|r| r.bool("off_air"))?,
        }),
        kind::LOGGED_ADIF => WsjtxMessage::LoggedAdif(LoggedAdif {
            adif: r.utf8("adif")?,
        }),
        _ => return Ok(None),
    };

    Ok(Some(Datagram {
        schema,
        id,
        message,
    }))
}

/// Writes datagrams in the feed's wire format
///
/// Used to replay captures and to drive the relay in tests.
pub struct DatagramWriter {
    buf: BytesMut,
}

impl DatagramWriter {
    /// Start a datagram of `message_type` from client `id`
    pub fn new(message_type: u32, id: &str) -> Self {
        let mut w = Self {
            buf: BytesMut::with_capacity(128),
        };
        w.buf.put_u32(MAGIC);
        w.buf.put_u32(SCHEMA);
        w.buf.put_u32(message_type);
        w.utf8(Some(id))
    }

    pub fn u8(mut self, v: u8) -> Self {
        self.buf.put_u8(v);
        self
    }

    pub fn bool(self, v: bool) -> Self {
        self.u8(u8::from(v))
    }

    pub fn u32(mut self, v: u32) -> Self {
        self.buf.put_u32(v);
        self
    }

    pub fn i32(mut self, v: i32) -> Self {
        self.buf.put_i32(v);
        self
    }

    pub fn u64(mut self, v: u64) -> Self {
        self.buf.put_u64(v);
        self
    }

    pub fn f64(mut self, v: f64) -> Self {
        self.buf.put_f64(v);
        self
    }

    pub fn utf8(mut self, v: Option<&str>) -> Self {
        match v {
            Some(s) => {
                self.buf.put_u32(s.len() as u32);
                self.buf.put_slice(s.as_bytes());
            }
            None => self.buf.put_u32(NULL_STRING),
        }
        self
    }

    pub fn datetime(mut self, julian_day: i64, ms: u32, utc_offset: Option<i32>) -> Self {
        self.buf.put_i64(julian_day);
        self.buf.put_u32(ms);
        match utc_offset {
            Some(offset) => {
                self.buf.put_u8(TIMESPEC_OFFSET);
                self.buf.put_i32(offset);
            }
            None => self.buf.put_u8(1),
        }
        self
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf.to_vec()
    }
}

/// A complete decode datagram, the message the relay sees most
pub fn decode_datagram_bytes(id: &str, time_ms: u32, snr: i32, df: u32, text: &str) -> Vec<u8> {
    DatagramWriter::new(kind::DECODE, id)
        .bool(true)
        .u32(time_ms)
        .i32(snr)
        .f64(0.1)
        .u32(df)
        .utf8(Some("~"))
        .utf8(Some(text))
        .bool(false)
        .bool(false)
        .finish()
}
