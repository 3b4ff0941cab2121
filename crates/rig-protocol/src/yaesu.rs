//! Yaesu ASCII CAT dialect
//!
//! Modern Yaesu radios (FT-991, FT-991A, FTDX-101D, FTDX-10, FT-710) use a
//! Kenwood-like ASCII protocol with a few differences:
//! - Frequency uses 9 digits (1 Hz resolution): `FA014250000;`
//! - Mode command includes a receiver selector: `MD02;` (0=main, 2=USB)
//! - Mode codes include C4FM, DATA-FM and friends
//! - The `IF` status reply carries no TX flag, so PTT is read with `TX;`
//!
//! `IF` reply layout (27 characters before the terminator):
//! ```text
//! IF mmm fffffffff +oooo r x M v c ss h
//!    |   |         |     | | | | | |  `- shift
//!    |   |         |     | | | | | `---- 00
//!    |   |         |     | | | | `------ CTCSS/DCS
//!    |   |         |     | | | `-------- VFO/memory
//!    |   |         |     | | `---------- mode        [21]
//!    |   |         |     | `------------ TX clarifier
//!    |   |         |     `-------------- RX clarifier
//!    |   |         `-------------------- clarifier offset
//!    |   `------------------------------ frequency   [5..14]
//!    `---------------------------------- memory channel
//! ```

use crate::ascii::{AsciiDialect, StatusLayout, TxReply};
use crate::mode::{tags, ModeTable};

/// Yaesu ASCII frequency digit count (9 digits = 1 Hz resolution up to 999 MHz)
pub const FREQ_DIGITS: usize = 9;

/// Mode codes (`MD0x;` and `IF` position 21)
pub const MODES: ModeTable<char> = ModeTable::new(&[
    ('1', tags::LSB),
    ('2', tags::USB),
    ('3', tags::CW),
    ('4', tags::FM),
    ('5', tags::AM),
    ('6', tags::RTTY),
    ('7', tags::CW_R),
    ('8', tags::DATA_LSB),
    ('9', tags::RTTY_R),
    ('A', tags::DATA_FM),
    ('B', tags::FM_N),
    ('C', tags::DATA_USB),
    ('D', tags::AM_N),
    ('E', tags::C4FM),
]);

/// The Yaesu dialect
pub const DIALECT: AsciiDialect = AsciiDialect {
    name: "Yaesu ASCII",
    status: StatusLayout {
        frequency: 5..14,
        mode: 21,
        ptt: None,
        line_len: 27,
    },
    frequency_digits: FREQ_DIGITS,
    modes: MODES,
    mode_prefix: "MD0",
    poll: "IF;TX;",
    ptt_on: "TX1",
    ptt_off: "TX0",
    tx_reply: TxReply::DigitNonZero,
};

/// The Yaesu dialect
pub fn dialect() -> AsciiDialect {
    DIALECT
}
