//! Kenwood ASCII CAT dialect
//!
//! Kenwood radios (TS-480, TS-590, TS-2000 and the many rigs that copy them)
//! use semicolon-terminated ASCII commands with an 11-digit frequency field.
//!
//! The `IF` reply carries frequency, TX flag and mode in one line of 37
//! characters: frequency at `[2..13]`, TX/RX at `[28]`, mode at `[29]`.

use crate::ascii::{AsciiDialect, StatusLayout, TxReply};
use crate::mode::{tags, ModeTable};

/// Kenwood frequency digit count
pub const FREQ_DIGITS: usize = 11;

/// Mode codes (`MDx;` and `IF` position 29)
pub const MODES: ModeTable<char> = ModeTable::new(&[
    ('1', tags::LSB),
    ('2', tags::USB),
    ('3', tags::CW),
    ('4', tags::FM),
    ('5', tags::AM),
    ('6', tags::RTTY),
    ('7', tags::CW_R),
    ('9', tags::RTTY_R),
]);

/// The Kenwood dialect
pub const DIALECT: AsciiDialect = AsciiDialect {
    name: "Kenwood",
    status: StatusLayout {
        frequency: 2..13,
        mode: 29,
        ptt: Some(28),
        line_len: 37,
    },
    frequency_digits: FREQ_DIGITS,
    modes: MODES,
    mode_prefix: "MD",
    poll: "IF;",
    ptt_on: "TX",
    ptt_off: "RX",
    tx_reply: TxReply::AlwaysTransmit,
};

/// The Kenwood dialect
pub fn dialect() -> AsciiDialect {
    DIALECT
}

#[cfg(test)]
mod tests {
    use super::dialect;
    use crate::ascii::AsciiReply;
    use crate::RadioReport;

    #[test]
    fn test_parse_status() {
        let d = dialect();
        let reply = d
            .parse_line("IF00014074000     +000000000020000000")
            .unwrap();
        assert_eq!(
            reply,
            AsciiReply::Status {
                frequency_hz: 14_074_000,
                mode: Some("USB"),
                ptt: Some(false),
            }
        );
    }

    #[test]
    fn test_parse_transmitting_status() {
        let d = dialect();
        let reports = d.reports_for_line("IF00007030000     +000000000130000000");
        assert_eq!(
            reports,
            vec![
                RadioReport::Frequency { hz: 7_030_000 },
                RadioReport::Mode { mode: "CW" },
                RadioReport::Ptt { active: true },
            ]
        );
    }

    #[test]
    fn test_standalone_replies() {
        let d = dialect();
        assert_eq!(
            d.parse_line("FA00014250000").unwrap(),
            AsciiReply::Frequency(14_250_000)
        );
        assert_eq!(d.parse_line("MD1").unwrap(), AsciiReply::Mode(Some("LSB")));
        assert_eq!(d.parse_line("MD8").unwrap(), AsciiReply::Mode(None));
        assert_eq!(d.parse_line("TX0").unwrap(), AsciiReply::Ptt(true));
        assert_eq!(d.parse_line("RX").unwrap(), AsciiReply::Ptt(false));
    }

    #[test]
    fn test_query_echo_is_other() {
        let d = dialect();
        assert!(matches!(d.parse_line("FA").unwrap(), AsciiReply::Other(_)));
        assert!(matches!(d.parse_line("IF").unwrap(), AsciiReply::Other(_)));
    }

    #[test]
    fn test_encode_commands() {
        let d = dialect();
        assert_eq!(d.encode_frequency(14_250_000).unwrap(), b"FA00014250000;");
        assert_eq!(d.encode_mode("CW-R").unwrap(), b"MD7;");
        // No data modes on this table: FT8 lands on USB
        assert_eq!(d.encode_mode("FT8").unwrap(), b"MD2;");
        assert_eq!(d.encode_ptt(true), b"TX;");
        assert_eq!(d.encode_ptt(false), b"RX;");
    }
}
