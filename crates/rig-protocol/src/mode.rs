//! Operating mode tags and code tables
//!
//! The bridge carries modes as upper-case string tags (`USB`, `CW-R`,
//! `DATA-USB`, ...). Each wire protocol maps its own single-character or
//! single-byte mode codes onto those tags through a [`ModeTable`].
//!
//! Setting a mode goes the other way. When the requested tag has no code in
//! the table, the tag is first rewritten through an alias table (so informal
//! names such as `FT8` or `DIGI` land on a real radio mode) and, if the radio
//! still has no matching code, reduced to its underlying sideband.

/// Common mode tags
pub mod tags {
    pub const LSB: &str = "LSB";
    pub const USB: &str = "USB";
    pub const CW: &str = "CW";
    pub const CW_R: &str = "CW-R";
    pub const AM: &str = "AM";
    pub const AM_N: &str = "AM-N";
    pub const FM: &str = "FM";
    pub const FM_N: &str = "FM-N";
    pub const WFM: &str = "WFM";
    pub const RTTY: &str = "RTTY";
    pub const RTTY_R: &str = "RTTY-R";
    pub const DATA_USB: &str = "DATA-USB";
    pub const DATA_LSB: &str = "DATA-LSB";
    pub const DATA_FM: &str = "DATA-FM";
    pub const C4FM: &str = "C4FM";
    pub const DV: &str = "DV";

    pub const ALL: &[&str] = &[
        LSB, USB, CW, CW_R, AM, AM_N, FM, FM_N, WFM, RTTY, RTTY_R, DATA_USB, DATA_LSB, DATA_FM,
        C4FM, DV,
    ];
}

/// Informal or backend-specific tags and the radio mode they stand for
const ALIASES: &[(&str, &str)] = &[
    ("FT8", tags::DATA_USB),
    ("FT4", tags::DATA_USB),
    ("JS8", tags::DATA_USB),
    ("JT65", tags::DATA_USB),
    ("JT9", tags::DATA_USB),
    ("WSPR", tags::DATA_USB),
    ("PSK", tags::DATA_USB),
    ("PSK31", tags::DATA_USB),
    ("OLIVIA", tags::DATA_USB),
    ("DIGI", tags::DATA_USB),
    ("DIG", tags::DATA_USB),
    ("DIGU", tags::DATA_USB),
    ("DATA", tags::DATA_USB),
    ("DATA-U", tags::DATA_USB),
    ("USB-D", tags::DATA_USB),
    ("PKTUSB", tags::DATA_USB),
    ("DIGL", tags::DATA_LSB),
    ("DATA-L", tags::DATA_LSB),
    ("LSB-D", tags::DATA_LSB),
    ("PKTLSB", tags::DATA_LSB),
    ("PKTFM", tags::DATA_FM),
    ("SSB", tags::USB),
    ("CWR", tags::CW_R),
    ("CW-L", tags::CW_R),
    ("CW-U", tags::CW),
    ("FSK", tags::RTTY),
    ("RTTYR", tags::RTTY_R),
    ("FSK-R", tags::RTTY_R),
    ("AMN", tags::AM_N),
    ("FMN", tags::FM_N),
];

/// Look up the radio mode an informal tag stands for
pub fn alias(tag: &str) -> Option<&'static str> {
    ALIASES
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(tag))
        .map(|(_, target)| *target)
}

/// Canonical tag for a known tag or alias, `None` for anything else
pub fn canonical(name: &str) -> Option<&'static str> {
    let name = name.trim();
    tags::ALL
        .iter()
        .copied()
        .find(|t| t.eq_ignore_ascii_case(name))
        .or_else(|| alias(name))
}

/// Reduce a data/narrow variant to the base mode every radio has
pub fn base_mode(tag: &str) -> Option<&'static str> {
    match tag {
        tags::DATA_USB => Some(tags::USB),
        tags::DATA_LSB => Some(tags::LSB),
        tags::DATA_FM | tags::FM_N | tags::C4FM => Some(tags::FM),
        tags::AM_N => Some(tags::AM),
        tags::RTTY_R => Some(tags::RTTY),
        _ => None,
    }
}

/// Bidirectional mapping between protocol mode codes and tags
#[derive(Debug, Clone, Copy)]
pub struct ModeTable<C: 'static> {
    entries: &'static [(C, &'static str)],
}

impl<C: Copy + PartialEq> ModeTable<C> {
    /// Wrap a static code table
    pub const fn new(entries: &'static [(C, &'static str)]) -> Self {
        Self { entries }
    }

    /// Resolve a protocol code to its tag
    pub fn tag(&self, code: C) -> Option<&'static str> {
        self.entries
            .iter()
            .find(|(c, _)| *c == code)
            .map(|(_, tag)| *tag)
    }

    fn exact(&self, tag: &str) -> Option<C> {
        self.entries
            .iter()
            .find(|(_, t)| t.eq_ignore_ascii_case(tag))
            .map(|(c, _)| *c)
    }

    /// Resolve a tag to a protocol code, falling back through the alias table
    /// and then to the base mode
    pub fn code(&self, tag: &str) -> Option<C> {
        let tag = tag.trim();
        if let Some(code) = self.exact(tag) {
            return Some(code);
        }
        let aliased = alias(tag);
        if let Some(code) = aliased.and_then(|a| self.exact(a)) {
            return Some(code);
        }
        let canonical = aliased.unwrap_or(tag).to_ascii_uppercase();
        base_mode(&canonical).and_then(|b| self.exact(b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: ModeTable<char> = ModeTable::new(&[
        ('1', tags::LSB),
        ('2', tags::USB),
        ('3', tags::CW),
        ('C', tags::DATA_USB),
    ]);

    const NO_DATA: ModeTable<char> = ModeTable::new(&[('1', tags::LSB), ('2', tags::USB)]);

    #[test]
    fn test_tag_lookup() {
        assert_eq!(TABLE.tag('2'), Some("USB"));
        assert_eq!(TABLE.tag('Z'), None);
    }

    #[test]
    fn test_code_exact_is_case_insensitive() {
        assert_eq!(TABLE.code("usb"), Some('2'));
        assert_eq!(TABLE.code(" CW "), Some('3'));
    }

    #[test]
    fn test_code_via_alias() {
        assert_eq!(TABLE.code("FT8"), Some('C'));
        assert_eq!(TABLE.code("digi"), Some('C'));
        assert_eq!(TABLE.code("SSB"), Some('2'));
    }

    #[test]
    fn test_code_falls_back_to_base_mode() {
        assert_eq!(NO_DATA.code("FT8"), Some('2'));
        assert_eq!(NO_DATA.code("DATA-LSB"), Some('1'));
        assert_eq!(NO_DATA.code("CW"), None);
    }

    #[test]
    fn test_canonical() {
        assert_eq!(canonical(" usb "), Some(tags::USB));
        assert_eq!(canonical("pktusb"), Some(tags::DATA_USB));
        assert_eq!(canonical("DV"), Some(tags::DV));
        assert_eq!(canonical("?"), None);
        assert_eq!(canonical("#ERR"), None);
        assert_eq!(canonical("2400"), None);
        assert_eq!(canonical(""), None);
    }
}
