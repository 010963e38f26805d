//! Marker bytes of the codestream.
//!
//! Every marker is a `0xFF` byte followed by a non-zero type byte. All
//! markers except SOI, EOI, RSTn and TEM carry a big-endian length that
//! counts itself.

/// A codestream marker, the byte after `0xFF`.
#[derive(Eq, PartialEq, Copy, Clone)]
pub enum Marker {
    /// Start of image.
    SOI,
    /// Start of frame, `n` in `0..=15` excluding DHT/DAC positions.
    ///
    /// Carries the SOF type byte offset, so `SOF(0)` is baseline and
    /// `SOF(2)` progressive Huffman.
    SOF(u8),
    /// Define Huffman tables.
    DHT,
    /// Define arithmetic coding conditioning.
    DAC,
    /// Restart marker, `n` in `0..=7`.
    RST(u8),
    /// Define quantization tables.
    DQT,
    /// Define number of lines.
    DNL,
    /// Define restart interval.
    DRI,
    /// Define hierarchical progression.
    DHP,
    /// Expand reference components.
    EXP,
    /// Start of scan.
    SOS,
    /// End of image.
    EOI,
    /// Application segment, `n` in `0..=15`.
    APP(u8),
    /// Comment segment.
    COM,
    /// Temporary for arithmetic coding, standalone.
    TEM,
    /// JPEG extension marker with a length field; skippable.
    JPG(u8)
}

impl Marker {
    /// Map a type byte to a marker, `None` for bytes that are not markers
    /// or are reserved.
    #[must_use]
    pub fn from_u8(byte: u8) -> Option<Marker> {
        use self::Marker::{
            APP, COM, DAC, DHP, DHT, DNL, DQT, DRI, EOI, EXP, JPG, RST, SOF, SOI, SOS, TEM
        };
        match byte {
            0xc4 => Some(DHT),
            0xcc => Some(DAC),
            // SOF0..SOF15, minus the DHT/JPG/DAC positions
            n @ 0xc0..=0xcf => Some(SOF(n - 0xc0)),
            n @ 0xd0..=0xd7 => Some(RST(n - 0xd0)),
            0xd8 => Some(SOI),
            0xd9 => Some(EOI),
            0xda => Some(SOS),
            0xdb => Some(DQT),
            0xdc => Some(DNL),
            0xdd => Some(DRI),
            0xde => Some(DHP),
            0xdf => Some(EXP),
            n @ 0xe0..=0xef => Some(APP(n - 0xe0)),
            0xfe => Some(COM),
            0x01 => Some(TEM),
            // JPGn extensions and other length-prefixed reserved markers in
            // the skippable range
            n @ 0xf0..=0xfd => Some(JPG(n - 0xf0)),
            _ => None
        }
    }

    /// The wire byte of this marker.
    #[must_use]
    pub fn to_u8(self) -> u8 {
        use self::Marker::{
            APP, COM, DAC, DHP, DHT, DNL, DQT, DRI, EOI, EXP, JPG, RST, SOF, SOI, SOS, TEM
        };
        match self {
            SOF(n) => 0xc0 + n,
            DHT => 0xc4,
            DAC => 0xcc,
            RST(n) => 0xd0 + n,
            SOI => 0xd8,
            EOI => 0xd9,
            SOS => 0xda,
            DQT => 0xdb,
            DNL => 0xdc,
            DRI => 0xdd,
            DHP => 0xde,
            EXP => 0xdf,
            APP(n) => 0xe0 + n,
            COM => 0xfe,
            TEM => 0x01,
            JPG(n) => 0xf0 + n
        }
    }

    /// Markers that stand alone with no length field.
    #[must_use]
    pub fn is_standalone(self) -> bool {
        matches!(
            self,
            Marker::SOI | Marker::EOI | Marker::RST(_) | Marker::TEM
        )
    }

    /// Whether an unrecognized occurrence of this marker may be skipped by
    /// its length field.
    #[must_use]
    pub fn is_skippable(self) -> bool {
        matches!(self, Marker::APP(_) | Marker::COM | Marker::JPG(_))
    }
}

impl core::fmt::Debug for Marker {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Marker::SOF(n) => write!(f, "SOF{n}"),
            Marker::RST(n) => write!(f, "RST{n}"),
            Marker::APP(n) => write!(f, "APP{n}"),
            Marker::JPG(n) => write!(f, "JPG{n}"),
            Marker::SOI => write!(f, "SOI"),
            Marker::EOI => write!(f, "EOI"),
            Marker::SOS => write!(f, "SOS"),
            Marker::DHT => write!(f, "DHT"),
            Marker::DAC => write!(f, "DAC"),
            Marker::DQT => write!(f, "DQT"),
            Marker::DNL => write!(f, "DNL"),
            Marker::DRI => write!(f, "DRI"),
            Marker::DHP => write!(f, "DHP"),
            Marker::EXP => write!(f, "EXP"),
            Marker::COM => write!(f, "COM"),
            Marker::TEM => write!(f, "TEM")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Marker;

    #[test]
    fn round_trips_through_wire_byte() {
        for byte in 1..=0xff_u8 {
            if let Some(marker) = Marker::from_u8(byte) {
                assert_eq!(marker.to_u8(), byte);
            }
        }
    }

    #[test]
    fn table_markers_are_not_sof() {
        assert_eq!(Marker::from_u8(0xc4), Some(Marker::DHT));
        assert_eq!(Marker::from_u8(0xcc), Some(Marker::DAC));
        assert_eq!(Marker::from_u8(0xc3), Some(Marker::SOF(3)));
    }
}
