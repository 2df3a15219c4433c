//! Codestream marker codes.
//!
//! All markers are two bytes, the first always `0xFF`. Multi-byte fields in
//! marker segments are big-endian.

use num_enum::TryFromPrimitive;

/// Marker codes used by the volumetric codestream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u16)]
pub enum Marker {
    /// SOC: start of codestream.
    StartOfCodestream = 0xFF4F,

    /// CAP: extended capability (Part 15 signalling).
    Capability = 0xFF50,

    /// SIZ: volume and tile size.
    VolumeAndTileSize = 0xFF51,

    /// COD: coding style default.
    CodingStyleDefault = 0xFF52,

    /// CPF: corresponding profile (Part 15).
    CorrespondingProfile = 0xFF59,

    /// QCD: quantization default.
    QuantizationDefault = 0xFF5C,

    /// COM: comment segment.
    Comment = 0xFF64,

    /// SOT: start of tile-part.
    StartOfTile = 0xFF90,

    /// SOD: start of data.
    StartOfData = 0xFF93,

    /// EOC: end of codestream.
    EndOfCodestream = 0xFFD9,
}

impl Marker {
    /// Marker segments that are bare markers with no length field.
    pub fn is_delimiter(self) -> bool {
        matches!(
            self,
            Self::StartOfCodestream | Self::StartOfData | Self::EndOfCodestream
        )
    }
}

pub const MARKER_START_BYTE: u8 = 0xFF;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_from_u16() {
        assert_eq!(Marker::try_from(0xFF4Fu16), Ok(Marker::StartOfCodestream));
        assert_eq!(Marker::try_from(0xFFD9u16), Ok(Marker::EndOfCodestream));
        assert!(Marker::try_from(0xFF00u16).is_err());
    }

    #[test]
    fn test_delimiters_have_no_length() {
        assert!(Marker::StartOfCodestream.is_delimiter());
        assert!(Marker::StartOfData.is_delimiter());
        assert!(!Marker::VolumeAndTileSize.is_delimiter());
    }
}
