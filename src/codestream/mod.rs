//! Codestream syntax: marker segments, builder, and parser.
//!
//! Layout (all multi-byte integers big-endian): SOC, SIZ, COD, QCD, the
//! Part 15 CAP/CPF pair when high-throughput tiles are present, one
//! SOT/SOD + payload per tile in linear index order, then EOC. The first
//! payload byte of each tile flags its block-coding mode (0x01 = HT).

pub mod builder;
pub mod io;
pub mod parser;

pub use builder::CodestreamBuilder;
pub use parser::CodestreamParser;

use crate::dwt::WaveletFilter;
use crate::error::{J3kError, Result};
use crate::progression::ProgressionOrder;
use crate::rate;
use crate::tiling::{TileGrid, TilingConfig};

/// Filter selector values carried in COD.
pub const FILTER_IRREVERSIBLE_97: u8 = 0;
pub const FILTER_REVERSIBLE_53: u8 = 1;

/// Part 15 capability bit inside Pcap.
pub const PCAP_HTJ2K_BIT: u32 = 1 << 14;
/// Ccap15 bit signalling that HT and legacy tiles may be mixed.
pub const CCAP15_MIXED_TILES_BIT: u16 = 1 << 1;

/// Per-component fields of the SIZ segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizComponent {
    pub bit_depth: u32,
    pub signed: bool,
    pub sub_x: u8,
    pub sub_y: u8,
    pub sub_z: u8,
}

/// Volume and tile geometry (SIZ).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizInfo {
    pub profile: u16,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub tile_w: u32,
    pub tile_h: u32,
    pub tile_d: u32,
    pub components: Vec<SizComponent>,
}

impl SizInfo {
    pub fn tile_grid(&self) -> Result<TileGrid> {
        TileGrid::new(
            self.width,
            self.height,
            self.depth,
            TilingConfig::new(self.tile_w, self.tile_h, self.tile_d),
        )
    }
}

/// Coding style defaults (COD).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodInfo {
    pub progression: ProgressionOrder,
    pub layers: u16,
    pub levels_x: u8,
    pub levels_y: u8,
    pub levels_z: u8,
    pub filter: WaveletFilter,
    pub use_tile_parts: bool,
}

impl CodInfo {
    pub fn filter_selector(&self) -> u8 {
        match self.filter {
            WaveletFilter::Irreversible97 => FILTER_IRREVERSIBLE_97,
            WaveletFilter::Reversible53 => FILTER_REVERSIBLE_53,
        }
    }

    pub fn filter_from_selector(v: u8) -> Result<WaveletFilter> {
        match v {
            FILTER_IRREVERSIBLE_97 => Ok(WaveletFilter::Irreversible97),
            FILTER_REVERSIBLE_53 => Ok(WaveletFilter::Reversible53),
            _ => Err(J3kError::Parse(format!("unknown filter selector {v}"))),
        }
    }

    pub fn levels(&self) -> (u8, u8, u8) {
        (self.levels_x, self.levels_y, self.levels_z)
    }
}

/// Quantization style values carried in QCD.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum QuantStyle {
    /// No quantization (reversible path).
    None = 0,
    /// One step entry, derived per subband.
    ScalarDerived = 1,
    /// One step entry per subband.
    ScalarExpounded = 2,
}

impl QuantStyle {
    pub fn from_u8(v: u8) -> Result<Self> {
        match v {
            0 => Ok(Self::None),
            1 => Ok(Self::ScalarDerived),
            2 => Ok(Self::ScalarExpounded),
            _ => Err(J3kError::Parse(format!("unknown quantization style {v}"))),
        }
    }
}

/// Quantization defaults (QCD).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QcdInfo {
    pub style: QuantStyle,
    pub guard_bits: u8,
    /// (exponent, mantissa) per subband entry.
    pub steps: Vec<(u8, u16)>,
}

impl QcdInfo {
    /// The step size the decoder applies, reconstructed from entry 0.
    pub fn step_size(&self, bit_depth: u32) -> f32 {
        match self.style {
            QuantStyle::None => 1.0,
            _ => self
                .steps
                .first()
                .map(|&(e, m)| rate::decode_step(e, m, bit_depth))
                .unwrap_or(1.0),
        }
    }
}

/// Part 15 capability (CAP).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapInfo {
    pub pcap: u32,
    pub ccap15: u16,
}

impl CapInfo {
    pub fn htj2k(allow_mixed_tiles: bool) -> Self {
        Self {
            pcap: PCAP_HTJ2K_BIT,
            ccap15: if allow_mixed_tiles {
                CCAP15_MIXED_TILES_BIT
            } else {
                0
            },
        }
    }

    pub fn signals_htj2k(&self) -> bool {
        self.pcap & PCAP_HTJ2K_BIT != 0
    }

    pub fn allows_mixed_tiles(&self) -> bool {
        self.ccap15 & CCAP15_MIXED_TILES_BIT != 0
    }
}

/// Part 15 profile constraints (CPF).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CpfInfo {
    pub profile: u16,
    pub flags: u16,
}

/// One tile-part recorded while parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileEntry {
    pub index: usize,
    /// Payload offset from the start of the codestream (first byte after SOD).
    pub offset: usize,
    /// Payload length in bytes.
    pub length: usize,
    /// First payload byte is the HT prefix.
    pub is_ht: bool,
}

/// The structured result of parsing a codestream.
#[derive(Debug, Clone)]
pub struct ParsedCodestream {
    pub siz: SizInfo,
    pub cod: CodInfo,
    pub qcd: QcdInfo,
    pub cap: Option<CapInfo>,
    pub cpf: Option<CpfInfo>,
    pub tiles: Vec<TileEntry>,
    pub is_partial: bool,
    pub warnings: Vec<String>,
}

impl ParsedCodestream {
    pub fn tile_grid(&self) -> Result<TileGrid> {
        self.siz.tile_grid()
    }

    /// True iff any tile payload carries the HT prefix.
    pub fn contains_htj2k_tiles(&self) -> bool {
        self.tiles.iter().any(|t| t.is_ht)
    }

    /// True iff both HT and legacy tiles are present.
    pub fn is_hybrid_htj2k(&self) -> bool {
        self.contains_htj2k_tiles() && self.tiles.iter().any(|t| !t.is_ht)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_selector_roundtrip() {
        for filter in [WaveletFilter::Reversible53, WaveletFilter::Irreversible97] {
            let cod = CodInfo {
                progression: ProgressionOrder::Lrcps,
                layers: 1,
                levels_x: 1,
                levels_y: 1,
                levels_z: 1,
                filter,
                use_tile_parts: false,
            };
            assert_eq!(
                CodInfo::filter_from_selector(cod.filter_selector()).unwrap(),
                filter
            );
        }
        assert!(CodInfo::filter_from_selector(7).is_err());
    }

    #[test]
    fn test_cap_bits() {
        let cap = CapInfo::htj2k(true);
        assert!(cap.signals_htj2k());
        assert!(cap.allows_mixed_tiles());
        let cap = CapInfo::htj2k(false);
        assert!(!cap.allows_mixed_tiles());
    }

    #[test]
    fn test_qcd_lossless_step() {
        let qcd = QcdInfo {
            style: QuantStyle::None,
            guard_bits: 2,
            steps: vec![(8, 0)],
        };
        assert_eq!(qcd.step_size(8), 1.0);
    }
}
