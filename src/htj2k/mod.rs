//! High-throughput (Part 15 style) block coding.
//!
//! Each tile payload starts with a one-byte mode prefix (0x00 legacy,
//! 0x01 HT), a three-byte tile-info tail, and a four-byte zero-bit-plane
//! word. Legacy mode stores raw little-endian coefficients; HT mode runs a
//! cleanup pass built from the MEL significance coder and the MagSgn value
//! coder. Adaptive selection picks HT for dense coefficient sets.

pub mod block;
pub mod magsgn;
pub mod mel;

pub use block::BlockCodec;

/// Per-tile block coding mode selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlockMode {
    /// Raw little-endian coefficient storage.
    Legacy,
    /// The high-throughput cleanup-pass scheme.
    HighThroughput,
    /// Choose per tile from the coefficient density.
    #[default]
    Adaptive,
}

/// Configuration of the high-throughput coder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Htj2kConfig {
    /// Magnitude bit budget per sample; 31 codes exactly.
    pub pass_count: u8,
    /// When false the HT path is disabled and tiles fall back to legacy.
    pub cleanup_pass_enabled: bool,
    /// Whether HT and legacy tiles may be mixed in one codestream.
    pub allow_mixed_tiles: bool,
    pub mode: BlockMode,
}

impl Default for Htj2kConfig {
    fn default() -> Self {
        Self {
            pass_count: 31,
            cleanup_pass_enabled: true,
            allow_mixed_tiles: false,
            mode: BlockMode::Adaptive,
        }
    }
}

/// Nonzero fraction above which the adaptive selector prefers HT coding.
pub const ADAPTIVE_DENSITY_THRESHOLD: f32 = 0.25;
