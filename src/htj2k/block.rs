//! Tile-level block coding.

use byteorder::{BigEndian, ByteOrder, LittleEndian};

use super::magsgn::{MagSgnDecoder, MagSgnEncoder};
use super::mel::{MelDecoder, MelEncoder};
use super::{BlockMode, Htj2kConfig, ADAPTIVE_DENSITY_THRESHOLD};
use crate::error::{J3kError, Result};

/// Tile payload mode prefixes.
pub const MODE_LEGACY: u8 = 0x00;
pub const MODE_HT: u8 = 0x01;

/// Bytes before the coefficient body: mode, 3-byte tail, 4-byte ZBP word.
pub const PAYLOAD_PREFIX_LEN: usize = 8;

/// Tile-info tail flag: cleanup pass enabled.
const FLAG_CLEANUP: u8 = 0x01;

/// Encodes and decodes tile coefficient payloads.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlockCodec {
    pub config: Htj2kConfig,
}

impl BlockCodec {
    pub fn new(config: Htj2kConfig) -> Self {
        Self { config }
    }

    /// The mode a tile with this coefficient density will use.
    pub fn select_mode(&self, coeffs: &[i32]) -> u8 {
        if !self.config.cleanup_pass_enabled {
            return MODE_LEGACY;
        }
        match self.config.mode {
            BlockMode::Legacy => MODE_LEGACY,
            BlockMode::HighThroughput => MODE_HT,
            BlockMode::Adaptive => {
                if coeffs.is_empty() {
                    return MODE_LEGACY;
                }
                let nonzero = coeffs.iter().filter(|&&c| c != 0).count();
                let density = nonzero as f32 / coeffs.len() as f32;
                if density > ADAPTIVE_DENSITY_THRESHOLD {
                    MODE_HT
                } else {
                    MODE_LEGACY
                }
            }
        }
    }

    /// Encode a tile's quantized coefficients.
    ///
    /// `coeffs` holds every component's buffer back to back, each of
    /// `voxel_count` entries. Output layout: mode byte, tile-info tail,
    /// zero-bit-plane word, then one body section per component.
    pub fn encode_tile(&self, coeffs: &[i32], voxel_count: usize) -> Result<Vec<u8>> {
        if voxel_count == 0 || coeffs.is_empty() {
            return Err(J3kError::InvalidParameter(
                "cannot encode an empty tile".into(),
            ));
        }
        if coeffs.len() % voxel_count != 0 {
            return Err(J3kError::InvalidParameter(format!(
                "{} coefficients do not divide into {voxel_count}-voxel components",
                coeffs.len()
            )));
        }
        let mode = self.select_mode(coeffs);

        let mut out = Vec::with_capacity(PAYLOAD_PREFIX_LEN + coeffs.len());
        out.push(mode);
        out.push(self.config.pass_count);
        out.push(if self.config.cleanup_pass_enabled {
            FLAG_CLEANUP
        } else {
            0
        });
        out.push(0); // reserved

        // Zero-bit-plane word: leading zero planes of the widest magnitude.
        let max_mag = coeffs.iter().map(|c| c.unsigned_abs()).max().unwrap_or(0);
        let zbp = if max_mag == 0 {
            31
        } else {
            max_mag.leading_zeros().saturating_sub(1)
        };
        let mut word = [0u8; 4];
        BigEndian::write_u32(&mut word, zbp);
        out.extend_from_slice(&word);

        for comp in coeffs.chunks(voxel_count) {
            match mode {
                MODE_HT => self.encode_ht_section(comp, &mut out),
                _ => Self::encode_legacy_section(comp, &mut out),
            }
        }
        Ok(out)
    }

    fn encode_legacy_section(comp: &[i32], out: &mut Vec<u8>) {
        let mut len = [0u8; 4];
        LittleEndian::write_u32(&mut len, comp.len() as u32);
        out.extend_from_slice(&len);
        for &c in comp {
            let mut b = [0u8; 4];
            LittleEndian::write_i32(&mut b, c);
            out.extend_from_slice(&b);
        }
    }

    fn encode_ht_section(&self, comp: &[i32], out: &mut Vec<u8>) {
        let mut mel = MelEncoder::new();
        let mut magsgn = MagSgnEncoder::new();
        for &c in comp {
            let significant = c != 0;
            mel.encode(significant);
            if significant {
                magsgn.encode(c, self.config.pass_count);
            }
        }
        let mel_bytes = mel.finish();
        let magsgn_bytes = magsgn.finish();

        let mut word = [0u8; 4];
        LittleEndian::write_u32(&mut word, comp.len() as u32);
        out.extend_from_slice(&word);
        LittleEndian::write_u32(&mut word, mel_bytes.len() as u32);
        out.extend_from_slice(&word);
        out.extend_from_slice(&mel_bytes);
        LittleEndian::write_u32(&mut word, magsgn_bytes.len() as u32);
        out.extend_from_slice(&word);
        out.extend_from_slice(&magsgn_bytes);
    }

    /// Decode a tile payload back to quantized coefficient values.
    ///
    /// Returns every component's coefficients concatenated; each section
    /// must hold exactly `expected_voxels` entries.
    pub fn decode_tile(&self, bytes: &[u8], expected_voxels: usize) -> Result<Vec<f32>> {
        if bytes.len() < PAYLOAD_PREFIX_LEN {
            return Err(J3kError::Truncated(format!(
                "tile payload is {} bytes, prefix needs {PAYLOAD_PREFIX_LEN}",
                bytes.len()
            )));
        }
        let mode = bytes[0];
        if mode != MODE_LEGACY && mode != MODE_HT {
            return Err(J3kError::Corrupted(format!(
                "unknown tile coding mode {mode:#04X}"
            )));
        }
        let pass_count = bytes[1];
        let _flags = bytes[2];
        let _zbp = BigEndian::read_u32(&bytes[4..8]);

        let mut out = Vec::new();
        let mut pos = PAYLOAD_PREFIX_LEN;
        while pos < bytes.len() {
            let count = Self::read_section_u32(bytes, &mut pos)? as usize;
            if count != expected_voxels {
                return Err(J3kError::Corrupted(format!(
                    "component section holds {count} coefficients, tile needs {expected_voxels}"
                )));
            }
            match mode {
                MODE_HT => Self::decode_ht_section(bytes, &mut pos, count, pass_count, &mut out)?,
                _ => Self::decode_legacy_section(bytes, &mut pos, count, &mut out)?,
            }
        }
        if out.is_empty() {
            return Err(J3kError::Corrupted("tile payload has no sections".into()));
        }
        Ok(out)
    }

    fn read_section_u32(bytes: &[u8], pos: &mut usize) -> Result<u32> {
        if *pos + 4 > bytes.len() {
            return Err(J3kError::Truncated(
                "tile section header cut short".into(),
            ));
        }
        let v = LittleEndian::read_u32(&bytes[*pos..*pos + 4]);
        *pos += 4;
        Ok(v)
    }

    fn decode_legacy_section(
        bytes: &[u8],
        pos: &mut usize,
        count: usize,
        out: &mut Vec<f32>,
    ) -> Result<()> {
        let need = count * 4;
        if *pos + need > bytes.len() {
            return Err(J3kError::Truncated(format!(
                "legacy section needs {need} bytes, {} remain",
                bytes.len() - *pos
            )));
        }
        for i in 0..count {
            out.push(LittleEndian::read_i32(&bytes[*pos + 4 * i..]) as f32);
        }
        *pos += need;
        Ok(())
    }

    fn decode_ht_section(
        bytes: &[u8],
        pos: &mut usize,
        count: usize,
        pass_count: u8,
        out: &mut Vec<f32>,
    ) -> Result<()> {
        let mel_len = Self::read_section_u32(bytes, pos)? as usize;
        if *pos + mel_len > bytes.len() {
            return Err(J3kError::Truncated("MEL segment cut short".into()));
        }
        let mel_bytes = &bytes[*pos..*pos + mel_len];
        *pos += mel_len;
        let magsgn_len = Self::read_section_u32(bytes, pos)? as usize;
        if *pos + magsgn_len > bytes.len() {
            return Err(J3kError::Truncated("MagSgn segment cut short".into()));
        }
        let magsgn_bytes = &bytes[*pos..*pos + magsgn_len];
        *pos += magsgn_len;

        let mut mel = MelDecoder::new(mel_bytes);
        let mut magsgn = MagSgnDecoder::new(magsgn_bytes);
        for _ in 0..count {
            if mel.decode() {
                let v = magsgn.decode(pass_count).ok_or_else(|| {
                    J3kError::Corrupted("MagSgn stream shorter than significance map".into())
                })?;
                out.push(v as f32);
            } else {
                out.push(0.0);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec(mode: BlockMode) -> BlockCodec {
        BlockCodec::new(Htj2kConfig {
            mode,
            ..Htj2kConfig::default()
        })
    }

    #[test]
    fn test_legacy_roundtrip() {
        let coeffs = vec![0, 1, -2, 300, -40000, 0, 7, 0];
        let c = codec(BlockMode::Legacy);
        let bytes = c.encode_tile(&coeffs, coeffs.len()).unwrap();
        assert_eq!(bytes[0], MODE_LEGACY);
        let back = c.decode_tile(&bytes, coeffs.len()).unwrap();
        let back_i: Vec<i32> = back.iter().map(|&v| v as i32).collect();
        assert_eq!(back_i, coeffs);
    }

    #[test]
    fn test_ht_roundtrip() {
        let coeffs = vec![5, -3, 0, 12, 255, -1, 1, 0, 99, -1024];
        let c = codec(BlockMode::HighThroughput);
        let bytes = c.encode_tile(&coeffs, coeffs.len()).unwrap();
        assert_eq!(bytes[0], MODE_HT);
        let back = c.decode_tile(&bytes, coeffs.len()).unwrap();
        let back_i: Vec<i32> = back.iter().map(|&v| v as i32).collect();
        assert_eq!(back_i, coeffs);
    }

    #[test]
    fn test_multi_component_roundtrip() {
        let comp_a = vec![1, 2, 3, 4];
        let comp_b = vec![-4, -3, -2, -1];
        let coeffs: Vec<i32> = comp_a.iter().chain(&comp_b).copied().collect();
        let c = codec(BlockMode::HighThroughput);
        let bytes = c.encode_tile(&coeffs, 4).unwrap();
        let back = c.decode_tile(&bytes, 4).unwrap();
        assert_eq!(back.len(), 8);
        let back_i: Vec<i32> = back.iter().map(|&v| v as i32).collect();
        assert_eq!(back_i, coeffs);
    }

    #[test]
    fn test_adaptive_selects_by_density() {
        let c = codec(BlockMode::Adaptive);
        let dense = vec![7; 100];
        assert_eq!(c.select_mode(&dense), MODE_HT);
        let mut sparse = vec![0; 100];
        sparse[0] = 9;
        assert_eq!(c.select_mode(&sparse), MODE_LEGACY);
    }

    #[test]
    fn test_cleanup_disabled_forces_legacy() {
        let c = BlockCodec::new(Htj2kConfig {
            cleanup_pass_enabled: false,
            mode: BlockMode::HighThroughput,
            ..Htj2kConfig::default()
        });
        assert_eq!(c.select_mode(&[1, 2, 3]), MODE_LEGACY);
    }

    #[test]
    fn test_truncated_prefix_is_fatal() {
        let c = BlockCodec::default();
        assert!(matches!(
            c.decode_tile(&[0x01, 0x00, 0x00], 4),
            Err(J3kError::Truncated(_))
        ));
    }

    #[test]
    fn test_unknown_mode_rejected() {
        let c = BlockCodec::default();
        let bytes = vec![0x7F, 0, 0, 0, 0, 0, 0, 0];
        assert!(matches!(
            c.decode_tile(&bytes, 1),
            Err(J3kError::Corrupted(_))
        ));
    }

    #[test]
    fn test_wrong_section_count_rejected() {
        let c = codec(BlockMode::Legacy);
        let bytes = c.encode_tile(&[1, 2, 3, 4], 4).unwrap();
        assert!(matches!(
            c.decode_tile(&bytes, 8),
            Err(J3kError::Corrupted(_))
        ));
    }
}
