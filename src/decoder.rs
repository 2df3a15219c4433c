//! Volume decoder with optional region-of-interest selection.
//!
//! The pipeline reverses the encoder: parse markers, block-decode each tile
//! payload, dequantize, inverse DWT, and reassemble components. With a ROI
//! set, tiles disjoint from the clamped region are skipped entirely and the
//! result is a sub-volume of the clamped region's dimensions.

use crate::codestream::{CodestreamParser, ParsedCodestream};
use crate::dwt::{
    BoundaryExtension, CoeffBuffer, Decomposition, TransformMode, WaveletFilter, WaveletTransform,
};
use crate::error::{J3kError, Result};
use crate::htj2k::BlockCodec;
use crate::progress::CancelToken;
use crate::tiling::{self, Tile};
use crate::volume::{Component, Region, Volume};

/// Decoder configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct DecoderConfig {
    /// Continue past malformed tiles, zero-filling their voxels.
    pub tolerant: bool,
}

/// The outcome of a decode call.
#[derive(Debug)]
pub struct DecodeResult {
    pub volume: Volume,
    /// The region of volume space the output covers.
    pub decoded_region: Region,
    pub tiles_decoded: usize,
    pub tiles_total: usize,
    pub tiles_skipped: usize,
    pub is_partial: bool,
    pub warnings: Vec<String>,
}

/// Volume decoder with cooperative cancellation.
pub struct Decoder {
    config: DecoderConfig,
    cancel: CancelToken,
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new(DecoderConfig::default())
    }
}

impl Decoder {
    pub fn new(config: DecoderConfig) -> Self {
        Self {
            config,
            cancel: CancelToken::new(),
        }
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Decode the full volume.
    pub fn decode(&self, bytes: &[u8]) -> Result<DecodeResult> {
        self.decode_inner(bytes, None)
    }

    /// Decode only the tiles intersecting `region`, returning a sub-volume
    /// of the clamped region's dimensions.
    pub fn decode_region(&self, bytes: &[u8], region: Region) -> Result<DecodeResult> {
        self.decode_inner(bytes, Some(region))
    }

    fn decode_inner(&self, bytes: &[u8], roi: Option<Region>) -> Result<DecodeResult> {
        self.cancel.checkpoint()?;
        let parsed = CodestreamParser::new(bytes)
            .with_tolerance(self.config.tolerant)
            .parse()?;
        let grid = parsed.tile_grid()?;
        let (vw, vh, vd) = (parsed.siz.width, parsed.siz.height, parsed.siz.depth);

        let mut warnings = parsed.warnings.clone();
        let mut is_partial = parsed.is_partial;

        // Clamp the ROI and warn when the request reached outside the volume.
        let target = match roi {
            Some(r) => {
                let clamped = r.clamp(vw, vh, vd);
                if clamped != r {
                    warnings.push(format!(
                        "requested region extends outside the {vw}x{vh}x{vd} volume; clamped"
                    ));
                }
                if clamped.is_empty() {
                    warnings.push("requested region does not intersect the volume".into());
                }
                clamped
            }
            None => Region::new(0, vw, 0, vh, 0, vd),
        };

        let mut volume = self.blank_output(&parsed, &target)?;
        let tiles_total = grid.tile_count();
        let mut tiles_decoded = 0usize;
        let mut tiles_skipped = 0usize;

        for entry in &parsed.tiles {
            self.cancel.checkpoint()?;
            let tile = match grid.tile_at(entry.index) {
                Some(t) => t,
                None => {
                    let msg = format!("tile index {} outside the grid", entry.index);
                    if self.config.tolerant {
                        warnings.push(msg);
                        is_partial = true;
                        continue;
                    }
                    return Err(J3kError::Corrupted(msg));
                }
            };
            if target.is_empty() || !tile.region.intersects(&target) {
                tiles_skipped += 1;
                continue;
            }

            let payload = &bytes[entry.offset..entry.offset + entry.length];
            match self.decode_tile(&parsed, payload, &tile) {
                Ok(comps) => {
                    for (ci, samples) in comps.into_iter().enumerate() {
                        copy_into_output(&mut volume, &target, &tile, ci, &samples);
                    }
                    tiles_decoded += 1;
                }
                Err(e) => {
                    if self.config.tolerant {
                        log::warn!("tile {} failed to decode: {e}", entry.index);
                        warnings.push(format!("tile {} failed to decode: {e}", entry.index));
                        is_partial = true;
                    } else {
                        return Err(e);
                    }
                }
            }
        }

        if roi.is_some() && tiles_decoded == 0 && warnings.is_empty() {
            warnings.push("no tiles intersect the requested region".into());
        }

        Ok(DecodeResult {
            volume,
            decoded_region: target,
            tiles_decoded,
            tiles_total,
            tiles_skipped,
            is_partial,
            warnings,
        })
    }

    /// Zero-filled output volume covering `target`.
    fn blank_output(&self, parsed: &ParsedCodestream, target: &Region) -> Result<Volume> {
        // An empty intersection still yields a well-formed (minimal) volume.
        let (w, h, d) = if target.is_empty() {
            (1, 1, 1)
        } else {
            (target.width(), target.height(), target.depth())
        };
        let components = parsed
            .siz
            .components
            .iter()
            .enumerate()
            .map(|(i, c)| Component::zeroed(i as u16, c.bit_depth, c.signed, w, h, d))
            .collect::<Result<Vec<_>>>()?;
        Volume::new(w, h, d, components)
    }

    /// Reverse one tile payload into per-component voxel buffers.
    fn decode_tile(
        &self,
        parsed: &ParsedCodestream,
        payload: &[u8],
        tile: &Tile,
    ) -> Result<Vec<Vec<i32>>> {
        let indices = tile_indices(parsed, payload, tile)?;
        let mut out = Vec::with_capacity(indices.len());
        for (ci, comp_indices) in indices.iter().enumerate() {
            let decomp = tile_decomposition(parsed, tile, comp_indices, 0);
            let dwt = WaveletTransform::new(decomp.filter, (0, 0, 0)).with_mode(decomp.mode);
            let samples = dwt.inverse(&decomp)?;
            out.push(restore_sample_range(parsed, ci, samples));
        }
        Ok(out)
    }
}

/// Block-decode a tile payload into per-component quantized indices.
pub(crate) fn tile_indices(
    parsed: &ParsedCodestream,
    payload: &[u8],
    tile: &Tile,
) -> Result<Vec<Vec<i32>>> {
    let comp_count = parsed.siz.components.len();
    let voxels = tile.voxel_count();
    let values = BlockCodec::default().decode_tile(payload, voxels)?;
    if values.len() != comp_count * voxels {
        return Err(J3kError::Corrupted(format!(
            "tile holds {} coefficient sections, SIZ declares {comp_count} components",
            values.len() / voxels.max(1)
        )));
    }
    Ok((0..comp_count)
        .map(|ci| {
            values[ci * voxels..(ci + 1) * voxels]
                .iter()
                .map(|&v| v as i32)
                .collect()
        })
        .collect())
}

/// Build the coefficient decomposition a tile component was encoded with.
///
/// `index_shift` coarsens the quantized indices (used by quality-progressive
/// previews); zero reproduces the stream exactly.
pub(crate) fn tile_decomposition(
    parsed: &ParsedCodestream,
    tile: &Tile,
    indices: &[i32],
    index_shift: u8,
) -> Decomposition {
    let bit_depth = parsed
        .siz
        .components
        .iter()
        .map(|c| c.bit_depth)
        .max()
        .unwrap_or(8);
    let step = parsed.qcd.step_size(bit_depth);
    let filter = parsed.cod.filter;
    let mode = if parsed.siz.profile & 0x01 != 0 {
        TransformMode::Full3d
    } else {
        TransformMode::Separable
    };
    let (tw, th, td) = (tile.width(), tile.height(), tile.depth());
    let levels = (
        if tw <= 1 { 0 } else { parsed.cod.levels_x },
        if th <= 1 { 0 } else { parsed.cod.levels_y },
        if td <= 1 { 0 } else { parsed.cod.levels_z },
    );
    let shifted: Vec<i32> = if index_shift == 0 {
        indices.to_vec()
    } else {
        indices
            .iter()
            .map(|&q| (q >> index_shift) << index_shift)
            .collect()
    };
    let coeffs = match filter {
        // The reversible path always runs at unit step, so the indices are
        // the integer coefficients themselves.
        WaveletFilter::Reversible53 => CoeffBuffer::Reversible(shifted),
        WaveletFilter::Irreversible97 => {
            CoeffBuffer::Irreversible(shifted.iter().map(|&q| q as f32 * step).collect())
        }
    };
    Decomposition {
        coeffs,
        orig_w: tw,
        orig_h: th,
        orig_d: td,
        levels_x: levels.0,
        levels_y: levels.1,
        levels_z: levels.2,
        filter,
        mode,
        boundary: BoundaryExtension::Symmetric,
    }
}

/// Undo the level shift and clamp samples into the component's range.
pub(crate) fn restore_sample_range(
    parsed: &ParsedCodestream,
    component: usize,
    mut samples: Vec<i32>,
) -> Vec<i32> {
    let siz_comp = &parsed.siz.components[component];
    let depth = siz_comp.bit_depth;
    let (lo, hi) = if siz_comp.signed {
        (-(1i64 << (depth - 1)), (1i64 << (depth - 1)) - 1)
    } else {
        (0, (1i64 << depth) - 1)
    };
    let shift = if siz_comp.signed {
        0
    } else {
        1i32 << (depth - 1)
    };
    for s in samples.iter_mut() {
        let v = (*s + shift) as i64;
        *s = v.clamp(lo, hi) as i32;
    }
    samples
}

/// Copy a decoded tile buffer into the output volume, which covers `target`.
fn copy_into_output(
    volume: &mut Volume,
    target: &Region,
    tile: &Tile,
    component: usize,
    samples: &[i32],
) {
    if target.is_empty() {
        return;
    }
    // Full-volume fast path: the tile maps 1:1 into the output.
    if target.x0 == 0
        && target.y0 == 0
        && target.z0 == 0
        && target.width() == volume.width
        && target.height() == volume.height
        && target.depth() == volume.depth
        && tiling::insert_tile_data(volume, tile, component, samples).is_ok()
    {
        return;
    }
    let Some(inter) = tile.region.intersect(target) else {
        return;
    };
    let comp = &mut volume.components[component];
    let (ow, oh) = (comp.width as usize, comp.height as usize);
    let tw = tile.width() as usize;
    let th = tile.height() as usize;
    let r = &tile.region;
    for z in inter.z0..inter.z1 {
        for y in inter.y0..inter.y1 {
            for x in inter.x0..inter.x1 {
                let src = ((z - r.z0) as usize * th + (y - r.y0) as usize) * tw
                    + (x - r.x0) as usize;
                let dst = ((z - target.z0) as usize * oh + (y - target.y0) as usize) * ow
                    + (x - target.x0) as usize;
                comp.set_sample(dst, samples[src] as i64);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::{Encoder, EncoderConfig};
    use crate::rate::CompressionMode;
    use crate::tiling::TilingConfig;
    use crate::volume::Volume;

    fn gradient_volume(w: u32, h: u32, d: u32) -> Volume {
        let mut data = Vec::with_capacity((w * h * d) as usize);
        for z in 0..d {
            for y in 0..h {
                for x in 0..w {
                    data.push(((x + 2 * y + 3 * z) % 256) as u8);
                }
            }
        }
        Volume::monochrome(w, h, d, data).unwrap()
    }

    fn encode(vol: &Volume, cfg: EncoderConfig) -> Vec<u8> {
        Encoder::new(cfg).encode(vol).unwrap().bytes
    }

    #[test]
    fn test_lossless_roundtrip_single_tile() {
        // 4x4x2 gradient, one tile, levels (1,1,1).
        let vol = gradient_volume(4, 4, 2);
        let bytes = encode(&vol, EncoderConfig::default().with_levels((1, 1, 1)));
        let result = Decoder::default().decode(&bytes).unwrap();
        assert_eq!(result.tiles_total, 1);
        assert_eq!(result.tiles_decoded, 1);
        assert!(!result.is_partial);
        assert!(result.warnings.is_empty());
        assert_eq!(result.volume.components[0].data, vol.components[0].data);
    }

    #[test]
    fn test_lossless_roundtrip_multi_tile() {
        let vol = gradient_volume(16, 16, 8);
        let bytes = encode(
            &vol,
            EncoderConfig::default()
                .with_tiling(TilingConfig::new(8, 8, 4))
                .with_levels((1, 1, 1)),
        );
        let result = Decoder::default().decode(&bytes).unwrap();
        assert_eq!(result.tiles_total, 8);
        assert_eq!(result.tiles_decoded, 8);
        let decoded = &result.volume.components[0];
        let original = &vol.components[0];
        for &(x, y, z) in &[(0, 0, 0), (15, 0, 0), (0, 15, 0), (0, 0, 7), (15, 15, 7)] {
            assert_eq!(
                decoded.sample_at(x, y, z),
                original.sample_at(x, y, z),
                "voxel ({x},{y},{z})"
            );
        }
        assert_eq!(decoded.data, original.data);
    }

    #[test]
    fn test_roundtrip_16bit() {
        let mut comp = Component::zeroed(0, 16, false, 8, 8, 4).unwrap();
        for i in 0..(8 * 8 * 4) {
            comp.set_sample(i, ((i * 523) % 65536) as i64);
        }
        let vol = Volume::new(8, 8, 4, vec![comp]).unwrap();
        let bytes = encode(&vol, EncoderConfig::default().with_levels((2, 2, 1)));
        let result = Decoder::default().decode(&bytes).unwrap();
        assert_eq!(result.volume.components[0].data, vol.components[0].data);
    }

    #[test]
    fn test_roundtrip_htj2k_lossless() {
        let vol = gradient_volume(8, 8, 4);
        let bytes = encode(
            &vol,
            EncoderConfig::default()
                .with_mode(CompressionMode::LosslessHtj2k)
                .with_levels((1, 1, 1)),
        );
        let result = Decoder::default().decode(&bytes).unwrap();
        assert_eq!(result.volume.components[0].data, vol.components[0].data);
    }

    #[test]
    fn test_roi_decode_sub_volume() {
        let vol = gradient_volume(16, 16, 8);
        let bytes = encode(
            &vol,
            EncoderConfig::default()
                .with_tiling(TilingConfig::new(8, 8, 4))
                .with_levels((1, 1, 1)),
        );
        let roi = Region::from_size(0, 0, 0, 8, 8, 4);
        let result = Decoder::default().decode_region(&bytes, roi).unwrap();
        assert_eq!(result.decoded_region, roi);
        assert_eq!(result.volume.width, 8);
        assert_eq!(result.volume.height, 8);
        assert_eq!(result.volume.depth, 4);
        assert_eq!(result.tiles_decoded, 1);
        assert!(result.tiles_skipped >= 7);
        let decoded = &result.volume.components[0];
        let original = &vol.components[0];
        for z in 0..4 {
            for y in 0..8 {
                for x in 0..8 {
                    assert_eq!(decoded.sample_at(x, y, z), original.sample_at(x, y, z));
                }
            }
        }
    }

    #[test]
    fn test_roi_clamped_with_warning() {
        let vol = gradient_volume(8, 8, 4);
        let bytes = encode(&vol, EncoderConfig::default().with_levels((1, 1, 1)));
        let roi = Region::from_size(4, 4, 2, 100, 100, 100);
        let result = Decoder::default().decode_region(&bytes, roi).unwrap();
        assert_eq!(result.decoded_region, Region::new(4, 8, 4, 8, 2, 4));
        assert!(!result.warnings.is_empty());
    }

    #[test]
    fn test_roi_disjoint_yields_no_tiles() {
        let vol = gradient_volume(8, 8, 4);
        let bytes = encode(&vol, EncoderConfig::default().with_levels((1, 1, 1)));
        let roi = Region::from_size(100, 100, 100, 4, 4, 4);
        let result = Decoder::default().decode_region(&bytes, roi).unwrap();
        assert_eq!(result.tiles_decoded, 0);
        assert!(!result.warnings.is_empty());
    }

    #[test]
    fn test_lossy_roundtrip_tolerance() {
        let vol = gradient_volume(16, 16, 8);
        let bytes = encode(
            &vol,
            EncoderConfig::default()
                .with_mode(CompressionMode::Lossy { psnr: 46.0 })
                .with_levels((2, 2, 2)),
        );
        let result = Decoder::default().decode(&bytes).unwrap();
        let decoded = &result.volume.components[0];
        let original = &vol.components[0];
        let mut max_err = 0i64;
        for i in 0..(16 * 16 * 8) {
            max_err = max_err.max((decoded.sample(i) - original.sample(i)).abs());
        }
        assert!(max_err <= 24, "max error {max_err} too large for lossy mode");
    }

    #[test]
    fn test_truncated_stream_strict() {
        let vol = gradient_volume(4, 4, 2);
        let mut bytes = encode(&vol, EncoderConfig::default().with_levels((1, 1, 1)));
        bytes.truncate(bytes.len() / 2);
        assert!(Decoder::default().decode(&bytes).is_err());
    }

    #[test]
    fn test_cancel_surfaces() {
        let vol = gradient_volume(4, 4, 2);
        let bytes = encode(&vol, EncoderConfig::default().with_levels((1, 1, 1)));
        let dec = Decoder::default();
        dec.cancel();
        assert!(matches!(dec.decode(&bytes), Err(J3kError::Cancelled)));
    }

    #[test]
    fn test_full3d_roundtrip_via_profile_bit() {
        let vol = gradient_volume(8, 8, 4);
        let mut cfg = EncoderConfig::default().with_levels((1, 1, 1));
        cfg.transform_mode = crate::dwt::TransformMode::Full3d;
        let bytes = encode(&vol, cfg);
        let result = Decoder::default().decode(&bytes).unwrap();
        assert_eq!(result.volume.components[0].data, vol.components[0].data);
    }
}
