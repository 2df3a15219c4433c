//! Rate control and scalar quantization.
//!
//! Step sizes derive from the compression mode and decomposition depth; the
//! codestream carries them as exponent/mantissa pairs in the QCD segment, so
//! the encoder quantizes with the QCD-round-tripped value to keep both sides
//! in exact agreement.

use crate::error::{J3kError, Result};

/// How the encoder trades size for fidelity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CompressionMode {
    /// Reversible 5/3 path, bit-exact reconstruction.
    Lossless,
    /// Lossless with the high-throughput block coder.
    LosslessHtj2k,
    /// Irreversible path targeting a PSNR in dB.
    Lossy { psnr: f32 },
    /// Irreversible path tuned so artefacts stay below visual threshold.
    VisuallyLossless,
    /// Lossy with the high-throughput block coder.
    LossyHtj2k { psnr: f32 },
    /// Aim for a given bits-per-voxel budget.
    TargetBitrate { bits_per_voxel: f32 },
}

impl CompressionMode {
    pub fn is_lossless(&self) -> bool {
        matches!(self, Self::Lossless | Self::LosslessHtj2k)
    }

    pub fn uses_htj2k(&self) -> bool {
        matches!(self, Self::LosslessHtj2k | Self::LossyHtj2k { .. })
    }

    /// Effective PSNR target for the lossy step-size curve.
    fn psnr_target(&self) -> Option<f32> {
        match self {
            Self::Lossy { psnr } | Self::LossyHtj2k { psnr } => Some(*psnr),
            Self::VisuallyLossless => Some(48.0),
            _ => None,
        }
    }
}

/// Number of guard bits signalled in QCD.
pub const GUARD_BITS: u8 = 2;

/// Mantissa resolution of a QCD step entry.
const MANTISSA_BITS: u32 = 11;

/// Derives quantization step sizes and quality-layer budgets from the mode.
#[derive(Debug, Clone, Copy)]
pub struct RateController {
    pub mode: CompressionMode,
}

impl RateController {
    pub fn new(mode: CompressionMode) -> Self {
        Self { mode }
    }

    /// Quantization step for the given bit depth and decomposition depth.
    ///
    /// Lossless modes always return exactly 1.0. Lossy steps grow with
    /// decomposition depth and shrink as the PSNR target rises; the result
    /// is always >= 1.0.
    pub fn step_size(&self, bit_depth: u32, decomp_levels: u8) -> f32 {
        if let Some(psnr) = self.mode.psnr_target() {
            let depth_gain = 1.0 + decomp_levels as f32 / 4.0;
            let s = depth_gain * 10f32.powf((50.0 - psnr) / 20.0);
            return s.max(1.0);
        }
        match self.mode {
            CompressionMode::TargetBitrate { bits_per_voxel } => {
                let bpv = bits_per_voxel.max(1.0 / 64.0);
                (bit_depth as f32 / bpv).max(1.0)
            }
            _ => 1.0,
        }
    }

    /// Cumulative bits-per-voxel targets for `layers` quality layers.
    ///
    /// The sequence is non-decreasing and its last entry is the stream's
    /// overall bits-per-voxel. A zero layer count is clamped to 1.
    pub fn layer_targets(&self, total_bits: u64, voxels: u64, layers: u16) -> Vec<f32> {
        let layers = layers.max(1) as usize;
        let final_bpv = if voxels == 0 {
            0.0
        } else {
            total_bits as f32 / voxels as f32
        };
        (1..=layers)
            .map(|l| final_bpv * l as f32 / layers as f32)
            .collect()
    }
}

/// `indices[i] = round(coeffs[i] / step)`, half away from zero.
pub fn quantize(coeffs: &[f32], step: f32) -> Result<Vec<i32>> {
    if step <= 0.0 {
        return Err(J3kError::InvalidParameter(format!(
            "quantization step must be positive, got {step}"
        )));
    }
    Ok(coeffs.iter().map(|&c| (c / step).round() as i32).collect())
}

/// Integer fast path; a unit step is the identity.
pub fn quantize_i32(coeffs: &[i32], step: f32) -> Result<Vec<i32>> {
    if step <= 0.0 {
        return Err(J3kError::InvalidParameter(format!(
            "quantization step must be positive, got {step}"
        )));
    }
    if step == 1.0 {
        return Ok(coeffs.to_vec());
    }
    Ok(coeffs
        .iter()
        .map(|&c| (c as f32 / step).round() as i32)
        .collect())
}

/// Exact multiplication by the step.
pub fn dequantize(indices: &[i32], step: f32) -> Vec<f32> {
    indices.iter().map(|&q| q as f32 * step).collect()
}

/// Encode a step size as the (exponent, mantissa) pair carried in QCD:
/// `step = 2^(bit_depth - exponent) * (1 + mantissa / 2^11)`.
pub fn encode_step(step: f32, bit_depth: u32) -> (u8, u16) {
    let step = step.max(f32::MIN_POSITIVE);
    let floor_log = step.log2().floor();
    let exponent = (bit_depth as i32 - floor_log as i32).clamp(0, 31) as u8;
    let base = 2f32.powi(bit_depth as i32 - exponent as i32);
    let mantissa = ((step / base - 1.0) * (1 << MANTISSA_BITS) as f32).round();
    let mantissa = mantissa.clamp(0.0, ((1 << MANTISSA_BITS) - 1) as f32) as u16;
    (exponent, mantissa)
}

/// Reconstruct a step size from its QCD pair.
pub fn decode_step(exponent: u8, mantissa: u16, bit_depth: u32) -> f32 {
    let base = 2f32.powi(bit_depth as i32 - exponent as i32);
    base * (1.0 + mantissa as f32 / (1 << MANTISSA_BITS) as f32)
}

/// The step value both encoder and decoder will agree on after the QCD
/// round-trip.
pub fn canonical_step(step: f32, bit_depth: u32) -> f32 {
    let (e, m) = encode_step(step, bit_depth);
    decode_step(e, m, bit_depth)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lossless_step_is_unit() {
        for mode in [CompressionMode::Lossless, CompressionMode::LosslessHtj2k] {
            let rc = RateController::new(mode);
            assert_eq!(rc.step_size(8, 0), 1.0);
            assert_eq!(rc.step_size(16, 5), 1.0);
        }
    }

    #[test]
    fn test_lossy_step_monotone_in_levels() {
        let rc = RateController::new(CompressionMode::Lossy { psnr: 40.0 });
        let mut prev = 0.0;
        for levels in 0..6 {
            let s = rc.step_size(12, levels);
            assert!(s >= 1.0);
            assert!(s >= prev, "step must grow with decomposition depth");
            prev = s;
        }
    }

    #[test]
    fn test_lossy_step_monotone_in_psnr() {
        let mut prev = f32::MAX;
        for psnr in [30.0, 36.0, 42.0, 48.0, 54.0] {
            let rc = RateController::new(CompressionMode::Lossy { psnr });
            let s = rc.step_size(12, 3);
            assert!(s <= prev, "step must shrink as the PSNR target rises");
            prev = s;
        }
    }

    #[test]
    fn test_target_bitrate_step() {
        let rc = RateController::new(CompressionMode::TargetBitrate {
            bits_per_voxel: 2.0,
        });
        assert_eq!(rc.step_size(16, 3), 8.0);
        // Generous budgets clamp to the unit step.
        let rc = RateController::new(CompressionMode::TargetBitrate {
            bits_per_voxel: 64.0,
        });
        assert_eq!(rc.step_size(8, 3), 1.0);
    }

    #[test]
    fn test_quantize_unit_step_identity() {
        let coeffs = vec![-300, -1, 0, 1, 2, 77, 30000];
        let q = quantize_i32(&coeffs, 1.0).unwrap();
        assert_eq!(q, coeffs);
        let deq = dequantize(&q, 1.0);
        let back: Vec<i32> = deq.iter().map(|&v| v as i32).collect();
        assert_eq!(back, coeffs);
    }

    #[test]
    fn test_quantize_rounds_half_away() {
        let q = quantize(&[3.0, -3.0, 2.5, -2.5], 2.0).unwrap();
        assert_eq!(q, vec![2, -2, 2, -2]);
    }

    #[test]
    fn test_quantize_rejects_bad_step() {
        assert!(quantize(&[1.0], 0.0).is_err());
        assert!(quantize_i32(&[1], -2.0).is_err());
    }

    #[test]
    fn test_layer_targets_shape() {
        let rc = RateController::new(CompressionMode::Lossless);
        let t = rc.layer_targets(8000, 1000, 4);
        assert_eq!(t.len(), 4);
        assert_eq!(*t.last().unwrap(), 8.0);
        for w in t.windows(2) {
            assert!(w[0] <= w[1]);
        }
        // Zero layers clamps to one.
        let t = rc.layer_targets(8000, 1000, 0);
        assert_eq!(t, vec![8.0]);
    }

    #[test]
    fn test_step_codec_unit_exact() {
        let (e, m) = encode_step(1.0, 8);
        assert_eq!(decode_step(e, m, 8), 1.0);
        let (e, m) = encode_step(1.0, 16);
        assert_eq!(decode_step(e, m, 16), 1.0);
    }

    #[test]
    fn test_step_codec_close_roundtrip() {
        for &step in &[1.5f32, 2.0, 3.75, 10.0, 96.5] {
            let back = canonical_step(step, 12);
            let rel = (back - step).abs() / step;
            assert!(rel < 1e-2, "step {step} came back as {back}");
        }
    }

    #[test]
    fn test_canonical_step_is_fixed_point() {
        for &step in &[1.0f32, 2.5, 7.25] {
            let c = canonical_step(step, 10);
            assert_eq!(canonical_step(c, 10), c);
        }
    }
}
