//! 3D separable discrete wavelet transform.
//!
//! Two kernels are provided: the reversible 5/3 integer lifting transform
//! (lossless) and the irreversible 9/7 floating transform. The 3D transform
//! runs as three 1D passes per level (X, then Y, then Z); only the LLL
//! subband is recursed. Level counts are independent per axis.

pub mod full3d;
pub mod lifting;
pub mod separable;

pub use lifting::BoundaryExtension;

use crate::error::{J3kError, Result};

/// Wavelet kernel selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaveletFilter {
    /// Reversible 5/3 integer lifting; exact round-trip.
    #[default]
    Reversible53,
    /// Irreversible 9/7 floating lifting.
    Irreversible97,
}

/// How the 3D lifting network is scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransformMode {
    /// Three independent 1D passes per level. Normative.
    #[default]
    Separable,
    /// One interleaved lifting pass per level using 3D neighbourhoods.
    Full3d,
}

/// Coefficient storage for a decomposition.
#[derive(Debug, Clone)]
pub enum CoeffBuffer {
    Reversible(Vec<i32>),
    Irreversible(Vec<f32>),
}

impl CoeffBuffer {
    pub fn len(&self) -> usize {
        match self {
            Self::Reversible(v) => v.len(),
            Self::Irreversible(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Coefficients widened to f32 (exact for magnitudes below 2^24).
    pub fn to_f32(&self) -> Vec<f32> {
        match self {
            Self::Reversible(v) => v.iter().map(|&c| c as f32).collect(),
            Self::Irreversible(v) => v.clone(),
        }
    }

    /// Coefficients rounded to i32.
    pub fn to_i32(&self) -> Vec<i32> {
        match self {
            Self::Reversible(v) => v.clone(),
            Self::Irreversible(v) => v.iter().map(|&c| c.round() as i32).collect(),
        }
    }
}

/// A multi-level 3D decomposition of one tile component.
#[derive(Debug, Clone)]
pub struct Decomposition {
    pub coeffs: CoeffBuffer,
    pub orig_w: u32,
    pub orig_h: u32,
    pub orig_d: u32,
    /// Effective per-axis level counts (after extent-1 suppression).
    pub levels_x: u8,
    pub levels_y: u8,
    pub levels_z: u8,
    pub filter: WaveletFilter,
    pub mode: TransformMode,
    pub boundary: BoundaryExtension,
}

impl Decomposition {
    /// The deepest level count across axes.
    pub fn level_count(&self) -> u8 {
        self.levels_x.max(self.levels_y).max(self.levels_z)
    }
}

/// Dimensions and active axes for one decomposition level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LevelStep {
    pub cw: usize,
    pub ch: usize,
    pub cd: usize,
    pub do_x: bool,
    pub do_y: bool,
    pub do_z: bool,
}

/// Deterministic level plan shared by forward, inverse, and partial
/// reconstruction. An axis participates at a level while the configured
/// count allows it and the current extent exceeds 1.
pub(crate) fn level_plan(
    w: usize,
    h: usize,
    d: usize,
    levels: (u8, u8, u8),
) -> Vec<LevelStep> {
    let max_levels = levels.0.max(levels.1).max(levels.2);
    let (mut cw, mut ch, mut cd) = (w, h, d);
    let mut steps = Vec::new();
    for level in 0..max_levels {
        let do_x = level < levels.0 && cw > 1;
        let do_y = level < levels.1 && ch > 1;
        let do_z = level < levels.2 && cd > 1;
        if !(do_x || do_y || do_z) {
            break;
        }
        steps.push(LevelStep {
            cw,
            ch,
            cd,
            do_x,
            do_y,
            do_z,
        });
        if do_x {
            cw = cw.div_ceil(2);
        }
        if do_y {
            ch = ch.div_ceil(2);
        }
        if do_z {
            cd = cd.div_ceil(2);
        }
    }
    steps
}

/// Configured 3D wavelet transform.
#[derive(Debug, Clone, Copy)]
pub struct WaveletTransform {
    pub filter: WaveletFilter,
    pub mode: TransformMode,
    pub boundary: BoundaryExtension,
    pub levels: (u8, u8, u8),
}

impl WaveletTransform {
    pub fn new(filter: WaveletFilter, levels: (u8, u8, u8)) -> Self {
        Self {
            filter,
            mode: TransformMode::Separable,
            boundary: BoundaryExtension::Symmetric,
            levels,
        }
    }

    pub fn with_mode(mut self, mode: TransformMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_boundary(mut self, boundary: BoundaryExtension) -> Self {
        self.boundary = boundary;
        self
    }

    fn validate(&self, len: usize, w: u32, h: u32, d: u32) -> Result<()> {
        if w == 0 || h == 0 || d == 0 {
            return Err(J3kError::InvalidParameter(format!(
                "transform dimensions {w}x{h}x{d} must be nonzero"
            )));
        }
        let expected = w as usize * h as usize * d as usize;
        if len == 0 || len != expected {
            return Err(J3kError::InvalidParameter(format!(
                "transform buffer has {len} samples, dimensions need {expected}"
            )));
        }
        Ok(())
    }

    /// Per-axis level counts with extent-1 axes suppressed.
    fn effective_levels(&self, w: u32, h: u32, d: u32) -> (u8, u8, u8) {
        (
            if w <= 1 { 0 } else { self.levels.0 },
            if h <= 1 { 0 } else { self.levels.1 },
            if d <= 1 { 0 } else { self.levels.2 },
        )
    }

    /// Forward transform of integer samples.
    ///
    /// For the 9/7 kernel samples are widened to f32 first.
    pub fn forward(&self, data: &[i32], w: u32, h: u32, d: u32) -> Result<Decomposition> {
        self.validate(data.len(), w, h, d)?;
        let levels = self.effective_levels(w, h, d);
        let dims = (w as usize, h as usize, d as usize);
        let coeffs = match self.filter {
            WaveletFilter::Reversible53 => {
                let mut buf = data.to_vec();
                match self.mode {
                    TransformMode::Separable => {
                        separable::forward_53(&mut buf, dims, levels, self.boundary)
                    }
                    TransformMode::Full3d => {
                        full3d::forward_53(&mut buf, dims, levels, self.boundary)
                    }
                }
                CoeffBuffer::Reversible(buf)
            }
            WaveletFilter::Irreversible97 => {
                let mut buf: Vec<f32> = data.iter().map(|&v| v as f32).collect();
                match self.mode {
                    TransformMode::Separable => {
                        separable::forward_97(&mut buf, dims, levels, self.boundary)
                    }
                    TransformMode::Full3d => {
                        full3d::forward_97(&mut buf, dims, levels, self.boundary)
                    }
                }
                CoeffBuffer::Irreversible(buf)
            }
        };
        Ok(Decomposition {
            coeffs,
            orig_w: w,
            orig_h: h,
            orig_d: d,
            levels_x: levels.0,
            levels_y: levels.1,
            levels_z: levels.2,
            filter: self.filter,
            mode: self.mode,
            boundary: self.boundary,
        })
    }

    /// Forward transform of float samples with the irreversible kernel.
    pub fn forward_f32(&self, data: &[f32], w: u32, h: u32, d: u32) -> Result<Decomposition> {
        self.validate(data.len(), w, h, d)?;
        let levels = self.effective_levels(w, h, d);
        let dims = (w as usize, h as usize, d as usize);
        let mut buf = data.to_vec();
        match self.mode {
            TransformMode::Separable => separable::forward_97(&mut buf, dims, levels, self.boundary),
            TransformMode::Full3d => full3d::forward_97(&mut buf, dims, levels, self.boundary),
        }
        Ok(Decomposition {
            coeffs: CoeffBuffer::Irreversible(buf),
            orig_w: w,
            orig_h: h,
            orig_d: d,
            levels_x: levels.0,
            levels_y: levels.1,
            levels_z: levels.2,
            filter: WaveletFilter::Irreversible97,
            mode: self.mode,
            boundary: self.boundary,
        })
    }

    /// Inverse transform back to integer samples.
    ///
    /// Reversible coefficients invert exactly; irreversible output is
    /// rounded to the nearest integer.
    pub fn inverse(&self, decomp: &Decomposition) -> Result<Vec<i32>> {
        Ok(Self::inverse_full(decomp)?.0)
    }

    /// Inverse transform keeping float precision.
    pub fn inverse_f32(&self, decomp: &Decomposition) -> Result<Vec<f32>> {
        match &decomp.coeffs {
            CoeffBuffer::Irreversible(v) => {
                let dims = (
                    decomp.orig_w as usize,
                    decomp.orig_h as usize,
                    decomp.orig_d as usize,
                );
                let levels = (decomp.levels_x, decomp.levels_y, decomp.levels_z);
                let mut buf = v.clone();
                match decomp.mode {
                    TransformMode::Separable => {
                        separable::inverse_97(&mut buf, dims, levels, decomp.boundary)
                    }
                    TransformMode::Full3d => {
                        full3d::inverse_97(&mut buf, dims, levels, decomp.boundary)
                    }
                }
                Ok(buf)
            }
            CoeffBuffer::Reversible(_) => Ok(Self::inverse_full(decomp)?
                .0
                .into_iter()
                .map(|v| v as f32)
                .collect()),
        }
    }

    fn inverse_full(decomp: &Decomposition) -> Result<(Vec<i32>, (usize, usize, usize))> {
        let dims = (
            decomp.orig_w as usize,
            decomp.orig_h as usize,
            decomp.orig_d as usize,
        );
        if decomp.coeffs.len() != dims.0 * dims.1 * dims.2 {
            return Err(J3kError::InvalidParameter(format!(
                "decomposition buffer has {} coefficients, dimensions need {}",
                decomp.coeffs.len(),
                dims.0 * dims.1 * dims.2
            )));
        }
        let levels = (decomp.levels_x, decomp.levels_y, decomp.levels_z);
        match &decomp.coeffs {
            CoeffBuffer::Reversible(v) => {
                let mut buf = v.clone();
                match decomp.mode {
                    TransformMode::Separable => {
                        separable::inverse_53(&mut buf, dims, levels, decomp.boundary)
                    }
                    TransformMode::Full3d => {
                        full3d::inverse_53(&mut buf, dims, levels, decomp.boundary)
                    }
                }
                Ok((buf, dims))
            }
            CoeffBuffer::Irreversible(v) => {
                let mut buf = v.clone();
                match decomp.mode {
                    TransformMode::Separable => {
                        separable::inverse_97(&mut buf, dims, levels, decomp.boundary)
                    }
                    TransformMode::Full3d => {
                        full3d::inverse_97(&mut buf, dims, levels, decomp.boundary)
                    }
                }
                Ok((buf.iter().map(|&c| c.round() as i32).collect(), dims))
            }
        }
    }

    /// Partially invert a decomposition, undoing only the deepest `undo`
    /// levels, and return the low-pass corner with its dimensions.
    ///
    /// `undo == level_count()` yields the full reconstruction.
    pub fn reconstruct_at(
        decomp: &Decomposition,
        undo: u8,
    ) -> Result<(Vec<i32>, u32, u32, u32)> {
        let dims = (
            decomp.orig_w as usize,
            decomp.orig_h as usize,
            decomp.orig_d as usize,
        );
        let levels = (decomp.levels_x, decomp.levels_y, decomp.levels_z);
        let plan = level_plan(dims.0, dims.1, dims.2, levels);
        let undo = (undo as usize).min(plan.len());
        let keep = plan.len() - undo;

        let buf: Vec<i32> = match &decomp.coeffs {
            CoeffBuffer::Reversible(v) => {
                let mut buf = v.clone();
                match decomp.mode {
                    TransformMode::Separable => {
                        separable::inverse_53_partial(&mut buf, dims, levels, decomp.boundary, keep)
                    }
                    TransformMode::Full3d => {
                        full3d::inverse_53_partial(&mut buf, dims, levels, decomp.boundary, keep)
                    }
                }
                buf
            }
            CoeffBuffer::Irreversible(v) => {
                let mut buf = v.clone();
                match decomp.mode {
                    TransformMode::Separable => {
                        separable::inverse_97_partial(&mut buf, dims, levels, decomp.boundary, keep)
                    }
                    TransformMode::Full3d => {
                        full3d::inverse_97_partial(&mut buf, dims, levels, decomp.boundary, keep)
                    }
                }
                buf.iter().map(|&c| c.round() as i32).collect()
            }
        };

        // The low corner after undoing down to `keep` levels has the
        // dimensions that level would have seen going forward.
        let (cw, ch, cd) = if keep == 0 {
            dims
        } else {
            let s = plan[keep - 1];
            (
                if s.do_x { s.cw.div_ceil(2) } else { s.cw },
                if s.do_y { s.ch.div_ceil(2) } else { s.ch },
                if s.do_z { s.cd.div_ceil(2) } else { s.cd },
            )
        };
        let (w, _h, _d) = dims;
        let mut out = Vec::with_capacity(cw * ch * cd);
        for z in 0..cd {
            for y in 0..ch {
                let base = (z * dims.1 + y) * w;
                out.extend_from_slice(&buf[base..base + cw]);
            }
        }
        Ok((out, cw as u32, ch as u32, cd as u32))
    }
}
