//! Volume encoder.
//!
//! Pipeline per tile: extract voxels, forward DWT, quantize, block-code the
//! payload. Tiles run in parallel when enabled; the codestream always
//! serialises tile bytes by linear index, so output is deterministic
//! regardless of the parallelism degree.

use rayon::prelude::*;

use crate::codestream::{
    CapInfo, CodInfo, CodestreamBuilder, CpfInfo, QcdInfo, QuantStyle, SizComponent, SizInfo,
};
use crate::dwt::{BoundaryExtension, TransformMode, WaveletFilter, WaveletTransform};
use crate::error::{J3kError, Result};
use crate::htj2k::{BlockCodec, BlockMode, Htj2kConfig};
use crate::progress::{CancelToken, NullProgress, PipelineStage, ProgressEvent, ProgressSink};
use crate::rate::{self, CompressionMode, RateController, GUARD_BITS};
use crate::tiling::{self, Tile, TileGrid, TilingConfig};
use crate::volume::{Component, Volume};

/// Bit depths above this would overflow i32 coefficients once the
/// decomposition gain is added.
const MAX_CODEC_BIT_DEPTH: u32 = 28;

/// Encoder configuration.
#[derive(Debug, Clone, Copy)]
pub struct EncoderConfig {
    pub mode: CompressionMode,
    pub tiling: TilingConfig,
    pub levels: (u8, u8, u8),
    pub progression: crate::progression::ProgressionOrder,
    pub layers: u16,
    pub parallel: bool,
    pub transform_mode: TransformMode,
    pub boundary: BoundaryExtension,
    pub htj2k: Htj2kConfig,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            mode: CompressionMode::Lossless,
            tiling: TilingConfig::new(64, 64, 64),
            levels: (2, 2, 2),
            progression: crate::progression::ProgressionOrder::Lrcps,
            layers: 1,
            parallel: true,
            transform_mode: TransformMode::Separable,
            boundary: BoundaryExtension::Symmetric,
            htj2k: Htj2kConfig::default(),
        }
    }
}

impl EncoderConfig {
    pub fn lossless() -> Self {
        Self::default()
    }

    pub fn with_mode(mut self, mode: CompressionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_tiling(mut self, tiling: TilingConfig) -> Self {
        self.tiling = tiling;
        self
    }

    pub fn with_levels(mut self, levels: (u8, u8, u8)) -> Self {
        self.levels = levels;
        self
    }

    pub fn with_layers(mut self, layers: u16) -> Self {
        self.layers = layers.max(1);
        self
    }

    fn filter(&self) -> WaveletFilter {
        if self.mode.is_lossless() {
            WaveletFilter::Reversible53
        } else {
            WaveletFilter::Irreversible97
        }
    }
}

/// The outcome of an encode call.
#[derive(Debug, Clone)]
pub struct EncodeResult {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub components: u16,
    pub is_lossless: bool,
    pub tile_count: usize,
    pub compression_ratio: f32,
}

/// Volume encoder with cooperative cancellation.
pub struct Encoder {
    config: EncoderConfig,
    cancel: CancelToken,
}

impl Encoder {
    pub fn new(config: EncoderConfig) -> Self {
        Self {
            config,
            cancel: CancelToken::new(),
        }
    }

    /// A handle that cancels this encoder from another thread.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn encode(&self, volume: &Volume) -> Result<EncodeResult> {
        self.encode_with_progress(volume, &NullProgress)
    }

    /// Encode a single-component float volume. Samples are rounded and
    /// stored as signed 16-bit.
    pub fn encode_raw(&self, samples: &[f32], w: u32, h: u32, d: u32) -> Result<EncodeResult> {
        let expected = w as usize * h as usize * d as usize;
        if samples.len() != expected || expected == 0 {
            return Err(J3kError::InvalidParameter(format!(
                "raw buffer has {} samples, dimensions need {expected}",
                samples.len()
            )));
        }
        let mut comp = Component::zeroed(0, 16, true, w, h, d)?;
        for (i, &s) in samples.iter().enumerate() {
            let v = s.round().clamp(i16::MIN as f32, i16::MAX as f32) as i64;
            comp.set_sample(i, v);
        }
        let volume = Volume::new(w, h, d, vec![comp])?;
        self.encode(&volume)
    }

    pub fn encode_with_progress(
        &self,
        volume: &Volume,
        progress: &dyn ProgressSink,
    ) -> Result<EncodeResult> {
        self.cancel.checkpoint()?;
        self.validate(volume)?;

        let grid = TileGrid::new(volume.width, volume.height, volume.depth, self.config.tiling)?;
        let tiles = grid.tiles();
        let tiles_total = tiles.len();
        log::info!(
            "encoding {}x{}x{} volume, {} component(s), {} tile(s)",
            volume.width,
            volume.height,
            volume.depth,
            volume.components.len(),
            tiles_total
        );

        let bit_depth = volume
            .components
            .iter()
            .map(|c| c.bit_depth)
            .max()
            .unwrap_or(8);
        let max_levels = self.config.levels.0.max(self.config.levels.1).max(self.config.levels.2);
        let rc = RateController::new(self.config.mode);
        // Quantize with the QCD-round-tripped step so decode agrees exactly.
        let step = rate::canonical_step(rc.step_size(bit_depth, max_levels), bit_depth);

        let codec = self.block_codec();
        let encode_tile = |(idx, tile): (usize, &Tile)| -> Result<Vec<u8>> {
            self.cancel.checkpoint()?;
            self.encode_tile(volume, tile, idx, tiles_total, step, &codec, progress)
        };

        let payloads: Vec<Result<Vec<u8>>> = if self.config.parallel {
            tiles.par_iter().enumerate().map(encode_tile).collect()
        } else {
            tiles.iter().enumerate().map(encode_tile).collect()
        };

        self.cancel.checkpoint()?;
        let mut builder = CodestreamBuilder::new();
        builder.write_header(
            &self.siz_info(volume),
            &self.cod_info(),
            &self.qcd_info(step, bit_depth, max_levels),
            self.cap_cpf(),
        )?;
        for (idx, payload) in payloads.into_iter().enumerate() {
            // A tile error is fatal; nothing partial is emitted.
            let payload = payload?;
            builder.write_tile(idx as u16, &payload)?;
        }
        progress.on_progress(&ProgressEvent {
            tile_idx: tiles_total.saturating_sub(1),
            tiles_total,
            stage: PipelineStage::Assemble,
        });
        let bytes = builder.finish()?;

        let raw = volume.raw_size().max(1);
        Ok(EncodeResult {
            compression_ratio: raw as f32 / bytes.len() as f32,
            bytes,
            width: volume.width,
            height: volume.height,
            depth: volume.depth,
            components: volume.components.len() as u16,
            is_lossless: self.config.mode.is_lossless(),
            tile_count: tiles_total,
        })
    }

    fn validate(&self, volume: &Volume) -> Result<()> {
        for comp in &volume.components {
            if comp.data.is_empty() {
                return Err(J3kError::InvalidParameter(format!(
                    "component {} has no sample data",
                    comp.index
                )));
            }
            if comp.bit_depth > MAX_CODEC_BIT_DEPTH {
                return Err(J3kError::Unsupported(format!(
                    "bit depth {} exceeds the codec limit of {MAX_CODEC_BIT_DEPTH}",
                    comp.bit_depth
                )));
            }
            if comp.sub_x != 1 || comp.sub_y != 1 || comp.sub_z != 1 {
                return Err(J3kError::Unsupported(
                    "encoding subsampled components is not supported".into(),
                ));
            }
        }
        if self.config.boundary != BoundaryExtension::Symmetric {
            log::warn!(
                "non-symmetric boundary extension is not signalled in the codestream; \
                 decoders assume symmetric"
            );
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn encode_tile(
        &self,
        volume: &Volume,
        tile: &Tile,
        tile_idx: usize,
        tiles_total: usize,
        step: f32,
        codec: &BlockCodec,
        progress: &dyn ProgressSink,
    ) -> Result<Vec<u8>> {
        let emit = |stage: PipelineStage| {
            progress.on_progress(&ProgressEvent {
                tile_idx,
                tiles_total,
                stage,
            });
        };

        emit(PipelineStage::Extract);
        let dwt = WaveletTransform::new(self.config.filter(), self.config.levels)
            .with_mode(self.config.transform_mode)
            .with_boundary(self.config.boundary);

        let voxels = tile.voxel_count();
        let mut indices = Vec::with_capacity(voxels * volume.components.len());
        for (ci, comp) in volume.components.iter().enumerate() {
            let mut samples = tiling::extract_tile_data(volume, tile, ci)?;
            if !comp.signed {
                let shift = 1i32 << (comp.bit_depth - 1);
                for s in samples.iter_mut() {
                    *s -= shift;
                }
            }

            self.cancel.checkpoint()?;
            emit(PipelineStage::Transform);
            let decomp = dwt.forward(&samples, tile.width(), tile.height(), tile.depth())?;

            self.cancel.checkpoint()?;
            emit(PipelineStage::Quantize);
            let q = match &decomp.coeffs {
                crate::dwt::CoeffBuffer::Reversible(v) => rate::quantize_i32(v, step)?,
                crate::dwt::CoeffBuffer::Irreversible(v) => rate::quantize(v, step)?,
            };
            indices.extend_from_slice(&q);
        }

        self.cancel.checkpoint()?;
        emit(PipelineStage::Pack);
        codec.encode_tile(&indices, voxels)
    }

    fn block_codec(&self) -> BlockCodec {
        let config = if self.config.mode.uses_htj2k() {
            self.config.htj2k
        } else {
            Htj2kConfig {
                mode: BlockMode::Legacy,
                ..self.config.htj2k
            }
        };
        BlockCodec::new(config)
    }

    fn siz_info(&self, volume: &Volume) -> SizInfo {
        let grid_cfg = TilingConfig::new(
            self.config.tiling.tx.min(volume.width),
            self.config.tiling.ty.min(volume.height),
            self.config.tiling.tz.min(volume.depth),
        );
        // Profile bit 0 signals the full-3D lifting schedule.
        let profile = match self.config.transform_mode {
            TransformMode::Separable => 0,
            TransformMode::Full3d => 1,
        };
        SizInfo {
            profile,
            width: volume.width,
            height: volume.height,
            depth: volume.depth,
            tile_w: grid_cfg.tx,
            tile_h: grid_cfg.ty,
            tile_d: grid_cfg.tz,
            components: volume
                .components
                .iter()
                .map(|c| SizComponent {
                    bit_depth: c.bit_depth,
                    signed: c.signed,
                    sub_x: c.sub_x as u8,
                    sub_y: c.sub_y as u8,
                    sub_z: c.sub_z as u8,
                })
                .collect(),
        }
    }

    fn cod_info(&self) -> CodInfo {
        CodInfo {
            progression: self.config.progression,
            layers: self.config.layers.max(1),
            levels_x: self.config.levels.0,
            levels_y: self.config.levels.1,
            levels_z: self.config.levels.2,
            filter: self.config.filter(),
            use_tile_parts: false,
        }
    }

    fn qcd_info(&self, step: f32, bit_depth: u32, max_levels: u8) -> QcdInfo {
        let style = if self.config.mode.is_lossless() {
            QuantStyle::None
        } else {
            QuantStyle::ScalarDerived
        };
        // One entry per 3D subband: the LLL root plus seven per level.
        let entries = 1 + 7 * max_levels as usize;
        let pair = rate::encode_step(step, bit_depth);
        QcdInfo {
            style,
            guard_bits: GUARD_BITS,
            steps: vec![pair; entries],
        }
    }

    fn cap_cpf(&self) -> Option<(CapInfo, CpfInfo)> {
        self.config.mode.uses_htj2k().then(|| {
            (
                CapInfo::htj2k(self.config.htj2k.allow_mixed_tiles),
                CpfInfo {
                    profile: 15,
                    flags: 0,
                },
            )
        })
    }
}
