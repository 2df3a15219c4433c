//! Progressive decoding: stepwise yields by resolution, quality, or slice.

use crate::codestream::{CodestreamParser, ParsedCodestream};
use crate::decoder::{self, Decoder, DecoderConfig};
use crate::dwt::{level_plan, WaveletTransform};
use crate::error::{J3kError, Result};
use crate::progress::CancelToken;
use crate::tiling::Tile;
use crate::volume::{Component, Volume};

/// What each progressive step refines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressiveMode {
    /// Intermediate reconstructions at increasing resolution, finest last.
    Resolution,
    /// One yield per quality layer, highest layer last.
    Quality,
    /// Yield every `batch` slices along Z, in order.
    Slice { batch: u32 },
}

/// One emission of the progressive decoder.
#[derive(Debug)]
pub struct ProgressiveStep {
    pub volume: Volume,
    /// Strictly increasing, ends at 1.0.
    pub progress: f64,
    pub step: usize,
    pub is_final: bool,
}

/// Stepwise decoder. The callback returns `false` to cancel further
/// emission; `reset` clears state so a new sequence can start.
pub struct ProgressiveDecoder {
    mode: ProgressiveMode,
    tolerant: bool,
    cancel: CancelToken,
    steps_emitted: usize,
}

impl ProgressiveDecoder {
    pub fn new(mode: ProgressiveMode) -> Self {
        Self {
            mode,
            tolerant: false,
            cancel: CancelToken::new(),
            steps_emitted: 0,
        }
    }

    pub fn with_tolerance(mut self, tolerant: bool) -> Self {
        self.tolerant = tolerant;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Clear internal state so a fresh sequence can start.
    pub fn reset(&mut self) {
        self.steps_emitted = 0;
        self.cancel.reset();
    }

    /// Number of steps emitted by the last `decode_with` run.
    pub fn steps_emitted(&self) -> usize {
        self.steps_emitted
    }

    /// Decode, invoking `callback` for each progressive step in order.
    pub fn decode_with<F>(&mut self, bytes: &[u8], mut callback: F) -> Result<()>
    where
        F: FnMut(&ProgressiveStep) -> bool,
    {
        self.steps_emitted = 0;
        match self.mode {
            ProgressiveMode::Resolution => self.run_resolution(bytes, &mut callback),
            ProgressiveMode::Quality => self.run_quality(bytes, &mut callback),
            ProgressiveMode::Slice { batch } => self.run_slices(bytes, batch, &mut callback),
        }
    }

    fn emit<F>(&mut self, callback: &mut F, step: ProgressiveStep) -> Result<bool>
    where
        F: FnMut(&ProgressiveStep) -> bool,
    {
        self.cancel.checkpoint()?;
        self.steps_emitted += 1;
        Ok(callback(&step))
    }

    fn run_resolution<F>(&mut self, bytes: &[u8], callback: &mut F) -> Result<()>
    where
        F: FnMut(&ProgressiveStep) -> bool,
    {
        let parsed = self.parse(bytes)?;
        let grid = parsed.tile_grid()?;
        let tiles = grid.tiles();
        let decomps = self.collect_decompositions(&parsed, bytes, &tiles)?;

        let volume_plan = level_plan(
            parsed.siz.width as usize,
            parsed.siz.height as usize,
            parsed.siz.depth as usize,
            (parsed.cod.levels_x, parsed.cod.levels_y, parsed.cod.levels_z),
        );
        let total_levels = volume_plan.len();
        let steps = total_levels + 1;

        for undo in 0..=total_levels {
            self.cancel.checkpoint()?;
            let keep = total_levels - undo;
            let (vw, vh, vd) = if keep == 0 {
                (
                    parsed.siz.width as usize,
                    parsed.siz.height as usize,
                    parsed.siz.depth as usize,
                )
            } else {
                let s = volume_plan[keep - 1];
                (
                    if s.do_x { s.cw.div_ceil(2) } else { s.cw },
                    if s.do_y { s.ch.div_ceil(2) } else { s.ch },
                    if s.do_z { s.cd.div_ceil(2) } else { s.cd },
                )
            };

            let mut volume = blank_volume(&parsed, vw as u32, vh as u32, vd as u32)?;
            for (tile, tile_decomps) in tiles.iter().zip(&decomps) {
                let Some(tile_decomps) = tile_decomps else {
                    continue;
                };
                for (ci, decomp) in tile_decomps.iter().enumerate() {
                    let tile_levels = decomp.level_count() as usize;
                    let tile_undo = tile_levels.saturating_sub(keep.min(tile_levels));
                    let (samples, tw, th, _td) =
                        WaveletTransform::reconstruct_at(decomp, tile_undo as u8)?;
                    let samples = decoder::restore_sample_range(&parsed, ci, samples);
                    // Tiles land at their region origin scaled to this level.
                    let ox = (tile.region.x0 >> keep) as usize;
                    let oy = (tile.region.y0 >> keep) as usize;
                    let oz = (tile.region.z0 >> keep) as usize;
                    blit(
                        &mut volume.components[ci],
                        &samples,
                        tw as usize,
                        th as usize,
                        (ox, oy, oz),
                    );
                }
            }

            let done = undo == total_levels;
            let keep_going = self.emit(
                callback,
                ProgressiveStep {
                    volume,
                    progress: (undo + 1) as f64 / steps as f64,
                    step: undo,
                    is_final: done,
                },
            )?;
            if !keep_going {
                return Ok(());
            }
        }
        Ok(())
    }

    fn run_quality<F>(&mut self, bytes: &[u8], callback: &mut F) -> Result<()>
    where
        F: FnMut(&ProgressiveStep) -> bool,
    {
        let parsed = self.parse(bytes)?;
        let grid = parsed.tile_grid()?;
        let tiles = grid.tiles();
        let layers = parsed.cod.layers.max(1);

        // Indices are decoded once; each layer coarsens them less.
        let mut tile_indices: Vec<Option<Vec<Vec<i32>>>> = vec![None; tiles.len()];
        for entry in &parsed.tiles {
            let Some(tile) = grid.tile_at(entry.index) else {
                continue;
            };
            let payload = &bytes[entry.offset..entry.offset + entry.length];
            tile_indices[entry.index] = Some(decoder::tile_indices(&parsed, payload, &tile)?);
        }

        for layer in 0..layers {
            self.cancel.checkpoint()?;
            let shift = (layers - 1 - layer).min(30) as u8;
            let mut volume = blank_volume(
                &parsed,
                parsed.siz.width,
                parsed.siz.height,
                parsed.siz.depth,
            )?;
            for (tile, indices) in tiles.iter().zip(&tile_indices) {
                let Some(indices) = indices else { continue };
                for (ci, comp_indices) in indices.iter().enumerate() {
                    let decomp = decoder::tile_decomposition(&parsed, tile, comp_indices, shift);
                    let dwt = WaveletTransform::new(decomp.filter, (0, 0, 0)).with_mode(decomp.mode);
                    let samples = dwt.inverse(&decomp)?;
                    let samples = decoder::restore_sample_range(&parsed, ci, samples);
                    blit(
                        &mut volume.components[ci],
                        &samples,
                        tile.width() as usize,
                        tile.height() as usize,
                        (
                            tile.region.x0 as usize,
                            tile.region.y0 as usize,
                            tile.region.z0 as usize,
                        ),
                    );
                }
            }
            let done = layer + 1 == layers;
            let keep_going = self.emit(
                callback,
                ProgressiveStep {
                    volume,
                    progress: (layer + 1) as f64 / layers as f64,
                    step: layer as usize,
                    is_final: done,
                },
            )?;
            if !keep_going {
                return Ok(());
            }
        }
        Ok(())
    }

    fn run_slices<F>(&mut self, bytes: &[u8], batch: u32, callback: &mut F) -> Result<()>
    where
        F: FnMut(&ProgressiveStep) -> bool,
    {
        if batch == 0 {
            return Err(J3kError::InvalidParameter(
                "slice batch size must be nonzero".into(),
            ));
        }
        let decoder = Decoder::new(DecoderConfig {
            tolerant: self.tolerant,
        });
        let full = decoder.decode(bytes)?;
        let depth = full.volume.depth;
        let batches = depth.div_ceil(batch);

        for i in 0..batches {
            self.cancel.checkpoint()?;
            let z0 = i * batch;
            let z1 = (z0 + batch).min(depth);
            let volume = slice_volume(&full.volume, z0, z1)?;
            let done = i + 1 == batches;
            let keep_going = self.emit(
                callback,
                ProgressiveStep {
                    volume,
                    progress: (i + 1) as f64 / batches as f64,
                    step: i as usize,
                    is_final: done,
                },
            )?;
            if !keep_going {
                return Ok(());
            }
        }
        Ok(())
    }

    fn parse(&self, bytes: &[u8]) -> Result<ParsedCodestream> {
        CodestreamParser::new(bytes)
            .with_tolerance(self.tolerant)
            .parse()
    }

    fn collect_decompositions(
        &self,
        parsed: &ParsedCodestream,
        bytes: &[u8],
        tiles: &[Tile],
    ) -> Result<Vec<Option<Vec<crate::dwt::Decomposition>>>> {
        let grid = parsed.tile_grid()?;
        let mut out: Vec<Option<Vec<crate::dwt::Decomposition>>> = vec![None; tiles.len()];
        for entry in &parsed.tiles {
            let Some(tile) = grid.tile_at(entry.index) else {
                continue;
            };
            let payload = &bytes[entry.offset..entry.offset + entry.length];
            let indices = decoder::tile_indices(parsed, payload, &tile)?;
            let decomps = indices
                .iter()
                .map(|comp| decoder::tile_decomposition(parsed, &tile, comp, 0))
                .collect();
            out[entry.index] = Some(decomps);
        }
        Ok(out)
    }
}

/// Zero-filled volume with the parsed component layout at arbitrary dims.
fn blank_volume(parsed: &ParsedCodestream, w: u32, h: u32, d: u32) -> Result<Volume> {
    let components = parsed
        .siz
        .components
        .iter()
        .enumerate()
        .map(|(i, c)| Component::zeroed(i as u16, c.bit_depth, c.signed, w, h, d))
        .collect::<Result<Vec<_>>>()?;
    Volume::new(w, h, d, components)
}

/// Copy a `sw x sh x *` sample block into a component at `origin`, clipping
/// to the component's extent.
fn blit(comp: &mut Component, samples: &[i32], sw: usize, sh: usize, origin: (usize, usize, usize)) {
    let sd = if sw * sh == 0 { 0 } else { samples.len() / (sw * sh) };
    let (cw, ch, cd) = (
        comp.width as usize,
        comp.height as usize,
        comp.depth as usize,
    );
    for z in 0..sd {
        let dz = origin.2 + z;
        if dz >= cd {
            break;
        }
        for y in 0..sh {
            let dy = origin.1 + y;
            if dy >= ch {
                break;
            }
            for x in 0..sw {
                let dx = origin.0 + x;
                if dx >= cw {
                    break;
                }
                let v = samples[(z * sh + y) * sw + x];
                comp.set_sample((dz * ch + dy) * cw + dx, v as i64);
            }
        }
    }
}

/// Extract slices `[z0, z1)` of a volume as a new volume.
fn slice_volume(volume: &Volume, z0: u32, z1: u32) -> Result<Volume> {
    let d = z1 - z0;
    let components = volume
        .components
        .iter()
        .map(|c| {
            let slab = c.width as usize * c.height as usize * c.bytes_per_sample() as usize;
            let data = c.data[z0 as usize * slab..z1 as usize * slab].to_vec();
            Component::new(c.index, c.bit_depth, c.signed, c.width, c.height, d, data)
        })
        .collect::<Result<Vec<_>>>()?;
    Volume::new(volume.width, volume.height, d, components)
}
