//! Progressive delivery scheduling.
//!
//! A schedule lists the data bins a viewer needs for a region, ordered by
//! the delivery mode. Delivered bins are remembered and never re-scheduled,
//! so schedules stay monotone across network loss and viewport churn.

use std::collections::HashSet;

use super::bin::{pack_bin_id, DataBin};
use super::Frustum;
use crate::progression::{PacketSequencer, ProgressionOrder};
use crate::tiling::{Tile, TileGrid};
use crate::volume::Region;

/// Ordering policy for scheduled bins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Coarse resolution levels first, refining to full.
    ResolutionFirst,
    /// All of layer 0 first, then each refinement layer.
    QualityFirst,
    /// Tiles in ascending Z.
    SliceForward,
    /// Tiles in descending Z.
    SliceReverse,
    /// From the centre slab outward.
    SliceBidirectional,
    /// Tiles inside the view frustum first.
    ViewDependent,
    /// Tiles nearest the request centre first.
    DistanceOrdered,
    /// Picks resolution- or quality-first from current bandwidth.
    Adaptive,
    /// Follow a codestream packet progression order.
    Packet(ProgressionOrder),
}

/// Instantaneous network conditions reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NetworkCondition {
    pub bandwidth_bps: f64,
    pub latency_ms: f64,
}

/// An ordered batch of bins with its payload total.
#[derive(Debug, Clone, Default)]
pub struct BinSchedule {
    pub bins: Vec<DataBin>,
    pub total_bytes: usize,
}

/// Supplies the bytes of a bin on demand (typically backed by a codestream
/// and a shared precinct cache).
pub trait BinSource {
    fn bin_bytes(&self, tile: &Tile, tile_linear: usize, level: u8, layer: u16)
        -> Option<Vec<u8>>;
}

/// Bandwidth threshold below which adaptive delivery favours coarse
/// resolution levels.
const ADAPTIVE_LOW_BANDWIDTH_BPS: f64 = 1_000_000.0;

/// Plans which bins to send, in what order, for a region of a volume.
pub struct ProgressiveDelivery {
    mode: DeliveryMode,
    bandwidth_bps: f64,
    max_quality: Option<u16>,
    delivered: HashSet<u64>,
}

impl ProgressiveDelivery {
    pub fn new(mode: DeliveryMode, bandwidth_bps: f64) -> Self {
        Self {
            mode,
            bandwidth_bps,
            max_quality: None,
            delivered: HashSet::new(),
        }
    }

    pub fn mode(&self) -> DeliveryMode {
        self.mode
    }

    pub fn bandwidth_bps(&self) -> f64 {
        self.bandwidth_bps
    }

    /// Drop updates above `max` from subsequent schedules.
    pub fn adjust_quality(&mut self, max: u16) {
        self.max_quality = Some(max);
    }

    /// Forget that `bins` were delivered so they are scheduled again, used
    /// when a producer had to drop part of a schedule.
    pub fn rewind(&mut self, bins: &[DataBin]) {
        for bin in bins {
            self.delivered.remove(&bin.bin_id);
        }
    }

    /// Update the bandwidth estimate.
    pub fn handle_network_change(&mut self, cond: NetworkCondition) {
        self.bandwidth_bps = cond.bandwidth_bps.max(0.0);
        log::debug!(
            "network change: {:.0} bps, {:.1} ms latency",
            cond.bandwidth_bps,
            cond.latency_ms
        );
    }

    /// Seconds to deliver `schedule` at the current bandwidth; zero
    /// bandwidth yields infinity.
    pub fn estimate_time(&self, schedule: &BinSchedule) -> f64 {
        if self.bandwidth_bps <= 0.0 {
            return f64::INFINITY;
        }
        (schedule.total_bytes as f64 * 8.0) / self.bandwidth_bps
    }

    /// Build the next schedule for `region`. Bins already delivered are
    /// excluded; the new ones are marked delivered.
    pub fn schedule(
        &mut self,
        grid: &TileGrid,
        levels: u8,
        layers: u16,
        region: &Region,
        frustum: Option<&Frustum>,
        source: &dyn BinSource,
    ) -> BinSchedule {
        if self.bandwidth_bps <= 0.0 {
            return BinSchedule::default();
        }
        let tiles = grid.tiles_intersecting(region);
        let layers = layers.max(1);
        let max_layer = self.max_quality.unwrap_or(u16::MAX);

        let mut candidates: Vec<(Tile, usize, u8, u16)> = Vec::new();
        match self.mode {
            DeliveryMode::Packet(order) => {
                let seq = PacketSequencer::new(
                    layers,
                    levels + 1,
                    1,
                    vec![tiles.len() as u32; levels as usize + 1],
                    1,
                );
                if let Ok(seq) = seq {
                    for p in seq.sequence(order) {
                        let tile = tiles[p.precinct as usize];
                        let linear = grid.linear_index(tile.ix, tile.iy, tile.iz);
                        candidates.push((tile, linear, p.resolution, p.layer));
                    }
                }
            }
            _ => {
                for tile in &tiles {
                    let linear = grid.linear_index(tile.ix, tile.iy, tile.iz);
                    for level in 0..=levels {
                        for layer in 0..layers {
                            candidates.push((*tile, linear, level, layer));
                        }
                    }
                }
                self.order_candidates(&mut candidates, region, frustum);
            }
        }

        let mut bins = Vec::new();
        let mut total_bytes = 0usize;
        for (tile, linear, level, layer) in candidates {
            if layer > max_layer {
                continue;
            }
            let bin_id = pack_bin_id(linear, level, layer);
            if self.delivered.contains(&bin_id) {
                continue;
            }
            let Some(bytes) = source.bin_bytes(&tile, linear, level, layer) else {
                continue;
            };
            total_bytes += bytes.len();
            self.delivered.insert(bin_id);
            bins.push(DataBin {
                bin_id,
                tile: (tile.ix, tile.iy, tile.iz),
                resolution_level: level,
                quality_layer: layer,
                bytes,
                is_complete: layer + 1 == layers,
            });
        }
        BinSchedule { bins, total_bytes }
    }

    fn order_candidates(
        &self,
        candidates: &mut [(Tile, usize, u8, u16)],
        region: &Region,
        frustum: Option<&Frustum>,
    ) {
        let center = region.center();
        let mode = match self.mode {
            DeliveryMode::Adaptive => {
                if self.bandwidth_bps < ADAPTIVE_LOW_BANDWIDTH_BPS {
                    DeliveryMode::ResolutionFirst
                } else {
                    DeliveryMode::QualityFirst
                }
            }
            m => m,
        };
        match mode {
            // Coarse levels carry the highest level number.
            DeliveryMode::ResolutionFirst => {
                candidates.sort_by_key(|&(_, linear, level, layer)| {
                    (std::cmp::Reverse(level), layer, linear)
                });
            }
            DeliveryMode::QualityFirst => {
                candidates.sort_by_key(|&(_, linear, level, layer)| {
                    (layer, std::cmp::Reverse(level), linear)
                });
            }
            DeliveryMode::SliceForward => {
                candidates.sort_by_key(|&(t, linear, level, layer)| {
                    (t.iz, std::cmp::Reverse(level), layer, linear)
                });
            }
            DeliveryMode::SliceReverse => {
                candidates.sort_by_key(|&(t, linear, level, layer)| {
                    (std::cmp::Reverse(t.iz), std::cmp::Reverse(level), layer, linear)
                });
            }
            DeliveryMode::SliceBidirectional => {
                let mid = (region.z0 + region.z1) / 2;
                candidates.sort_by_key(|&(t, linear, level, layer)| {
                    let zc = t.region.z0 + t.region.depth() / 2;
                    let dist = zc.abs_diff(mid);
                    (dist, std::cmp::Reverse(level), layer, linear)
                });
            }
            DeliveryMode::ViewDependent => {
                candidates.sort_by_key(|&(t, linear, level, layer)| {
                    let inside = frustum
                        .map(|f| f.intersects_region(&t.region))
                        .unwrap_or(true);
                    (!inside, std::cmp::Reverse(level), layer, linear)
                });
            }
            DeliveryMode::DistanceOrdered => {
                candidates.sort_by(|a, b| {
                    let d = |t: &Tile| {
                        let c = t.region.center();
                        (c[0] - center[0]).powi(2)
                            + (c[1] - center[1]).powi(2)
                            + (c[2] - center[2]).powi(2)
                    };
                    d(&a.0)
                        .total_cmp(&d(&b.0))
                        .then(std::cmp::Reverse(a.2).cmp(&std::cmp::Reverse(b.2)))
                        .then(a.3.cmp(&b.3))
                });
            }
            DeliveryMode::Adaptive | DeliveryMode::Packet(_) => unreachable!("resolved above"),
        }
    }
}
