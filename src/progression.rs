//! Packet progression orders.
//!
//! The sequencer enumerates every (layer, resolution, component, precinct,
//! slice) tuple exactly once in the configured nesting order. Sequences are
//! deterministic and depend only on the counts, never on coefficient data.

use num_enum::TryFromPrimitive;

use crate::error::{J3kError, Result};

/// Nesting order of the packet loops, outermost first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, TryFromPrimitive)]
#[repr(u8)]
pub enum ProgressionOrder {
    /// Layer, resolution, component, precinct, slice.
    #[default]
    Lrcps = 0,
    /// Resolution, layer, component, precinct, slice.
    Rlcps = 1,
    /// Precinct, component, resolution, layer, slice.
    Pcrls = 2,
    /// Slice, layer, resolution, component, precinct.
    Slrcp = 3,
    /// Component, precinct, resolution, layer, slice.
    Cprls = 4,
}

/// One entry of a packet sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PacketId {
    pub layer: u16,
    pub resolution: u8,
    pub component: u16,
    pub precinct: u32,
    pub slice: u32,
}

/// Enumerates packets for a tile given the five counts.
#[derive(Debug, Clone)]
pub struct PacketSequencer {
    pub layers: u16,
    pub resolutions: u8,
    pub components: u16,
    /// Precinct count per resolution level, `resolutions` entries.
    pub precincts_per_resolution: Vec<u32>,
    pub slices: u32,
}

impl PacketSequencer {
    pub fn new(
        layers: u16,
        resolutions: u8,
        components: u16,
        precincts_per_resolution: Vec<u32>,
        slices: u32,
    ) -> Result<Self> {
        if layers == 0 || resolutions == 0 || components == 0 || slices == 0 {
            return Err(J3kError::InvalidParameter(
                "packet sequencer counts must be nonzero".into(),
            ));
        }
        if precincts_per_resolution.len() != resolutions as usize {
            return Err(J3kError::InvalidParameter(format!(
                "expected {} precinct counts, got {}",
                resolutions,
                precincts_per_resolution.len()
            )));
        }
        Ok(Self {
            layers,
            resolutions,
            components,
            precincts_per_resolution,
            slices,
        })
    }

    /// Total number of packets any order will emit.
    pub fn total_packets(&self) -> u64 {
        let precincts: u64 = self.precincts_per_resolution.iter().map(|&p| p as u64).sum();
        self.layers as u64 * self.components as u64 * precincts * self.slices as u64
    }

    /// The full packet sequence in the given progression order.
    pub fn sequence(&self, order: ProgressionOrder) -> Vec<PacketId> {
        let mut out = Vec::with_capacity(self.total_packets() as usize);
        let max_precincts = self
            .precincts_per_resolution
            .iter()
            .copied()
            .max()
            .unwrap_or(0);
        match order {
            ProgressionOrder::Lrcps => {
                for l in 0..self.layers {
                    for r in 0..self.resolutions {
                        for c in 0..self.components {
                            for p in 0..self.precincts_per_resolution[r as usize] {
                                for s in 0..self.slices {
                                    out.push(PacketId {
                                        layer: l,
                                        resolution: r,
                                        component: c,
                                        precinct: p,
                                        slice: s,
                                    });
                                }
                            }
                        }
                    }
                }
            }
            ProgressionOrder::Rlcps => {
                for r in 0..self.resolutions {
                    for l in 0..self.layers {
                        for c in 0..self.components {
                            for p in 0..self.precincts_per_resolution[r as usize] {
                                for s in 0..self.slices {
                                    out.push(PacketId {
                                        layer: l,
                                        resolution: r,
                                        component: c,
                                        precinct: p,
                                        slice: s,
                                    });
                                }
                            }
                        }
                    }
                }
            }
            ProgressionOrder::Pcrls => {
                // Precinct counts vary by resolution; indices beyond a
                // resolution's count are skipped so the multiset matches.
                for p in 0..max_precincts {
                    for c in 0..self.components {
                        for r in 0..self.resolutions {
                            if p >= self.precincts_per_resolution[r as usize] {
                                continue;
                            }
                            for l in 0..self.layers {
                                for s in 0..self.slices {
                                    out.push(PacketId {
                                        layer: l,
                                        resolution: r,
                                        component: c,
                                        precinct: p,
                                        slice: s,
                                    });
                                }
                            }
                        }
                    }
                }
            }
            ProgressionOrder::Slrcp => {
                for s in 0..self.slices {
                    for l in 0..self.layers {
                        for r in 0..self.resolutions {
                            for c in 0..self.components {
                                for p in 0..self.precincts_per_resolution[r as usize] {
                                    out.push(PacketId {
                                        layer: l,
                                        resolution: r,
                                        component: c,
                                        precinct: p,
                                        slice: s,
                                    });
                                }
                            }
                        }
                    }
                }
            }
            ProgressionOrder::Cprls => {
                for c in 0..self.components {
                    for p in 0..max_precincts {
                        for r in 0..self.resolutions {
                            if p >= self.precincts_per_resolution[r as usize] {
                                continue;
                            }
                            for l in 0..self.layers {
                                for s in 0..self.slices {
                                    out.push(PacketId {
                                        layer: l,
                                        resolution: r,
                                        component: c,
                                        precinct: p,
                                        slice: s,
                                    });
                                }
                            }
                        }
                    }
                }
            }
        }
        out
    }
}
