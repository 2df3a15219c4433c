//! Interactive streaming layer: data-bin cache, progressive delivery,
//! and the session-based server/client pair.

pub mod bin;
pub mod cache;
pub mod client;
pub mod delivery;
pub mod server;

pub use bin::{DataBin, Precinct3d, Subband3d};
pub use cache::{BinCache, CacheConfig, CacheStats, EvictionStrategy};
pub use client::{ClientState, JpipClient, LoopbackTransport, Transport};
pub use delivery::{BinSchedule, DeliveryMode, NetworkCondition, ProgressiveDelivery};
pub use server::{JpipServer, ServerConfig};

use crate::volume::Region;

/// A viewing cone in voxel space, used for view-dependent eviction and for
/// rejecting sessions whose view provably misses the volume.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frustum {
    pub origin: [f32; 3],
    /// Viewing direction; not required to be normalised.
    pub direction: [f32; 3],
    pub half_angle_deg: f32,
    pub far: f32,
}

impl Frustum {
    /// Conservative axis-aligned bounds of the cone.
    pub fn aabb(&self) -> ([f32; 3], [f32; 3]) {
        let len = (self.direction[0].powi(2)
            + self.direction[1].powi(2)
            + self.direction[2].powi(2))
        .sqrt()
        .max(f32::MIN_POSITIVE);
        let dir = [
            self.direction[0] / len,
            self.direction[1] / len,
            self.direction[2] / len,
        ];
        let end = [
            self.origin[0] + dir[0] * self.far,
            self.origin[1] + dir[1] * self.far,
            self.origin[2] + dir[2] * self.far,
        ];
        let radius = self.far * self.half_angle_deg.to_radians().tan().abs();
        let mut lo = [0f32; 3];
        let mut hi = [0f32; 3];
        for a in 0..3 {
            lo[a] = self.origin[a].min(end[a] - radius);
            hi[a] = self.origin[a].max(end[a] + radius);
        }
        (lo, hi)
    }

    /// Whether the cone's bounds overlap a voxel region.
    pub fn intersects_region(&self, region: &Region) -> bool {
        if region.is_empty() {
            return false;
        }
        let (lo, hi) = self.aabb();
        lo[0] < region.x1 as f32
            && hi[0] > region.x0 as f32
            && lo[1] < region.y1 as f32
            && hi[1] > region.y0 as f32
            && lo[2] < region.z1 as f32
            && hi[2] > region.z0 as f32
    }
}

/// A session's view of a volume.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    /// Sub-volume of interest; requests are clipped against it.
    pub region: Region,
    pub frustum: Option<Frustum>,
    /// Coarsest resolution level the viewer wants.
    pub resolution_level: u8,
    /// Highest quality layer the viewer wants.
    pub max_quality: u16,
}

impl Viewport {
    pub fn covering(region: Region) -> Self {
        Self {
            region,
            frustum: None,
            resolution_level: 0,
            max_quality: u16::MAX,
        }
    }
}
