//! Tile decomposition of a volume.
//!
//! Tiles form a regular grid over the volume; boundary tiles are clipped so
//! their upper bounds equal the volume's. Tiles are enumerated z-major,
//! then y, then x, which matches the linear index
//! `iz * gx * gy + iy * gx + ix`.

use crate::error::{J3kError, Result};
use crate::volume::{Region, Volume};

/// Nominal tile dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TilingConfig {
    pub tx: u32,
    pub ty: u32,
    pub tz: u32,
}

impl TilingConfig {
    pub fn new(tx: u32, ty: u32, tz: u32) -> Self {
        Self {
            tx: tx.max(1),
            ty: ty.max(1),
            tz: tz.max(1),
        }
    }

    /// A single tile covering the whole volume.
    pub fn single(w: u32, h: u32, d: u32) -> Self {
        Self::new(w, h, d)
    }
}

/// One tile of the grid, carrying its clipped region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tile {
    pub ix: u32,
    pub iy: u32,
    pub iz: u32,
    pub region: Region,
}

impl Tile {
    pub fn width(&self) -> u32 {
        self.region.width()
    }

    pub fn height(&self) -> u32 {
        self.region.height()
    }

    pub fn depth(&self) -> u32 {
        self.region.depth()
    }

    pub fn voxel_count(&self) -> usize {
        self.region.volume() as usize
    }
}

/// The tile grid derived from a volume extent and a [`TilingConfig`].
#[derive(Debug, Clone, Copy)]
pub struct TileGrid {
    pub config: TilingConfig,
    pub volume_w: u32,
    pub volume_h: u32,
    pub volume_d: u32,
    pub gx: u32,
    pub gy: u32,
    pub gz: u32,
}

impl TileGrid {
    pub fn new(w: u32, h: u32, d: u32, config: TilingConfig) -> Result<Self> {
        if w == 0 || h == 0 || d == 0 {
            return Err(J3kError::InvalidDimensions(format!("{w}x{h}x{d}")));
        }
        // Tiles larger than the volume degenerate to a single tile per axis.
        let config = TilingConfig::new(config.tx.min(w), config.ty.min(h), config.tz.min(d));
        Ok(Self {
            config,
            volume_w: w,
            volume_h: h,
            volume_d: d,
            gx: w.div_ceil(config.tx),
            gy: h.div_ceil(config.ty),
            gz: d.div_ceil(config.tz),
        })
    }

    pub fn tile_count(&self) -> usize {
        self.gx as usize * self.gy as usize * self.gz as usize
    }

    pub fn linear_index(&self, ix: u32, iy: u32, iz: u32) -> usize {
        (iz * self.gx * self.gy + iy * self.gx + ix) as usize
    }

    /// Tile by grid coordinates, with its region clipped to the volume.
    pub fn tile(&self, ix: u32, iy: u32, iz: u32) -> Option<Tile> {
        if ix >= self.gx || iy >= self.gy || iz >= self.gz {
            return None;
        }
        let x0 = ix * self.config.tx;
        let y0 = iy * self.config.ty;
        let z0 = iz * self.config.tz;
        let region = Region::new(
            x0,
            (x0 + self.config.tx).min(self.volume_w),
            y0,
            (y0 + self.config.ty).min(self.volume_h),
            z0,
            (z0 + self.config.tz).min(self.volume_d),
        );
        Some(Tile { ix, iy, iz, region })
    }

    /// Tile by linear index.
    pub fn tile_at(&self, idx: usize) -> Option<Tile> {
        if idx >= self.tile_count() {
            return None;
        }
        let per_slab = (self.gx * self.gy) as usize;
        let iz = (idx / per_slab) as u32;
        let rem = idx % per_slab;
        let iy = (rem / self.gx as usize) as u32;
        let ix = (rem % self.gx as usize) as u32;
        self.tile(ix, iy, iz)
    }

    /// All tiles in linear-index order.
    pub fn tiles(&self) -> Vec<Tile> {
        let mut out = Vec::with_capacity(self.tile_count());
        for iz in 0..self.gz {
            for iy in 0..self.gy {
                for ix in 0..self.gx {
                    if let Some(t) = self.tile(ix, iy, iz) {
                        out.push(t);
                    }
                }
            }
        }
        out
    }

    /// Tiles whose region intersects `region`, in linear-index order.
    pub fn tiles_intersecting(&self, region: &Region) -> Vec<Tile> {
        self.tiles()
            .into_iter()
            .filter(|t| t.region.intersects(region))
            .collect()
    }
}

/// Extract a contiguous voxel buffer for one component of one tile.
///
/// Samples come back in x-fastest order, `tile.w * tile.h * tile.d` entries.
pub fn extract_tile_data(volume: &Volume, tile: &Tile, component: usize) -> Result<Vec<i32>> {
    let comp = volume
        .components
        .get(component)
        .ok_or_else(|| J3kError::InvalidParameter(format!("component {component} out of range")))?;
    if comp.sub_x != 1 || comp.sub_y != 1 || comp.sub_z != 1 {
        return Err(J3kError::Unsupported(
            "tile extraction requires unit subsampling".into(),
        ));
    }
    let r = &tile.region;
    let mut out = Vec::with_capacity(tile.voxel_count());
    for z in r.z0..r.z1 {
        for y in r.y0..r.y1 {
            for x in r.x0..r.x1 {
                out.push(comp.sample_at(x, y, z) as i32);
            }
        }
    }
    Ok(out)
}

/// Write a tile's voxel buffer back into a component of the volume.
pub fn insert_tile_data(
    volume: &mut Volume,
    tile: &Tile,
    component: usize,
    samples: &[i32],
) -> Result<()> {
    let comp = volume
        .components
        .get_mut(component)
        .ok_or_else(|| J3kError::InvalidParameter(format!("component {component} out of range")))?;
    let r = &tile.region;
    if samples.len() != tile.voxel_count() {
        return Err(J3kError::InvalidParameter(format!(
            "tile buffer has {} samples, region needs {}",
            samples.len(),
            tile.voxel_count()
        )));
    }
    let (w, h) = (comp.width as usize, comp.height as usize);
    let tw = tile.width() as usize;
    let th = tile.height() as usize;
    for z in r.z0..r.z1 {
        for y in r.y0..r.y1 {
            for x in r.x0..r.x1 {
                let src = ((z - r.z0) as usize * th + (y - r.y0) as usize) * tw
                    + (x - r.x0) as usize;
                let dst = (z as usize * h + y as usize) * w + x as usize;
                comp.set_sample(dst, samples[src] as i64);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::Component;

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

    #[test]
    fn test_tile_count_ceil() {
        let grid = TileGrid::new(16, 16, 8, TilingConfig::new(8, 8, 4)).unwrap();
        assert_eq!((grid.gx, grid.gy, grid.gz), (2, 2, 2));
        assert_eq!(grid.tile_count(), 8);

        let grid = TileGrid::new(17, 16, 9, TilingConfig::new(8, 8, 4)).unwrap();
        assert_eq!((grid.gx, grid.gy, grid.gz), (3, 2, 3));
        assert_eq!(grid.tile_count(), 18);
    }

    #[test]
    fn test_boundary_tiles_clipped() {
        let grid = TileGrid::new(10, 10, 5, TilingConfig::new(8, 8, 4)).unwrap();
        let t = grid.tile(1, 1, 1).unwrap();
        assert_eq!(t.region, Region::new(8, 10, 8, 10, 4, 5));
        assert_eq!((t.width(), t.height(), t.depth()), (2, 2, 1));
    }

    #[test]
    fn test_linear_index_order() {
        let grid = TileGrid::new(16, 16, 8, TilingConfig::new(8, 8, 4)).unwrap();
        let tiles = grid.tiles();
        for (i, t) in tiles.iter().enumerate() {
            assert_eq!(grid.linear_index(t.ix, t.iy, t.iz), i);
            assert_eq!(grid.tile_at(i).unwrap(), *t);
        }
        // z-major enumeration: second slab starts at index gx*gy.
        assert_eq!(tiles[4].iz, 1);
        assert_eq!((tiles[4].ix, tiles[4].iy), (0, 0));
    }

    #[test]
    fn test_oversized_tile_config_degenerates() {
        let grid = TileGrid::new(4, 4, 2, TilingConfig::new(64, 64, 64)).unwrap();
        assert_eq!(grid.tile_count(), 1);
        let t = grid.tile(0, 0, 0).unwrap();
        assert_eq!(t.region, Region::new(0, 4, 0, 4, 0, 2));
    }

    #[test]
    fn test_extract_insert_roundtrip() {
        let vol = gradient_volume(10, 10, 5);
        let grid = TileGrid::new(10, 10, 5, TilingConfig::new(8, 8, 4)).unwrap();
        let mut rebuilt = Volume::new(
            10,
            10,
            5,
            vec![Component::zeroed(0, 8, false, 10, 10, 5).unwrap()],
        )
        .unwrap();
        for tile in grid.tiles() {
            let data = extract_tile_data(&vol, &tile, 0).unwrap();
            assert_eq!(data.len(), tile.voxel_count());
            insert_tile_data(&mut rebuilt, &tile, 0, &data).unwrap();
        }
        assert_eq!(vol.components[0].data, rebuilt.components[0].data);
    }

    #[test]
    fn test_extract_bad_component() {
        let vol = gradient_volume(4, 4, 2);
        let grid = TileGrid::new(4, 4, 2, TilingConfig::new(4, 4, 2)).unwrap();
        let tile = grid.tile(0, 0, 0).unwrap();
        assert!(matches!(
            extract_tile_data(&vol, &tile, 3),
            Err(J3kError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_tiles_intersecting() {
        let grid = TileGrid::new(16, 16, 8, TilingConfig::new(8, 8, 4)).unwrap();
        let roi = Region::from_size(0, 0, 0, 8, 8, 4);
        let hit = grid.tiles_intersecting(&roi);
        assert_eq!(hit.len(), 1);
        assert_eq!((hit[0].ix, hit[0].iy, hit[0].iz), (0, 0, 0));
    }
}
