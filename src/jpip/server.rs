//! Streaming server: registered volumes, sessions, and request handling.
//!
//! The server wraps registered codestreams. A request enumerates the
//! precincts covering the clipped region, consults the shared precinct
//! cache to avoid re-slicing, and returns a schedule of data bins. State
//! lives behind one mutex; operations are short and never hold it across
//! I/O.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use super::bin::{Precinct3d, Subband3d};
use super::cache::{BinCache, CacheConfig};
use super::delivery::{BinSchedule, BinSource, DeliveryMode, ProgressiveDelivery};
use super::Viewport;
use crate::codestream::{CodestreamParser, ParsedCodestream};
use crate::error::{J3kError, Result};
use crate::tiling::Tile;
use crate::volume::Region;

/// Server limits and defaults.
#[derive(Debug, Clone, Copy)]
pub struct ServerConfig {
    pub max_sessions: usize,
    /// Whole-volume requests are rejected when the backing codestream
    /// exceeds this many bytes.
    pub max_full_volume_bytes: usize,
    /// Outstanding bins allowed per session before producers block.
    pub max_outstanding_bins: usize,
    pub request_timeout: Duration,
    pub default_bandwidth_bps: f64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_sessions: 32,
            max_full_volume_bytes: 16 * 1024 * 1024,
            max_outstanding_bins: 256,
            request_timeout: Duration::from_secs(30),
            default_bandwidth_bps: 10e6,
        }
    }
}

struct RegisteredVolume {
    codestream: Vec<u8>,
    parsed: ParsedCodestream,
}

struct Session {
    volume_id: String,
    viewport: Viewport,
    delivery: ProgressiveDelivery,
    #[allow(dead_code)]
    created: Instant,
}

#[derive(Default)]
struct ServerState {
    running: bool,
    volumes: HashMap<String, Arc<RegisteredVolume>>,
    sessions: HashMap<u64, Session>,
    next_session_id: u64,
}

/// The JPIP-style streaming server.
pub struct JpipServer {
    config: ServerConfig,
    cache: Arc<BinCache>,
    state: Mutex<ServerState>,
}

impl JpipServer {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            cache: Arc::new(BinCache::with_lru(CacheConfig::default())),
            state: Mutex::new(ServerState::default()),
        }
    }

    /// The precinct cache shared across all sessions.
    pub fn cache(&self) -> Arc<BinCache> {
        self.cache.clone()
    }

    /// Register a codestream under a name. Registration is frozen while the
    /// server runs.
    pub fn register_volume(&self, name: &str, codestream: Vec<u8>) -> Result<()> {
        let parsed = CodestreamParser::new(&codestream).parse()?;
        let mut state = self.lock();
        if state.running {
            return Err(J3kError::AlreadyRunning);
        }
        log::info!(
            "registered volume {name:?}: {}x{}x{}, {} bytes",
            parsed.siz.width,
            parsed.siz.height,
            parsed.siz.depth,
            codestream.len()
        );
        state.volumes.insert(
            name.to_string(),
            Arc::new(RegisteredVolume { codestream, parsed }),
        );
        Ok(())
    }

    pub fn start(&self) -> Result<()> {
        let mut state = self.lock();
        if state.running {
            return Err(J3kError::AlreadyRunning);
        }
        state.running = true;
        log::info!("server started with {} volume(s)", state.volumes.len());
        Ok(())
    }

    pub fn stop(&self) -> Result<()> {
        let mut state = self.lock();
        if !state.running {
            return Err(J3kError::NotRunning);
        }
        state.running = false;
        state.sessions.clear();
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    pub fn session_count(&self) -> usize {
        self.lock().sessions.len()
    }

    /// Open a session on a registered volume.
    pub fn create_session(&self, volume_id: &str, viewport: Viewport) -> Result<u64> {
        let mut state = self.lock();
        if !state.running {
            return Err(J3kError::NotRunning);
        }
        let volume = state
            .volumes
            .get(volume_id)
            .ok_or_else(|| J3kError::UnknownVolume(volume_id.to_string()))?
            .clone();
        if state.sessions.len() >= self.config.max_sessions {
            return Err(J3kError::SessionLimitExceeded(state.sessions.len()));
        }
        let bounds = Region::new(
            0,
            volume.parsed.siz.width,
            0,
            volume.parsed.siz.height,
            0,
            volume.parsed.siz.depth,
        );
        if let Some(frustum) = &viewport.frustum {
            if !frustum.intersects_region(&bounds) {
                return Err(J3kError::EmptyFrustum);
            }
        }

        let id = state.next_session_id;
        state.next_session_id += 1;
        state.sessions.insert(
            id,
            Session {
                volume_id: volume_id.to_string(),
                viewport,
                delivery: ProgressiveDelivery::new(
                    DeliveryMode::ResolutionFirst,
                    self.config.default_bandwidth_bps,
                ),
                created: Instant::now(),
            },
        );
        log::debug!("session {id} opened on {volume_id:?}");
        Ok(id)
    }

    pub fn close_session(&self, session_id: u64) -> Result<()> {
        let mut state = self.lock();
        state
            .sessions
            .remove(&session_id)
            .map(|_| ())
            .ok_or(J3kError::NoSession)
    }

    pub fn set_delivery_mode(&self, session_id: u64, mode: DeliveryMode) -> Result<()> {
        let mut state = self.lock();
        let session = state
            .sessions
            .get_mut(&session_id)
            .ok_or(J3kError::NoSession)?;
        let bandwidth = session.delivery.bandwidth_bps();
        session.delivery = ProgressiveDelivery::new(mode, bandwidth);
        Ok(())
    }

    /// Volume extent for a session, for clients that build slice requests.
    pub fn volume_bounds(&self, session_id: u64) -> Result<Region> {
        let state = self.lock();
        let session = state.sessions.get(&session_id).ok_or(J3kError::NoSession)?;
        let volume = state
            .volumes
            .get(&session.volume_id)
            .ok_or_else(|| J3kError::UnknownVolume(session.volume_id.clone()))?;
        Ok(Region::new(
            0,
            volume.parsed.siz.width,
            0,
            volume.parsed.siz.height,
            0,
            volume.parsed.siz.depth,
        ))
    }

    /// Serve a region request: clip to the viewport, enumerate precincts,
    /// and schedule the missing bins.
    pub fn handle_request(&self, session_id: u64, region: &Region) -> Result<BinSchedule> {
        self.handle_request_with_quality(session_id, region, None)
    }

    /// As [`handle_request`](Self::handle_request), additionally capping the
    /// quality layer for this and subsequent schedules.
    pub fn handle_request_with_quality(
        &self,
        session_id: u64,
        region: &Region,
        max_quality: Option<u16>,
    ) -> Result<BinSchedule> {
        let mut state = self.lock();
        if !state.running {
            return Err(J3kError::NotRunning);
        }
        let session = state
            .sessions
            .get(&session_id)
            .ok_or(J3kError::NoSession)?;
        let volume = state
            .volumes
            .get(&session.volume_id)
            .ok_or_else(|| J3kError::UnknownVolume(session.volume_id.clone()))?
            .clone();

        let bounds = Region::new(
            0,
            volume.parsed.siz.width,
            0,
            volume.parsed.siz.height,
            0,
            volume.parsed.siz.depth,
        );
        if region.is_empty() {
            return Err(J3kError::InvalidRegion(format!("{region:?}")));
        }
        // Whole-volume requests are capped by the backing stream size.
        if region.intersect(&bounds) == Some(bounds)
            && volume.codestream.len() > self.config.max_full_volume_bytes
        {
            return Err(J3kError::VolumeTooLarge {
                size: volume.codestream.len(),
                cap: self.config.max_full_volume_bytes,
            });
        }

        let viewport_region = session.viewport.region;
        let clipped = region
            .intersect(&viewport_region)
            .and_then(|r| r.intersect(&bounds))
            .unwrap_or_default();
        if clipped.is_empty() {
            return Ok(BinSchedule::default());
        }

        let grid = volume.parsed.tile_grid()?;
        let levels = volume
            .parsed
            .cod
            .levels_x
            .max(volume.parsed.cod.levels_y)
            .max(volume.parsed.cod.levels_z);
        let layers = volume.parsed.cod.layers;
        let frustum = session.viewport.frustum;

        let source = CodestreamBinSource {
            volume: volume.as_ref(),
            cache: self.cache.as_ref(),
            levels,
            layers,
        };
        let session = state
            .sessions
            .get_mut(&session_id)
            .ok_or(J3kError::NoSession)?;
        if let Some(q) = max_quality {
            session.delivery.adjust_quality(q);
        }
        let mut schedule = session.delivery.schedule(
            &grid,
            levels,
            layers,
            &clipped,
            frustum.as_ref(),
            &source,
        );
        if schedule.bins.len() > self.config.max_outstanding_bins {
            // The dropped tail is un-marked so a later request resumes it.
            let tail = schedule.bins.split_off(self.config.max_outstanding_bins);
            session.delivery.rewind(&tail);
            schedule.total_bytes = schedule.bins.iter().map(|b| b.bytes.len()).sum();
        }
        Ok(schedule)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Bin source backed by a registered codestream and the shared cache.
///
/// A tile's payload is sliced deterministically across (level, layer)
/// chunks; slices are cached by precinct so repeated requests never touch
/// the codestream again.
struct CodestreamBinSource<'a> {
    volume: &'a RegisteredVolume,
    cache: &'a BinCache,
    levels: u8,
    layers: u16,
}

impl CodestreamBinSource<'_> {
    fn precinct(&self, tile: &Tile, level: u8) -> Precinct3d {
        Precinct3d {
            ix: tile.ix,
            iy: tile.iy,
            iz: tile.iz,
            resolution_level: level,
            component: 0,
            subband: Subband3d::Lll,
        }
    }
}

impl BinSource for CodestreamBinSource<'_> {
    fn bin_bytes(
        &self,
        tile: &Tile,
        tile_linear: usize,
        level: u8,
        layer: u16,
    ) -> Option<Vec<u8>> {
        let key = self.precinct(tile, level);
        if let Some(hit) = self.cache.retrieve(&key) {
            let chunks = self.layers.max(1) as usize;
            let chunk = hit.bytes.len().div_ceil(chunks);
            let start = (layer as usize * chunk).min(hit.bytes.len());
            let end = ((layer as usize + 1) * chunk).min(hit.bytes.len());
            return Some(hit.bytes[start..end].to_vec());
        }

        let entry = self
            .volume
            .parsed
            .tiles
            .iter()
            .find(|t| t.index == tile_linear)?;
        let payload = &self.volume.codestream[entry.offset..entry.offset + entry.length];
        // Slice the payload across resolution levels; each level's slice is
        // cached whole and sub-sliced per layer on later hits.
        let level_chunks = self.levels as usize + 1;
        let per_level = payload.len().div_ceil(level_chunks);
        let lstart = (level as usize * per_level).min(payload.len());
        let lend = ((level as usize + 1) * per_level).min(payload.len());
        let level_bytes = payload[lstart..lend].to_vec();

        let chunks = self.layers.max(1) as usize;
        let chunk = level_bytes.len().div_ceil(chunks.max(1)).max(1);
        let start = (layer as usize * chunk).min(level_bytes.len());
        let end = ((layer as usize + 1) * chunk).min(level_bytes.len());
        let out = level_bytes[start..end].to_vec();

        self.cache.store(
            key,
            super::bin::DataBin {
                bin_id: super::bin::pack_bin_id(tile_linear, level, 0),
                tile: (tile.ix, tile.iy, tile.iz),
                resolution_level: level,
                quality_layer: 0,
                bytes: level_bytes,
                is_complete: true,
            },
            tile.region,
        );
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::{Encoder, EncoderConfig};
    use crate::tiling::TilingConfig;
    use crate::volume::Volume;

    fn encoded_volume() -> Vec<u8> {
        let mut data = Vec::new();
        for z in 0..8u32 {
            for y in 0..16u32 {
                for x in 0..16u32 {
                    data.push(((x + 2 * y + 3 * z) % 256) as u8);
                }
            }
        }
        let vol = Volume::monochrome(16, 16, 8, data).unwrap();
        Encoder::new(
            EncoderConfig::default()
                .with_tiling(TilingConfig::new(8, 8, 4))
                .with_levels((1, 1, 1)),
        )
        .encode(&vol)
        .unwrap()
        .bytes
    }

    fn running_server() -> JpipServer {
        let server = JpipServer::new(ServerConfig::default());
        server.register_volume("brain", encoded_volume()).unwrap();
        server.start().unwrap();
        server
    }

    fn viewport() -> Viewport {
        Viewport::covering(Region::from_size(0, 0, 0, 16, 16, 8))
    }

    #[test]
    fn test_start_stop_lifecycle() {
        let server = JpipServer::new(ServerConfig::default());
        assert!(!server.is_running());
        server.start().unwrap();
        assert!(matches!(server.start(), Err(J3kError::AlreadyRunning)));
        server.stop().unwrap();
        assert!(matches!(server.stop(), Err(J3kError::NotRunning)));
    }

    #[test]
    fn test_registration_frozen_while_running() {
        let server = running_server();
        assert!(matches!(
            server.register_volume("other", encoded_volume()),
            Err(J3kError::AlreadyRunning)
        ));
        server.stop().unwrap();
        server.register_volume("other", encoded_volume()).unwrap();
    }

    #[test]
    fn test_unknown_volume() {
        let server = running_server();
        assert!(matches!(
            server.create_session("missing", viewport()),
            Err(J3kError::UnknownVolume(_))
        ));
    }

    #[test]
    fn test_session_limit() {
        let server = JpipServer::new(ServerConfig {
            max_sessions: 2,
            ..ServerConfig::default()
        });
        server.register_volume("v", encoded_volume()).unwrap();
        server.start().unwrap();
        server.create_session("v", viewport()).unwrap();
        server.create_session("v", viewport()).unwrap();
        assert!(matches!(
            server.create_session("v", viewport()),
            Err(J3kError::SessionLimitExceeded(2))
        ));
    }

    #[test]
    fn test_empty_frustum_rejected() {
        let server = running_server();
        let mut vp = viewport();
        vp.frustum = Some(super::super::Frustum {
            origin: [1000.0, 1000.0, 1000.0],
            direction: [1.0, 0.0, 0.0],
            half_angle_deg: 5.0,
            far: 10.0,
        });
        assert!(matches!(
            server.create_session("brain", vp),
            Err(J3kError::EmptyFrustum)
        ));
    }

    #[test]
    fn test_request_returns_bins() {
        let server = running_server();
        let session = server.create_session("brain", viewport()).unwrap();
        let schedule = server
            .handle_request(session, &Region::from_size(0, 0, 0, 8, 8, 4))
            .unwrap();
        assert!(!schedule.bins.is_empty());
        assert_eq!(
            schedule.total_bytes,
            schedule.bins.iter().map(|b| b.bytes.len()).sum::<usize>()
        );
    }

    #[test]
    fn test_request_consults_shared_cache() {
        let server = running_server();
        let s1 = server.create_session("brain", viewport()).unwrap();
        let region = Region::from_size(0, 0, 0, 8, 8, 4);
        server.handle_request(s1, &region).unwrap();
        let before = server.cache().stats();
        assert!(before.entry_count > 0);

        // A second session over the same region hits the shared cache.
        let s2 = server.create_session("brain", viewport()).unwrap();
        server.handle_request(s2, &region).unwrap();
        let after = server.cache().stats();
        assert!(after.hits > before.hits);
    }

    #[test]
    fn test_full_volume_too_large() {
        let server = JpipServer::new(ServerConfig {
            max_full_volume_bytes: 16,
            ..ServerConfig::default()
        });
        server.register_volume("v", encoded_volume()).unwrap();
        server.start().unwrap();
        let session = server.create_session("v", viewport()).unwrap();
        assert!(matches!(
            server.handle_request(session, &Region::from_size(0, 0, 0, 16, 16, 8)),
            Err(J3kError::VolumeTooLarge { .. })
        ));
        // A sub-region of the same stream is still served.
        assert!(server
            .handle_request(session, &Region::from_size(0, 0, 0, 8, 8, 4))
            .is_ok());
    }

    #[test]
    fn test_invalid_region_rejected() {
        let server = running_server();
        let session = server.create_session("brain", viewport()).unwrap();
        assert!(matches!(
            server.handle_request(session, &Region::default()),
            Err(J3kError::InvalidRegion(_))
        ));
    }

    #[test]
    fn test_close_session() {
        let server = running_server();
        let session = server.create_session("brain", viewport()).unwrap();
        assert_eq!(server.session_count(), 1);
        server.close_session(session).unwrap();
        assert_eq!(server.session_count(), 0);
        assert!(matches!(
            server.handle_request(session, &Region::from_size(0, 0, 0, 4, 4, 4)),
            Err(J3kError::NoSession)
        ));
    }
}
