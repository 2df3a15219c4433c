//! Streaming client: connection state, its own bin cache, and a viewport
//! that cancels stale in-flight requests.

use std::sync::{Arc, Mutex};

use super::bin::{Precinct3d, Subband3d};
use super::cache::{BinCache, CacheConfig};
use super::delivery::BinSchedule;
use super::server::JpipServer;
use super::Viewport;
use crate::error::{J3kError, Result};
use crate::progress::CancelToken;
use crate::volume::Region;

/// What the client is allowed to do right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Disconnected,
    Connected,
    InSession(u64),
}

/// Network seam between client and server. The loopback implementation
/// calls a local server directly; a remote transport would speak the wire
/// protocol behind the same trait.
pub trait Transport: Send + Sync {
    fn create_session(&self, volume_id: &str, viewport: &Viewport) -> Result<u64>;
    fn close_session(&self, session_id: u64) -> Result<()>;
    fn request(
        &self,
        session_id: u64,
        region: &Region,
        max_quality: Option<u16>,
    ) -> Result<BinSchedule>;
    fn volume_bounds(&self, session_id: u64) -> Result<Region>;
}

/// In-process transport wrapping a [`JpipServer`].
pub struct LoopbackTransport {
    server: Arc<JpipServer>,
}

impl LoopbackTransport {
    pub fn new(server: Arc<JpipServer>) -> Self {
        Self { server }
    }
}

impl Transport for LoopbackTransport {
    fn create_session(&self, volume_id: &str, viewport: &Viewport) -> Result<u64> {
        self.server.create_session(volume_id, *viewport)
    }

    fn close_session(&self, session_id: u64) -> Result<()> {
        self.server.close_session(session_id)
    }

    fn request(
        &self,
        session_id: u64,
        region: &Region,
        max_quality: Option<u16>,
    ) -> Result<BinSchedule> {
        self.server
            .handle_request_with_quality(session_id, region, max_quality)
    }

    fn volume_bounds(&self, session_id: u64) -> Result<Region> {
        self.server.volume_bounds(session_id)
    }
}

struct InFlight {
    region: Region,
    cancel: CancelToken,
}

/// The streaming client.
pub struct JpipClient {
    transport: Arc<dyn Transport>,
    state: ClientState,
    viewport: Option<Viewport>,
    cache: BinCache,
    in_flight: Arc<Mutex<Vec<InFlight>>>,
}

impl JpipClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            state: ClientState::Disconnected,
            viewport: None,
            cache: BinCache::with_lru(CacheConfig::default()),
            in_flight: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn cache(&self) -> &BinCache {
        &self.cache
    }

    /// Open the connection; no session exists yet.
    pub fn connect(&mut self) -> Result<()> {
        match self.state {
            ClientState::Disconnected => {
                self.state = ClientState::Connected;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Tear down the connection, clearing any session and local state.
    pub fn disconnect(&mut self) {
        if let ClientState::InSession(id) = self.state {
            // Best effort; the server may already have dropped us.
            let _ = self.transport.close_session(id);
        }
        self.state = ClientState::Disconnected;
        self.viewport = None;
        self.cache.clear();
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    /// Open a session on a registered volume. Requires a connection.
    pub fn create_session(&mut self, volume_id: &str) -> Result<u64> {
        match self.state {
            ClientState::Disconnected => Err(J3kError::NotConnected),
            ClientState::InSession(id) => Ok(id),
            ClientState::Connected => {
                let bounds_guess = Region::new(0, u32::MAX, 0, u32::MAX, 0, u32::MAX);
                let viewport = self
                    .viewport
                    .unwrap_or_else(|| Viewport::covering(bounds_guess));
                let id = self.transport.create_session(volume_id, &viewport)?;
                self.state = ClientState::InSession(id);
                if self.viewport.is_none() {
                    // Adopt the real volume extent as the initial viewport.
                    if let Ok(bounds) = self.transport.volume_bounds(id) {
                        self.viewport = Some(Viewport::covering(bounds));
                    }
                }
                Ok(id)
            }
        }
    }

    fn session_id(&self) -> Result<u64> {
        match self.state {
            ClientState::InSession(id) => Ok(id),
            ClientState::Connected => Err(J3kError::NoSession),
            ClientState::Disconnected => Err(J3kError::NotConnected),
        }
    }

    /// Set the viewport before connecting or mid-session. In-flight
    /// requests that no longer intersect it are cancelled.
    pub fn update_viewport(&mut self, viewport: Viewport) {
        {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
            in_flight.retain(|r| {
                if r.region.intersects(&viewport.region) {
                    true
                } else {
                    log::debug!("cancelling stale request for {:?}", r.region);
                    r.cancel.cancel();
                    false
                }
            });
        }
        self.viewport = Some(viewport);
    }

    /// Request the bins covering `region`. Requires an open session.
    pub fn request_region(&mut self, region: Region) -> Result<BinSchedule> {
        self.request_region_with_quality(region, None)
    }

    fn request_region_with_quality(
        &mut self,
        region: Region,
        max_quality: Option<u16>,
    ) -> Result<BinSchedule> {
        let session = self.session_id()?;
        if region.is_empty() {
            return Err(J3kError::InvalidRegion(format!("{region:?}")));
        }
        let cancel = CancelToken::new();
        {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
            in_flight.push(InFlight {
                region,
                cancel: cancel.clone(),
            });
        }

        let result = self.transport.request(session, &region, max_quality);

        {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
            in_flight.retain(|r| !r.region.eq(&region));
        }
        // A viewport change while the request was out cancels its delivery.
        cancel.checkpoint()?;
        let schedule = result?;

        for bin in &schedule.bins {
            let key = Precinct3d {
                ix: bin.tile.0,
                iy: bin.tile.1,
                iz: bin.tile.2,
                resolution_level: bin.resolution_level,
                component: 0,
                subband: Subband3d::Lll,
            };
            self.cache.store(key, bin.clone(), region);
        }
        Ok(schedule)
    }

    /// Request a Z slice range, capped at the given quality layer.
    pub fn request_slice_range(
        &mut self,
        z_range: std::ops::Range<u32>,
        quality: u16,
    ) -> Result<BinSchedule> {
        let session = self.session_id()?;
        if z_range.is_empty() {
            return Err(J3kError::InvalidRegion("empty slice range".into()));
        }
        let bounds = self.transport.volume_bounds(session)?;
        let region = Region::new(
            bounds.x0,
            bounds.x1,
            bounds.y0,
            bounds.y1,
            z_range.start.min(bounds.z1),
            z_range.end.min(bounds.z1),
        );
        self.request_region_with_quality(region, Some(quality))
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::{Encoder, EncoderConfig};
    use crate::jpip::server::ServerConfig;
    use crate::tiling::TilingConfig;
    use crate::volume::Volume;

    fn make_server() -> Arc<JpipServer> {
        let mut data = Vec::new();
        for z in 0..8u32 {
            for y in 0..16u32 {
                for x in 0..16u32 {
                    data.push(((x + y + z) % 256) as u8);
                }
            }
        }
        let vol = Volume::monochrome(16, 16, 8, data).unwrap();
        let bytes = Encoder::new(
            EncoderConfig::default()
                .with_tiling(TilingConfig::new(8, 8, 4))
                .with_levels((1, 1, 1)),
        )
        .encode(&vol)
        .unwrap()
        .bytes;
        let server = Arc::new(JpipServer::new(ServerConfig::default()));
        server.register_volume("ct", bytes).unwrap();
        server.start().unwrap();
        server
    }

    fn make_client() -> JpipClient {
        JpipClient::new(Arc::new(LoopbackTransport::new(make_server())))
    }

    #[test]
    fn test_session_requires_connection() {
        let mut client = make_client();
        assert!(matches!(
            client.create_session("ct"),
            Err(J3kError::NotConnected)
        ));
        client.connect().unwrap();
        assert_eq!(client.state(), ClientState::Connected);
        let id = client.create_session("ct").unwrap();
        assert_eq!(client.state(), ClientState::InSession(id));
    }

    #[test]
    fn test_request_requires_session() {
        let mut client = make_client();
        client.connect().unwrap();
        assert!(matches!(
            client.request_region(Region::from_size(0, 0, 0, 8, 8, 4)),
            Err(J3kError::NoSession)
        ));
    }

    #[test]
    fn test_request_populates_cache() {
        let mut client = make_client();
        client.connect().unwrap();
        client.create_session("ct").unwrap();
        let schedule = client
            .request_region(Region::from_size(0, 0, 0, 8, 8, 4))
            .unwrap();
        assert!(!schedule.bins.is_empty());
        assert!(client.cache().stats().entry_count > 0);
        assert_eq!(client.in_flight_count(), 0);
    }

    #[test]
    fn test_slice_range_request() {
        let mut client = make_client();
        client.connect().unwrap();
        client.create_session("ct").unwrap();
        let schedule = client.request_slice_range(0..4, 0).unwrap();
        assert!(!schedule.bins.is_empty());
        // Only the front Z slab's tiles are scheduled.
        assert!(schedule.bins.iter().all(|b| b.tile.2 == 0));
    }

    #[test]
    fn test_viewport_update_cancels_disjoint() {
        let mut client = make_client();
        client.connect().unwrap();
        client.create_session("ct").unwrap();
        // Plant a fake in-flight request, then move the viewport away.
        let cancel = CancelToken::new();
        client
            .in_flight
            .lock()
            .unwrap()
            .push(InFlight {
                region: Region::from_size(0, 0, 0, 8, 8, 4),
                cancel: cancel.clone(),
            });
        client.update_viewport(Viewport::covering(Region::from_size(8, 8, 4, 8, 8, 4)));
        assert!(cancel.is_cancelled());
        assert_eq!(client.in_flight_count(), 0);
    }

    #[test]
    fn test_disconnect_clears_session() {
        let mut client = make_client();
        client.connect().unwrap();
        client.create_session("ct").unwrap();
        client
            .request_region(Region::from_size(0, 0, 0, 8, 8, 4))
            .unwrap();
        client.disconnect();
        assert_eq!(client.state(), ClientState::Disconnected);
        assert_eq!(client.cache().stats().entry_count, 0);
        assert!(matches!(
            client.request_region(Region::from_size(0, 0, 0, 4, 4, 4)),
            Err(J3kError::NotConnected)
        ));
    }

    #[test]
    fn test_empty_region_rejected() {
        let mut client = make_client();
        client.connect().unwrap();
        client.create_session("ct").unwrap();
        assert!(matches!(
            client.request_region(Region::default()),
            Err(J3kError::InvalidRegion(_))
        ));
        assert!(matches!(
            client.request_slice_range(4..4, 0),
            Err(J3kError::InvalidRegion(_))
        ));
    }
}
