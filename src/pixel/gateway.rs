//! Raw pixels through a session-holding pixel gateway.
//!
//! OMERO ships no HTTP service with these endpoints. They are the contract a
//! gateway deployed next to the server (for example one bridging to the
//! Blitz raw pixels store) has to implement. Relative to the gateway base
//! URI:
//!
//! ```text
//! GET    {gateway}/                                      availability probe
//! POST   {gateway}/pixels/{imageId}/sessions             → {"session": token}
//! GET    {gateway}/pixels/sessions/{token}/tile?z=&c=&t=&x=&y=&w=&h=&resolution=
//!                                                        → raw big-endian samples
//! DELETE {gateway}/pixels/sessions/{token}               release
//! ```
//!
//! The server keeps a pixel buffer open for the lifetime of the session, so
//! readers must be closed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use crate::entity::{Image, PixelType};
use crate::error::ClientError;
use crate::format::tiff::ByteOrder;
use crate::io::Transport;
use crate::tile::TileRequest;

use super::decode::{PixelBuffer, TileImage};
use super::{backend_level, ensure_readable, PixelApi, PixelApiKind, PixelApiReader};

// =============================================================================
// GatewayApi
// =============================================================================

pub struct GatewayApi<T: Transport> {
    transport: Arc<T>,
    base: Url,
    available: bool,
}

impl<T: Transport + 'static> GatewayApi<T> {
    /// Build the API for the gateway at `base`, probing it once.
    pub async fn probe(transport: Arc<T>, base: Url) -> Self {
        let available = match transport.get_bytes(&base).await {
            Ok(_) => {
                info!("Pixel gateway available at {}", base);
                true
            }
            Err(e) => {
                debug!("Pixel gateway not available at {}: {}", base, e);
                false
            }
        };
        Self {
            transport,
            base,
            available,
        }
    }

    /// Build the API without probing.
    pub fn with_availability(transport: Arc<T>, base: Url, available: bool) -> Self {
        Self {
            transport,
            base,
            available,
        }
    }
}

#[async_trait]
impl<T: Transport + 'static> PixelApi for GatewayApi<T> {
    fn kind(&self) -> PixelApiKind {
        PixelApiKind::Gateway
    }

    fn is_available(&self) -> bool {
        self.available
    }

    fn can_read_image(&self, pixel_type: PixelType, channel_count: usize) -> bool {
        pixel_type.is_decodable() && channel_count > 0
    }

    async fn create_reader(&self, image: &Image) -> Result<Box<dyn PixelApiReader>, ClientError> {
        let reader = GatewayReader::open(self.transport.clone(), self.base.clone(), image).await?;
        Ok(Box::new(reader))
    }
}

// =============================================================================
// GatewayReader
// =============================================================================

/// Reads raw tiles of one image through a gateway pixel session.
pub struct GatewayReader<T: Transport> {
    transport: Arc<T>,
    session_uri: Url,
    tile_uri: Url,
    image_id: i64,
    pixel_type: PixelType,
    channel_count: usize,
    level_count: u32,
    closed: AtomicBool,
}

impl<T: Transport> GatewayReader<T> {
    /// Open a pixel session for `image` on the gateway at `base`.
    pub async fn open(transport: Arc<T>, base: Url, image: &Image) -> Result<Self, ClientError> {
        let pixel_type = ensure_readable(PixelApiKind::Gateway, image, |pixel_type, channels| {
            pixel_type.is_decodable() && channels > 0
        })?;

        let open_uri = base.join(&format!("pixels/{}/sessions", image.id))?;
        let body = transport.post_form(&open_uri, &[]).await?;
        let json: Value = serde_json::from_slice(&body)?;
        let token = json
            .get("session")
            .and_then(Value::as_str)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| ClientError::Decode("gateway returned no session token".to_string()))?;

        let session_uri = base.join(&format!("pixels/sessions/{}", token))?;
        let tile_uri = base.join(&format!("pixels/sessions/{}/tile", token))?;
        debug!("Opened gateway pixel session for image {}", image.id);

        Ok(Self {
            transport,
            session_uri,
            tile_uri,
            image_id: image.id,
            pixel_type,
            channel_count: image.channel_count(),
            level_count: image.dimensions.resolution_levels.max(1),
            closed: AtomicBool::new(false),
        })
    }

    fn channel_uri(&self, request: &TileRequest, channel: usize, level: u32) -> Url {
        let mut url = self.tile_uri.clone();
        url.query_pairs_mut()
            .append_pair("z", &request.z.to_string())
            .append_pair("c", &channel.to_string())
            .append_pair("t", &request.t.to_string())
            .append_pair("x", &request.x.to_string())
            .append_pair("y", &request.y.to_string())
            .append_pair("w", &request.width.to_string())
            .append_pair("h", &request.height.to_string())
            .append_pair("resolution", &level.to_string());
        url
    }

    async fn read_channel(&self, url: Url, samples: usize) -> Result<PixelBuffer, ClientError> {
        let body = self.transport.get_bytes(&url).await?;
        PixelBuffer::decode(&body, self.pixel_type, ByteOrder::BigEndian, samples)
    }
}

#[async_trait]
impl<T: Transport + 'static> PixelApiReader for GatewayReader<T> {
    async fn read_tile(&self, request: &TileRequest) -> Result<TileImage, ClientError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::Closed);
        }
        debug!("Reading tile {} from pixel gateway", request);

        let level = backend_level(PixelApiKind::Gateway, request, self.level_count)?;
        let urls: Vec<Url> = (0..self.channel_count)
            .map(|channel| self.channel_uri(request, channel, level))
            .collect();

        let samples = request.pixel_count();
        let results = join_all(urls.into_iter().map(|url| self.read_channel(url, samples))).await;

        let planes = results
            .into_iter()
            .enumerate()
            .map(|(channel, result)| {
                result.map_err(|e| ClientError::Io(format!("channel {}: {}", channel, e)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        TileImage::compose(request.width, request.height, planes)
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        match self.transport.delete(&self.session_uri).await {
            Ok(()) => debug!("Released gateway pixel session for image {}", self.image_id),
            Err(e) => warn!(
                "Failed to release gateway pixel session for image {}: {}",
                self.image_id, e
            ),
        }
    }

    fn kind(&self) -> PixelApiKind {
        PixelApiKind::Gateway
    }

    fn description(&self) -> String {
        format!("Gateway reader for image {} ({})", self.image_id, self.session_uri)
    }
}
