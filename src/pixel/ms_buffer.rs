//! Raw pixels from the OMERO pixel buffer microservice.
//!
//! The microservice serves one plane of one channel per request, as an
//! uncompressed TIFF. A tile is assembled from one concurrent request per
//! channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, info};
use url::Url;

use crate::entity::{Image, PixelType};
use crate::error::ClientError;
use crate::format::tiff::Raster;
use crate::io::Transport;
use crate::tile::TileRequest;

use super::decode::{PixelBuffer, TileImage};
use super::{backend_level, ensure_readable, PixelApi, PixelApiKind, PixelApiReader};

/// Port the microservice listens on by default.
pub const DEFAULT_MS_PIXEL_BUFFER_PORT: u16 = 8082;

// =============================================================================
// MsPixelBufferApi
// =============================================================================

/// The pixel buffer microservice, reachable on its own port of the server.
pub struct MsPixelBufferApi<T: Transport> {
    transport: Arc<T>,
    host: Url,
    available: bool,
}

impl<T: Transport + 'static> MsPixelBufferApi<T> {
    /// Build the API for the microservice on `port` of the web server host,
    /// probing it once.
    pub async fn probe(transport: Arc<T>, port: u16) -> Result<Self, ClientError> {
        let mut host = transport.base_uri().clone();
        host.set_port(Some(port))
            .map_err(|_| ClientError::InvalidUri(format!("cannot set port on {}", host)))?;
        host.set_path("/");
        Ok(Self::probe_host(transport, host).await)
    }

    /// Build the API for the microservice at `host`, probing it once.
    pub async fn probe_host(transport: Arc<T>, host: Url) -> Self {
        let available = match transport.get_bytes(&host).await {
            Ok(_) => true,
            Err(e) => {
                debug!("Pixel buffer microservice not available at {}: {}", host, e);
                false
            }
        };
        if available {
            info!("Pixel buffer microservice available at {}", host);
        }
        Self {
            transport,
            host,
            available,
        }
    }

    /// Build the API without probing.
    pub fn with_availability(transport: Arc<T>, host: Url, available: bool) -> Self {
        Self {
            transport,
            host,
            available,
        }
    }

    pub fn host(&self) -> &Url {
        &self.host
    }
}

#[async_trait]
impl<T: Transport + 'static> PixelApi for MsPixelBufferApi<T> {
    fn kind(&self) -> PixelApiKind {
        PixelApiKind::MsPixelBuffer
    }

    fn is_available(&self) -> bool {
        self.available
    }

    fn can_read_image(&self, pixel_type: PixelType, channel_count: usize) -> bool {
        pixel_type.is_decodable() && channel_count > 0
    }

    async fn create_reader(&self, image: &Image) -> Result<Box<dyn PixelApiReader>, ClientError> {
        Ok(Box::new(MsPixelBufferReader::new(
            self.transport.clone(),
            self.host.clone(),
            image,
        )?))
    }
}

// =============================================================================
// MsPixelBufferReader
// =============================================================================

/// Reads raw tiles of one image from the microservice.
pub struct MsPixelBufferReader<T: Transport> {
    transport: Arc<T>,
    host: Url,
    image_id: i64,
    pixel_type: PixelType,
    channel_count: usize,
    level_count: u32,
    closed: AtomicBool,
}

impl<T: Transport> MsPixelBufferReader<T> {
    pub fn new(transport: Arc<T>, host: Url, image: &Image) -> Result<Self, ClientError> {
        let pixel_type = ensure_readable(PixelApiKind::MsPixelBuffer, image, |pixel_type, channels| {
            pixel_type.is_decodable() && channels > 0
        })?;
        debug!("Created pixel buffer microservice reader for {}", host);

        Ok(Self {
            transport,
            host,
            image_id: image.id,
            pixel_type,
            channel_count: image.channel_count(),
            level_count: image.dimensions.resolution_levels.max(1),
            closed: AtomicBool::new(false),
        })
    }

    fn channel_uri(&self, request: &TileRequest, channel: usize, level: u32) -> Result<Url, ClientError> {
        let mut url = self.host.join(&format!(
            "tile/{}/{}/{}/{}",
            self.image_id, request.z, channel, request.t
        ))?;
        url.query_pairs_mut()
            .append_pair("x", &request.x.to_string())
            .append_pair("y", &request.y.to_string())
            .append_pair("w", &request.width.to_string())
            .append_pair("h", &request.height.to_string())
            .append_pair("format", "tif")
            .append_pair("resolution", &level.to_string());
        Ok(url)
    }

    async fn read_channel(&self, url: Url) -> Result<(u32, u32, PixelBuffer), ClientError> {
        let body = self.transport.get_bytes(&url).await?;
        let raster = Raster::decode(&body)?;

        if raster.samples_per_pixel != 1 {
            return Err(ClientError::Decode(format!(
                "expected a single-channel plane, got {} samples per pixel",
                raster.samples_per_pixel
            )));
        }
        if raster.pixel_type() != Some(self.pixel_type) {
            return Err(ClientError::Decode(format!(
                "expected {} samples, got {} bits ({:?})",
                self.pixel_type, raster.bits_per_sample, raster.sample_format
            )));
        }

        let samples = raster.width as usize * raster.height as usize;
        let buffer = PixelBuffer::decode(&raster.data, self.pixel_type, raster.byte_order, samples)?;
        Ok((raster.width, raster.height, buffer))
    }
}

#[async_trait]
impl<T: Transport + 'static> PixelApiReader for MsPixelBufferReader<T> {
    async fn read_tile(&self, request: &TileRequest) -> Result<TileImage, ClientError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::Closed);
        }
        debug!("Reading tile {} from pixel buffer microservice API", request);

        let level = backend_level(PixelApiKind::MsPixelBuffer, request, self.level_count)?;
        let urls = (0..self.channel_count)
            .map(|channel| self.channel_uri(request, channel, level))
            .collect::<Result<Vec<_>, _>>()?;

        // Every channel request runs to completion; the first failure wins
        let results = join_all(urls.into_iter().map(|url| self.read_channel(url))).await;

        let mut dimensions = None;
        let mut planes = Vec::with_capacity(results.len());
        for (channel, result) in results.into_iter().enumerate() {
            let (width, height, plane) =
                result.map_err(|e| ClientError::Io(format!("channel {}: {}", channel, e)))?;
            match dimensions {
                None => dimensions = Some((width, height)),
                Some(expected) if expected != (width, height) => {
                    return Err(ClientError::Decode(format!(
                        "channel {} is {}x{}, channel 0 is {}x{}",
                        channel, width, height, expected.0, expected.1
                    )));
                }
                Some(_) => {}
            }
            planes.push(plane);
        }

        let (width, height) = dimensions.unwrap_or((request.width, request.height));
        TileImage::compose(width, height, planes)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn kind(&self) -> PixelApiKind {
        PixelApiKind::MsPixelBuffer
    }

    fn description(&self) -> String {
        format!(
            "Pixel buffer microservice reader for image {} of {}",
            self.image_id, self.host
        )
    }
}
