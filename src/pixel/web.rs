//! Rendered JPEG regions from the OMERO webgateway.
//!
//! The webgateway renders images server-side, so only 8-bit RGB images can
//! be read faithfully and sample values are lossy.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use url::Url;

use crate::entity::{Image, PixelType};
use crate::error::ClientError;
use crate::io::Transport;
use crate::tile::TileRequest;

use super::decode::TileImage;
use super::{backend_level, ensure_readable, PixelApi, PixelApiKind, PixelApiReader};

/// Default JPEG quality (1-100).
pub const DEFAULT_JPEG_QUALITY: u8 = 90;

/// Minimum allowed JPEG quality.
pub const MIN_JPEG_QUALITY: u8 = 1;

/// Maximum allowed JPEG quality.
pub const MAX_JPEG_QUALITY: u8 = 100;

/// Check if a quality value is within the valid range.
#[inline]
pub const fn is_valid_quality(quality: u8) -> bool {
    quality >= MIN_JPEG_QUALITY && quality <= MAX_JPEG_QUALITY
}

/// Clamp a quality value to the valid range.
#[inline]
pub fn clamp_quality(quality: u8) -> u8 {
    quality.clamp(MIN_JPEG_QUALITY, MAX_JPEG_QUALITY)
}

// =============================================================================
// WebApi
// =============================================================================

/// The webgateway rendering API. Always available.
pub struct WebApi<T: Transport> {
    transport: Arc<T>,
    quality: u8,
}

impl<T: Transport + 'static> WebApi<T> {
    pub fn new(transport: Arc<T>, quality: u8) -> Self {
        Self {
            transport,
            quality: clamp_quality(quality),
        }
    }

    fn readable(pixel_type: PixelType, channel_count: usize) -> bool {
        pixel_type == PixelType::Uint8 && channel_count == 3
    }
}

#[async_trait]
impl<T: Transport + 'static> PixelApi for WebApi<T> {
    fn kind(&self) -> PixelApiKind {
        PixelApiKind::Web
    }

    fn is_available(&self) -> bool {
        true
    }

    fn can_read_image(&self, pixel_type: PixelType, channel_count: usize) -> bool {
        Self::readable(pixel_type, channel_count)
    }

    async fn create_reader(&self, image: &Image) -> Result<Box<dyn PixelApiReader>, ClientError> {
        Ok(Box::new(WebReader::new(self.transport.clone(), image, self.quality)?))
    }
}

// =============================================================================
// WebReader
// =============================================================================

/// Reads JPEG-rendered tiles of one image.
pub struct WebReader<T: Transport> {
    transport: Arc<T>,
    image_id: i64,
    level_count: u32,
    tile_size: Option<(u32, u32)>,
    quality: u8,
    closed: AtomicBool,
}

/// Part of a rendered server tile that makes up the requested region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Crop {
    x: u32,
    y: u32,
    width: u32,
    height: u32,
}

impl<T: Transport> WebReader<T> {
    /// Create a reader; fails with `UnsupportedApi` unless the image is
    /// 8-bit RGB.
    pub fn new(transport: Arc<T>, image: &Image, quality: u8) -> Result<Self, ClientError> {
        ensure_readable(PixelApiKind::Web, image, |pixel_type, channels| {
            pixel_type == PixelType::Uint8 && channels == 3
        })?;
        debug!("Created web reader for image {}", image.id);

        Ok(Self {
            transport,
            image_id: image.id,
            level_count: image.dimensions.resolution_levels.max(1),
            tile_size: image.dimensions.tile_size,
            quality: clamp_quality(quality),
            closed: AtomicBool::new(false),
        })
    }

    /// URI of the rendered region for `request`.
    ///
    /// Flat images are addressed by pixel region. Pyramidal images are
    /// addressed by their index in the server's tile grid; the returned crop
    /// selects the request inside that grid tile. Without a reported grid,
    /// the request size is taken as the grid.
    fn region_uri(&self, request: &TileRequest) -> Result<(Url, Option<Crop>), ClientError> {
        let mut url = self.transport.resolve(&format!(
            "webgateway/render_image_region/{}/{}/{}/",
            self.image_id, request.z, request.t
        ))?;
        let level = backend_level(PixelApiKind::Web, request, self.level_count)?;

        let (selector, crop) = if self.level_count > 1 {
            let (grid_width, grid_height) =
                self.tile_size.unwrap_or((request.width, request.height));
            if request.width == 0 || request.height == 0 || grid_width == 0 || grid_height == 0 {
                return Err(ClientError::Io(format!("tile {} is empty", request)));
            }

            let crop = Crop {
                x: request.x % grid_width,
                y: request.y % grid_height,
                width: request.width,
                height: request.height,
            };
            if crop.x + crop.width > grid_width || crop.y + crop.height > grid_height {
                return Err(ClientError::Io(format!(
                    "tile {} spans several {}x{} server tiles",
                    request, grid_width, grid_height
                )));
            }
            (
                (
                    "tile",
                    format!(
                        "{},{},{},{},{}",
                        level,
                        request.x / grid_width,
                        request.y / grid_height,
                        grid_width,
                        grid_height
                    ),
                ),
                Some(crop),
            )
        } else {
            (
                (
                    "region",
                    format!("{},{},{},{}", request.x, request.y, request.width, request.height),
                ),
                None,
            )
        };

        url.query_pairs_mut()
            .append_pair(selector.0, &selector.1)
            .append_pair("format", "jpeg")
            .append_pair("q", &format!("{:.2}", self.quality as f32 / 100.0));
        Ok((url, crop))
    }
}

#[async_trait]
impl<T: Transport + 'static> PixelApiReader for WebReader<T> {
    async fn read_tile(&self, request: &TileRequest) -> Result<TileImage, ClientError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::Closed);
        }
        debug!("Reading tile {} from web API", request);

        let (url, crop) = self.region_uri(request)?;
        let body = self.transport.get_bytes(&url).await?;
        let rendered = image::load_from_memory_with_format(&body, image::ImageFormat::Jpeg)?
            .to_rgb8();

        let rendered = match crop {
            Some(crop)
                if (crop.x, crop.y, crop.width, crop.height)
                    != (0, 0, rendered.width(), rendered.height()) =>
            {
                if crop.x + crop.width > rendered.width() || crop.y + crop.height > rendered.height()
                {
                    return Err(ClientError::Io(format!(
                        "server tile of {}x{} does not cover tile {}",
                        rendered.width(),
                        rendered.height(),
                        request
                    )));
                }
                image::imageops::crop_imm(&rendered, crop.x, crop.y, crop.width, crop.height)
                    .to_image()
            }
            _ => rendered,
        };
        Ok(TileImage::from_rgb8(rendered))
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn kind(&self) -> PixelApiKind {
        PixelApiKind::Web
    }

    fn description(&self) -> String {
        format!(
            "Web reader for image {} of {}",
            self.image_id,
            self.transport.base_uri()
        )
    }
}
