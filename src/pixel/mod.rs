//! Pixel access abstraction.
//!
//! OMERO exposes pixels through several protocols with different
//! capabilities. Each one is described by a [`PixelApi`], and an opened
//! image is read through the [`PixelApiReader`] it creates:
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │            PixelApiRegistry             │
//! │  (availability + capability matching)   │
//! └────────────────────┬────────────────────┘
//!                      │ select(image)
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │         PixelApiReader Trait            │
//! │      read_tile / close / describe       │
//! └────────────────────┬────────────────────┘
//!          ┌───────────┼────────────┐
//!          ▼           ▼            ▼
//! ┌──────────────┐ ┌──────────┐ ┌──────────┐
//! │GatewayReader │ │MsPixel-  │ │WebReader │
//! │ (raw, BE)    │ │BufferRdr │ │ (JPEG)   │
//! └──────────────┘ └──────────┘ └──────────┘
//! ```
//!
//! Preference order is gateway, pixel buffer microservice, then web API.
//! Incompatible images are rejected when the reader is selected, never at
//! read time.

mod decode;
mod gateway;
mod level;
mod ms_buffer;
mod registry;
mod web;

use std::fmt;

use async_trait::async_trait;

use crate::entity::{Image, PixelType};
use crate::error::ClientError;
use crate::tile::TileRequest;

pub use decode::{BandStats, PixelBuffer, TileImage};
pub use gateway::{GatewayApi, GatewayReader};
pub use level::LevelMapping;
pub use ms_buffer::{MsPixelBufferApi, MsPixelBufferReader, DEFAULT_MS_PIXEL_BUFFER_PORT};
pub use registry::{PixelApiOptions, PixelApiRegistry};
pub use web::{
    clamp_quality, is_valid_quality, WebApi, WebReader, DEFAULT_JPEG_QUALITY, MAX_JPEG_QUALITY,
    MIN_JPEG_QUALITY,
};

// =============================================================================
// PixelApiKind
// =============================================================================

/// The pixel protocols known to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelApiKind {
    /// Rendered JPEG regions from the webgateway
    Web,
    /// The OMERO pixel buffer microservice
    MsPixelBuffer,
    /// A session-holding pixel gateway
    Gateway,
}

impl PixelApiKind {
    /// All kinds, in preference order.
    pub const ALL: [PixelApiKind; 3] = [
        PixelApiKind::Gateway,
        PixelApiKind::MsPixelBuffer,
        PixelApiKind::Web,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            PixelApiKind::Web => "Web",
            PixelApiKind::MsPixelBuffer => "Pixel Buffer Microservice",
            PixelApiKind::Gateway => "Gateway",
        }
    }

    /// Whether readers of this kind return the stored sample values.
    pub const fn can_access_raw_pixels(self) -> bool {
        !matches!(self, PixelApiKind::Web)
    }

    /// How this backend numbers resolution levels.
    pub const fn level_mapping(self) -> LevelMapping {
        match self {
            // The webgateway reverses `tile=` levels itself
            PixelApiKind::Web => LevelMapping::Identity,
            PixelApiKind::MsPixelBuffer | PixelApiKind::Gateway => LevelMapping::Reversed,
        }
    }

    /// Position in the preference order (lower is preferred).
    pub fn preference(self) -> usize {
        Self::ALL.iter().position(|k| *k == self).unwrap_or(usize::MAX)
    }
}

impl fmt::Display for PixelApiKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for PixelApiKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "web" => Ok(PixelApiKind::Web),
            "ms" | "ms-pixel-buffer" | "mspixelbuffer" | "pixel-buffer" => {
                Ok(PixelApiKind::MsPixelBuffer)
            }
            "gateway" | "ice" => Ok(PixelApiKind::Gateway),
            other => Err(format!(
                "unknown pixel API '{}' (expected web, ms-pixel-buffer or gateway)",
                other
            )),
        }
    }
}

// =============================================================================
// Traits
// =============================================================================

/// A pixel protocol: what it can read and how to open a reader.
#[async_trait]
pub trait PixelApi: Send + Sync {
    fn kind(&self) -> PixelApiKind;

    /// Whether the backend answered when the registry was built.
    fn is_available(&self) -> bool;

    /// Whether images of this pixel type and channel count can be read.
    fn can_read_image(&self, pixel_type: PixelType, channel_count: usize) -> bool;

    /// Open a reader bound to `image`.
    ///
    /// # Errors
    /// `UnsupportedApi` if the image cannot be read by this API, or the
    /// error of any remote call needed to set the reader up.
    async fn create_reader(&self, image: &Image) -> Result<Box<dyn PixelApiReader>, ClientError>;

    fn name(&self) -> &'static str {
        self.kind().name()
    }

    fn can_access_raw_pixels(&self) -> bool {
        self.kind().can_access_raw_pixels()
    }

    /// Capability check against a full image.
    fn supports(&self, image: &Image) -> bool {
        image
            .pixel_type
            .is_some_and(|pixel_type| self.can_read_image(pixel_type, image.channel_count()))
    }
}

/// Reads tiles of one opened image.
///
/// Readers hold remote resources for session-holding backends; call
/// [`close`](PixelApiReader::close) when done. Closing is idempotent and
/// reads after close fail with [`ClientError::Closed`].
#[async_trait]
pub trait PixelApiReader: Send + Sync {
    async fn read_tile(&self, request: &TileRequest) -> Result<TileImage, ClientError>;

    async fn close(&self);

    fn kind(&self) -> PixelApiKind;

    /// Human-readable description for logs.
    fn description(&self) -> String;
}

/// Check a reader's construction-time preconditions.
pub(crate) fn ensure_readable(
    kind: PixelApiKind,
    image: &Image,
    can_read: impl Fn(PixelType, usize) -> bool,
) -> Result<PixelType, ClientError> {
    let pixel_type = image.pixel_type.ok_or_else(|| ClientError::UnsupportedApi {
        api: kind.name().to_string(),
        reason: format!("pixel type of image {} is unknown", image.id),
    })?;
    let channels = image.channel_count();
    if !can_read(pixel_type, channels) {
        return Err(ClientError::UnsupportedApi {
            api: kind.name().to_string(),
            reason: format!("cannot read {} images with {} channel(s)", pixel_type, channels),
        });
    }
    Ok(pixel_type)
}

/// Translate the request level into backend numbering, or fail the read.
pub(crate) fn backend_level(
    kind: PixelApiKind,
    request: &TileRequest,
    level_count: u32,
) -> Result<u32, ClientError> {
    kind.level_mapping()
        .to_backend(request.level, level_count)
        .ok_or_else(|| {
            ClientError::Io(format!(
                "resolution level {} out of range (image has {})",
                request.level, level_count
            ))
        })
}
