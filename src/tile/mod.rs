//! Tile and thumbnail caching.
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │              ImageSession               │
//! └────────────────────┬────────────────────┘
//!                      │ TileRequest
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │              TileService                │
//! │  ┌──────────────┐  ┌─────────────────┐  │
//! │  │  TileCache   │  │ PixelApiReader  │  │
//! │  │  (decoded    │  │ (one fetch per  │  │
//! │  │   tiles)     │  │   channel)      │  │
//! │  └──────────────┘  └─────────────────┘  │
//! └─────────────────────────────────────────┘
//! ```
//!
//! - [`TileService`]: serves tiles of one opened image through its reader
//! - [`TileCache`]: bounded LRU cache with single-flight fills
//! - [`ThumbnailCache`]: thumbnails keyed by image id and size
//! - [`TileRequest`]: identifies a tile, also the tile cache key

mod cache;
mod service;

pub use cache::{
    CacheEntry, CacheStats, TileCache, Weighted, DEFAULT_THUMBNAIL_CACHE_BYTES,
    DEFAULT_THUMBNAIL_CACHE_ENTRIES, DEFAULT_TILE_CACHE_BYTES, DEFAULT_TILE_CACHE_ENTRIES,
};
pub use service::{ThumbnailCache, TileResponse, TileService};

/// A rectangular region of one plane at one resolution level.
///
/// Coordinates are in pixels of the requested level; level 0 is the full
/// resolution image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileRequest {
    pub image_id: i64,
    pub level: u32,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub z: u32,
    pub t: u32,
}

impl TileRequest {
    /// Request a tile of the first plane (z = 0, t = 0).
    pub fn new(image_id: i64, level: u32, x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            image_id,
            level,
            x,
            y,
            width,
            height,
            z: 0,
            t: 0,
        }
    }

    /// Same region on another plane.
    pub fn at_plane(self, z: u32, t: u32) -> Self {
        Self { z, t, ..self }
    }

    /// Number of samples per channel.
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

impl std::fmt::Display for TileRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "image {} level {} [{}, {}, {}x{}] z={} t={}",
            self.image_id, self.level, self.x, self.y, self.width, self.height, self.z, self.t
        )
    }
}
