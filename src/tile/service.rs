//! Tile service for one opened image, and the thumbnail cache.
//!
//! ```text
//! get_tile(request)
//!   1. Closed?            → ClientError::Closed
//!   2. Cache hit?         → cached tile
//!   3. Fetch in flight?   → attach to it
//!   4. Read through the reader (one request per channel), cache, return
//! ```

use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::ClientError;
use crate::pixel::{PixelApiKind, PixelApiReader, TileImage};

use super::cache::{
    CacheStats, TileCache, DEFAULT_THUMBNAIL_CACHE_BYTES, DEFAULT_THUMBNAIL_CACHE_ENTRIES,
};
use super::TileRequest;

/// Reads retried after a shared fill was abandoned by a closed service
const MAX_SHARED_FILL_RETRIES: usize = 3;

// =============================================================================
// Tile Response
// =============================================================================

/// A tile and where it came from.
#[derive(Debug, Clone)]
pub struct TileResponse {
    pub tile: Arc<TileImage>,

    /// Whether this tile was served from cache
    pub cache_hit: bool,
}

// =============================================================================
// Tile Service
// =============================================================================

/// Serves tiles of one opened image through its pixel reader, fronted by a
/// tile cache shared with the rest of the client.
///
/// After [`close`](Self::close), requests fail with `Closed` and reads that
/// were in flight are discarded instead of being cached.
pub struct TileService {
    reader: Arc<dyn PixelApiReader>,
    cache: Arc<TileCache<TileRequest, Arc<TileImage>>>,
    cancel: CancellationToken,
}

impl TileService {
    pub fn new(
        reader: Box<dyn PixelApiReader>,
        cache: Arc<TileCache<TileRequest, Arc<TileImage>>>,
    ) -> Self {
        Self::with_cancellation(reader, cache, CancellationToken::new())
    }

    /// Create a service that also stops when `cancel` is cancelled.
    pub fn with_cancellation(
        reader: Box<dyn PixelApiReader>,
        cache: Arc<TileCache<TileRequest, Arc<TileImage>>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            reader: Arc::from(reader),
            cache,
            cancel,
        }
    }

    /// Get a tile, using the cache when possible.
    pub async fn get_tile(&self, request: &TileRequest) -> Result<TileResponse, ClientError> {
        if self.cancel.is_cancelled() {
            return Err(ClientError::Closed);
        }

        if let Some(tile) = self.cache.get(request).await {
            return Ok(TileResponse {
                tile,
                cache_hit: true,
            });
        }

        // A shared fill led by another service fails with `Closed` when that
        // service closes; it is read again here unless this one is closed too.
        let mut attempts = 0;
        loop {
            let reader = &self.reader;
            let cancel = &self.cancel;
            let result = self
                .cache
                .fetch_missing(*request, || async move {
                    let tile = tokio::select! {
                        _ = cancel.cancelled() => return Err(ClientError::Closed),
                        result = reader.read_tile(request) => result?,
                    };
                    if cancel.is_cancelled() {
                        return Err(ClientError::Closed);
                    }
                    Ok(Arc::new(tile))
                })
                .await;

            match result {
                Err(ClientError::Closed)
                    if !self.cancel.is_cancelled() && attempts < MAX_SHARED_FILL_RETRIES =>
                {
                    attempts += 1;
                    debug!("Shared read of tile {} was closed, reading again", request);
                }
                result => {
                    return Ok(TileResponse {
                        tile: result?,
                        cache_hit: false,
                    })
                }
            }
        }
    }

    /// Stop serving tiles and release the reader. Idempotent.
    pub async fn close(&self) {
        // The token may already be cancelled by the client; the reader still
        // needs releasing, and reader close is idempotent.
        self.cancel.cancel();
        self.reader.close().await;
        debug!("Closed tile service ({})", self.reader.description());
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn api(&self) -> PixelApiKind {
        self.reader.kind()
    }

    pub fn description(&self) -> String {
        self.reader.description()
    }

    pub fn cache(&self) -> &Arc<TileCache<TileRequest, Arc<TileImage>>> {
        &self.cache
    }
}

// =============================================================================
// Thumbnail Cache
// =============================================================================

/// Decoded thumbnails keyed by image id and maximum size.
pub struct ThumbnailCache {
    cache: TileCache<(i64, u32), Arc<TileImage>>,
}

impl ThumbnailCache {
    /// Create a cache holding at most `max_entries` thumbnails and
    /// `max_bytes` bytes of decoded samples.
    pub fn new(max_entries: usize, max_bytes: usize) -> Self {
        Self {
            cache: TileCache::new(max_entries, max_bytes),
        }
    }

    /// Return the cached thumbnail or fetch it once.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        image_id: i64,
        max_size: u32,
        fetch: F,
    ) -> Result<Arc<TileImage>, ClientError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<TileImage, ClientError>>,
    {
        self.cache
            .get_or_fetch((image_id, max_size), || async move { fetch().await.map(Arc::new) })
            .await
    }

    pub async fn contains(&self, image_id: i64, max_size: u32) -> bool {
        self.cache.contains(&(image_id, max_size)).await
    }

    pub async fn clear(&self) {
        self.cache.clear().await;
    }

    pub async fn stats(&self) -> CacheStats {
        self.cache.stats().await
    }

    /// Number of thumbnails actually fetched.
    pub fn fetches(&self) -> u64 {
        self.cache.fetches()
    }
}

impl Default for ThumbnailCache {
    fn default() -> Self {
        Self::new(DEFAULT_THUMBNAIL_CACHE_ENTRIES, DEFAULT_THUMBNAIL_CACHE_BYTES)
    }
}
