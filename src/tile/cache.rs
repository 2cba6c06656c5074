//! Bounded LRU cache with single-flight fills.
//!
//! Used for decoded tiles (keyed by [`TileRequest`](super::TileRequest)) and
//! for thumbnails (keyed by image id and size).
//!
//! # Bounds
//!
//! The cache is bounded both by entry count and by the total weight (bytes)
//! of its values. Inserting past either bound evicts least-recently-used
//! entries until both hold again. A value heavier than the byte bound is
//! never retained.
//!
//! # Freshness
//!
//! Every insertion is stamped with a token from a monotonically increasing
//! counter. [`TileCache::clear`] advances the cache epoch so that fills
//! started before the clear are dropped instead of repopulating the cache.

use std::future::Future;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use lru::LruCache;
use tokio::sync::Mutex;

use crate::error::ClientError;
use crate::flight::SingleFlight;
use crate::pixel::TileImage;

/// Default maximum number of cached tiles
pub const DEFAULT_TILE_CACHE_ENTRIES: usize = 1000;

/// Default maximum total size of cached tiles: 256MB
pub const DEFAULT_TILE_CACHE_BYTES: usize = 256 * 1024 * 1024;

/// Default maximum number of cached thumbnails
pub const DEFAULT_THUMBNAIL_CACHE_ENTRIES: usize = 500;

/// Default maximum total size of cached thumbnails: 64MB
pub const DEFAULT_THUMBNAIL_CACHE_BYTES: usize = 64 * 1024 * 1024;

// =============================================================================
// Weighted
// =============================================================================

/// Values that know their memory footprint in bytes.
pub trait Weighted {
    fn weight(&self) -> usize;
}

impl<T: Weighted + ?Sized> Weighted for Arc<T> {
    fn weight(&self) -> usize {
        (**self).weight()
    }
}

impl Weighted for TileImage {
    fn weight(&self) -> usize {
        self.byte_size()
    }
}

impl Weighted for Bytes {
    fn weight(&self) -> usize {
        self.len()
    }
}

// =============================================================================
// Cache
// =============================================================================

/// A cached value and the freshness token it was stored with.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<V> {
    pub value: V,
    pub token: u64,
}

/// Point-in-time counters of a cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub len: usize,
    pub size: usize,
    pub max_entries: usize,
    pub max_bytes: usize,
    pub hits: u64,
    pub misses: u64,
}

struct Inner<K: Hash + Eq, V> {
    entries: LruCache<K, CacheEntry<V>>,
    size: usize,
}

/// LRU cache bounded by entry count and total bytes.
///
/// Thread-safe; share it across tasks behind an `Arc`. Cache operations
/// never fail: a failed fill leaves the cache untouched.
pub struct TileCache<K: Hash + Eq, V> {
    inner: Mutex<Inner<K, V>>,
    flight: SingleFlight<K, V, ClientError>,
    max_bytes: usize,
    next_token: AtomicU64,
    epoch: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<K, V> TileCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Weighted + Clone,
{
    /// Create a cache holding at most `max_entries` values and `max_bytes`
    /// bytes. A zero entry bound is treated as one.
    pub fn new(max_entries: usize, max_bytes: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::new(NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN)),
                size: 0,
            }),
            flight: SingleFlight::new(),
            max_bytes,
            next_token: AtomicU64::new(1),
            epoch: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Get a value, marking it as recently used.
    pub async fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock().await;
        match inner.entries.get(key) {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Get a value with its freshness token, without touching LRU order
    /// or the hit/miss counters.
    pub async fn peek(&self, key: &K) -> Option<CacheEntry<V>> {
        self.inner.lock().await.entries.peek(key).cloned()
    }

    /// Check if a key is cached without updating LRU order.
    pub async fn contains(&self, key: &K) -> bool {
        self.inner.lock().await.entries.contains(key)
    }

    /// Store a value, evicting least-recently-used entries as needed.
    ///
    /// Returns the freshness token of the new entry, or `None` if the value
    /// alone exceeds the byte bound and was not retained.
    pub async fn put(&self, key: K, value: V) -> Option<u64> {
        let mut inner = self.inner.lock().await;
        self.insert_locked(&mut inner, key, value)
    }

    fn insert_locked(&self, inner: &mut Inner<K, V>, key: K, value: V) -> Option<u64> {
        let weight = value.weight();
        if weight > self.max_bytes {
            if let Some(old) = inner.entries.pop(&key) {
                inner.size = inner.size.saturating_sub(old.value.weight());
            }
            return None;
        }

        let token = self.next_token.fetch_add(1, Ordering::SeqCst);
        // push returns either the replaced entry or the LRU entry it evicted
        if let Some((_, displaced)) = inner.entries.push(key, CacheEntry { value, token }) {
            inner.size = inner.size.saturating_sub(displaced.value.weight());
        }
        inner.size += weight;

        while inner.size > self.max_bytes {
            match inner.entries.pop_lru() {
                Some((_, evicted)) => {
                    inner.size = inner.size.saturating_sub(evicted.value.weight());
                }
                None => break,
            }
        }
        Some(token)
    }

    /// Return the cached value or fetch it.
    ///
    /// On a miss, concurrent callers for the same key share one fetch. A
    /// failed fetch is returned to every waiter and nothing is cached.
    pub async fn get_or_fetch<F, Fut>(&self, key: K, fetch: F) -> Result<V, ClientError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, ClientError>>,
    {
        if let Some(value) = self.get(&key).await {
            return Ok(value);
        }
        self.fetch_missing(key, fetch).await
    }

    /// Fetch a value known to be missing, attaching to an in-flight fetch
    /// for the same key if there is one.
    pub async fn fetch_missing<F, Fut>(&self, key: K, fetch: F) -> Result<V, ClientError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, ClientError>>,
    {
        let flight_key = key.clone();
        self.flight
            .run(flight_key, || async move {
                // A fill may have completed between the caller's miss and now
                if let Some(entry) = self.peek(&key).await {
                    return Ok(entry.value);
                }

                let epoch = self.epoch.load(Ordering::SeqCst);
                let value = fetch().await?;

                let mut inner = self.inner.lock().await;
                if self.epoch.load(Ordering::SeqCst) == epoch {
                    self.insert_locked(&mut inner, key, value.clone());
                }
                Ok(value)
            })
            .await
    }

    /// Remove a value.
    pub async fn remove(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock().await;
        let entry = inner.entries.pop(key)?;
        inner.size = inner.size.saturating_sub(entry.value.weight());
        Some(entry.value)
    }

    /// Remove every value and drop fills that are still in flight.
    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        self.epoch.fetch_add(1, Ordering::SeqCst);
        inner.entries.clear();
        inner.size = 0;
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.entries.is_empty()
    }

    /// Current total weight of cached values in bytes.
    pub async fn size(&self) -> usize {
        self.inner.lock().await.size
    }

    /// Maximum number of entries.
    pub async fn capacity(&self) -> usize {
        self.inner.lock().await.entries.cap().get()
    }

    /// Maximum total weight in bytes.
    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Number of fetches actually executed through this cache.
    pub fn fetches(&self) -> u64 {
        self.flight.executions()
    }

    pub async fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().await;
        CacheStats {
            len: inner.entries.len(),
            size: inner.size,
            max_entries: inner.entries.cap().get(),
            max_bytes: self.max_bytes,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
