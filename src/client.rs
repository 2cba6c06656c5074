//! Client session: the entry point tying transport, API handler, hierarchy,
//! pixel readers and caches together.
//!
//! ```text
//!                        ┌──────────────┐
//!             expand ───▶│  Hierarchy   │──┐
//!                        └──────────────┘  │   ┌─────────────┐   ┌───────────┐
//!    fetch_thumbnail ───▶ ThumbnailCache ──┼──▶│ ApisHandler │──▶│ Transport │
//!                                          │   └─────────────┘   └───────────┘
//!         open_image ───▶ ImageSession     │                          ▲
//!                           └─ TileService ─▶ TileCache ─▶ PixelApiReader
//! ```
//!
//! Closing the client cancels every in-flight load and tile read, clears
//! the caches, releases the readers of opened images and logs out.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::api::{ApisHandler, DEFAULT_THUMBNAIL_SIZE};
use crate::entity::{EntityKind, Image, Server};
use crate::error::ClientError;
use crate::hierarchy::{Activity, BrowserModel, BrowserState, Children, HierarchyModel, NodeId};
use crate::io::{Credentials, SessionOptions, Transport, WebSession};
use crate::pixel::{PixelApiKind, PixelApiOptions, PixelApiRegistry, TileImage};
use crate::tile::{
    ThumbnailCache, TileCache, TileRequest, TileResponse, TileService,
    DEFAULT_THUMBNAIL_CACHE_BYTES, DEFAULT_THUMBNAIL_CACHE_ENTRIES, DEFAULT_TILE_CACHE_BYTES,
    DEFAULT_TILE_CACHE_ENTRIES,
};

/// Settings of a client session.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub session: SessionOptions,
    pub pixel_apis: PixelApiOptions,

    /// Pixel API to use for every image; the most preferred able one when
    /// `None`
    pub preferred_api: Option<PixelApiKind>,

    pub tile_cache_entries: usize,
    pub tile_cache_bytes: usize,
    pub thumbnail_cache_entries: usize,
    pub thumbnail_cache_bytes: usize,
    pub thumbnail_size: u32,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            session: SessionOptions::default(),
            pixel_apis: PixelApiOptions::default(),
            preferred_api: None,
            tile_cache_entries: DEFAULT_TILE_CACHE_ENTRIES,
            tile_cache_bytes: DEFAULT_TILE_CACHE_BYTES,
            thumbnail_cache_entries: DEFAULT_THUMBNAIL_CACHE_ENTRIES,
            thumbnail_cache_bytes: DEFAULT_THUMBNAIL_CACHE_BYTES,
            thumbnail_size: DEFAULT_THUMBNAIL_SIZE,
        }
    }
}

// =============================================================================
// Client
// =============================================================================

/// A connection to one OMERO server.
pub struct Client<T: Transport = WebSession> {
    transport: Arc<T>,
    api: Arc<ApisHandler<T>>,
    server: Server,
    hierarchy: HierarchyModel<T>,
    registry: PixelApiRegistry,
    browser: Arc<BrowserModel>,
    tiles: Arc<TileCache<TileRequest, Arc<TileImage>>>,
    thumbnails: ThumbnailCache,
    open_images: Arc<OpenImages>,
    options: ClientOptions,
    cancel: CancellationToken,
}

impl Client<WebSession> {
    /// Connect to the server at `uri`, anonymously when `credentials` is
    /// `None`.
    pub async fn connect(
        uri: &str,
        credentials: Option<Credentials>,
        options: ClientOptions,
    ) -> Result<Self, ClientError> {
        let session = WebSession::connect_with(uri, credentials, options.session.clone()).await?;
        let server_id = session.server_id();
        let authenticated = session.is_authenticated();
        let username = session.username().map(str::to_string);

        Self::from_transport(Arc::new(session), server_id, authenticated, username, options).await
    }
}

impl<T: Transport + 'static> Client<T> {
    /// Build a client over an already established transport.
    ///
    /// Groups and owners are fetched and the pixel APIs probed once here.
    pub async fn from_transport(
        transport: Arc<T>,
        server_id: i64,
        authenticated: bool,
        username: Option<String>,
        options: ClientOptions,
    ) -> Result<Self, ClientError> {
        let api = Arc::new(ApisHandler::new(transport.clone(), server_id));
        let (groups, registry) = futures::try_join!(
            api.list_groups(),
            PixelApiRegistry::discover(transport.clone(), &options.pixel_apis)
        )?;
        let server = Server::new(groups);

        let browser = Arc::new(BrowserModel::new(authenticated, username));
        let selected = options.preferred_api.or_else(|| {
            registry
                .apis()
                .find(|api| api.is_available())
                .map(|api| api.kind())
        });
        browser.select_pixel_api(selected);

        let cancel = CancellationToken::new();
        let hierarchy = HierarchyModel::new(api.clone(), browser.clone(), cancel.child_token());

        info!(
            "Connected to {} ({} groups, {} owners)",
            transport.base_uri(),
            server.groups().len() - 1,
            server.owners().len()
        );

        Ok(Self {
            transport,
            api,
            server,
            hierarchy,
            registry,
            browser,
            tiles: Arc::new(TileCache::new(options.tile_cache_entries, options.tile_cache_bytes)),
            thumbnails: ThumbnailCache::new(
                options.thumbnail_cache_entries,
                options.thumbnail_cache_bytes,
            ),
            open_images: Arc::new(OpenImages::default()),
            options,
            cancel,
        })
    }

    pub fn server(&self) -> &Server {
        &self.server
    }

    pub fn api(&self) -> &ApisHandler<T> {
        &self.api
    }

    pub fn hierarchy(&self) -> &HierarchyModel<T> {
        &self.hierarchy
    }

    pub fn registry(&self) -> &PixelApiRegistry {
        &self.registry
    }

    pub fn browser(&self) -> &Arc<BrowserModel> {
        &self.browser
    }

    /// Snapshots of the browser state.
    pub fn subscribe(&self) -> watch::Receiver<BrowserState> {
        self.browser.subscribe()
    }

    pub fn tile_cache(&self) -> &Arc<TileCache<TileRequest, Arc<TileImage>>> {
        &self.tiles
    }

    pub fn thumbnail_cache(&self) -> &ThumbnailCache {
        &self.thumbnails
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Whether an available pixel API can read `image`.
    pub fn is_supported(&self, image: &Image) -> bool {
        self.registry.is_supported(image)
    }

    /// Load the children of a hierarchy node.
    pub async fn expand(&self, node: NodeId) -> Result<Children, ClientError> {
        self.hierarchy.expand(node).await
    }

    /// Open an image for tile reading.
    ///
    /// # Errors
    /// `UnsupportedApi` when no available pixel API can read the image.
    pub async fn open_image(&self, image_id: i64) -> Result<ImageSession, ClientError> {
        self.ensure_open()?;

        let image = self.api.get_image(image_id).await?;
        let reader = self.registry.select(&image, self.options.preferred_api).await?;
        let uri = self.api.entity_uri_of(EntityKind::Image, image_id)?.to_string();

        let service = Arc::new(TileService::with_cancellation(
            reader,
            self.tiles.clone(),
            self.cancel.child_token(),
        ));
        if self.cancel.is_cancelled() {
            service.close().await;
            return Err(ClientError::Closed);
        }

        let key = self.open_images.insert(uri.clone(), service.clone());
        self.browser.image_opened(&uri);
        info!("Opened image {} with {}", image_id, service.description());

        Ok(ImageSession {
            image: Arc::new(image),
            service,
            uri,
            key,
            open_images: self.open_images.clone(),
            browser: self.browser.clone(),
        })
    }

    /// Thumbnail of an image, fetched once and cached.
    pub async fn fetch_thumbnail(&self, image_id: i64) -> Result<Arc<TileImage>, ClientError> {
        self.ensure_open()?;
        let size = self.options.thumbnail_size;

        self.thumbnails
            .get_or_fetch(image_id, size, || async move {
                let _fetching = self.browser.track(Activity::ThumbnailFetch);
                let thumbnail = tokio::select! {
                    _ = self.cancel.cancelled() => return Err(ClientError::Closed),
                    result = self.api.get_thumbnail(image_id, size) => result?,
                };
                if self.cancel.is_cancelled() {
                    return Err(ClientError::Closed);
                }
                Ok(thumbnail)
            })
            .await
    }

    /// Close the client. Idempotent.
    ///
    /// In-flight operations finish with `Closed` and leave the caches and
    /// the hierarchy untouched.
    pub async fn close(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();

        for service in self.open_images.drain() {
            service.close().await;
        }
        self.browser.clear_opened_images();
        self.tiles.clear().await;
        self.thumbnails.clear().await;
        self.transport.close().await;
        info!("Closed client for {}", self.transport.base_uri());
    }

    fn ensure_open(&self) -> Result<(), ClientError> {
        if self.cancel.is_cancelled() {
            Err(ClientError::Closed)
        } else {
            Ok(())
        }
    }
}

// =============================================================================
// Image Session
// =============================================================================

/// One opened image and its tile reader.
pub struct ImageSession {
    image: Arc<Image>,
    service: Arc<TileService>,
    uri: String,
    key: u64,
    open_images: Arc<OpenImages>,
    browser: Arc<BrowserModel>,
}

impl ImageSession {
    pub fn image(&self) -> &Arc<Image> {
        &self.image
    }

    /// Webclient URI of the image.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn api(&self) -> PixelApiKind {
        self.service.api()
    }

    /// Request for a tile of this image on plane (0, 0).
    pub fn tile_request(&self, level: u32, x: u32, y: u32, width: u32, height: u32) -> TileRequest {
        TileRequest::new(self.image.id, level, x, y, width, height)
    }

    /// Read a tile, served from cache when possible.
    pub async fn read_tile(&self, request: &TileRequest) -> Result<TileResponse, ClientError> {
        if request.image_id != self.image.id {
            return Err(ClientError::Io(format!(
                "tile {} does not belong to image {}",
                request, self.image.id
            )));
        }
        self.service.get_tile(request).await
    }

    pub fn is_closed(&self) -> bool {
        self.service.is_closed()
    }

    /// Release the reader. Idempotent.
    pub async fn close(&self) {
        if let Some(still_open) = self.open_images.remove(self.key, &self.uri) {
            if !still_open {
                self.browser.image_closed(&self.uri);
            }
        }
        self.service.close().await;
        debug!("Closed image {}", self.image.id);
    }
}

/// Tile services of the images currently opened.
#[derive(Default)]
struct OpenImages {
    next_key: AtomicU64,
    services: Mutex<HashMap<u64, (String, Arc<TileService>)>>,
}

impl OpenImages {
    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, (String, Arc<TileService>)>> {
        self.services.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn insert(&self, uri: String, service: Arc<TileService>) -> u64 {
        let key = self.next_key.fetch_add(1, Ordering::SeqCst);
        self.lock().insert(key, (uri, service));
        key
    }

    /// Forget one session. Returns whether another session still has the
    /// same image open, or `None` if the session was already gone.
    fn remove(&self, key: u64, uri: &str) -> Option<bool> {
        let mut services = self.lock();
        services.remove(&key)?;
        Some(services.values().any(|(other, _)| other == uri))
    }

    fn drain(&self) -> Vec<Arc<TileService>> {
        self.lock().drain().map(|(_, (_, service))| service).collect()
    }
}
