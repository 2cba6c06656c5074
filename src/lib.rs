//! # OMERO Client
//!
//! An asynchronous client for OMERO image servers.
//!
//! This library browses the entities of an OMERO server (groups, owners,
//! projects, datasets, images) and reads image pixels as tiles through
//! whichever pixel protocol the server offers, with caching and
//! de-duplication of concurrent requests.
//!
//! ## Features
//!
//! - **Lazy hierarchy**: children are loaded on first expansion, once, however
//!   many callers ask concurrently
//! - **Pluggable pixel access**: webgateway JPEG rendering, the pixel buffer
//!   microservice and a session-holding pixel gateway behind one reader trait
//! - **Typed pixels**: raw channel bytes decoded per pixel type and composed
//!   into planar tiles
//! - **Bounded caches**: decoded tiles and thumbnails, bounded by entry count
//!   and size
//! - **Cancellation**: closing the client stops in-flight work from touching
//!   the caches or the tree
//!
//! ## Architecture
//!
//! - [`io`] - Transport trait and the reqwest-based web session
//! - [`api`] - Typed facade over the OMERO web APIs
//! - [`entity`] - Domain entities
//! - [`hierarchy`] - Entity tree and observable browser state
//! - [`pixel`] - Pixel APIs, readers and pixel decoding
//! - [`mod@format`] - In-memory TIFF decoding
//! - [`tile`] - Tile service and caches
//! - [`client`] - The client facade
//! - [`config`] - CLI configuration
//!
//! ## Example
//!
//! ```rust,no_run
//! use omero_client::{Client, ClientOptions, Credentials, NodeId};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), omero_client::ClientError> {
//!     let client = Client::connect(
//!         "https://omero.example.org",
//!         Some(Credentials::new("jane", "secret")),
//!         ClientOptions::default(),
//!     )
//!     .await?;
//!
//!     for entity in client.expand(NodeId::Server).await?.iter() {
//!         println!("{}", entity.label());
//!     }
//!
//!     let image = client.open_image(42).await?;
//!     let tile = image.read_tile(&image.tile_request(0, 0, 0, 256, 256)).await?;
//!     println!("{} bands", tile.tile.band_count());
//!
//!     image.close().await;
//!     client.close().await;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod client;
pub mod config;
pub mod entity;
pub mod error;
pub mod flight;
pub mod format;
pub mod hierarchy;
pub mod io;
pub mod pixel;
pub mod tile;

// Re-export commonly used types
pub use api::{Annotation, AnnotationKind, ApisHandler, DEFAULT_THUMBNAIL_SIZE, PAGE_LIMIT};
pub use client::{Client, ClientOptions, ImageSession};
pub use config::{BrowseConfig, CheckConfig, Cli, Command, Config, TileConfig};
pub use entity::{
    Channel, ChannelColor, Dataset, EntityKind, Group, GroupRef, Image, ImageDimensions, Owner,
    PhysicalSize, PixelType, Project, RepositoryEntity, Server, ALL_ID, ORPHANED_FOLDER_LABEL,
};
pub use error::{ClientError, TiffError};
pub use flight::SingleFlight;
pub use format::tiff::{ByteOrder, Raster};
pub use hierarchy::{
    importable, BrowserModel, BrowserState, Children, EntityFilter, HierarchyModel, LoadState,
    NodeId,
};
pub use io::{normalize_base_uri, Credentials, SessionOptions, Transport, WebSession};
pub use pixel::{
    BandStats, LevelMapping, PixelApi, PixelApiKind, PixelApiOptions, PixelApiReader,
    PixelApiRegistry, PixelBuffer, TileImage,
};
pub use tile::{CacheStats, ThumbnailCache, TileCache, TileRequest, TileResponse, TileService};
