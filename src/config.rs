//! Configuration of the `omero-client` command-line tool.
//!
//! Every connection and client setting can be given as a flag or through an
//! environment variable with the `OMERO_` prefix:
//!
//! - `OMERO_SERVER` - Web server URI (required)
//! - `OMERO_USERNAME` / `OMERO_PASSWORD` - Credentials (public session when unset)
//! - `OMERO_TIMEOUT` - Request timeout in seconds (default: 30)
//! - `OMERO_CACHE_TILES` - Max tiles to cache (default: 1000)
//! - `OMERO_CACHE_TILE_MB` - Max size of cached tiles in MB (default: 256)
//! - `OMERO_CACHE_THUMBNAILS` - Max thumbnails to cache (default: 500)
//! - `OMERO_JPEG_QUALITY` - Quality of tiles rendered by the web API (default: 90)
//! - `OMERO_MS_PORT` - Port of the pixel buffer microservice (default: 8082)
//! - `OMERO_GATEWAY` - Base URI of the pixel gateway (disabled when unset)
//! - `OMERO_PIXEL_API` - Pixel API to use: web, ms or gateway (automatic when unset)

use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::api::DEFAULT_THUMBNAIL_SIZE;
use crate::client::ClientOptions;
use crate::io::{normalize_base_uri, Credentials, SessionOptions};
use crate::pixel::{
    PixelApiKind, PixelApiOptions, DEFAULT_JPEG_QUALITY, DEFAULT_MS_PIXEL_BUFFER_PORT,
};
use crate::tile::{DEFAULT_THUMBNAIL_CACHE_ENTRIES, DEFAULT_TILE_CACHE_ENTRIES};

// =============================================================================
// Default Values
// =============================================================================

/// Default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default byte bound of the tile cache, in MB.
pub const DEFAULT_TILE_CACHE_MB: usize = 256;

/// Default thumbnail cache size in MB.
pub const DEFAULT_THUMBNAIL_CACHE_MB: usize = 64;

/// Default tile side used by the `tile` command.
pub const DEFAULT_TILE_SIZE: u32 = 256;

// =============================================================================
// CLI Arguments
// =============================================================================

/// OMERO client - browse an OMERO server and read image tiles.
#[derive(Parser, Debug, Clone)]
#[command(name = "omero-client")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Connect and report the server's groups, owners and pixel APIs
    Check(CheckConfig),

    /// Print the project/dataset/image tree
    Browse(BrowseConfig),

    /// Read one tile of an image and print its statistics
    Tile(TileConfig),
}

/// Connection and client settings shared by every command.
#[derive(Args, Debug, Clone)]
pub struct Config {
    // =========================================================================
    // Connection
    // =========================================================================
    /// URI of the OMERO web server.
    #[arg(long, env = "OMERO_SERVER")]
    pub server: String,

    /// Username; a public session is opened when omitted.
    #[arg(short, long, env = "OMERO_USERNAME")]
    pub username: Option<String>,

    /// Password of `username`.
    #[arg(long, env = "OMERO_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Request timeout in seconds.
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS, env = "OMERO_TIMEOUT")]
    pub timeout: u64,

    // =========================================================================
    // Cache Configuration
    // =========================================================================
    /// Maximum number of tiles to keep in cache.
    #[arg(long, default_value_t = DEFAULT_TILE_CACHE_ENTRIES, env = "OMERO_CACHE_TILES")]
    pub cache_tiles: usize,

    /// Maximum total size of cached tiles, in MB.
    #[arg(long, default_value_t = DEFAULT_TILE_CACHE_MB, env = "OMERO_CACHE_TILE_MB")]
    pub cache_tile_mb: usize,

    /// Maximum number of thumbnails to keep in cache.
    #[arg(long, default_value_t = DEFAULT_THUMBNAIL_CACHE_ENTRIES, env = "OMERO_CACHE_THUMBNAILS")]
    pub cache_thumbnails: usize,

    /// Maximum total size of cached thumbnails, in MB.
    #[arg(long, default_value_t = DEFAULT_THUMBNAIL_CACHE_MB, env = "OMERO_CACHE_THUMBNAIL_MB")]
    pub cache_thumbnail_mb: usize,

    // =========================================================================
    // Pixel APIs
    // =========================================================================
    /// JPEG quality requested from the web API (1-100).
    #[arg(long, default_value_t = DEFAULT_JPEG_QUALITY, env = "OMERO_JPEG_QUALITY")]
    pub jpeg_quality: u8,

    /// Port of the pixel buffer microservice.
    #[arg(long, default_value_t = DEFAULT_MS_PIXEL_BUFFER_PORT, env = "OMERO_MS_PORT")]
    pub ms_port: u16,

    /// Base URI of the pixel gateway.
    #[arg(long, env = "OMERO_GATEWAY")]
    pub gateway: Option<String>,

    /// Pixel API used to read images (web, ms, gateway).
    #[arg(long, env = "OMERO_PIXEL_API")]
    pub pixel_api: Option<PixelApiKind>,

    // =========================================================================
    // Logging Configuration
    // =========================================================================
    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl Config {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.server.trim().is_empty() {
            return Err("Server URI is required. Set --server or OMERO_SERVER".to_string());
        }
        normalize_base_uri(&self.server).map_err(|e| format!("Invalid server URI: {}", e))?;

        match (&self.username, &self.password) {
            (Some(_), None) => {
                return Err(
                    "A username was given without a password. Set --password or OMERO_PASSWORD"
                        .to_string(),
                )
            }
            (None, Some(_)) => {
                return Err("A password was given without a username".to_string());
            }
            _ => {}
        }

        if self.timeout == 0 {
            return Err("timeout must be greater than 0".to_string());
        }

        if self.cache_tiles == 0 {
            return Err("cache_tiles must be greater than 0".to_string());
        }
        if self.cache_tile_mb == 0 {
            return Err("cache_tile_mb must be greater than 0".to_string());
        }
        if self.cache_thumbnails == 0 {
            return Err("cache_thumbnails must be greater than 0".to_string());
        }
        if self.cache_thumbnail_mb == 0 {
            return Err("cache_thumbnail_mb must be greater than 0".to_string());
        }

        if self.jpeg_quality == 0 || self.jpeg_quality > 100 {
            return Err("jpeg_quality must be between 1 and 100".to_string());
        }

        if self.ms_port == 0 {
            return Err("ms_port must be greater than 0".to_string());
        }

        if let Some(gateway) = &self.gateway {
            normalize_base_uri(gateway).map_err(|e| format!("Invalid gateway URI: {}", e))?;
        }

        if self.pixel_api == Some(PixelApiKind::Gateway) && self.gateway.is_none() {
            return Err("The gateway pixel API needs --gateway or OMERO_GATEWAY".to_string());
        }

        Ok(())
    }

    /// Credentials, `None` for a public session.
    pub fn credentials(&self) -> Option<Credentials> {
        match (&self.username, &self.password) {
            (Some(username), Some(password)) => Some(Credentials::new(username, password)),
            _ => None,
        }
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            session: SessionOptions {
                timeout: Duration::from_secs(self.timeout),
            },
            pixel_apis: PixelApiOptions {
                jpeg_quality: self.jpeg_quality,
                ms_port: self.ms_port,
                gateway_uri: self.gateway.clone(),
            },
            preferred_api: self.pixel_api,
            tile_cache_entries: self.cache_tiles,
            tile_cache_bytes: self.cache_tile_mb * 1024 * 1024,
            thumbnail_cache_entries: self.cache_thumbnails,
            thumbnail_cache_bytes: self.cache_thumbnail_mb * 1024 * 1024,
            thumbnail_size: DEFAULT_THUMBNAIL_SIZE,
        }
    }
}

/// Arguments of `check`.
#[derive(Args, Debug, Clone)]
pub struct CheckConfig {
    #[command(flatten)]
    pub config: Config,
}

/// Arguments of `browse`.
#[derive(Args, Debug, Clone)]
pub struct BrowseConfig {
    #[command(flatten)]
    pub config: Config,

    /// Only show entities whose name contains this text.
    #[arg(long)]
    pub filter: Option<String>,

    /// Only show entities owned by this experimenter id.
    #[arg(long)]
    pub owner: Option<i64>,

    /// Only show entities of this group id.
    #[arg(long)]
    pub group: Option<i64>,

    /// Also list the orphaned images.
    #[arg(long, default_value_t = false)]
    pub orphaned: bool,
}

/// Arguments of `tile`.
#[derive(Args, Debug, Clone)]
pub struct TileConfig {
    #[command(flatten)]
    pub config: Config,

    /// Image id.
    #[arg(long)]
    pub image: i64,

    /// Resolution level (0 is full resolution).
    #[arg(long, default_value_t = 0)]
    pub level: u32,

    #[arg(short = 'x', long, default_value_t = 0)]
    pub x: u32,

    #[arg(short = 'y', long, default_value_t = 0)]
    pub y: u32,

    #[arg(long, default_value_t = DEFAULT_TILE_SIZE)]
    pub width: u32,

    #[arg(long, default_value_t = DEFAULT_TILE_SIZE)]
    pub height: u32,

    #[arg(short = 'z', long, default_value_t = 0)]
    pub z: u32,

    #[arg(short = 't', long, default_value_t = 0)]
    pub t: u32,
}

impl TileConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.config.validate()?;
        if self.width == 0 || self.height == 0 {
            return Err("Tile width and height must be greater than 0".to_string());
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
