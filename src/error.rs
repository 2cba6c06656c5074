use thiserror::Error;

/// Errors surfaced by the transport, the API handler and the pixel readers.
///
/// The type is `Clone` so that every waiter attached to a de-duplicated
/// in-flight operation can receive the same failure.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// Server unreachable, connection reset or request timeout
    #[error("Network error: {0}")]
    Network(String),

    /// Credentials rejected by the server
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Non-2xx response from the server
    #[error("HTTP {status} for {url}")]
    Http { status: u16, url: String },

    /// Response body did not have the expected shape
    #[error("Decode error: {0}")]
    Decode(String),

    /// The pixel API cannot serve the requested image
    #[error("Pixel API '{api}' cannot read this image: {reason}")]
    UnsupportedApi { api: String, reason: String },

    /// A tile read failed (one of its channel fetches failed)
    #[error("I/O error: {0}")]
    Io(String),

    /// The session or reader has been closed
    #[error("Operation on a closed session")]
    Closed,

    /// A URI could not be built from the configured base
    #[error("Invalid URI: {0}")]
    InvalidUri(String),
}

impl ClientError {
    /// Whether this is an HTTP 404, which listings treat as "absent".
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::Http { status: 404, .. })
    }

    /// Whether the caller may reasonably retry the operation.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Network(_) => true,
            ClientError::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<url::ParseError> for ClientError {
    fn from(err: url::ParseError) -> Self {
        ClientError::InvalidUri(err.to_string())
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return ClientError::Http {
                status: status.as_u16(),
                url: err.url().map(|u| u.to_string()).unwrap_or_default(),
            };
        }
        if err.is_decode() {
            return ClientError::Decode(err.to_string());
        }
        ClientError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Decode(err.to_string())
    }
}

impl From<TiffError> for ClientError {
    fn from(err: TiffError) -> Self {
        ClientError::Decode(format!("TIFF: {}", err))
    }
}

impl From<image::ImageError> for ClientError {
    fn from(err: image::ImageError) -> Self {
        ClientError::Decode(format!("image: {}", err))
    }
}

/// Errors raised while decoding the single-plane TIFF rasters returned by
/// the pixel buffer microservice.
#[derive(Debug, Clone, Error)]
pub enum TiffError {
    /// Invalid TIFF magic bytes (not II or MM)
    #[error("Invalid TIFF magic bytes: expected 0x4949 (II) or 0x4D4D (MM), got 0x{0:04X}")]
    InvalidMagic(u16),

    /// Invalid TIFF version number
    #[error("Invalid TIFF version: expected 42 (TIFF) or 43 (BigTIFF), got {0}")]
    InvalidVersion(u16),

    /// Invalid BigTIFF offset byte size (must be 8)
    #[error("Invalid BigTIFF offset byte size: expected 8, got {0}")]
    InvalidBigTiffOffsetSize(u16),

    /// Buffer too small for the structure being read
    #[error("Truncated TIFF: need {required} bytes, got {actual}")]
    Truncated { required: u64, actual: u64 },

    /// IFD offset outside the buffer
    #[error("Invalid IFD offset: {0}")]
    InvalidIfdOffset(u64),

    /// Required tag is missing from the IFD
    #[error("Missing required tag: {0}")]
    MissingTag(&'static str),

    /// Tag has an unexpected type or count
    #[error("Invalid tag value for {tag}: {message}")]
    InvalidTagValue { tag: &'static str, message: String },

    /// Only uncompressed rasters are produced by the microservice
    #[error("Unsupported compression: {0} (only uncompressed rasters are supported)")]
    UnsupportedCompression(u16),

    /// Unknown field type in an IFD entry
    #[error("Unknown field type: {0}")]
    UnknownFieldType(u16),
}
