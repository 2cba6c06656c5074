//! Pixel API registry: which backends exist and which one reads an image.

use std::sync::Arc;

use tracing::{debug, info};
use url::Url;

use crate::entity::Image;
use crate::error::ClientError;
use crate::io::{normalize_base_uri, Transport};

use super::gateway::GatewayApi;
use super::ms_buffer::{MsPixelBufferApi, DEFAULT_MS_PIXEL_BUFFER_PORT};
use super::web::{WebApi, DEFAULT_JPEG_QUALITY};
use super::{PixelApi, PixelApiKind, PixelApiReader};

/// Settings used to build the registry.
#[derive(Debug, Clone)]
pub struct PixelApiOptions {
    /// JPEG quality requested from the web API (1-100)
    pub jpeg_quality: u8,

    /// Port of the pixel buffer microservice on the web server host
    pub ms_port: u16,

    /// Base URI of the pixel gateway, if one is deployed
    pub gateway_uri: Option<String>,
}

impl Default for PixelApiOptions {
    fn default() -> Self {
        Self {
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            ms_port: DEFAULT_MS_PIXEL_BUFFER_PORT,
            gateway_uri: None,
        }
    }
}

/// The pixel APIs of one server, in preference order.
pub struct PixelApiRegistry {
    apis: Vec<Box<dyn PixelApi>>,
}

impl PixelApiRegistry {
    /// Build the registry for the server behind `transport`, probing the
    /// optional backends once.
    pub async fn discover<T: Transport + 'static>(
        transport: Arc<T>,
        options: &PixelApiOptions,
    ) -> Result<Self, ClientError> {
        let mut apis: Vec<Box<dyn PixelApi>> = Vec::with_capacity(3);

        if let Some(uri) = &options.gateway_uri {
            let base: Url = normalize_base_uri(uri)?;
            apis.push(Box::new(GatewayApi::probe(transport.clone(), base).await));
        }
        apis.push(Box::new(
            MsPixelBufferApi::probe(transport.clone(), options.ms_port).await?,
        ));
        apis.push(Box::new(WebApi::new(transport, options.jpeg_quality)));

        let registry = Self::new(apis);
        info!(
            "Available pixel APIs: {}",
            registry
                .apis()
                .filter(|api| api.is_available())
                .map(|api| api.name())
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(registry)
    }

    /// Build a registry from explicit APIs; they are sorted by preference.
    pub fn new(mut apis: Vec<Box<dyn PixelApi>>) -> Self {
        apis.sort_by_key(|api| api.kind().preference());
        Self { apis }
    }

    /// Every registered API, available or not, in preference order.
    pub fn apis(&self) -> impl Iterator<Item = &dyn PixelApi> + '_ {
        self.apis.iter().map(|api| api.as_ref())
    }

    pub fn get(&self, kind: PixelApiKind) -> Option<&dyn PixelApi> {
        self.apis().find(|api| api.kind() == kind)
    }

    /// APIs that are available and can read `image`, in preference order.
    pub fn available_apis(&self, image: &Image) -> Vec<&dyn PixelApi> {
        self.apis()
            .filter(|api| api.is_available() && api.supports(image))
            .collect()
    }

    /// Whether at least one available API can read `image`.
    pub fn is_supported(&self, image: &Image) -> bool {
        !self.available_apis(image).is_empty()
    }

    /// Open a reader for `image`.
    ///
    /// With `preferred`, only that API is considered; otherwise the most
    /// preferred API able to read the image is used.
    ///
    /// # Errors
    /// `UnsupportedApi` when no suitable API exists, or the error raised
    /// while setting the reader up.
    pub async fn select(
        &self,
        image: &Image,
        preferred: Option<PixelApiKind>,
    ) -> Result<Box<dyn PixelApiReader>, ClientError> {
        let api = match preferred {
            Some(kind) => {
                let api = self.get(kind).ok_or_else(|| ClientError::UnsupportedApi {
                    api: kind.name().to_string(),
                    reason: "not configured for this server".to_string(),
                })?;
                if !api.is_available() {
                    return Err(ClientError::UnsupportedApi {
                        api: kind.name().to_string(),
                        reason: "not available on this server".to_string(),
                    });
                }
                api
            }
            None => self
                .available_apis(image)
                .into_iter()
                .next()
                .ok_or_else(|| ClientError::UnsupportedApi {
                    api: "any".to_string(),
                    reason: match image.pixel_type {
                        Some(pixel_type) => format!(
                            "no available pixel API reads {} images with {} channel(s)",
                            pixel_type,
                            image.channel_count()
                        ),
                        None => format!("pixel type of image {} is unknown", image.id),
                    },
                })?,
        };

        let reader = api.create_reader(image).await?;
        debug!("Selected {} for image {}", reader.description(), image.id);
        Ok(reader)
    }
}
