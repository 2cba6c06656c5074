use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use url::Url;

use crate::error::ClientError;

/// Path of the JSON API relative to the web server root, used when the
/// server does not advertise a versioned base.
pub const DEFAULT_API_PATH: &str = "api/v0/";

/// Low-level request execution against one OMERO web server.
///
/// This abstraction lets the API handler and the pixel readers work without
/// knowing how requests are authenticated or carried. Implementations must
/// be thread-safe; a single transport is shared by every component of a
/// client session.
#[async_trait]
pub trait Transport: Send + Sync {
    /// GET `url` and return the raw response body.
    ///
    /// Non-2xx responses fail with [`ClientError::Http`], connection
    /// failures and timeouts with [`ClientError::Network`].
    async fn get_bytes(&self, url: &Url) -> Result<Bytes, ClientError>;

    /// GET `url` and parse the body as JSON.
    async fn get_json(&self, url: &Url) -> Result<Value, ClientError> {
        let body = self.get_bytes(url).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// POST an url-encoded form and return the raw response body.
    async fn post_form(&self, url: &Url, form: &[(&str, &str)]) -> Result<Bytes, ClientError>;

    /// DELETE `url`, discarding the body.
    async fn delete(&self, url: &Url) -> Result<(), ClientError>;

    /// Release server-side session state. Idempotent; the default does
    /// nothing.
    async fn close(&self) {}

    /// Root URI of the web server (always ends with `/`).
    fn base_uri(&self) -> &Url;

    /// Base URI of the JSON API.
    fn api_uri(&self) -> Result<Url, ClientError> {
        Ok(self.base_uri().join(DEFAULT_API_PATH)?)
    }

    /// Resolve a path relative to the web server root.
    fn resolve(&self, path: &str) -> Result<Url, ClientError> {
        Ok(self.base_uri().join(path.trim_start_matches('/'))?)
    }
}

/// Normalize a user-supplied server URI so that relative joins keep its path.
///
/// `https://host/omero` becomes `https://host/omero/`.
pub fn normalize_base_uri(uri: &str) -> Result<Url, ClientError> {
    let mut url = Url::parse(uri.trim())?;
    if url.cannot_be_a_base() {
        return Err(ClientError::InvalidUri(format!("{} cannot be a base URI", uri)));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}
