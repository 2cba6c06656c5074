//! HTTP session with an OMERO web server.
//!
//! Connecting resolves the JSON API version advertised under `api/`,
//! fetches a CSRF token and, when credentials are given, logs in. The
//! Django session lives in the reqwest cookie store; closing the session
//! logs out once and fails every later request with `Closed`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderValue, REFERER};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use super::transport::{normalize_base_uri, Transport, DEFAULT_API_PATH};
use crate::error::ClientError;

/// Default timeout applied to every request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Header carrying the CSRF token on mutating requests.
const CSRF_HEADER: &str = "X-CSRFToken";

/// Username/password pair used to log in.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Identity of the logged-in user, taken from the login event context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionUser {
    pub user_id: i64,
    pub username: String,
    pub group_id: i64,
}

/// Options controlling how a session is established.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Timeout applied to every request
    pub timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// An authenticated (or public) connection to one OMERO web server.
///
/// The session keeps the Django session cookie in reqwest's cookie store and
/// attaches the CSRF token to every mutating request. It is established once
/// by [`WebSession::connect`] and released by [`WebSession::close`].
pub struct WebSession {
    client: Client,
    base: Url,
    api_base: Url,
    csrf_token: String,
    server_id: i64,
    user: Option<SessionUser>,
    closed: AtomicBool,
}

impl WebSession {
    /// Connect to `server_uri`, logging in when credentials are supplied.
    ///
    /// Without credentials the session is public: only publicly readable
    /// data is visible.
    pub async fn connect(
        server_uri: &str,
        credentials: Option<Credentials>,
    ) -> Result<Self, ClientError> {
        Self::connect_with(server_uri, credentials, SessionOptions::default()).await
    }

    /// Connect with explicit session options.
    pub async fn connect_with(
        server_uri: &str,
        credentials: Option<Credentials>,
        options: SessionOptions,
    ) -> Result<Self, ClientError> {
        let base = normalize_base_uri(server_uri)?;
        let client = Client::builder()
            .cookie_store(true)
            .timeout(options.timeout)
            .build()
            .map_err(|e| ClientError::Network(e.to_string()))?;

        let api_base = discover_api_base(&client, &base).await?;
        debug!("Using JSON API at {}", api_base);

        let token_json = fetch_json(&client, &api_base.join("token/")?).await?;
        let csrf_token = token_json
            .get("data")
            .and_then(Value::as_str)
            .ok_or_else(|| ClientError::Decode("token response has no 'data' field".to_string()))?
            .to_string();

        let server_id = match fetch_json(&client, &api_base.join("servers/")?).await {
            Ok(json) => json
                .get("data")
                .and_then(Value::as_array)
                .and_then(|servers| servers.first())
                .and_then(|server| server.get("id"))
                .and_then(Value::as_i64)
                .unwrap_or(1),
            Err(e) => {
                warn!("Could not list servers, defaulting to server 1: {}", e);
                1
            }
        };

        let mut session = Self {
            client,
            base,
            api_base,
            csrf_token,
            server_id,
            user: None,
            closed: AtomicBool::new(false),
        };

        if let Some(credentials) = credentials {
            session.user = Some(session.login(&credentials).await?);
        }

        info!(
            "Connected to {} as {}",
            session.base,
            session.username().unwrap_or("public")
        );
        Ok(session)
    }

    async fn login(&self, credentials: &Credentials) -> Result<SessionUser, ClientError> {
        let url = self.api_base.join("login/")?;
        let server_id = self.server_id.to_string();
        let form = [
            ("server", server_id.as_str()),
            ("username", credentials.username.as_str()),
            ("password", credentials.password.as_str()),
        ];

        let response = self
            .with_csrf(self.client.post(url.clone()))
            .form(&form)
            .send()
            .await
            .map_err(network_error)?;

        let status = response.status();
        let body = response.bytes().await.map_err(network_error)?;
        let json: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);

        if status == StatusCode::FORBIDDEN || status == StatusCode::UNAUTHORIZED {
            return Err(ClientError::Authentication(login_message(&json)));
        }
        if !status.is_success() {
            return Err(ClientError::Http {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        if json.get("success").and_then(Value::as_bool) != Some(true) {
            return Err(ClientError::Authentication(login_message(&json)));
        }

        let context = json.get("eventContext").unwrap_or(&Value::Null);
        Ok(SessionUser {
            user_id: context.get("userId").and_then(Value::as_i64).unwrap_or(-1),
            username: context
                .get("userName")
                .and_then(Value::as_str)
                .unwrap_or(credentials.username.as_str())
                .to_string(),
            group_id: context.get("groupId").and_then(Value::as_i64).unwrap_or(-1),
        })
    }

    /// Whether the session is logged in (as opposed to public).
    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    /// Name of the logged-in user, `None` for public sessions.
    pub fn username(&self) -> Option<&str> {
        self.user.as_ref().map(|u| u.username.as_str())
    }

    /// The logged-in user, if any.
    pub fn user(&self) -> Option<&SessionUser> {
        self.user.as_ref()
    }

    /// Identifier of the OMERO server behind the web server.
    pub fn server_id(&self) -> i64 {
        self.server_id
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Log out and release the server-side session.
    ///
    /// Safe to call any number of times; only the first call talks to the
    /// server and failures are logged, never returned.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        if self.user.is_none() {
            return;
        }

        let url = match self.base.join("webclient/logout/") {
            Ok(url) => url,
            Err(e) => {
                warn!("Cannot build logout URI: {}", e);
                return;
            }
        };

        match self
            .with_csrf(self.client.post(url))
            .form(&[] as &[(&str, &str)])
            .send()
            .await
        {
            Ok(response) => debug!("Logout returned {}", response.status()),
            Err(e) => warn!("Logout request failed: {}", e),
        }
        info!("Closed session with {}", self.base);
    }

    fn ensure_open(&self) -> Result<(), ClientError> {
        if self.is_closed() {
            Err(ClientError::Closed)
        } else {
            Ok(())
        }
    }

    fn with_csrf(&self, builder: RequestBuilder) -> RequestBuilder {
        let builder = builder.header(CSRF_HEADER, &self.csrf_token);
        match HeaderValue::from_str(self.base.as_str()) {
            Ok(referer) => builder.header(REFERER, referer),
            Err(_) => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder, url: &Url) -> Result<Bytes, ClientError> {
        self.ensure_open()?;
        let response = builder.send().await.map_err(network_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Http {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        response.bytes().await.map_err(network_error)
    }
}

#[async_trait]
impl Transport for WebSession {
    async fn get_bytes(&self, url: &Url) -> Result<Bytes, ClientError> {
        self.send(self.client.get(url.clone()), url).await
    }

    async fn post_form(&self, url: &Url, form: &[(&str, &str)]) -> Result<Bytes, ClientError> {
        self.send(self.with_csrf(self.client.post(url.clone())).form(form), url)
            .await
    }

    async fn delete(&self, url: &Url) -> Result<(), ClientError> {
        self.send(self.with_csrf(self.client.delete(url.clone())), url)
            .await
            .map(|_| ())
    }

    fn base_uri(&self) -> &Url {
        &self.base
    }

    fn api_uri(&self) -> Result<Url, ClientError> {
        Ok(self.api_base.clone())
    }

    async fn close(&self) {
        WebSession::close(self).await
    }
}

/// Pick the most recent JSON API version advertised by the server.
async fn discover_api_base(client: &Client, base: &Url) -> Result<Url, ClientError> {
    let json = fetch_json(client, &base.join("api/")?).await?;
    let advertised = json
        .get("data")
        .and_then(Value::as_array)
        .and_then(|versions| versions.last())
        .and_then(|version| version.get("url:base"))
        .and_then(Value::as_str);

    match advertised {
        Some(uri) => normalize_base_uri(uri),
        None => {
            warn!("Server did not advertise a JSON API version, using {}", DEFAULT_API_PATH);
            Ok(base.join(DEFAULT_API_PATH)?)
        }
    }
}

async fn fetch_json(client: &Client, url: &Url) -> Result<Value, ClientError> {
    let response = client.get(url.clone()).send().await.map_err(network_error)?;
    let status = response.status();
    if !status.is_success() {
        return Err(ClientError::Http {
            status: status.as_u16(),
            url: url.to_string(),
        });
    }
    let body = response.bytes().await.map_err(network_error)?;
    Ok(serde_json::from_slice(&body)?)
}

fn network_error(err: reqwest::Error) -> ClientError {
    ClientError::Network(err.to_string())
}

fn login_message(json: &Value) -> String {
    json.get("message")
        .and_then(Value::as_str)
        .unwrap_or("invalid username or password")
        .to_string()
}
