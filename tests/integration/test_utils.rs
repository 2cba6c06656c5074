//! Test utilities for integration tests.
//!
//! This module provides a request-tracking mock transport, JSON fixtures
//! shaped like OMERO responses, pixel payload builders and an axum-based
//! fake OMERO web server for session tests.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::{Form, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::{ImageFormat, Rgb, RgbImage};
use serde_json::{json, Value};
use url::Url;

use omero_client::format::tiff::{encode_plane, SampleFormat};
use omero_client::{
    ByteOrder, Client, ClientError, ClientOptions, PixelBuffer, PixelType, Transport,
};

// =============================================================================
// Mock Transport with Request Tracking
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Delete,
}

type Handler = Arc<dyn Fn(&Url) -> Result<Bytes, ClientError> + Send + Sync>;

/// A transport answering from registered routes and recording every
/// request.
///
/// Routes are matched on method and URL without its query string. Unknown
/// routes answer 404.
pub struct MockTransport {
    base: Url,
    routes: Mutex<HashMap<(Method, String), Handler>>,
    requests: Mutex<Vec<(Method, Url)>>,
    delay: Duration,
    closes: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            base: Url::parse("http://omero.test/").unwrap(),
            routes: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
            closes: AtomicUsize::new(0),
        }
    }

    /// Delay every response, to widen race windows.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Absolute URL of `path`, which may be relative to the web root.
    pub fn url(&self, path: &str) -> Url {
        Url::parse(path).unwrap_or_else(|_| self.base.join(path).unwrap())
    }

    pub fn route(
        &self,
        method: Method,
        path: &str,
        handler: impl Fn(&Url) -> Result<Bytes, ClientError> + Send + Sync + 'static,
    ) {
        let key = route_key(&self.url(path));
        self.routes.lock().unwrap().insert((method, key), Arc::new(handler));
    }

    pub fn json(&self, path: &str, value: Value) {
        let body = Bytes::from(serde_json::to_vec(&value).unwrap());
        self.route(Method::Get, path, move |_| Ok(body.clone()));
    }

    pub fn bytes(&self, path: &str, body: Vec<u8>) {
        let body = Bytes::from(body);
        self.route(Method::Get, path, move |_| Ok(body.clone()));
    }

    pub fn status(&self, path: &str, status: u16) {
        self.route(Method::Get, path, move |url| {
            Err(ClientError::Http {
                status,
                url: url.to_string(),
            })
        });
    }

    pub fn requests(&self) -> Vec<(Method, Url)> {
        self.requests.lock().unwrap().clone()
    }

    /// Number of requests whose URL (without query) starts with `prefix`.
    pub fn count(&self, method: Method, prefix: &str) -> usize {
        let prefix = route_key(&self.url(prefix));
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, url)| *m == method && route_key(url).starts_with(&prefix))
            .count()
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    async fn answer(&self, method: Method, url: &Url) -> Result<Bytes, ClientError> {
        self.requests.lock().unwrap().push((method, url.clone()));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let handler = self
            .routes
            .lock()
            .unwrap()
            .get(&(method, route_key(url)))
            .cloned();
        match handler {
            Some(handler) => handler(url),
            None => Err(ClientError::Http {
                status: 404,
                url: url.to_string(),
            }),
        }
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn route_key(url: &Url) -> String {
    let mut url = url.clone();
    url.set_query(None);
    url.to_string()
}

#[async_trait]
impl Transport for MockTransport {
    async fn get_bytes(&self, url: &Url) -> Result<Bytes, ClientError> {
        self.answer(Method::Get, url).await
    }

    async fn post_form(&self, url: &Url, _form: &[(&str, &str)]) -> Result<Bytes, ClientError> {
        self.answer(Method::Post, url).await
    }

    async fn delete(&self, url: &Url) -> Result<(), ClientError> {
        self.answer(Method::Delete, url).await.map(|_| ())
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }

    fn base_uri(&self) -> &Url {
        &self.base
    }
}

// =============================================================================
// OMERO JSON Fixtures
// =============================================================================

/// One complete page of a JSON API collection.
pub fn page(items: Vec<Value>) -> Value {
    let total = items.len();
    json!({"data": items, "meta": {"totalCount": total, "limit": 200, "offset": 0}})
}

pub fn experimenter(id: i64, first: &str, last: &str) -> Value {
    json!({
        "@id": id,
        "FirstName": first,
        "LastName": last,
        "UserName": first.to_lowercase()
    })
}

fn details(owner: i64, group: i64) -> Value {
    json!({
        "owner": experimenter(owner, &format!("User{}", owner), "Test"),
        "group": {"@id": group, "Name": format!("group-{}", group)}
    })
}

pub fn project(id: i64, name: &str, owner: i64, group: i64) -> Value {
    json!({
        "@id": id,
        "Name": name,
        "omero:childCount": 1,
        "omero:details": details(owner, group)
    })
}

pub fn dataset(id: i64, name: &str, owner: i64, group: i64) -> Value {
    json!({
        "@id": id,
        "Name": name,
        "omero:details": details(owner, group)
    })
}

pub fn image(id: i64, name: &str, pixel_type: PixelType, width: u32, height: u32, channels: u32) -> Value {
    json!({
        "@id": id,
        "Name": name,
        "Pixels": {
            "Type": {"value": pixel_type.as_str()},
            "SizeX": width, "SizeY": height, "SizeZ": 1, "SizeC": channels, "SizeT": 1
        },
        "omero:details": details(2, 3)
    })
}

pub fn image_data(
    pixel_type: PixelType,
    width: u32,
    height: u32,
    channels: u32,
    levels: u32,
) -> Value {
    let channel_list: Vec<Value> = (0..channels)
        .map(|c| json!({"label": format!("C{}", c), "color": "FFFFFF"}))
        .collect();
    json!({
        "meta": {"pixelsType": pixel_type.as_str()},
        "size": {"width": width, "height": height, "z": 1, "t": 1, "c": channels},
        "levels": levels,
        "channels": channel_list
    })
}

/// Register groups `3` ("lab") and `4` ("core") with their members.
pub fn register_groups(transport: &MockTransport) {
    transport.json(
        "api/v0/m/experimentergroups/",
        page(vec![
            json!({"@id": 3, "Name": "lab"}),
            json!({"@id": 4, "Name": "core"}),
        ]),
    );
    transport.json(
        "api/v0/m/experimentergroups/3/experimenters/",
        page(vec![experimenter(2, "Jane", "Doe"), experimenter(5, "John", "Roe")]),
    );
    transport.json(
        "api/v0/m/experimentergroups/4/experimenters/",
        page(vec![experimenter(2, "Jane", "Doe")]),
    );
}

/// Register an image both in the JSON API and in `imgData`.
pub fn register_image(
    transport: &MockTransport,
    id: i64,
    pixel_type: PixelType,
    width: u32,
    height: u32,
    channels: u32,
    levels: u32,
) {
    transport.json(
        &format!("api/v0/m/images/{}/", id),
        json!({"data": image(id, &format!("image-{}", id), pixel_type, width, height, channels)}),
    );
    transport.json(
        &format!("webgateway/imgData/{}/", id),
        image_data(pixel_type, width, height, channels, levels),
    );
}

/// Mark the pixel buffer microservice as available.
pub fn enable_microservice(transport: &MockTransport) {
    transport.bytes("http://omero.test:8082/", b"OMERO pixel buffer".to_vec());
}

/// Build a client over `transport` with default options. The groups of
/// [`register_groups`] are registered first.
pub async fn build_client(transport: Arc<MockTransport>) -> Client<MockTransport> {
    register_groups(&transport);
    Client::from_transport(transport, 1, true, Some("jane".to_string()), ClientOptions::default())
        .await
        .expect("client should build over the mock transport")
}

// =============================================================================
// Pixel Payloads
// =============================================================================

/// Query parameter of a request URL.
pub fn query_param(url: &Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

/// Uncompressed single-channel TIFF holding `buffer`.
pub fn tiff_plane(width: u32, height: u32, buffer: &PixelBuffer) -> Vec<u8> {
    let (bits, format) = match buffer.pixel_type() {
        PixelType::Uint8 => (8, SampleFormat::Unsigned),
        PixelType::Uint16 => (16, SampleFormat::Unsigned),
        PixelType::Int16 => (16, SampleFormat::Signed),
        PixelType::Int32 => (32, SampleFormat::Signed),
        PixelType::Float32 => (32, SampleFormat::Float),
        PixelType::Float64 => (64, SampleFormat::Float),
        other => panic!("no TIFF encoding for {}", other),
    };
    encode_plane(width, height, bits, format, &buffer.to_bytes(ByteOrder::LittleEndian))
}

/// Plane of `width * height` uint16 samples, all equal to `value`.
pub fn u16_plane(width: u32, height: u32, value: u16) -> PixelBuffer {
    PixelBuffer::U16(vec![value; (width * height) as usize])
}

/// Serve microservice tiles of image `id` whose samples equal
/// `1000 * (channel + 1)`.
pub fn serve_u16_microservice_tiles(transport: &MockTransport, id: i64, channels: u32) {
    for channel in 0..channels {
        transport.route(
            Method::Get,
            &format!("http://omero.test:8082/tile/{}/0/{}/0", id, channel),
            move |url| {
                let width: u32 = query_param(url, "w").unwrap().parse().unwrap();
                let height: u32 = query_param(url, "h").unwrap().parse().unwrap();
                let plane = u16_plane(width, height, 1000 * (channel as u16 + 1));
                Ok(Bytes::from(tiff_plane(width, height, &plane)))
            },
        );
    }
}

/// Create a test RGB JPEG image.
pub fn create_test_rgb_jpeg(width: u32, height: u32, quality: u8) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        let r = (x % 256) as u8;
        let g = (y % 256) as u8;
        let b = ((x + y) % 256) as u8;
        Rgb([r, g, b])
    });

    let mut buf = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut buf, quality);
    encoder.encode_image(&img).unwrap();
    buf
}

/// Create a solid-color PNG, as returned for thumbnails.
pub fn create_test_png(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
    let img = RgbImage::from_pixel(width, height, Rgb(color));
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png).unwrap();
    buf.into_inner()
}

// =============================================================================
// Fake OMERO Web Server
// =============================================================================

pub const FAKE_CSRF_TOKEN: &str = "csrf-token-123";
pub const FAKE_PASSWORD: &str = "secret";

#[derive(Clone)]
struct FakeState {
    base: String,
    logins: Arc<AtomicUsize>,
    logouts: Arc<AtomicUsize>,
}

/// A running fake OMERO web server.
pub struct FakeOmero {
    pub base: String,
    logins: Arc<AtomicUsize>,
    logouts: Arc<AtomicUsize>,
}

impl FakeOmero {
    pub fn login_count(&self) -> usize {
        self.logins.load(Ordering::SeqCst)
    }

    pub fn logout_count(&self) -> usize {
        self.logouts.load(Ordering::SeqCst)
    }
}

/// Start a fake OMERO web server on an ephemeral port.
///
/// It serves API discovery, CSRF tokens, login (password
/// [`FAKE_PASSWORD`]), logout, one project listing and a thumbnail. `/slow/`
/// answers after five seconds.
pub async fn spawn_fake_omero() -> FakeOmero {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let state = FakeState {
        base: base.clone(),
        logins: Arc::new(AtomicUsize::new(0)),
        logouts: Arc::new(AtomicUsize::new(0)),
    };

    let app = Router::new()
        .route("/api/", get(api_versions))
        .route("/api/v0/token/", get(|| async { Json(json!({"data": FAKE_CSRF_TOKEN})) }))
        .route(
            "/api/v0/servers/",
            get(|| async { Json(json!({"data": [{"id": 1, "host": "localhost", "port": 4064}]})) }),
        )
        .route("/api/v0/login/", post(login))
        .route("/webclient/logout/", post(logout))
        .route(
            "/api/v0/m/experimentergroups/",
            get(|| async { Json(page(vec![json!({"@id": 3, "Name": "lab"})])) }),
        )
        .route(
            "/api/v0/m/experimentergroups/{id}/experimenters/",
            get(|| async { Json(page(vec![experimenter(2, "Jane", "Doe")])) }),
        )
        .route(
            "/api/v0/m/projects/",
            get(|| async { Json(page(vec![project(11, "Public project", 2, 3)])) }),
        )
        .route(
            "/webgateway/render_thumbnail/{id}/{size}/",
            get(|| async { create_test_png(16, 16, [10, 20, 30]) }),
        )
        .route(
            "/slow/",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "late"
            }),
        )
        .with_state(state.clone());

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    FakeOmero {
        base,
        logins: state.logins,
        logouts: state.logouts,
    }
}

async fn api_versions(State(state): State<FakeState>) -> Json<Value> {
    Json(json!({
        "data": [{"version": "0", "url:base": format!("{}/api/v0/", state.base)}]
    }))
}

async fn login(
    State(state): State<FakeState>,
    headers: HeaderMap,
    Form(form): Form<HashMap<String, String>>,
) -> (StatusCode, Json<Value>) {
    state.logins.fetch_add(1, Ordering::SeqCst);

    let csrf_ok = headers
        .get("X-CSRFToken")
        .and_then(|value| value.to_str().ok())
        == Some(FAKE_CSRF_TOKEN);
    if !csrf_ok {
        return (StatusCode::FORBIDDEN, Json(json!({"message": "CSRF check failed"})));
    }

    if form.get("password").map(String::as_str) != Some(FAKE_PASSWORD) {
        return (
            StatusCode::FORBIDDEN,
            Json(json!({"message": "Error: Login failed"})),
        );
    }

    let username = form.get("username").cloned().unwrap_or_default();
    (
        StatusCode::OK,
        Json(json!({
            "success": true,
            "eventContext": {"userId": 2, "userName": username, "groupId": 3}
        })),
    )
}

async fn logout(State(state): State<FakeState>) -> StatusCode {
    state.logouts.fetch_add(1, Ordering::SeqCst);
    StatusCode::OK
}
