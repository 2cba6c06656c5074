mod session;
mod transport;

pub use session::{Credentials, SessionOptions, SessionUser, WebSession, DEFAULT_REQUEST_TIMEOUT};
pub use transport::{normalize_base_uri, Transport, DEFAULT_API_PATH};
