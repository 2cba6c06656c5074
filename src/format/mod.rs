//! Binary formats returned by the pixel backends.
//!
//! Only TIFF is parsed here. JPEG responses from the web API are decoded
//! with the `image` crate directly by the web reader.

pub mod tiff;
