//! In-memory TIFF decoding.
//!
//! - **Byte order**: TIFF files declare their endianness (II = little-endian,
//!   MM = big-endian) in the header. All multi-byte values must be read
//!   respecting this order.
//!
//! - **Classic TIFF vs BigTIFF**: 32-bit vs 64-bit offsets; both are handled.
//!
//! - **Strips**: the rasters decoded here are stored as uncompressed strips,
//!   concatenated in order to form the plane.

mod parser;
mod raster;
mod tags;

pub use parser::{ByteOrder, TiffHeader, BIGTIFF_HEADER_SIZE, TIFF_HEADER_SIZE};
pub use raster::{encode_plane, Ifd, IfdEntry, Raster};
pub use tags::{FieldType, SampleFormat, TiffTag};
