//! Raw sample decoding and channel composition.
//!
//! Backends deliver one plane per channel as raw bytes. Each plane is
//! reinterpreted as typed samples ([`PixelBuffer`]) and the planes of one
//! tile are composed into a banded [`TileImage`].

use crate::entity::PixelType;
use crate::error::ClientError;
use crate::format::tiff::ByteOrder;

// =============================================================================
// PixelBuffer
// =============================================================================

/// Typed samples of one channel plane, row-major.
#[derive(Debug, Clone, PartialEq)]
pub enum PixelBuffer {
    U8(Vec<u8>),
    I16(Vec<i16>),
    U16(Vec<u16>),
    I32(Vec<i32>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

fn read_samples<T, const N: usize>(bytes: &[u8], convert: fn([u8; N]) -> T) -> Vec<T> {
    bytes
        .chunks_exact(N)
        .map(|chunk| {
            let mut raw = [0u8; N];
            raw.copy_from_slice(chunk);
            convert(raw)
        })
        .collect()
}

macro_rules! decode_as {
    ($variant:ident, $ty:ty, $bytes:expr, $order:expr) => {
        PixelBuffer::$variant(match $order {
            ByteOrder::LittleEndian => read_samples($bytes, <$ty>::from_le_bytes),
            ByteOrder::BigEndian => read_samples($bytes, <$ty>::from_be_bytes),
        })
    };
}

macro_rules! encode_as {
    ($samples:expr, $order:expr) => {
        match $order {
            ByteOrder::LittleEndian => $samples.iter().flat_map(|s| s.to_le_bytes()).collect(),
            ByteOrder::BigEndian => $samples.iter().flat_map(|s| s.to_be_bytes()).collect(),
        }
    };
}

impl PixelBuffer {
    /// Reinterpret `bytes` as `samples` values of `pixel_type`.
    ///
    /// # Errors
    /// `Decode` if the type has no decoder or if the byte length does not
    /// match `samples * bytes_per_sample`.
    pub fn decode(
        bytes: &[u8],
        pixel_type: PixelType,
        order: ByteOrder,
        samples: usize,
    ) -> Result<Self, ClientError> {
        if !pixel_type.is_decodable() {
            return Err(ClientError::Decode(format!(
                "pixel type {} cannot be decoded",
                pixel_type
            )));
        }
        let expected = samples * pixel_type.bytes_per_sample();
        if bytes.len() != expected {
            return Err(ClientError::Decode(format!(
                "expected {} bytes for {} {} samples, got {}",
                expected,
                samples,
                pixel_type,
                bytes.len()
            )));
        }

        Ok(match pixel_type {
            PixelType::Uint8 => PixelBuffer::U8(bytes.to_vec()),
            PixelType::Int16 => decode_as!(I16, i16, bytes, order),
            PixelType::Uint16 => decode_as!(U16, u16, bytes, order),
            PixelType::Int32 => decode_as!(I32, i32, bytes, order),
            PixelType::Float32 => decode_as!(F32, f32, bytes, order),
            PixelType::Float64 => decode_as!(F64, f64, bytes, order),
            PixelType::Int8 | PixelType::Uint32 => unreachable!("checked by is_decodable"),
        })
    }

    /// Serialize back to raw bytes in `order`.
    pub fn to_bytes(&self, order: ByteOrder) -> Vec<u8> {
        match self {
            PixelBuffer::U8(samples) => samples.clone(),
            PixelBuffer::I16(samples) => encode_as!(samples, order),
            PixelBuffer::U16(samples) => encode_as!(samples, order),
            PixelBuffer::I32(samples) => encode_as!(samples, order),
            PixelBuffer::F32(samples) => encode_as!(samples, order),
            PixelBuffer::F64(samples) => encode_as!(samples, order),
        }
    }

    pub fn pixel_type(&self) -> PixelType {
        match self {
            PixelBuffer::U8(_) => PixelType::Uint8,
            PixelBuffer::I16(_) => PixelType::Int16,
            PixelBuffer::U16(_) => PixelType::Uint16,
            PixelBuffer::I32(_) => PixelType::Int32,
            PixelBuffer::F32(_) => PixelType::Float32,
            PixelBuffer::F64(_) => PixelType::Float64,
        }
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        match self {
            PixelBuffer::U8(s) => s.len(),
            PixelBuffer::I16(s) => s.len(),
            PixelBuffer::U16(s) => s.len(),
            PixelBuffer::I32(s) => s.len(),
            PixelBuffer::F32(s) => s.len(),
            PixelBuffer::F64(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Memory footprint of the samples in bytes.
    pub fn byte_size(&self) -> usize {
        self.len() * self.pixel_type().bytes_per_sample()
    }

    /// Sample at `index` widened to `f64`.
    pub fn get_f64(&self, index: usize) -> Option<f64> {
        match self {
            PixelBuffer::U8(s) => s.get(index).map(|&v| v as f64),
            PixelBuffer::I16(s) => s.get(index).map(|&v| v as f64),
            PixelBuffer::U16(s) => s.get(index).map(|&v| v as f64),
            PixelBuffer::I32(s) => s.get(index).map(|&v| v as f64),
            PixelBuffer::F32(s) => s.get(index).map(|&v| v as f64),
            PixelBuffer::F64(s) => s.get(index).copied(),
        }
    }
}

// =============================================================================
// TileImage
// =============================================================================

/// A decoded tile: one band per channel, all of the same pixel type.
#[derive(Debug, Clone, PartialEq)]
pub struct TileImage {
    width: u32,
    height: u32,
    pixel_type: PixelType,
    bands: Vec<PixelBuffer>,
}

/// Summary statistics of one band.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
}

impl TileImage {
    /// Compose per-channel planes into one tile.
    ///
    /// A single uint8 plane is wrapped as-is; every other layout goes
    /// through the general path, which checks that all planes share the
    /// pixel type and hold `width * height` samples.
    pub fn compose(
        width: u32,
        height: u32,
        channels: Vec<PixelBuffer>,
    ) -> Result<Self, ClientError> {
        let samples = width as usize * height as usize;

        if let [PixelBuffer::U8(plane)] = channels.as_slice() {
            if plane.len() == samples {
                return Ok(Self {
                    width,
                    height,
                    pixel_type: PixelType::Uint8,
                    bands: channels,
                });
            }
        }

        let pixel_type = channels
            .first()
            .map(PixelBuffer::pixel_type)
            .ok_or_else(|| ClientError::Decode("tile has no channels".to_string()))?;

        for (index, band) in channels.iter().enumerate() {
            if band.pixel_type() != pixel_type {
                return Err(ClientError::Decode(format!(
                    "channel {} is {} but channel 0 is {}",
                    index,
                    band.pixel_type(),
                    pixel_type
                )));
            }
            if band.len() != samples {
                return Err(ClientError::Decode(format!(
                    "channel {} has {} samples, expected {}x{}",
                    index,
                    band.len(),
                    width,
                    height
                )));
            }
        }

        Ok(Self {
            width,
            height,
            pixel_type,
            bands: channels,
        })
    }

    /// Wrap an 8-bit RGB image (as decoded from JPEG) as a 3-band tile.
    pub fn from_rgb8(image: image::RgbImage) -> Self {
        let (width, height) = image.dimensions();
        let mut bands = vec![Vec::with_capacity(image.len() / 3); 3];
        for pixel in image.pixels() {
            for (band, value) in bands.iter_mut().zip(pixel.0) {
                band.push(value);
            }
        }
        Self {
            width,
            height,
            pixel_type: PixelType::Uint8,
            bands: bands.into_iter().map(PixelBuffer::U8).collect(),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixel_type(&self) -> PixelType {
        self.pixel_type
    }

    pub fn band_count(&self) -> usize {
        self.bands.len()
    }

    pub fn band(&self, index: usize) -> Option<&PixelBuffer> {
        self.bands.get(index)
    }

    pub fn bands(&self) -> &[PixelBuffer] {
        &self.bands
    }

    /// Sample of `band` at pixel (x, y), widened to `f64`.
    pub fn sample(&self, x: u32, y: u32, band: usize) -> Option<f64> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.bands
            .get(band)?
            .get_f64(y as usize * self.width as usize + x as usize)
    }

    /// Memory footprint of all bands in bytes.
    pub fn byte_size(&self) -> usize {
        self.bands.iter().map(PixelBuffer::byte_size).sum()
    }

    /// Min/max/mean of one band, `None` for an empty or missing band.
    pub fn band_stats(&self, band: usize) -> Option<BandStats> {
        let buffer = self.bands.get(band)?;
        if buffer.is_empty() {
            return None;
        }
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut sum = 0.0;
        for value in (0..buffer.len()).filter_map(|i| buffer.get_f64(i)) {
            min = min.min(value);
            max = max.max(value);
            sum += value;
        }
        Some(BandStats {
            min,
            max,
            mean: sum / buffer.len() as f64,
        })
    }
}
