//! In-memory decoding of single-IFD, uncompressed strip rasters.
//!
//! The pixel buffer microservice answers each tile request with a small TIFF
//! holding one plane of one channel. The whole response is already in
//! memory, so entries are resolved directly against the buffer.

use tracing::trace;

use crate::entity::PixelType;
use crate::error::TiffError;

use super::parser::{slice_at, ByteOrder, TiffHeader};
use super::tags::{FieldType, SampleFormat, TiffTag, COMPRESSION_NONE};

/// Upper bound on entries in one IFD; real rasters carry about a dozen.
const MAX_IFD_ENTRIES: u64 = 4096;

// =============================================================================
// IFD
// =============================================================================

/// One entry of an Image File Directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IfdEntry {
    /// Numeric tag id
    pub tag_id: u16,

    /// Field type, `None` when the type code is unknown
    pub field_type: Option<FieldType>,

    /// Raw type code as read from the file
    pub type_code: u16,

    /// Number of values
    pub count: u64,

    /// Absolute position of the values in the buffer (inline or not)
    pub data_offset: u64,
}

/// A parsed Image File Directory.
#[derive(Debug, Clone, Default)]
pub struct Ifd {
    pub entries: Vec<IfdEntry>,
}

impl Ifd {
    /// Parse the IFD at `offset`.
    pub fn parse(bytes: &[u8], header: &TiffHeader, offset: u64) -> Result<Self, TiffError> {
        let byte_order = header.byte_order;
        let count_field = slice_at(bytes, offset, header.ifd_count_size())?;
        let entry_count = if header.is_bigtiff {
            byte_order.read_u64(count_field)
        } else {
            byte_order.read_u16(count_field) as u64
        };
        if entry_count > MAX_IFD_ENTRIES {
            return Err(TiffError::InvalidIfdOffset(offset));
        }

        let first_entry = offset + header.ifd_count_size() as u64;
        let mut entries = Vec::with_capacity(entry_count as usize);

        for index in 0..entry_count {
            let position = first_entry + index * header.ifd_entry_size() as u64;
            let raw = slice_at(bytes, position, header.ifd_entry_size())?;

            let tag_id = byte_order.read_u16(&raw[0..2]);
            let type_code = byte_order.read_u16(&raw[2..4]);
            let (count, value_field) = if header.is_bigtiff {
                (byte_order.read_u64(&raw[4..12]), 12usize)
            } else {
                (byte_order.read_u32(&raw[4..8]) as u64, 8usize)
            };
            let field_type = FieldType::from_u16(type_code);

            let data_offset = match field_type {
                Some(ft) if ft.fits_inline(count, header.is_bigtiff) => {
                    position + value_field as u64
                }
                _ => header.read_offset(&raw[value_field..]),
            };

            entries.push(IfdEntry {
                tag_id,
                field_type,
                type_code,
                count,
                data_offset,
            });
        }

        Ok(Self { entries })
    }

    pub fn entry(&self, tag: TiffTag) -> Option<&IfdEntry> {
        self.entries.iter().find(|e| e.tag_id == tag.as_u16())
    }

    /// All integer values of `tag`, or `None` if the tag is absent.
    pub fn values(
        &self,
        bytes: &[u8],
        byte_order: ByteOrder,
        tag: TiffTag,
    ) -> Result<Option<Vec<u64>>, TiffError> {
        let Some(entry) = self.entry(tag) else {
            return Ok(None);
        };
        let field_type = entry
            .field_type
            .ok_or(TiffError::UnknownFieldType(entry.type_code))?;
        if !field_type.is_integer() {
            return Err(TiffError::InvalidTagValue {
                tag: tag.name(),
                message: format!("expected an integer type, got {:?}", field_type),
            });
        }

        let size = field_type.size_in_bytes();
        let total = (entry.count as usize)
            .checked_mul(size)
            .ok_or(TiffError::InvalidTagValue {
                tag: tag.name(),
                message: format!("count {} overflows", entry.count),
            })?;
        let data = slice_at(bytes, entry.data_offset, total)?;

        let values = data
            .chunks_exact(size)
            .map(|chunk| match field_type {
                FieldType::Byte => chunk[0] as u64,
                FieldType::Short => byte_order.read_u16(chunk) as u64,
                FieldType::Long => byte_order.read_u32(chunk) as u64,
                _ => byte_order.read_u64(chunk),
            })
            .collect();
        Ok(Some(values))
    }

    /// First value of `tag`, or `None` if the tag is absent or empty.
    pub fn value(
        &self,
        bytes: &[u8],
        byte_order: ByteOrder,
        tag: TiffTag,
    ) -> Result<Option<u64>, TiffError> {
        Ok(self
            .values(bytes, byte_order, tag)?
            .and_then(|values| values.first().copied()))
    }

    fn required(
        &self,
        bytes: &[u8],
        byte_order: ByteOrder,
        tag: TiffTag,
    ) -> Result<u64, TiffError> {
        self.value(bytes, byte_order, tag)?
            .ok_or(TiffError::MissingTag(tag.name()))
    }
}

// =============================================================================
// Raster
// =============================================================================

/// Pixel samples of the first image of a TIFF, de-stripped.
#[derive(Debug, Clone, PartialEq)]
pub struct Raster {
    pub width: u32,
    pub height: u32,
    pub samples_per_pixel: u16,
    pub bits_per_sample: u16,
    pub sample_format: SampleFormat,

    /// Byte order of `data`
    pub byte_order: ByteOrder,

    /// Row-major samples, exactly `width * height * samples_per_pixel`
    /// samples long
    pub data: Vec<u8>,
}

impl Raster {
    /// Decode the first IFD of an in-memory TIFF.
    ///
    /// # Errors
    /// Header errors, `MissingTag` for absent dimensions or strip tags,
    /// `UnsupportedCompression` for anything but uncompressed data and
    /// `Truncated` when the strips hold fewer bytes than the dimensions
    /// require.
    pub fn decode(bytes: &[u8]) -> Result<Self, TiffError> {
        let header = TiffHeader::parse(bytes)?;
        let order = header.byte_order;
        let ifd = Ifd::parse(bytes, &header, header.first_ifd_offset)?;

        let width = ifd.required(bytes, order, TiffTag::ImageWidth)?;
        let height = ifd.required(bytes, order, TiffTag::ImageLength)?;

        let compression = ifd
            .value(bytes, order, TiffTag::Compression)?
            .unwrap_or(COMPRESSION_NONE as u64) as u16;
        if compression != COMPRESSION_NONE {
            return Err(TiffError::UnsupportedCompression(compression));
        }

        let samples_per_pixel = ifd
            .value(bytes, order, TiffTag::SamplesPerPixel)?
            .unwrap_or(1) as u16;

        let bits = ifd
            .values(bytes, order, TiffTag::BitsPerSample)?
            .unwrap_or_else(|| vec![1]);
        let bits_per_sample = bits.first().copied().unwrap_or(1) as u16;
        if bits.iter().any(|&b| b != bits_per_sample as u64) {
            return Err(TiffError::InvalidTagValue {
                tag: TiffTag::BitsPerSample.name(),
                message: format!("mixed sample sizes {:?}", bits),
            });
        }
        if !matches!(bits_per_sample, 8 | 16 | 32 | 64) {
            return Err(TiffError::InvalidTagValue {
                tag: TiffTag::BitsPerSample.name(),
                message: format!("{} bits per sample is not byte aligned", bits_per_sample),
            });
        }

        let format_code = ifd
            .value(bytes, order, TiffTag::SampleFormat)?
            .unwrap_or(1) as u16;
        let sample_format =
            SampleFormat::from_u16(format_code).ok_or_else(|| TiffError::InvalidTagValue {
                tag: TiffTag::SampleFormat.name(),
                message: format!("unknown sample format {}", format_code),
            })?;

        let offsets = ifd
            .values(bytes, order, TiffTag::StripOffsets)?
            .ok_or(TiffError::MissingTag(TiffTag::StripOffsets.name()))?;
        let counts = ifd
            .values(bytes, order, TiffTag::StripByteCounts)?
            .ok_or(TiffError::MissingTag(TiffTag::StripByteCounts.name()))?;
        if offsets.len() != counts.len() {
            return Err(TiffError::InvalidTagValue {
                tag: TiffTag::StripByteCounts.name(),
                message: format!("{} strips but {} byte counts", offsets.len(), counts.len()),
            });
        }

        let expected = width * height * samples_per_pixel as u64 * (bits_per_sample as u64 / 8);
        let mut data = Vec::with_capacity(expected as usize);
        for (&offset, &count) in offsets.iter().zip(&counts) {
            if data.len() as u64 >= expected {
                break;
            }
            data.extend_from_slice(slice_at(bytes, offset, count as usize)?);
        }
        if (data.len() as u64) < expected {
            return Err(TiffError::Truncated {
                required: expected,
                actual: data.len() as u64,
            });
        }
        data.truncate(expected as usize);

        trace!(
            "Decoded {}x{} raster, {} bits, {} strips",
            width,
            height,
            bits_per_sample,
            offsets.len()
        );

        Ok(Self {
            width: width as u32,
            height: height as u32,
            samples_per_pixel,
            bits_per_sample,
            sample_format,
            byte_order: order,
            data,
        })
    }

    /// OMERO pixel type matching the sample layout, if any.
    pub fn pixel_type(&self) -> Option<PixelType> {
        match (self.bits_per_sample, self.sample_format) {
            (8, SampleFormat::Unsigned) => Some(PixelType::Uint8),
            (8, SampleFormat::Signed) => Some(PixelType::Int8),
            (16, SampleFormat::Unsigned) => Some(PixelType::Uint16),
            (16, SampleFormat::Signed) => Some(PixelType::Int16),
            (32, SampleFormat::Unsigned) => Some(PixelType::Uint32),
            (32, SampleFormat::Signed) => Some(PixelType::Int32),
            (32, SampleFormat::Float) => Some(PixelType::Float32),
            (64, SampleFormat::Float) => Some(PixelType::Float64),
            _ => None,
        }
    }
}

// =============================================================================
// Encoding (test support)
// =============================================================================

/// Encode one uncompressed little-endian plane as a classic TIFF.
///
/// Produces the layout the microservice returns: a single IFD followed by
/// two strips. Used by tests and fake servers.
pub fn encode_plane(
    width: u32,
    height: u32,
    bits_per_sample: u16,
    sample_format: SampleFormat,
    samples: &[u8],
) -> Vec<u8> {
    let format_code: u16 = match sample_format {
        SampleFormat::Unsigned => 1,
        SampleFormat::Signed => 2,
        SampleFormat::Float => 3,
    };
    let row_bytes = width as usize * (bits_per_sample as usize / 8);
    let rows_first = (height as usize).div_ceil(2).max(1);
    let split = (row_bytes * rows_first).min(samples.len());

    const ENTRIES: u16 = 10;
    let ifd_offset: u32 = 8;
    let ifd_size = 2 + ENTRIES as u32 * 12 + 4;
    let strip_offsets_pos = ifd_offset + ifd_size;
    let strip_counts_pos = strip_offsets_pos + 8;
    let data_start = strip_counts_pos + 8;

    let mut out = Vec::with_capacity(data_start as usize + samples.len());
    out.extend_from_slice(b"II");
    out.extend_from_slice(&42u16.to_le_bytes());
    out.extend_from_slice(&ifd_offset.to_le_bytes());
    out.extend_from_slice(&ENTRIES.to_le_bytes());

    let mut entry = |tag: u16, field_type: u16, count: u32, value: u32| {
        out.extend_from_slice(&tag.to_le_bytes());
        out.extend_from_slice(&field_type.to_le_bytes());
        out.extend_from_slice(&count.to_le_bytes());
        out.extend_from_slice(&value.to_le_bytes());
    };
    entry(256, 4, 1, width);
    entry(257, 4, 1, height);
    entry(258, 3, 1, bits_per_sample as u32);
    entry(259, 3, 1, 1);
    entry(262, 3, 1, 1);
    entry(273, 4, 2, strip_offsets_pos);
    entry(277, 3, 1, 1);
    entry(278, 4, 1, rows_first as u32);
    entry(279, 4, 2, strip_counts_pos);
    entry(339, 3, 1, format_code as u32);
    out.extend_from_slice(&0u32.to_le_bytes());

    out.extend_from_slice(&data_start.to_le_bytes());
    out.extend_from_slice(&(data_start + split as u32).to_le_bytes());
    out.extend_from_slice(&(split as u32).to_le_bytes());
    out.extend_from_slice(&((samples.len() - split) as u32).to_le_bytes());
    out.extend_from_slice(samples);
    out
}
