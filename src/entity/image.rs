use std::fmt;
use std::str::FromStr;

use super::group::{GroupRef, Owner};

// =============================================================================
// Pixel Type
// =============================================================================

/// Sample type of an image's pixels, as declared by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelType {
    Uint8,
    Int8,
    Uint16,
    Int16,
    Uint32,
    Int32,
    Float32,
    Float64,
}

impl PixelType {
    /// Size of one sample in bytes.
    pub const fn bytes_per_sample(self) -> usize {
        match self {
            PixelType::Uint8 | PixelType::Int8 => 1,
            PixelType::Uint16 | PixelType::Int16 => 2,
            PixelType::Uint32 | PixelType::Int32 | PixelType::Float32 => 4,
            PixelType::Float64 => 8,
        }
    }

    /// Whether raw samples of this type can be decoded into channel planes.
    ///
    /// Signed 8-bit and unsigned 32-bit samples have no decoder.
    pub const fn is_decodable(self) -> bool {
        !matches!(self, PixelType::Int8 | PixelType::Uint32)
    }

    /// Name used by the OMERO APIs.
    pub const fn as_str(self) -> &'static str {
        match self {
            PixelType::Uint8 => "uint8",
            PixelType::Int8 => "int8",
            PixelType::Uint16 => "uint16",
            PixelType::Int16 => "int16",
            PixelType::Uint32 => "uint32",
            PixelType::Int32 => "int32",
            PixelType::Float32 => "float",
            PixelType::Float64 => "double",
        }
    }
}

impl fmt::Display for PixelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PixelType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "uint8" => Ok(PixelType::Uint8),
            "int8" => Ok(PixelType::Int8),
            "uint16" => Ok(PixelType::Uint16),
            "int16" => Ok(PixelType::Int16),
            "uint32" => Ok(PixelType::Uint32),
            "int32" => Ok(PixelType::Int32),
            "float" | "float32" => Ok(PixelType::Float32),
            "double" | "float64" => Ok(PixelType::Float64),
            other => Err(format!("unknown pixel type '{}'", other)),
        }
    }
}

// =============================================================================
// Channels and dimensions
// =============================================================================

/// RGB display color of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl ChannelColor {
    pub const WHITE: ChannelColor = ChannelColor::new(255, 255, 255);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Parse "RRGGBB" (webgateway format), with or without a leading '#'.
    pub fn from_hex(hex: &str) -> Option<Self> {
        let hex = hex.trim().trim_start_matches('#');
        if hex.len() != 6 {
            return None;
        }
        let value = u32::from_str_radix(hex, 16).ok()?;
        Some(Self::new(
            (value >> 16) as u8,
            (value >> 8) as u8,
            value as u8,
        ))
    }

    /// Decode the packed signed RGBA integer used by the JSON API.
    pub fn from_rgba_int(value: i64) -> Self {
        let value = value as u32;
        Self::new((value >> 24) as u8, (value >> 16) as u8, (value >> 8) as u8)
    }

    pub fn to_hex(self) -> String {
        format!("{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

/// One channel of an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    pub name: String,
    pub color: ChannelColor,
}

impl Channel {
    pub fn new(name: impl Into<String>, color: ChannelColor) -> Self {
        Self {
            name: name.into(),
            color,
        }
    }
}

/// Extent of an image along each axis plus its pyramid depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageDimensions {
    pub width: u32,
    pub height: u32,
    pub size_z: u32,
    pub size_c: u32,
    pub size_t: u32,
    /// Number of resolution levels (1 for non-pyramidal images)
    pub resolution_levels: u32,
    /// Tile grid (width, height) of pyramidal images, when reported
    pub tile_size: Option<(u32, u32)>,
}

impl Default for ImageDimensions {
    fn default() -> Self {
        Self {
            width: 0,
            height: 0,
            size_z: 1,
            size_c: 1,
            size_t: 1,
            resolution_levels: 1,
            tile_size: None,
        }
    }
}

/// Physical size of one pixel.
#[derive(Debug, Clone, PartialEq)]
pub struct PhysicalSize {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub z: Option<f64>,
    pub unit: String,
}

// =============================================================================
// Image
// =============================================================================

/// An image on the server.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    pub id: i64,
    pub name: String,
    pub owner: Option<Owner>,
    pub group: Option<GroupRef>,
    pub acquisition_date: Option<String>,
    /// `None` when the server did not report it (image cannot be opened)
    pub pixel_type: Option<PixelType>,
    pub channels: Vec<Channel>,
    pub dimensions: ImageDimensions,
    pub physical_size: Option<PhysicalSize>,
}

impl Image {
    /// Minimal image with only an identity and a name.
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            owner: None,
            group: None,
            acquisition_date: None,
            pixel_type: None,
            channels: Vec::new(),
            dimensions: ImageDimensions::default(),
            physical_size: None,
        }
    }

    /// Number of channels, preferring the channel list when present.
    pub fn channel_count(&self) -> usize {
        if self.channels.is_empty() {
            self.dimensions.size_c as usize
        } else {
            self.channels.len()
        }
    }

    /// Size of all planes of the full-resolution image, in bytes.
    pub fn uncompressed_size(&self) -> Option<u64> {
        let pixel_type = self.pixel_type?;
        let d = &self.dimensions;
        Some(
            d.width as u64
                * d.height as u64
                * d.size_z as u64
                * self.channel_count() as u64
                * d.size_t as u64
                * pixel_type.bytes_per_sample() as u64,
        )
    }

    /// Name/value pairs describing the image, for display.
    pub fn attributes(&self) -> Vec<(String, String)> {
        let d = &self.dimensions;
        let physical = |value: Option<f64>| match (&self.physical_size, value) {
            (Some(size), Some(value)) => format!("{} {}", value, size.unit),
            _ => "-".to_string(),
        };

        vec![
            ("Name".to_string(), self.name.clone()),
            ("Id".to_string(), self.id.to_string()),
            (
                "Owner".to_string(),
                self.owner
                    .as_ref()
                    .map(Owner::full_name)
                    .unwrap_or_else(|| "-".to_string()),
            ),
            (
                "Group".to_string(),
                self.group
                    .as_ref()
                    .map(|g| g.name.clone())
                    .unwrap_or_else(|| "-".to_string()),
            ),
            (
                "Acquisition date".to_string(),
                self.acquisition_date.clone().unwrap_or_else(|| "-".to_string()),
            ),
            ("Image width".to_string(), format!("{} px", d.width)),
            ("Image height".to_string(), format!("{} px", d.height)),
            (
                "Uncompressed size".to_string(),
                self.uncompressed_size()
                    .map(format_bytes)
                    .unwrap_or_else(|| "-".to_string()),
            ),
            ("Number of slices (z)".to_string(), d.size_z.to_string()),
            ("Number of channels".to_string(), self.channel_count().to_string()),
            ("Number of time points".to_string(), d.size_t.to_string()),
            ("Pixel size X".to_string(), physical(self.physical_size.as_ref().and_then(|p| p.x))),
            ("Pixel size Y".to_string(), physical(self.physical_size.as_ref().and_then(|p| p.y))),
            ("Pixel size Z".to_string(), physical(self.physical_size.as_ref().and_then(|p| p.z))),
            (
                "Pixel type".to_string(),
                self.pixel_type
                    .map(|p| p.to_string())
                    .unwrap_or_else(|| "-".to_string()),
            ),
        ]
    }
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
