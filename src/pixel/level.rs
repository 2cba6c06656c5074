//! Resolution level numbering.
//!
//! Tile requests number levels from the full-resolution image (level 0)
//! downwards. Each backend declares how its own numbering relates to that.

/// How a backend numbers resolution levels relative to tile requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelMapping {
    /// Backend level 0 is the lowest resolution
    Reversed,
    /// Backend level 0 is the full resolution
    Identity,
}

impl LevelMapping {
    /// Translate a request level into the backend's numbering.
    ///
    /// Returns `None` when `level` is outside `0..level_count`.
    pub fn to_backend(self, level: u32, level_count: u32) -> Option<u32> {
        if level >= level_count {
            return None;
        }
        Some(match self {
            LevelMapping::Reversed => level_count - 1 - level,
            LevelMapping::Identity => level,
        })
    }

    /// Translate a backend level back into request numbering.
    pub fn from_backend(self, level: u32, level_count: u32) -> Option<u32> {
        // Both mappings are involutions
        self.to_backend(level, level_count)
    }
}
