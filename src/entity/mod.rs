//! Domain entities of an OMERO server.
//!
//! ```text
//! Server ─┬─ Group ⇄ Owner            (many-to-many, fixed per session)
//!         ├─ Project ── Dataset ── Image
//!         └─ OrphanedFolder ── Image  (images without a dataset)
//! ```
//!
//! [`RepositoryEntity`] is the closed set of nodes that can appear below the
//! server. Parent/child links are owned by the hierarchy model, not by the
//! entities themselves.

mod group;
mod image;
mod repository;

pub use group::{Group, GroupRef, Owner, ALL_ID};
pub use image::{Channel, ChannelColor, Image, ImageDimensions, PhysicalSize, PixelType};
pub use repository::{
    Dataset, EntityKind, Project, RepositoryEntity, Server, ORPHANED_FOLDER_LABEL,
};
