//! Entity hierarchy and browser state.
//!
//! - [`HierarchyModel`]: lazily loaded tree of projects, datasets and images
//!   below the server root, plus the synthetic orphaned-image folder
//! - [`BrowserModel`]: observable snapshot of loading counters, selections
//!   and opened images

mod browser;
mod model;

pub use browser::{
    importable, Activity, ActivityGuard, BrowserModel, BrowserState, PUBLIC_USERNAME,
};
pub use model::{
    Children, EntityFilter, HierarchyModel, LoadState, NodeId, MAX_CONCURRENT_IMAGE_LOADS,
};
