//! Observable browser state.
//!
//! The presentation layer never touches the hierarchy or the caches
//! directly: it subscribes to [`BrowserState`] snapshots, published over a
//! `tokio::sync::watch` channel whenever one of the counters or selections
//! changes.

use std::collections::BTreeSet;

use tokio::sync::watch;

use crate::entity::{Group, Image, Owner, RepositoryEntity};
use crate::pixel::PixelApiKind;

/// Label shown instead of a username for public sessions.
pub const PUBLIC_USERNAME: &str = "public";

/// Snapshot of everything the browser displays.
#[derive(Debug, Clone, PartialEq)]
pub struct BrowserState {
    pub authenticated: bool,
    pub username: Option<String>,

    /// Child listings currently being loaded
    pub entities_loading: usize,

    pub orphaned_images_loaded: usize,
    pub orphaned_images_total: usize,

    /// Thumbnails currently being fetched
    pub thumbnails_loading: usize,

    pub selected_pixel_api: Option<PixelApiKind>,
    pub selected_group: Group,
    pub selected_owner: Owner,

    /// Webclient URIs of the images currently opened
    pub opened_images: BTreeSet<String>,
}

impl Default for BrowserState {
    fn default() -> Self {
        Self {
            authenticated: false,
            username: None,
            entities_loading: 0,
            orphaned_images_loaded: 0,
            orphaned_images_total: 0,
            thumbnails_loading: 0,
            selected_pixel_api: None,
            selected_group: Group::all_groups(),
            selected_owner: Owner::all_members(),
            opened_images: BTreeSet::new(),
        }
    }
}

impl BrowserState {
    /// Whether orphaned images are still being fetched.
    pub fn orphaned_loading(&self) -> bool {
        self.orphaned_images_loaded < self.orphaned_images_total
    }

    /// Whether the selected pixel API reads raw pixel values.
    pub fn raw_pixel_access(&self) -> bool {
        self.selected_pixel_api
            .is_some_and(PixelApiKind::can_access_raw_pixels)
    }

    pub fn username_label(&self) -> &str {
        match &self.username {
            Some(name) if self.authenticated => name,
            _ => PUBLIC_USERNAME,
        }
    }

    pub fn opened_image_count(&self) -> usize {
        self.opened_images.len()
    }
}

/// Counters that track work in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    EntityLoad,
    ThumbnailFetch,
}

/// Publisher of [`BrowserState`].
pub struct BrowserModel {
    state: watch::Sender<BrowserState>,
}

impl BrowserModel {
    pub fn new(authenticated: bool, username: Option<String>) -> Self {
        let (state, _) = watch::channel(BrowserState {
            authenticated,
            username,
            ..BrowserState::default()
        });
        Self { state }
    }

    /// Receiver of every future snapshot, starting from the current one.
    pub fn subscribe(&self) -> watch::Receiver<BrowserState> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> BrowserState {
        self.state.borrow().clone()
    }

    fn update(&self, modify: impl FnOnce(&mut BrowserState)) {
        self.state.send_modify(modify);
    }

    /// Count an activity until the returned guard is dropped.
    pub fn track(&self, activity: Activity) -> ActivityGuard<'_> {
        self.update(|s| match activity {
            Activity::EntityLoad => s.entities_loading += 1,
            Activity::ThumbnailFetch => s.thumbnails_loading += 1,
        });
        ActivityGuard {
            model: self,
            activity,
        }
    }

    pub fn set_orphaned_total(&self, total: usize) {
        self.update(|s| {
            s.orphaned_images_total = total;
            s.orphaned_images_loaded = 0;
        });
    }

    /// One orphaned image finished loading, successfully or not.
    pub fn orphaned_image_done(&self) {
        self.update(|s| {
            s.orphaned_images_loaded = (s.orphaned_images_loaded + 1).min(s.orphaned_images_total)
        });
    }

    pub fn select_pixel_api(&self, api: Option<PixelApiKind>) {
        self.update(|s| s.selected_pixel_api = api);
    }

    /// Select a group; the owner selection resets to "all members".
    pub fn select_group(&self, group: Group) {
        self.update(|s| {
            s.selected_group = group;
            s.selected_owner = Owner::all_members();
        });
    }

    pub fn select_owner(&self, owner: Owner) {
        self.update(|s| s.selected_owner = owner);
    }

    pub fn image_opened(&self, uri: &str) {
        self.update(|s| {
            s.opened_images.insert(uri.to_string());
        });
    }

    pub fn image_closed(&self, uri: &str) {
        self.update(|s| {
            s.opened_images.remove(uri);
        });
    }

    pub fn clear_opened_images(&self) {
        self.update(|s| s.opened_images.clear());
    }
}

impl Default for BrowserModel {
    fn default() -> Self {
        Self::new(false, None)
    }
}

/// Decrements its activity counter on drop.
pub struct ActivityGuard<'a> {
    model: &'a BrowserModel,
    activity: Activity,
}

impl Drop for ActivityGuard<'_> {
    fn drop(&mut self) {
        let activity = self.activity;
        self.model.update(|s| match activity {
            Activity::EntityLoad => s.entities_loading = s.entities_loading.saturating_sub(1),
            Activity::ThumbnailFetch => {
                s.thumbnails_loading = s.thumbnails_loading.saturating_sub(1)
            }
        });
    }
}

/// Whether a selection can be imported: it must contain a supported image
/// or another server entity. The orphaned folder never counts.
pub fn importable(selection: &[RepositoryEntity], is_supported: impl Fn(&Image) -> bool) -> bool {
    selection.iter().any(|entity| match entity {
        RepositoryEntity::Image(image) => is_supported(image),
        RepositoryEntity::Project(_) | RepositoryEntity::Dataset(_) => true,
        RepositoryEntity::OrphanedFolder => false,
    })
}
