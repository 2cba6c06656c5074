//! Lazily populated entity tree.
//!
//! Every expandable node moves through
//!
//! ```text
//! NotLoaded ──expand──▶ Loading ──ok──▶ Loaded        (terminal)
//!                          │
//!                          └──err──▶ LoadFailed ──expand──▶ Loading
//! ```
//!
//! Concurrent expansions of one node share a single remote load. Loaded
//! child lists are immutable `Arc` snapshots.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use futures::future::join_all;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::ApisHandler;
use crate::entity::{Group, Owner, RepositoryEntity};
use crate::error::ClientError;
use crate::flight::SingleFlight;
use crate::io::Transport;

use super::browser::{Activity, BrowserModel};

/// Maximum number of orphaned images fetched at the same time.
pub const MAX_CONCURRENT_IMAGE_LOADS: usize = 16;

/// Child lists shared by every reader of a loaded node.
pub type Children = Arc<Vec<RepositoryEntity>>;

// =============================================================================
// Nodes
// =============================================================================

/// Identity of an expandable node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeId {
    Server,
    Project(i64),
    Dataset(i64),
    OrphanedFolder,
}

impl NodeId {
    /// Node of a child entity, `None` for leaves (images).
    pub fn of(entity: &RepositoryEntity) -> Option<NodeId> {
        match entity {
            RepositoryEntity::Project(project) => Some(NodeId::Project(project.id)),
            RepositoryEntity::Dataset(dataset) => Some(NodeId::Dataset(dataset.id)),
            RepositoryEntity::OrphanedFolder => Some(NodeId::OrphanedFolder),
            RepositoryEntity::Image(_) => None,
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeId::Server => write!(f, "server"),
            NodeId::Project(id) => write!(f, "project-{}", id),
            NodeId::Dataset(id) => write!(f, "dataset-{}", id),
            NodeId::OrphanedFolder => write!(f, "orphaned"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    NotLoaded,
    Loading,
    Loaded,
    LoadFailed,
}

#[derive(Debug, Clone)]
enum Node {
    Loading,
    Loaded(Children),
    Failed(ClientError),
}

// =============================================================================
// Filter
// =============================================================================

/// View-level selection of entities. Never changes the tree.
#[derive(Debug, Clone, Default)]
pub struct EntityFilter {
    /// Case-insensitive substring of the label
    pub text: Option<String>,
    pub owner: Option<Owner>,
    pub group: Option<Group>,
}

impl EntityFilter {
    pub fn text(mut self, text: impl Into<String>) -> Self {
        let text = text.into();
        self.text = (!text.trim().is_empty()).then(|| text.trim().to_lowercase());
        self
    }

    pub fn owner(mut self, owner: Owner) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn group(mut self, group: Group) -> Self {
        self.group = Some(group);
        self
    }

    /// Owner and group criteria. Entities whose ownership the server did
    /// not report are kept, and so is the orphaned folder.
    pub fn matches_scope(&self, entity: &RepositoryEntity) -> bool {
        let owner_ok = match (&self.owner, entity.owner()) {
            (Some(wanted), Some(owner)) => wanted.is_all_members() || wanted.id == owner.id,
            _ => true,
        };
        let group_ok = match (&self.group, entity.group()) {
            (Some(wanted), Some(group)) => wanted.is_all_groups() || wanted.id == group.id,
            _ => true,
        };
        owner_ok && group_ok
    }

    pub fn matches_text(&self, entity: &RepositoryEntity) -> bool {
        match &self.text {
            Some(text) => entity.label().to_lowercase().contains(text.as_str()),
            None => true,
        }
    }
}

// =============================================================================
// Hierarchy Model
// =============================================================================

/// Clears the `Loading` mark of a node whose load ends without a result,
/// because it was cancelled or its caller dropped it.
struct LoadingMark<'a> {
    nodes: &'a RwLock<HashMap<NodeId, Node>>,
    node: NodeId,
    settled: bool,
}

impl Drop for LoadingMark<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let mut nodes = self.nodes.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        if matches!(nodes.get(&self.node), Some(Node::Loading)) {
            nodes.remove(&self.node);
        }
    }
}

/// The entity tree of one server connection.
pub struct HierarchyModel<T: Transport> {
    api: Arc<ApisHandler<T>>,
    browser: Arc<BrowserModel>,
    nodes: RwLock<HashMap<NodeId, Node>>,
    loads: SingleFlight<NodeId, Children, ClientError>,
    cancel: CancellationToken,
}

impl<T: Transport> HierarchyModel<T> {
    pub fn new(api: Arc<ApisHandler<T>>, browser: Arc<BrowserModel>, cancel: CancellationToken) -> Self {
        Self {
            api,
            browser,
            nodes: RwLock::new(HashMap::new()),
            loads: SingleFlight::new(),
            cancel,
        }
    }

    pub fn state(&self, node: NodeId) -> LoadState {
        match self.read_nodes().get(&node) {
            None => LoadState::NotLoaded,
            Some(Node::Loading) => LoadState::Loading,
            Some(Node::Loaded(_)) => LoadState::Loaded,
            Some(Node::Failed(_)) => LoadState::LoadFailed,
        }
    }

    /// Children of a loaded node.
    pub fn children(&self, node: NodeId) -> Option<Children> {
        match self.read_nodes().get(&node) {
            Some(Node::Loaded(children)) => Some(children.clone()),
            _ => None,
        }
    }

    /// Error of the last failed load of a node.
    pub fn error(&self, node: NodeId) -> Option<ClientError> {
        match self.read_nodes().get(&node) {
            Some(Node::Failed(e)) => Some(e.clone()),
            _ => None,
        }
    }

    /// Number of remote loads actually executed.
    pub fn loads(&self) -> u64 {
        self.loads.executions()
    }

    /// Load the children of `node`, or return them if already loaded.
    ///
    /// Concurrent calls for the same node share one load. A failed load is
    /// retried by the next call.
    pub async fn expand(&self, node: NodeId) -> Result<Children, ClientError> {
        if self.cancel.is_cancelled() {
            return Err(ClientError::Closed);
        }
        if let Some(children) = self.children(node) {
            return Ok(children);
        }

        self.loads
            .run(node, || async move {
                if let Some(children) = self.children(node) {
                    return Ok(children);
                }

                self.write_nodes().insert(node, Node::Loading);
                let mut mark = LoadingMark {
                    nodes: &self.nodes,
                    node,
                    settled: false,
                };
                let _loading = self.browser.track(Activity::EntityLoad);
                debug!("Loading children of {}", node);

                let result = tokio::select! {
                    _ = self.cancel.cancelled() => return Err(ClientError::Closed),
                    result = self.load_children(node) => result,
                };
                if self.cancel.is_cancelled() {
                    return Err(ClientError::Closed);
                }

                mark.settled = true;
                match result {
                    Ok(children) => {
                        let children = Arc::new(children);
                        self.write_nodes().insert(node, Node::Loaded(children.clone()));
                        debug!("Loaded {} children of {}", children.len(), node);
                        Ok(children)
                    }
                    Err(e) => {
                        warn!("Failed to load children of {}: {}", node, e);
                        self.write_nodes().insert(node, Node::Failed(e.clone()));
                        Err(e)
                    }
                }
            })
            .await
    }

    /// Node whose loaded children contain `entity`.
    ///
    /// An image listed both in a dataset and in the orphaned folder is
    /// reported under whichever node is found first.
    pub fn parent(&self, entity: &RepositoryEntity) -> Option<NodeId> {
        let identity = entity.server_identity();
        self.read_nodes().iter().find_map(|(node, state)| match state {
            Node::Loaded(children) => children
                .iter()
                .any(|child| match identity {
                    Some(identity) => child.server_identity() == Some(identity),
                    None => matches!(child, RepositoryEntity::OrphanedFolder),
                })
                .then_some(*node),
            _ => None,
        })
    }

    /// Expand the node of `entity`; leaves have no children.
    pub async fn expand_entity(&self, entity: &RepositoryEntity) -> Result<Children, ClientError> {
        match NodeId::of(entity) {
            Some(node) => self.expand(node).await,
            None => Ok(Arc::new(Vec::new())),
        }
    }

    async fn load_children(&self, node: NodeId) -> Result<Vec<RepositoryEntity>, ClientError> {
        match node {
            NodeId::Server => {
                let projects = self.api.list_projects().await?;
                let mut children: Vec<RepositoryEntity> = projects
                    .into_iter()
                    .map(|project| RepositoryEntity::Project(Arc::new(project)))
                    .collect();
                children.push(RepositoryEntity::OrphanedFolder);
                Ok(children)
            }
            NodeId::Project(id) => Ok(self
                .api
                .list_datasets(id)
                .await?
                .into_iter()
                .map(|dataset| RepositoryEntity::Dataset(Arc::new(dataset)))
                .collect()),
            NodeId::Dataset(id) => Ok(self
                .api
                .list_images(id)
                .await?
                .into_iter()
                .map(|image| RepositoryEntity::Image(Arc::new(image)))
                .collect()),
            NodeId::OrphanedFolder => self.load_orphaned().await,
        }
    }

    /// Fetch every orphaned image concurrently, reporting progress.
    /// Images that fail to load are dropped.
    async fn load_orphaned(&self) -> Result<Vec<RepositoryEntity>, ClientError> {
        let ids = self.api.list_orphaned_image_ids().await?;
        self.browser.set_orphaned_total(ids.len());
        info!("Loading {} orphaned images", ids.len());

        let permits = Semaphore::new(MAX_CONCURRENT_IMAGE_LOADS);
        let loads = ids.iter().map(|&id| {
            let permits = &permits;
            async move {
                let _permit = permits.acquire().await.ok();
                let result = self.api.get_image(id).await;
                if !self.cancel.is_cancelled() {
                    self.browser.orphaned_image_done();
                }
                (id, result)
            }
        });

        let images = join_all(loads)
            .await
            .into_iter()
            .filter_map(|(id, result)| match result {
                Ok(image) => Some(RepositoryEntity::Image(Arc::new(image))),
                Err(e) => {
                    warn!("Dropping orphaned image {}: {}", id, e);
                    None
                }
            })
            .collect();
        Ok(images)
    }

    // -------------------------------------------------------------------------
    // Filtered view
    // -------------------------------------------------------------------------

    /// Loaded children of `node` that pass `filter`.
    ///
    /// A container passes the text criterion when its label or the label of
    /// any loaded descendant matches. The orphaned folder is always listed.
    pub fn filtered_children(&self, node: NodeId, filter: &EntityFilter) -> Vec<RepositoryEntity> {
        let Some(children) = self.children(node) else {
            return Vec::new();
        };
        children
            .iter()
            .filter(|child| {
                matches!(child, RepositoryEntity::OrphanedFolder)
                    || (filter.matches_scope(child) && self.matches_text_deep(child, filter))
            })
            .cloned()
            .collect()
    }

    fn matches_text_deep(&self, entity: &RepositoryEntity, filter: &EntityFilter) -> bool {
        if filter.matches_text(entity) {
            return true;
        }
        let Some(children) = NodeId::of(entity).and_then(|node| self.children(node)) else {
            return false;
        };
        children.iter().any(|child| self.matches_text_deep(child, filter))
    }

    fn read_nodes(&self) -> std::sync::RwLockReadGuard<'_, HashMap<NodeId, Node>> {
        self.nodes.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_nodes(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<NodeId, Node>> {
        self.nodes.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
