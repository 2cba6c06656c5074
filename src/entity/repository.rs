use std::fmt;
use std::sync::Arc;

use super::group::{Group, GroupRef, Owner};
use super::image::Image;

/// Kinds of entities that map 1:1 to a remote object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Project,
    Dataset,
    Image,
}

impl EntityKind {
    /// Lowercase name used in webclient URIs and annotation queries.
    pub const fn as_str(self) -> &'static str {
        match self {
            EntityKind::Project => "project",
            EntityKind::Dataset => "dataset",
            EntityKind::Image => "image",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A project: top-level container of datasets.
#[derive(Debug, Clone, PartialEq)]
pub struct Project {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub owner: Option<Owner>,
    pub group: Option<GroupRef>,
    /// Number of datasets as reported by the server, if known
    pub child_count: Option<u32>,
}

/// A dataset: container of images, optionally inside a project.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub owner: Option<Owner>,
    pub group: Option<GroupRef>,
    /// Number of images as reported by the server, if known
    pub child_count: Option<u32>,
}

fn container_attributes(
    name: &str,
    id: i64,
    description: &Option<String>,
    owner: &Option<Owner>,
    group: &Option<GroupRef>,
    child_label: &str,
    child_count: Option<u32>,
) -> Vec<(String, String)> {
    vec![
        ("Name".to_string(), name.to_string()),
        ("Id".to_string(), id.to_string()),
        (
            "Description".to_string(),
            description.clone().unwrap_or_else(|| "-".to_string()),
        ),
        (
            "Owner".to_string(),
            owner
                .as_ref()
                .map(Owner::full_name)
                .unwrap_or_else(|| "-".to_string()),
        ),
        (
            "Group".to_string(),
            group
                .as_ref()
                .map(|g| g.name.clone())
                .unwrap_or_else(|| "-".to_string()),
        ),
        (
            child_label.to_string(),
            child_count
                .map(|c| c.to_string())
                .unwrap_or_else(|| "-".to_string()),
        ),
    ]
}

impl Project {
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            description: None,
            owner: None,
            group: None,
            child_count: None,
        }
    }

    pub fn attributes(&self) -> Vec<(String, String)> {
        container_attributes(
            &self.name,
            self.id,
            &self.description,
            &self.owner,
            &self.group,
            "Number of datasets",
            self.child_count,
        )
    }
}

impl Dataset {
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            description: None,
            owner: None,
            group: None,
            child_count: None,
        }
    }

    pub fn attributes(&self) -> Vec<(String, String)> {
        container_attributes(
            &self.name,
            self.id,
            &self.description,
            &self.owner,
            &self.group,
            "Number of images",
            self.child_count,
        )
    }
}

/// Label of the synthetic container of images that belong to no dataset.
pub const ORPHANED_FOLDER_LABEL: &str = "Orphaned Images";

/// Any node below the server in the browsing hierarchy.
///
/// This is a closed set: callers dispatch with `match`. Entities are shared
/// behind `Arc` and never mutated once published.
#[derive(Debug, Clone, PartialEq)]
pub enum RepositoryEntity {
    Project(Arc<Project>),
    Dataset(Arc<Dataset>),
    Image(Arc<Image>),
    /// Synthetic container, has no remote identity
    OrphanedFolder,
}

impl RepositoryEntity {
    /// Display label.
    pub fn label(&self) -> &str {
        match self {
            RepositoryEntity::Project(p) => &p.name,
            RepositoryEntity::Dataset(d) => &d.name,
            RepositoryEntity::Image(i) => &i.name,
            RepositoryEntity::OrphanedFolder => ORPHANED_FOLDER_LABEL,
        }
    }

    /// Whether this entity can have children (they may not be loaded yet).
    pub fn can_have_children(&self) -> bool {
        !matches!(self, RepositoryEntity::Image(_))
    }

    /// Kind and id for entities that exist on the server.
    pub fn server_identity(&self) -> Option<(EntityKind, i64)> {
        match self {
            RepositoryEntity::Project(p) => Some((EntityKind::Project, p.id)),
            RepositoryEntity::Dataset(d) => Some((EntityKind::Dataset, d.id)),
            RepositoryEntity::Image(i) => Some((EntityKind::Image, i.id)),
            RepositoryEntity::OrphanedFolder => None,
        }
    }

    pub fn is_server_entity(&self) -> bool {
        self.server_identity().is_some()
    }

    pub fn owner(&self) -> Option<&Owner> {
        match self {
            RepositoryEntity::Project(p) => p.owner.as_ref(),
            RepositoryEntity::Dataset(d) => d.owner.as_ref(),
            RepositoryEntity::Image(i) => i.owner.as_ref(),
            RepositoryEntity::OrphanedFolder => None,
        }
    }

    pub fn group(&self) -> Option<&GroupRef> {
        match self {
            RepositoryEntity::Project(p) => p.group.as_ref(),
            RepositoryEntity::Dataset(d) => d.group.as_ref(),
            RepositoryEntity::Image(i) => i.group.as_ref(),
            RepositoryEntity::OrphanedFolder => None,
        }
    }

    /// Name/value pairs for display; empty for the orphaned folder.
    pub fn attributes(&self) -> Vec<(String, String)> {
        match self {
            RepositoryEntity::Project(p) => p.attributes(),
            RepositoryEntity::Dataset(d) => d.attributes(),
            RepositoryEntity::Image(i) => i.attributes(),
            RepositoryEntity::OrphanedFolder => Vec::new(),
        }
    }

    pub fn as_image(&self) -> Option<&Arc<Image>> {
        match self {
            RepositoryEntity::Image(image) => Some(image),
            _ => None,
        }
    }
}

/// Root of the hierarchy: what the connection knows about the server.
///
/// Groups and owners are fetched once per session and never change.
#[derive(Debug, Clone, PartialEq)]
pub struct Server {
    groups: Vec<Group>,
    owners: Vec<Owner>,
}

impl Server {
    /// Build the server root from the remote groups.
    ///
    /// The "all groups" pseudo-group is prepended; any remote group that
    /// claims its reserved id is discarded.
    pub fn new(remote_groups: Vec<Group>) -> Self {
        let mut owners: Vec<Owner> = Vec::new();
        for group in &remote_groups {
            for owner in &group.owners {
                if !owners.iter().any(|o| o.id == owner.id) {
                    owners.push(owner.clone());
                }
            }
        }
        owners.sort_by_key(Owner::full_name);

        let mut groups = vec![Group::all_groups()];
        groups.extend(remote_groups.into_iter().filter(|g| !g.is_all_groups()));

        Self { groups, owners }
    }

    /// All groups, starting with the "all groups" pseudo-group.
    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    /// Every owner known to the connection.
    pub fn owners(&self) -> &[Owner] {
        &self.owners
    }

    /// Owners selectable within `group`: everyone for "all groups".
    pub fn owners_of(&self, group: &Group) -> &[Owner] {
        if group.is_all_groups() {
            &self.owners
        } else {
            self.groups
                .iter()
                .find(|g| g.id == group.id)
                .map(|g| g.owners.as_slice())
                .unwrap_or(&[])
        }
    }

    pub fn group(&self, id: i64) -> Option<&Group> {
        self.groups.iter().find(|g| g.id == id)
    }
}
