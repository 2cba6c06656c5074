//! Typed facade over the OMERO web APIs.
//!
//! One method per remote operation. Requests are issued through a shared
//! [`Transport`]; responses are normalized into domain entities by the
//! lenient parsers in `json`.
//!
//! | Operation                   | Endpoint                                              |
//! |-----------------------------|-------------------------------------------------------|
//! | `list_groups`               | `api/v0/m/experimentergroups/` (+ `…/{id}/experimenters/`) |
//! | `list_projects`             | `api/v0/m/projects/`                                  |
//! | `list_datasets`             | `api/v0/m/projects/{id}/datasets/`                    |
//! | `list_images`               | `api/v0/m/datasets/{id}/images/`                      |
//! | `list_orphaned_image_ids`   | `webclient/api/images/?orphaned=true`                 |
//! | `get_image`                 | `api/v0/m/images/{id}/` + `webgateway/imgData/{id}/`  |
//! | `get_annotations`           | `webclient/api/annotations/?type=…&{kind}={id}`       |
//! | `get_thumbnail`             | `webgateway/render_thumbnail/{id}/{size}/`            |

mod annotation;
mod json;

pub use annotation::{Annotation, AnnotationKind};

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::try_join_all;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::entity::{Dataset, EntityKind, Group, Image, Owner, Project, RepositoryEntity};
use crate::error::ClientError;
use crate::io::Transport;
use crate::pixel::TileImage;

use json::{
    apply_image_data, id_of, parse_all, parse_annotation, parse_dataset, parse_group, parse_image,
    parse_owner, parse_project, unwrap_data, Page,
};

/// Number of objects requested per page of a JSON API collection.
pub const PAGE_LIMIT: usize = 200;

/// Default maximum side of a thumbnail, in pixels.
pub const DEFAULT_THUMBNAIL_SIZE: u32 = 256;

/// Remote operations of one server, over a shared transport.
pub struct ApisHandler<T: Transport> {
    transport: Arc<T>,
    server_id: i64,
}

impl<T: Transport> ApisHandler<T> {
    /// `server_id` is the OMERO server index the session logged into.
    pub fn new(transport: Arc<T>, server_id: i64) -> Self {
        Self {
            transport,
            server_id,
        }
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    pub fn server_id(&self) -> i64 {
        self.server_id
    }

    /// Root URI of the web server.
    pub fn web_server_uri(&self) -> &Url {
        self.transport.base_uri()
    }

    // -------------------------------------------------------------------------
    // Groups and owners
    // -------------------------------------------------------------------------

    /// Every group visible to the session, each with its members.
    ///
    /// Member lists are fetched concurrently.
    pub async fn list_groups(&self) -> Result<Vec<Group>, ClientError> {
        let items = self.list_collection("m/experimentergroups/").await?;
        let groups = parse_all(&items, "group", parse_group);

        let with_owners = groups.into_iter().map(|mut group| async move {
            let path = format!("m/experimentergroups/{}/experimenters/", group.id);
            let members = self.list_collection_or_empty(&path).await?;
            group.owners = parse_all(&members, "experimenter", parse_owner);
            Ok::<_, ClientError>(group)
        });
        let groups = try_join_all(with_owners).await?;

        debug!("Listed {} groups", groups.len());
        Ok(groups)
    }

    /// Every owner of every group, without duplicates.
    pub async fn list_owners(&self) -> Result<Vec<Owner>, ClientError> {
        let groups = self.list_groups().await?;
        Ok(unique_owners(&groups))
    }

    // -------------------------------------------------------------------------
    // Containers and images
    // -------------------------------------------------------------------------

    pub async fn list_projects(&self) -> Result<Vec<Project>, ClientError> {
        let items = self.list_collection("m/projects/").await?;
        Ok(parse_all(&items, "project", parse_project))
    }

    /// Datasets of a project; empty when the project does not exist.
    pub async fn list_datasets(&self, project_id: i64) -> Result<Vec<Dataset>, ClientError> {
        let path = format!("m/projects/{}/datasets/", project_id);
        let items = self.list_collection_or_empty(&path).await?;
        Ok(parse_all(&items, "dataset", parse_dataset))
    }

    /// Images of a dataset; empty when the dataset does not exist.
    pub async fn list_images(&self, dataset_id: i64) -> Result<Vec<Image>, ClientError> {
        let path = format!("m/datasets/{}/images/", dataset_id);
        let items = self.list_collection_or_empty(&path).await?;
        Ok(parse_all(&items, "image", parse_image))
    }

    /// Ids of the images that belong to no dataset.
    pub async fn list_orphaned_image_ids(&self) -> Result<Vec<i64>, ClientError> {
        let mut url = self.transport.resolve("webclient/api/images/")?;
        url.query_pairs_mut().append_pair("orphaned", "true");

        let json = match self.transport.get_json(&url).await {
            Ok(json) => json,
            Err(e) if e.is_not_found() => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut seen = HashSet::new();
        let ids = json
            .get("images")
            .and_then(Value::as_array)
            .map(|images| {
                images
                    .iter()
                    .filter_map(|image| {
                        let id = id_of(image);
                        if id.is_none() {
                            warn!("Dropping orphaned image without an id");
                        }
                        id
                    })
                    .filter(|id| seen.insert(*id))
                    .collect()
            })
            .unwrap_or_default();
        Ok(ids)
    }

    /// Full description of one image, including channels and resolution
    /// levels.
    pub async fn get_image(&self, id: i64) -> Result<Image, ClientError> {
        let image_uri = self.transport.api_uri()?.join(&format!("m/images/{}/", id))?;
        let data_uri = self.transport.resolve(&format!("webgateway/imgData/{}/", id))?;

        let (json, data) = futures::try_join!(
            self.transport.get_json(&image_uri),
            self.transport.get_json(&data_uri)
        )?;

        let mut image = parse_image(unwrap_data(&json))?;
        apply_image_data(&mut image, &data);
        Ok(image)
    }

    // -------------------------------------------------------------------------
    // Links, annotations, thumbnails
    // -------------------------------------------------------------------------

    /// Webclient link showing `entity`.
    ///
    /// The orphaned folder has no remote identity and fails with
    /// `InvalidUri`.
    pub fn entity_uri(&self, entity: &RepositoryEntity) -> Result<Url, ClientError> {
        let (kind, id) = entity.server_identity().ok_or_else(|| {
            ClientError::InvalidUri(format!("'{}' has no server identity", entity.label()))
        })?;
        self.entity_uri_of(kind, id)
    }

    pub fn entity_uri_of(&self, kind: EntityKind, id: i64) -> Result<Url, ClientError> {
        let mut url = self.transport.resolve("webclient/")?;
        url.query_pairs_mut()
            .append_pair("show", &format!("{}-{}", kind, id));
        Ok(url)
    }

    /// Annotations of one kind attached to an entity; classes this client
    /// does not model are skipped.
    pub async fn get_annotations(
        &self,
        kind: EntityKind,
        id: i64,
        annotation: AnnotationKind,
    ) -> Result<Vec<Annotation>, ClientError> {
        let mut url = self.transport.resolve("webclient/api/annotations/")?;
        url.query_pairs_mut()
            .append_pair("type", annotation.as_str())
            .append_pair(kind.as_str(), &id.to_string());

        let json = self.transport.get_json(&url).await?;
        let items = json
            .get("annotations")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        Ok(parse_all(&items, "annotation", parse_annotation)
            .into_iter()
            .flatten()
            .filter(|a| a.kind() == annotation)
            .collect())
    }

    /// Rendered thumbnail of an image, at most `max_size` pixels on its
    /// longest side.
    pub async fn get_thumbnail(&self, image_id: i64, max_size: u32) -> Result<TileImage, ClientError> {
        let url = self
            .transport
            .resolve(&format!("webgateway/render_thumbnail/{}/{}/", image_id, max_size))?;
        let body = self.transport.get_bytes(&url).await?;
        let decoded = image::load_from_memory(&body)?;
        Ok(TileImage::from_rgb8(decoded.to_rgb8()))
    }

    // -------------------------------------------------------------------------
    // Pagination
    // -------------------------------------------------------------------------

    /// Every object of a JSON API collection, following pages until the
    /// reported total is reached.
    async fn list_collection(&self, path: &str) -> Result<Vec<Value>, ClientError> {
        let base = self.transport.api_uri()?.join(path)?;
        let mut items: Vec<Value> = Vec::new();

        loop {
            let mut url = base.clone();
            url.query_pairs_mut()
                .append_pair("offset", &items.len().to_string())
                .append_pair("limit", &PAGE_LIMIT.to_string());

            let page: Page = serde_json::from_value(self.transport.get_json(&url).await?)?;
            let received = page.data.len();
            items.extend(page.data);

            match page.meta.total_count {
                Some(total) if items.len() < total && received > 0 => continue,
                None if received == PAGE_LIMIT => continue,
                _ => break,
            }
        }

        Ok(items)
    }

    /// Like [`list_collection`](Self::list_collection), with 404 meaning
    /// "no children".
    async fn list_collection_or_empty(&self, path: &str) -> Result<Vec<Value>, ClientError> {
        match self.list_collection(path).await {
            Err(e) if e.is_not_found() => {
                debug!("{} not found, treating as empty", path);
                Ok(Vec::new())
            }
            other => other,
        }
    }
}

/// Owners of all groups, deduplicated by id, in first-seen order.
pub fn unique_owners(groups: &[Group]) -> Vec<Owner> {
    let mut seen = HashSet::new();
    groups
        .iter()
        .flat_map(|group| group.owners.iter())
        .filter(|owner| seen.insert(owner.id))
        .cloned()
        .collect()
}
