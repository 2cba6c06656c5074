//! Normalization of OMERO JSON payloads into domain entities.
//!
//! Fields are read leniently: a missing or mistyped field leaves the
//! corresponding value absent or at its default. Only the identity field is
//! required; an object without one is rejected with `Decode`.

use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::entity::{
    Channel, ChannelColor, Dataset, Group, GroupRef, Image, Owner, PhysicalSize, PixelType,
    Project,
};
use crate::error::ClientError;

use super::annotation::{Annotation, AnnotationKind};

// =============================================================================
// Envelopes
// =============================================================================

/// One page of a JSON API collection.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct Page {
    #[serde(default)]
    pub data: Vec<Value>,
    #[serde(default)]
    pub meta: PageMeta,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct PageMeta {
    #[serde(rename = "totalCount", default)]
    pub total_count: Option<usize>,
}

// =============================================================================
// Field access
// =============================================================================

/// Identity of an object: `@id` (JSON API) or `id` (webclient/webgateway).
/// Numeric strings are accepted.
pub(crate) fn id_of(value: &Value) -> Option<i64> {
    let id = value.get("@id").or_else(|| value.get("id"))?;
    id.as_i64().or_else(|| id.as_str()?.trim().parse().ok())
}

fn require_id(value: &Value, what: &str) -> Result<i64, ClientError> {
    id_of(value).ok_or_else(|| ClientError::Decode(format!("{} without an id", what)))
}

fn string(value: &Value, key: &str) -> Option<String> {
    match value.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn uint(value: &Value, key: &str) -> Option<u32> {
    let field = value.get(key)?;
    field
        .as_u64()
        .or_else(|| field.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
        .and_then(|n| u32::try_from(n).ok())
}

/// Unwrap `{"data": {...}}` single-object responses.
pub(crate) fn unwrap_data(value: &Value) -> &Value {
    match value.get("data") {
        Some(data) if data.is_object() => data,
        _ => value,
    }
}

/// Parse every object of a batch, dropping (and logging) the ones without
/// an identity.
pub(crate) fn parse_all<T>(
    items: &[Value],
    what: &str,
    parse: impl Fn(&Value) -> Result<T, ClientError>,
) -> Vec<T> {
    items
        .iter()
        .filter_map(|item| match parse(item) {
            Ok(entity) => Some(entity),
            Err(e) => {
                warn!("Dropping {} from server response: {}", what, e);
                None
            }
        })
        .collect()
}

// =============================================================================
// Groups and owners
// =============================================================================

pub(crate) fn parse_owner(value: &Value) -> Result<Owner, ClientError> {
    let id = require_id(value, "experimenter")?;
    Ok(Owner::new(
        id,
        string(value, "FirstName").unwrap_or_default(),
        string(value, "MiddleName").unwrap_or_default(),
        string(value, "LastName").unwrap_or_default(),
        string(value, "UserName").unwrap_or_default(),
    ))
}

/// A group without its owners; those come from a separate request.
pub(crate) fn parse_group(value: &Value) -> Result<Group, ClientError> {
    let id = require_id(value, "group")?;
    Ok(Group::new(id, string(value, "Name").unwrap_or_default(), Vec::new()))
}

/// Owner and group from `omero:details`.
fn parse_details(value: &Value) -> (Option<Owner>, Option<GroupRef>) {
    let Some(details) = value.get("omero:details") else {
        return (None, None);
    };
    let owner = details.get("owner").and_then(|o| parse_owner(o).ok());
    let group = details.get("group").and_then(|g| {
        Some(GroupRef {
            id: id_of(g)?,
            name: string(g, "Name").unwrap_or_default(),
        })
    });
    (owner, group)
}

// =============================================================================
// Containers
// =============================================================================

pub(crate) fn parse_project(value: &Value) -> Result<Project, ClientError> {
    let id = require_id(value, "project")?;
    let (owner, group) = parse_details(value);
    Ok(Project {
        id,
        name: string(value, "Name").unwrap_or_default(),
        description: string(value, "Description").filter(|d| !d.is_empty()),
        owner,
        group,
        child_count: uint(value, "omero:childCount"),
    })
}

pub(crate) fn parse_dataset(value: &Value) -> Result<Dataset, ClientError> {
    let id = require_id(value, "dataset")?;
    let (owner, group) = parse_details(value);
    Ok(Dataset {
        id,
        name: string(value, "Name").unwrap_or_default(),
        description: string(value, "Description").filter(|d| !d.is_empty()),
        owner,
        group,
        child_count: uint(value, "omero:childCount"),
    })
}

// =============================================================================
// Images
// =============================================================================

/// Image from the JSON API (`/m/images/`), with its `Pixels` block.
pub(crate) fn parse_image(value: &Value) -> Result<Image, ClientError> {
    let id = require_id(value, "image")?;
    let (owner, group) = parse_details(value);

    let mut image = Image::new(id, string(value, "Name").unwrap_or_default());
    image.owner = owner;
    image.group = group;
    image.acquisition_date = string(value, "AcquisitionDate");

    if let Some(pixels) = value.get("Pixels") {
        image.pixel_type = pixels
            .get("Type")
            .and_then(|t| string(t, "value"))
            .and_then(|t| t.parse::<PixelType>().ok());

        let d = &mut image.dimensions;
        d.width = uint(pixels, "SizeX").unwrap_or(d.width);
        d.height = uint(pixels, "SizeY").unwrap_or(d.height);
        d.size_z = uint(pixels, "SizeZ").unwrap_or(d.size_z);
        d.size_c = uint(pixels, "SizeC").unwrap_or(d.size_c);
        d.size_t = uint(pixels, "SizeT").unwrap_or(d.size_t);

        let physical = |key: &str| pixels.get(key).and_then(|p| p.get("Value")?.as_f64());
        let (x, y, z) = (physical("PhysicalSizeX"), physical("PhysicalSizeY"), physical("PhysicalSizeZ"));
        if x.is_some() || y.is_some() || z.is_some() {
            let unit = pixels
                .get("PhysicalSizeX")
                .and_then(|p| string(p, "Symbol"))
                .unwrap_or_else(|| "µm".to_string());
            image.physical_size = Some(PhysicalSize { x, y, z, unit });
        }
    }

    Ok(image)
}

/// Overlay the webgateway `imgData` description onto `image`.
///
/// `imgData` is the only source of channel colors and of the number of
/// resolution levels.
pub(crate) fn apply_image_data(image: &mut Image, data: &Value) {
    if let Some(meta) = data.get("meta") {
        if image.name.is_empty() {
            image.name = string(meta, "imageName").unwrap_or_default();
        }
        if let Some(pixel_type) = string(meta, "pixelsType").and_then(|t| t.parse().ok()) {
            image.pixel_type = Some(pixel_type);
        }
    }

    if let Some(size) = data.get("size") {
        let d = &mut image.dimensions;
        d.width = uint(size, "width").unwrap_or(d.width);
        d.height = uint(size, "height").unwrap_or(d.height);
        d.size_z = uint(size, "z").unwrap_or(d.size_z);
        d.size_c = uint(size, "c").unwrap_or(d.size_c);
        d.size_t = uint(size, "t").unwrap_or(d.size_t);
    }

    if let Some(levels) = uint(data, "levels").filter(|l| *l > 0) {
        image.dimensions.resolution_levels = levels;
    }
    if let Some(tile) = data.get("tile_size") {
        if let (Some(width), Some(height)) = (uint(tile, "width"), uint(tile, "height")) {
            if width > 0 && height > 0 {
                image.dimensions.tile_size = Some((width, height));
            }
        }
    }

    if let Some(channels) = data.get("channels").and_then(Value::as_array) {
        image.channels = channels
            .iter()
            .enumerate()
            .map(|(index, channel)| {
                Channel::new(
                    string(channel, "label").unwrap_or_else(|| format!("Channel {}", index + 1)),
                    string(channel, "color")
                        .and_then(|c| ChannelColor::from_hex(&c))
                        .unwrap_or(ChannelColor::WHITE),
                )
            })
            .collect();
    }

    if image.physical_size.is_none() {
        if let Some(size) = data.get("pixel_size") {
            let axis = |key: &str| size.get(key).and_then(Value::as_f64);
            if axis("x").is_some() || axis("y").is_some() {
                image.physical_size = Some(PhysicalSize {
                    x: axis("x"),
                    y: axis("y"),
                    z: axis("z"),
                    unit: "µm".to_string(),
                });
            }
        }
    }
}

// =============================================================================
// Annotations
// =============================================================================

/// One annotation from `/webclient/api/annotations/`.
///
/// Returns `Ok(None)` for annotation classes this client does not model.
pub(crate) fn parse_annotation(value: &Value) -> Result<Option<Annotation>, ClientError> {
    let id = require_id(value, "annotation")?;
    let namespace = string(value, "ns");
    let Some(kind) = string(value, "class")
        .and_then(|class| AnnotationKind::from_class(&class, namespace.as_deref()))
    else {
        return Ok(None);
    };

    let annotation = match kind {
        AnnotationKind::Map => Annotation::Map {
            id,
            pairs: value
                .get("values")
                .and_then(Value::as_array)
                .map(|pairs| {
                    pairs
                        .iter()
                        .filter_map(|pair| {
                            let pair = pair.as_array()?;
                            Some((
                                pair.first()?.as_str()?.to_string(),
                                pair.get(1).and_then(Value::as_str).unwrap_or_default().to_string(),
                            ))
                        })
                        .collect()
                })
                .unwrap_or_default(),
            namespace,
        },
        AnnotationKind::Tag => Annotation::Tag {
            id,
            value: string(value, "textValue").unwrap_or_default(),
        },
        AnnotationKind::Comment => Annotation::Comment {
            id,
            value: string(value, "textValue").unwrap_or_default(),
        },
        AnnotationKind::File => {
            let file = value.get("file").unwrap_or(&Value::Null);
            Annotation::File {
                id,
                name: string(file, "name").unwrap_or_default(),
                size: file.get("size").and_then(Value::as_u64),
                mime_type: string(file, "mimetype"),
            }
        }
        AnnotationKind::Rating => Annotation::Rating {
            id,
            value: value
                .get("longValue")
                .and_then(Value::as_i64)
                .unwrap_or(0)
                .clamp(0, 5) as u8,
        },
    };
    Ok(Some(annotation))
}
