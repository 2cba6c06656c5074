//! API handler integration tests.
//!
//! Tests verify:
//! - Groups come with their members
//! - Collections are paged until the reported total
//! - Missing containers list as empty, malformed entries are dropped
//! - Image descriptions merge the JSON API and imgData
//! - Orphaned images, annotations, entity links and thumbnails

use std::sync::Arc;

use bytes::Bytes;
use serde_json::json;

use omero_client::{
    Annotation, AnnotationKind, ApisHandler, ChannelColor, ClientError, EntityKind, PixelType,
    RepositoryEntity, Server, PAGE_LIMIT,
};

use super::test_utils::{
    create_test_png, dataset, page, project, query_param, register_groups, register_image,
    Method, MockTransport,
};

fn handler(transport: &Arc<MockTransport>) -> ApisHandler<MockTransport> {
    ApisHandler::new(transport.clone(), 1)
}

// =============================================================================
// Groups and Owners
// =============================================================================

#[tokio::test]
async fn test_groups_with_members() {
    let transport = Arc::new(MockTransport::new());
    register_groups(&transport);

    let groups = handler(&transport).list_groups().await.unwrap();
    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0].name, "lab");
    assert_eq!(groups[0].owners.len(), 2);
    assert_eq!(groups[1].owners.len(), 1);

    let owners = handler(&transport).list_owners().await.unwrap();
    let ids: Vec<i64> = owners.iter().map(|o| o.id).collect();
    assert_eq!(ids, vec![2, 5]);

    let server = Server::new(groups);
    assert!(server.groups()[0].is_all_groups());
    assert_eq!(server.groups().len(), 3);
    assert_eq!(server.owners().len(), 2);
}

#[tokio::test]
async fn test_group_without_member_listing_has_no_owners() {
    let transport = Arc::new(MockTransport::new());
    transport.json(
        "api/v0/m/experimentergroups/",
        page(vec![json!({"@id": 9, "Name": "empty"})]),
    );

    let groups = handler(&transport).list_groups().await.unwrap();
    assert_eq!(groups.len(), 1);
    assert!(groups[0].owners.is_empty());
}

// =============================================================================
// Pagination
// =============================================================================

#[tokio::test]
async fn test_projects_are_paged_until_total() {
    let total = PAGE_LIMIT * 2 + 50;
    let transport = Arc::new(MockTransport::new());
    transport.route(Method::Get, "api/v0/m/projects/", move |url| {
        let offset: usize = query_param(url, "offset").unwrap().parse().unwrap();
        let limit: usize = query_param(url, "limit").unwrap().parse().unwrap();
        let end = (offset + limit).min(total);
        let items: Vec<_> = (offset..end)
            .map(|i| project(i as i64 + 1, &format!("p{}", i), 2, 3))
            .collect();
        let body = json!({"data": items, "meta": {"totalCount": total}});
        Ok(Bytes::from(serde_json::to_vec(&body).unwrap()))
    });

    let projects = handler(&transport).list_projects().await.unwrap();
    assert_eq!(projects.len(), total);
    assert_eq!(projects[0].id, 1);
    assert_eq!(projects[total - 1].id, total as i64);
    assert_eq!(transport.count(Method::Get, "api/v0/m/projects/"), 3);
}

#[tokio::test]
async fn test_page_without_total_stops_on_short_page() {
    let transport = Arc::new(MockTransport::new());
    transport.json(
        "api/v0/m/projects/",
        json!({"data": [project(1, "only", 2, 3)]}),
    );

    let projects = handler(&transport).list_projects().await.unwrap();
    assert_eq!(projects.len(), 1);
    assert_eq!(transport.count(Method::Get, "api/v0/m/projects/"), 1);
}

// =============================================================================
// Containers
// =============================================================================

#[tokio::test]
async fn test_datasets_of_missing_project_are_empty() {
    let transport = Arc::new(MockTransport::new());
    transport.status("api/v0/m/projects/999/datasets/", 404);

    let datasets = handler(&transport).list_datasets(999).await.unwrap();
    assert!(datasets.is_empty());
}

#[tokio::test]
async fn test_server_errors_are_not_swallowed() {
    let transport = Arc::new(MockTransport::new());
    transport.status("api/v0/m/projects/1/datasets/", 500);

    let result = handler(&transport).list_datasets(1).await;
    match result {
        Err(ClientError::Http { status, .. }) => assert_eq!(status, 500),
        other => panic!("Expected Http error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_entries_without_id_are_dropped() {
    let transport = Arc::new(MockTransport::new());
    transport.json(
        "api/v0/m/projects/1/datasets/",
        page(vec![
            dataset(10, "kept", 2, 3),
            json!({"Name": "no identity"}),
            dataset(11, "also kept", 5, 3),
        ]),
    );

    let datasets = handler(&transport).list_datasets(1).await.unwrap();
    let names: Vec<&str> = datasets.iter().map(|d| d.name.as_str()).collect();
    assert_eq!(names, vec!["kept", "also kept"]);
    assert_eq!(datasets[1].owner.as_ref().unwrap().id, 5);
    assert_eq!(datasets[0].group.as_ref().unwrap().id, 3);
}

// =============================================================================
// Images
// =============================================================================

#[tokio::test]
async fn test_image_merges_image_data() {
    let transport = Arc::new(MockTransport::new());
    register_image(&transport, 42, PixelType::Uint16, 4096, 2048, 3, 4);

    let image = handler(&transport).get_image(42).await.unwrap();
    assert_eq!(image.id, 42);
    assert_eq!(image.name, "image-42");
    assert_eq!(image.pixel_type, Some(PixelType::Uint16));
    assert_eq!(image.dimensions.width, 4096);
    assert_eq!(image.dimensions.height, 2048);
    assert_eq!(image.dimensions.resolution_levels, 4);
    assert_eq!(image.channel_count(), 3);
    assert_eq!(image.channels[1].name, "C1");
    assert_eq!(image.channels[0].color, ChannelColor::WHITE);
    assert_eq!(image.owner.as_ref().unwrap().id, 2);
}

#[tokio::test]
async fn test_missing_image_is_not_found() {
    let transport = Arc::new(MockTransport::new());

    let err = handler(&transport).get_image(7).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_orphaned_ids_are_deduplicated() {
    let transport = Arc::new(MockTransport::new());
    transport.json(
        "webclient/api/images/",
        json!({"images": [{"id": 3}, {"id": 1}, {"id": 3}, {"name": "broken"}, {"id": 2}]}),
    );

    let ids = handler(&transport).list_orphaned_image_ids().await.unwrap();
    assert_eq!(ids, vec![3, 1, 2]);

    let requests = transport.requests();
    assert_eq!(query_param(&requests[0].1, "orphaned").as_deref(), Some("true"));
}

// =============================================================================
// Annotations, Links and Thumbnails
// =============================================================================

#[tokio::test]
async fn test_annotations_of_requested_kind() {
    let transport = Arc::new(MockTransport::new());
    transport.json(
        "webclient/api/annotations/",
        json!({"annotations": [
            {"id": 1, "class": "MapAnnotationI", "ns": "openmicroscopy.org/omero/client/mapAnnotation",
             "values": [["stain", "H&E"], ["organ", "liver"]]},
            {"id": 2, "class": "LongAnnotationI", "ns": "openmicroscopy.org/omero/insight/rating",
             "longValue": 4},
            {"id": 3, "class": "LongAnnotationI", "ns": "custom", "longValue": 12}
        ]}),
    );

    let api = handler(&transport);
    let maps = api
        .get_annotations(EntityKind::Image, 42, AnnotationKind::Map)
        .await
        .unwrap();
    assert_eq!(maps.len(), 1);
    match &maps[0] {
        Annotation::Map { id, pairs, .. } => {
            assert_eq!(*id, 1);
            assert_eq!(pairs[1], ("organ".to_string(), "liver".to_string()));
        }
        other => panic!("Expected a map annotation, got {:?}", other),
    }

    let ratings = api
        .get_annotations(EntityKind::Image, 42, AnnotationKind::Rating)
        .await
        .unwrap();
    assert_eq!(ratings, vec![Annotation::Rating { id: 2, value: 4 }]);

    let last = transport.requests().pop().unwrap().1;
    assert_eq!(query_param(&last, "type").as_deref(), Some("rating"));
    assert_eq!(query_param(&last, "image").as_deref(), Some("42"));
}

#[test]
fn test_entity_uri() {
    let transport = Arc::new(MockTransport::new());
    let api = handler(&transport);

    let uri = api.entity_uri_of(EntityKind::Dataset, 12).unwrap();
    assert_eq!(uri.as_str(), "http://omero.test/webclient/?show=dataset-12");

    assert!(matches!(
        api.entity_uri(&RepositoryEntity::OrphanedFolder),
        Err(ClientError::InvalidUri(_))
    ));
}

#[tokio::test]
async fn test_thumbnail_is_decoded() {
    let transport = Arc::new(MockTransport::new());
    transport.bytes(
        "webgateway/render_thumbnail/42/64/",
        create_test_png(64, 48, [200, 100, 50]),
    );

    let thumbnail = handler(&transport).get_thumbnail(42, 64).await.unwrap();
    assert_eq!(thumbnail.width(), 64);
    assert_eq!(thumbnail.height(), 48);
    assert_eq!(thumbnail.band_count(), 3);
    assert_eq!(thumbnail.sample(0, 0, 0), Some(200.0));
    assert_eq!(thumbnail.sample(10, 10, 2), Some(50.0));
}
