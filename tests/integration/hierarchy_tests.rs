//! Hierarchy integration tests.
//!
//! Tests verify:
//! - Concurrent expansions of a node share one remote load
//! - Failed loads are recorded and retried
//! - Orphaned images report progress and drop failures
//! - Filtering is a view over the loaded tree
//! - Closing the client abandons in-flight loads

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::future::join_all;
use serde_json::json;

use omero_client::{
    ClientError, EntityFilter, LoadState, NodeId, Owner, PixelType, RepositoryEntity,
};

use super::test_utils::{
    build_client, dataset, image, page, project, register_image, Method, MockTransport,
};

fn register_tree(transport: &MockTransport) {
    transport.json(
        "api/v0/m/projects/",
        page(vec![
            project(1, "Liver study", 2, 3),
            project(2, "Kidney study", 5, 3),
        ]),
    );
    transport.json(
        "api/v0/m/projects/1/datasets/",
        page(vec![dataset(10, "Batch A", 2, 3)]),
    );
    transport.json(
        "api/v0/m/projects/2/datasets/",
        page(vec![dataset(20, "Batch B", 5, 3)]),
    );
    transport.json(
        "api/v0/m/datasets/10/images/",
        page(vec![image(100, "section-01.svs", PixelType::Uint8, 1024, 1024, 3)]),
    );
    transport.json(
        "api/v0/m/datasets/20/images/",
        page(vec![image(200, "glomerulus.tif", PixelType::Uint16, 512, 512, 2)]),
    );
}

// =============================================================================
// Expansion
// =============================================================================

#[tokio::test]
async fn test_concurrent_expansions_share_one_load() {
    let transport = Arc::new(MockTransport::new().with_delay(Duration::from_millis(50)));
    register_tree(&transport);
    let client = build_client(transport.clone()).await;

    let results = join_all((0..8).map(|_| client.expand(NodeId::Server))).await;

    let first = results[0].as_ref().unwrap().clone();
    for result in &results {
        assert!(Arc::ptr_eq(&first, result.as_ref().unwrap()));
    }
    assert_eq!(transport.count(Method::Get, "api/v0/m/projects/"), 1);
    assert_eq!(client.hierarchy().loads(), 1);
    assert_eq!(client.hierarchy().state(NodeId::Server), LoadState::Loaded);
    assert_eq!(client.browser().snapshot().entities_loading, 0);

    // Expanding again is served from the tree
    client.expand(NodeId::Server).await.unwrap();
    assert_eq!(transport.count(Method::Get, "api/v0/m/projects/"), 1);
}

#[tokio::test]
async fn test_server_children_end_with_orphaned_folder() {
    let transport = Arc::new(MockTransport::new());
    register_tree(&transport);
    let client = build_client(transport).await;

    let children = client.expand(NodeId::Server).await.unwrap();
    let labels: Vec<&str> = children.iter().map(|c| c.label()).collect();
    assert_eq!(labels, vec!["Liver study", "Kidney study", "Orphaned Images"]);
    assert_eq!(children[2], RepositoryEntity::OrphanedFolder);

    let datasets = client.hierarchy().expand_entity(&children[0]).await.unwrap();
    assert_eq!(datasets.len(), 1);
    assert_eq!(datasets[0].label(), "Batch A");

    let images = client.expand(NodeId::Dataset(10)).await.unwrap();
    let image = images[0].as_image().unwrap();
    assert_eq!(image.id, 100);
    assert!(client.is_supported(image));

    let hierarchy = client.hierarchy();
    assert_eq!(hierarchy.parent(&images[0]), Some(NodeId::Dataset(10)));
    assert_eq!(hierarchy.parent(&datasets[0]), Some(NodeId::Project(1)));
    assert_eq!(hierarchy.parent(&children[0]), Some(NodeId::Server));
    assert_eq!(
        hierarchy.parent(&RepositoryEntity::OrphanedFolder),
        Some(NodeId::Server)
    );
    // Images are leaves
    assert_eq!(hierarchy.expand_entity(&images[0]).await.unwrap().len(), 0);
    assert_eq!(hierarchy.parent(&children[1]), Some(NodeId::Server));
}

#[tokio::test]
async fn test_missing_project_expands_to_nothing() {
    let transport = Arc::new(MockTransport::new());
    let client = build_client(transport).await;

    let children = client.expand(NodeId::Project(404)).await.unwrap();
    assert!(children.is_empty());
    assert_eq!(client.hierarchy().state(NodeId::Project(404)), LoadState::Loaded);
}

#[tokio::test]
async fn test_failed_load_is_retried() {
    let transport = Arc::new(MockTransport::new());
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    transport.route(Method::Get, "api/v0/m/projects/", move |url| {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(ClientError::Http {
                status: 503,
                url: url.to_string(),
            });
        }
        let body = page(vec![project(1, "Recovered", 2, 3)]);
        Ok(Bytes::from(serde_json::to_vec(&body).unwrap()))
    });
    let client = build_client(transport).await;

    let err = client.expand(NodeId::Server).await.unwrap_err();
    assert!(matches!(err, ClientError::Http { status: 503, .. }));
    assert_eq!(client.hierarchy().state(NodeId::Server), LoadState::LoadFailed);
    assert!(client.hierarchy().error(NodeId::Server).is_some());

    let children = client.expand(NodeId::Server).await.unwrap();
    assert_eq!(children[0].label(), "Recovered");
    assert_eq!(client.hierarchy().state(NodeId::Server), LoadState::Loaded);
    assert!(client.hierarchy().error(NodeId::Server).is_none());
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

// =============================================================================
// Orphaned Images
// =============================================================================

#[tokio::test]
async fn test_orphaned_images_report_progress() {
    let transport = Arc::new(MockTransport::new());
    transport.json(
        "webclient/api/images/",
        json!({"images": [{"id": 7}, {"id": 8}, {"id": 9}]}),
    );
    register_image(&transport, 7, PixelType::Uint8, 256, 256, 3, 1);
    register_image(&transport, 9, PixelType::Float32, 256, 256, 1, 1);
    let client = build_client(transport).await;

    let children = client.expand(NodeId::OrphanedFolder).await.unwrap();
    let ids: Vec<i64> = children
        .iter()
        .filter_map(|c| c.as_image().map(|i| i.id))
        .collect();
    assert_eq!(ids, vec![7, 9]);

    let state = client.browser().snapshot();
    assert_eq!(state.orphaned_images_total, 3);
    assert_eq!(state.orphaned_images_loaded, 3);
    assert!(!state.orphaned_loading());
    assert_eq!(state.entities_loading, 0);
}

#[tokio::test]
async fn test_no_orphaned_images() {
    let transport = Arc::new(MockTransport::new());
    transport.json("webclient/api/images/", json!({"images": []}));
    let client = build_client(transport).await;

    let children = client.expand(NodeId::OrphanedFolder).await.unwrap();
    assert!(children.is_empty());
    let state = client.browser().snapshot();
    assert_eq!(state.orphaned_images_total, 0);
    assert!(!state.orphaned_loading());
}

// =============================================================================
// Filtering
// =============================================================================

#[tokio::test]
async fn test_text_filter_matches_loaded_descendants() {
    let transport = Arc::new(MockTransport::new());
    register_tree(&transport);
    let client = build_client(transport).await;

    client.expand(NodeId::Server).await.unwrap();
    client.expand(NodeId::Project(1)).await.unwrap();
    client.expand(NodeId::Dataset(10)).await.unwrap();

    let filter = EntityFilter::default().text("SECTION");
    let visible = client.hierarchy().filtered_children(NodeId::Server, &filter);
    let labels: Vec<&str> = visible.iter().map(|c| c.label()).collect();
    assert_eq!(labels, vec!["Liver study", "Orphaned Images"]);

    // The tree itself is unchanged
    assert_eq!(client.hierarchy().children(NodeId::Server).unwrap().len(), 3);
}

#[tokio::test]
async fn test_owner_and_group_filter() {
    let transport = Arc::new(MockTransport::new());
    register_tree(&transport);
    let client = build_client(transport).await;
    client.expand(NodeId::Server).await.unwrap();

    let john = client
        .server()
        .owners()
        .iter()
        .find(|o| o.id == 5)
        .cloned()
        .unwrap();
    let filter = EntityFilter::default().owner(john);
    let visible = client.hierarchy().filtered_children(NodeId::Server, &filter);
    let labels: Vec<&str> = visible.iter().map(|c| c.label()).collect();
    assert_eq!(labels, vec!["Kidney study", "Orphaned Images"]);

    let everyone = EntityFilter::default().owner(Owner::all_members());
    assert_eq!(
        client.hierarchy().filtered_children(NodeId::Server, &everyone).len(),
        3
    );

    let core = client.server().group(4).cloned().unwrap();
    let visible = client
        .hierarchy()
        .filtered_children(NodeId::Server, &EntityFilter::default().group(core));
    assert_eq!(visible, vec![RepositoryEntity::OrphanedFolder]);
}

// =============================================================================
// Cancellation
// =============================================================================

#[tokio::test]
async fn test_close_abandons_in_flight_expansion() {
    let transport = Arc::new(MockTransport::new().with_delay(Duration::from_millis(100)));
    register_tree(&transport);
    let client = build_client(transport.clone()).await;

    let (result, ()) = tokio::join!(client.expand(NodeId::Server), client.close());
    assert!(matches!(result, Err(ClientError::Closed)));
    assert!(client.hierarchy().children(NodeId::Server).is_none());
    assert_eq!(client.hierarchy().state(NodeId::Server), LoadState::NotLoaded);
    assert!(matches!(
        client.expand(NodeId::Project(1)).await,
        Err(ClientError::Closed)
    ));
    assert_eq!(transport.close_count(), 1);
}

#[tokio::test]
async fn test_dropped_expansion_leaves_node_not_loaded() {
    let transport = Arc::new(MockTransport::new().with_delay(Duration::from_millis(100)));
    register_tree(&transport);
    let client = build_client(transport.clone()).await;

    let timed_out =
        tokio::time::timeout(Duration::from_millis(20), client.expand(NodeId::Server)).await;
    assert!(timed_out.is_err());
    assert_eq!(client.hierarchy().state(NodeId::Server), LoadState::NotLoaded);
    assert_eq!(client.browser().snapshot().entities_loading, 0);

    let children = client.expand(NodeId::Server).await.unwrap();
    assert_eq!(children.len(), 3);
    assert_eq!(client.hierarchy().state(NodeId::Server), LoadState::Loaded);
}
