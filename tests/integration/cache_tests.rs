//! Cache effectiveness integration tests.
//!
//! Tests verify:
//! - Concurrent requests for one tile fetch each channel once
//! - The tile cache honours its byte bound
//! - Thumbnails are fetched once per image and size
//! - Closing the client empties the caches and drops in-flight fills

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;

use omero_client::{Client, ClientError, ClientOptions, PixelType, DEFAULT_THUMBNAIL_SIZE};

use super::test_utils::{
    build_client, create_test_png, enable_microservice, register_groups, register_image,
    serve_u16_microservice_tiles, Method, MockTransport,
};

const MS_TILES: &str = "http://omero.test:8082/tile/";

fn raw_image_transport(delay: Duration) -> Arc<MockTransport> {
    let transport = Arc::new(MockTransport::new().with_delay(delay));
    register_image(&transport, 5, PixelType::Uint16, 1024, 1024, 3, 1);
    enable_microservice(&transport);
    serve_u16_microservice_tiles(&transport, 5, 3);
    transport
}

// =============================================================================
// Tile Cache
// =============================================================================

#[tokio::test]
async fn test_concurrent_tile_requests_fetch_once() {
    let transport = raw_image_transport(Duration::from_millis(30));
    let client = build_client(transport.clone()).await;
    let session = client.open_image(5).await.unwrap();
    let request = session.tile_request(0, 256, 256, 256, 256);

    let responses = join_all((0..10).map(|_| session.read_tile(&request))).await;

    let first = responses[0].as_ref().unwrap().tile.clone();
    for response in &responses {
        assert!(Arc::ptr_eq(&first, &response.as_ref().unwrap().tile));
    }
    assert_eq!(transport.count(Method::Get, MS_TILES), 3);
    assert_eq!(client.tile_cache().fetches(), 1);
    assert_eq!(client.tile_cache().len().await, 1);
}

#[tokio::test]
async fn test_distinct_tiles_are_fetched_separately() {
    let transport = raw_image_transport(Duration::ZERO);
    let client = build_client(transport.clone()).await;
    let session = client.open_image(5).await.unwrap();

    let a = session.tile_request(0, 0, 0, 256, 256);
    let b = session.tile_request(0, 256, 0, 256, 256);
    let c = a.at_plane(0, 0);
    let (ra, rb, rc) = tokio::join!(
        session.read_tile(&a),
        session.read_tile(&b),
        session.read_tile(&c)
    );
    ra.unwrap();
    rb.unwrap();
    rc.unwrap();

    assert_eq!(transport.count(Method::Get, MS_TILES), 6);
    assert_eq!(client.tile_cache().len().await, 2);
}

#[tokio::test]
async fn test_tile_cache_byte_bound() {
    let transport = raw_image_transport(Duration::ZERO);
    register_groups(&transport);
    // One 64x64 tile of three uint16 bands weighs 24 KiB
    let options = ClientOptions {
        tile_cache_bytes: 2 * 64 * 64 * 3 * 2,
        ..ClientOptions::default()
    };
    let client = Client::from_transport(transport.clone(), 1, false, None, options)
        .await
        .unwrap();
    let session = client.open_image(5).await.unwrap();

    let requests: Vec<_> = (0..3)
        .map(|i| session.tile_request(0, i * 64, 0, 64, 64))
        .collect();
    for request in &requests {
        session.read_tile(request).await.unwrap();
    }

    let cache = client.tile_cache();
    assert_eq!(cache.len().await, 2);
    assert!(cache.size().await <= cache.max_bytes());
    assert!(!cache.contains(&requests[0]).await);
    assert!(cache.contains(&requests[2]).await);

    let response = session.read_tile(&requests[0]).await.unwrap();
    assert!(!response.cache_hit);
    assert_eq!(transport.count(Method::Get, MS_TILES), 12);
}

// =============================================================================
// Thumbnail Cache
// =============================================================================

#[tokio::test]
async fn test_thumbnail_fetched_once() {
    let transport = Arc::new(MockTransport::new().with_delay(Duration::from_millis(20)));
    transport.bytes(
        &format!("webgateway/render_thumbnail/42/{}/", DEFAULT_THUMBNAIL_SIZE),
        create_test_png(96, 128, [1, 2, 3]),
    );
    let client = build_client(transport.clone()).await;

    let thumbnails = join_all((0..5).map(|_| client.fetch_thumbnail(42))).await;
    for thumbnail in &thumbnails {
        let thumbnail = thumbnail.as_ref().unwrap();
        assert_eq!((thumbnail.width(), thumbnail.height()), (96, 128));
    }
    client.fetch_thumbnail(42).await.unwrap();

    assert_eq!(transport.count(Method::Get, "webgateway/render_thumbnail/"), 1);
    assert_eq!(client.thumbnail_cache().fetches(), 1);
    assert!(client
        .thumbnail_cache()
        .contains(42, DEFAULT_THUMBNAIL_SIZE)
        .await);
    assert_eq!(client.browser().snapshot().thumbnails_loading, 0);
}

#[tokio::test]
async fn test_thumbnail_cache_byte_bound() {
    let transport = Arc::new(MockTransport::new());
    register_groups(&transport);
    for id in [42, 43] {
        transport.bytes(
            &format!("webgateway/render_thumbnail/{}/{}/", id, DEFAULT_THUMBNAIL_SIZE),
            create_test_png(96, 128, [1, 2, 3]),
        );
    }
    // Room for one 96x128 RGB thumbnail only
    let options = ClientOptions {
        thumbnail_cache_bytes: 96 * 128 * 3 + 1024,
        ..ClientOptions::default()
    };
    let client = Client::from_transport(transport.clone(), 1, false, None, options)
        .await
        .unwrap();

    client.fetch_thumbnail(42).await.unwrap();
    client.fetch_thumbnail(43).await.unwrap();

    let thumbnails = client.thumbnail_cache();
    assert!(!thumbnails.contains(42, DEFAULT_THUMBNAIL_SIZE).await);
    assert!(thumbnails.contains(43, DEFAULT_THUMBNAIL_SIZE).await);
    let stats = thumbnails.stats().await;
    assert_eq!(stats.len, 1);
    assert_eq!(stats.max_bytes, 96 * 128 * 3 + 1024);
}

#[tokio::test]
async fn test_failed_thumbnail_is_not_cached() {
    let transport = Arc::new(MockTransport::new());
    let client = build_client(transport.clone()).await;

    let err = client.fetch_thumbnail(13).await.unwrap_err();
    assert!(err.is_not_found());
    client.fetch_thumbnail(13).await.unwrap_err();

    assert_eq!(transport.count(Method::Get, "webgateway/render_thumbnail/"), 2);
    assert_eq!(client.thumbnail_cache().stats().await.len, 0);
}

// =============================================================================
// Close
// =============================================================================

#[tokio::test]
async fn test_close_empties_caches() {
    let transport = raw_image_transport(Duration::ZERO);
    transport.bytes(
        &format!("webgateway/render_thumbnail/5/{}/", DEFAULT_THUMBNAIL_SIZE),
        create_test_png(32, 32, [9, 9, 9]),
    );
    let client = build_client(transport).await;
    let session = client.open_image(5).await.unwrap();
    session
        .read_tile(&session.tile_request(0, 0, 0, 64, 64))
        .await
        .unwrap();
    client.fetch_thumbnail(5).await.unwrap();

    client.close().await;

    assert!(client.is_closed());
    assert!(client.tile_cache().is_empty().await);
    assert_eq!(client.thumbnail_cache().stats().await.len, 0);
    assert_eq!(client.browser().snapshot().opened_image_count(), 0);
    assert!(matches!(
        client.fetch_thumbnail(5).await,
        Err(ClientError::Closed)
    ));
}

#[tokio::test]
async fn test_close_drops_in_flight_tile() {
    let transport = raw_image_transport(Duration::from_millis(100));
    let client = build_client(transport).await;
    let session = client.open_image(5).await.unwrap();
    let request = session.tile_request(0, 0, 0, 64, 64);

    let (result, ()) = tokio::join!(session.read_tile(&request), client.close());

    assert!(matches!(result, Err(ClientError::Closed)));
    assert!(client.tile_cache().is_empty().await);
    assert!(session.is_closed());
}
