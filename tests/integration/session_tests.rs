//! Web session integration tests against a fake OMERO web server.
//!
//! Tests verify:
//! - Login with valid credentials, rejection of invalid ones
//! - Public sessions never log in or out
//! - Logout happens once however often the session is closed
//! - Request timeouts and unreachable servers are network errors
//! - A client can browse and fetch thumbnails over a real HTTP session

use std::time::Duration;

use omero_client::{
    Client, ClientError, ClientOptions, Credentials, NodeId, SessionOptions, Transport,
    WebSession,
};

use super::test_utils::{spawn_fake_omero, FAKE_PASSWORD};

fn jane() -> Credentials {
    Credentials::new("jane", FAKE_PASSWORD)
}

// =============================================================================
// Login and Logout
// =============================================================================

#[tokio::test]
async fn test_login_and_logout() {
    let server = spawn_fake_omero().await;

    let session = WebSession::connect(&server.base, Some(jane())).await.unwrap();
    assert!(session.is_authenticated());
    assert_eq!(session.username(), Some("jane"));
    assert_eq!(session.server_id(), 1);
    assert_eq!(session.user().unwrap().group_id, 3);
    assert_eq!(server.login_count(), 1);
    assert_eq!(
        session.api_uri().unwrap().as_str(),
        format!("{}/api/v0/", server.base)
    );

    session.close().await;
    session.close().await;
    assert!(session.is_closed());
    assert_eq!(server.logout_count(), 1);

    let url = session.resolve("api/v0/m/projects/").unwrap();
    assert!(matches!(session.get_bytes(&url).await, Err(ClientError::Closed)));
}

#[tokio::test]
async fn test_wrong_password_is_authentication_error() {
    let server = spawn_fake_omero().await;

    let result = WebSession::connect(&server.base, Some(Credentials::new("jane", "guess"))).await;
    match result {
        Err(ClientError::Authentication(message)) => assert!(message.contains("Login failed")),
        Err(other) => panic!("Expected Authentication error, got {:?}", other),
        Ok(_) => panic!("Expected Authentication error, got a session"),
    }
    assert_eq!(server.login_count(), 1);
}

#[tokio::test]
async fn test_public_session() {
    let server = spawn_fake_omero().await;

    let session = WebSession::connect(&server.base, None).await.unwrap();
    assert!(!session.is_authenticated());
    assert_eq!(session.username(), None);

    let url = session.resolve("api/v0/m/projects/").unwrap();
    let json = session.get_json(&url).await.unwrap();
    assert_eq!(json["data"][0]["Name"], "Public project");

    session.close().await;
    assert_eq!(server.login_count(), 0);
    assert_eq!(server.logout_count(), 0);
}

// =============================================================================
// Errors
// =============================================================================

#[tokio::test]
async fn test_unknown_path_is_http_error() {
    let server = spawn_fake_omero().await;
    let session = WebSession::connect(&server.base, None).await.unwrap();

    let url = session.resolve("webgateway/imgData/1/").unwrap();
    match session.get_bytes(&url).await {
        Err(ClientError::Http { status, url }) => {
            assert_eq!(status, 404);
            assert!(url.ends_with("/webgateway/imgData/1/"));
        }
        other => panic!("Expected Http error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_request_timeout_is_network_error() {
    let server = spawn_fake_omero().await;
    let options = SessionOptions {
        timeout: Duration::from_millis(300),
    };
    let session = WebSession::connect_with(&server.base, None, options).await.unwrap();

    let url = session.resolve("slow/").unwrap();
    let err = session.get_bytes(&url).await.unwrap_err();
    assert!(matches!(err, ClientError::Network(_)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_invalid_server_uri() {
    let result = WebSession::connect("not a server", None).await;
    assert!(matches!(result, Err(ClientError::InvalidUri(_))));
}

// =============================================================================
// Client over HTTP
// =============================================================================

#[tokio::test]
async fn test_client_over_http() {
    let server = spawn_fake_omero().await;

    let client = Client::connect(&server.base, Some(jane()), ClientOptions::default())
        .await
        .unwrap();
    let state = client.browser().snapshot();
    assert!(state.authenticated);
    assert_eq!(state.username_label(), "jane");
    assert_eq!(client.server().groups().len(), 2);
    assert_eq!(client.server().owners()[0].username, "jane");

    let children = client.expand(NodeId::Server).await.unwrap();
    assert_eq!(children[0].label(), "Public project");

    let thumbnail = client.fetch_thumbnail(11).await.unwrap();
    assert_eq!((thumbnail.width(), thumbnail.height()), (16, 16));
    assert_eq!(thumbnail.sample(0, 0, 1), Some(20.0));

    client.close().await;
    client.close().await;
    assert_eq!(server.logout_count(), 1);
}
