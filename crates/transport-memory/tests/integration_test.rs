//! Integration tests for memory transport

use enforcer_transport::{Channel, ChannelState, Endpoint, Transport, TransportError};
use enforcer_transport_memory::{FetchOutcome, MemoryControlPlane};
use enforcer_xds_protocol::{DiscoveryRequest, DiscoveryResponse, NodeIdentity, ResourceCategory};
use futures::StreamExt;
use std::time::Duration;
use tokio::time::timeout;

fn endpoint() -> Endpoint {
    Endpoint::new("adapter", 18000)
}

fn node() -> NodeIdentity {
    NodeIdentity::new("enforcer", "pod-1")
}

#[tokio::test]
async fn test_stream_exchange() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let control_plane = MemoryControlPlane::new();
    let channel = control_plane.transport().connect(&endpoint()).await.unwrap();
    assert_eq!(channel.state(), ChannelState::Ready);

    let mut client = channel.open_stream(ResourceCategory::Apis).await.unwrap();
    let mut server = control_plane.accept(ResourceCategory::Apis).await.unwrap();
    assert_eq!(server.category(), ResourceCategory::Apis);

    client
        .requests
        .send(DiscoveryRequest::initial(&node(), ResourceCategory::Apis, ""))
        .unwrap();
    let request = server.next_request().await.unwrap();
    assert_eq!(request.version_info, "");
    assert_eq!(request.type_url, ResourceCategory::Apis.type_url());

    assert!(server.respond(DiscoveryResponse::new(ResourceCategory::Apis, "v1", "n1", vec![])));
    let response = client.responses.next().await.unwrap().unwrap();
    assert_eq!(response.version_info, "v1");

    server.fail(14, "going away");
    assert!(matches!(
        client.responses.next().await,
        Some(Err(TransportError::Status { code: 14, .. }))
    ));
    assert!(client.responses.next().await.is_none());
}

#[tokio::test]
async fn test_refused_connections_are_counted_down() {
    let control_plane = MemoryControlPlane::new();
    let transport = control_plane.transport();
    control_plane.refuse_connections(2);

    assert!(transport.connect(&endpoint()).await.is_err());
    assert!(transport.connect(&endpoint()).await.is_err());
    assert!(transport.connect(&endpoint()).await.is_ok());
    assert_eq!(control_plane.connect_count(), 1);
}

#[tokio::test]
async fn test_failed_channel_ends_streams() {
    let control_plane = MemoryControlPlane::new();
    let channel = control_plane.transport().connect(&endpoint()).await.unwrap();

    let mut client = channel.open_stream(ResourceCategory::KeyManagers).await.unwrap();
    let _server = control_plane.accept(ResourceCategory::KeyManagers).await.unwrap();

    control_plane.fail_channels();

    assert_eq!(channel.state(), ChannelState::TransientFailure);
    let next = timeout(Duration::from_secs(1), client.responses.next())
        .await
        .unwrap();
    assert!(next.is_none());
    assert!(channel.open_stream(ResourceCategory::KeyManagers).await.is_err());
}

#[tokio::test]
async fn test_scripted_fetch() {
    let control_plane = MemoryControlPlane::new();
    let channel = control_plane.transport().connect(&endpoint()).await.unwrap();

    control_plane.script_fetch(FetchOutcome::Fail("down".to_string()));
    control_plane.script_fetch(FetchOutcome::Respond(DiscoveryResponse::new(
        ResourceCategory::Config,
        "c1",
        "n1",
        vec![],
    )));

    let request = DiscoveryRequest::initial(&node(), ResourceCategory::Config, "");
    assert!(channel.fetch(request.clone()).await.is_err());
    let response = channel.fetch(request.clone()).await.unwrap();
    assert_eq!(response.version_info, "c1");

    // Script exhausted
    assert!(channel.fetch(request).await.is_err());
    assert_eq!(control_plane.fetch_count(), 3);
    assert_eq!(control_plane.fetch_requests().len(), 3);
}
