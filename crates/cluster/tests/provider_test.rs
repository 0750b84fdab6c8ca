mod common;

use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;

use resp::{Command, RespValue};
use rr_cluster::{ClusterError, ConnectionHandle, NodeTarget};
use rr_core::PartitionTable;

use common::*;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_route_connection_opens_one_connection() {
    let mock = mock_with_view(two_node_view());
    mock.set_connect_delay(Duration::from_millis(50));
    let client = client(&mock, config(&[NODE1_ADDR]));
    let connection = client.connect().await.unwrap();

    let tasks = (0..16).map(|_| {
        let connection = connection.clone();
        tokio::spawn(async move { connection.route_connection(NodeTarget::id(NODE2)).await })
    });
    let handles: Vec<Arc<ConnectionHandle>> = join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    assert_eq!(handles.len(), 16);
    assert_eq!(mock.connects(NODE2_ADDR), 1);
    assert!(handles.iter().all(|h| Arc::ptr_eq(h, &handles[0])));
    assert_eq!(connection.provider().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_for_different_nodes() {
    let mock = mock_with_view(two_node_view());
    mock.set_connect_delay(Duration::from_millis(20));
    let client = client(&mock, config(&[NODE1_ADDR]));
    let connection = client.connect().await.unwrap();

    let tasks = (0..8).map(|i| {
        let connection = connection.clone();
        let node = if i % 2 == 0 { NODE1 } else { NODE2 };
        tokio::spawn(async move { connection.route_connection(NodeTarget::id(node)).await })
    });
    for joined in join_all(tasks).await {
        joined.unwrap().unwrap();
    }

    assert_eq!(mock.connects(NODE1_ADDR), 1);
    assert_eq!(mock.connects(NODE2_ADDR), 1);
}

#[tokio::test]
async fn test_route_by_address_reuses_node_connection() {
    let mock = mock_with_view(two_node_view());
    let client = client(&mock, config(&[NODE1_ADDR]));
    let connection = client.connect().await.unwrap();

    let by_id = connection.route_connection(NodeTarget::id(NODE1)).await.unwrap();
    let addr = endpoint(NODE1_ADDR);
    let by_addr = connection
        .route_connection(NodeTarget::address(addr.host, addr.port))
        .await
        .unwrap();

    assert!(Arc::ptr_eq(&by_id, &by_addr));
    assert_eq!(mock.connects(NODE1_ADDR), 1);
}

#[tokio::test]
async fn test_stale_connection_closed_after_reshard() {
    let mock = mock_with_view(two_node_view());
    let client = client(&mock, config(&[NODE1_ADDR]));
    let connection = client.connect().await.unwrap();

    connection.route_connection(NodeTarget::id(NODE1)).await.unwrap();
    connection.route_connection(NodeTarget::id(NODE2)).await.unwrap();

    mock.serve_everywhere(resharded_view());
    assert!(client.refresh_once().await.unwrap());

    assert!(wait_until(|| mock.closes(NODE2_ADDR) == 1).await);
    assert_eq!(mock.closes(NODE1_ADDR), 0);
    assert!(connection.provider().is_connected(&NodeTarget::id(NODE1)));

    // "bar" (slot 5061) moved from node2 to node3
    let reply = connection
        .connect_and_route(Command::new("GET").arg("bar"))
        .await
        .unwrap();
    assert_eq!(reply, RespValue::bulk(NODE3_ADDR));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_close_stale_runs_alongside_new_connections() {
    let mock = mock_with_view(two_node_view());
    mock.set_connect_delay(Duration::from_millis(20));
    let client = client(&mock, config(&[NODE1_ADDR]));
    let connection = client.connect().await.unwrap();
    connection.route_connection(NodeTarget::id(NODE2)).await.unwrap();

    let only_node1 = PartitionTable::new(vec![two_node_view().remove(0)]).unwrap();
    let provider = connection.provider().clone();
    let (closed, opened) = tokio::join!(
        provider.close_stale(&only_node1),
        connection.route_connection(NodeTarget::id(NODE1)),
    );

    assert_eq!(closed, 1);
    assert!(opened.is_ok());
    assert_eq!(mock.closes(NODE2_ADDR), 1);
    assert!(provider.is_connected(&NodeTarget::id(NODE1)));
}

#[tokio::test]
async fn test_connection_failure_keeps_node_in_table() {
    let mock = mock_with_view(two_node_view());
    let client = client(&mock, config(&[NODE1_ADDR]));
    let connection = client.connect().await.unwrap();

    mock.set_unreachable(NODE2_ADDR, true);
    let err = connection
        .route_connection(NodeTarget::id(NODE2))
        .await
        .unwrap_err();
    assert!(matches!(err, ClusterError::Connection { .. }));
    assert!(connection.partitions().contains_node(NODE2));

    mock.set_unreachable(NODE2_ADDR, false);
    connection.route_connection(NodeTarget::id(NODE2)).await.unwrap();
    assert_eq!(mock.connects(NODE2_ADDR), 2);
}

#[tokio::test]
async fn test_handshake_uses_propagated_credential() {
    let mock = mock_with_view(two_node_view());
    mock.require_password(NODE1_ADDR, "secret");
    mock.require_password(NODE2_ADDR, "secret");

    let mut cfg = config(&[NODE1_ADDR]);
    cfg.seeds[0].password = Some("secret".into());
    let client = client(&mock, cfg);
    let connection = client.connect().await.unwrap();

    let reply = connection
        .connect_and_route(Command::new("GET").arg("bar"))
        .await
        .unwrap();
    assert_eq!(reply, RespValue::bulk(NODE2_ADDR));
}

#[tokio::test]
async fn test_rejected_handshake_is_connection_error() {
    let mock = mock_with_view(two_node_view());
    mock.require_password(NODE2_ADDR, "other");

    let mut cfg = config(&[NODE1_ADDR]);
    cfg.seeds[0].password = Some("secret".into());
    let client = client(&mock, cfg);
    let connection = client.connect().await.unwrap();

    let err = connection
        .route_connection(NodeTarget::id(NODE2))
        .await
        .unwrap_err();
    assert!(matches!(err, ClusterError::Auth { .. }));
    assert_eq!(mock.closes(NODE2_ADDR), 1);
    assert!(connection.partitions().contains_node(NODE2));
}
