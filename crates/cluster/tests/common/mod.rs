#![allow(dead_code)]

pub mod mock_cluster;

use std::sync::Arc;

use rr_cluster::{ClusterClient, ClusterClientConfig, SeedConfig};
use rr_core::{Endpoint, NodeDescriptor, SlotRange, SLOT_COUNT};

use mock_cluster::MockCluster;

pub const NODE1: &str = "node1";
pub const NODE2: &str = "node2";
pub const NODE3: &str = "node3";

pub const NODE1_ADDR: &str = "10.0.0.1:7000";
pub const NODE2_ADDR: &str = "10.0.0.2:7000";
pub const NODE3_ADDR: &str = "10.0.0.3:7000";

pub fn endpoint(addr: &str) -> Endpoint {
    addr.parse().expect("valid address")
}

pub fn range(start: u32, end: u32) -> SlotRange {
    SlotRange::new(start, end).expect("valid range")
}

/// node2 owns [0, 8192), node1 owns [8192, 16384); "foo" (slot 12182) lands on node1
pub fn two_node_view() -> Vec<NodeDescriptor> {
    vec![
        NodeDescriptor::master(NODE1, endpoint(NODE1_ADDR), vec![range(8192, SLOT_COUNT)]),
        NodeDescriptor::master(NODE2, endpoint(NODE2_ADDR), vec![range(0, 8192)]),
    ]
}

/// node2 left, node3 took over its slots
pub fn resharded_view() -> Vec<NodeDescriptor> {
    vec![
        NodeDescriptor::master(NODE1, endpoint(NODE1_ADDR), vec![range(8192, SLOT_COUNT)]),
        NodeDescriptor::master(NODE3, endpoint(NODE3_ADDR), vec![range(0, 8192)]),
    ]
}

pub fn config(seeds: &[&str]) -> ClusterClientConfig {
    let seeds = seeds
        .iter()
        .map(|addr| {
            let ep = endpoint(addr);
            SeedConfig::new(ep.host, ep.port)
        })
        .collect();
    let mut config = ClusterClientConfig::with_seeds(seeds);
    config.topology.discovery_timeout_ms = 200;
    config.connection.connect_timeout_ms = 1000;
    config
}

pub fn client(mock: &MockCluster, config: ClusterClientConfig) -> ClusterClient {
    ClusterClient::new(config, Arc::new(mock.clone()), Arc::new(mock.clone()))
        .expect("valid client config")
}

/// Cluster where every node of `view` answers with `view`
pub fn mock_with_view(view: Vec<NodeDescriptor>) -> MockCluster {
    let mock = MockCluster::new();
    mock.serve_everywhere(view);
    mock
}

/// Poll `cond` until it holds or two seconds pass
pub async fn wait_until(cond: impl Fn() -> bool) -> bool {
    for _ in 0..200 {
        if cond() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    cond()
}
