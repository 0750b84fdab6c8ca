//! Cluster-aware client core
//!
//! Keeps a live slot -> node map of a sharded key-value cluster, routes
//! commands to the owning node and pools one connection per node.
//!
//! - [`TopologyRefresh`]: queries candidate endpoints and reconciles their views
//! - [`ConnectionProvider`]: per-node connections with single-flight creation
//! - [`CommandRouter`]: slot routing and multi-key fan-out
//! - [`RefreshScheduler`]: background refresh loop
//! - [`ClusterClient`]: ties the pieces together

pub mod client;
pub mod cluster_nodes;
pub mod config;
pub mod connection;
pub mod error;
pub mod provider;
pub mod router;
pub mod scheduler;
pub mod tcp;
pub mod topology;
pub mod transport;

pub use client::ClusterClient;
pub use cluster_nodes::{parse_cluster_nodes, ClusterNodesSource};
pub use config::{
    ClusterClientConfig, ConfigError, ConnectionConfig, LogConfig, SeedConfig, TopologyConfig,
};
pub use connection::{ClusterConnection, ConnectionRegistry, EndpointSupplier};
pub use error::{ClusterError, ClusterResult};
pub use provider::{ConnectionHandle, ConnectionProvider, NodeTarget};
pub use router::CommandRouter;
pub use scheduler::{PeriodicRefresh, RefreshScheduler};
pub use tcp::{TcpConnection, TcpTransport};
pub use topology::{is_changed, TopologyRefresh, TopologyViews};
pub use transport::{NodeConnection, TopologySource, Transport};
