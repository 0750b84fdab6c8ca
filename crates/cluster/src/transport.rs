//! Collaborator traits consumed by the cluster core
//!
//! The core never talks to sockets directly. It asks a [`Transport`] to open
//! node connections and a [`TopologySource`] to read one endpoint's view of
//! the cluster.

use async_trait::async_trait;
use resp::{Command, RespValue};
use rr_core::{Endpoint, NodeDescriptor};
use std::sync::Arc;

use crate::error::ClusterResult;

/// One open connection to a single node
#[async_trait]
pub trait NodeConnection: Send + Sync {
    /// Send a command and wait for its reply
    ///
    /// Error replies come back as `Ok(RespValue::Error(..))`; `Err` means the
    /// connection itself failed.
    async fn dispatch(&self, command: Command) -> ClusterResult<RespValue>;

    /// Credential handshake
    async fn auth(&self, password: &str) -> ClusterResult<()>;

    async fn close(&self);

    fn is_open(&self) -> bool;
}

/// Opens node connections
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, endpoint: &Endpoint) -> ClusterResult<Arc<dyn NodeConnection>>;
}

/// Answers "what does endpoint E think the cluster looks like"
#[async_trait]
pub trait TopologySource: Send + Sync {
    async fn load_view(&self, endpoint: &Endpoint) -> ClusterResult<Vec<NodeDescriptor>>;
}
