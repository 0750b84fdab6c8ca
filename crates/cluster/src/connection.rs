//! Routed cluster connection
//!
//! A [`ClusterConnection`] owns one [`ConnectionProvider`] and the router on
//! top of it. The client tracks every open connection in a
//! [`ConnectionRegistry`] so topology changes and shutdown reach all of them.

use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

use resp::{Command, RespValue};
use rr_core::{Endpoint, NodeId, PartitionTable};

use crate::error::{ClusterError, ClusterResult};
use crate::provider::{ConnectionHandle, ConnectionProvider, NodeTarget};
use crate::router::CommandRouter;

/// `() -> Endpoint`, evaluated when the bootstrap connection is opened
pub type EndpointSupplier = Arc<dyn Fn() -> Endpoint + Send + Sync>;

/// Connection with slot routing across the whole cluster
pub struct ClusterConnection {
    id: u64,
    router: CommandRouter,
    bootstrap: EndpointSupplier,
    registry: Weak<ConnectionRegistry>,
    closed: AtomicBool,
}

impl ClusterConnection {
    pub(crate) fn new(
        id: u64,
        provider: Arc<ConnectionProvider>,
        fallback: Endpoint,
        bootstrap: EndpointSupplier,
        registry: Weak<ConnectionRegistry>,
    ) -> Self {
        Self {
            id,
            router: CommandRouter::new(provider, fallback),
            bootstrap,
            registry,
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn provider(&self) -> &Arc<ConnectionProvider> {
        self.router.provider()
    }

    pub fn router(&self) -> &CommandRouter {
        &self.router
    }

    /// Partition table this connection routes with
    pub fn partitions(&self) -> Arc<PartitionTable> {
        self.provider().partitions()
    }

    /// Switch to a new partition table, including already-open node handles
    pub fn apply_partitions(&self, table: Arc<PartitionTable>) {
        self.provider().apply_partitions(table);
    }

    fn ensure_open(&self) -> ClusterResult<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(ClusterError::Shutdown)
        }
    }

    /// Connection to the current bootstrap endpoint
    pub async fn bootstrap_connection(&self) -> ClusterResult<Arc<ConnectionHandle>> {
        let endpoint = (self.bootstrap)();
        self.route_connection(NodeTarget::address(endpoint.host, endpoint.port))
            .await
    }

    /// Connection to a node picked by id or address
    pub async fn route_connection(&self, target: NodeTarget) -> ClusterResult<Arc<ConnectionHandle>> {
        self.ensure_open()?;
        self.provider().connection(target).await
    }

    /// Route a keyed command to the node(s) owning its keys
    pub async fn connect_and_route(&self, command: Command) -> ClusterResult<RespValue> {
        self.ensure_open()?;
        self.router.route(command).await
    }

    /// Send a command to one node, key or not
    pub async fn on_node(&self, node_id: &str, command: Command) -> ClusterResult<RespValue> {
        let handle = self.route_connection(NodeTarget::id(node_id)).await?;
        handle.dispatch(command).await
    }

    /// Send a command to every master in parallel
    ///
    /// Results are per node, in table order; one failing master does not
    /// fail the others.
    pub async fn on_masters(
        &self,
        command: Command,
    ) -> ClusterResult<Vec<(NodeId, ClusterResult<RespValue>)>> {
        self.ensure_open()?;
        let table = self.partitions();
        let requests = table.masters().map(|node| {
            let command = command.clone();
            async move {
                let reply = self.on_node(&node.node_id, command).await;
                (node.node_id.clone(), reply)
            }
        });
        Ok(join_all(requests).await)
    }

    /// Close node connections that are not in the current table
    pub async fn close_stale_connections(&self) -> usize {
        let table = self.partitions();
        self.provider().close_stale(&table).await
    }

    pub fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    /// Close all node connections and leave the client's registry
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("Closing cluster connection {}", self.id);
        self.provider().close_all().await;
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }
}

impl fmt::Debug for ClusterConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterConnection")
            .field("id", &self.id)
            .field("open", &self.is_open())
            .field("node_connections", &self.provider().len())
            .finish()
    }
}

/// Open cluster connections of one client
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<u64, Arc<ClusterConnection>>>,
}

impl ConnectionRegistry {
    pub fn register(&self, connection: Arc<ClusterConnection>) {
        self.connections.lock().insert(connection.id(), connection);
    }

    pub fn remove(&self, id: u64) -> Option<Arc<ClusterConnection>> {
        self.connections.lock().remove(&id)
    }

    pub fn len(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.lock().is_empty()
    }

    /// Snapshot of the registered connections
    pub fn connections(&self) -> Vec<Arc<ClusterConnection>> {
        self.connections.lock().values().cloned().collect()
    }

    /// Apply `f` to every registered connection
    pub fn for_each(&self, f: impl Fn(&ClusterConnection)) {
        for connection in self.connections() {
            f(&connection);
        }
    }

    /// Remove and return every registered connection
    pub fn drain(&self) -> Vec<Arc<ClusterConnection>> {
        self.connections.lock().drain().map(|(_, c)| c).collect()
    }
}
