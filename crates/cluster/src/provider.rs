//! Per-node connection pool
//!
//! At most one connection per node. Connections are opened on first use,
//! concurrent first uses of the same node share one connection attempt, and
//! connections to nodes that left the topology are closed by
//! [`ConnectionProvider::close_stale`].

use dashmap::DashMap;
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use resp::{Command, RespValue};
use rr_core::{Endpoint, NodeId, PartitionTable};

use crate::error::{ClusterError, ClusterResult};
use crate::transport::{NodeConnection, Transport};

/// Connection target: a node id, or a bare address
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeTarget {
    Id(NodeId),
    Address { host: String, port: u16 },
}

impl NodeTarget {
    pub fn id(node_id: impl Into<NodeId>) -> Self {
        NodeTarget::Id(node_id.into())
    }

    pub fn address(host: impl Into<String>, port: u16) -> Self {
        NodeTarget::Address {
            host: host.into(),
            port,
        }
    }

    /// Whether the table no longer knows this target
    fn is_stale(&self, table: &PartitionTable) -> bool {
        match self {
            NodeTarget::Id(id) => !table.contains_node(id),
            NodeTarget::Address { host, port } => table.get_node_by_addr(host, *port).is_none(),
        }
    }
}

impl fmt::Display for NodeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeTarget::Id(id) => write!(f, "{}", id),
            NodeTarget::Address { host, port } => write!(f, "{}:{}", host, port),
        }
    }
}

/// An open connection bound to one node
pub struct ConnectionHandle {
    target: NodeTarget,
    endpoint: Endpoint,
    connection: Arc<dyn NodeConnection>,
    command_timeout: Duration,
    partitions: RwLock<Arc<PartitionTable>>,
}

impl ConnectionHandle {
    pub fn target(&self) -> &NodeTarget {
        &self.target
    }

    pub fn node_id(&self) -> Option<&str> {
        match &self.target {
            NodeTarget::Id(id) => Some(id),
            NodeTarget::Address { .. } => None,
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Latest partition table applied to this connection
    pub fn partitions(&self) -> Arc<PartitionTable> {
        self.partitions.read().clone()
    }

    fn set_partitions(&self, table: Arc<PartitionTable>) {
        *self.partitions.write() = table;
    }

    pub async fn dispatch(&self, command: Command) -> ClusterResult<RespValue> {
        tokio::time::timeout(self.command_timeout, self.connection.dispatch(command))
            .await
            .map_err(|_| ClusterError::Timeout)?
    }

    pub fn is_open(&self) -> bool {
        self.connection.is_open()
    }

    pub async fn close(&self) {
        debug!("Closing connection to {} ({})", self.target, self.endpoint);
        self.connection.close().await;
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("target", &self.target)
            .field("endpoint", &self.endpoint.addr())
            .finish()
    }
}

type Slot = Arc<OnceCell<Arc<ConnectionHandle>>>;

/// Connection pool keyed by node
pub struct ConnectionProvider {
    transport: Arc<dyn Transport>,
    partitions: RwLock<Arc<PartitionTable>>,
    connections: DashMap<NodeTarget, Slot>,
    /// Credential and timeout for addresses the table does not know
    fallback: Endpoint,
    command_timeout: Duration,
    closed: AtomicBool,
}

impl ConnectionProvider {
    pub fn new(
        transport: Arc<dyn Transport>,
        partitions: Arc<PartitionTable>,
        fallback: Endpoint,
        command_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            partitions: RwLock::new(partitions),
            connections: DashMap::new(),
            fallback,
            command_timeout,
            closed: AtomicBool::new(false),
        }
    }

    pub fn partitions(&self) -> Arc<PartitionTable> {
        self.partitions.read().clone()
    }

    /// Number of pooled connections, including ones still being opened
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Whether an open connection exists for `target`
    pub fn is_connected(&self, target: &NodeTarget) -> bool {
        let key = self.resolve(target).map(|(key, _)| key);
        key.ok()
            .and_then(|key| self.connections.get(&key).map(|slot| slot.initialized()))
            .unwrap_or(false)
    }

    /// Map a target to its pool key and endpoint
    ///
    /// Addresses of known nodes collapse onto the node id so a node is
    /// never connected twice.
    fn resolve(&self, target: &NodeTarget) -> ClusterResult<(NodeTarget, Endpoint)> {
        let table = self.partitions();
        match target {
            NodeTarget::Id(id) => table
                .get_node(id)
                .map(|node| (target.clone(), node.endpoint.clone()))
                .ok_or_else(|| ClusterError::UnknownNode(id.clone())),
            NodeTarget::Address { host, port } => match table.get_node_by_addr(host, *port) {
                Some(node) => Ok((NodeTarget::Id(node.node_id.clone()), node.endpoint.clone())),
                None => {
                    let mut endpoint = Endpoint::new(host.clone(), *port)
                        .with_timeout(self.fallback.timeout);
                    endpoint.password = self.fallback.password.clone();
                    Ok((target.clone(), endpoint))
                }
            },
        }
    }

    /// Get or open the connection for `target`
    pub async fn connection(&self, target: NodeTarget) -> ClusterResult<Arc<ConnectionHandle>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ClusterError::Shutdown);
        }
        let (key, endpoint) = self.resolve(&target)?;

        let mut slot = self.connections.entry(key.clone()).or_default().clone();
        if slot.get().is_some_and(|handle| !handle.is_open()) {
            debug!("Dropping closed connection to {}", key);
            self.connections
                .remove_if(&key, |_, current| Arc::ptr_eq(current, &slot));
            slot = self.connections.entry(key.clone()).or_default().clone();
        }
        let result = slot.get_or_try_init(|| self.open(&key, &endpoint)).await;

        let handle = match result {
            Ok(handle) => handle.clone(),
            Err(e) => {
                self.connections
                    .remove_if(&key, |_, current| Arc::ptr_eq(current, &slot) && !current.initialized());
                return Err(e);
            }
        };

        // Evicted by a stale sweep or shutdown while it was being opened
        let still_pooled = self
            .connections
            .get(&key)
            .map(|current| Arc::ptr_eq(current.value(), &slot))
            .unwrap_or(false);
        if !still_pooled || self.closed.load(Ordering::Acquire) {
            handle.close().await;
            return Err(ClusterError::connection(
                &endpoint,
                format!("connection to {} was evicted while opening", key),
            ));
        }
        // The node may have left the table between resolve and pooling
        if let NodeTarget::Id(id) = &key {
            if key.is_stale(&self.partitions()) {
                self.connections
                    .remove_if(&key, |_, current| Arc::ptr_eq(current, &slot));
                handle.close().await;
                return Err(ClusterError::UnknownNode(id.clone()));
            }
        }
        Ok(handle)
    }

    async fn open(&self, key: &NodeTarget, endpoint: &Endpoint) -> ClusterResult<Arc<ConnectionHandle>> {
        let connection = tokio::time::timeout(endpoint.timeout, self.transport.connect(endpoint))
            .await
            .map_err(|_| ClusterError::connection(endpoint, "connect timed out"))??;

        if let Some(password) = endpoint.credential() {
            if let Err(e) = connection.auth(password).await {
                connection.close().await;
                return Err(match e {
                    ClusterError::Auth { .. } => e,
                    other => ClusterError::Auth {
                        endpoint: endpoint.addr(),
                        reason: other.to_string(),
                    },
                });
            }
        }

        debug!("Opened connection to {} ({})", key, endpoint);
        Ok(Arc::new(ConnectionHandle {
            target: key.clone(),
            endpoint: endpoint.clone(),
            connection,
            command_timeout: self.command_timeout,
            partitions: RwLock::new(self.partitions()),
        }))
    }

    /// Make `table` the provider's table and push it to every open handle
    pub fn apply_partitions(&self, table: Arc<PartitionTable>) {
        *self.partitions.write() = table.clone();
        for entry in self.connections.iter() {
            if let Some(handle) = entry.value().get() {
                handle.set_partitions(table.clone());
            }
        }
    }

    /// Close connections to nodes absent from `table`
    ///
    /// Returns the number of evicted entries. Connections to nodes still in
    /// the table are left alone.
    pub async fn close_stale(&self, table: &PartitionTable) -> usize {
        let stale: Vec<NodeTarget> = self
            .connections
            .iter()
            .filter(|entry| entry.key().is_stale(table))
            .map(|entry| entry.key().clone())
            .collect();

        let mut evicted = Vec::with_capacity(stale.len());
        for key in stale {
            if let Some((key, slot)) = self.connections.remove(&key) {
                evicted.push((key, slot));
            }
        }

        for (key, slot) in &evicted {
            info!("Closing stale connection to {}", key);
            if let Some(handle) = slot.get() {
                handle.close().await;
            }
        }
        evicted.len()
    }

    /// Close every connection; later requests fail with `Shutdown`
    pub async fn close_all(&self) {
        self.closed.store(true, Ordering::Release);
        let keys: Vec<NodeTarget> = self.connections.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            if let Some((_, slot)) = self.connections.remove(&key) {
                if let Some(handle) = slot.get() {
                    handle.close().await;
                }
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rr_core::{NodeDescriptor, SlotRange, SLOT_COUNT};
    use std::sync::atomic::AtomicUsize;

    struct CountingConnection {
        open: AtomicBool,
    }

    #[async_trait]
    impl NodeConnection for CountingConnection {
        async fn dispatch(&self, _command: Command) -> ClusterResult<RespValue> {
            Ok(RespValue::ok())
        }

        async fn auth(&self, password: &str) -> ClusterResult<()> {
            if password == "good" {
                Ok(())
            } else {
                Err(ClusterError::Command("WRONGPASS".into()))
            }
        }

        async fn close(&self) {
            self.open.store(false, Ordering::SeqCst);
        }

        fn is_open(&self) -> bool {
            self.open.load(Ordering::SeqCst)
        }
    }

    #[derive(Default)]
    struct CountingTransport {
        connects: AtomicUsize,
    }

    #[async_trait]
    impl Transport for CountingTransport {
        async fn connect(&self, endpoint: &Endpoint) -> ClusterResult<Arc<dyn NodeConnection>> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if endpoint.host == "down" {
                return Err(ClusterError::connection(endpoint, "refused"));
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(Arc::new(CountingConnection {
                open: AtomicBool::new(true),
            }))
        }
    }

    fn table() -> Arc<PartitionTable> {
        Arc::new(
            PartitionTable::new(vec![
                NodeDescriptor::master("n1", Endpoint::new("h", 1), vec![SlotRange::new(0, 8192).unwrap()]),
                NodeDescriptor::master("n2", Endpoint::new("h", 2), vec![SlotRange::new(8192, SLOT_COUNT).unwrap()]),
                NodeDescriptor::master("n3", Endpoint::new("down", 3), vec![]),
            ])
            .unwrap(),
        )
    }

    fn provider(transport: Arc<CountingTransport>) -> ConnectionProvider {
        ConnectionProvider::new(transport, table(), Endpoint::new("h", 1), Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_address_of_known_node_shares_connection() {
        let transport = Arc::new(CountingTransport::default());
        let provider = provider(transport.clone());

        let by_id = provider.connection(NodeTarget::id("n2")).await.unwrap();
        let by_addr = provider.connection(NodeTarget::address("h", 2)).await.unwrap();
        assert!(Arc::ptr_eq(&by_id, &by_addr));
        assert_eq!(by_addr.node_id(), Some("n2"));
        assert_eq!(transport.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_node() {
        let provider = provider(Arc::new(CountingTransport::default()));
        let err = provider.connection(NodeTarget::id("nope")).await.unwrap_err();
        assert!(matches!(err, ClusterError::UnknownNode(id) if id == "nope"));
    }

    #[tokio::test]
    async fn test_failed_connect_is_not_cached() {
        let transport = Arc::new(CountingTransport::default());
        let provider = provider(transport.clone());

        assert!(provider.connection(NodeTarget::id("n3")).await.is_err());
        assert!(provider.connection(NodeTarget::id("n3")).await.is_err());
        assert_eq!(transport.connects.load(Ordering::SeqCst), 2);
        assert!(provider.is_empty());
        // The node stays in the table
        assert!(provider.partitions().contains_node("n3"));
    }

    #[tokio::test]
    async fn test_rejected_auth_is_connection_failure() {
        let transport = Arc::new(CountingTransport::default());
        let mut nodes = table().as_ref().clone();
        nodes.set_credential("bad");
        let provider = ConnectionProvider::new(
            transport,
            Arc::new(nodes),
            Endpoint::new("h", 1),
            Duration::from_secs(1),
        );
        let err = provider.connection(NodeTarget::id("n1")).await.unwrap_err();
        assert!(matches!(err, ClusterError::Auth { .. }));
        assert!(!provider.is_connected(&NodeTarget::id("n1")));
    }

    #[tokio::test]
    async fn test_apply_partitions_reaches_open_handles() {
        let provider = provider(Arc::new(CountingTransport::default()));
        let handle = provider.connection(NodeTarget::id("n1")).await.unwrap();

        let empty = Arc::new(PartitionTable::empty());
        provider.apply_partitions(empty.clone());
        assert!(Arc::ptr_eq(&handle.partitions(), &empty));
    }

    #[tokio::test]
    async fn test_node_removed_while_opening_is_not_pooled() {
        let provider = Arc::new(provider(Arc::new(CountingTransport::default())));

        let opening = {
            let provider = provider.clone();
            tokio::spawn(async move { provider.connection(NodeTarget::id("n2")).await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        let without_n2 = PartitionTable::new(
            table()
                .nodes()
                .iter()
                .filter(|n| n.node_id != "n2")
                .cloned()
                .collect(),
        )
        .unwrap();
        provider.apply_partitions(Arc::new(without_n2));

        let err = opening.await.unwrap().unwrap_err();
        assert!(matches!(err, ClusterError::UnknownNode(id) if id == "n2"));
        assert!(!provider.is_connected(&NodeTarget::id("n2")));
        assert!(provider.is_empty());
    }

    #[tokio::test]
    async fn test_close_all() {
        let provider = provider(Arc::new(CountingTransport::default()));
        let handle = provider.connection(NodeTarget::id("n1")).await.unwrap();
        provider.close_all().await;

        assert!(!handle.is_open());
        assert!(provider.is_empty());
        assert!(matches!(
            provider.connection(NodeTarget::id("n1")).await,
            Err(ClusterError::Shutdown)
        ));
    }
}
