//! Cluster client
//!
//! Owns the seed list, the shared partition table, the refresh scheduler and
//! the registry of open cluster connections.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use rr_core::{Endpoint, PartitionTable, DEFAULT_TIMEOUT};

use crate::cluster_nodes::ClusterNodesSource;
use crate::config::ClusterClientConfig;
use crate::connection::{ClusterConnection, ConnectionRegistry, EndpointSupplier};
use crate::error::{ClusterError, ClusterResult};
use crate::provider::ConnectionProvider;
use crate::scheduler::{PeriodicRefresh, RefreshScheduler};
use crate::tcp::TcpTransport;
use crate::topology::{is_changed, TopologyRefresh};
use crate::transport::{TopologySource, Transport};

/// Endpoint used when neither the table nor the seeds offer one
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 6379;

/// Cluster-aware client
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct ClusterClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: ClusterClientConfig,
    seeds: Vec<Endpoint>,
    timeout: Duration,
    transport: Arc<dyn Transport>,
    refresh: TopologyRefresh,
    partitions: RwLock<Option<Arc<PartitionTable>>>,
    /// Serializes initial loads and reloads
    load_lock: tokio::sync::Mutex<()>,
    registry: Arc<ConnectionRegistry>,
    scheduler: RefreshScheduler,
    active: AtomicBool,
    next_id: AtomicU64,
}

impl ClusterClient {
    pub fn new(
        config: ClusterClientConfig,
        transport: Arc<dyn Transport>,
        source: Arc<dyn TopologySource>,
    ) -> ClusterResult<Self> {
        config.validate()?;
        let seeds = config.seed_endpoints();
        let timeout = config
            .connection
            .command_timeout()
            .or_else(|| seeds.first().map(|s| s.timeout))
            .unwrap_or(DEFAULT_TIMEOUT);
        let refresh = TopologyRefresh::new(source, config.topology.discovery_timeout());
        let scheduler = RefreshScheduler::new(config.topology.refresh_period());

        Ok(Self {
            inner: Arc::new(ClientInner {
                config,
                seeds,
                timeout,
                transport,
                refresh,
                partitions: RwLock::new(None),
                load_lock: tokio::sync::Mutex::new(()),
                registry: Arc::new(ConnectionRegistry::default()),
                scheduler,
                active: AtomicBool::new(true),
                next_id: AtomicU64::new(1),
            }),
        })
    }

    /// Client speaking RESP over TCP, discovering with `CLUSTER NODES`
    pub fn with_tcp(config: ClusterClientConfig) -> ClusterResult<Self> {
        let transport: Arc<dyn Transport> = Arc::new(TcpTransport::new());
        let source = Arc::new(ClusterNodesSource::new(transport.clone()));
        Self::new(config, transport, source)
    }

    pub fn config(&self) -> &ClusterClientConfig {
        &self.inner.config
    }

    pub fn seeds(&self) -> &[Endpoint] {
        &self.inner.seeds
    }

    /// Command timeout applied to node connections
    pub fn timeout(&self) -> Duration {
        self.inner.timeout
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::Acquire)
    }

    fn ensure_active(&self) -> ClusterResult<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(ClusterError::Shutdown)
        }
    }

    /// Current partition table, loaded from the seeds on first use
    pub async fn get_partitions(&self) -> ClusterResult<Arc<PartitionTable>> {
        if let Some(table) = self.current_partitions() {
            return Ok(table);
        }
        self.ensure_active()?;

        let _guard = self.inner.load_lock.lock().await;
        if let Some(table) = self.current_partitions() {
            return Ok(table);
        }
        let table = Arc::new(self.load_partitions().await?);
        *self.inner.partitions.write() = Some(table.clone());
        Ok(table)
    }

    /// Table currently held, without loading
    pub fn current_partitions(&self) -> Option<Arc<PartitionTable>> {
        self.inner.partitions.read().clone()
    }

    /// Replace the table without discovery
    ///
    /// Connections that are already open keep the table they have until the
    /// next reload or refresh.
    pub fn set_partitions(&self, table: PartitionTable) {
        *self.inner.partitions.write() = Some(Arc::new(table));
    }

    /// Load the table from the seeds and push it to every open connection
    ///
    /// A connection whose table already describes the loaded topology keeps
    /// its table.
    pub async fn reload_partitions(&self) -> ClusterResult<Arc<PartitionTable>> {
        self.ensure_active()?;
        let _guard = self.inner.load_lock.lock().await;
        let table = Arc::new(self.load_partitions().await?);
        *self.inner.partitions.write() = Some(table.clone());
        self.update_partitions_in_connections(&table);
        Ok(table)
    }

    async fn load_partitions(&self) -> ClusterResult<PartitionTable> {
        let table = self.inner.refresh.load_partitions(&self.inner.seeds).await?;
        self.activate_refresh_if_needed();
        Ok(table)
    }

    fn update_partitions_in_connections(&self, table: &Arc<PartitionTable>) {
        self.inner.registry.for_each(|connection| {
            if is_changed(&connection.partitions(), table) {
                connection.apply_partitions(table.clone());
            } else {
                debug!("Cluster connection {} already has this topology", connection.id());
            }
        });
    }

    fn activate_refresh_if_needed(&self) {
        if !self.inner.config.topology.refresh_cluster_view {
            return;
        }
        let target: Arc<dyn PeriodicRefresh> = self.inner.clone();
        self.inner.scheduler.activate(Arc::downgrade(&target));
    }

    /// Whether the periodic refresh task has been started
    pub fn is_refresh_activated(&self) -> bool {
        self.inner.scheduler.is_activated()
    }

    /// Open a new routed cluster connection
    pub async fn connect(&self) -> ClusterResult<Arc<ClusterConnection>> {
        self.ensure_active()?;
        let table = self.get_partitions().await?;
        self.activate_refresh_if_needed();

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let first_seed = self.first_seed()?.clone();
        let provider = Arc::new(ConnectionProvider::new(
            self.inner.transport.clone(),
            table,
            first_seed.clone(),
            self.inner.timeout,
        ));
        let connection = Arc::new(ClusterConnection::new(
            id,
            provider,
            first_seed,
            self.bootstrap_supplier(),
            Arc::downgrade(&self.inner.registry),
        ));

        self.inner.registry.register(connection.clone());
        // Shutdown may have drained the registry before this insert
        if !self.is_active() {
            connection.close().await;
            return Err(ClusterError::Shutdown);
        }
        debug!("Opened cluster connection {}", id);
        Ok(connection)
    }

    fn first_seed(&self) -> ClusterResult<&Endpoint> {
        self.inner.seeds.first().ok_or_else(|| ClusterError::NoViewAvailable {
            seeds: String::new(),
        })
    }

    /// Preferred endpoint for a fresh connection
    ///
    /// First node, in host/port order, with a resolved address; otherwise
    /// the first seed.
    pub fn bootstrap_endpoint(&self) -> Endpoint {
        self.inner.bootstrap_endpoint()
    }

    fn bootstrap_supplier(&self) -> EndpointSupplier {
        let inner = Arc::downgrade(&self.inner);
        let fallback = self.inner.seeds.first().cloned();
        Arc::new(move || {
            inner
                .upgrade()
                .map(|inner| inner.bootstrap_endpoint())
                .or_else(|| fallback.clone())
                .unwrap_or_else(|| Endpoint::new(DEFAULT_HOST, DEFAULT_PORT))
        })
    }

    /// Open cluster connections
    pub fn connections(&self) -> Vec<Arc<ClusterConnection>> {
        self.inner.registry.connections()
    }

    /// Run one refresh round now, as the scheduler would
    pub async fn refresh_once(&self) -> ClusterResult<bool> {
        self.inner.refresh_topology().await
    }

    /// Stop refreshing and close every connection
    pub async fn shutdown(&self) {
        if !self.inner.active.swap(false, Ordering::AcqRel) {
            return;
        }
        self.inner.scheduler.cancel();
        let connections = self.inner.registry.drain();
        info!("Shutting down cluster client, closing {} connections", connections.len());
        for connection in connections {
            connection.close().await;
        }
    }
}

impl ClientInner {
    fn bootstrap_endpoint(&self) -> Endpoint {
        let table = self.partitions.read().clone();
        if let Some(table) = table {
            if let Some(node) = table
                .ordered_nodes()
                .into_iter()
                .find(|n| n.endpoint.resolved.is_some())
            {
                return node.endpoint.clone();
            }
        }
        self.seeds
            .first()
            .cloned()
            .unwrap_or_else(|| Endpoint::new(DEFAULT_HOST, DEFAULT_PORT))
    }

    /// Refresh candidates: the seeds until a non-empty table exists, then
    /// the table's own nodes
    fn refresh_candidates(&self) -> Vec<Endpoint> {
        match self.partitions.read().as_ref() {
            Some(table) if !table.is_empty() => table.ordered_endpoints(),
            _ => self.seeds.clone(),
        }
    }

    async fn refresh_topology(&self) -> ClusterResult<bool> {
        if !self.active.load(Ordering::Acquire) {
            return Err(ClusterError::Shutdown);
        }
        let candidates = self.refresh_candidates();
        debug!("Requesting cluster view from {} endpoints", candidates.len());

        let views = self.refresh.load_views(&candidates).await;
        let Some(table) = views.into_canonical() else {
            debug!("No cluster view available this period");
            return Ok(false);
        };

        let changed = {
            let current = self.partitions.read();
            match current.as_ref() {
                Some(current) => is_changed(current, &table),
                None => true,
            }
        };
        if !changed {
            return Ok(false);
        }

        info!("Cluster topology changed, {} nodes", table.len());
        let table = Arc::new(table);
        *self.partitions.write() = Some(table.clone());

        let connections = self.registry.connections();
        for connection in &connections {
            connection.apply_partitions(table.clone());
        }

        if self.active.load(Ordering::Acquire) {
            tokio::spawn(async move {
                for connection in connections {
                    let closed = connection.close_stale_connections().await;
                    if closed > 0 {
                        debug!(
                            "Closed {} stale node connections on cluster connection {}",
                            closed,
                            connection.id()
                        );
                    }
                }
            });
        } else {
            warn!("Client shut down, skipping stale connection sweep");
        }
        Ok(true)
    }
}

#[async_trait]
impl PeriodicRefresh for ClientInner {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire) && self.config.topology.refresh_cluster_view
    }

    async fn refresh(&self) -> ClusterResult<bool> {
        self.refresh_topology().await
    }
}
