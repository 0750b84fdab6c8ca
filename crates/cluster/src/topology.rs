//! Topology discovery
//!
//! Asks every candidate endpoint for its view of the cluster in parallel,
//! each query bounded by its own timeout, and reconciles the answers into a
//! single [`PartitionTable`].

use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use rr_core::{sort_endpoints, Endpoint, PartitionTable};

use crate::error::{ClusterError, ClusterResult};
use crate::transport::TopologySource;

/// Successful views, in deterministic endpoint order
#[derive(Debug, Clone, Default)]
pub struct TopologyViews {
    views: Vec<(Endpoint, PartitionTable)>,
}

impl TopologyViews {
    pub fn len(&self) -> usize {
        self.views.len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }

    /// First successful view
    pub fn first(&self) -> Option<&PartitionTable> {
        self.views.first().map(|(_, table)| table)
    }

    /// View reported by a specific endpoint
    pub fn viewed_by(&self, host: &str, port: u16) -> Option<&PartitionTable> {
        self.views
            .iter()
            .find(|(endpoint, _)| endpoint.matches(host, port))
            .map(|(_, table)| table)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Endpoint, PartitionTable)> {
        self.views.iter()
    }

    /// Canonical view: the first success, carrying the credential of the
    /// endpoint that produced it onto every node
    pub fn into_canonical(self) -> Option<PartitionTable> {
        let (viewed_by, mut table) = self.views.into_iter().next()?;
        if let Some(password) = viewed_by.credential() {
            table.set_credential(password);
        }
        Some(table)
    }
}

/// Topology refresh over a [`TopologySource`]
#[derive(Clone)]
pub struct TopologyRefresh {
    source: Arc<dyn TopologySource>,
    timeout: Duration,
}

impl TopologyRefresh {
    pub fn new(source: Arc<dyn TopologySource>, timeout: Duration) -> Self {
        Self { source, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Query every endpoint and collect the views that loaded
    ///
    /// Endpoints are sorted by host then port and de-duplicated first.
    /// Unreachable endpoints, timeouts and inconsistent views are logged and
    /// skipped.
    pub async fn load_views(&self, seeds: &[Endpoint]) -> TopologyViews {
        let mut candidates = seeds.to_vec();
        sort_endpoints(&mut candidates);
        candidates.dedup_by(|a, b| a.matches(&b.host, b.port));

        let queries = candidates.iter().map(|endpoint| async move {
            let result = match tokio::time::timeout(self.timeout, self.source.load_view(endpoint)).await
            {
                Ok(Ok(nodes)) => PartitionTable::new(nodes).map_err(ClusterError::from),
                Ok(Err(e)) => Err(e),
                Err(_) => Err(ClusterError::Timeout),
            };
            (endpoint, result)
        });

        let mut views = Vec::with_capacity(candidates.len());
        for (endpoint, result) in join_all(queries).await {
            match result {
                Ok(table) => {
                    debug!("Loaded view from {} with {} nodes", endpoint, table.len());
                    views.push((endpoint.clone(), table));
                }
                Err(e) => warn!("Cannot load cluster view from {}: {}", endpoint, e),
            }
        }
        TopologyViews { views }
    }

    /// Load the canonical partition table
    pub async fn load_partitions(&self, seeds: &[Endpoint]) -> ClusterResult<PartitionTable> {
        let views = self.load_views(seeds).await;
        let count = views.len();
        match views.into_canonical() {
            Some(table) => {
                info!(
                    "Loaded cluster view with {} nodes ({} of {} endpoints answered)",
                    table.len(),
                    count,
                    seeds.len()
                );
                Ok(table)
            }
            None => Err(ClusterError::NoViewAvailable {
                seeds: describe(seeds),
            }),
        }
    }
}

/// Whether `new` describes a different topology than `current`
pub fn is_changed(current: &PartitionTable, new: &PartitionTable) -> bool {
    !current.same_topology(new)
}

fn describe(endpoints: &[Endpoint]) -> String {
    endpoints
        .iter()
        .map(|e| e.addr())
        .collect::<Vec<_>>()
        .join(", ")
}
