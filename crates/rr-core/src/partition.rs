//! Partition table
//!
//! Immutable snapshot of the cluster topology:
//! - Ordered list of node descriptors
//! - Direct slot -> node index for O(1) lookups
//!
//! A table is never updated slot by slot. Refreshes build a new table and
//! swap it in as a whole.

use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

use crate::endpoint::{sort_endpoints, Endpoint};
use crate::node::{NodeDescriptor, NodeFlag, NodeId};
use crate::slot::{slot_for_key, SLOT_COUNT};

/// Partition table errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PartitionError {
    #[error("Invalid slot range: start={0}, end={1}")]
    InvalidSlotRange(u32, u32),
    #[error("Slot {slot} claimed by both {first} and {second}")]
    SlotConflict {
        slot: u32,
        first: NodeId,
        second: NodeId,
    },
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

/// Slot ownership table for one topology view
#[derive(Debug, Clone)]
pub struct PartitionTable {
    nodes: Vec<NodeDescriptor>,
    /// slot -> index into `nodes`, masters only
    slot_index: Vec<Option<usize>>,
}

impl PartitionTable {
    /// Build a table, deriving the slot index from the masters' ranges
    ///
    /// Fails if two masters claim the same slot. Unclaimed slots are allowed
    /// and simply have no owner.
    pub fn new(nodes: Vec<NodeDescriptor>) -> Result<Self, PartitionError> {
        let mut slot_index: Vec<Option<usize>> = vec![None; SLOT_COUNT as usize];

        for (idx, node) in nodes.iter().enumerate() {
            if !node.is_master() {
                continue;
            }
            for range in &node.slots {
                if range.start >= range.end || range.end > SLOT_COUNT {
                    return Err(PartitionError::InvalidSlotRange(range.start, range.end));
                }
                for slot in range.slots() {
                    match slot_index[slot as usize] {
                        Some(existing) if existing != idx => {
                            return Err(PartitionError::SlotConflict {
                                slot,
                                first: nodes[existing].node_id.clone(),
                                second: node.node_id.clone(),
                            });
                        }
                        _ => slot_index[slot as usize] = Some(idx),
                    }
                }
            }
        }

        Ok(Self { nodes, slot_index })
    }

    /// Table without nodes; every slot is unowned
    pub fn empty() -> Self {
        Self {
            nodes: Vec::new(),
            slot_index: vec![None; SLOT_COUNT as usize],
        }
    }

    pub fn nodes(&self) -> &[NodeDescriptor] {
        &self.nodes
    }

    pub fn into_nodes(self) -> Vec<NodeDescriptor> {
        self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Owner of a slot, `None` for unassigned or out-of-range slots
    pub fn slot_owner(&self, slot: u32) -> Option<&NodeDescriptor> {
        let idx = (*self.slot_index.get(slot as usize)?)?;
        self.nodes.get(idx)
    }

    /// Owner of the slot the key hashes to
    pub fn owner_for_key(&self, key: &[u8]) -> Option<&NodeDescriptor> {
        self.slot_owner(slot_for_key(key))
    }

    pub fn get_node(&self, node_id: &str) -> Option<&NodeDescriptor> {
        self.nodes.iter().find(|n| n.node_id == node_id)
    }

    pub fn get_node_by_addr(&self, host: &str, port: u16) -> Option<&NodeDescriptor> {
        self.nodes.iter().find(|n| n.endpoint.matches(host, port))
    }

    pub fn contains_node(&self, node_id: &str) -> bool {
        self.get_node(node_id).is_some()
    }

    pub fn masters(&self) -> impl Iterator<Item = &NodeDescriptor> {
        self.nodes.iter().filter(|n| n.is_master())
    }

    pub fn node_ids(&self) -> BTreeSet<&str> {
        self.nodes.iter().map(|n| n.node_id.as_str()).collect()
    }

    /// Node endpoints ordered by host then port
    pub fn ordered_endpoints(&self) -> Vec<Endpoint> {
        let mut endpoints: Vec<Endpoint> = self.nodes.iter().map(|n| n.endpoint.clone()).collect();
        sort_endpoints(&mut endpoints);
        endpoints
    }

    /// Nodes ordered by endpoint host then port
    pub fn ordered_nodes(&self) -> Vec<&NodeDescriptor> {
        let mut nodes: Vec<&NodeDescriptor> = self.nodes.iter().collect();
        nodes.sort_by(|a, b| a.endpoint.cmp_by_address(&b.endpoint));
        nodes
    }

    /// Check if every slot has an owner
    pub fn is_complete(&self) -> bool {
        self.slot_index.iter().all(|s| s.is_some())
    }

    pub fn unassigned_slot_count(&self) -> usize {
        self.slot_index.iter().filter(|s| s.is_none()).count()
    }

    /// Copy a credential onto every node endpoint
    pub fn set_credential(&mut self, password: &str) {
        for node in &mut self.nodes {
            node.endpoint.password = Some(password.to_string());
        }
    }

    /// Structural topology comparison
    ///
    /// Two tables describe the same topology when they contain the same node
    /// ids with the same role flags and every slot has the same owner.
    /// Addresses and credentials are not compared.
    pub fn same_topology(&self, other: &PartitionTable) -> bool {
        fn roles(t: &PartitionTable) -> BTreeMap<&str, BTreeSet<NodeFlag>> {
            t.nodes
                .iter()
                .map(|n| (n.node_id.as_str(), n.role_flags()))
                .collect()
        }

        if roles(self) != roles(other) {
            return false;
        }
        (0..SLOT_COUNT).all(|slot| {
            self.slot_owner(slot).map(|n| &n.node_id) == other.slot_owner(slot).map(|n| &n.node_id)
        })
    }
}

impl PartialEq for PartitionTable {
    fn eq(&self, other: &Self) -> bool {
        self.nodes == other.nodes
    }
}

impl Default for PartitionTable {
    fn default() -> Self {
        Self::empty()
    }
}
