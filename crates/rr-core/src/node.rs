//! Node descriptor definitions

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::endpoint::Endpoint;
use crate::slot::SlotRange;

/// Node ID
pub type NodeId = String;

/// Node flag as reported in a topology view
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum NodeFlag {
    /// The node that answered the topology query
    Myself,
    Master,
    Replica,
    /// Suspected failing by the reporting node (`fail?`)
    PossiblyFailing,
    /// Confirmed failing (`fail`)
    Failing,
    Handshake,
    NoAddress,
}

impl NodeFlag {
    /// Flags that take part in topology change detection
    pub fn is_role(&self) -> bool {
        matches!(self, NodeFlag::Master | NodeFlag::Replica | NodeFlag::Failing)
    }
}

impl fmt::Display for NodeFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeFlag::Myself => write!(f, "myself"),
            NodeFlag::Master => write!(f, "master"),
            NodeFlag::Replica => write!(f, "slave"),
            NodeFlag::PossiblyFailing => write!(f, "fail?"),
            NodeFlag::Failing => write!(f, "fail"),
            NodeFlag::Handshake => write!(f, "handshake"),
            NodeFlag::NoAddress => write!(f, "noaddr"),
        }
    }
}

impl FromStr for NodeFlag {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "myself" => Ok(NodeFlag::Myself),
            "master" => Ok(NodeFlag::Master),
            "slave" | "replica" => Ok(NodeFlag::Replica),
            "fail?" => Ok(NodeFlag::PossiblyFailing),
            "fail" => Ok(NodeFlag::Failing),
            "handshake" => Ok(NodeFlag::Handshake),
            "noaddr" => Ok(NodeFlag::NoAddress),
            _ => Err(()),
        }
    }
}

/// One node of a topology view
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDescriptor {
    pub node_id: NodeId,
    pub endpoint: Endpoint,
    pub flags: BTreeSet<NodeFlag>,
    /// Master of this node when it is a replica
    #[serde(default)]
    pub master_id: Option<NodeId>,
    /// Owned slot ranges (meaningful for masters only)
    #[serde(default)]
    pub slots: Vec<SlotRange>,
}

impl NodeDescriptor {
    /// Create a master owning `slots`
    pub fn master(node_id: impl Into<NodeId>, endpoint: Endpoint, slots: Vec<SlotRange>) -> Self {
        Self {
            node_id: node_id.into(),
            endpoint,
            flags: BTreeSet::from([NodeFlag::Master]),
            master_id: None,
            slots,
        }
    }

    /// Create a replica of `master_id`
    pub fn replica(
        node_id: impl Into<NodeId>,
        endpoint: Endpoint,
        master_id: impl Into<NodeId>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            endpoint,
            flags: BTreeSet::from([NodeFlag::Replica]),
            master_id: Some(master_id.into()),
            slots: Vec::new(),
        }
    }

    pub fn with_flag(mut self, flag: NodeFlag) -> Self {
        self.flags.insert(flag);
        self
    }

    pub fn has_flag(&self, flag: NodeFlag) -> bool {
        self.flags.contains(&flag)
    }

    pub fn is_master(&self) -> bool {
        self.has_flag(NodeFlag::Master)
    }

    pub fn is_replica(&self) -> bool {
        self.has_flag(NodeFlag::Replica)
    }

    pub fn is_failing(&self) -> bool {
        self.has_flag(NodeFlag::Failing)
    }

    pub fn owns_slot(&self, slot: u32) -> bool {
        self.slots.iter().any(|r| r.contains(slot))
    }

    /// Number of owned slots
    pub fn slot_count(&self) -> u32 {
        self.slots.iter().map(|r| r.len()).sum()
    }

    /// Role flags only, used for topology comparison
    pub fn role_flags(&self) -> BTreeSet<NodeFlag> {
        self.flags.iter().copied().filter(NodeFlag::is_role).collect()
    }

    /// Flags formatted as `CLUSTER NODES` prints them
    pub fn flags_string(&self) -> String {
        if self.flags.is_empty() {
            return "noflags".to_string();
        }
        self.flags
            .iter()
            .map(|f| f.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }
}
