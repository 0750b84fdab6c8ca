//! Core cluster routing types
//!
//! Provides the data model shared by the cluster client:
//! - Key to slot hashing (CRC16, Redis Cluster compatible)
//! - Node endpoints and descriptors
//! - Partition tables mapping slots to owning nodes

pub mod endpoint;
pub mod node;
pub mod partition;
pub mod slot;

// Re-export commonly used types
pub use endpoint::{sort_endpoints, Endpoint, DEFAULT_TIMEOUT};
pub use node::{NodeDescriptor, NodeFlag, NodeId};
pub use partition::{PartitionError, PartitionTable};
pub use slot::{slot_for_key, SlotRange, SLOT_COUNT};
