//! Slot hashing and slot ranges
//!
//! Keys are mapped onto a fixed keyspace of `SLOT_COUNT` slots using CRC16
//! (XMODEM), exactly like Redis Cluster, including `{hash tag}` support.

use crc::{Crc, CRC_16_XMODEM};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::PartitionError;

/// Total number of slots (consistent with Redis Cluster)
pub const SLOT_COUNT: u32 = 16384;

/// CRC16 calculator for Redis Cluster (XMODEM variant)
static CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

/// Calculate slot for a key
///
/// If the key contains a non-empty `{...}` section, only the bytes between the
/// first `{` and the following `}` are hashed.
pub fn slot_for_key(key: &[u8]) -> u32 {
    CRC16.checksum(hash_tag(key)) as u32 % SLOT_COUNT
}

/// Portion of the key used for hashing
fn hash_tag(key: &[u8]) -> &[u8] {
    if let Some(open) = key.iter().position(|b| *b == b'{') {
        if let Some(len) = key[open + 1..].iter().position(|b| *b == b'}') {
            if len > 0 {
                return &key[open + 1..open + 1 + len];
            }
        }
    }
    key
}

/// Contiguous slot range `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SlotRange {
    /// Start slot (inclusive)
    pub start: u32,
    /// End slot (exclusive)
    pub end: u32,
}

impl SlotRange {
    /// Create a new range, rejecting empty or out-of-keyspace ranges
    pub fn new(start: u32, end: u32) -> Result<Self, PartitionError> {
        if start >= end || end > SLOT_COUNT {
            return Err(PartitionError::InvalidSlotRange(start, end));
        }
        Ok(Self { start, end })
    }

    /// Range covering a single slot
    pub fn single(slot: u32) -> Result<Self, PartitionError> {
        Self::new(slot, slot.saturating_add(1))
    }

    /// Range from inclusive bounds, as printed by `CLUSTER NODES`
    pub fn inclusive(first: u32, last: u32) -> Result<Self, PartitionError> {
        Self::new(first, last.saturating_add(1))
    }

    /// Check if a slot belongs to this range
    pub fn contains(&self, slot: u32) -> bool {
        slot >= self.start && slot < self.end
    }

    /// Number of slots in this range
    pub fn len(&self) -> u32 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn slots(&self) -> std::ops::Range<u32> {
        self.start..self.end
    }
}

impl fmt::Display for SlotRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.len() == 1 {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end - 1)
        }
    }
}
