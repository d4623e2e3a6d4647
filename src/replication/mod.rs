//! Partkeeper's collection of replication planners.
//!
//! A planner looks at which chunks every replica of the local partition holds
//! and decides which chunk copies to add and which to remove. Planners are
//! pure: identical inputs always yield identical plans.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::tasks::Task;
use crate::utils::KeeperError;

use serde::{Deserialize, Serialize};

mod mirroring;
use mirroring::MirroringPlanner;

mod sharding;
use sharding::{MirrorShardingPlanner, ShardingPlanner};

mod unrestricted;
use unrestricted::UnrestrictedPlanner;

/// Replica ID type (one replica of the local partition).
pub type ReplicaId = u32;

/// Content chunk ID type.
pub type ChunkId = u64;

/// Inventory entry: the chunks one replica currently holds. The entry's mere
/// presence marks the replica as existing, even with no chunks.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct ReplicaChunkSet {
    pub replica: ReplicaId,
    pub chunks: BTreeSet<ChunkId>,
}

impl ReplicaChunkSet {
    pub fn new(
        replica: ReplicaId,
        chunks: impl IntoIterator<Item = ChunkId>,
    ) -> Self {
        ReplicaChunkSet {
            replica,
            chunks: chunks.into_iter().collect(),
        }
    }
}

/// Replication planner trait to be implemented by all strategies.
pub trait ReplicationPlanner: Send + Sync {
    /// Plans replicate/shrink tasks that bring every chunk to its redundancy
    /// target. Errors on malformed inventory.
    fn plan(
        &self,
        min_replicas: usize,
        inventory: &[ReplicaChunkSet],
    ) -> Result<Vec<Task>, KeeperError>;
}

/// Enum of supported replication modes.
#[derive(
    Debug, PartialEq, Eq, Clone, Copy, Hash, Serialize, Deserialize,
)]
pub enum ReplicationMode {
    Mirroring,
    Sharding,
    MirroredSharding,
    Unrestricted,
}

impl ReplicationMode {
    /// Parse command line string into ReplicationMode enum.
    pub fn parse_name(name: &str) -> Option<Self> {
        match name {
            "Mirroring" => Some(Self::Mirroring),
            "Sharding" => Some(Self::Sharding),
            "MirroredSharding" => Some(Self::MirroredSharding),
            "Unrestricted" => Some(Self::Unrestricted),
            _ => None,
        }
    }

    /// Create the planner implementing this mode on heap.
    pub fn new_planner(&self) -> Box<dyn ReplicationPlanner> {
        match self {
            Self::Mirroring => Box::new(MirroringPlanner),
            Self::Sharding => Box::new(ShardingPlanner),
            Self::MirroredSharding => Box::new(MirrorShardingPlanner),
            Self::Unrestricted => Box::new(UnrestrictedPlanner),
        }
    }
}

impl fmt::Display for ReplicationMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Indexed view of an inventory shared by all planners.
#[derive(Debug)]
pub(crate) struct Census {
    /// All replica IDs in ascending order, including empty ones.
    replicas: Vec<ReplicaId>,

    /// Chunks held by each replica.
    held: BTreeMap<ReplicaId, BTreeSet<ChunkId>>,

    /// Replicas holding each chunk.
    holders: BTreeMap<ChunkId, BTreeSet<ReplicaId>>,
}

impl Census {
    /// Validates and indexes an inventory.
    pub(crate) fn build(
        min_replicas: usize,
        inventory: &[ReplicaChunkSet],
    ) -> Result<Self, KeeperError> {
        if min_replicas == 0 {
            return logged_err!("invalid min_replicas {}", min_replicas);
        }

        let mut held = BTreeMap::new();
        let mut holders: BTreeMap<ChunkId, BTreeSet<ReplicaId>> =
            BTreeMap::new();
        for entry in inventory {
            if held.insert(entry.replica, entry.chunks.clone()).is_some() {
                return logged_err!(
                    "duplicate replica {} in inventory",
                    entry.replica
                );
            }
            for &chunk in &entry.chunks {
                holders.entry(chunk).or_default().insert(entry.replica);
            }
        }

        Ok(Census {
            replicas: held.keys().copied().collect(),
            held,
            holders,
        })
    }

    #[inline]
    pub(crate) fn replicas(&self) -> &[ReplicaId] {
        &self.replicas
    }

    #[inline]
    pub(crate) fn num_held(&self, replica: ReplicaId) -> usize {
        self.held.get(&replica).map_or(0, |chunks| chunks.len())
    }

    /// Iterates over `(chunk, holders)` in ascending chunk order.
    #[inline]
    pub(crate) fn chunks(
        &self,
    ) -> impl Iterator<Item = (ChunkId, &BTreeSet<ReplicaId>)> {
        self.holders.iter().map(|(&chunk, holders)| (chunk, holders))
    }

    /// Replica to copy a chunk from: the lowest-ID holder.
    #[inline]
    pub(crate) fn source_of(
        holders: &BTreeSet<ReplicaId>,
    ) -> Option<ReplicaId> {
        holders.iter().next().copied()
    }
}
