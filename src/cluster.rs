//! Cluster-facing collaborator traits consumed by the partitioner.
//!
//! Leader election and the cluster-wide chunk index live outside this crate;
//! the partitioner only sees them through these two narrow interfaces.

use crate::replication::ReplicaChunkSet;
use crate::utils::KeeperError;

use async_trait::async_trait;

/// Cluster index able to report which chunks every replica of this node's
/// partition currently holds.
#[async_trait]
pub trait ClusterIndex: Send + Sync {
    /// Fetches a fresh replica-chunk inventory of the local partition. May be
    /// slow or remote; results are never cached by the caller.
    async fn local_partition_replica_chunks(
        &self,
    ) -> Result<Vec<ReplicaChunkSet>, KeeperError>;
}

/// Name service exposing the leadership status of this node's partition.
pub trait NameService: Send + Sync {
    /// Returns true if this node currently leads its partition.
    fn is_leader(&self) -> bool;
}
