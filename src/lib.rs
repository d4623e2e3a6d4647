//! Partkeeper: leader-driven chunk replication planning and crash-safe
//! partitioned storage images.

#[macro_use]
mod utils;

mod cluster;
mod image;
mod partitioner;
mod replication;
mod restore;
mod tasks;

// Helper utilities, functions, and macros exposed:
pub use utils::{logger_init, KeeperError, ME};

// Cluster collaborator interfaces exposed:
pub use cluster::{ClusterIndex, NameService};

// Replication planning exposed:
pub use replication::{
    ChunkId, ReplicaChunkSet, ReplicaId, ReplicationMode, ReplicationPlanner,
};

// Task model and queue exposed:
pub use tasks::{
    build_chain, ChainedTask, GroupedTask, LocalTaskQueue, Task, TaskExecutor,
    TaskQueue, TaskRouter, TaskStats, TaskTag,
};

// Partitioner control loop exposed:
pub use partitioner::{
    IterOutcome, Partitioner, PartitionerConfig, PartitionerCore,
    PartitionerState,
};

// Partitioned image exposed:
pub use image::{
    compute_signature, select_current_slot, FileImageSlot, ImageConfig,
    ImageSignature, ImageStorage, LocalStore, MemStore, PartitionId,
    PartitionedImage, PersistedSaveExecutor, SlotLease,
};

// Backup/restore adapter exposed:
pub use restore::{
    restore_signal, BackupAdapter, BackupDownloader, BackupUploader,
    ImageBackupAdapter, RestoreCompleter, RestoreEvent, RestoreOutcome,
    RestoreWaiter,
};
