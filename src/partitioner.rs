//! Partitioner: leader-only replication control loop.
//!
//! Wakes periodically, and if this node leads its partition, no tracked
//! task is outstanding, and enough replicas are ready, asks the configured
//! planner for a plan and posts it to the task queue as a replicate-then-shrink
//! chain.

use std::fmt;
use std::sync::Arc;

use crate::cluster::{ClusterIndex, NameService};
use crate::replication::{ReplicationMode, ReplicationPlanner};
use crate::tasks::{build_chain, Task, TaskQueue, TaskTag};
use crate::utils::KeeperError;

use futures::future::try_join_all;

use serde::Deserialize;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, MissedTickBehavior};

/// Configuration parameters struct.
#[derive(Debug, Clone, Deserialize)]
pub struct PartitionerConfig {
    /// Replication strategy in use for the whole deployment.
    pub replication_mode: ReplicationMode,

    /// Minimum number of copies every chunk should have.
    pub min_replicas: usize,

    /// Wake interval of the control loop in millisecs.
    pub interval_ms: u64,
}

#[allow(clippy::derivable_impls)]
impl Default for PartitionerConfig {
    fn default() -> Self {
        PartitionerConfig {
            replication_mode: ReplicationMode::Mirroring,
            min_replicas: 2,
            interval_ms: 10000,
        }
    }
}

/// Classification of a wake cycle. Dormant is not persisted anywhere; it is
/// re-derived on every wake.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum PartitionerState {
    Dormant,
    Planning,
}

/// Outcome of one control loop iteration.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum IterOutcome {
    /// This node does not lead its partition.
    NotLeader,

    /// Fewer than `needed` replicas hold any chunk.
    AwaitingReplicas { ready: usize, needed: usize },

    /// The plan was empty; nothing was posted.
    NothingToDo,

    /// A chain was posted to the task queue.
    Posted {
        stages: usize,
        replicates: usize,
        shrinks: usize,
    },
}

impl IterOutcome {
    pub fn state(&self) -> PartitionerState {
        match self {
            IterOutcome::NotLeader | IterOutcome::AwaitingReplicas { .. } => {
                PartitionerState::Dormant
            }
            IterOutcome::NothingToDo | IterOutcome::Posted { .. } => {
                PartitionerState::Planning
            }
        }
    }
}

impl fmt::Display for IterOutcome {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            IterOutcome::NotLeader => write!(f, "not leader"),
            IterOutcome::AwaitingReplicas { ready, needed } => {
                write!(f, "awaiting replicas {}/{}", ready, needed)
            }
            IterOutcome::NothingToDo => write!(f, "nothing to do"),
            IterOutcome::Posted {
                stages,
                replicates,
                shrinks,
            } => write!(
                f,
                "posted {}-stage chain: {} replicates, {} shrinks",
                stages, replicates, shrinks
            ),
        }
    }
}

/// Decision core of the partitioner, shared with its daemon task.
pub struct PartitionerCore {
    /// Minimum number of copies every chunk should have.
    min_replicas: usize,

    /// Planner selected by the replication mode.
    planner: Box<dyn ReplicationPlanner>,

    /// Cluster index for replica inventory.
    idx: Arc<dyn ClusterIndex>,

    /// Name service for leadership status.
    namesvc: Arc<dyn NameService>,

    /// Task queue plans are posted to.
    taskqueue: Arc<dyn TaskQueue>,
}

impl PartitionerCore {
    pub fn new(
        replication_mode: ReplicationMode,
        min_replicas: usize,
        idx: Arc<dyn ClusterIndex>,
        namesvc: Arc<dyn NameService>,
        taskqueue: Arc<dyn TaskQueue>,
    ) -> Result<Self, KeeperError> {
        if min_replicas == 0 {
            return logged_err!("invalid min_replicas {}", min_replicas);
        }

        Ok(PartitionerCore {
            min_replicas,
            planner: replication_mode.new_planner(),
            idx,
            namesvc,
            taskqueue,
        })
    }

    /// Runs one wake cycle of the control loop.
    pub async fn run_iteration(&self) -> Result<IterOutcome, KeeperError> {
        if !self.namesvc.is_leader() {
            return Ok(IterOutcome::NotLeader);
        }

        // never interleave two plans against the same chunks
        try_join_all(
            TaskTag::TRACKED
                .iter()
                .map(|&tag| self.taskqueue.wait(tag)),
        )
        .await?;

        let replica_chunks = self.idx.local_partition_replica_chunks().await?;
        let ready = replica_chunks
            .iter()
            .filter(|e| !e.chunks.is_empty())
            .count();
        if ready < self.min_replicas {
            pf_info!(
                "waiting for {} ready replicas to conduct partitioning, have {}",
                self.min_replicas,
                ready
            );
            return Ok(IterOutcome::AwaitingReplicas {
                ready,
                needed: self.min_replicas,
            });
        }

        // a failed plan aborts this cycle before anything is posted
        let plan = self.planner.plan(self.min_replicas, &replica_chunks)?;
        let replicates = plan
            .iter()
            .filter(|t| t.tag() == TaskTag::Replicate)
            .count();
        let shrinks = plan
            .iter()
            .filter(|t| t.tag() == TaskTag::ShrinkData)
            .count();

        let chain = match build_chain(plan) {
            Some(chain) => chain,
            None => return Ok(IterOutcome::NothingToDo),
        };
        let stages = chain.stages().len();
        self.taskqueue.post_task(Task::Chained(chain)).await?;

        // TODO: balance chunk load across replicas once a placement policy
        //       beyond redundancy targets is defined
        Ok(IterOutcome::Posted {
            stages,
            replicates,
            shrinks,
        })
    }
}

/// The partitioner daemon module.
pub struct Partitioner {
    /// Shared decision core.
    core: Arc<PartitionerCore>,

    /// Join handle of the partitioner daemon thread.
    partitioner_handle: JoinHandle<()>,
}

impl Partitioner {
    /// Creates a new partitioner and spawns its daemon thread. The daemon
    /// stops scheduling wake cycles once `rx_term` changes or its sender is
    /// dropped.
    pub fn new_and_setup(
        config_str: Option<&str>,
        idx: Arc<dyn ClusterIndex>,
        namesvc: Arc<dyn NameService>,
        taskqueue: Arc<dyn TaskQueue>,
        rx_term: watch::Receiver<bool>,
    ) -> Result<Self, KeeperError> {
        let config = parsed_config!(config_str => PartitionerConfig;
                                    replication_mode, min_replicas,
                                    interval_ms)?;
        if config.interval_ms == 0 {
            return logged_err!(
                "invalid config.interval_ms '{}'",
                config.interval_ms
            );
        }
        pf_info!(
            "initializing partitioner: mode {} min_replicas {}",
            config.replication_mode,
            config.min_replicas
        );

        let core = Arc::new(PartitionerCore::new(
            config.replication_mode,
            config.min_replicas,
            idx,
            namesvc,
            taskqueue,
        )?);

        let partitioner_handle = tokio::spawn(Self::partitioner_thread(
            core.clone(),
            Duration::from_millis(config.interval_ms),
            rx_term,
        ));

        Ok(Partitioner {
            core,
            partitioner_handle,
        })
    }

    /// Shared decision core, e.g. for triggering an out-of-band cycle.
    pub fn core(&self) -> &Arc<PartitionerCore> {
        &self.core
    }

    /// Waits for the daemon to exit. An iteration in flight when termination
    /// was signalled is allowed to finish first.
    pub async fn join(self) -> Result<(), KeeperError> {
        self.partitioner_handle.await?;
        Ok(())
    }

    /// Partitioner daemon thread function.
    async fn partitioner_thread(
        core: Arc<PartitionerCore>,
        interval: Duration,
        mut rx_term: watch::Receiver<bool>,
    ) {
        pf_debug!("partitioner thread spawned");

        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let terminated = *rx_term.borrow();
        if !terminated {
            loop {
                tokio::select! {
                    biased;

                    // termination signal, or its sender gone
                    _ = rx_term.changed() => {
                        pf_warn!("partitioner caught termination signal");
                        break;
                    },

                    // wake cycle; runs to completion before the next select
                    _ = ticker.tick() => {
                        match core.run_iteration().await {
                            Ok(outcome) => {
                                pf_debug!("partitioner cycle: {}", outcome);
                            }
                            Err(e) => {
                                pf_error!("error in partitioner cycle: {}", e);
                            }
                        }
                    },
                }
            }
        }

        pf_debug!("partitioner thread exitted");
    }
}
