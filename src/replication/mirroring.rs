//! Replication planner: mirroring.
//!
//! A mirror set of `min_replicas` replicas, those already holding the most
//! chunks, is grown into full copies of the partition. Mirrors are never
//! shrunk.

use std::cmp::{self, Reverse};

use crate::replication::{Census, ReplicaChunkSet, ReplicationPlanner};
use crate::tasks::Task;
use crate::utils::KeeperError;

/// Mirroring planner.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct MirroringPlanner;

impl ReplicationPlanner for MirroringPlanner {
    fn plan(
        &self,
        min_replicas: usize,
        inventory: &[ReplicaChunkSet],
    ) -> Result<Vec<Task>, KeeperError> {
        let census = Census::build(min_replicas, inventory)?;
        let target = cmp::min(min_replicas, census.replicas().len());

        // mirror set first, then everybody else in the same order
        let mut preference = census.replicas().to_vec();
        preference.sort_by_key(|&r| (Reverse(census.num_held(r)), r));

        let mut tasks = vec![];
        for (chunk, holders) in census.chunks() {
            let from = match Census::source_of(holders) {
                Some(from) => from,
                None => continue,
            };
            let mut copies = holders.len();
            for &to in &preference {
                if copies >= target {
                    break;
                }
                if !holders.contains(&to) {
                    tasks.push(Task::ReplicateChunk { chunk, from, to });
                    copies += 1;
                }
            }
        }

        Ok(tasks)
    }
}
