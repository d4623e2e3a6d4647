//! Replication planner: unrestricted.
//!
//! No ownership constraint at all: every under-replicated chunk is copied
//! onto the least loaded replicas lacking it. Never shrinks.

use std::cmp;
use std::collections::BTreeMap;

use crate::replication::{Census, ReplicaChunkSet, ReplicationPlanner};
use crate::tasks::Task;
use crate::utils::KeeperError;

/// Unrestricted planner.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct UnrestrictedPlanner;

impl ReplicationPlanner for UnrestrictedPlanner {
    fn plan(
        &self,
        min_replicas: usize,
        inventory: &[ReplicaChunkSet],
    ) -> Result<Vec<Task>, KeeperError> {
        let census = Census::build(min_replicas, inventory)?;
        let target = cmp::min(min_replicas, census.replicas().len());

        // load counts include copies planned so far
        let mut load: BTreeMap<_, _> = census
            .replicas()
            .iter()
            .map(|&r| (r, census.num_held(r)))
            .collect();

        let mut tasks = vec![];
        for (chunk, holders) in census.chunks() {
            let from = match Census::source_of(holders) {
                Some(from) => from,
                None => continue,
            };
            let mut planned = vec![];
            while holders.len() + planned.len() < target {
                let to = load
                    .iter()
                    .filter(|&(&r, _)| !holders.contains(&r) && !planned.contains(&r))
                    .min_by_key(|&(&r, &cnt)| (cnt, r))
                    .map(|(&r, _)| r);
                match to {
                    Some(to) => {
                        if let Some(cnt) = load.get_mut(&to) {
                            *cnt += 1;
                        }
                        planned.push(to);
                        tasks.push(Task::ReplicateChunk { chunk, from, to });
                    }
                    None => break,
                }
            }
        }

        Ok(tasks)
    }
}
