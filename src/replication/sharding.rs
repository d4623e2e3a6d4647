//! Replication planners: sharding and mirrored sharding.
//!
//! Replicas, sorted by ID, are dealt round-robin into shards; chunk `c` is
//! owned by shard `c mod num_shards`. Each shard keeps up to
//! `min(min_replicas, shard size)` copies of its own chunks, and every copy
//! found outside the owning shard is shrunk once those copies exist.
//!
//! Redundancy is counted within the owning shard only. Under plain sharding
//! every shard is one replica, so a chunk ends up with exactly one copy no
//! matter how many foreign copies it had.

use std::cmp;

use crate::replication::{
    Census, ChunkId, ReplicaChunkSet, ReplicaId, ReplicationPlanner,
};
use crate::tasks::Task;
use crate::utils::KeeperError;

/// Assignment of replicas to shards.
#[derive(Debug, PartialEq, Eq)]
struct ShardLayout {
    shards: Vec<Vec<ReplicaId>>,
}

impl ShardLayout {
    /// Deals sorted replicas round-robin into `num_shards` shards.
    fn new(replicas: &[ReplicaId], num_shards: usize) -> Self {
        let mut shards = vec![vec![]; num_shards];
        for (i, &r) in replicas.iter().enumerate() {
            shards[i % num_shards].push(r);
        }
        ShardLayout { shards }
    }

    #[inline]
    fn owner_of(&self, chunk: ChunkId) -> &[ReplicaId] {
        &self.shards[(chunk % self.shards.len() as u64) as usize]
    }
}

/// Plans in-shard replication and shard-foreign shrinking over given layout.
fn plan_sharded(
    census: &Census,
    layout: &ShardLayout,
    min_replicas: usize,
) -> Vec<Task> {
    let mut replicates = vec![];
    let mut shrinks = vec![];

    for (chunk, holders) in census.chunks() {
        let from = match Census::source_of(holders) {
            Some(from) => from,
            None => continue,
        };
        let shard = layout.owner_of(chunk);
        let target = cmp::min(min_replicas, shard.len());

        let mut in_shard = shard.iter().filter(|&&r| holders.contains(&r)).count();
        for &to in shard {
            if in_shard >= target {
                break;
            }
            if !holders.contains(&to) {
                replicates.push(Task::ReplicateChunk { chunk, from, to });
                in_shard += 1;
            }
        }

        // in_shard >= target >= 1 at this point, so foreign copies can go
        for &replica in holders {
            if !shard.contains(&replica) {
                shrinks.push(Task::ShrinkData { chunk, replica });
            }
        }
    }

    replicates.append(&mut shrinks);
    replicates
}

/// Sharding planner: every replica is a shard of its own.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ShardingPlanner;

impl ReplicationPlanner for ShardingPlanner {
    fn plan(
        &self,
        min_replicas: usize,
        inventory: &[ReplicaChunkSet],
    ) -> Result<Vec<Task>, KeeperError> {
        let census = Census::build(min_replicas, inventory)?;
        if census.replicas().is_empty() {
            return Ok(vec![]);
        }

        let layout = ShardLayout::new(census.replicas(), census.replicas().len());
        Ok(plan_sharded(&census, &layout, min_replicas))
    }
}

/// Mirrored sharding planner: shards of `min_replicas` replicas each, every
/// shard mirroring its own chunks.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct MirrorShardingPlanner;

impl ReplicationPlanner for MirrorShardingPlanner {
    fn plan(
        &self,
        min_replicas: usize,
        inventory: &[ReplicaChunkSet],
    ) -> Result<Vec<Task>, KeeperError> {
        let census = Census::build(min_replicas, inventory)?;
        if census.replicas().is_empty() {
            return Ok(vec![]);
        }

        let num_shards = cmp::max(1, census.replicas().len() / min_replicas);
        let layout = ShardLayout::new(census.replicas(), num_shards);
        Ok(plan_sharded(&census, &layout, min_replicas))
    }
}

#[cfg(test)]
mod sharding_tests {
    use super::*;
    use crate::replication::replication_tests::{
        apply_plan, copies_of, random_inventory,
    };

    use std::collections::BTreeMap;

    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn layout_round_robin() {
        let layout = ShardLayout::new(&[2, 5, 7, 9, 11], 2);
        assert_eq!(layout.shards, vec![vec![2, 7, 11], vec![5, 9]]);
        assert_eq!(layout.owner_of(4), &[2, 7, 11]);
        assert_eq!(layout.owner_of(3), &[5, 9]);
    }

    #[test]
    fn sharding_moves_to_owner() -> Result<(), KeeperError> {
        // owners: even chunks -> 10, odd chunks -> 20
        let inv = vec![
            ReplicaChunkSet::new(10, [0, 1]),
            ReplicaChunkSet::new(20, [1, 2]),
        ];
        let plan = ShardingPlanner.plan(2, &inv)?;
        assert_eq!(
            plan,
            vec![
                Task::ReplicateChunk {
                    chunk: 2,
                    from: 20,
                    to: 10
                },
                Task::ShrinkData {
                    chunk: 1,
                    replica: 10
                },
                Task::ShrinkData {
                    chunk: 2,
                    replica: 20
                },
            ]
        );
        Ok(())
    }

    #[test]
    fn sharding_trims_to_owner_copy() -> Result<(), KeeperError> {
        // chunk 1 starts with 3 copies, chunk 2 with 2; owners are 0, 1, 2
        let inv = vec![
            ReplicaChunkSet::new(0, [0, 1]),
            ReplicaChunkSet::new(1, [1, 2]),
            ReplicaChunkSet::new(2, [1, 2]),
        ];
        let plan = ShardingPlanner.plan(2, &inv)?;
        assert_eq!(
            plan,
            vec![
                Task::ShrinkData {
                    chunk: 1,
                    replica: 0
                },
                Task::ShrinkData {
                    chunk: 1,
                    replica: 2
                },
                Task::ShrinkData {
                    chunk: 2,
                    replica: 1
                },
            ]
        );

        let after = apply_plan(&inv, &plan);
        for chunk in 0..3 {
            assert_eq!(copies_of(&after, chunk), 1);
        }
        Ok(())
    }

    #[test]
    fn sharding_foreign_copies_shrunk_once() -> Result<(), KeeperError> {
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..100 {
            let inv = random_inventory(&mut rng);
            let min_replicas = rng.gen_range(1..=4);
            let plan = ShardingPlanner.plan(min_replicas, &inv)?;

            let mut replicas: Vec<ReplicaId> = inv.iter().map(|e| e.replica).collect();
            replicas.sort();
            let owner =
                |c: ChunkId| replicas[(c % replicas.len() as u64) as usize];

            let mut shrink_cnts: BTreeMap<(ChunkId, ReplicaId), usize> =
                BTreeMap::new();
            for task in &plan {
                if let Task::ShrinkData { chunk, replica } = task {
                    assert_ne!(owner(*chunk), *replica);
                    *shrink_cnts.entry((*chunk, *replica)).or_insert(0) += 1;
                }
            }
            for entry in &inv {
                for &chunk in &entry.chunks {
                    if owner(chunk) != entry.replica {
                        assert_eq!(shrink_cnts.get(&(chunk, entry.replica)), Some(&1));
                    }
                }
            }

            // afterwards every chunk lives exactly on its owner
            let after = apply_plan(&inv, &plan);
            for (&replica, chunks) in &after {
                for &chunk in chunks {
                    assert_eq!(owner(chunk), replica);
                }
            }
        }
        Ok(())
    }

    #[test]
    fn mirrored_sharding_keeps_shard_mirrors() -> Result<(), KeeperError> {
        // 4 replicas, min 2 -> shards {0, 2} and {1, 3}
        let inv = vec![
            ReplicaChunkSet::new(0, [4]),
            ReplicaChunkSet::new(1, [4, 5]),
            ReplicaChunkSet::new(2, []),
            ReplicaChunkSet::new(3, [5]),
        ];
        let plan = MirrorShardingPlanner.plan(2, &inv)?;
        assert_eq!(
            plan,
            vec![
                Task::ReplicateChunk {
                    chunk: 4,
                    from: 0,
                    to: 2
                },
                Task::ShrinkData {
                    chunk: 4,
                    replica: 1
                },
            ]
        );
        Ok(())
    }

    #[test]
    fn mirrored_sharding_meets_in_shard_target() -> Result<(), KeeperError> {
        let mut rng = StdRng::seed_from_u64(13);
        for _ in 0..100 {
            let inv = random_inventory(&mut rng);
            let min_replicas = rng.gen_range(1..=3);
            let plan = MirrorShardingPlanner.plan(min_replicas, &inv)?;

            let mut replicas: Vec<ReplicaId> = inv.iter().map(|e| e.replica).collect();
            replicas.sort();
            let layout = ShardLayout::new(
                &replicas,
                cmp::max(1, replicas.len() / min_replicas),
            );

            let after = apply_plan(&inv, &plan);
            for entry in &inv {
                for &chunk in &entry.chunks {
                    let shard = layout.owner_of(chunk);
                    let holders: Vec<ReplicaId> = after
                        .iter()
                        .filter(|(_, chunks)| chunks.contains(&chunk))
                        .map(|(&r, _)| r)
                        .collect();
                    assert!(holders.iter().all(|r| shard.contains(r)));
                    assert!(holders.len() >= cmp::min(min_replicas, shard.len()));
                }
            }
        }
        Ok(())
    }
}
