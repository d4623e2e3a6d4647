//! Units of cluster work and their grouping/chaining combinators.

use std::fmt;

use crate::replication::{ChunkId, ReplicaId};

use serde::{Deserialize, Serialize};

/// Correlation tag carried by every task. The task queue tracks outstanding
/// work per tag, which is what the partitioner waits on.
#[derive(
    Debug, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord, Serialize,
    Deserialize,
)]
pub enum TaskTag {
    Replicate,
    ShrinkData,
    PersistedSave,
}

impl TaskTag {
    /// Tags whose outstanding tasks block a new planning cycle.
    pub const TRACKED: [TaskTag; 3] =
        [TaskTag::Replicate, TaskTag::ShrinkData, TaskTag::PersistedSave];
}

impl fmt::Display for TaskTag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// A unit of work to be executed by the task queue.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub enum Task {
    /// Copy one chunk from a replica holding it onto another replica.
    ReplicateChunk {
        chunk: ChunkId,
        from: ReplicaId,
        to: ReplicaId,
    },

    /// Remove one chunk copy from a replica.
    ShrinkData { chunk: ChunkId, replica: ReplicaId },

    /// Periodic durability checkpoint of the local partition image.
    PersistedSave,

    /// Members run concurrently with independent outcomes.
    Grouped(GroupedTask),

    /// Stages run strictly one after another.
    Chained(ChainedTask),
}

impl Task {
    /// Correlation tag of this task.
    pub fn tag(&self) -> TaskTag {
        match self {
            Task::ReplicateChunk { .. } => TaskTag::Replicate,
            Task::ShrinkData { .. } => TaskTag::ShrinkData,
            Task::PersistedSave => TaskTag::PersistedSave,
            Task::Grouped(group) => group.tag,
            Task::Chained(chain) => chain.tag,
        }
    }

    /// True if this task is not a combinator.
    pub fn is_leaf(&self) -> bool {
        !matches!(self, Task::Grouped(_) | Task::Chained(_))
    }

    /// Number of leaf tasks contained (1 for a leaf itself).
    pub fn num_leaves(&self) -> usize {
        match self {
            Task::Grouped(group) => {
                group.members.iter().map(Task::num_leaves).sum()
            }
            Task::Chained(chain) => {
                chain.stages.iter().map(Task::num_leaves).sum()
            }
            _ => 1,
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Task::ReplicateChunk { chunk, from, to } => {
                write!(f, "replicate chunk {} from {} to {}", chunk, from, to)
            }
            Task::ShrinkData { chunk, replica } => {
                write!(f, "shrink chunk {} on {}", chunk, replica)
            }
            Task::PersistedSave => write!(f, "persisted save"),
            Task::Grouped(group) => {
                write!(f, "group<{}> of {}", group.tag, group.members.len())
            }
            Task::Chained(chain) => {
                write!(f, "chain<{}> of {} stages", chain.tag, chain.stages.len())
            }
        }
    }
}

/// An unordered set of tasks sharing one correlation tag.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct GroupedTask {
    tag: TaskTag,
    members: Vec<Task>,
}

impl GroupedTask {
    pub fn new(members: Vec<Task>, tag: TaskTag) -> Self {
        GroupedTask { tag, members }
    }

    pub fn members(&self) -> &[Task] {
        &self.members
    }

    pub fn into_members(self) -> Vec<Task> {
        self.members
    }
}

/// An ordered sequence of stages; stage n+1 is dispatched only after every
/// member of stage n has finished, successfully or not.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct ChainedTask {
    tag: TaskTag,
    stages: Vec<Task>,
}

impl ChainedTask {
    pub fn new(stages: Vec<Task>, tag: TaskTag) -> Self {
        ChainedTask { tag, stages }
    }

    pub fn stages(&self) -> &[Task] {
        &self.stages
    }

    pub fn into_stages(self) -> Vec<Task> {
        self.stages
    }
}

/// Assembles a planner's output into a replicate-then-shrink chain tagged as
/// replication work. Replicate tasks form the first stage and shrink tasks
/// the second; an empty kind contributes no stage. Returns `None` if the plan
/// holds neither kind. Other task kinds in the plan are ignored.
pub fn build_chain(plan: Vec<Task>) -> Option<ChainedTask> {
    let (rep_tasks, shr_tasks): (Vec<Task>, Vec<Task>) = plan
        .into_iter()
        .filter(|t| {
            matches!(t, Task::ReplicateChunk { .. } | Task::ShrinkData { .. })
        })
        .partition(|t| matches!(t, Task::ReplicateChunk { .. }));

    let mut stages = Vec::with_capacity(2);
    if !rep_tasks.is_empty() {
        stages.push(Task::Grouped(GroupedTask::new(
            rep_tasks,
            TaskTag::Replicate,
        )));
    }
    if !shr_tasks.is_empty() {
        stages.push(Task::Grouped(GroupedTask::new(
            shr_tasks,
            TaskTag::ShrinkData,
        )));
    }

    if stages.is_empty() {
        None
    } else {
        Some(ChainedTask::new(stages, TaskTag::Replicate))
    }
}
