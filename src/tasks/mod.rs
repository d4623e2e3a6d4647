//! Task model and task queue plumbing.

mod queue;
mod task;

pub use queue::{
    LocalTaskQueue, TaskExecutor, TaskQueue, TaskRouter, TaskStats,
};
pub use task::{build_chain, ChainedTask, GroupedTask, Task, TaskTag};
