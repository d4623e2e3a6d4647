//! Task queue interface and an in-process implementation.

use std::collections::HashMap;
use std::sync::Arc;

use crate::tasks::{Task, TaskTag};
use crate::utils::KeeperError;

use async_trait::async_trait;

use futures::future::{join_all, BoxFuture, FutureExt};

use tokio::sync::{watch, Mutex};

/// Task queue the partitioner posts its plans to.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Resolves once no task carrying `tag` is outstanding.
    async fn wait(&self, tag: TaskTag) -> Result<(), KeeperError>;

    /// Accepts a task for asynchronous execution. Returns as soon as the task
    /// is queued, not when it finishes.
    async fn post_task(&self, task: Task) -> Result<(), KeeperError>;
}

/// Executor of leaf tasks (everything except grouped and chained tasks).
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, task: &Task) -> Result<(), KeeperError>;
}

/// Per-tag leaf task outcome counters.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub struct TaskStats {
    pub succeeded: u64,
    pub failed: u64,
}

/// Executor dispatching each leaf task by its tag, so that one queue can
/// drive replication work and persisted saves alike.
#[derive(Default)]
pub struct TaskRouter {
    routes: HashMap<TaskTag, Arc<dyn TaskExecutor>>,
}

impl TaskRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Routes leaf tasks tagged `tag` to `executor`, replacing any earlier
    /// route of the same tag.
    pub fn route(mut self, tag: TaskTag, executor: Arc<dyn TaskExecutor>) -> Self {
        self.routes.insert(tag, executor);
        self
    }
}

#[async_trait]
impl TaskExecutor for TaskRouter {
    async fn execute(&self, task: &Task) -> Result<(), KeeperError> {
        match self.routes.get(&task.tag()) {
            Some(executor) => executor.execute(task).await,
            None => logged_err!("no executor routed for task {}", task),
        }
    }
}

type OutstandingMap = HashMap<TaskTag, usize>;

/// Holds one outstanding count of a tag for as long as it is alive.
struct Outstanding {
    tx_outstanding: Arc<watch::Sender<OutstandingMap>>,
    tag: TaskTag,
}

impl Outstanding {
    fn track(
        tx_outstanding: &Arc<watch::Sender<OutstandingMap>>,
        tag: TaskTag,
    ) -> Self {
        tx_outstanding.send_modify(|map| *map.entry(tag).or_insert(0) += 1);
        Outstanding {
            tx_outstanding: tx_outstanding.clone(),
            tag,
        }
    }
}

impl Drop for Outstanding {
    fn drop(&mut self) {
        let tag = self.tag;
        self.tx_outstanding.send_modify(|map| {
            if let Some(cnt) = map.get_mut(&tag) {
                *cnt = cnt.saturating_sub(1);
            }
        });
    }
}

/// State shared between the queue handle and its running tasks.
struct QueueShared {
    executor: Arc<dyn TaskExecutor>,
    tx_outstanding: Arc<watch::Sender<OutstandingMap>>,
    stats: Mutex<HashMap<TaskTag, TaskStats>>,
}

/// In-process task queue. Every posted task runs on its own tokio task;
/// grouped members run concurrently and chained stages sequentially, with
/// leaf tasks handed to the given executor.
///
/// Must be used within the context of a tokio runtime.
pub struct LocalTaskQueue {
    shared: Arc<QueueShared>,
}

impl LocalTaskQueue {
    /// Creates a new local task queue driving leaf tasks through `executor`.
    pub fn new(executor: Arc<dyn TaskExecutor>) -> Self {
        let (tx_outstanding, _) = watch::channel(HashMap::new());
        LocalTaskQueue {
            shared: Arc::new(QueueShared {
                executor,
                tx_outstanding: Arc::new(tx_outstanding),
                stats: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Number of currently outstanding tasks (at any nesting level) tagged
    /// with `tag`.
    pub fn num_outstanding(&self, tag: TaskTag) -> usize {
        self.shared
            .tx_outstanding
            .borrow()
            .get(&tag)
            .copied()
            .unwrap_or(0)
    }

    /// Leaf task outcome counters of given tag so far.
    pub async fn stats(&self, tag: TaskTag) -> TaskStats {
        self.shared
            .stats
            .lock()
            .await
            .get(&tag)
            .copied()
            .unwrap_or_default()
    }

    /// Runs a task to completion, returning true if every leaf succeeded.
    fn run_task(shared: Arc<QueueShared>, task: Task) -> BoxFuture<'static, bool> {
        async move {
            let _outstanding = Outstanding::track(&shared.tx_outstanding, task.tag());

            match task {
                Task::Grouped(group) => {
                    // siblings never cancel each other; every outcome counts
                    let results = join_all(
                        group
                            .into_members()
                            .into_iter()
                            .map(|member| Self::run_task(shared.clone(), member)),
                    )
                    .await;
                    results.into_iter().all(|ok| ok)
                }

                Task::Chained(chain) => {
                    let mut all_ok = true;
                    for (i, stage) in chain.into_stages().into_iter().enumerate() {
                        // a stage finishes only when all of its members have
                        if !Self::run_task(shared.clone(), stage).await {
                            pf_warn!("chain stage {} finished with failures", i);
                            all_ok = false;
                        }
                    }
                    all_ok
                }

                leaf => {
                    let tag = leaf.tag();
                    let result = shared.executor.execute(&leaf).await;
                    let mut stats = shared.stats.lock().await;
                    let entry = stats.entry(tag).or_default();
                    match result {
                        Ok(()) => {
                            pf_trace!("finished task: {}", leaf);
                            entry.succeeded += 1;
                            true
                        }
                        Err(e) => {
                            pf_error!("error executing task '{}': {}", leaf, e);
                            entry.failed += 1;
                            false
                        }
                    }
                }
            }
        }
        .boxed()
    }
}

#[async_trait]
impl TaskQueue for LocalTaskQueue {
    async fn wait(&self, tag: TaskTag) -> Result<(), KeeperError> {
        let mut rx_outstanding = self.shared.tx_outstanding.subscribe();
        rx_outstanding
            .wait_for(|map| map.get(&tag).copied().unwrap_or(0) == 0)
            .await?;
        Ok(())
    }

    async fn post_task(&self, task: Task) -> Result<(), KeeperError> {
        // count the task before returning so that a `wait()` issued right
        // after posting cannot miss it
        let posted = Outstanding::track(&self.shared.tx_outstanding, task.tag());
        pf_debug!("posted task: {} ({} leaves)", task, task.num_leaves());

        let shared = self.shared.clone();
        tokio::spawn(async move {
            Self::run_task(shared, task).await;
            drop(posted);
        });
        Ok(())
    }
}
