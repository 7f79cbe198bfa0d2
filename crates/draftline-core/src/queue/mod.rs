pub mod executors;

pub use executors::{
    AiRequestExecutor, DataSyncExecutor, ExecutorContext, ExecutorFuture, ExecutorResult,
    ExportExecutor, FileUploadExecutor, SharedModeConfig, TaskExecutor, default_executors,
};

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;

use crate::models::{
    CoreError, CoreErrorKind, DEFAULT_MAX_RETRIES, SyncStatus, Task, TaskId, TaskKind, TaskStatus,
};
use crate::monitor::ServiceMonitor;
use crate::persistence::store::unix_now;
use crate::persistence::{DurableStore, Namespace};

pub type QueueResult<T> = Result<T, CoreError>;

const QUEUE_TASKS_KEY: &str = "tasks";
const LAST_SYNC_KEY: &str = "last_sync";

/// Retry delays stop growing past this point.
const MAX_BACKOFF_SECS: i64 = 3600;

#[derive(Clone, Copy, Debug)]
pub struct QueueConfig {
    pub default_max_retries: u32,
    /// Base of the exponential retry backoff (`base * 2^(retry-1)`).
    pub retry_base_delay: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            default_max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay: Duration::from_secs(1),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct DrainSummary {
    pub attempted: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Durable queue of deferred work. The full task list is hydrated from the
/// store at construction and written back after every mutation; durability
/// is favored over write efficiency since queue sizes are bounded by user
/// activity.
#[derive(Clone)]
pub struct TaskQueue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    store: Arc<DurableStore>,
    monitor: ServiceMonitor,
    ctx: ExecutorContext,
    executors: HashMap<TaskKind, Arc<dyn TaskExecutor>>,
    config: QueueConfig,
    tasks: Mutex<Vec<Task>>,
    next_id: AtomicU64,
    draining: AtomicBool,
    auto_sync: AtomicBool,
    last_sync_unix: std::sync::Mutex<Option<i64>>,
}

impl TaskQueue {
    pub async fn new(
        store: Arc<DurableStore>,
        monitor: ServiceMonitor,
        ctx: ExecutorContext,
        executors: Vec<Arc<dyn TaskExecutor>>,
        config: QueueConfig,
    ) -> Self {
        let (mut tasks, last_sync) = hydrate(store.clone()).await;

        // A crash mid-drain leaves the in-flight task stuck in processing;
        // give it back its turn without consuming retry budget.
        for task in &mut tasks {
            if task.status == TaskStatus::Processing {
                task.status = TaskStatus::Pending;
            }
        }

        let next_id = tasks
            .iter()
            .map(|task| task.id.0)
            .max()
            .map(|max| max + 1)
            .unwrap_or(0);

        let executors = executors
            .into_iter()
            .map(|executor| (executor.kind(), executor))
            .collect();

        Self {
            inner: Arc::new(QueueInner {
                store,
                monitor,
                ctx,
                executors,
                config,
                tasks: Mutex::new(tasks),
                next_id: AtomicU64::new(next_id),
                draining: AtomicBool::new(false),
                auto_sync: AtomicBool::new(true),
                last_sync_unix: std::sync::Mutex::new(last_sync),
            }),
        }
    }

    /// Creates a pending task, persists the queue snapshot, and kicks off an
    /// immediate drain when connectivity looks usable.
    pub async fn enqueue(
        &self,
        kind: TaskKind,
        payload: serde_json::Value,
        entity_id: Option<String>,
        max_retries: Option<u32>,
    ) -> QueueResult<TaskId> {
        if !payload.is_object() {
            return Err(CoreError::new(
                CoreErrorKind::Validation,
                "task payload must be a JSON object",
            )
            .with_task(kind));
        }

        let id = TaskId(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
        let task = Task {
            id,
            kind,
            payload,
            entity_id,
            status: TaskStatus::Pending,
            created_at_unix: unix_now(),
            completed_at_unix: None,
            error: None,
            retry_count: 0,
            max_retries: max_retries.unwrap_or(self.inner.config.default_max_retries),
            not_before_unix: 0,
        };

        {
            let mut tasks = self.inner.tasks.lock().await;
            tasks.push(task);
            self.persist_tasks(snapshot_json(&tasks)).await;
        }

        if self.inner.monitor.current().online {
            let queue = self.clone();
            tokio::spawn(async move {
                let _ = queue.drain().await;
            });
        }

        Ok(id)
    }

    /// One pass over all eligible tasks. Reentrant-safe: overlapping calls
    /// from the timer, the online-transition watcher, and manual sync
    /// collapse into a single in-flight drain.
    pub async fn drain(&self) -> QueueResult<DrainSummary> {
        if self.inner.draining.swap(true, Ordering::SeqCst) {
            return Ok(DrainSummary::default());
        }

        let summary = self.drain_pass().await;
        self.inner.draining.store(false, Ordering::SeqCst);
        summary
    }

    async fn drain_pass(&self) -> QueueResult<DrainSummary> {
        let now = unix_now();
        let eligible: Vec<TaskId> = {
            let tasks = self.inner.tasks.lock().await;
            tasks
                .iter()
                .filter(|task| is_eligible(task, now))
                .map(|task| task.id)
                .collect()
        };

        // An empty pass performs no persisted writes.
        let mut summary = DrainSummary::default();
        if eligible.is_empty() {
            return Ok(summary);
        }

        for id in eligible {
            self.process_one(id, now, &mut summary).await;
        }

        // Completed tasks stay visible (with their completion time) while the
        // pass runs, then drop out of the in-memory list here. Persisted
        // snapshots never contain them.
        {
            let mut tasks = self.inner.tasks.lock().await;
            tasks.retain(|task| task.status != TaskStatus::Completed);
        }

        tracing::debug!(
            attempted = summary.attempted,
            completed = summary.completed,
            failed = summary.failed,
            "drain pass finished"
        );
        Ok(summary)
    }

    async fn process_one(&self, id: TaskId, pass_started_unix: i64, summary: &mut DrainSummary) {
        let task = {
            let mut tasks = self.inner.tasks.lock().await;
            let Some(task) = tasks.iter_mut().find(|task| task.id == id) else {
                // Removed since the pass started (clear-failed etc.).
                return;
            };
            if !is_eligible(task, pass_started_unix) {
                return;
            }
            task.status = TaskStatus::Processing;
            let claimed = task.clone();
            self.persist_tasks(snapshot_json(&tasks)).await;
            claimed
        };
        summary.attempted += 1;

        let outcome = self.run_executor(&task).await;

        {
            let mut tasks = self.inner.tasks.lock().await;
            let Some(position) = tasks.iter().position(|task| task.id == id) else {
                return;
            };

            match outcome {
                Ok(()) => {
                    let task = &mut tasks[position];
                    task.status = TaskStatus::Completed;
                    task.completed_at_unix = Some(unix_now());
                    task.error = None;
                    summary.completed += 1;
                    tracing::debug!(task_id = id.0, kind = task.kind.as_str(), "task completed");
                }
                Err(error) => {
                    let task = &mut tasks[position];
                    task.retry_count += 1;
                    if task.retry_count >= task.max_retries {
                        task.status = TaskStatus::Failed;
                        task.error = Some(
                            CoreError::new(
                                CoreErrorKind::RetryExhausted,
                                format!(
                                    "retry budget exhausted after {} attempts: {}",
                                    task.retry_count, error.message
                                ),
                            )
                            .with_task(task.kind)
                            .to_string(),
                        );
                        summary.failed += 1;
                        tracing::warn!(
                            task_id = id.0,
                            kind = task.kind.as_str(),
                            retry_count = task.retry_count,
                            error = %error.message,
                            "task failed after exhausting retries"
                        );
                    } else {
                        task.status = TaskStatus::Pending;
                        task.error = Some(error.to_string());
                        task.not_before_unix =
                            unix_now() + backoff_secs(&self.inner.config, task.retry_count);
                    }
                }
            }

            self.persist_tasks(snapshot_json(&tasks)).await;
        }
    }

    async fn run_executor(&self, task: &Task) -> ExecutorResult {
        let Some(executor) = self.inner.executors.get(&task.kind) else {
            return Err(CoreError::new(
                CoreErrorKind::Validation,
                format!("no executor registered for kind '{}'", task.kind.as_str()),
            )
            .with_task(task.kind));
        };

        // Spawned so a panicking executor is contained as a join failure
        // instead of aborting the whole drain.
        let future = executor.execute(task, &self.inner.ctx);
        match tokio::spawn(future).await {
            Ok(result) => result,
            Err(join_error) => Err(CoreError::new(
                CoreErrorKind::Internal,
                format!("task execution join failure: {join_error}"),
            )
            .with_task(task.kind)),
        }
    }

    /// Drain on demand, recording the sync timestamp on completion.
    pub async fn manual_sync(&self) -> QueueResult<DrainSummary> {
        let summary = self.drain().await?;

        let now = unix_now();
        if let Ok(mut last_sync) = self.inner.last_sync_unix.lock() {
            *last_sync = Some(now);
        }
        let store = self.inner.store.clone();
        let persisted = tokio::task::spawn_blocking(move || {
            store.put(Namespace::Queue, LAST_SYNC_KEY, &now.to_string())
        })
        .await;
        if let Ok(Err(error)) = persisted {
            tracing::warn!(kind = ?error.kind, error = %error.message, "failed to persist last sync time");
        }

        Ok(summary)
    }

    /// Puts every failed task back in the pending pool with a fresh retry
    /// budget, then drains if connectivity allows.
    pub async fn retry_failed(&self) -> QueueResult<usize> {
        let reset = {
            let mut tasks = self.inner.tasks.lock().await;
            let mut reset = 0;
            for task in tasks.iter_mut() {
                if task.status == TaskStatus::Failed {
                    task.status = TaskStatus::Pending;
                    task.retry_count = 0;
                    task.error = None;
                    task.not_before_unix = 0;
                    reset += 1;
                }
            }
            if reset > 0 {
                self.persist_tasks(snapshot_json(&tasks)).await;
            }
            reset
        };

        if reset > 0 && self.inner.monitor.current().online {
            let queue = self.clone();
            tokio::spawn(async move {
                let _ = queue.drain().await;
            });
        }

        Ok(reset)
    }

    pub async fn clear_failed(&self) -> QueueResult<usize> {
        let removed = {
            let mut tasks = self.inner.tasks.lock().await;
            let before = tasks.len();
            tasks.retain(|task| task.status != TaskStatus::Failed);
            let removed = before - tasks.len();
            if removed > 0 {
                self.persist_tasks(snapshot_json(&tasks)).await;
            }
            removed
        };
        Ok(removed)
    }

    pub async fn sync_status(&self) -> SyncStatus {
        let tasks = self.inner.tasks.lock().await;
        let pending_count = tasks
            .iter()
            .filter(|task| task.status == TaskStatus::Pending)
            .count();
        let failed_count = tasks
            .iter()
            .filter(|task| task.status == TaskStatus::Failed)
            .count();
        let last_sync_unix = self
            .inner
            .last_sync_unix
            .lock()
            .map(|last_sync| *last_sync)
            .unwrap_or(None);

        SyncStatus {
            pending_count,
            failed_count,
            last_sync_unix,
            auto_sync_enabled: self.inner.auto_sync.load(Ordering::SeqCst),
        }
    }

    pub async fn tasks(&self) -> Vec<Task> {
        self.inner.tasks.lock().await.clone()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.tasks.lock().await.is_empty()
    }

    pub fn set_auto_sync(&self, enabled: bool) {
        self.inner.auto_sync.store(enabled, Ordering::SeqCst);
    }

    pub fn auto_sync_enabled(&self) -> bool {
        self.inner.auto_sync.load(Ordering::SeqCst)
    }

    /// Teardown flush; also the recovery path after degraded in-memory
    /// operation.
    pub async fn persist_now(&self) {
        let tasks = self.inner.tasks.lock().await;
        self.persist_tasks(snapshot_json(&tasks)).await;
    }

    /// Callers hold the task lock across this await, so snapshots reach the
    /// store in the same order the mutations happened.
    async fn persist_tasks(&self, snapshot: Option<String>) {
        let Some(snapshot) = snapshot else {
            return;
        };
        let store = self.inner.store.clone();
        let result = tokio::task::spawn_blocking(move || {
            store.put(Namespace::Queue, QUEUE_TASKS_KEY, &snapshot)
        })
        .await;

        match result {
            Ok(Ok(())) => {}
            Ok(Err(error)) => {
                tracing::warn!(
                    kind = ?error.kind,
                    error = %error.message,
                    "queue persistence failed; continuing in memory"
                );
            }
            Err(join_error) => {
                tracing::warn!(%join_error, "queue persistence join failure");
            }
        }
    }
}

async fn hydrate(store: Arc<DurableStore>) -> (Vec<Task>, Option<i64>) {
    let loaded = tokio::task::spawn_blocking(move || {
        let tasks = store.get(Namespace::Queue, QUEUE_TASKS_KEY);
        let last_sync = store.get(Namespace::Queue, LAST_SYNC_KEY);
        (tasks, last_sync)
    })
    .await;

    let Ok((tasks_raw, last_sync_raw)) = loaded else {
        tracing::warn!("queue hydration join failure; starting empty");
        return (Vec::new(), None);
    };

    let tasks = match tasks_raw {
        Ok(Some(raw)) => match serde_json::from_str::<Vec<Task>>(&raw) {
            Ok(tasks) => tasks,
            Err(error) => {
                tracing::warn!(%error, "persisted queue snapshot is unreadable; starting empty");
                Vec::new()
            }
        },
        Ok(None) => Vec::new(),
        Err(error) => {
            tracing::warn!(kind = ?error.kind, error = %error.message, "queue hydration failed; starting empty");
            Vec::new()
        }
    };

    let last_sync = match last_sync_raw {
        Ok(Some(raw)) => raw.parse::<i64>().ok(),
        _ => None,
    };

    (tasks, last_sync)
}

fn is_eligible(task: &Task, now_unix: i64) -> bool {
    let runnable = task.status == TaskStatus::Pending
        || (task.status == TaskStatus::Failed && task.retry_budget_left());
    runnable && task.not_before_unix <= now_unix
}

fn backoff_secs(config: &QueueConfig, retry_count: u32) -> i64 {
    let base = config.retry_base_delay.as_secs() as i64;
    let exponent = retry_count.saturating_sub(1).min(10);
    (base << exponent).min(MAX_BACKOFF_SECS)
}

/// Serialized queue snapshot; completed tasks are pruned here.
fn snapshot_json(tasks: &[Task]) -> Option<String> {
    let retained: Vec<&Task> = tasks
        .iter()
        .filter(|task| task.status != TaskStatus::Completed)
        .collect();
    match serde_json::to_string(&retained) {
        Ok(snapshot) => Some(snapshot),
        Err(error) => {
            tracing::error!(%error, "failed to serialize queue snapshot");
            None
        }
    }
}
