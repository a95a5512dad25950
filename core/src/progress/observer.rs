use async_trait::async_trait;

use super::snapshot::TaskSnapshot;
use crate::error::DownloadError;
use crate::model::TaskState;

/// Trait for anything that wants to observe a task's download progress.
///
/// - `on_progress` is called after every speed-monitor tick and segment
///   state transition.
/// - `on_complete` is called exactly once, when the task reaches
///   `TaskState::Completed`.
/// - `on_error` is called exactly once, when the task reaches
///   `TaskState::Failed`; no further `on_progress` calls follow.
/// - `on_state_changed` is called once per state transition, including
///   terminal ones — `on_complete`/`on_error` are narrower callbacks for
///   the `Completed`/`Failed` cases specifically.
#[async_trait]
pub trait ProgressObserver: Send + Sync + 'static {
    async fn on_progress(&self, snapshot: &TaskSnapshot);
    async fn on_complete(&self, snapshot: &TaskSnapshot);
    async fn on_error(&self, task_id: &str, error: &DownloadError);
    async fn on_state_changed(&self, task_id: &str, state: TaskState);
}

/// Trait for observing the Task Scheduler's aggregate queue state, as
/// opposed to `ProgressObserver` which watches a single task.
#[async_trait]
pub trait SchedulerObserver: Send + Sync + 'static {
    /// Fired whenever any task's progress snapshot changes.
    async fn on_task_queue_progress_changed(&self, snapshot: &TaskSnapshot);
    /// Fired when the in-flight task set empties after at least one
    /// completion since the last time it emptied.
    async fn on_tasks_progress_completed(&self);
}
