use std::sync::Arc;

use super::observer::ProgressObserver;
use super::snapshot::TaskSnapshot;
use crate::error::DownloadError;
use crate::model::TaskState;

/// Fans a task's progress out to every registered observer. Unlike the
/// per-chunk aggregator this is descended from, there's no EMA smoothing
/// here — the Speed Monitor already hands over a settled rate per tick, so
/// the notifier only needs to broadcast.
#[derive(Default)]
pub struct ProgressNotifier {
    observers: Vec<Arc<dyn ProgressObserver>>,
}

impl ProgressNotifier {
    pub fn new() -> Self {
        Self { observers: Vec::new() }
    }

    pub fn add_observer(&mut self, observer: Arc<dyn ProgressObserver>) {
        self.observers.push(observer);
    }

    pub async fn notify_progress(&self, snapshot: &TaskSnapshot) {
        for observer in &self.observers {
            observer.on_progress(snapshot).await;
        }
    }

    pub async fn notify_complete(&self, snapshot: &TaskSnapshot) {
        for observer in &self.observers {
            observer.on_complete(snapshot).await;
        }
    }

    pub async fn notify_error(&self, task_id: &str, error: &DownloadError) {
        for observer in &self.observers {
            observer.on_error(task_id, error).await;
        }
    }

    pub async fn notify_state_changed(&self, task_id: &str, state: TaskState) {
        for observer in &self.observers {
            observer.on_state_changed(task_id, state).await;
        }
    }
}
