//! Task Scheduler: a FIFO waiting queue gated by `max_parallel_tasks`
//! concurrent downloads. Generalizes the server's `AppState`/
//! `ActiveDownload` map (a bare `HashMap` with no capacity limit and no
//! queue — every download started immediately) into a real admission
//! control scheme.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};

use async_trait::async_trait;
use tokio::sync::{Notify, RwLock, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::config::SchedulerConfig;
use crate::context::DownloadContext;
use crate::error::{DownloadError, DownloadResult};
use crate::model::TaskState;
use crate::progress::{ProgressObserver, SchedulerObserver, TaskSnapshot};
use crate::strategy::ProtocolStrategy;
use crate::task::DownloadTask;

/// Owns every task submitted to it and runs the allocator loop that pulls
/// waiting tasks into the `Downloading` slot as capacity frees up. Cheap to
/// clone — share the `Arc<TaskScheduler>` across callers.
pub struct TaskScheduler {
    config: Arc<SchedulerConfig>,
    strategy: Arc<dyn ProtocolStrategy>,
    tasks: RwLock<HashMap<String, Arc<DownloadTask>>>,
    queue: RwLock<VecDeque<String>>,
    semaphore: Arc<Semaphore>,
    wake: Arc<Notify>,
    self_weak: StdMutex<Weak<TaskScheduler>>,
    allocator_running: AtomicBool,
    allocator_stop: StdMutex<CancellationToken>,
    disposed: AtomicBool,
    scheduler_observers: RwLock<Vec<Arc<dyn SchedulerObserver>>>,
    /// Tasks submitted but not yet in a terminal state.
    in_flight: AtomicI64,
    /// At least one task has reached a terminal state since `in_flight`
    /// last emptied — guards against firing `on_tasks_progress_completed`
    /// on a scheduler that has never run anything.
    has_completed: AtomicBool,
}

/// Forwards a single task's events up to the scheduler that owns it: every
/// progress/state change becomes a queue-wide `SchedulerObserver` event.
/// Holds a `Weak` back-reference since the scheduler is the one holding the
/// task (and, through it, this forwarder) — an `Arc` here would cycle.
struct SchedulerForwarder {
    scheduler: Weak<TaskScheduler>,
}

#[async_trait]
impl ProgressObserver for SchedulerForwarder {
    async fn on_progress(&self, snapshot: &TaskSnapshot) {
        if let Some(scheduler) = self.scheduler.upgrade() {
            scheduler.broadcast_queue_progress(snapshot).await;
        }
    }

    async fn on_complete(&self, snapshot: &TaskSnapshot) {
        if let Some(scheduler) = self.scheduler.upgrade() {
            scheduler.broadcast_queue_progress(snapshot).await;
        }
    }

    async fn on_error(&self, _task_id: &str, _error: &DownloadError) {}

    async fn on_state_changed(&self, task_id: &str, state: TaskState) {
        if let Some(scheduler) = self.scheduler.upgrade() {
            scheduler.on_task_state_changed(task_id, state).await;
        }
    }
}

impl TaskScheduler {
    pub fn new(config: SchedulerConfig, strategy: Arc<dyn ProtocolStrategy>) -> Arc<Self> {
        let semaphore = Arc::new(Semaphore::new(config.max_parallel_tasks as usize));
        let scheduler = Arc::new(Self {
            config: Arc::new(config),
            strategy,
            tasks: RwLock::new(HashMap::new()),
            queue: RwLock::new(VecDeque::new()),
            semaphore,
            wake: Arc::new(Notify::new()),
            self_weak: StdMutex::new(Weak::new()),
            allocator_running: AtomicBool::new(false),
            allocator_stop: StdMutex::new(CancellationToken::new()),
            disposed: AtomicBool::new(false),
            scheduler_observers: RwLock::new(Vec::new()),
            in_flight: AtomicI64::new(0),
            has_completed: AtomicBool::new(false),
        });

        *scheduler.self_weak.lock().unwrap() = Arc::downgrade(&scheduler);
        scheduler.start();

        scheduler
    }

    /// Starts (or restarts) the allocator loop. Idempotent — calling it on
    /// an already-running scheduler is a no-op. A scheduler is started by
    /// `new()` automatically; callers only need this after `stop()`.
    pub fn start(self: &Arc<Self>) {
        if self.allocator_running.swap(true, Ordering::SeqCst) {
            return;
        }
        let stop_token = CancellationToken::new();
        *self.allocator_stop.lock().unwrap() = stop_token.clone();

        let allocator = self.clone();
        tokio::spawn(async move { allocator.allocator_loop(stop_token).await });
    }

    /// Halts the allocator loop without touching in-flight or queued tasks:
    /// already-running downloads keep going, queued ones stay queued until
    /// `start()` is called again.
    pub fn stop(&self) {
        if !self.allocator_running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.allocator_stop.lock().unwrap().cancel();
    }

    /// Permanently shuts the scheduler down: stops the allocator, cancels
    /// every non-terminal task, and rejects all further submissions. Not
    /// reversible — build a new `TaskScheduler` to accept work again.
    pub async fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
        self.stop();
        self.queue.write().await.clear();

        let tasks: Vec<Arc<DownloadTask>> = self.tasks.read().await.values().cloned().collect();
        for task in tasks {
            if !matches!(
                task.state().await,
                TaskState::Completed | TaskState::Cancelled | TaskState::Failed
            ) {
                task.cancel().await;
            }
        }
    }

    fn ensure_not_disposed(&self) -> DownloadResult<()> {
        if self.disposed.load(Ordering::SeqCst) {
            Err(DownloadError::SchedulerUnavailable)
        } else {
            Ok(())
        }
    }

    /// Validates and enqueues a new task, returning its id immediately —
    /// the task itself runs once the allocator grants it a slot.
    pub async fn submit(&self, context: DownloadContext) -> DownloadResult<String> {
        self.ensure_not_disposed()?;
        self.strategy.validate_context(&context)?;
        let task = Arc::new(DownloadTask::new(context, self.strategy.clone(), self.config.clone()));
        let id = task.id.clone();

        let forwarder = SchedulerForwarder { scheduler: self.self_weak.lock().unwrap().clone() };
        task.add_observer(Arc::new(forwarder)).await;
        self.in_flight.fetch_add(1, Ordering::SeqCst);

        self.tasks.write().await.insert(id.clone(), task);
        self.queue.write().await.push_back(id.clone());
        self.wake.notify_one();

        Ok(id)
    }

    pub async fn get(&self, id: &str) -> Option<Arc<DownloadTask>> {
        self.tasks.read().await.get(id).cloned()
    }

    /// Returns a snapshot for every task matching `predicate`, current as
    /// of the moment each task is read — not a consistent point-in-time
    /// view across the whole set.
    pub async fn get_tasks<F>(&self, predicate: F) -> Vec<TaskSnapshot>
    where
        F: Fn(&TaskSnapshot) -> bool,
    {
        let tasks: Vec<Arc<DownloadTask>> = self.tasks.read().await.values().cloned().collect();
        let mut out = Vec::new();
        for task in tasks {
            let snapshot = task.snapshot().await;
            if predicate(&snapshot) {
                out.push(snapshot);
            }
        }
        out
    }

    pub async fn add_observer(&self, id: &str, observer: Arc<dyn ProgressObserver>) -> DownloadResult<()> {
        let task = self.get(id).await.ok_or_else(|| DownloadError::TaskNotFound(id.to_string()))?;
        task.add_observer(observer).await;
        Ok(())
    }

    pub async fn add_scheduler_observer(&self, observer: Arc<dyn SchedulerObserver>) {
        self.scheduler_observers.write().await.push(observer);
    }

    async fn broadcast_queue_progress(&self, snapshot: &TaskSnapshot) {
        for observer in self.scheduler_observers.read().await.iter() {
            observer.on_task_queue_progress_changed(snapshot).await;
        }
    }

    async fn on_task_state_changed(&self, task_id: &str, state: TaskState) {
        if let Some(task) = self.get(task_id).await {
            let snapshot = task.snapshot().await;
            self.broadcast_queue_progress(&snapshot).await;
        }

        if !matches!(state, TaskState::Completed | TaskState::Cancelled | TaskState::Failed) {
            return;
        }

        self.has_completed.store(true, Ordering::SeqCst);
        if self.in_flight.fetch_sub(1, Ordering::SeqCst) - 1 == 0 && self.has_completed.swap(false, Ordering::SeqCst)
        {
            for observer in self.scheduler_observers.read().await.iter() {
                observer.on_tasks_progress_completed().await;
            }
        }
    }

    /// Pauses a running task. Returns `TaskAlreadyTerminal` if the task has
    /// already finished, failed, or was cancelled.
    pub async fn pause(&self, id: &str) -> DownloadResult<()> {
        self.ensure_not_disposed()?;
        let task = self.get(id).await.ok_or_else(|| DownloadError::TaskNotFound(id.to_string()))?;
        match task.state().await {
            TaskState::Downloading => {
                task.pause().await;
                Ok(())
            }
            TaskState::Waiting => {
                // Never started — remove it from the queue directly so the
                // allocator doesn't spend a slot on it later.
                self.queue.write().await.retain(|queued| queued != id);
                task.pause().await;
                Ok(())
            }
            _ => Err(DownloadError::TaskAlreadyTerminal),
        }
    }

    /// Re-enqueues a paused task at the back of the FIFO queue.
    pub async fn resume(&self, id: &str) -> DownloadResult<()> {
        self.ensure_not_disposed()?;
        let task = self.get(id).await.ok_or_else(|| DownloadError::TaskNotFound(id.to_string()))?;
        if task.state().await != TaskState::Paused {
            return Err(DownloadError::TaskAlreadyTerminal);
        }
        self.queue.write().await.push_back(id.to_string());
        self.wake.notify_one();
        Ok(())
    }

    /// Cancels a task permanently. Unlike `pause`, a cancelled task cannot
    /// be resumed — the caller must `submit` again to retry.
    pub async fn cancel(&self, id: &str) -> DownloadResult<()> {
        self.ensure_not_disposed()?;
        let task = self.get(id).await.ok_or_else(|| DownloadError::TaskNotFound(id.to_string()))?;
        self.queue.write().await.retain(|queued| queued != id);
        task.cancel().await;
        Ok(())
    }

    async fn allocator_loop(self: Arc<Self>, stop: CancellationToken) {
        loop {
            tokio::select! {
                _ = stop.cancelled() => return,
                _ = self.wake.notified() => self.drain_queue().await,
            }
        }
    }

    /// Pulls waiting tasks off the queue while permits remain, spawning
    /// each as its own background run. Re-queues a popped id without a
    /// free permit and stops — the next `notify_one` (a submit, resume, or
    /// a just-finished task releasing its permit) wakes this loop again.
    async fn drain_queue(&self) {
        loop {
            let permit = match self.semaphore.clone().try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => return,
            };

            let id = match self.queue.write().await.pop_front() {
                Some(id) => id,
                None => return,
            };

            let Some(task) = self.get(&id).await else { continue };
            let wake = self.wake.clone();
            tokio::spawn(async move {
                let _permit = permit;
                if let Err(err) = task.run().await {
                    log::warn!("task {} finished with error: {err}", task.id);
                }
                wake.notify_one();
            });
        }
    }
}
