//! Download Task: the state machine that owns one download end to end —
//! probe, plan, spawn workers, monitor speed, reassemble, report progress.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::SchedulerConfig;
use crate::context::DownloadContext;
use crate::error::{DownloadError, DownloadResult};
use crate::manager::{SegmentSpawn, ThreadManager};
use crate::model::{SegmentRange, SegmentState, TaskState};
use crate::planner;
use crate::progress::{ProgressNotifier, SegmentSnapshot, TaskSnapshot};
use crate::strategy::ProtocolStrategy;

/// One download, from submission through reassembly.
///
/// A paused task keeps its plan: each segment remembers how many bytes it
/// had on disk when the pause took effect, so `resume()` only re-fetches
/// the remainder of each unfinished segment instead of restarting the whole
/// download — the same offset arithmetic a single segment already uses to
/// recover from a transient retry, one layer up.
pub struct DownloadTask {
    pub id: String,
    context: Arc<DownloadContext>,
    strategy: Arc<dyn ProtocolStrategy>,
    config: Arc<SchedulerConfig>,
    state: RwLock<TaskState>,
    notifier: RwLock<ProgressNotifier>,
    cancel: RwLock<CancellationToken>,
    plan: RwLock<Option<Plan>>,
    /// Live per-segment byte counters from the generation currently (or
    /// most recently) in flight — kept here, not just inside the
    /// `ThreadManager`, so `snapshot()` can be read from outside `run()`.
    counters: RwLock<HashMap<u32, Arc<AtomicU64>>>,
    /// Last computed transfer rate, for `snapshot()` calls that land
    /// between speed-monitor ticks.
    rate: RwLock<f64>,
}

struct Plan {
    resumable: bool,
    total_bytes: u64,
    segments: Vec<SegmentPlan>,
}

#[derive(Clone)]
struct SegmentPlan {
    range: SegmentRange,
    path: PathBuf,
    base_offset: u64,
    finished: bool,
}

impl DownloadTask {
    pub fn new(context: DownloadContext, strategy: Arc<dyn ProtocolStrategy>, config: Arc<SchedulerConfig>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            context: Arc::new(context),
            strategy,
            config,
            state: RwLock::new(TaskState::Waiting),
            notifier: RwLock::new(ProgressNotifier::new()),
            cancel: RwLock::new(CancellationToken::new()),
            plan: RwLock::new(None),
            counters: RwLock::new(HashMap::new()),
            rate: RwLock::new(0.0),
        }
    }

    pub async fn state(&self) -> TaskState {
        *self.state.read().await
    }

    pub async fn add_observer(&self, observer: Arc<dyn crate::progress::ProgressObserver>) {
        self.notifier.write().await.add_observer(observer);
    }

    pub fn context(&self) -> &DownloadContext {
        &self.context
    }

    /// Runs the task to completion: probe, plan, download, reassemble.
    /// Returns once the task reaches `Completed`, `Cancelled`, or `Failed`.
    pub async fn run(&self) -> DownloadResult<()> {
        let starting_state = self.state().await;
        if !matches!(starting_state, TaskState::Waiting | TaskState::Paused) {
            return Err(DownloadError::TaskAlreadyStarted(self.id.clone()));
        }

        self.strategy.validate_context(&self.context)?;
        // A resumed task's token was cancelled by the preceding `pause()` —
        // it can never un-cancel, so resuming needs a fresh one.
        if starting_state == TaskState::Paused {
            *self.cancel.write().await = CancellationToken::new();
        }
        self.set_state(TaskState::Downloading).await;

        match self.run_inner().await {
            Ok(()) => {
                self.set_state(TaskState::Completed).await;
                let snapshot = self.snapshot().await;
                self.notifier.read().await.notify_complete(&snapshot).await;
                Ok(())
            }
            Err(DownloadError::Cancelled) => {
                // `pause()` already set `Paused` before cancelling the
                // token; only overwrite to `Cancelled` for an actual
                // `cancel()` call.
                if self.state().await != TaskState::Paused {
                    self.set_state(TaskState::Cancelled).await;
                }
                Ok(())
            }
            Err(err) => {
                self.set_state(TaskState::Failed).await;
                self.notifier.read().await.notify_error(&self.id, &err).await;
                Err(err)
            }
        }
    }

    async fn run_inner(&self) -> DownloadResult<()> {
        let is_fresh_start = self.plan.read().await.is_none();
        if is_fresh_start {
            let probe = self.strategy.probe(&self.context).await?;

            // A non-resumable server collapses every request down to a
            // single whole-body segment, regardless of how many were
            // requested; split_ranges clamps a too-small file the same way.
            let requested = if probe.resumable { self.context.max_segments as u32 } else { 1 };
            let ranges = planner::split_ranges(probe.file_size, requested)?;
            let paths = planner::split_paths(ranges.len() as u32, &self.context.target_path)?;
            tokio::fs::write(&self.context.target_path, Vec::<u8>::new()).await?;

            let segments = ranges
                .into_iter()
                .zip(paths)
                .map(|(range, path)| SegmentPlan { range, path, base_offset: 0, finished: false })
                .collect();

            *self.plan.write().await = Some(Plan { resumable: probe.resumable, total_bytes: probe.file_size, segments });
        }

        let (resumable, total_bytes, all_segments) = {
            let plan = self.plan.read().await;
            let plan = plan.as_ref().expect("plan was just set above");
            (plan.resumable, plan.total_bytes, plan.segments.clone())
        };

        let pending: Vec<SegmentSpawn> = all_segments
            .iter()
            .filter(|s| !s.finished)
            .map(|s| SegmentSpawn { range: s.range, path: s.path.clone(), base_offset: s.base_offset })
            .collect();

        let cancel = self.cancel.read().await.clone();
        let mut manager = ThreadManager::new(cancel);
        manager.spawn_all(self.strategy.clone(), self.context.clone(), &pending, resumable, self.config.clone());

        let counters = manager.counters().clone();
        *self.counters.write().await = counters.clone();

        // The notifier lives behind `&self`, so the periodic sampler can't
        // be handed off to `speed::spawn` as an owned task — it runs inline
        // here instead, racing against `manager.join_all()` and getting
        // dropped the moment the workers finish.
        let join_result = {
            let report = async {
                let mut ticker = tokio::time::interval(self.config.speed_sample_interval);
                let mut last_total = 0u64;
                loop {
                    ticker.tick().await;
                    let now = self.total_downloaded(&all_segments, &counters);
                    let elapsed = self.config.speed_sample_interval.as_secs_f64();
                    let bytes_per_sec = if elapsed > 0.0 {
                        (now.saturating_sub(last_total)) as f64 / elapsed
                    } else {
                        0.0
                    };
                    last_total = now;
                    *self.rate.write().await = bytes_per_sec;
                    let snapshot = self.partial_snapshot(&all_segments, &counters, now, total_bytes, bytes_per_sec).await;
                    self.notifier.read().await.notify_progress(&snapshot).await;
                }
            };

            tokio::select! {
                outcomes = manager.join_all() => outcomes,
                _ = report => unreachable!("report loop never returns"),
            }
        };

        let outcomes = join_result?;

        // Merge this generation's outcomes back into the plan: a finished
        // segment is done for good, a cancelled one keeps whatever the
        // worker had written (read off the same counter it was updating)
        // as its new `base_offset` for the next `resume()`.
        let mut any_cancelled = false;
        {
            let mut plan_guard = self.plan.write().await;
            let plan = plan_guard.as_mut().expect("plan was just set above");
            for outcome in &outcomes {
                if let Some(segment) = plan.segments.iter_mut().find(|s| s.range.index == outcome.range.index) {
                    match outcome.state {
                        SegmentState::Finished => segment.finished = true,
                        SegmentState::Cancelled => {
                            any_cancelled = true;
                            if let Some(counter) = counters.get(&outcome.range.index) {
                                segment.base_offset = counter.load(Ordering::Relaxed);
                            }
                        }
                        SegmentState::Pending | SegmentState::Downloading | SegmentState::Failed => {}
                    }
                }
            }
        }

        if any_cancelled {
            return Err(DownloadError::Cancelled);
        }

        let plan = self.plan.read().await;
        let plan = plan.as_ref().expect("plan was just set above");
        debug_assert!(plan.segments.iter().all(|s| s.finished));
        let mut ordered = plan.segments.clone();
        ordered.sort_by_key(|s| s.range.index);
        let ordered_paths: Vec<PathBuf> = ordered.iter().map(|s| s.path.clone()).collect();
        drop(plan);

        // Every worker finished cleanly; only assembly is left before the
        // task can reach `Completed`.
        self.set_state(TaskState::AfterProcessing).await;
        planner::combine(&ordered_paths, &self.context.target_path, self.config.assembly_buffer_size).await?;
        Ok(())
    }

    fn total_downloaded(&self, segments: &[SegmentPlan], counters: &HashMap<u32, Arc<AtomicU64>>) -> u64 {
        segments
            .iter()
            .map(|s| {
                if s.finished {
                    s.range.len()
                } else {
                    counters.get(&s.range.index).map(|c| c.load(Ordering::Relaxed)).unwrap_or(s.base_offset)
                }
            })
            .sum()
    }

    async fn partial_snapshot(
        &self,
        segments: &[SegmentPlan],
        counters: &HashMap<u32, Arc<AtomicU64>>,
        downloaded: u64,
        total_bytes: u64,
        bytes_per_sec: f64,
    ) -> TaskSnapshot {
        let snapshots = segments
            .iter()
            .map(|s| {
                let bytes = if s.finished {
                    s.range.len()
                } else {
                    counters.get(&s.range.index).map(|c| c.load(Ordering::Relaxed)).unwrap_or(s.base_offset)
                };
                SegmentSnapshot {
                    index: s.range.index,
                    bytes_downloaded: bytes,
                    total_bytes: s.range.len(),
                    state: if s.finished { SegmentState::Finished } else { SegmentState::Downloading },
                }
            })
            .collect();
        TaskSnapshot {
            task_id: self.id.clone(),
            segments: snapshots,
            bytes_downloaded: downloaded,
            total_bytes,
            bytes_per_sec,
            state: self.state().await,
        }
    }


    /// Cancels in-flight workers and marks the task `Cancelled` once `run`
    /// observes it. A task that never left `Waiting` (still queued, or
    /// removed from the queue) has no `run()` in flight to observe the
    /// token, so it's moved to `Cancelled` directly. Idempotent.
    pub async fn cancel(&self) {
        if self.state().await == TaskState::Waiting {
            self.set_state(TaskState::Cancelled).await;
        }
        self.cancel.read().await.cancel();
    }

    /// Point-in-time progress snapshot, safe to call from outside `run()`
    /// at any point in the task's lifecycle (`get_tasks`-style queries).
    pub async fn snapshot(&self) -> TaskSnapshot {
        let plan = self.plan.read().await;
        let Some(plan) = plan.as_ref() else {
            return TaskSnapshot::empty(&self.id);
        };
        let counters = self.counters.read().await;
        let segments: Vec<SegmentSnapshot> = plan
            .segments
            .iter()
            .map(|s| {
                let bytes = if s.finished {
                    s.range.len()
                } else {
                    counters.get(&s.range.index).map(|c| c.load(Ordering::Relaxed)).unwrap_or(s.base_offset)
                };
                SegmentSnapshot {
                    index: s.range.index,
                    bytes_downloaded: bytes,
                    total_bytes: s.range.len(),
                    state: if s.finished { SegmentState::Finished } else { SegmentState::Downloading },
                }
            })
            .collect();
        let downloaded = segments.iter().map(|s| s.bytes_downloaded).sum();
        TaskSnapshot {
            task_id: self.id.clone(),
            segments,
            bytes_downloaded: downloaded,
            total_bytes: plan.total_bytes,
            bytes_per_sec: *self.rate.read().await,
            state: self.state().await,
        }
    }

    /// Requests the task stop without discarding its plan, so a later
    /// `run()` call only re-fetches each segment's unfinished remainder.
    pub async fn pause(&self) {
        self.set_state(TaskState::Paused).await;
        self.cancel.read().await.cancel();
    }

    async fn set_state(&self, new_state: TaskState) {
        *self.state.write().await = new_state;
        self.notifier.read().await.notify_state_changed(&self.id, new_state).await;
    }
}
