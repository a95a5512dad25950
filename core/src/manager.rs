//! Thread Manager: owns the set of Segment Worker tasks for one
//! `DownloadTask` generation, spawned concurrently — true parallel
//! segments, not a sequential loop — and joined back into one result.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::SchedulerConfig;
use crate::context::DownloadContext;
use crate::error::DownloadError;
use crate::model::SegmentRange;
use crate::strategy::ProtocolStrategy;
use crate::worker::{self, SegmentOutcome};

/// One segment to spawn a worker for: its range, its temp path, and how many
/// bytes of that range are already on disk from an earlier generation.
#[derive(Clone)]
pub struct SegmentSpawn {
    pub range: SegmentRange,
    pub path: PathBuf,
    pub base_offset: u64,
}

pub struct ThreadManager {
    cancel: CancellationToken,
    counters: HashMap<u32, Arc<AtomicU64>>,
    handles: Vec<JoinHandle<Result<SegmentOutcome, DownloadError>>>,
}

impl ThreadManager {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            counters: HashMap::new(),
            handles: Vec::new(),
        }
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Per-segment byte counters, readable by a Speed Monitor while workers
    /// are in flight. Pre-seeded to each segment's `base_offset`.
    pub fn counters(&self) -> &HashMap<u32, Arc<AtomicU64>> {
        &self.counters
    }

    /// Spawns one worker task per entry in `segments`.
    pub fn spawn_all(
        &mut self,
        strategy: Arc<dyn ProtocolStrategy>,
        context: Arc<DownloadContext>,
        segments: &[SegmentSpawn],
        resumable: bool,
        config: Arc<SchedulerConfig>,
    ) {
        for segment in segments {
            let range = segment.range;
            let path = segment.path.clone();
            let base_offset = segment.base_offset;
            let counter = Arc::new(AtomicU64::new(base_offset));
            self.counters.insert(range.index, counter.clone());

            let strategy = strategy.clone();
            let context = context.clone();
            let config = config.clone();
            let cancel = self.cancel.clone();

            let handle = tokio::spawn(async move {
                worker::run(strategy.as_ref(), &context, range, resumable, base_offset, path, &config, cancel, counter).await
            });
            self.handles.push(handle);
        }
    }

    pub fn completed_count(&self) -> usize {
        self.handles.iter().filter(|h| h.is_finished()).count()
    }

    pub fn total_count(&self) -> usize {
        self.handles.len()
    }

    /// Cancels every in-flight worker. Already-completed workers are
    /// unaffected; their results are still returned by `join_all`.
    pub fn cancel_all(&self) {
        self.cancel.cancel();
    }

    /// Awaits every worker and returns all outcomes. A worker that panicked
    /// is reported as `DownloadError::UnexpectedOrUnknownException`; the
    /// first error seen (by handle order) does not short-circuit the
    /// others — every worker is always joined so temp files are never
    /// abandoned mid-write.
    pub async fn join_all(self) -> Result<Vec<SegmentOutcome>, DownloadError> {
        let mut outcomes = Vec::with_capacity(self.handles.len());
        let mut first_error = None;

        for handle in self.handles {
            match handle.await {
                Ok(Ok(outcome)) => outcomes.push(outcome),
                Ok(Err(err)) => {
                    if first_error.is_none() {
                        first_error = Some(err);
                        // A fatal segment failure cancels its siblings as
                        // soon as it's known, rather than waiting for each
                        // one to finish (or exhaust its own retry budget)
                        // on its own.
                        self.cancel.cancel();
                    }
                }
                Err(join_err) => {
                    if first_error.is_none() {
                        first_error = Some(DownloadError::UnexpectedOrUnknownException(join_err.to_string()));
                        self.cancel.cancel();
                    }
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(outcomes),
        }
    }
}
