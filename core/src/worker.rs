//! Segment Worker: the Download Thread that fetches one `SegmentRange` into
//! its own temp file. Retries transient failures up to `SchedulerConfig`'s
//! budget; anything else (or exhausting the budget) fails the segment.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use crate::config::SchedulerConfig;
use crate::context::DownloadContext;
use crate::error::DownloadError;
use crate::model::{SegmentRange, SegmentState, SegmentStatus};
use crate::strategy::ProtocolStrategy;

/// Outcome of a single worker run.
pub struct SegmentOutcome {
    pub range: SegmentRange,
    pub path: PathBuf,
    pub state: SegmentState,
}

/// Downloads `range` into `path`, picking up at `base_offset` bytes into the
/// range if this segment already has that many bytes on disk from an
/// earlier generation (a pause). A fresh segment passes `base_offset = 0`.
///
/// `bytes_counter` tracks bytes completed across the *whole* range (i.e.
/// `base_offset` plus whatever this attempt has written), so a Speed
/// Monitor or snapshot reading it mid-flight sees absolute progress; it is
/// reset back to `base_offset` at the start of each retry attempt, since a
/// failed attempt's partial bytes are truncated away before retrying.
pub async fn run(
    strategy: &dyn ProtocolStrategy,
    context: &DownloadContext,
    range: SegmentRange,
    resumable: bool,
    base_offset: u64,
    path: PathBuf,
    config: &SchedulerConfig,
    cancel: CancellationToken,
    bytes_counter: Arc<AtomicU64>,
) -> Result<SegmentOutcome, DownloadError> {
    let mut attempt = 0u32;

    loop {
        if cancel.is_cancelled() {
            return Ok(SegmentOutcome { range, path, state: SegmentState::Cancelled });
        }

        bytes_counter.store(base_offset, Ordering::Relaxed);
        match try_once(strategy, context, range, resumable, base_offset, &path, config, &cancel, &bytes_counter).await {
            Ok(()) => {
                return Ok(SegmentOutcome { range, path, state: SegmentState::Finished });
            }
            Err(DownloadError::Cancelled) => {
                return Ok(SegmentOutcome { range, path, state: SegmentState::Cancelled });
            }
            Err(err) if err.is_transient() && attempt < config.max_retries => {
                attempt += 1;
                log::warn!(
                    "segment {}: attempt {attempt}/{} failed ({err}), retrying in {:?}",
                    range.index,
                    config.max_retries,
                    config.retry_backoff
                );
                tokio::select! {
                    _ = tokio::time::sleep(config.retry_backoff) => {}
                    _ = cancel.cancelled() => {
                        return Ok(SegmentOutcome { range, path, state: SegmentState::Cancelled });
                    }
                }
            }
            Err(err) if err.is_transient() => {
                log::error!("segment {}: exhausted {} retries", range.index, config.max_retries);
                return Err(DownloadError::MaxRetryExceeded);
            }
            Err(err) => return Err(err),
        }
    }
}

/// Opens `path` for this attempt: truncated to exactly `base_offset` bytes
/// and appended to from there. `base_offset == 0` is the common
/// fresh-segment case and just creates/truncates the file outright.
async fn open_for_attempt(path: &PathBuf, base_offset: u64) -> Result<tokio::fs::File, DownloadError> {
    if base_offset == 0 {
        return Ok(tokio::fs::File::create(path).await?);
    }
    let existing = tokio::fs::OpenOptions::new().write(true).open(path).await?;
    existing.set_len(base_offset).await?;
    drop(existing);
    Ok(tokio::fs::OpenOptions::new().append(true).open(path).await?)
}

async fn try_once(
    strategy: &dyn ProtocolStrategy,
    context: &DownloadContext,
    range: SegmentRange,
    resumable: bool,
    base_offset: u64,
    path: &PathBuf,
    config: &SchedulerConfig,
    cancel: &CancellationToken,
    bytes_counter: &Arc<AtomicU64>,
) -> Result<(), DownloadError> {
    // A resumed segment asks the server for only the bytes it's missing;
    // `open_segment` doesn't need to know about resume at all, it just
    // serves whatever range it's handed.
    let effective_range = SegmentRange { index: range.index, from: range.from + base_offset, to: range.to };
    // Race the request itself against cancellation — a worker blocked
    // waiting on a slow or hanging server must still respond to pause/cancel
    // promptly, not just in the gaps between already-arrived chunks.
    let mut stream = tokio::select! {
        result = strategy.open_segment(context, effective_range, resumable) => result?,
        _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
    };

    let file = open_for_attempt(path, base_offset).await?;
    let mut writer = tokio::io::BufWriter::with_capacity(config.worker_read_buffer_size, file);
    let mut written: u64 = 0;

    while let Some(chunk) = stream.next().await {
        if cancel.is_cancelled() {
            let _ = writer.flush().await;
            return Err(DownloadError::Cancelled);
        }
        let chunk = chunk?;
        writer.write_all(&chunk).await?;
        written += chunk.len() as u64;
        bytes_counter.store(base_offset + written, Ordering::Relaxed);
    }
    writer.flush().await?;

    if resumable && base_offset + written != range.len() {
        return Err(DownloadError::HttpError(format!(
            "segment {}: expected {} bytes, got {}",
            range.index,
            range.len(),
            base_offset + written
        )));
    }

    Ok(())
}

/// Snapshot of a worker's current progress, read by the Task without
/// touching the worker's own atomics directly.
pub fn status_of(bytes_counter: &AtomicU64, range: SegmentRange, state: SegmentState) -> SegmentStatus {
    let completed = bytes_counter.load(Ordering::Relaxed);
    let progress = if range.len() == 0 {
        100
    } else {
        ((completed.min(range.len()) * 100) / range.len()) as i8
    };
    SegmentStatus {
        completed_bytes: completed,
        progress: match state {
            SegmentState::Cancelled | SegmentState::Failed => -1,
            SegmentState::Finished => 100,
            _ => progress,
        },
        state,
    }
}
