//! Pure byte-range planning and disk-to-disk reassembly.
//!
//! Everything here is file-size/path math and streaming I/O — no network,
//! no task state. `split_ranges`/`split_paths` are deterministic; `combine`
//! is the only function that touches disk beyond path construction.

use std::path::{Path, PathBuf};

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::DownloadError;
use crate::model::SegmentRange;

/// Splits `file_size` bytes into `n` contiguous, non-overlapping ranges.
///
/// `range[i].from = i * floor(file_size/n)`; the last range absorbs the
/// remainder so `sum(len) == file_size` exactly. Fails on `file_size == 0`
/// or `n == 0`. If `file_size < n as u64`, `n` is clamped down to
/// `file_size` first — every segment gets at least one byte rather than
/// emitting degenerate `from == to` ranges for segments that would have
/// nothing to fetch.
pub fn split_ranges(file_size: u64, n: u32) -> Result<Vec<SegmentRange>, DownloadError> {
    if file_size == 0 {
        return Err(DownloadError::ArgumentOutOfRange("file_size must be > 0".into()));
    }
    if n == 0 {
        return Err(DownloadError::ArgumentOutOfRange("segment count must be > 0".into()));
    }
    let n = n.min(file_size as u32).max(1);

    let chunk = file_size / n as u64;
    let mut ranges = Vec::with_capacity(n as usize);
    for i in 0..n {
        let from = i as u64 * chunk;
        let to = if i == n - 1 {
            file_size - 1
        } else {
            from + chunk - 1
        };
        ranges.push(SegmentRange { index: i, from, to });
    }
    Ok(ranges)
}

/// Builds one temp-segment path per index: `<dir>/<stem>-<i>.downtemp`.
/// Fails on `n == 0` or a `final_path` with no file-name component.
pub fn split_paths(n: u32, final_path: &Path) -> Result<Vec<PathBuf>, DownloadError> {
    if n == 0 {
        return Err(DownloadError::ArgumentOutOfRange("segment count must be > 0".into()));
    }
    let dir = final_path.parent().unwrap_or_else(|| Path::new("."));
    let stem = final_path
        .file_stem()
        .ok_or_else(|| DownloadError::TaskContextInvalid("final_path has no file name".into()))?
        .to_string_lossy()
        .into_owned();

    Ok((0..n)
        .map(|i| dir.join(format!("{stem}-{i}.downtemp")))
        .collect())
}

/// Concatenates `segment_paths` (already in ascending segment-index order)
/// into `final_path`, then deletes them. `final_path` must already exist
/// (the Task pre-creates it as an empty file before starting workers).
///
/// For a single segment, the temp is renamed into place instead of copied.
/// On any failure, already-opened temps are still attempted-deleted before
/// the error is returned.
pub async fn combine(
    segment_paths: &[PathBuf],
    final_path: &Path,
    buffer_size: usize,
) -> Result<(), DownloadError> {
    let result = combine_inner(segment_paths, final_path, buffer_size).await;

    // Best-effort cleanup regardless of outcome — the temp-file-set-empty
    // invariant holds even when assembly itself failed partway through.
    for path in segment_paths {
        let _ = tokio::fs::remove_file(path).await;
    }

    result
}

async fn combine_inner(
    segment_paths: &[PathBuf],
    final_path: &Path,
    buffer_size: usize,
) -> Result<(), DownloadError> {
    if segment_paths.len() == 1 {
        // Drop the pre-created empty final file so the rename can take its
        // place (same-filesystem rename; cross-device falls back to copy).
        let _ = tokio::fs::remove_file(final_path).await;
        if tokio::fs::rename(&segment_paths[0], final_path).await.is_ok() {
            return Ok(());
        }
        // Cross-device rename failed — fall through to the generic
        // stream-copy path below, which works for any single temp too.
    }

    let mut out = tokio::fs::File::create(final_path).await?;
    let mut buf = vec![0u8; buffer_size.max(1)];

    for path in segment_paths {
        let mut input = tokio::fs::File::open(path).await?;
        loop {
            let n = input.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            out.write_all(&buf[..n]).await?;
        }
    }
    out.flush().await?;
    Ok(())
}
