use serde::Serialize;

use crate::model::{SegmentState, TaskState};

/// Per-segment progress snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct SegmentSnapshot {
    pub index: u32,
    pub bytes_downloaded: u64,
    pub total_bytes: u64,
    pub state: SegmentState,
}

/// Aggregate progress snapshot for one task, fanned out to every registered
/// `ProgressObserver` on each speed-monitor tick and state transition.
#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    pub task_id: String,
    pub segments: Vec<SegmentSnapshot>,
    pub bytes_downloaded: u64,
    pub total_bytes: u64,
    pub bytes_per_sec: f64,
    pub state: TaskState,
}

impl TaskSnapshot {
    pub fn empty(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            segments: Vec::new(),
            bytes_downloaded: 0,
            total_bytes: 0,
            bytes_per_sec: 0.0,
            state: TaskState::Waiting,
        }
    }
}

/// Human-readable byte formatting, decimal-free powers of 1024.
pub fn format_bytes(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = 1024.0 * 1024.0;
    const GB: f64 = 1024.0 * 1024.0 * 1024.0;

    let b = bytes as f64;
    if b >= GB {
        format!("{:.2} GiB", b / GB)
    } else if b >= MB {
        format!("{:.2} MiB", b / MB)
    } else if b >= KB {
        format!("{:.1} KiB", b / KB)
    } else {
        format!("{bytes} B")
    }
}
