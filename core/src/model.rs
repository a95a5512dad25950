use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A contiguous, half-open-by-inclusive-end byte range assigned to exactly
/// one worker. `from`/`to` are both inclusive, matching an HTTP
/// `Range: bytes=from-to` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentRange {
    pub index: u32,
    pub from: u64,
    pub to: u64,
}

impl SegmentRange {
    pub fn len(&self) -> u64 {
        self.to - self.from + 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SegmentState {
    Pending,
    Downloading,
    Finished,
    Cancelled,
    Failed,
}

/// Live status of one worker, polled by the Speed Monitor and the Task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SegmentStatus {
    pub completed_bytes: u64,
    /// -1 = cancelled/aborted, 0..=99 = in progress, 100 = completed.
    pub progress: i8,
    pub state: SegmentState,
}

impl SegmentStatus {
    pub fn pending() -> Self {
        Self {
            completed_bytes: 0,
            progress: 0,
            state: SegmentState::Pending,
        }
    }
}

/// Lifecycle state of a `DownloadTask`, mirroring the Task state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    Waiting,
    Downloading,
    AfterProcessing,
    Paused,
    Completed,
    Cancelled,
    Failed,
}

/// Result of a `HEAD` probe.
#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub file_size: u64,
    pub resumable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticationInfo {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyInfo {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Everything the HTTP strategy needs to build a request: the target URL
/// plus whatever extra headers/cookies/auth the caller attached to the
/// `DownloadContext`.
#[derive(Debug, Clone, Default)]
pub struct HeaderData {
    pub headers: HashMap<String, Vec<String>>,
    pub cookies: Option<String>,
    pub authentication: Option<AuthenticationInfo>,
    pub proxy: Option<ProxyInfo>,
}
