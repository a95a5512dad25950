use std::io;

/// The five failure buckets the public error taxonomy groups every code
/// into. Consumers that only care about UX classification (retry? tell the
/// user? log and move on?) can match on this instead of every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ErrorCategory {
    Network,
    FileSystem,
    Internal,
    Protocol,
    Unexpected,
}

/// Every failure surfaced anywhere in the scheduler/task/worker pipeline.
///
/// Variants are grouped in the order the external-interface table lists
/// them; `category()` is the only thing callers should need beyond the
/// `Display`/`Error` impls `thiserror` derives.
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    // -- Network --------------------------------------------------------
    #[error("network unavailable")]
    NetworkUnavailable,
    #[error("timed out")]
    Timeout,
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("http error: {0}")]
    HttpError(String),
    #[error("http status {status}: {message}")]
    HttpStatus { status: u16, message: String },
    #[error("dns resolution failed: {0}")]
    DnsResolutionFailed(String),

    // -- FileSystem -------------------------------------------------------
    #[error("disk full")]
    DiskFull,
    #[error("disk operation failed: {0}")]
    DiskOperationFailed(#[from] io::Error),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("file already exists: {0}")]
    FileAlreadyExists(String),
    #[error("path not found: {0}")]
    PathNotFound(String),
    #[error("output stream unavailable")]
    OutputStreamUnavailable,

    // -- Internal ---------------------------------------------------------
    #[error("scheduler unavailable")]
    SchedulerUnavailable,
    #[error("task already exists: {0}")]
    TaskAlreadyExists(String),
    #[error("task already started: {0}")]
    TaskAlreadyStarted(String),
    #[error("task context invalid: {0}")]
    TaskContextInvalid(String),
    #[error("thread max exceeded")]
    ThreadMaxExceeded,
    #[error("thread creation failed: {0}")]
    ThreadCreationFailed(String),
    #[error("output stream count mismatch: expected {expected}, got {actual}")]
    OutputStreamCountMismatch { expected: usize, actual: usize },
    #[error("task already terminal")]
    TaskAlreadyTerminal,
    #[error("task not found: {0}")]
    TaskNotFound(String),
    #[error("cancelled")]
    Cancelled,
    #[error("max retries exceeded")]
    MaxRetryExceeded,

    // -- Protocol -----------------------------------------------------------
    #[error("protocol not supported: {0}")]
    ProtocolNotSupported(String),
    #[error("range not satisfiable")]
    RangeNotSatisfiable,
    #[error("checksum mismatch")]
    ChecksumMismatch,

    // -- Unexpected ---------------------------------------------------------
    #[error("null reference")]
    NullReference,
    #[error("argument out of range: {0}")]
    ArgumentOutOfRange(String),
    #[error("unexpected error: {0}")]
    UnexpectedOrUnknownException(String),
}

impl DownloadError {
    pub fn category(&self) -> ErrorCategory {
        use DownloadError::*;
        match self {
            NetworkUnavailable | Timeout | InvalidUrl(_) | HttpError(_) | HttpStatus { .. } | DnsResolutionFailed(_) => {
                ErrorCategory::Network
            }
            DiskFull
            | DiskOperationFailed(_)
            | PermissionDenied(_)
            | FileAlreadyExists(_)
            | PathNotFound(_)
            | OutputStreamUnavailable => ErrorCategory::FileSystem,
            SchedulerUnavailable
            | TaskAlreadyExists(_)
            | TaskAlreadyStarted(_)
            | TaskContextInvalid(_)
            | ThreadMaxExceeded
            | ThreadCreationFailed(_)
            | OutputStreamCountMismatch { .. }
            | TaskAlreadyTerminal
            | TaskNotFound(_)
            | Cancelled
            | MaxRetryExceeded => ErrorCategory::Internal,
            ProtocolNotSupported(_) | RangeNotSatisfiable | ChecksumMismatch => ErrorCategory::Protocol,
            NullReference | ArgumentOutOfRange(_) | UnexpectedOrUnknownException(_) => {
                ErrorCategory::Unexpected
            }
        }
    }

    /// Transient failures the worker retry loop should sleep-and-retry on,
    /// as opposed to fatal failures it must propagate immediately.
    ///
    /// A 4xx/5xx response (`HttpStatus`) is deliberately excluded: a server
    /// rejecting the request outright (not-found, forbidden, server error)
    /// will not start succeeding on the next attempt, unlike a timeout, a
    /// dropped connection, or a mid-stream read failure.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DownloadError::Timeout | DownloadError::NetworkUnavailable | DownloadError::HttpError(_)
        )
    }

    /// Classifies a response status into the fatal `HttpStatus` variant for
    /// 4xx/5xx, or the retryable `HttpError` variant for anything else
    /// unexpected (a 3xx reqwest declined to follow, for instance).
    pub fn from_status(status: reqwest::StatusCode) -> Self {
        if status.is_client_error() || status.is_server_error() {
            DownloadError::HttpStatus { status: status.as_u16(), message: status.to_string() }
        } else {
            DownloadError::HttpError(status.to_string())
        }
    }
}

impl From<reqwest::Error> for DownloadError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            DownloadError::Timeout
        } else if err.is_connect() {
            DownloadError::NetworkUnavailable
        } else if err.is_status() {
            match err.status() {
                Some(status) => DownloadError::from_status(status),
                None => DownloadError::HttpError(err.to_string()),
            }
        } else if err.is_builder() {
            DownloadError::InvalidUrl(err.to_string())
        } else {
            DownloadError::HttpError(err.to_string())
        }
    }
}

pub type DownloadResult<T> = Result<T, DownloadError>;
