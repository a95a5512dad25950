//! Protocol Strategy: the seam between the scheduler/worker machinery and
//! whatever wire protocol actually fetches bytes. Only HTTP(S) ships today,
//! but workers and the scheduler only ever see this trait.

pub mod http;

use std::pin::Pin;

use bytes::Bytes;
use futures::Stream;

use crate::context::DownloadContext;
use crate::error::DownloadError;
use crate::model::{ProbeResult, SegmentRange};

/// A single segment's byte stream. Each item is one read's worth of bytes,
/// already trimmed to the segment's own range by the strategy — callers
/// never need to cap or re-slice what they receive.
pub type SegmentStream = Pin<Box<dyn Stream<Item = Result<Bytes, DownloadError>> + Send>>;

/// One attempt at each operation; retry/backoff is the Segment Worker's
/// responsibility, not the strategy's. Implementations should not retry
/// internally — a failed attempt returns immediately so the caller's retry
/// budget and backoff timing stay in one place.
#[async_trait::async_trait]
pub trait ProtocolStrategy: Send + Sync {
    /// Checks the context against this protocol's requirements (URL scheme,
    /// required fields) before any network I/O happens.
    fn validate_context(&self, context: &DownloadContext) -> Result<(), DownloadError>;

    /// Determines total size and resumability without downloading the body.
    async fn probe(&self, context: &DownloadContext) -> Result<ProbeResult, DownloadError>;

    /// Opens a stream for exactly the bytes in `range`. When `resumable` is
    /// false the caller passes a range spanning the whole (unknown-size)
    /// resource and must not expect the stream to honor range boundaries.
    async fn open_segment(
        &self,
        context: &DownloadContext,
        range: SegmentRange,
        resumable: bool,
    ) -> Result<SegmentStream, DownloadError>;
}
