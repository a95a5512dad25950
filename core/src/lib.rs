//! `rangedl_core`: multi-threaded HTTP file downloader library. A
//! `DownloadContext` describes what to fetch; a `TaskScheduler` owns
//! admission control and runs `DownloadTask`s, each splitting its resource
//! into `SegmentRange`s fetched in parallel by Segment Workers through a
//! `ProtocolStrategy`.

pub mod config;
pub mod context;
pub mod error;
pub mod manager;
pub mod model;
pub mod planner;
pub mod progress;
pub mod scheduler;
pub mod speed;
pub mod strategy;
pub mod task;
pub mod worker;

pub use config::SchedulerConfig;
pub use context::{DownloadContext, DownloadContextBuilder};
pub use error::{DownloadError, DownloadResult, ErrorCategory};
pub use model::{
    AuthenticationInfo, HeaderData, ProbeResult, ProxyInfo, SegmentRange, SegmentState,
    SegmentStatus, TaskState,
};
pub use scheduler::TaskScheduler;
pub use strategy::{http::HttpStrategy, ProtocolStrategy, SegmentStream};
pub use task::DownloadTask;
