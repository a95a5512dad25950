pub mod notifier;
pub mod observer;
pub mod snapshot;

pub use notifier::ProgressNotifier;
pub use observer::{ProgressObserver, SchedulerObserver};
pub use snapshot::{format_bytes, SegmentSnapshot, TaskSnapshot};
