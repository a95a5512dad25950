use std::time::Duration;

/// Tunables for the scheduler/task/worker pipeline.
///
/// Generalizes the teacher's bare constants (`MAX_CONNECTIONS`,
/// `MIN_PIECE_SIZE`) into a struct so tests can shrink timeouts without
/// touching call sites. `Default` reproduces the spec's literal numbers.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Upper bound on tasks in `Downloading` at once.
    pub max_parallel_tasks: u8,
    /// Per-worker read/connect retry attempts before a segment fails fatally.
    pub max_retries: u32,
    /// Sleep between retry attempts.
    pub retry_backoff: Duration,
    /// Upper bound on a single `HEAD` probe request.
    pub probe_timeout: Duration,
    /// Upper bound on a single segment read attempt.
    pub read_timeout: Duration,
    /// Buffer size used when concatenating temp segments into the final file.
    pub assembly_buffer_size: usize,
    /// Buffer size used when a worker reads from its segment stream.
    pub worker_read_buffer_size: usize,
    /// 1 Hz by default; how often the speed monitor samples.
    pub speed_sample_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_parallel_tasks: 3,
            max_retries: 5,
            retry_backoff: Duration::from_secs(5),
            probe_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(5),
            assembly_buffer_size: 1024,
            worker_read_buffer_size: 4096,
            speed_sample_interval: Duration::from_secs(1),
        }
    }
}
