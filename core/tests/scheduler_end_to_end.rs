use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rangedl_core::{DownloadContext, HttpStrategy, ProtocolStrategy, SchedulerConfig, TaskScheduler, TaskState};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};
use wiremock::matchers::method;

fn generate_test_data(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 251) as u8).collect()
}

/// Mounts the `HEAD` response every test needs before its `GET` mock:
/// `probe()` issues a real `HEAD` request first and these tests would
/// otherwise leave it unmatched.
async fn mount_probe(server: &MockServer, content_length: usize, resumable: bool) {
    let mut template = ResponseTemplate::new(200).insert_header("content-length", content_length.to_string());
    if resumable {
        template = template.insert_header("accept-ranges", "bytes");
    }
    Mock::given(method("HEAD")).respond_with(template).mount(server).await;
}

/// Range-aware responder mirroring a real static file server: honors
/// `Range` when present, serves the whole body with `200` otherwise.
struct RangeResponder {
    body: Vec<u8>,
}

impl wiremock::Respond for RangeResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        if let Some(range_header) = request.headers.get(&reqwest::header::RANGE) {
            let range_str = range_header.to_str().unwrap_or("");
            if let Some((start, end)) = parse_range(range_str, self.body.len()) {
                let slice = &self.body[start..=end];
                return ResponseTemplate::new(206)
                    .set_body_bytes(slice.to_vec())
                    .insert_header("Content-Range", format!("bytes {start}-{end}/{}", self.body.len()));
            }
        }
        ResponseTemplate::new(200).set_body_bytes(self.body.clone())
    }
}

fn parse_range(header: &str, body_len: usize) -> Option<(usize, usize)> {
    let s = header.strip_prefix("bytes=")?;
    let mut parts = s.splitn(2, '-');
    let start: usize = parts.next()?.parse().ok()?;
    let end_part = parts.next()?;
    let end = if end_part.is_empty() { body_len - 1 } else { end_part.parse().ok()? };
    Some((start, end.min(body_len - 1)))
}

async fn wait_for_terminal(scheduler: &Arc<TaskScheduler>, id: &str) -> TaskState {
    for _ in 0..200 {
        let task = scheduler.get(id).await.unwrap();
        let state = task.state().await;
        if matches!(state, TaskState::Completed | TaskState::Cancelled | TaskState::Failed) {
            return state;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("task {id} did not reach a terminal state in time");
}

#[tokio::test]
async fn round_trips_across_segment_counts() {
    for segments in [1u8, 2, 3, 8] {
        let body = generate_test_data(100_000);
        let server = MockServer::start().await;
        mount_probe(&server, body.len(), true).await;
        Mock::given(method("GET"))
            .respond_with(RangeResponder { body: body.clone() })
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.bin");

        let strategy: Arc<dyn ProtocolStrategy> = Arc::new(HttpStrategy::default());
        let mut config = SchedulerConfig::default();
        config.speed_sample_interval = Duration::from_millis(10);
        let scheduler = TaskScheduler::new(config, strategy);

        let context = DownloadContext::builder(format!("{}/file", server.uri()), &target)
            .max_segments(segments)
            .build();
        let id = scheduler.submit(context).await.unwrap();

        let final_state = wait_for_terminal(&scheduler, &id).await;
        assert_eq!(final_state, TaskState::Completed, "segments={segments}");
        assert_eq!(tokio::fs::read(&target).await.unwrap(), body, "segments={segments}");
    }
}

#[tokio::test]
async fn non_resumable_server_collapses_to_one_segment() {
    let body = generate_test_data(50_000);
    let server = MockServer::start().await;
    mount_probe(&server, body.len(), false).await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("out.bin");
    let strategy: Arc<dyn ProtocolStrategy> = Arc::new(HttpStrategy::default());
    let scheduler = TaskScheduler::new(SchedulerConfig::default(), strategy);

    let context = DownloadContext::builder(format!("{}/file", server.uri()), &target)
        .max_segments(8)
        .build();
    let id = scheduler.submit(context).await.unwrap();

    let final_state = wait_for_terminal(&scheduler, &id).await;
    assert_eq!(final_state, TaskState::Completed);
    assert_eq!(tokio::fs::read(&target).await.unwrap(), body);
}

#[tokio::test]
async fn admission_control_limits_concurrent_downloads() {
    let body = generate_test_data(20_000);
    let server = MockServer::start().await;
    mount_probe(&server, body.len(), true).await;
    Mock::given(method("GET"))
        .respond_with(RangeResponder { body: body.clone() }.with_delay())
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let strategy: Arc<dyn ProtocolStrategy> = Arc::new(HttpStrategy::default());
    let mut config = SchedulerConfig::default();
    config.max_parallel_tasks = 2;
    let scheduler = TaskScheduler::new(config, strategy);

    let mut ids = Vec::new();
    for i in 0..5 {
        let target: PathBuf = dir.path().join(format!("out-{i}.bin"));
        let context = DownloadContext::builder(format!("{}/file", server.uri()), target)
            .max_segments(1)
            .build();
        ids.push(scheduler.submit(context).await.unwrap());
    }

    for id in &ids {
        let state = wait_for_terminal(&scheduler, id).await;
        assert_eq!(state, TaskState::Completed);
    }
}

impl RangeResponder {
    fn with_delay(self) -> DelayedRangeResponder {
        DelayedRangeResponder { inner: self }
    }
}

struct DelayedRangeResponder {
    inner: RangeResponder,
}

impl wiremock::Respond for DelayedRangeResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        self.inner.respond(request).set_delay(Duration::from_millis(400))
    }
}

#[tokio::test]
async fn pause_then_resume_completes_the_download() {
    let body = generate_test_data(200_000);
    let server = MockServer::start().await;
    mount_probe(&server, body.len(), true).await;
    Mock::given(method("GET"))
        .respond_with(RangeResponder { body: body.clone() }.with_delay())
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("out.bin");
    let strategy: Arc<dyn ProtocolStrategy> = Arc::new(HttpStrategy::default());
    let scheduler = TaskScheduler::new(SchedulerConfig::default(), strategy);

    let context = DownloadContext::builder(format!("{}/file", server.uri()), &target)
        .max_segments(4)
        .build();
    let id = scheduler.submit(context).await.unwrap();

    // The mock delays every response by 400ms, well past the 50ms head
    // start given here, so this always pauses mid-flight rather than
    // racing a download that might already be done.
    tokio::time::sleep(Duration::from_millis(50)).await;
    scheduler.pause(&id).await.unwrap();

    let task = scheduler.get(&id).await.unwrap();
    for _ in 0..100 {
        if task.state().await == TaskState::Paused {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(task.state().await, TaskState::Paused);

    scheduler.resume(&id).await.unwrap();
    let final_state = wait_for_terminal(&scheduler, &id).await;
    assert_eq!(final_state, TaskState::Completed);
    assert_eq!(tokio::fs::read(&target).await.unwrap(), body);
}

#[tokio::test]
async fn cancel_stops_the_download() {
    let body = generate_test_data(200_000);
    let server = MockServer::start().await;
    mount_probe(&server, body.len(), true).await;
    Mock::given(method("GET"))
        .respond_with(RangeResponder { body: body.clone() }.with_delay())
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("out.bin");
    let strategy: Arc<dyn ProtocolStrategy> = Arc::new(HttpStrategy::default());
    let scheduler = TaskScheduler::new(SchedulerConfig::default(), strategy);

    let context = DownloadContext::builder(format!("{}/file", server.uri()), &target)
        .max_segments(4)
        .build();
    let id = scheduler.submit(context).await.unwrap();

    tokio::time::sleep(Duration::from_millis(60)).await;
    scheduler.cancel(&id).await.unwrap();

    let final_state = wait_for_terminal(&scheduler, &id).await;
    assert_eq!(final_state, TaskState::Cancelled);
}

#[tokio::test]
async fn dispose_cancels_queued_and_running_tasks_and_rejects_new_ones() {
    let body = generate_test_data(200_000);
    let server = MockServer::start().await;
    mount_probe(&server, body.len(), true).await;
    Mock::given(method("GET"))
        .respond_with(RangeResponder { body: body.clone() }.with_delay())
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let strategy: Arc<dyn ProtocolStrategy> = Arc::new(HttpStrategy::default());
    let mut config = SchedulerConfig::default();
    config.max_parallel_tasks = 1;
    let scheduler = TaskScheduler::new(config, strategy);

    let running = DownloadContext::builder(format!("{}/file", server.uri()), dir.path().join("running.bin"))
        .max_segments(4)
        .build();
    let running_id = scheduler.submit(running).await.unwrap();

    // Still under max_parallel_tasks=1, so this one never leaves the queue.
    let queued = DownloadContext::builder(format!("{}/file", server.uri()), dir.path().join("queued.bin"))
        .max_segments(1)
        .build();
    let queued_id = scheduler.submit(queued).await.unwrap();

    tokio::time::sleep(Duration::from_millis(30)).await;
    scheduler.dispose().await;

    let running_state = wait_for_terminal(&scheduler, &running_id).await;
    assert_eq!(running_state, TaskState::Cancelled);
    let queued_task = scheduler.get(&queued_id).await.unwrap();
    assert_eq!(queued_task.state().await, TaskState::Cancelled);

    let rejected = DownloadContext::builder(format!("{}/file", server.uri()), dir.path().join("rejected.bin")).build();
    let err = scheduler.submit(rejected).await.unwrap_err();
    assert!(matches!(err, rangedl_core::DownloadError::SchedulerUnavailable));
}

#[tokio::test]
async fn get_tasks_filters_by_snapshot_state() {
    let body = generate_test_data(10_000);
    let server = MockServer::start().await;
    mount_probe(&server, body.len(), true).await;
    Mock::given(method("GET"))
        .respond_with(RangeResponder { body: body.clone() })
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let strategy: Arc<dyn ProtocolStrategy> = Arc::new(HttpStrategy::default());
    let scheduler = TaskScheduler::new(SchedulerConfig::default(), strategy);

    let context = DownloadContext::builder(format!("{}/file", server.uri()), dir.path().join("out.bin"))
        .max_segments(1)
        .build();
    let id = scheduler.submit(context).await.unwrap();
    wait_for_terminal(&scheduler, &id).await;

    let completed = scheduler.get_tasks(|s| s.state == TaskState::Completed).await;
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].task_id, id);

    let failed = scheduler.get_tasks(|s| s.state == TaskState::Failed).await;
    assert!(failed.is_empty());
}

struct CountingSchedulerObserver {
    progress_events: std::sync::atomic::AtomicUsize,
    completed_events: std::sync::atomic::AtomicUsize,
}

#[async_trait::async_trait]
impl rangedl_core::progress::SchedulerObserver for CountingSchedulerObserver {
    async fn on_task_queue_progress_changed(&self, _snapshot: &rangedl_core::progress::TaskSnapshot) {
        self.progress_events.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    }

    async fn on_tasks_progress_completed(&self) {
        self.completed_events.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    }
}

#[tokio::test]
async fn scheduler_observer_sees_progress_and_drain_to_empty() {
    let body = generate_test_data(10_000);
    let server = MockServer::start().await;
    mount_probe(&server, body.len(), true).await;
    Mock::given(method("GET"))
        .respond_with(RangeResponder { body: body.clone() })
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let strategy: Arc<dyn ProtocolStrategy> = Arc::new(HttpStrategy::default());
    let scheduler = TaskScheduler::new(SchedulerConfig::default(), strategy);

    let observer = Arc::new(CountingSchedulerObserver {
        progress_events: std::sync::atomic::AtomicUsize::new(0),
        completed_events: std::sync::atomic::AtomicUsize::new(0),
    });
    scheduler.add_scheduler_observer(observer.clone()).await;

    let context = DownloadContext::builder(format!("{}/file", server.uri()), dir.path().join("out.bin"))
        .max_segments(1)
        .build();
    let id = scheduler.submit(context).await.unwrap();
    wait_for_terminal(&scheduler, &id).await;

    assert!(observer.progress_events.load(std::sync::atomic::Ordering::SeqCst) > 0);
    assert_eq!(observer.completed_events.load(std::sync::atomic::Ordering::SeqCst), 1);
}
