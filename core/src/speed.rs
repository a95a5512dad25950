//! Speed Monitor: periodic sampling of a task's total bytes-so-far,
//! turned into an instantaneous transfer rate.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// One sample: cumulative bytes at sample time and the rate since the
/// previous sample (0 on the very first tick).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeedSample {
    pub bytes_so_far: u64,
    pub bytes_per_sec: f64,
}

/// Spawns a ticker that calls `bytes_so_far` every `interval` and reports
/// the delta as a rate via `on_sample`, until `cancel` fires. `bytes_so_far`
/// must be cheap and non-blocking — it runs on the sampling task itself.
pub fn spawn<B, S>(
    interval: Duration,
    cancel: CancellationToken,
    bytes_so_far: B,
    on_sample: S,
) -> JoinHandle<()>
where
    B: Fn() -> u64 + Send + 'static,
    S: Fn(SpeedSample) + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick fires immediately; skip it so the first real
        // sample is one full interval after the monitor starts.
        ticker.tick().await;

        let mut last_bytes = bytes_so_far();
        let mut last_tick = tokio::time::Instant::now();
        const MIN_DT: Duration = Duration::from_millis(500);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let now_tick = tokio::time::Instant::now();
                    let dt = now_tick.duration_since(last_tick);
                    let now = bytes_so_far();

                    // A slow observer or scheduling hiccup can compress two
                    // ticks together; reporting the delta over that short a
                    // window would spike. Emit 0 instead of dividing by a
                    // near-zero dt.
                    let bytes_per_sec = if dt < MIN_DT {
                        0.0
                    } else {
                        now.saturating_sub(last_bytes) as f64 / dt.as_secs_f64()
                    };

                    last_bytes = now;
                    last_tick = now_tick;
                    on_sample(SpeedSample { bytes_so_far: now, bytes_per_sec });
                }
            }
        }
    })
}

/// Convenience wrapper for sampling a shared `AtomicU64` byte counter, the
/// shape workers expose their progress through.
pub fn spawn_from_counter<S>(
    interval: Duration,
    cancel: CancellationToken,
    counter: Arc<std::sync::atomic::AtomicU64>,
    on_sample: S,
) -> JoinHandle<()>
where
    S: Fn(SpeedSample) + Send + 'static,
{
    spawn(
        interval,
        cancel,
        move || counter.load(std::sync::atomic::Ordering::Relaxed),
        on_sample,
    )
}

const UNITS: [&str; 6] = ["B", "KiB", "MiB", "GiB", "TiB", "PiB"];

/// Formats a byte rate as e.g. `"1.25 MiB/s"`, scaling by powers of 1024.
pub fn format_rate(bytes_per_sec: f64) -> String {
    if bytes_per_sec < 1024.0 {
        return format!("{bytes_per_sec:.0} B/s");
    }
    let mut value = bytes_per_sec;
    let mut unit_idx = 0;
    while value >= 1024.0 && unit_idx < UNITS.len() - 1 {
        value /= 1024.0;
        unit_idx += 1;
    }
    format!("{value:.2} {}/s", UNITS[unit_idx])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    #[test]
    fn format_rate_sub_kibibyte() {
        assert_eq!(format_rate(512.0), "512 B/s");
    }

    #[test]
    fn format_rate_scales_through_units() {
        assert_eq!(format_rate(1024.0), "1.00 KiB/s");
        assert_eq!(format_rate(1024.0 * 1024.0 * 2.5), "2.50 MiB/s");
        assert_eq!(format_rate(1024.0f64.powi(3) * 1.5), "1.50 GiB/s");
    }

    #[tokio::test(start_paused = true)]
    async fn spawn_reports_rate_from_counter_deltas() {
        let counter = Arc::new(AtomicU64::new(0));
        let cancel = CancellationToken::new();
        let samples: Arc<Mutex<Vec<SpeedSample>>> = Arc::new(Mutex::new(Vec::new()));

        let collected = samples.clone();
        let handle = spawn_from_counter(Duration::from_secs(1), cancel.clone(), counter.clone(), move |s| {
            collected.lock().unwrap().push(s);
        });

        tokio::time::advance(Duration::from_millis(1100)).await;
        counter.store(2048, Ordering::Relaxed);
        tokio::time::advance(Duration::from_millis(1000)).await;
        cancel.cancel();
        handle.await.unwrap();

        let collected = samples.lock().unwrap();
        assert!(collected.len() >= 2, "expected at least two samples, got {}", collected.len());
        assert_eq!(collected[1].bytes_per_sec, 2048.0);
    }
}
