use async_trait::async_trait;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::sync::Mutex;

use rangedl_core::error::DownloadError;
use rangedl_core::model::TaskState;
use rangedl_core::progress::{format_bytes, ProgressObserver, TaskSnapshot};
use rangedl_core::speed::format_rate;

/// Renders download progress as indicatif terminal bars.
///
/// One `ProgressBar` is created per segment, plus a total bar.
/// All bars live under a shared `MultiProgress` so they render cleanly.
pub struct TerminalProgressObserver {
    multi: MultiProgress,
    /// segment index → ProgressBar (lazily initialised on first `on_progress` call)
    bars: Mutex<HashMap<u32, ProgressBar>>,
    /// The aggregate total bar
    total_bar: Mutex<Option<ProgressBar>>,
}

impl TerminalProgressObserver {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            bars: Mutex::new(HashMap::new()),
            total_bar: Mutex::new(None),
        }
    }

    /// Ensure all per-segment bars and the total bar exist for the given snapshot.
    fn ensure_bars(&self, snapshot: &TaskSnapshot) {
        let mut bars = self.bars.lock().unwrap();
        let mut total_bar = self.total_bar.lock().unwrap();

        for segment in &snapshot.segments {
            if !bars.contains_key(&segment.index) {
                let style = ProgressStyle::with_template(
                    "[{bar:30.cyan/blue}] {bytes}/{total_bytes} — {msg}",
                )
                .unwrap()
                .progress_chars("=>-");

                let pb = self.multi.add(ProgressBar::new(segment.total_bytes.max(1)));
                pb.set_style(style);
                pb.set_message(format!("segment {}", segment.index));
                bars.insert(segment.index, pb);
            }
        }

        if total_bar.is_none() && snapshot.total_bytes > 0 {
            let style = ProgressStyle::with_template(
                "Total [{bar:30.green/white}] {bytes}/{total_bytes} — {msg}",
            )
            .unwrap()
            .progress_chars("=>-");

            let pb = self.multi.add(ProgressBar::new(snapshot.total_bytes.max(1)));
            pb.set_style(style);
            *total_bar = Some(pb);
        }
    }

    fn update_bars(&self, snapshot: &TaskSnapshot) {
        let bars = self.bars.lock().unwrap();
        let total_bar = self.total_bar.lock().unwrap();

        for segment in &snapshot.segments {
            if let Some(pb) = bars.get(&segment.index) {
                pb.set_length(segment.total_bytes.max(1));
                pb.set_position(segment.bytes_downloaded);
            }
        }

        if let Some(pb) = total_bar.as_ref() {
            pb.set_length(snapshot.total_bytes.max(1));
            pb.set_position(snapshot.bytes_downloaded);
            pb.set_message(format!("{}/s", format_rate(snapshot.bytes_per_sec)));
        }
    }

    fn finish_bars(&self, snapshot: &TaskSnapshot) {
        let bars = self.bars.lock().unwrap();
        let total_bar = self.total_bar.lock().unwrap();

        for segment in &snapshot.segments {
            if let Some(pb) = bars.get(&segment.index) {
                pb.finish_with_message(format!("segment {} done", segment.index));
            }
        }

        if let Some(pb) = total_bar.as_ref() {
            let total = format_bytes(snapshot.bytes_downloaded);
            pb.finish_with_message(format!("complete — {total}"));
        }
    }
}

#[async_trait]
impl ProgressObserver for TerminalProgressObserver {
    async fn on_progress(&self, snapshot: &TaskSnapshot) {
        self.ensure_bars(snapshot);
        self.update_bars(snapshot);
    }

    async fn on_complete(&self, snapshot: &TaskSnapshot) {
        self.ensure_bars(snapshot);
        self.finish_bars(snapshot);
    }

    async fn on_error(&self, task_id: &str, error: &DownloadError) {
        let bars = self.bars.lock().unwrap();
        let total_bar = self.total_bar.lock().unwrap();

        for pb in bars.values() {
            pb.abandon_with_message(format!("task {task_id} failed: {error}"));
        }
        if let Some(pb) = total_bar.as_ref() {
            pb.abandon_with_message(format!("failed: {error}"));
        }
    }

    async fn on_state_changed(&self, _task_id: &str, _state: TaskState) {
        // The terminal bars already reflect state through on_progress/
        // on_complete/on_error; this binary has no separate state display.
    }
}
