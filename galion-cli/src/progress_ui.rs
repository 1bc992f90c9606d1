//! Renders [`galion_core::ProgressSnapshot`] updates as per-job indicatif bars.

use dashmap::DashMap;
use galion_core::{ProgressSink, ProgressSnapshot};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use uuid::Uuid;

/// A [`ProgressSink`] that renders one indicatif bar per in-flight job,
/// created lazily on first report and finished when the job reaches a
/// terminal status tag.
pub struct IndicatifSink {
    multi: MultiProgress,
    bars: DashMap<Uuid, ProgressBar>,
}

impl IndicatifSink {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            bars: DashMap::new(),
        }
    }

    fn bar_for(&self, job_id: Uuid, total: Option<u64>) -> ProgressBar {
        if let Some(bar) = self.bars.get(&job_id) {
            return bar.clone();
        }
        let bar = match total {
            Some(len) => self.multi.add(ProgressBar::new(len)),
            None => self.multi.add(ProgressBar::new_spinner()),
        };
        let style = ProgressStyle::with_template(
            "{prefix:.cyan} [{bar:30}] {bytes}/{total_bytes} ({bytes_per_sec}, eta {eta})",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar());
        bar.set_style(style);
        bar.set_prefix(job_id.to_string());
        self.bars.insert(job_id, bar.clone());
        bar
    }
}

impl Default for IndicatifSink {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for IndicatifSink {
    fn on_progress(&self, snapshot: ProgressSnapshot) {
        let bar = self.bar_for(snapshot.job_id, snapshot.total_bytes);
        if let Some(total) = snapshot.total_bytes {
            bar.set_length(total);
        }
        bar.set_position(snapshot.bytes_downloaded);

        if snapshot.status_tag == "completed" || snapshot.status_tag == "failed" {
            bar.finish_with_message(snapshot.status_tag.to_string());
            self.bars.remove(&snapshot.job_id);
        }
    }
}
