//! Progress snapshots and the sink contract external consumers implement.
//!
//! Grounded on the teacher's progress-bar wiring in `downloader-cli` (an
//! `indicatif` bar fed from the engine's byte counters) generalised into a
//! trait so `galion-core` stays decoupled from any particular UI; the
//! external WebSocket broadcaster the spec describes is one more
//! implementation of [`ProgressSink`] that this crate does not provide.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A point-in-time view of a job's download progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub job_id: Uuid,
    pub bytes_downloaded: u64,
    pub total_bytes: Option<u64>,
    pub bytes_per_second: f64,
    pub eta_seconds: Option<f64>,
    pub percent: Option<f64>,
    pub status_tag: String,
}

impl ProgressSnapshot {
    pub fn new(
        job_id: Uuid,
        bytes_downloaded: u64,
        total_bytes: Option<u64>,
        bytes_per_second: f64,
        status_tag: impl Into<String>,
    ) -> Self {
        let percent = total_bytes.filter(|t| *t > 0).map(|t| {
            (bytes_downloaded as f64 / t as f64 * 100.0).clamp(0.0, 100.0)
        });
        let eta_seconds = match (total_bytes, bytes_per_second) {
            (Some(total), rate) if rate > 0.0 && total > bytes_downloaded => {
                Some((total - bytes_downloaded) as f64 / rate)
            }
            _ => None,
        };
        Self {
            job_id,
            bytes_downloaded,
            total_bytes,
            bytes_per_second,
            eta_seconds,
            percent,
            status_tag: status_tag.into(),
        }
    }
}

/// External consumer of progress updates (a WebSocket hub, a terminal
/// progress bar, a log line). Implementations must not block the caller
/// for long — the broadcaster already throttles calls to at most once per
/// [`ProgressBroadcaster::min_interval`].
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, snapshot: ProgressSnapshot);
}

/// No-op sink, used where progress reporting is not wired up.
pub struct NullProgressSink;

impl ProgressSink for NullProgressSink {
    fn on_progress(&self, _snapshot: ProgressSnapshot) {}
}

/// Wraps a [`ProgressSink`] with the spec's "at most once per 500ms"
/// emission cadence and derives a rolling bytes-per-second estimate from
/// consecutive snapshots.
pub struct ProgressBroadcaster {
    sink: Arc<dyn ProgressSink>,
    min_interval: Duration,
    last_emitted: std::sync::Mutex<Option<Instant>>,
    window_start: std::sync::Mutex<Option<(Instant, u64)>>,
    last_bytes: AtomicI64,
}

impl ProgressBroadcaster {
    pub fn new(sink: Arc<dyn ProgressSink>, min_interval: Duration) -> Self {
        Self {
            sink,
            min_interval,
            last_emitted: std::sync::Mutex::new(None),
            window_start: std::sync::Mutex::new(None),
            last_bytes: AtomicI64::new(0),
        }
    }

    pub fn with_default_interval(sink: Arc<dyn ProgressSink>) -> Self {
        Self::new(sink, Duration::from_millis(500))
    }

    /// Reports `bytes_downloaded`/`total_bytes` for `job_id`, dropping the
    /// call if it arrives before `min_interval` has elapsed since the last
    /// emission (the final call for a job should bypass this via
    /// [`Self::force`]).
    pub fn report(&self, job_id: Uuid, bytes_downloaded: u64, total_bytes: Option<u64>) {
        let now = Instant::now();
        {
            let mut last = self.last_emitted.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(previous) = *last {
                if now.duration_since(previous) < self.min_interval {
                    return;
                }
            }
            *last = Some(now);
        }
        self.emit(job_id, bytes_downloaded, total_bytes, "downloading", now);
    }

    /// Emits unconditionally, bypassing the throttle — used for the final
    /// progress update of a job so consumers see the true end state.
    pub fn force(&self, job_id: Uuid, bytes_downloaded: u64, total_bytes: Option<u64>, status_tag: &str) {
        self.emit(job_id, bytes_downloaded, total_bytes, status_tag, Instant::now());
    }

    fn emit(&self, job_id: Uuid, bytes_downloaded: u64, total_bytes: Option<u64>, status_tag: &str, now: Instant) {
        let rate = {
            let mut window = self.window_start.lock().unwrap_or_else(|e| e.into_inner());
            let rate = match *window {
                Some((start, start_bytes)) => {
                    let elapsed = now.duration_since(start).as_secs_f64();
                    if elapsed > 0.0 {
                        (bytes_downloaded.saturating_sub(start_bytes)) as f64 / elapsed
                    } else {
                        0.0
                    }
                }
                None => 0.0,
            };
            *window = Some((now, bytes_downloaded));
            rate
        };
        self.last_bytes.store(bytes_downloaded as i64, Ordering::Relaxed);
        self.sink.on_progress(ProgressSnapshot::new(
            job_id,
            bytes_downloaded,
            total_bytes,
            rate,
            status_tag,
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    struct CollectingSink {
        snapshots: StdMutex<Vec<ProgressSnapshot>>,
    }

    impl ProgressSink for CollectingSink {
        fn on_progress(&self, snapshot: ProgressSnapshot) {
            self.snapshots.lock().unwrap().push(snapshot);
        }
    }

    #[test]
    fn percent_and_eta_computed_from_totals() {
        let snapshot = ProgressSnapshot::new(Uuid::new_v4(), 50, Some(100), 10.0, "downloading");
        assert_eq!(snapshot.percent, Some(50.0));
        assert_eq!(snapshot.eta_seconds, Some(5.0));
    }

    #[test]
    fn percent_is_none_without_total() {
        let snapshot = ProgressSnapshot::new(Uuid::new_v4(), 50, None, 10.0, "downloading");
        assert_eq!(snapshot.percent, None);
    }

    #[test]
    fn throttle_drops_rapid_successive_reports() {
        let sink = Arc::new(CollectingSink {
            snapshots: StdMutex::new(Vec::new()),
        });
        let broadcaster = ProgressBroadcaster::new(sink.clone(), Duration::from_secs(60));
        let job_id = Uuid::new_v4();
        broadcaster.report(job_id, 10, Some(100));
        broadcaster.report(job_id, 20, Some(100));
        assert_eq!(sink.snapshots.lock().unwrap().len(), 1);
    }

    #[test]
    fn force_bypasses_throttle() {
        let sink = Arc::new(CollectingSink {
            snapshots: StdMutex::new(Vec::new()),
        });
        let broadcaster = ProgressBroadcaster::new(sink.clone(), Duration::from_secs(60));
        let job_id = Uuid::new_v4();
        broadcaster.report(job_id, 10, Some(100));
        broadcaster.force(job_id, 100, Some(100), "completed");
        assert_eq!(sink.snapshots.lock().unwrap().len(), 2);
    }
}
