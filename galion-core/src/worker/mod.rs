//! Worker Pool: a set of tasks that dequeue jobs, route them to a platform
//! handler, and report outcomes back to the Queue Manager.
//!
//! Grounded on the teacher's `DownloadEngine::process_queue_interruptible_with_options`:
//! each worker races an idle-sleep loop against a stop signal via
//! `tokio::select!`, and the pool-wide shutdown gives running workers a
//! bounded grace period before the task is aborted outright.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::download::engine::DownloadEngine;
use crate::progress::{ProgressBroadcaster, ProgressSink, ProgressSnapshot};
use crate::queue::Queue;
use crate::router::{HandlerContext, PlatformRegistry};
use crate::sinks::{CredentialStore, JobStateMirror};

const IDLE_POLL_INTERVAL: Duration = Duration::from_secs(1);
const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Per-worker counters surfaced by [`WorkerPool::health`].
#[derive(Debug, Default)]
pub struct WorkerHealth {
    pub jobs_completed: AtomicU64,
    pub jobs_failed: AtomicU64,
    pub current_job_id: RwLock<Option<Uuid>>,
}

struct Worker {
    stop: Arc<AtomicBool>,
    handle: tokio::task::JoinHandle<()>,
    health: Arc<WorkerHealth>,
}

/// Shared collaborators every worker needs; cheap to clone (everything
/// inside is already an `Arc` or a cheaply-cloneable handle).
#[derive(Clone)]
pub struct WorkerDeps {
    pub queue: Queue,
    pub registry: Arc<PlatformRegistry>,
    pub engine: Arc<DownloadEngine>,
    pub credentials: Arc<dyn CredentialStore>,
    pub mirror: Arc<dyn JobStateMirror>,
    pub output_root: std::path::PathBuf,
    pub progress_sink: Arc<dyn crate::progress::ProgressSink>,
    pub progress_min_interval: Duration,
}

/// Manages a dynamically-sized set of download workers.
pub struct WorkerPool {
    deps: WorkerDeps,
    workers: Vec<Worker>,
}

impl WorkerPool {
    pub fn new(deps: WorkerDeps) -> Self {
        Self {
            deps,
            workers: Vec::new(),
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Resizes the pool to exactly `target` workers: spawns new ones or
    /// stops the excess. A stopped worker finishes its current job before
    /// exiting (spec §4.5 Cancellation semantics for `scale`).
    #[instrument(skip(self))]
    pub fn scale(&mut self, target: usize) {
        while self.workers.len() < target {
            self.spawn_one();
        }
        while self.workers.len() > target {
            if let Some(worker) = self.workers.pop() {
                worker.stop.store(true, Ordering::SeqCst);
            }
        }
    }

    fn spawn_one(&mut self) {
        let stop = Arc::new(AtomicBool::new(false));
        let health = Arc::new(WorkerHealth::default());
        let deps = self.deps.clone();
        let worker_stop = stop.clone();
        let worker_health = health.clone();

        let handle = tokio::spawn(async move {
            worker_loop(deps, worker_stop, worker_health).await;
        });

        self.workers.push(Worker { stop, handle, health });
    }

    pub fn health(&self) -> Vec<(usize, u64, u64, Option<Uuid>)> {
        self.workers
            .iter()
            .enumerate()
            .map(|(i, w)| {
                let completed = w.health.jobs_completed.load(Ordering::Relaxed);
                let failed = w.health.jobs_failed.load(Ordering::Relaxed);
                let current = w.health.current_job_id.try_read().ok().and_then(|g| *g);
                (i, completed, failed, current)
            })
            .collect()
    }

    /// Stops every worker immediately: signals `stop`, waits up to
    /// [`SHUTDOWN_GRACE_PERIOD`] for in-flight jobs to finish, then aborts
    /// any handle still running.
    #[instrument(skip(self))]
    pub async fn shutdown(mut self) {
        for worker in &self.workers {
            worker.stop.store(true, Ordering::SeqCst);
        }

        let deadline = tokio::time::Instant::now() + SHUTDOWN_GRACE_PERIOD;
        for worker in std::mem::take(&mut self.workers) {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match tokio::time::timeout(remaining, worker.handle).await {
                Ok(_) => {}
                Err(_) => warn!("worker did not stop within grace period, continuing shutdown"),
            }
        }
        info!("worker pool shut down");
    }
}

/// Composes the external [`ProgressSink`] with a write-back to the Queue
/// Manager's persisted `bytes_downloaded`/`total_bytes` columns, per spec
/// §4.5 step 5: the worker's sink fans out to both collaborators. Queue
/// writes are spawned rather than awaited inline so a slow store round
/// trip never adds latency to the hot chunk-read loop.
struct QueuePersistingSink {
    queue: Queue,
    job_id: Uuid,
    inner: Arc<dyn ProgressSink>,
}

impl ProgressSink for QueuePersistingSink {
    fn on_progress(&self, snapshot: ProgressSnapshot) {
        self.inner.on_progress(snapshot.clone());
        let queue = self.queue.clone();
        let job_id = self.job_id;
        tokio::spawn(async move {
            if let Err(err) = queue
                .update_progress(job_id, snapshot.bytes_downloaded, snapshot.total_bytes)
                .await
            {
                warn!(job_id = %job_id, error = %err, "failed to persist progress update");
            }
        });
    }
}

async fn worker_loop(deps: WorkerDeps, stop: Arc<AtomicBool>, health: Arc<WorkerHealth>) {
    loop {
        if stop.load(Ordering::SeqCst) {
            return;
        }

        let job = match deps.queue.dequeue().await {
            Ok(Some(job)) => job,
            Ok(None) => {
                tokio::time::sleep(IDLE_POLL_INTERVAL).await;
                continue;
            }
            Err(err) => {
                warn!(error = %err, "worker failed to dequeue, backing off");
                tokio::time::sleep(IDLE_POLL_INTERVAL).await;
                continue;
            }
        };

        *health.current_job_id.write().await = Some(job.id);

        let handler = match deps.registry.route(&job.url) {
            Some(handler) => handler,
            None => {
                warn!(job_id = %job.id, "router found no handler, even the fallback");
                let _ = deps
                    .queue
                    .fail(job.id, "no platform handler matched this URL", false)
                    .await;
                health.jobs_failed.fetch_add(1, Ordering::Relaxed);
                *health.current_job_id.write().await = None;
                continue;
            }
        };

        let composed_sink: Arc<dyn ProgressSink> = Arc::new(QueuePersistingSink {
            queue: deps.queue.clone(),
            job_id: job.id,
            inner: deps.progress_sink.clone(),
        });
        let broadcaster = ProgressBroadcaster::new(composed_sink, deps.progress_min_interval);
        let ctx = HandlerContext {
            engine: &deps.engine,
            progress: &broadcaster,
            credentials: deps.credentials.as_ref(),
            output_root: &deps.output_root,
        };

        let result = handler.download(job.id, &job.url, &job.options, &ctx).await;

        match result {
            Ok(outcome) => {
                if let Err(err) = deps
                    .queue
                    .complete(
                        job.id,
                        &outcome.path.display().to_string(),
                        &outcome.sha256,
                        outcome.bytes,
                    )
                    .await
                {
                    warn!(job_id = %job.id, error = %err, "failed to persist completion");
                }
                let mut completed_job = job.clone();
                completed_job.result_path = Some(outcome.path.display().to_string());
                deps.mirror.on_job_completed(&completed_job).await;
                health.jobs_completed.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                let retryable = !matches!(
                    crate::download::engine::classify_error(&err),
                    crate::download::retry::FailureType::Permanent
                        | crate::download::retry::FailureType::NeedsAuth
                );
                if let Err(queue_err) = deps.queue.fail(job.id, &err.to_string(), retryable).await {
                    warn!(job_id = %job.id, error = %queue_err, "failed to record job failure");
                }
                let mut failed_job = job.clone();
                failed_job.last_error = Some(err.to_string());
                deps.mirror.on_job_failed(&failed_job).await;
                health.jobs_failed.fetch_add(1, Ordering::Relaxed);
            }
        }

        *health.current_job_id.write().await = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::download::rate_limiter::RateLimiter;
    use crate::download::retry::RetryPolicy;
    use crate::progress::NullProgressSink;
    use crate::router::PlatformRegistry;
    use crate::sinks::{EphemeralCredentialStore, NullJobStateMirror};
    use std::time::Duration;

    async fn test_deps() -> WorkerDeps {
        let db = Database::new_in_memory().await.unwrap();
        let queue = Queue::new(db, Duration::from_secs(3600), Duration::from_secs(3600));
        let registry = Arc::new(PlatformRegistry::new());
        let engine = Arc::new(DownloadEngine::new(
            RetryPolicy::new(),
            Arc::new(RateLimiter::disabled()),
        ));
        WorkerDeps {
            queue,
            registry,
            engine,
            credentials: Arc::new(EphemeralCredentialStore::default()),
            mirror: Arc::new(NullJobStateMirror),
            output_root: std::env::temp_dir(),
            progress_sink: Arc::new(NullProgressSink),
            progress_min_interval: Duration::from_millis(500),
        }
    }

    #[tokio::test]
    async fn scale_up_spawns_workers() {
        let deps = test_deps().await;
        let mut pool = WorkerPool::new(deps);
        pool.scale(3);
        assert_eq!(pool.worker_count(), 3);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn scale_down_signals_stop_without_immediate_removal_panic() {
        let deps = test_deps().await;
        let mut pool = WorkerPool::new(deps);
        pool.scale(3);
        pool.scale(1);
        assert_eq!(pool.worker_count(), 1);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn health_reports_one_entry_per_worker() {
        let deps = test_deps().await;
        let mut pool = WorkerPool::new(deps);
        pool.scale(2);
        assert_eq!(pool.health().len(), 2);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn job_with_no_matching_handler_is_failed_permanently() {
        let deps = test_deps().await;
        let job = crate::job::Job::new(
            "https://example.com/a",
            "generic",
            std::collections::HashMap::new(),
            5,
            3,
            0,
        );
        deps.queue.enqueue(job.clone(), true).await.unwrap();

        let mut pool = WorkerPool::new(deps.clone());
        pool.scale(1);
        tokio::time::sleep(Duration::from_millis(200)).await;
        pool.shutdown().await;

        let fetched = deps.queue.get(job.id).await.unwrap();
        assert_eq!(fetched.status, crate::job::JobStatus::FailedPermanent);
    }

    #[tokio::test]
    async fn progress_sink_writes_back_to_queue() {
        let deps = test_deps().await;
        let job = crate::job::Job::new(
            "https://example.com/progress",
            "generic",
            std::collections::HashMap::new(),
            5,
            3,
            0,
        );
        deps.queue.enqueue(job.clone(), true).await.unwrap();
        deps.queue.dequeue().await.unwrap();

        let sink = QueuePersistingSink {
            queue: deps.queue.clone(),
            job_id: job.id,
            inner: Arc::new(NullProgressSink),
        };
        sink.on_progress(ProgressSnapshot::new(job.id, 512, Some(1024), 100.0, "downloading"));

        // the write-back is spawned, not awaited inline; give it a tick.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let fetched = deps.queue.get(job.id).await.unwrap();
        assert_eq!(fetched.progress_percent(), Some(50.0));
    }
}
