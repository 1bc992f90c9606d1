//! Priority job queue, backed by SQLite.
//!
//! Grounded on the teacher's `queue/mod.rs`: an atomic
//! `UPDATE ... WHERE id = (SELECT ...) RETURNING *` claims the next job
//! without a round-trip race between workers, and status transitions are
//! recorded with `check_affected`-style row-count assertions so a
//! `JobNotFound` is distinguishable from a silent no-op.

pub mod error;

use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sqlx::Row;
use tracing::{info, instrument, warn};
use uuid::Uuid;

pub use error::{QueueDbErrorKind, QueueError};

use crate::db::Database;
use crate::job::{Job, JobStatus, MAX_PRIORITY};

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Aggregate counters, mirroring the `galion:queue:stats` hash.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct QueueStats {
    pub total_enqueued: i64,
    pub total_completed: i64,
    pub total_failed: i64,
    pub total_retried: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: String,
    url: String,
    fingerprint: String,
    platform_id: String,
    options: String,
    priority: i64,
    retry_count: i64,
    max_retries: i64,
    status: String,
    created_at: i64,
    started_at: Option<i64>,
    completed_at: Option<i64>,
    last_error: Option<String>,
    result_path: Option<String>,
    result_sha256: Option<String>,
    result_bytes: Option<i64>,
    bytes_downloaded: i64,
    total_bytes: Option<i64>,
}

impl JobRow {
    fn into_job(self) -> Result<Job, QueueError> {
        let status: JobStatus = self
            .status
            .parse()
            .map_err(|_| QueueError::Database {
                kind: QueueDbErrorKind::Other,
                message: format!("unrecognised status {:?} for job {}", self.status, self.id),
            })?;
        let options: HashMap<String, String> =
            serde_json::from_str(&self.options).unwrap_or_default();
        let id = self.id.parse().map_err(|_| QueueError::Database {
            kind: QueueDbErrorKind::Other,
            message: format!("malformed job id {:?}", self.id),
        })?;
        Ok(Job {
            id,
            url: self.url,
            fingerprint: self.fingerprint,
            platform_id: self.platform_id,
            options,
            priority: self.priority as u8,
            retry_count: self.retry_count as u32,
            max_retries: self.max_retries as u32,
            status,
            cancelled: status == JobStatus::Cancelled,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            last_error: self.last_error,
            result_path: self.result_path,
            result_sha256: self.result_sha256,
            result_bytes: self.result_bytes.map(|b| b as u64),
            bytes_downloaded: self.bytes_downloaded as u64,
            total_bytes: self.total_bytes.map(|b| b as u64),
        })
    }
}

/// Handle onto the persisted job queue. Cheap to clone (wraps a connection
/// pool) and safe to share across worker tasks.
#[derive(Clone)]
pub struct Queue {
    db: Database,
    fingerprint_ttl: Duration,
    job_ttl: Duration,
    completed_log_capacity: i64,
}

impl Queue {
    pub fn new(db: Database, fingerprint_ttl: Duration, job_ttl: Duration) -> Self {
        Self::with_completed_log_capacity(db, fingerprint_ttl, job_ttl, 1000)
    }

    pub fn with_completed_log_capacity(
        db: Database,
        fingerprint_ttl: Duration,
        job_ttl: Duration,
        completed_log_capacity: usize,
    ) -> Self {
        Self {
            db,
            fingerprint_ttl,
            job_ttl,
            completed_log_capacity: completed_log_capacity as i64,
        }
    }

    /// Flips the gate `dequeue` consults; advisory only (spec §4.4 pause
    /// semantics) — a worker already past its `dequeue()` call finishes the
    /// job it is holding. Persisted in the `stats` row rather than held
    /// in-process so a `pause` issued from one process (the CLI) takes
    /// effect for `dequeue()` callers running in another (the worker pool),
    /// both sharing this database file.
    #[instrument(skip(self))]
    pub async fn pause(&self) -> Result<(), QueueError> {
        sqlx::query("UPDATE stats SET paused = 1 WHERE id = 1")
            .execute(self.db.pool())
            .await?;
        info!("queue paused");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn resume(&self) -> Result<(), QueueError> {
        sqlx::query("UPDATE stats SET paused = 0 WHERE id = 1")
            .execute(self.db.pool())
            .await?;
        info!("queue resumed");
        Ok(())
    }

    pub async fn is_paused(&self) -> Result<bool, QueueError> {
        let row: (i64,) = sqlx::query_as("SELECT paused FROM stats WHERE id = 1")
            .fetch_one(self.db.pool())
            .await?;
        Ok(row.0 != 0)
    }

    /// Enqueues `job`. When `dedup` is `true`, an active (pending/processing)
    /// job with the same fingerprint causes `Ok(None)` to be returned and no
    /// row to be written (dedup exclusivity, spec §8); when `false`, the
    /// fingerprint check is skipped entirely and the job is always admitted,
    /// for callers that intentionally want duplicate submissions accepted.
    #[instrument(skip(self, job), fields(url = %job.url, fingerprint = %job.fingerprint, dedup))]
    pub async fn enqueue(&self, job: Job, dedup: bool) -> Result<Option<Uuid>, QueueError> {
        let mut tx = self.db.pool().begin().await?;

        if dedup {
            let existing: Option<(String,)> = sqlx::query_as(
                "SELECT j.id FROM jobs j
                 WHERE j.fingerprint = ?1 AND j.status IN ('pending', 'processing')
                 LIMIT 1",
            )
            .bind(&job.fingerprint)
            .fetch_optional(&mut *tx)
            .await?;

            if existing.is_some() {
                tx.rollback().await?;
                return Ok(None);
            }
        }

        let options = serde_json::to_string(&job.options).unwrap_or_else(|_| "{}".to_string());
        sqlx::query(
            "INSERT INTO jobs (id, url, fingerprint, platform_id, options, priority, retry_count,
                                max_retries, status, score, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        )
        .bind(job.id.to_string())
        .bind(&job.url)
        .bind(&job.fingerprint)
        .bind(&job.platform_id)
        .bind(&options)
        .bind(i64::from(job.priority))
        .bind(i64::from(job.retry_count))
        .bind(i64::from(job.max_retries))
        .bind(job.status.as_str())
        .bind(job.score())
        .bind(job.created_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO fingerprints (fingerprint, job_id, created_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(fingerprint) DO UPDATE SET job_id = excluded.job_id, created_at = excluded.created_at",
        )
        .bind(&job.fingerprint)
        .bind(job.id.to_string())
        .bind(job.created_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE stats SET total_enqueued = total_enqueued + 1 WHERE id = 1")
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        info!(job_id = %job.id, "job enqueued");
        Ok(Some(job.id))
    }

    /// Atomically claims the highest-score pending job and marks it
    /// `processing`. Returns `None` when the queue is empty.
    #[instrument(skip(self))]
    pub async fn dequeue(&self) -> Result<Option<Job>, QueueError> {
        if self.is_paused().await? {
            return Ok(None);
        }
        let now = now_unix();
        let row = sqlx::query_as::<_, JobRow>(
            "UPDATE jobs
             SET status = 'processing', started_at = ?1
             WHERE id = (
                 SELECT id FROM jobs
                 WHERE status = 'pending'
                 ORDER BY score ASC
                 LIMIT 1
             )
             RETURNING id, url, fingerprint, platform_id, options, priority, retry_count,
                       max_retries, status, created_at, started_at, completed_at, last_error,
                       result_path, result_sha256, result_bytes, bytes_downloaded, total_bytes",
        )
        .bind(now)
        .fetch_optional(self.db.pool())
        .await?;

        row.map(JobRow::into_job).transpose()
    }

    #[instrument(skip(self))]
    pub async fn get(&self, id: Uuid) -> Result<Job, QueueError> {
        let row = sqlx::query_as::<_, JobRow>(
            "SELECT id, url, fingerprint, platform_id, options, priority, retry_count,
                    max_retries, status, created_at, started_at, completed_at, last_error,
                    result_path, result_sha256, result_bytes, bytes_downloaded, total_bytes
             FROM jobs WHERE id = ?1",
        )
        .bind(id.to_string())
        .fetch_optional(self.db.pool())
        .await?
        .ok_or(QueueError::JobNotFound(id))?;
        row.into_job()
    }

    /// Records an in-progress byte count / size hint, throttled by the
    /// caller to the spec's ≤1/500ms cadence (the queue itself does not
    /// rate-limit writes; see [`crate::progress::ProgressBroadcaster`]).
    #[instrument(skip(self))]
    pub async fn update_progress(
        &self,
        id: Uuid,
        bytes_downloaded: u64,
        total_bytes: Option<u64>,
    ) -> Result<(), QueueError> {
        let affected = sqlx::query(
            "UPDATE jobs SET bytes_downloaded = ?1, total_bytes = ?2 WHERE id = ?3",
        )
        .bind(bytes_downloaded as i64)
        .bind(total_bytes.map(|b| b as i64))
        .bind(id.to_string())
        .execute(self.db.pool())
        .await?
        .rows_affected();

        if affected == 0 {
            return Err(QueueError::JobNotFound(id));
        }
        Ok(())
    }

    /// Marks `id` completed and appends to the capped completion log.
    ///
    /// Idempotent per spec §8: a job already in a terminal status (a
    /// duplicate `complete` racing a `cancel`, or simply called twice) is a
    /// no-op rather than re-applying the completion and double-counting
    /// stats, so only a job still `processing` is transitioned here.
    #[instrument(skip(self))]
    pub async fn complete(
        &self,
        id: Uuid,
        result_path: &str,
        result_sha256: &str,
        result_bytes: u64,
    ) -> Result<(), QueueError> {
        let now = now_unix();
        let mut tx = self.db.pool().begin().await?;

        let affected = sqlx::query(
            "UPDATE jobs
             SET status = 'completed', completed_at = ?1, result_path = ?2, result_sha256 = ?3,
                 result_bytes = ?4
             WHERE id = ?5 AND status = 'processing'",
        )
        .bind(now)
        .bind(result_path)
        .bind(result_sha256)
        .bind(result_bytes as i64)
        .bind(id.to_string())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if affected == 0 {
            tx.rollback().await?;
            // Confirms the job exists (a genuinely unknown id still errors)
            // but otherwise treats an already-terminal job as idempotent.
            self.get(id).await?;
            return Ok(());
        }

        let job = self.get(id).await?;
        sqlx::query(
            "INSERT INTO completed_log (job_id, url, platform_id, result_path, result_bytes, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(id.to_string())
        .bind(&job.url)
        .bind(&job.platform_id)
        .bind(result_path)
        .bind(result_bytes as i64)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE stats SET total_completed = total_completed + 1 WHERE id = 1")
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        self.trim_completed_log().await?;
        Ok(())
    }

    async fn trim_completed_log(&self) -> Result<(), QueueError> {
        sqlx::query(
            "DELETE FROM completed_log WHERE id NOT IN (
                 SELECT id FROM completed_log ORDER BY id DESC LIMIT ?1
             )",
        )
        .bind(self.completed_log_capacity)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    /// Applies the spec's retry policy: if `retry` is true and attempts
    /// remain, decrements priority by one (floor 0), bumps `retry_count`,
    /// and re-enqueues as `pending` with a fresh score; otherwise marks the
    /// job `failed_permanent` and appends to the dead-letter log.
    ///
    /// A job no longer `processing` (already terminal, e.g. raced by a
    /// `cancel`) is left untouched and its current status is returned
    /// unchanged, matching the same idempotence guarantee as [`Self::complete`].
    #[instrument(skip(self, error))]
    pub async fn fail(&self, id: Uuid, error: &str, retry: bool) -> Result<JobStatus, QueueError> {
        let job = self.get(id).await?;
        if job.status != JobStatus::Processing {
            return Ok(job.status);
        }
        let now = now_unix();

        if retry && job.retry_count < job.max_retries {
            let new_priority = job.priority.saturating_sub(1);
            let new_retry_count = job.retry_count + 1;
            let mut retried = job.clone();
            retried.priority = new_priority;
            retried.retry_count = new_retry_count;
            retried.created_at = now;
            let new_score = retried.score();

            sqlx::query(
                "UPDATE jobs
                 SET status = 'pending', priority = ?1, retry_count = ?2, last_error = ?3,
                     score = ?4, started_at = NULL
                 WHERE id = ?5 AND status = 'processing'",
            )
            .bind(i64::from(new_priority))
            .bind(i64::from(new_retry_count))
            .bind(error)
            .bind(new_score)
            .bind(id.to_string())
            .execute(self.db.pool())
            .await?;

            sqlx::query("UPDATE stats SET total_retried = total_retried + 1 WHERE id = 1")
                .execute(self.db.pool())
                .await?;

            warn!(job_id = %id, retry_count = new_retry_count, "job requeued after failure");
            return Ok(JobStatus::Pending);
        }

        let mut tx = self.db.pool().begin().await?;
        sqlx::query(
            "UPDATE jobs SET status = 'failed_permanent', completed_at = ?1, last_error = ?2
             WHERE id = ?3 AND status = 'processing'",
        )
        .bind(now)
        .bind(error)
        .bind(id.to_string())
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO failed_log (job_id, url, platform_id, error, retry_count, failed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(id.to_string())
        .bind(&job.url)
        .bind(&job.platform_id)
        .bind(error)
        .bind(i64::from(job.retry_count))
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE stats SET total_failed = total_failed + 1 WHERE id = 1")
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        warn!(job_id = %id, "job failed permanently");
        Ok(JobStatus::FailedPermanent)
    }

    /// Marks a pending or processing job cancelled; has no effect on an
    /// already-terminal job.
    #[instrument(skip(self))]
    pub async fn cancel(&self, id: Uuid) -> Result<(), QueueError> {
        let affected = sqlx::query(
            "UPDATE jobs SET status = 'cancelled', completed_at = ?1
             WHERE id = ?2 AND status IN ('pending', 'processing')",
        )
        .bind(now_unix())
        .bind(id.to_string())
        .execute(self.db.pool())
        .await?
        .rows_affected();

        if affected == 0 {
            let job = self.get(id).await?;
            if job.status.is_terminal() {
                return Err(QueueError::AlreadyTerminal {
                    job_id: id,
                    status: job.status.to_string(),
                });
            }
        }
        Ok(())
    }

    pub async fn list_by_status(&self, status: JobStatus) -> Result<Vec<Job>, QueueError> {
        let rows = sqlx::query_as::<_, JobRow>(
            "SELECT id, url, fingerprint, platform_id, options, priority, retry_count,
                    max_retries, status, created_at, started_at, completed_at, last_error,
                    result_path, result_sha256, result_bytes, bytes_downloaded, total_bytes
             FROM jobs WHERE status = ?1 ORDER BY score ASC",
        )
        .bind(status.as_str())
        .fetch_all(self.db.pool())
        .await?;
        rows.into_iter().map(JobRow::into_job).collect()
    }

    pub async fn stats(&self) -> Result<QueueStats, QueueError> {
        let row = sqlx::query(
            "SELECT total_enqueued, total_completed, total_failed, total_retried FROM stats WHERE id = 1",
        )
        .fetch_one(self.db.pool())
        .await?;
        Ok(QueueStats {
            total_enqueued: row.try_get("total_enqueued")?,
            total_completed: row.try_get("total_completed")?,
            total_failed: row.try_get("total_failed")?,
            total_retried: row.try_get("total_retried")?,
        })
    }

    /// Empties the capped completion log, returning the number of rows
    /// cleared. Does not touch `jobs` rows themselves or the stats
    /// counters — only the recency log spec §4.4 caps at 1000.
    #[instrument(skip(self))]
    pub async fn clear_completed(&self) -> Result<u64, QueueError> {
        let affected = sqlx::query("DELETE FROM completed_log")
            .execute(self.db.pool())
            .await?
            .rows_affected();
        Ok(affected)
    }

    /// Moves `processing` jobs whose `started_at` predates `stale_after`
    /// back to `pending`, for recovery after a worker crash mid-job.
    #[instrument(skip(self))]
    pub async fn reap_stale(&self, stale_after: Duration) -> Result<u64, QueueError> {
        let threshold = now_unix() - stale_after.as_secs() as i64;
        let affected = sqlx::query(
            "UPDATE jobs SET status = 'pending', started_at = NULL
             WHERE status = 'processing' AND started_at IS NOT NULL AND started_at < ?1",
        )
        .bind(threshold)
        .execute(self.db.pool())
        .await?
        .rows_affected();
        if affected > 0 {
            warn!(count = affected, "reaped stale processing jobs back to pending");
        }
        Ok(affected)
    }

    /// Sweeps terminal jobs and dedup fingerprints older than their
    /// configured TTL.
    #[instrument(skip(self))]
    pub async fn sweep_expired(&self) -> Result<(), QueueError> {
        let job_threshold = now_unix() - self.job_ttl.as_secs() as i64;
        sqlx::query(
            "DELETE FROM jobs
             WHERE status IN ('completed', 'failed_permanent', 'cancelled')
               AND completed_at IS NOT NULL AND completed_at < ?1",
        )
        .bind(job_threshold)
        .execute(self.db.pool())
        .await?;

        let fingerprint_threshold = now_unix() - self.fingerprint_ttl.as_secs() as i64;
        sqlx::query("DELETE FROM fingerprints WHERE created_at < ?1")
            .bind(fingerprint_threshold)
            .execute(self.db.pool())
            .await?;

        Ok(())
    }

    /// Spawns a background task that periodically calls [`Self::reap_stale`]
    /// and [`Self::sweep_expired`]. Returns a handle the caller can abort on
    /// shutdown.
    pub fn spawn_reaper(
        &self,
        interval: Duration,
        stale_after: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let queue = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Err(err) = queue.reap_stale(stale_after).await {
                    warn!(error = %err, "reaper: reap_stale failed");
                }
                if let Err(err) = queue.sweep_expired().await {
                    warn!(error = %err, "reaper: sweep_expired failed");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    async fn test_queue() -> Queue {
        let db = Database::new_in_memory().await.unwrap();
        Queue::new(db, Duration::from_secs(7 * 24 * 3600), Duration::from_secs(7 * 24 * 3600))
    }

    fn job(url: &str, priority: u8) -> Job {
        Job::new(url, "generic", HashMap::new(), priority, 3, now_unix())
    }

    #[tokio::test]
    async fn enqueue_then_dequeue_roundtrips() {
        let queue = test_queue().await;
        let id = queue.enqueue(job("https://example.com/a", 5), true).await.unwrap().unwrap();
        let dequeued = queue.dequeue().await.unwrap().unwrap();
        assert_eq!(dequeued.id, id);
        assert_eq!(dequeued.status, JobStatus::Processing);
    }

    #[tokio::test]
    async fn dequeue_on_empty_queue_returns_none() {
        let queue = test_queue().await;
        assert!(queue.dequeue().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_active_fingerprint_is_rejected() {
        let queue = test_queue().await;
        queue.enqueue(job("https://example.com/dup", 5), true).await.unwrap().unwrap();
        let second = queue.enqueue(job("https://example.com/dup", 5), true).await.unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn duplicate_fingerprint_admitted_when_dedup_disabled() {
        let queue = test_queue().await;
        queue.enqueue(job("https://example.com/dup", 5), false).await.unwrap().unwrap();
        let second = queue.enqueue(job("https://example.com/dup", 5), false).await.unwrap();
        assert!(second.is_some());
    }

    #[tokio::test]
    async fn higher_priority_dequeues_first() {
        let queue = test_queue().await;
        queue.enqueue(job("https://example.com/low", 1), true).await.unwrap();
        queue.enqueue(job("https://example.com/high", 9), true).await.unwrap();
        let first = queue.dequeue().await.unwrap().unwrap();
        assert_eq!(first.url, "https://example.com/high");
    }

    #[tokio::test]
    async fn fifo_within_same_priority() {
        let queue = test_queue().await;
        queue.enqueue(job("https://example.com/first", 5), true).await.unwrap();
        queue.enqueue(job("https://example.com/second", 5), true).await.unwrap();
        let first = queue.dequeue().await.unwrap().unwrap();
        assert_eq!(first.url, "https://example.com/first");
    }

    #[tokio::test]
    async fn complete_appends_to_completed_log_and_stats() {
        let queue = test_queue().await;
        let id = queue.enqueue(job("https://example.com/ok", 5), true).await.unwrap().unwrap();
        queue.dequeue().await.unwrap();
        queue.complete(id, "/tmp/ok", "deadbeef", 1024).await.unwrap();
        let fetched = queue.get(id).await.unwrap();
        assert_eq!(fetched.status, JobStatus::Completed);
        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.total_completed, 1);
    }

    #[tokio::test]
    async fn complete_called_twice_is_a_no_op() {
        let queue = test_queue().await;
        let id = queue.enqueue(job("https://example.com/twice", 5), true).await.unwrap().unwrap();
        queue.dequeue().await.unwrap();
        queue.complete(id, "/tmp/a", "deadbeef", 10).await.unwrap();
        queue.complete(id, "/tmp/b", "cafef00d", 20).await.unwrap();

        let fetched = queue.get(id).await.unwrap();
        assert_eq!(fetched.result_path, Some("/tmp/a".to_string()));
        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.total_completed, 1);
    }

    #[tokio::test]
    async fn complete_after_cancel_is_a_no_op() {
        let queue = test_queue().await;
        let id = queue.enqueue(job("https://example.com/race", 5), true).await.unwrap().unwrap();
        queue.dequeue().await.unwrap();
        queue.cancel(id).await.unwrap();
        queue.complete(id, "/tmp/a", "deadbeef", 10).await.unwrap();

        let fetched = queue.get(id).await.unwrap();
        assert_eq!(fetched.status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn fail_after_complete_leaves_job_completed() {
        let queue = test_queue().await;
        let id = queue.enqueue(job("https://example.com/done-then-fail", 5), true).await.unwrap().unwrap();
        queue.dequeue().await.unwrap();
        queue.complete(id, "/tmp/a", "deadbeef", 10).await.unwrap();

        let status = queue.fail(id, "too late", true).await.unwrap();
        assert_eq!(status, JobStatus::Completed);
        let fetched = queue.get(id).await.unwrap();
        assert_eq!(fetched.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn fail_with_retries_remaining_requeues_with_lower_priority() {
        let queue = test_queue().await;
        let id = queue.enqueue(job("https://example.com/retry", 5), true).await.unwrap().unwrap();
        queue.dequeue().await.unwrap();
        let status = queue.fail(id, "timeout", true).await.unwrap();
        assert_eq!(status, JobStatus::Pending);
        let fetched = queue.get(id).await.unwrap();
        assert_eq!(fetched.priority, 4);
        assert_eq!(fetched.retry_count, 1);
    }

    #[tokio::test]
    async fn fail_exhausted_retries_marks_permanent_and_dead_letters() {
        let queue = test_queue().await;
        let id = queue.enqueue(job("https://example.com/exhaust", 5), true).await.unwrap().unwrap();
        for _ in 0..3 {
            queue.dequeue().await.unwrap();
            queue.fail(id, "boom", true).await.unwrap();
        }
        queue.dequeue().await.unwrap();
        let status = queue.fail(id, "boom again", true).await.unwrap();
        assert_eq!(status, JobStatus::FailedPermanent);
        let fetched = queue.get(id).await.unwrap();
        assert_eq!(fetched.retry_count, fetched.max_retries);
    }

    #[tokio::test]
    async fn cancel_pending_job_marks_cancelled() {
        let queue = test_queue().await;
        let id = queue.enqueue(job("https://example.com/cancel", 5), true).await.unwrap().unwrap();
        queue.cancel(id).await.unwrap();
        let fetched = queue.get(id).await.unwrap();
        assert_eq!(fetched.status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn cancel_completed_job_errors() {
        let queue = test_queue().await;
        let id = queue.enqueue(job("https://example.com/done", 5), true).await.unwrap().unwrap();
        queue.dequeue().await.unwrap();
        queue.complete(id, "/tmp/done", "abc", 10).await.unwrap();
        let result = queue.cancel(id).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn reap_stale_moves_processing_back_to_pending() {
        let queue = test_queue().await;
        let id = queue.enqueue(job("https://example.com/stuck", 5), true).await.unwrap().unwrap();
        queue.dequeue().await.unwrap();
        sqlx::query("UPDATE jobs SET started_at = 0 WHERE id = ?1")
            .bind(id.to_string())
            .execute(queue.db.pool())
            .await
            .unwrap();
        let reaped = queue.reap_stale(Duration::from_secs(1)).await.unwrap();
        assert_eq!(reaped, 1);
        let fetched = queue.get(id).await.unwrap();
        assert_eq!(fetched.status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn paused_queue_dequeues_nothing() {
        let queue = test_queue().await;
        queue.enqueue(job("https://example.com/paused", 5), true).await.unwrap();
        queue.pause().await.unwrap();
        assert!(queue.is_paused().await.unwrap());
        assert!(queue.dequeue().await.unwrap().is_none());
        queue.resume().await.unwrap();
        assert!(!queue.is_paused().await.unwrap());
        assert!(queue.dequeue().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn clear_completed_empties_the_log_and_returns_count() {
        let queue = test_queue().await;
        let id = queue.enqueue(job("https://example.com/cleared", 5), true).await.unwrap().unwrap();
        queue.dequeue().await.unwrap();
        queue.complete(id, "/tmp/cleared", "deadbeef", 10).await.unwrap();

        let cleared = queue.clear_completed().await.unwrap();
        assert_eq!(cleared, 1);
        let cleared_again = queue.clear_completed().await.unwrap();
        assert_eq!(cleared_again, 0);
    }

    #[tokio::test]
    async fn completed_log_is_trimmed_to_configured_capacity() {
        let db = Database::new_in_memory().await.unwrap();
        let queue = Queue::with_completed_log_capacity(
            db,
            Duration::from_secs(3600),
            Duration::from_secs(3600),
            2,
        );
        for i in 0..5 {
            let id = queue
                .enqueue(job(&format!("https://example.com/cap-{i}"), 5), true)
                .await
                .unwrap()
                .unwrap();
            queue.dequeue().await.unwrap();
            queue.complete(id, "/tmp/cap", "deadbeef", 1).await.unwrap();
        }
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM completed_log")
            .fetch_one(queue.db.pool())
            .await
            .unwrap();
        assert_eq!(row.0, 2);
    }

    #[tokio::test]
    async fn update_progress_on_unknown_job_errors() {
        let queue = test_queue().await;
        let result = queue.update_progress(Uuid::new_v4(), 10, Some(100)).await;
        assert!(result.is_err());
    }
}
