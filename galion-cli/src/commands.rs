//! Implementations of each CLI subcommand.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use galion_core::{
    build_default_registry, Config, Database, DownloadEngine, EphemeralCredentialStore, Job,
    JobStatus, NullJobStateMirror, Queue, RateLimiter, RetryPolicy, WorkerDeps, WorkerPool,
};
use tracing::info;

use crate::cli::{CancelArgs, EnqueueArgs, RunArgs, StatusArgs};
use crate::progress_ui::IndicatifSink;

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

async fn open_queue(config: &Config) -> Result<Queue> {
    let db = Database::new(&config.database_path)
        .await
        .with_context(|| format!("failed to open database at {}", config.database_path.display()))?;
    Ok(Queue::with_completed_log_capacity(
        db,
        config.fingerprint_ttl,
        config.job_ttl,
        config.completed_log_capacity,
    ))
}

pub async fn enqueue(config: &Config, args: EnqueueArgs) -> Result<()> {
    let queue = open_queue(config).await?;
    let options: HashMap<String, String> = args.options.into_iter().collect();

    // Classify up front (spec §2: the Router runs before the Queue Manager
    // admits the job) so the stored record carries its real platform id
    // rather than a placeholder the worker has to re-derive later.
    let extractor_bin = config.external_extractor_path.display().to_string();
    let registry = build_default_registry(&extractor_bin);
    let route = registry.classify(&args.url);

    let job = Job::new(
        &args.url,
        &route.platform_id,
        options,
        args.priority.min(galion_core::MAX_PRIORITY),
        args.max_retries.unwrap_or(config.default_max_retries),
        now_unix(),
    );

    match queue.enqueue(job.clone(), !args.no_dedup).await? {
        Some(id) => println!("enqueued {id}"),
        None => println!("skipped: an active job for this URL is already queued"),
    }
    Ok(())
}

pub async fn run(config: &Config, args: RunArgs) -> Result<()> {
    let queue = open_queue(config).await?;
    let reaper = queue.spawn_reaper(config.reaper_interval, config.stale_after);

    let extractor_bin = config.external_extractor_path.display().to_string();
    let registry = Arc::new(build_default_registry(&extractor_bin));

    // Each platform's own descriptor carries a sensible default budget;
    // an entry in `rate_limit_overrides` (config, spec §6) takes
    // precedence over it.
    let rate_limiter = RateLimiter::from_rpm(config.rate_limit_default_rpm);
    for descriptor in registry.descriptors() {
        let rpm = config
            .rate_limit_overrides
            .get(descriptor.id)
            .copied()
            .unwrap_or(descriptor.requests_per_minute);
        rate_limiter.set_override(descriptor.id, rpm);
    }
    let engine = Arc::new(DownloadEngine::new(RetryPolicy::new(), Arc::new(rate_limiter)));
    let credentials = Arc::new(EphemeralCredentialStore::default());
    let progress_sink = Arc::new(IndicatifSink::new());

    let deps = WorkerDeps {
        queue: queue.clone(),
        registry,
        engine,
        credentials,
        mirror: Arc::new(NullJobStateMirror),
        output_root: config.download_root.clone(),
        progress_sink,
        progress_min_interval: config.progress_min_interval,
    };

    let worker_count = args.workers.unwrap_or(config.worker_count);
    let mut pool = WorkerPool::new(deps);
    pool.scale(worker_count);
    info!(worker_count, "workers started");

    if args.once {
        loop {
            tokio::time::sleep(std::time::Duration::from_millis(300)).await;
            let pending = queue.list_by_status(JobStatus::Pending).await?;
            let processing = queue.list_by_status(JobStatus::Processing).await?;
            if pending.is_empty() && processing.is_empty() {
                break;
            }
        }
    } else {
        tokio::signal::ctrl_c().await.ok();
    }

    pool.shutdown().await;
    reaper.abort();
    Ok(())
}

pub async fn status(config: &Config, args: StatusArgs) -> Result<()> {
    let queue = open_queue(config).await?;
    if let Some(id) = args.id {
        let job = queue.get(id).await?;
        println!("{id} {:?} priority={} retries={}/{}", job.status, job.priority, job.retry_count, job.max_retries);
        if let Some(error) = &job.last_error {
            println!("  last_error: {error}");
        }
        return Ok(());
    }

    let stats = queue.stats().await?;
    println!(
        "enqueued={} completed={} failed={} retried={}",
        stats.total_enqueued, stats.total_completed, stats.total_failed, stats.total_retried
    );
    for status in [JobStatus::Pending, JobStatus::Processing] {
        let jobs = queue.list_by_status(status).await?;
        println!("{status}: {}", jobs.len());
    }
    Ok(())
}

pub async fn cancel(config: &Config, args: CancelArgs) -> Result<()> {
    let queue = open_queue(config).await?;
    queue.cancel(args.id).await?;
    println!("cancelled {}", args.id);
    Ok(())
}

pub async fn pause(config: &Config) -> Result<()> {
    let queue = open_queue(config).await?;
    queue.pause().await?;
    println!("queue paused");
    Ok(())
}

pub async fn resume(config: &Config) -> Result<()> {
    let queue = open_queue(config).await?;
    queue.resume().await?;
    println!("queue resumed");
    Ok(())
}

pub async fn clear_completed(config: &Config) -> Result<()> {
    let queue = open_queue(config).await?;
    let cleared = queue.clear_completed().await?;
    println!("cleared {cleared} completed job(s)");
    Ok(())
}

pub fn platforms(config: &Config) -> Result<()> {
    let extractor_bin = config.external_extractor_path.display().to_string();
    let registry = build_default_registry(&extractor_bin);
    for descriptor in registry.descriptors() {
        println!(
            "{:<16} {:<22} category={:<8} rpm={:<4} credential={} quality={} subtitles={} playlists={} channels={}",
            descriptor.id,
            descriptor.display_name,
            descriptor.category,
            config.rate_limit_for(descriptor.id),
            descriptor.requires_credential,
            descriptor.supports_quality,
            descriptor.supports_subtitles,
            descriptor.supports_playlists,
            descriptor.supports_channels,
        );
    }
    Ok(())
}

pub fn config_show(config: &Config) -> Result<()> {
    let rendered = toml::to_string_pretty(config).context("failed to render configuration")?;
    println!("{rendered}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn enqueue_then_status_reports_pending_count() {
        let config = Config::default();
        let db = Database::new_in_memory().await.unwrap();
        let queue = Queue::new(db, config.fingerprint_ttl, config.job_ttl);
        let id = queue
            .enqueue(
                Job::new("https://example.com/a", "auto", HashMap::new(), 5, 3, now_unix()),
                true,
            )
            .await
            .unwrap()
            .unwrap();
        let job = queue.get(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Pending);
    }
}
