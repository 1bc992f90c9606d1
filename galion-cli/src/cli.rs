//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "galion", version, about = "Multi-platform content acquisition orchestrator")]
pub struct Cli {
    /// Path to a TOML config file (defaults to $XDG_CONFIG_HOME/galion/config.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Disable ANSI color in log output.
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Add a URL to the download queue.
    Enqueue(EnqueueArgs),
    /// Start workers and drain the queue until it is empty, then exit.
    Run(RunArgs),
    /// Show queue statistics and job status.
    Status(StatusArgs),
    /// Cancel a queued or in-flight job.
    Cancel(CancelArgs),
    /// Stop admitting new dequeues; in-flight jobs finish normally.
    Pause,
    /// Resume dequeuing after a `pause`.
    Resume,
    /// Empty the capped completed-jobs log.
    ClearCompleted,
    /// List registered platform handlers and their capabilities.
    Platforms,
    /// Inspect effective configuration.
    Config(ConfigArgs),
}

#[derive(Debug, Parser)]
pub struct EnqueueArgs {
    /// URL to download.
    pub url: String,

    /// Priority from 0 (lowest) to 10 (highest). Defaults to 5.
    #[arg(long, default_value_t = 5)]
    pub priority: u8,

    /// Maximum automatic retry attempts for this job.
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Extra handler option as `key=value`; may be repeated.
    #[arg(long = "option", value_parser = parse_key_value)]
    pub options: Vec<(String, String)>,

    /// Admit this job even if an active job for the same URL is already
    /// queued, instead of the default dedup-by-fingerprint behaviour.
    #[arg(long = "no-dedup")]
    pub no_dedup: bool,
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))
}

#[derive(Debug, Parser)]
pub struct RunArgs {
    /// Number of concurrent workers.
    #[arg(long, short = 'n')]
    pub workers: Option<usize>,

    /// Exit once the queue is empty instead of waiting for more jobs.
    #[arg(long)]
    pub once: bool,
}

#[derive(Debug, Parser)]
pub struct StatusArgs {
    /// Show a single job by id instead of queue-wide statistics.
    #[arg(long)]
    pub id: Option<uuid::Uuid>,
}

#[derive(Debug, Parser)]
pub struct CancelArgs {
    /// Id of the job to cancel.
    pub id: uuid::Uuid,
}

#[derive(Debug, Parser)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the effective configuration as TOML.
    Show,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_enqueue_with_options() {
        let cli = Cli::parse_from([
            "galion",
            "enqueue",
            "https://example.com/a.zip",
            "--priority",
            "8",
            "--option",
            "quality=1080p",
        ]);
        match cli.command {
            Command::Enqueue(args) => {
                assert_eq!(args.url, "https://example.com/a.zip");
                assert_eq!(args.priority, 8);
                assert_eq!(args.options, vec![("quality".to_string(), "1080p".to_string())]);
            }
            _ => panic!("expected Enqueue command"),
        }
    }

    #[test]
    fn rejects_malformed_option() {
        let result = Cli::try_parse_from([
            "galion",
            "enqueue",
            "https://example.com/a.zip",
            "--option",
            "noequals",
        ]);
        assert!(result.is_err());
    }
}
