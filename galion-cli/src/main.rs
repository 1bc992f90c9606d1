//! CLI entry point for the Galion content acquisition orchestrator.

use anyhow::Result;
use clap::Parser;
use galion_core::Config;
use tracing::error;

mod cli;
mod commands;
mod config_path;
mod exit;
mod progress_ui;
mod terminal;

use cli::{Cli, Command};
use exit::ProcessExit;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let no_color_env = terminal::no_color_env_requested();
    let dumb_terminal = terminal::is_dumb_terminal();
    let no_color = terminal::should_disable_color(cli.no_color, no_color_env, dumb_terminal);
    terminal::init_tracing(no_color);

    let exit = match run(cli).await {
        Ok(()) => ProcessExit::Success,
        Err(err) => {
            error!(error = %err, "command failed");
            ProcessExit::Failure
        }
    };
    std::process::exit(exit.code());
}

async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.or_else(config_path::resolve_default_config_path);
    let config = Config::load(config_path.as_deref())?;

    match cli.command {
        Command::Enqueue(args) => commands::enqueue(&config, args).await,
        Command::Run(args) => commands::run(&config, args).await,
        Command::Status(args) => commands::status(&config, args).await,
        Command::Cancel(args) => commands::cancel(&config, args).await,
        Command::Pause => commands::pause(&config).await,
        Command::Resume => commands::resume(&config).await,
        Command::ClearCompleted => commands::clear_completed(&config).await,
        Command::Platforms => commands::platforms(&config),
        Command::Config(args) => match args.command {
            cli::ConfigCommand::Show => commands::config_show(&config),
        },
    }
}
