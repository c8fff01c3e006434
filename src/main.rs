mod commands;
mod ics;
mod providers;
mod render;
mod store;
mod utils;

use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::{ArgAction, Parser, Subcommand};
use kuna_core::conflict::ConflictPolicy;
use kuna_core::preferences::SyncMode;
use kuna_core::task::{ProjectId, TaskId};
use kuna_core::{Disposition, KunaConfig};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "kuna", version)]
#[command(about = "Mirror Vikunja tasks into your calendars and keep both sides in sync")]
struct Cli {
    /// More log output (-v info, -vv debug, -vvv trace)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Less log output
    #[arg(short = 'q', long = "quiet", action = ArgAction::Count, global = true)]
    quiet: u8,

    /// Config file to use instead of ~/.config/kuna/config.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Turn sync on (or change its settings) and run a first pass
    Setup {
        /// "single" for one calendar, "per-project" for one per project
        #[arg(long, default_value = "single")]
        mode: SyncMode,

        /// Only sync this project (repeatable; default is every project)
        #[arg(long = "project")]
        projects: Vec<ProjectId>,

        /// Push calendar edits back to the task service
        #[arg(long)]
        two_way: bool,

        /// How to settle conflicting edits: prefer-task, prefer-calendar,
        /// prefer-newest or manual
        #[arg(long, default_value = "prefer-newest")]
        policy: ConflictPolicy,

        /// Leave completed tasks out of the calendar
        #[arg(long)]
        skip_completed: bool,
    },
    /// Run one sync pass
    Sync {
        /// Only pull tasks changed since the last pass
        #[arg(long)]
        incremental: bool,
    },
    /// Keep syncing on a schedule and whenever the calendar directory changes
    Watch {
        /// Time between scheduled passes (e.g. "15m", "1h")
        #[arg(long, value_parser = humantime::parse_duration)]
        interval: Option<Duration>,
    },
    /// Show sync settings and mirrored calendars
    Status,
    /// List conflicting edits waiting for a decision
    Conflicts,
    /// Settle a conflict for one task
    Resolve {
        task: TaskId,

        /// Which side wins: "task" or "calendar"
        #[arg(long = "use")]
        side: ConflictPolicy,
    },
    /// Turn sync off
    Disable {
        /// What to do with mirrored calendars: keep, remove-events, archive
        /// or delete
        #[arg(long, default_value = "keep")]
        disposition: Disposition,
    },
    /// Manage the config file
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Write a commented default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Show config and data paths
    Paths,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet)?;

    let config_path = match cli.config {
        Some(path) => path,
        None => KunaConfig::config_path().context("Could not locate the config file")?,
    };

    let config = || load_config(&config_path);

    match cli.command {
        Commands::Setup {
            mode,
            projects,
            two_way,
            policy,
            skip_completed,
        } => {
            let choice = commands::setup::choice(mode, projects, two_way, policy, skip_completed);
            commands::setup::run(&config()?, choice).await
        }
        Commands::Sync { incremental } => commands::sync::run(&config()?, incremental).await,
        Commands::Watch { interval } => commands::watch::run(&config()?, interval).await,
        Commands::Status => commands::status::run(&config()?),
        Commands::Conflicts => commands::conflicts::run(&config()?).await,
        Commands::Resolve { task, side } => commands::resolve::run(&config()?, task, side).await,
        Commands::Disable { disposition } => {
            commands::disable::run(&config()?, disposition).await
        }
        Commands::Config { command } => match command {
            ConfigCommands::Init { force } => commands::config::init(&config_path, force),
            ConfigCommands::Paths => commands::config::paths(&config_path, &config()?),
        },
    }
}

fn load_config(path: &Path) -> Result<KunaConfig> {
    if !path.exists() {
        KunaConfig::create_default_config(path)
            .with_context(|| format!("Could not create {}", path.display()))?;
    }
    KunaConfig::load_from(path).with_context(|| format!("Could not load {}", path.display()))
}

fn init_tracing(verbose: u8, quiet: u8) -> Result<()> {
    let default_level = if quiet >= 2 {
        "error"
    } else if quiet == 1 {
        "warn"
    } else if verbose >= 3 {
        "trace"
    } else if verbose == 2 {
        "debug"
    } else if verbose == 1 {
        "info"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| anyhow!("invalid RUST_LOG / log filter: {e}"))?;

    let init_result = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_ansi(std::io::stderr().is_terminal())
        .try_init();

    if let Err(err) = init_result {
        debug!(error = %err, "tracing subscriber already set, continuing");
    }

    Ok(())
}
