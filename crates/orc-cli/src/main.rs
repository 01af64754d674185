mod commands;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use orc_core::config::{self, Config, LogFormat};
use orc_core::types::Weight;
use orc_telemetry::{LogOutput, LoggingConfig};

/// orc -- drive weighted task plans and recover orphaned executors.
#[derive(Parser)]
#[command(name = "orc", version, about)]
struct Cli {
    /// Storage root (overrides `[storage] root`).
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Config file (defaults to ~/.orc/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a task with a plan from its weight's template.
    New {
        task_id: String,
        #[arg(short, long)]
        weight: Weight,
        #[arg(short, long)]
        title: Option<String>,
    },

    /// Show every task (default when no subcommand is given).
    Status {
        /// Emit JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Migrate stale plans to their current templates.
    Migrate {
        task_ids: Vec<String>,
        /// Migrate every task with a stale plan.
        #[arg(long)]
        all: bool,
        /// Preview migrations without saving.
        #[arg(long)]
        dry_run: bool,
    },

    /// Change a task's weight and regenerate its plan.
    Reweight { task_id: String, weight: Weight },

    /// Reset a task, or only the phases from `--from` onwards.
    Reset {
        task_id: String,
        #[arg(long)]
        from: Option<String>,
        /// Reset even if the executor still looks alive.
        #[arg(long)]
        force: bool,
    },

    /// Mark orphaned running tasks as interrupted (one sweep).
    Recover {
        #[arg(long)]
        dry_run: bool,
    },

    /// Sweep for orphans periodically until Ctrl-C.
    Patrol {
        /// Overrides `[orphan] patrol_interval_secs`.
        #[arg(long)]
        interval_secs: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = config::load_or_default(cli.config.as_deref()).with_context(|| {
        let path = cli.config.clone().unwrap_or_else(Config::default_path);
        format!("load config {}", path.display())
    })?;

    let output = match config.general.log_format {
        LogFormat::Text => LogOutput::Text,
        LogFormat::Json => LogOutput::Json,
    };
    orc_telemetry::init(
        "orc",
        &LoggingConfig::new(config.general.log_level.clone(), output),
    );

    let ctx = commands::Context::new(config, cli.root);
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    match cli.command {
        None => commands::status::run(&ctx, false, &mut out)?,
        Some(Commands::Status { json }) => commands::status::run(&ctx, json, &mut out)?,
        Some(Commands::New {
            task_id,
            weight,
            title,
        }) => commands::new::run(&ctx, &task_id, weight, title, &mut out)?,
        Some(Commands::Migrate {
            task_ids,
            all,
            dry_run,
        }) => {
            commands::migrate::run(&ctx, &task_ids, all, dry_run, &mut out)?;
        }
        Some(Commands::Reweight { task_id, weight }) => {
            commands::reweight::run(&ctx, &task_id, weight, &mut out)?
        }
        Some(Commands::Reset {
            task_id,
            from,
            force,
        }) => commands::reset::run(&ctx, &task_id, from.as_deref(), force, &mut out)?,
        Some(Commands::Recover { dry_run }) => {
            commands::recover::run(&ctx, dry_run, &mut out)?;
        }
        Some(Commands::Patrol { interval_secs }) => {
            let interval = interval_secs
                .map(Duration::from_secs)
                .unwrap_or_else(|| ctx.config.orphan.patrol_interval());
            anyhow::ensure!(!interval.is_zero(), "--interval-secs must be > 0");
            commands::patrol::run(&ctx, interval, &mut out).await?;
        }
    }

    Ok(())
}
