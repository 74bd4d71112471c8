//! HydraPing: interactive multi-protocol reachability monitor.
//!
//! Probes every configured endpoint over its applicable layers (DNS, ICMP,
//! TCP, UDP, HTTP) on a shared tick and renders a live latency dashboard.

mod app;
mod config;
mod endpoint;
mod error;
mod probe;
mod scheduler;
mod timeline;
mod ui;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::app::AppExit;
use crate::config::{InitOutcome, Overrides, Settings};
use crate::error::AppError;

#[derive(Parser, Debug)]
#[command(name = "hydraping")]
#[command(about = "Multi-protocol reachability monitor with a live terminal dashboard")]
#[command(version)]
struct Cli {
    /// Endpoints to monitor for this run, overriding the configured targets.
    /// Examples: 8.8.8.8, 1.1.1.1:53, google.com, https://example.com
    targets: Vec<String>,

    /// Path to the configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Seconds between probe rounds (overrides checks.interval_seconds)
    #[arg(long)]
    interval: Option<f64>,

    /// Per-probe deadline in seconds (overrides checks.timeout_seconds)
    #[arg(long)]
    timeout: Option<f64>,

    /// Skip DNS checks for this run
    #[arg(long)]
    no_dns: bool,

    /// Skip ICMP checks for this run
    #[arg(long)]
    no_icmp: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write a default configuration file if none exists
    Init {
        /// Overwrite an existing configuration file
        #[arg(short, long)]
        force: bool,
    },
    /// Print the version and exit
    Version,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match dispatch(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(err.exit_code())
        }
    }
}

fn dispatch(cli: Cli) -> Result<ExitCode, AppError> {
    match cli.command {
        Some(Command::Version) => {
            println!("hydraping {}", env!("CARGO_PKG_VERSION"));
            Ok(ExitCode::SUCCESS)
        }
        Some(Command::Init { force }) => {
            let path = cli.config.unwrap_or_else(config::default_path);
            match config::write_default(&path, force)? {
                InitOutcome::Created(path) => {
                    println!("created configuration file: {}", path.display());
                }
                InitOutcome::AlreadyExists(path) => {
                    println!(
                        "configuration file already exists: {} (use --force to overwrite)",
                        path.display()
                    );
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        None => {
            let path = cli.config.clone().unwrap_or_else(config::default_path);
            let settings = Settings::load(&path)?;
            let overrides = Overrides {
                targets: cli.targets,
                interval: cli.interval,
                timeout: cli.timeout,
                no_dns: cli.no_dns,
                no_icmp: cli.no_icmp,
            };
            let cfg = settings.resolve(&overrides)?;

            // Keep the guard alive for the whole run so buffered log lines
            // reach the file.
            let _log_guard = init_logging();
            tracing::info!(config = %path.display(), endpoints = cfg.endpoints.len(), "starting");

            match run_monitor(cfg)? {
                AppExit::Quit => Ok(ExitCode::SUCCESS),
                AppExit::Interrupted => Ok(ExitCode::from(130)),
            }
        }
    }
}

#[tokio::main]
async fn run_monitor(cfg: config::Config) -> Result<AppExit, AppError> {
    app::run(cfg).await
}

/// Log to a rolling file under the XDG state dir; stdout belongs to the TUI.
/// Logging is best-effort: a read-only filesystem must not stop the monitor.
fn init_logging() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let log_dir = config::state_dir();
    if std::fs::create_dir_all(&log_dir).is_err() {
        return None;
    }

    let appender = tracing_appender::rolling::daily(&log_dir, "hydraping.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("hydraping=info"));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .init();

    Some(guard)
}
