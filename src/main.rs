use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use kestrel::{
    config::{self, AppConfig},
    core::store::AlertStore,
    ui::{banner, repl::Repl},
};

#[derive(Parser, Debug)]
#[command(name = "kestrel", about = "Falcon alert watcher with a local triage cache")]
struct Cli {
    /// Path to config file (TOML). Default: ~/.kestrel/config.toml
    #[arg(long)]
    config: Option<PathBuf>,
    /// SQLite path for the alert cache. Default: ~/.kestrel/alerts.db
    #[arg(long)]
    db_path: Option<PathBuf>,
    /// Application log file. Default: ~/.kestrel/kestrel.log
    #[arg(long)]
    log_file: Option<PathBuf>,
    /// Increase verbosity (info, debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(&cli)?;

    let config_path = cli.config.unwrap_or_else(AppConfig::default_path);
    let config = AppConfig::load(&config_path);

    let db_path = cli.db_path.unwrap_or_else(AlertStore::default_path);
    let store = AlertStore::new(&db_path)
        .with_context(|| format!("could not open alert cache at {}", db_path.display()))?;

    banner::print_banner();

    let mut repl = Repl::new(config, store);
    repl.run().await;

    if let Err(err) = repl.s.config.save(&config_path) {
        tracing::warn!("could not save config: {err}");
    }
    Ok(())
}

fn init_tracing(cli: &Cli) -> anyhow::Result<()> {
    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let log_path = cli
        .log_file
        .clone()
        .unwrap_or_else(|| config::config_dir().join("kestrel.log"));
    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent).context("could not create log directory")?;
    }
    rotate_if_large(&log_path);

    let file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("could not open log file {}", log_path.display()))?;

    let file_layer = fmt::layer()
        .with_writer(file)
        .with_ansi(false)
        .with_target(false);
    let stdout_layer = fmt::layer().with_writer(std::io::stdout).with_target(false);

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stdout_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("could not init tracing: {e}"))
}

fn rotate_if_large(log_path: &Path) {
    if let Ok(meta) = fs::metadata(log_path) {
        if meta.len() > 1_000_000 {
            let rotated = log_path.with_extension("log.1");
            let _ = fs::rename(log_path, rotated);
        }
    }
}
