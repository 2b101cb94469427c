//! ModelKeeper CLI - inspect and fetch locally stored model artifacts.
//!
//! Thin front end over `modelkeeper-core`: every subcommand maps to one
//! `KeeperApi` call. Logs go to stderr, results to stdout.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use modelkeeper_core::{
    format_bytes, KeeperApi, KeeperConfig, KeeperError, ListItem, ModelStatus, TransferMode,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Parser, Debug)]
#[command(name = "modelkeeper")]
#[command(about = "Track and fetch local model artifacts")]
struct Args {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Model store root (overrides config and OLLAMA_MODELS)
    #[arg(long, global = true)]
    models_root: Option<PathBuf>,

    /// Serving process base URL (overrides config and OLLAMA_HOST)
    #[arg(long, global = true)]
    host: Option<String>,

    /// How transfers are driven
    #[arg(long, global = true, value_enum)]
    mode: Option<Mode>,

    #[command(subcommand)]
    command: Command,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Mode {
    Http,
    Cli,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show every known artifact grouped by state
    List {
        /// Print rows as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the reconciled status of one artifact
    Status {
        name: String,
        #[arg(long)]
        json: bool,
    },
    /// Download an artifact, retrying transient failures
    Pull { name: String },
    /// Drop incomplete layers of a partial artifact and pull it again
    Resume { name: String },
    /// Remove the manifest and incomplete blobs of a broken artifact
    Clean { name: String },
    /// Ask the serving process to delete an installed artifact
    Remove { name: String },
    /// Hash every blob of an artifact against its digest
    Verify { name: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug {
        LevelFilter::DEBUG
    } else {
        LevelFilter::WARN
    };
    let filter = EnvFilter::builder()
        .with_default_directive(log_level.into())
        .from_env_lossy();
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    let mut config = KeeperConfig::load(args.config.as_deref()).context("loading configuration")?;
    if let Some(root) = args.models_root {
        config.models_root = root;
    }
    if let Some(host) = args.host {
        config.base_url = host;
    }
    if let Some(mode) = args.mode {
        config.transfer_mode = match mode {
            Mode::Http => TransferMode::Http,
            Mode::Cli => TransferMode::Cli,
        };
    }
    info!("Models root: {}", config.models_root.display());

    let api = Arc::new(KeeperApi::new(config)?);

    match args.command {
        Command::List { json } => list(&api, json).await,
        Command::Status { name, json } => {
            let status = api.status(&name).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                print_status(&status);
            }
            Ok(())
        }
        Command::Pull { name } => pull(api, name, false).await,
        Command::Resume { name } => pull(api, name, true).await,
        Command::Clean { name } => {
            let report = api.clean(&name).await?;
            println!(
                "Removed {} file(s), freed {}{}",
                report.removed_files.len(),
                format_bytes(report.freed_bytes),
                if report.manifest_removed {
                    ", manifest removed"
                } else {
                    ""
                }
            );
            Ok(())
        }
        Command::Remove { name } => {
            api.remove(&name).await?;
            println!("Removed {}", name);
            Ok(())
        }
        Command::Verify { name } => {
            let status = api.verify(&name).await?;
            print_status(&status);
            if status.is_complete() {
                Ok(())
            } else {
                bail!("{} failed verification", status.name)
            }
        }
    }
}

async fn list(api: &KeeperApi, json: bool) -> Result<()> {
    let rows = api.list().await;
    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    for row in &rows {
        match row {
            ListItem::Header(title) => println!("{}", title),
            ListItem::Separator => println!(),
            ListItem::Entry(status) => {
                let label = api
                    .catalog()
                    .get(&status.name)
                    .map(|entry| format!(" ({}, {})", entry.display_name, entry.size_label))
                    .unwrap_or_default();
                println!(
                    "  {:<32} {:<13} {:>3}%{}",
                    status.name,
                    status.state.as_str(),
                    status.percent,
                    label
                );
            }
        }
    }
    Ok(())
}

/// Run a pull (or resume) while printing live progress. Ctrl-C cancels the
/// transfer and waits for it to wind down.
async fn pull(api: Arc<KeeperApi>, name: String, resume: bool) -> Result<()> {
    let mut task = {
        let api = api.clone();
        let name = name.clone();
        tokio::spawn(async move {
            if resume {
                api.resume(&name).await
            } else {
                api.pull(&name).await
            }
        })
    };

    let mut ticker = tokio::time::interval(PROGRESS_INTERVAL);
    let mut cancel_requested = false;
    let result = loop {
        tokio::select! {
            result = &mut task => break result.context("transfer task panicked")?,
            // The first Ctrl-C also stops a retry that is waiting to start;
            // a second one gives up without waiting for the transfer to settle.
            _ = tokio::signal::ctrl_c() => {
                eprintln!();
                if cancel_requested {
                    task.abort();
                    bail!("{} interrupted", name);
                }
                cancel_requested = true;
                if let Err(e) = api.cancel(&name).await {
                    warn!("Cancel failed: {}", e);
                }
            }
            _ = ticker.tick() => {
                if let Some(progress) = api.progress(&name).await {
                    if progress.state.is_active() {
                        eprint!(
                            "\r{:<12} {:>3}%  {} / {}  {}  eta {}   ",
                            progress.status_text.as_deref().unwrap_or(progress.state.as_str()),
                            progress.percent,
                            format_bytes(progress.current_bytes),
                            format_bytes(progress.total_bytes),
                            progress.speed,
                            progress.eta,
                        );
                    }
                }
            }
        }
    };
    eprintln!();

    match result {
        Ok(stats) if stats.attempts == 0 => {
            println!("{} is already installed", name);
            Ok(())
        }
        Ok(stats) => {
            println!("{} ready after {} attempt(s)", name, stats.attempts);
            Ok(())
        }
        Err(KeeperError::Cancelled { .. }) => bail!("{} cancelled", name),
        Err(e) => Err(e.into()),
    }
}

fn print_status(status: &ModelStatus) {
    println!("{}", status.name);
    println!("  state:      {}", status.state);
    println!(
        "  downloaded: {} / {} ({}%)",
        format_bytes(status.downloaded_size),
        format_bytes(status.total_size),
        status.percent
    );
    if let Some(path) = &status.manifest_path {
        println!("  manifest:   {}", path.display());
    }
    if let Some(error) = &status.error {
        println!("  error:      {}", error);
    }
    for layer in status.incomplete_layers() {
        println!(
            "  incomplete: {} ({} / {})",
            layer.digest,
            format_bytes(layer.observed_size),
            format_bytes(layer.expected_size)
        );
    }
}
