//! fieldcache - offline-first parcel file manager.
//!
//! Probes the server once at startup, syncs pending file changes when
//! online, and serves files, tracks and map tiles from the local cache when
//! the network is gone.

mod commands;

use std::io;
use std::ops::RangeInclusive;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use fieldcache_core::{probe, Config, Credentials, LocalStore, WfsClient};

use commands::Session;

#[derive(Parser)]
#[command(name = "fieldcache", version, about = "Offline-first parcel file manager")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show connectivity and cache contents
    Status,
    /// Push pending changes and pull remote files
    Sync,
    /// List the files attached to a parcel
    Files {
        feature_id: String,
    },
    /// Attach a file to a parcel
    Upload {
        feature_id: String,
        path: PathBuf,
        /// Comma-separated user ids to share the file with
        #[arg(long, default_value = "")]
        share: String,
    },
    /// Delete a parcel file
    Delete {
        filename: String,
    },
    /// Save a parcel file's contents
    Download {
        filename: String,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// List GPS tracks of all parcels
    Tracks,
    /// Prefetch map tiles into the cache
    Tiles {
        #[arg(long)]
        zoom: u32,
        /// Column range, e.g. 8800..8805
        #[arg(long, value_parser = parse_range)]
        x: RangeInclusive<u32>,
        /// Row range, e.g. 5700..5702
        #[arg(long, value_parser = parse_range)]
        y: RangeInclusive<u32>,
    },
    /// Render the grids of a task manifest to PAM images
    RenderGrid {
        manifest: PathBuf,
        /// Output directory
        #[arg(long, default_value = ".")]
        out: PathBuf,
    },
}

impl Command {
    /// Commands that read the file namespace must see synced state.
    fn reads_files(&self) -> bool {
        matches!(
            self,
            Command::Files { .. }
                | Command::Upload { .. }
                | Command::Delete { .. }
                | Command::Download { .. }
                | Command::Tracks
        )
    }
}

/// Parse `a..b` (inclusive) or a single number.
fn parse_range(s: &str) -> Result<RangeInclusive<u32>, String> {
    let parse = |v: &str| v.trim().parse::<u32>().map_err(|e| format!("'{}': {}", v, e));
    match s.split_once("..") {
        Some((start, end)) => {
            let (start, end) = (parse(start)?, parse(end)?);
            if start > end {
                return Err(format!("empty range {}", s));
            }
            Ok(start..=end)
        }
        None => {
            let v = parse(s)?;
            Ok(v..=v)
        }
    }
}

/// Initialize the tracing subscriber for logging.
///
/// Logs go to stderr and to a daily-rolling file. The returned guard must be
/// held until exit so buffered file output is flushed.
fn init_tracing() -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match Config::log_dir() {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "fieldcache.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        Err(_) => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let _log_guard = init_tracing();
    info!("fieldcache starting");

    // Rendering is local and needs no server configuration
    if let Command::RenderGrid { manifest, out } = &cli.command {
        return commands::render_grid(manifest, out);
    }

    let mut config = Config::load()?;
    config.apply_env();

    let service = config.service()?;
    let username = config.last_username.clone();
    let credentials = match (&username, std::env::var("FIELDCACHE_PASSWORD").ok()) {
        (Some(user), Some(password)) => Some(Credentials {
            username: user.clone(),
            password,
        }),
        _ => None,
    };
    let client = WfsClient::new(service, credentials)?;

    let cache_dir = config.cache_dir()?;
    let store = LocalStore::open(&cache_dir)
        .with_context(|| format!("Failed to open cache at {}", cache_dir.display()))?;

    let mode = probe(client.fetch_capabilities(), config.probe_timeout()).await;

    let session = Session {
        config,
        store,
        client,
        mode,
        username,
    };

    if cli.command.reads_files() {
        session.sync_before_read().await?;
    }

    let result = match cli.command {
        Command::Status => commands::status(&session),
        Command::Sync => commands::sync(&session).await,
        Command::Files { feature_id } => commands::files(&session, &feature_id).await,
        Command::Upload {
            feature_id,
            path,
            share,
        } => commands::upload(&session, &feature_id, &path, &share).await,
        Command::Delete { filename } => commands::delete(&session, &filename).await,
        Command::Download { filename, out } => {
            commands::download(&session, &filename, out.as_deref()).await
        }
        Command::Tracks => commands::tracks(&session).await,
        Command::Tiles { zoom, x, y } => commands::tiles(&session, zoom, x, y).await,
        Command::RenderGrid { .. } => Ok(()),
    };

    info!("fieldcache shutting down");
    result
}
