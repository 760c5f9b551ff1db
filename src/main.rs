//! CLI Entry Point for board-ingest
//!
//! Provides command-line interface for:
//! - Running the ingestion daemon against the configured boards
//! - Validating a configuration file
//! - Sending a one-off command sequence to a board
//!
//! # Usage
//!
//! ```bash
//! board-ingest run --config config/board_ingest.toml
//! board-ingest check-config
//! board-ingest send --hex "CD EF 01" --hex "CD EF 02" --interval-ms 500
//! ```

use anyhow::{bail, Context, Result};
use board_ingest::config::{IngestConfig, StorageBackend, DEFAULT_CONFIG_PATH};
use board_ingest::connection::{ConnectionBuilder, ConnectionHandle};
use board_ingest::ingest::{IngestHandle, IngestWorker, WorkerStats};
use board_ingest::logging;
use board_ingest::protocol::{BoardPayloadDecoder, BoardStatus, FrameDecoder};
use board_ingest::sinks::{Collaborators, HistoryBuffer, LiveMessage};
use board_ingest::storage::{MemoryStore, SampleStore};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const LIVE_CHANNEL_CAPACITY: usize = 1024;
const HISTORY_CAPACITY: usize = 10_000;

#[derive(Parser)]
#[command(name = "board-ingest")]
#[command(about = "TCP telemetry ingestion for data-acquisition boards", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the configured board and ingest until Ctrl+C
    Run {
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        /// Index into the configured board list
        #[arg(long, default_value_t = 0)]
        board: usize,
    },

    /// Load and validate a configuration file
    CheckConfig {
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },

    /// Send a sequence of hex-encoded frames to a board, then disconnect
    Send {
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        #[arg(long, default_value_t = 0)]
        board: usize,

        /// Frame bytes in hex, spaces allowed (repeat for a sequence)
        #[arg(long = "hex", required = true)]
        frames: Vec<String>,

        /// Pause between frames; defaults to `connection.send_interval_ms`
        #[arg(long)]
        interval_ms: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, board } => run(load_config(&config)?, board).await,
        Commands::CheckConfig { config } => check_config(config),
        Commands::Send {
            config,
            board,
            frames,
            interval_ms,
        } => send(load_config(&config)?, board, frames, interval_ms).await,
    }
}

fn load_config(path: &Path) -> Result<IngestConfig> {
    let config = IngestConfig::load_from(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
    config.validate().context("Invalid configuration")?;
    logging::init_from_config(&config).context("Failed to initialize logging")?;
    Ok(config)
}

fn check_config(path: PathBuf) -> Result<()> {
    let config = IngestConfig::load_from(&path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
    config.validate().context("Invalid configuration")?;

    println!("Configuration OK: {}", path.display());
    for (index, board) in config.boards.iter().enumerate() {
        println!("  board[{index}] = {board}");
    }
    println!("  storage backend = {:?}", config.storage.backend);
    println!("  clock source    = {:?}", config.connection.clock_source);
    Ok(())
}

fn open_store(config: &IngestConfig) -> Result<Box<dyn SampleStore>> {
    match config.storage.backend {
        StorageBackend::Memory => Ok(Box::new(MemoryStore::new())),
        #[cfg(feature = "storage_csv")]
        StorageBackend::Csv => {
            let store = board_ingest::storage::CsvStore::create_in(&config.storage.output_dir)
                .context("Failed to open CSV store")?
                .with_dedup_capacity(config.ingest.dedup_capacity);
            Ok(Box::new(store))
        }
        #[cfg(not(feature = "storage_csv"))]
        StorageBackend::Csv => bail!("CSV storage requires the 'storage_csv' feature"),
    }
}

fn decoder(config: &IngestConfig) -> FrameDecoder {
    FrameDecoder::new(BoardPayloadDecoder::with_signals(config.signal_table()))
}

async fn run(config: IngestConfig, board: usize) -> Result<()> {
    info!(name = %config.application.name, boards = config.boards.len(), "Starting ingestion");

    let store = open_store(&config)?;
    let (ingest, worker): (IngestHandle, JoinHandle<WorkerStats>) =
        IngestWorker::spawn(config.worker_config(), store);

    let (health_tx, mut health_rx) = watch::channel::<Option<BoardStatus>>(None);
    let (live_tx, mut live_rx) = broadcast::channel::<LiveMessage>(LIVE_CHANNEL_CAPACITY);
    let history = HistoryBuffer::new(HISTORY_CAPACITY);

    let collaborators = Collaborators::new()
        .with_health(health_tx)
        .with_history(history.clone())
        .with_publisher(live_tx)
        .with_batches(ingest.clone());

    let (connection, actor) = ConnectionBuilder::new()
        .timings(config.connection_timings())
        .clock_source(config.connection.clock_source)
        .decoder(decoder(&config))
        .read_buffer_size(config.connection.read_buffer_size)
        .collaborators(collaborators)
        .spawn();

    let monitor = tokio::spawn(async move {
        loop {
            tokio::select! {
                changed = health_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    if let Some(status) = health_rx.borrow_and_update().as_ref() {
                        info!(online = status.online_count(), slots = status.boards.len(), "Board status");
                    }
                }
                message = live_rx.recv() => match message {
                    Ok(LiveMessage::Notification(text)) => info!("{text}"),
                    Ok(LiveMessage::Data { time, values }) => {
                        debug!(time, signals = values.len(), "Live update");
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Live monitor lagging");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    });

    let endpoints = config.boards.clone();
    let connect = connection.connect(endpoints, board);
    tokio::select! {
        result = connect => {
            result.context("Failed to start connection")?;
            info!("Connected; press Ctrl+C to stop");
            tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl+C")?;
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl+C")?;
        }
    }

    shutdown(connection, actor, ingest, worker).await?;
    monitor.abort();
    info!(history_entries = history.len(), "Stopped");
    Ok(())
}

async fn shutdown(
    connection: ConnectionHandle,
    actor: JoinHandle<()>,
    ingest: IngestHandle,
    worker: JoinHandle<WorkerStats>,
) -> Result<()> {
    info!("Shutting down");
    connection.disconnect().await;
    drop(connection);
    actor.await.context("Connection actor panicked")?;

    drop(ingest);
    let stats = worker.await.context("Ingestion worker panicked")?;
    info!(
        batches = stats.batches,
        failed = stats.failed_batches,
        stored = stats.samples_stored,
        dropped = stats.samples_dropped,
        "Ingestion worker drained"
    );
    Ok(())
}

async fn send(
    config: IngestConfig,
    board: usize,
    frames: Vec<String>,
    interval_ms: Option<u64>,
) -> Result<()> {
    let frames = frames
        .iter()
        .map(|text| parse_hex(text))
        .collect::<Result<Vec<_>>>()?;
    let interval = interval_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| config.send_interval());

    let (connection, actor) = ConnectionBuilder::new()
        .timings(config.connection_timings())
        .decoder(decoder(&config))
        .spawn();

    let connect = connection.connect(config.boards.clone(), board);
    match tokio::time::timeout(config.connection_timings().connect_timeout * 2, connect).await {
        Ok(result) => {
            result.context("Failed to connect")?;
        }
        Err(_) => {
            connection.disconnect().await;
            bail!("Board did not accept the connection in time");
        }
    }

    connection.send_sequence(frames, interval).await;
    connection.disconnect().await;
    drop(connection);
    actor.await.context("Connection actor panicked")?;
    Ok(())
}

fn parse_hex(text: &str) -> Result<Vec<u8>> {
    let compact: String = text.split_whitespace().collect();
    hex::decode(&compact).with_context(|| format!("Invalid hex frame '{text}'"))
}
