//! heartbeat CLI
//!
//! `serve` runs a hub over JSON lines: commands on stdin, events on stdout.
//! Diagnostics always go to stderr.

#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use heartbeat_core::config::{Config, LogFormat, StoreBackend};
use heartbeat_core::error::{ConfigError, format_error_with_remediation};
use heartbeat_core::events::{Command, EventBus, HubEvent};
use heartbeat_core::logging::{LogConfig, init_logging};
use heartbeat_core::{Error, Hub, MemoryLogStore, SampleLogStore, SqliteLogStore};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

#[derive(Parser)]
#[command(name = "heartbeat", version, about = "Live cross-identity heart-rate aggregation hub")]
struct Cli {
    /// Override the configured log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "HEARTBEAT_LOG_LEVEL")]
    log_level: Option<String>,

    /// Override the configured log format (pretty, json)
    #[arg(long, global = true, env = "HEARTBEAT_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the hub: JSON commands on stdin, JSON events on stdout
    Serve {
        /// Path to heartbeat.toml
        #[arg(long)]
        config: Option<PathBuf>,

        /// Use the SQLite store at this path
        #[arg(long, conflicts_with = "memory")]
        db: Option<PathBuf>,

        /// Use the in-process store
        #[arg(long)]
        memory: bool,

        /// Periodic aggregation interval (0 disables the timer)
        #[arg(long)]
        interval_ms: Option<u64>,
    },

    /// Print one identity's stored samples as JSON lines
    Dump {
        /// SQLite database written by `serve --db`
        #[arg(long)]
        db: PathBuf,

        #[arg(long)]
        identity: String,
    },

    /// Validate a config file and print the effective configuration
    CheckConfig {
        #[arg(long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            match err.downcast_ref::<Error>() {
                Some(core) => eprintln!("{}", format_error_with_remediation(core)),
                None => eprintln!("Error: {err:#}"),
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Serve {
            config,
            db,
            memory,
            interval_ms,
        } => {
            let mut config = Config::load(config.as_deref()).map_err(Error::from)?;
            if memory {
                config.store.backend = StoreBackend::Memory;
            } else if let Some(db) = db {
                config.store.backend = StoreBackend::Sqlite;
                config.store.db_path = db;
            }
            if let Some(ms) = interval_ms {
                config.aggregation.interval_ms = ms;
            }
            apply_log_overrides(&mut config, cli.log_level, cli.log_format);
            config.validate().map_err(Error::from)?;
            init_logging(&LogConfig::from(&config.general))?;
            serve(&config).await?;
        }
        Commands::Dump { db, identity } => {
            init_logging(&log_config(cli.log_level, cli.log_format, "warn"))?;
            dump(&db, &identity).await?;
        }
        Commands::CheckConfig { config } => {
            init_logging(&log_config(cli.log_level, cli.log_format, "warn"))?;
            let config = Config::load_from(&config).map_err(Error::from)?;
            print!("{}", config.to_toml_string().map_err(Error::from)?);
        }
    }
    Ok(())
}

fn apply_log_overrides(config: &mut Config, level: Option<String>, format: Option<LogFormat>) {
    if let Some(level) = level {
        config.general.log_level = level;
    }
    if let Some(format) = format {
        config.general.log_format = format;
    }
}

fn log_config(level: Option<String>, format: Option<LogFormat>, default_level: &str) -> LogConfig {
    LogConfig {
        level: level.unwrap_or_else(|| default_level.to_string()),
        format: format.unwrap_or_default(),
        file: None,
    }
}

async fn serve(config: &Config) -> heartbeat_core::Result<()> {
    match config.store.backend {
        StoreBackend::Memory => run_hub(Arc::new(MemoryLogStore::new()), config).await,
        StoreBackend::Sqlite => {
            let store = SqliteLogStore::open(&config.store.db_path)?;
            run_hub(Arc::new(store), config).await
        }
    }
}

async fn run_hub<S>(store: Arc<S>, config: &Config) -> heartbeat_core::Result<()>
where
    S: SampleLogStore + 'static,
{
    info!(
        backend = ?store.backend_kind(),
        interval_ms = config.aggregation.interval_ms,
        fan_in_timeout_ms = config.aggregation.fan_in_timeout_ms,
        "hub starting"
    );
    let hub = Arc::new(Hub::new(
        store,
        &config.aggregation,
        EventBus::new(config.events.capacity),
    ));
    let writer = tokio::spawn(write_events(hub.subscribe()));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let ticker = {
        let hub = Arc::clone(&hub);
        tokio::spawn(async move { hub.run_periodic(shutdown_rx).await })
    };

    let mut cycles = JoinSet::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let command: Command = match serde_json::from_str(line) {
            Ok(command) => command,
            Err(err) => {
                warn!(error = %err, "ignoring malformed command line");
                continue;
            }
        };
        if matches!(command, Command::AggregationTrigger) {
            let hub = Arc::clone(&hub);
            cycles.spawn(async move { hub.handle(command).await });
        } else if let Err(err) = hub.handle(command).await {
            warn!(error = %err, "command rejected");
        }
    }
    debug!("stdin closed, draining in-flight cycles");

    while let Some(joined) = cycles.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(error = %err, "aggregation trigger failed"),
            Err(err) => warn!(error = %err, "aggregation task panicked"),
        }
    }

    let _ = shutdown_tx.send(true);
    ticker
        .await
        .map_err(|e| Error::Runtime(format!("periodic trigger task: {e}")))?;

    // The writer finishes once the hub, and with it the bus sender, is gone.
    drop(hub);
    writer
        .await
        .map_err(|e| Error::Runtime(format!("event writer task: {e}")))??;
    info!("hub stopped");
    Ok(())
}

async fn write_events(mut events: broadcast::Receiver<HubEvent>) -> heartbeat_core::Result<()> {
    let mut stdout = tokio::io::stdout();
    loop {
        match events.recv().await {
            Ok(event) => {
                let mut line = serde_json::to_vec(&event)?;
                line.push(b'\n');
                stdout.write_all(&line).await?;
                stdout.flush().await?;
            }
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "event writer lagged"),
            Err(RecvError::Closed) => break,
        }
    }
    Ok(())
}

async fn dump(db: &Path, identity: &str) -> heartbeat_core::Result<()> {
    if !db.exists() {
        return Err(Error::Config(ConfigError::FileNotFound(
            db.display().to_string(),
        )));
    }
    let store = SqliteLogStore::open(db)?;
    let samples = store.read_range(identity, 0, -1).await?;
    debug!(identity, count = samples.len(), "dumping log");
    let mut out = String::new();
    for sample in &samples {
        out.push_str(&serde_json::to_string(sample)?);
        out.push('\n');
    }
    print!("{out}");
    Ok(())
}
