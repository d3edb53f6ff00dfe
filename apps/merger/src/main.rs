mod config;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use config::{Config, EnricherKind, FileConfig, Overrides};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use utter_enrich::{Enricher, NullEnricher, RuleEnricher};
use utter_merge::{MergeEngine, PollDriver, SystemClock};
use utter_queue::FragmentQueue;
use utter_storage::{Database, StoredLine};
use utter_transcript::{Fragment, SpeakerId};

/// Merge speaker-attributed transcript fragments into lines.
#[derive(Parser, Debug)]
#[command(name = "utter-merger", version, about)]
struct Cli {
    /// Config file (defaults to <config_dir>/utter/config.toml)
    #[arg(short, long, global = true, env = "UTTER_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database holding the fragment queue and merged lines
    #[arg(long, global = true, env = "UTTER_DATABASE")]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll the queue and merge fragments until interrupted
    Run(RunArgs),
    /// Enqueue a fragment
    Push(PushArgs),
    /// Print stored lines as JSON, newest first
    Lines(LinesArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Same-speaker continuation window in milliseconds
    #[arg(long, env = "UTTER_MERGE_WINDOW_MS")]
    merge_window_ms: Option<u64>,

    /// Inactivity before an open line is finalized (defaults to the merge window)
    #[arg(long, env = "UTTER_IDLE_FINALIZE_MS")]
    idle_finalize_ms: Option<u64>,

    /// Delay between queue polls in milliseconds
    #[arg(long, env = "UTTER_POLL_INTERVAL_MS")]
    poll_interval_ms: Option<u64>,

    /// Enrichment applied to finalized lines
    #[arg(long, value_enum, env = "UTTER_ENRICHER")]
    enricher: Option<EnricherKind>,
}

#[derive(Args, Debug)]
struct PushArgs {
    /// Speaker id; integers are stored as numbers, anything else as a name
    #[arg(long)]
    speaker: String,

    /// Fragment start in milliseconds (defaults to now)
    #[arg(long)]
    timestamp: Option<i64>,

    /// Fragment text
    #[arg(required = true)]
    text: Vec<String>,
}

#[derive(Args, Debug)]
struct LinesArgs {
    /// Maximum number of lines to print
    #[arg(long, default_value_t = 20)]
    limit: usize,

    /// Only finalized lines
    #[arg(long)]
    final_only: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,utter_merge=debug")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let file = FileConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Run(args) => {
            let config = Config::resolve(
                file,
                Overrides {
                    database: cli.database,
                    enricher: args.enricher,
                    merge_window_ms: args.merge_window_ms,
                    idle_finalize_ms: args.idle_finalize_ms,
                    poll_interval_ms: args.poll_interval_ms,
                },
            )?;
            run(config).await
        }
        Command::Push(args) => {
            let config = Config::resolve(file, database_override(cli.database))?;
            push(&config, args)
        }
        Command::Lines(args) => {
            let config = Config::resolve(file, database_override(cli.database))?;
            lines(&config, args)
        }
    }
}

fn database_override(database: Option<PathBuf>) -> Overrides {
    Overrides {
        database,
        ..Overrides::default()
    }
}

fn open_database(path: &Path) -> Result<Database> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    Database::open(path).with_context(|| format!("failed to open database {}", path.display()))
}

async fn run(config: Config) -> Result<()> {
    tracing::info!(database = %config.database.display(), enricher = ?config.enricher, "Starting utter merger");

    let db = Arc::new(open_database(&config.database)?);
    let enricher: Arc<dyn Enricher> = match config.enricher {
        EnricherKind::Rules => Arc::new(RuleEnricher::new()),
        EnricherKind::None => Arc::new(NullEnricher),
    };

    let engine = MergeEngine::new(config.merge, Arc::clone(&db), enricher, Arc::new(SystemClock));
    let driver = PollDriver::new(Arc::clone(&db), engine, config.driver);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Received Ctrl+C, shutting down");
                on_signal.cancel();
            }
            Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl+C"),
        }
    });

    let driver = driver.run(cancel).await;
    let pending = db.len().unwrap_or_default();
    if pending > 0 {
        tracing::warn!(pending, "Fragments left in queue at shutdown");
    }
    tracing::debug!(stats = ?driver.stats(), "Final merge stats");
    Ok(())
}

fn push(config: &Config, args: PushArgs) -> Result<()> {
    let fragment = Fragment::new(
        parse_speaker(&args.speaker),
        args.timestamp
            .unwrap_or_else(|| chrono::Utc::now().timestamp_millis()),
        args.text.join(" "),
    );

    let db = open_database(&config.database)?;
    db.push_fragment(&fragment).context("failed to enqueue fragment")?;
    tracing::info!(
        speaker = %fragment.speaker_id,
        start_timestamp = fragment.start_timestamp,
        "Fragment enqueued"
    );
    Ok(())
}

fn lines(config: &Config, args: LinesArgs) -> Result<()> {
    let db = open_database(&config.database)?;
    let stored = if args.final_only {
        db.list_final_lines(args.limit)?
    } else {
        db.list_lines(args.limit)?
    };

    for line in &stored {
        println!("{}", serde_json::to_string(&line_json(line))?);
    }
    Ok(())
}

fn line_json(line: &StoredLine) -> serde_json::Value {
    serde_json::json!({
        "key": line.key,
        "mode": line.mode.as_str(),
        "updated_at": line.updated_at,
        "value": line.record,
    })
}

fn parse_speaker(raw: &str) -> SpeakerId {
    match raw.trim().parse::<i64>() {
        Ok(n) => SpeakerId::Number(n),
        Err(_) => SpeakerId::Name(raw.trim().to_string()),
    }
}
