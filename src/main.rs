//! Persona Learner CLI
//!
//! Replays recorded feedback through the learning engine against an on-disk
//! data directory, and manages the checkpoints it leaves behind.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use persona_learner::{
    learning::CheckpointStore,
    storage::{FileCheckpointStore, InMemoryResponses, JsonFilePersonaStore, LibsqlLearningStore},
    FeedbackSign, LearnerConfig, PersonaLearningEngine, Remediation,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::EnvFilter;

const PERSONA_FILE: &str = "persona.json";
const CHECKPOINT_DIR: &str = "checkpoints";
const DATABASE_FILE: &str = "learning.db";

#[derive(Parser)]
#[command(name = "persona-learner")]
#[command(about = "Adaptive persona parameter learning engine", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Data directory (persona, checkpoints, learning log)
    #[arg(long, global = true, env = "PERSONA_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Set log level (overrides the configured one)
    #[arg(short, long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Process a JSONL file of feedback events and print the final stats
    Run {
        /// One `{"response_id", "text", "sign"}` object per line
        #[arg(short, long)]
        events: PathBuf,

        /// Apply rollbacks recommended by diagnostics instead of only reporting them
        #[arg(long)]
        apply_rollbacks: bool,

        /// Seed for replay sampling
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Restore the latest checkpoint into the persona file
    Rollback,

    /// List checkpoints, or prune all but the most recent ones
    Checkpoints {
        /// Number of checkpoints to keep
        #[arg(long)]
        prune: Option<usize>,
    },

    /// Print the effective configuration as TOML
    Config,
}

/// One line of an events file
#[derive(Debug, Deserialize)]
struct EventLine {
    response_id: String,
    text: String,
    sign: FeedbackSign,
}

fn init_tracing(log_level: &str) {
    let level = match log_level {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::new(format!(
        "persona_learner={},libsql=warn",
        level.as_str().to_lowercase()
    ));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn read_events(path: &Path) -> Result<Vec<EventLine>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read events file {}", path.display()))?;

    raw.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("Invalid event on line {}", i + 1))
        })
        .collect()
}

async fn build_engine(
    config: &LearnerConfig,
    data_dir: &Path,
    responses: Arc<InMemoryResponses>,
) -> Result<PersonaLearningEngine> {
    let persona_store = Arc::new(JsonFilePersonaStore::new(data_dir.join(PERSONA_FILE)));
    let checkpoints = Arc::new(FileCheckpointStore::new(data_dir.join(CHECKPOINT_DIR)));
    let log = Arc::new(
        LibsqlLearningStore::new_local(data_dir.join(DATABASE_FILE))
            .await
            .context("Failed to open learning database")?,
    );

    let engine = PersonaLearningEngine::from_config(config, persona_store, responses, checkpoints)
        .await
        .context("Failed to initialize learning engine")?;
    Ok(engine.with_learning_log(log))
}

async fn run(
    config: &LearnerConfig,
    data_dir: &Path,
    events_path: &Path,
    apply_rollbacks: bool,
    seed: Option<u64>,
) -> Result<()> {
    let events = read_events(events_path)?;
    info!("Loaded {} feedback events from {}", events.len(), events_path.display());

    let responses = Arc::new(InMemoryResponses::new());
    for event in &events {
        responses.insert(event.response_id.clone(), event.text.clone()).await;
    }

    let mut engine = build_engine(config, data_dir, responses).await?;
    if let Some(seed) = seed {
        engine = engine.with_seed(seed);
    }

    for event in &events {
        let result = engine
            .process_feedback(&event.response_id, event.sign)
            .await
            .with_context(|| format!("Failed to process feedback for {}", event.response_id))?;
        debug!("{}: {:?}", event.response_id, result.outcome);

        if result.rollback_recommended() {
            if apply_rollbacks {
                engine
                    .apply_remediation(&[Remediation::RollbackToCheckpoint])
                    .await?;
            } else {
                warn!(
                    "Diagnostics recommend a rollback after {} events (use --apply-rollbacks)",
                    engine.feedback_count()
                );
            }
        }
    }

    println!("{}", serde_json::to_string_pretty(&engine.stats())?);
    Ok(())
}

async fn rollback(config: &LearnerConfig, data_dir: &Path) -> Result<()> {
    let mut engine = build_engine(config, data_dir, Arc::new(InMemoryResponses::new())).await?;
    let outcome = engine.rollback_to_latest_checkpoint().await?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

async fn checkpoints(data_dir: &Path, prune: Option<usize>) -> Result<()> {
    let store = FileCheckpointStore::new(data_dir.join(CHECKPOINT_DIR));

    if let Some(keep) = prune {
        let removed = store.prune(keep).await?;
        println!("Removed {} checkpoint(s), kept at most {}", removed, keep);
        return Ok(());
    }

    let all = store.list().await?;
    if all.is_empty() {
        println!("No checkpoints in {}", store.dir().display());
        return Ok(());
    }
    for checkpoint in all {
        let score = checkpoint
            .validation_score
            .map(|s| format!("{:.3}", s))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:>10}  {}  score={}  {}",
            checkpoint.feedback_count,
            checkpoint.timestamp.to_rfc3339(),
            score,
            checkpoint.id
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = LearnerConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if cli.data_dir.is_some() {
        config.data_dir = cli.data_dir.clone();
    }

    init_tracing(cli.log_level.as_deref().unwrap_or(&config.log_level));
    debug!("Persona Learner v{} starting...", env!("CARGO_PKG_VERSION"));

    let data_dir = config.resolved_data_dir();

    match cli.command {
        Commands::Run {
            events,
            apply_rollbacks,
            seed,
        } => run(&config, &data_dir, &events, apply_rollbacks, seed).await,
        Commands::Rollback => rollback(&config, &data_dir).await,
        Commands::Checkpoints { prune } => checkpoints(&data_dir, prune).await,
        Commands::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}
