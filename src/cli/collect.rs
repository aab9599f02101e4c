//! Collect command and top-level CLI definition

use clap::{Args, Parser, Subcommand};
use futures::stream::{self, StreamExt};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use super::checkpoint::CheckpointCommand;
use super::collections::CollectionsCommand;
use super::validate::{verify_state_dir, ValidateCommand};
use super::CliError;
use crate::collector::task::create_spinner;
use crate::collector::{
    build_context, CollectError, CollectionTask, CollectionTaskConfig, EnvironmentOptions,
    RunSummary,
};
use crate::output::jsonl::JsonLinesSink;
use crate::output::{EventSink, OutputError};
use crate::registry::CollectionRegistry;
use crate::resume::{
    CheckpointStore, CollectionLock, FileCheckpointStore, MemoryCheckpointStore, ResumeError,
};
use crate::settings::{Settings, StaticSecrets};
use crate::shutdown::SharedShutdown;

/// Upper bound on collections run at once
const MAX_CONCURRENCY: usize = 32;

/// Default checkpoint directory
pub const DEFAULT_STATE_DIR: &str = ".easm-state";

fn parse_concurrency(s: &str) -> Result<usize, String> {
    let value: usize = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number"))?;

    if value == 0 {
        return Err("concurrency must be at least 1".to_string());
    }
    if value > MAX_CONCURRENCY {
        return Err(format!(
            "concurrency {value} exceeds maximum of {MAX_CONCURRENCY}"
        ));
    }
    Ok(value)
}

/// How stored checkpoints are treated by `collect`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeMode {
    /// Ignore stored checkpoints and keep nothing
    Off,
    /// Resume from stored cursors and watermarks
    On,
    /// Clear the selected collections' checkpoints, then run
    Reset,
    /// Check every checkpoint file before running
    Verify,
}

impl FromStr for ResumeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "off" => Ok(ResumeMode::Off),
            "on" => Ok(ResumeMode::On),
            "reset" => Ok(ResumeMode::Reset),
            "verify" => Ok(ResumeMode::Verify),
            _ => Err(format!(
                "Invalid resume mode: {s}. Valid options: on, off, reset, verify"
            )),
        }
    }
}

/// Output format for command results
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable text
    Human,
    /// One JSON object per line
    Json,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "human" => Ok(OutputFormat::Human),
            _ => Err(format!("Invalid output format: {s}. Valid options: human, json")),
        }
    }
}

/// Defender EASM incremental collector
#[derive(Debug, Parser)]
#[command(name = "easm-collector")]
#[command(about = "Incrementally pull Defender EASM inventory and insights", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Command to run
    #[command(subcommand)]
    pub command: Commands,

    /// Settings file (TOML); `EASM_*` variables override it
    #[arg(long, global = true, env = "EASM_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output format for summaries: human or json
    #[arg(long, global = true, default_value = "human")]
    pub output_format: OutputFormat,

    /// Checkpoint handling: on, off, reset or verify
    #[arg(long, global = true, default_value = "on")]
    pub resume: ResumeMode,

    /// Directory holding checkpoints and run locks
    #[arg(long, global = true, default_value = DEFAULT_STATE_DIR)]
    pub state_dir: PathBuf,

    /// Collections run at once
    #[arg(long, global = true, default_value = "4", value_parser = parse_concurrency)]
    pub concurrency: usize,

    /// Attempts per request, first try included
    #[arg(long, global = true, default_value = "5", value_parser = clap::value_parser!(u32).range(1..=20))]
    pub max_retries: u32,

    /// Serve Prometheus metrics on this address
    #[arg(long, global = true)]
    pub metrics_addr: Option<SocketAddr>,
}

/// Top-level commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Pull one or more collections
    Collect(CollectArgs),
    /// Inspect the collection registry
    Collections(CollectionsCommand),
    /// Show or reset stored checkpoints
    Checkpoint(CheckpointCommand),
    /// Check settings, connectivity or checkpoint files
    Validate(ValidateCommand),
}

/// Arguments of `collect`
#[derive(Debug, Args)]
pub struct CollectArgs {
    /// Collection names or wildcard patterns, e.g. `hosts` or `rbac_*`
    pub names: Vec<String>,

    /// Run every registered collection
    #[arg(long, conflicts_with = "names")]
    pub all: bool,

    /// Write events to `<dir>/<collection>.jsonl` instead of stdout
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Stop every collection at its next page boundary after this many seconds
    #[arg(long)]
    pub deadline_secs: Option<u64>,
}

/// Resolve names and patterns against the registry, keeping first-seen order.
pub fn select_collections(
    registry: &CollectionRegistry,
    names: &[String],
    all: bool,
) -> Result<Vec<CollectionTaskConfig>, CliError> {
    if all {
        return Ok(registry.list_all().into_iter().cloned().collect());
    }
    if names.is_empty() {
        return Err(CliError::InvalidArgument(
            "name at least one collection or pass --all".to_string(),
        ));
    }

    let mut selected: Vec<CollectionTaskConfig> = Vec::new();
    for name in names {
        for entry in registry.resolve_pattern(name)? {
            if !selected.iter().any(|s| s.name == entry.name) {
                selected.push(entry.clone());
            }
        }
    }
    Ok(selected)
}

/// Clear cursor and watermark of each collection.
pub fn reset_checkpoints(
    store: &dyn CheckpointStore,
    collections: &[CollectionTaskConfig],
) -> Result<(), ResumeError> {
    for config in collections {
        store.clear(&config.cursor_key())?;
        store.clear(&config.watermark_key())?;
        info!(collection = %config.name, "Checkpoints cleared");
    }
    Ok(())
}

/// Clear checkpoints while holding each collection's run lock.
///
/// Fails with [`CollectError::AlreadyRunning`] before clearing anything if a
/// run of any selected collection is in progress.
pub fn reset_checkpoints_locked(
    state_dir: &Path,
    store: &dyn CheckpointStore,
    collections: &[CollectionTaskConfig],
) -> Result<(), CollectError> {
    let _locks = collections
        .iter()
        .map(|config| lock_collection(state_dir, &config.name))
        .collect::<Result<Vec<_>, _>>()?;
    reset_checkpoints(store, collections)?;
    Ok(())
}

/// Shared inputs of every collection task in one invocation
#[derive(Clone)]
struct RunConfig {
    settings: Arc<Settings>,
    secrets: Arc<StaticSecrets>,
    store: Arc<dyn CheckpointStore>,
    options: EnvironmentOptions,
    state_dir: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    deadline: Option<tokio::time::Instant>,
    shutdown: SharedShutdown,
    show_progress: bool,
}

impl RunConfig {
    fn open_sink(&self, config: &CollectionTaskConfig) -> Result<Box<dyn EventSink>, OutputError> {
        let index = self.settings.target_index();
        Ok(match &self.output_dir {
            Some(dir) => Box::new(JsonLinesSink::append_to(
                dir.join(format!("{}.jsonl", config.name)),
                index,
            )?),
            None => Box::new(JsonLinesSink::stdout(index)),
        })
    }

    async fn run_one(&self, config: CollectionTaskConfig) -> Result<RunSummary, CollectError> {
        // Held for the whole run; dropped on return.
        let _lock = match &self.state_dir {
            Some(dir) => Some(lock_collection(dir, &config.name)?),
            None => None,
        };

        let context = build_context(
            &self.settings,
            self.secrets.as_ref(),
            self.store.clone(),
            &self.options,
        )?;
        let sink = self.open_sink(&config)?;

        let name = config.name.clone();
        let mut task =
            CollectionTask::new(config, context, sink).with_shutdown(self.shutdown.clone());
        if let Some(deadline) = self.deadline {
            task = task.with_deadline(deadline);
        }
        if self.show_progress {
            task = task.with_progress(create_spinner(&name));
        }
        task.run().await
    }
}

fn lock_collection(state_dir: &Path, name: &str) -> Result<CollectionLock, CollectError> {
    CollectionLock::try_acquire(state_dir, name).map_err(|e| match e {
        ResumeError::LockError(_) => CollectError::AlreadyRunning(name.to_string()),
        other => CollectError::Checkpoint(other),
    })
}

impl CollectArgs {
    /// Run the selected collections.
    pub async fn execute(&self, cli: &Cli, shutdown: SharedShutdown) -> Result<(), CliError> {
        let registry = CollectionRegistry::load_embedded()?;
        let collections = select_collections(&registry, &self.names, self.all)?;

        let (settings, secrets) = Settings::load(cli.config.as_deref())?;
        // Fail on settings before touching checkpoints.
        settings.validate_for_collection(&secrets)?;

        if let Some(addr) = cli.metrics_addr {
            crate::metrics::init_metrics(addr)?;
        }

        let store: Arc<dyn CheckpointStore> = match cli.resume {
            ResumeMode::Off => {
                info!("Resume disabled, checkpoints are neither read nor written");
                Arc::new(MemoryCheckpointStore::new())
            }
            ResumeMode::On | ResumeMode::Reset | ResumeMode::Verify => {
                let store = FileCheckpointStore::new(&cli.state_dir);
                match cli.resume {
                    ResumeMode::Reset => {
                        reset_checkpoints_locked(&cli.state_dir, &store, &collections)?
                    }
                    ResumeMode::Verify => {
                        verify_state_dir(&store)?;
                    }
                    _ => {}
                }
                Arc::new(store)
            }
        };

        let events_on_stdout = self.output_dir.is_none();
        let mut concurrency = cli.concurrency.max(1);
        if events_on_stdout && concurrency > 1 {
            info!("Events go to stdout, running collections one at a time");
            concurrency = 1;
        }

        let run = RunConfig {
            settings: Arc::new(settings),
            secrets: Arc::new(secrets),
            store,
            options: EnvironmentOptions::default().with_max_attempts(cli.max_retries),
            state_dir: (cli.resume != ResumeMode::Off).then(|| cli.state_dir.clone()),
            output_dir: self.output_dir.clone(),
            deadline: self
                .deadline_secs
                .map(|secs| tokio::time::Instant::now() + Duration::from_secs(secs)),
            shutdown,
            show_progress: cli.output_format == OutputFormat::Human && !events_on_stdout,
        };

        info!(
            collections = collections.len(),
            concurrency, "Starting collection run"
        );

        let total = collections.len();
        let results: Vec<(String, Result<RunSummary, CollectError>)> = stream::iter(collections)
            .map(|config| {
                let run = run.clone();
                async move {
                    let name = config.name.clone();
                    let result = run.run_one(config).await;
                    (name, result)
                }
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        let mut failures: Vec<CollectError> = Vec::new();
        for (name, result) in results {
            match result {
                Ok(summary) => report_summary(&summary, cli.output_format, events_on_stdout),
                Err(e) => {
                    error!(collection = %name, error = %e, "Collection failed");
                    report_failure(&name, &e, cli.output_format, events_on_stdout);
                    failures.push(e);
                }
            }
        }

        match failures.len() {
            0 => Ok(()),
            1 => Err(CliError::Collect(failures.remove(0))),
            failed => {
                let config_only = failures.iter().all(CollectError::is_config);
                if failed < total {
                    warn!(failed, total, "Some collections failed");
                }
                Err(CliError::CollectionsFailed {
                    failed,
                    total,
                    config_only,
                })
            }
        }
    }
}

fn emit(line: &str, events_on_stdout: bool) {
    // Summaries must not mix with event lines.
    if events_on_stdout {
        eprintln!("{line}");
    } else {
        println!("{line}");
    }
}

fn report_summary(summary: &RunSummary, format: OutputFormat, events_on_stdout: bool) {
    match format {
        OutputFormat::Json => {
            let mut value = serde_json::json!({ "success": true });
            if let (Ok(serde_json::Value::Object(fields)), Some(obj)) =
                (serde_json::to_value(summary), value.as_object_mut())
            {
                obj.extend(fields);
            }
            emit(&value.to_string(), events_on_stdout);
        }
        OutputFormat::Human => {
            let status = match summary.cancelled {
                None => "completed".to_string(),
                Some(reason) => format!("stopped early ({reason})"),
            };
            emit(
                &format!(
                    "{}: {} - {} records in {} pages ({:.1}s)",
                    summary.collection,
                    status,
                    summary.records_emitted,
                    summary.pages,
                    summary.duration_ms as f64 / 1000.0
                ),
                events_on_stdout,
            );
            if let Some(watermark) = &summary.final_watermark {
                let note = if summary.watermark_committed {
                    "committed"
                } else {
                    "unchanged"
                };
                emit(&format!("  watermark: {watermark} ({note})"), events_on_stdout);
            }
            if summary.unparseable_timestamps > 0 || summary.missing_timestamps > 0 {
                emit(
                    &format!(
                        "  timestamps: {} unparseable, {} missing",
                        summary.unparseable_timestamps, summary.missing_timestamps
                    ),
                    events_on_stdout,
                );
            }
        }
    }
}

fn report_failure(name: &str, err: &CollectError, format: OutputFormat, events_on_stdout: bool) {
    match format {
        OutputFormat::Json => emit(
            &serde_json::json!({
                "success": false,
                "collection": name,
                "error": err.to_string(),
            })
            .to_string(),
            events_on_stdout,
        ),
        OutputFormat::Human => emit(&format!("{name}: failed - {err}"), events_on_stdout),
    }
}
