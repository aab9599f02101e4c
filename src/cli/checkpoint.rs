//! `checkpoint` command: inspect or clear stored cursors and watermarks

use clap::{Args, Subcommand};
use serde::Serialize;
use std::path::Path;
use tracing::info;

use super::collect::{reset_checkpoints_locked, select_collections, OutputFormat};
use super::CliError;
use crate::collector::CollectionTaskConfig;
use crate::registry::CollectionRegistry;
use crate::resume::{CheckpointStore, FileCheckpointStore, ResumeError};

/// Checkpoint subcommand
#[derive(Debug, Args)]
pub struct CheckpointCommand {
    #[command(subcommand)]
    action: CheckpointAction,
}

#[derive(Debug, Subcommand)]
enum CheckpointAction {
    /// Print the stored cursor and watermark
    Show {
        /// Collection names or patterns
        #[arg(required = true)]
        names: Vec<String>,
    },
    /// Forget the stored cursor and watermark so the next run starts over
    Reset {
        /// Collection names or patterns
        #[arg(required = true)]
        names: Vec<String>,
    },
}

/// Stored state of one collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckpointView {
    /// Collection name
    pub collection: String,
    /// Key prefix
    pub checkpoint_key: String,
    /// Pending continuation link, if a walk was interrupted
    pub next_link: Option<String>,
    /// Last committed watermark
    pub watermark: Option<String>,
}

/// Read the stored state of each collection.
pub fn read_checkpoints(
    store: &dyn CheckpointStore,
    collections: &[CollectionTaskConfig],
) -> Result<Vec<CheckpointView>, ResumeError> {
    collections
        .iter()
        .map(|config| {
            Ok(CheckpointView {
                collection: config.name.clone(),
                checkpoint_key: config.checkpoint_key.clone(),
                next_link: store.get(&config.cursor_key())?,
                watermark: store.get(&config.watermark_key())?,
            })
        })
        .collect()
}

impl CheckpointCommand {
    /// Execute against checkpoints under `state_dir`.
    pub fn execute(&self, state_dir: &Path, format: OutputFormat) -> Result<(), CliError> {
        let registry = CollectionRegistry::load_embedded()?;
        let store = FileCheckpointStore::new(state_dir);

        match &self.action {
            CheckpointAction::Show { names } => {
                let collections = select_collections(&registry, names, false)?;
                let views = read_checkpoints(&store, &collections)?;
                match format {
                    OutputFormat::Json => {
                        for view in &views {
                            let line = serde_json::to_string(view).map_err(|e| {
                                CliError::InvalidArgument(format!("failed to render: {e}"))
                            })?;
                            println!("{line}");
                        }
                    }
                    OutputFormat::Human => {
                        for view in &views {
                            println!("{} ({})", view.collection, view.checkpoint_key);
                            println!(
                                "  next_link: {}",
                                view.next_link.as_deref().unwrap_or("-")
                            );
                            println!(
                                "  watermark: {}",
                                view.watermark.as_deref().unwrap_or("-")
                            );
                        }
                    }
                }
                Ok(())
            }
            CheckpointAction::Reset { names } => {
                let collections = select_collections(&registry, names, false)?;
                reset_checkpoints_locked(state_dir, &store, &collections)?;
                info!(collections = collections.len(), "Checkpoint reset complete");
                if format == OutputFormat::Human {
                    println!("Reset {} collection(s)", collections.len());
                }
                Ok(())
            }
        }
    }
}
