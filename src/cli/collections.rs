//! `collections` command: list registered collections

use clap::{Args, Subcommand};

use super::collect::OutputFormat;
use super::CliError;
use crate::collector::CollectionTaskConfig;
use crate::registry::CollectionRegistry;

/// Collections subcommand
#[derive(Debug, Args)]
pub struct CollectionsCommand {
    #[command(subcommand)]
    action: CollectionsAction,
}

#[derive(Debug, Subcommand)]
enum CollectionsAction {
    /// List registered collections
    List {
        /// Optional name pattern (supports wildcards)
        pattern: Option<String>,
    },
}

impl CollectionsCommand {
    /// Execute the collections command.
    pub fn execute(&self, format: OutputFormat) -> Result<(), CliError> {
        match &self.action {
            CollectionsAction::List { pattern } => {
                let registry = CollectionRegistry::load_embedded()?;
                let entries = match pattern {
                    Some(p) => registry.resolve_pattern(p)?,
                    None => registry.list_all(),
                };
                println!("{}", render_list(&entries, format)?);
                Ok(())
            }
        }
    }
}

/// Render collections as a table or a JSON array.
pub fn render_list(
    entries: &[&CollectionTaskConfig],
    format: OutputFormat,
) -> Result<String, CliError> {
    match format {
        OutputFormat::Json => serde_json::to_string_pretty(entries)
            .map_err(|e| CliError::InvalidArgument(format!("failed to render collections: {e}"))),
        OutputFormat::Human => {
            let width = entries.iter().map(|e| e.name.len()).max().unwrap_or(4).max(4);
            let mut out = format!(
                "{:<width$}  {:<11}  {:<34}  {}\n",
                "NAME", "MODE", "PATH", "SOURCETYPE"
            );
            for entry in entries {
                let mode = if entry.is_incremental() {
                    "incremental"
                } else {
                    "cursor"
                };
                out.push_str(&format!(
                    "{:<width$}  {:<11}  {:<34}  {}\n",
                    entry.name, mode, entry.resource_path, entry.sourcetype
                ));
            }
            out.push_str(&format!("\n{} collection(s)", entries.len()));
            Ok(out)
        }
    }
}
