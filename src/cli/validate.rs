//! Validation subcommand

use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};

use super::CliError;
use crate::collector::{build_context, EnvironmentOptions};
use crate::fetcher::PageWalker;
use crate::proxy;
use crate::registry::CollectionRegistry;
use crate::resume::{FileCheckpointStore, MemoryCheckpointStore};
use crate::settings::{SecretSource, Settings, PROXY_PASSWORD};

/// Collection fetched once by `validate connection`
const PROBE_COLLECTION: &str = "license";

/// Validate command for settings, connectivity and checkpoint files
#[derive(Parser, Debug)]
pub struct ValidateCommand {
    /// What to validate
    #[command(subcommand)]
    pub target: ValidateTarget,
}

/// Target type for validation
#[derive(clap::Subcommand, Debug)]
pub enum ValidateTarget {
    /// Check settings and secrets without any network call
    Config,
    /// Obtain a token and fetch one page
    Connection,
    /// Check every checkpoint file in the state directory
    State,
}

impl ValidateCommand {
    /// Execute the validation command
    pub async fn execute(&self, config: Option<&Path>, state_dir: &Path) -> Result<(), CliError> {
        match &self.target {
            ValidateTarget::Config => {
                let (settings, secrets) = Settings::load(config)?;
                let lines = validate_config(&settings, &secrets)?;
                for line in lines {
                    println!("{line}");
                }
                Ok(())
            }
            ValidateTarget::Connection => {
                let (settings, secrets) = Settings::load(config)?;
                validate_connection(&settings, &secrets).await
            }
            ValidateTarget::State => {
                if !state_dir.exists() {
                    println!("No checkpoints found at {}", state_dir.display());
                    return Ok(());
                }
                let count = verify_state_dir(&FileCheckpointStore::new(state_dir))?;
                println!("{count} valid checkpoint file(s) in {}", state_dir.display());
                Ok(())
            }
        }
    }
}

/// Check settings offline and describe what a run would use.
pub fn validate_config(
    settings: &Settings,
    secrets: &dyn SecretSource,
) -> Result<Vec<String>, CliError> {
    settings.validate_for_collection(secrets)?;
    let route = proxy::resolve(settings, secrets.secret(PROXY_PASSWORD).as_ref())?;

    let auth = if settings.get("access_token").is_some() {
        "pre-issued access token".to_string()
    } else {
        format!(
            "client credentials for {}",
            settings.get_or("client_id", "-")
        )
    };
    Ok(vec![
        "Configuration is valid".to_string(),
        format!("  Base URL: {}", settings.data_plane_base_url()?),
        format!("  API version: {}", settings.api_version()),
        format!("  Auth: {auth}"),
        format!(
            "  Proxy: {}",
            route.as_ref().map(|p| p.redacted()).unwrap_or_else(|| "none".to_string())
        ),
        format!("  Target index: {}", settings.target_index()),
    ])
}

async fn validate_connection(
    settings: &Settings,
    secrets: &dyn SecretSource,
) -> Result<(), CliError> {
    let registry = CollectionRegistry::load_embedded()?;
    let probe = registry.require(PROBE_COLLECTION)?.clone();
    // Scratch store: probing must not touch real checkpoints.
    let ctx = build_context(
        settings,
        secrets,
        Arc::new(MemoryCheckpointStore::new()),
        &EnvironmentOptions::default(),
    )?;

    ctx.credentials.get_token().await?;
    println!("Token acquired");

    let mut walker = PageWalker::open(ctx, probe)?;
    let records = walker
        .next_page()
        .await?
        .map(|page| page.records.len())
        .unwrap_or(0);
    println!("Fetched {PROBE_COLLECTION}: {records} record(s)");
    Ok(())
}

/// Check every checkpoint file under the store's directory.
///
/// Returns the number of valid files, or an error naming how many are broken.
pub fn verify_state_dir(store: &FileCheckpointStore) -> Result<usize, CliError> {
    let mut valid_count = 0;
    let mut error_count = 0;

    for (path, record) in store.list_records()? {
        match record {
            Ok(record) => {
                info!(path = %path.display(), key = %record.key(), "Valid checkpoint");
                valid_count += 1;
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "Invalid checkpoint");
                error_count += 1;
            }
        }
    }

    if error_count > 0 {
        return Err(CliError::InvalidArgument(format!(
            "Verify failed: {error_count} invalid checkpoint file(s) found. Use `checkpoint reset` to clear."
        )));
    }

    info!("Verify passed: {} valid checkpoint file(s)", valid_count);
    Ok(valid_count)
}
