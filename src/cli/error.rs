//! CLI error types and conversions

use crate::auth::AuthError;
use crate::collector::CollectError;
use crate::fetcher::FetcherError;
use crate::metrics::MetricsError;
use crate::output::OutputError;
use crate::registry::RegistryError;
use crate::resume::ResumeError;
use crate::settings::ConfigError;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Settings error
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Registry error
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// A single collection failed
    #[error("collection failed: {0}")]
    Collect(#[from] CollectError),

    /// Several collections failed; details were logged per collection
    #[error("{failed} of {total} collection(s) failed")]
    CollectionsFailed {
        /// Failed collections
        failed: usize,
        /// Collections attempted
        total: usize,
        /// Whether every failure was a configuration error
        config_only: bool,
    },

    /// Fetcher error
    #[error("fetcher error: {0}")]
    Fetcher(#[from] FetcherError),

    /// Credential error
    #[error("authentication error: {0}")]
    Auth(#[from] AuthError),

    /// Output error
    #[error("output error: {0}")]
    Output(#[from] OutputError),

    /// Checkpoint error
    #[error("checkpoint error: {0}")]
    Resume(#[from] ResumeError),

    /// Metrics exporter error
    #[error("metrics error: {0}")]
    Metrics(#[from] MetricsError),

    /// Invalid argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl CliError {
    /// Whether the failure is a configuration problem rather than a runtime one
    pub fn is_config(&self) -> bool {
        match self {
            Self::Config(_) | Self::Registry(_) | Self::InvalidArgument(_) => true,
            Self::Collect(e) => e.is_config(),
            Self::CollectionsFailed { config_only, .. } => *config_only,
            _ => false,
        }
    }

    /// Process exit code: 2 for configuration errors, 1 otherwise
    pub fn exit_code(&self) -> i32 {
        if self.is_config() {
            2
        } else {
            1
        }
    }
}
