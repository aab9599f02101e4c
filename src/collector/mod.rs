//! Collection orchestration
//!
//! - [`definition`] holds the per-collection descriptor
//! - [`environment`] wires settings into a transport, a credential provider
//!   and a checkpoint store
//! - [`task`] runs one collection into an event sink
//! - [`config`] and [`rate_limit`] hold engine constants and request pacing

pub mod config;
pub mod definition;
pub mod environment;
pub mod rate_limit;
pub mod task;

pub use definition::{CollectionTaskConfig, CollectionTaskConfigBuilder, ResponseStyle};
pub use environment::{build_context, EnvironmentOptions};
pub use task::{CollectionTask, RunSummary};

use crate::fetcher::FetcherError;
use crate::output::OutputError;
use crate::resume::ResumeError;
use crate::settings::ConfigError;

/// Collection run errors
#[derive(Debug, thiserror::Error)]
pub enum CollectError {
    /// Paging, transport or credential failure
    #[error(transparent)]
    Fetch(#[from] FetcherError),

    /// Event sink failure
    #[error("output error: {0}")]
    Output(#[from] OutputError),

    /// Settings are incomplete or invalid
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Checkpoint store failure outside the walk
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] ResumeError),

    /// A record could not be serialized
    #[error("failed to serialize record: {0}")]
    Serialize(String),

    /// Another process holds the collection's run lock
    #[error("collection {0} is already running")]
    AlreadyRunning(String),

    /// No collection with this name
    #[error("unknown collection: {0}")]
    UnknownCollection(String),

    /// Descriptor failed validation
    #[error("invalid collection {name}: {reason}")]
    InvalidCollection {
        /// Collection name
        name: String,
        /// What is wrong
        reason: String,
    },
}

impl CollectError {
    /// Errors caused by configuration rather than by the remote side
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::UnknownCollection(_) | Self::InvalidCollection { .. }
        )
    }
}
