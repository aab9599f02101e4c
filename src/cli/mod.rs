//! CLI command implementations

pub mod checkpoint;
pub mod collect;
pub mod collections;
pub mod error;
pub mod validate;

pub use checkpoint::CheckpointCommand;
pub use collect::{Cli, CollectArgs, Commands, OutputFormat, ResumeMode};
pub use collections::CollectionsCommand;
pub use error::CliError;
pub use validate::ValidateCommand;
