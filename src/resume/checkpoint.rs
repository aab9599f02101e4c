//! On-disk checkpoint record

use serde::{Deserialize, Serialize};

use super::store::ResumeError;

/// Current checkpoint file schema
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Suffix of the cursor key
pub const NEXT_LINK_SUFFIX: &str = ":next_link";
/// Suffix of the watermark key
pub const WATERMARK_SUFFIX: &str = ":watermark";

/// One persisted key/value pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    schema_version: String,
    key: String,
    value: String,
    updated_at: i64,
}

impl CheckpointRecord {
    /// Record for `key` stamped with the current time
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            key: key.into(),
            value: value.into(),
            updated_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Key as given to the store
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Stored value
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Last write, Unix milliseconds
    pub fn updated_at(&self) -> i64 {
        self.updated_at
    }

    /// Schema version the record was written with
    pub fn schema_version(&self) -> &str {
        &self.schema_version
    }

    /// Reject records written by an incompatible version.
    pub fn validate_schema_version(&self) -> Result<(), ResumeError> {
        if self.schema_version != SCHEMA_VERSION {
            return Err(ResumeError::SchemaVersionMismatch {
                expected: SCHEMA_VERSION.to_string(),
                found: self.schema_version.clone(),
            });
        }
        Ok(())
    }
}

/// `<checkpoint_key>:next_link`
pub fn cursor_key(checkpoint_key: &str) -> String {
    format!("{checkpoint_key}{NEXT_LINK_SUFFIX}")
}

/// `<checkpoint_key>:watermark`
pub fn watermark_key(checkpoint_key: &str) -> String {
    format!("{checkpoint_key}{WATERMARK_SUFFIX}")
}
