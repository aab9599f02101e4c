//! Collection descriptors
//!
//! A [`CollectionTaskConfig`] is everything that differs between two
//! collections. It is immutable once built; the walker and the task only read
//! it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::CollectError;
use crate::resume::{cursor_key, watermark_key};

/// How a listing response carries its records
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStyle {
    /// `{ "value": [...], "nextLink": ... }`
    #[default]
    List,
    /// A bare object is one record; a `value` array is still honored
    SingleObject,
}

/// Immutable per-collection descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionTaskConfig {
    /// Short name, e.g. `hosts`
    pub name: String,
    /// Path appended to the data-plane base URL, e.g. `/assets/hosts`
    pub resource_path: String,
    /// `$top` for the first request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_size: Option<u32>,
    /// Timestamp field paths, tried in order
    #[serde(default)]
    pub timestamp_fields: Vec<String>,
    /// `$filter` template with a `{watermark}` placeholder
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_template: Option<String>,
    /// Event sourcetype label
    pub sourcetype: String,
    /// Prefix of the cursor and watermark keys
    pub checkpoint_key: String,
    /// Extra query parameters sent with the first request
    #[serde(default)]
    pub extra_params: BTreeMap<String, String>,
    /// Response envelope
    #[serde(default)]
    pub response_style: ResponseStyle,
    /// Human readable description
    #[serde(default)]
    pub description: String,
}

impl CollectionTaskConfig {
    /// Builder with the required fields
    pub fn builder(
        name: impl Into<String>,
        resource_path: impl Into<String>,
        sourcetype: impl Into<String>,
    ) -> CollectionTaskConfigBuilder {
        let name = name.into();
        CollectionTaskConfigBuilder {
            config: Self {
                checkpoint_key: format!("defender_easm_{name}"),
                name,
                resource_path: resource_path.into(),
                page_size: None,
                timestamp_fields: Vec::new(),
                filter_template: None,
                sourcetype: sourcetype.into(),
                extra_params: BTreeMap::new(),
                response_style: ResponseStyle::List,
                description: String::new(),
            },
        }
    }

    /// Store key of the pagination cursor
    pub fn cursor_key(&self) -> String {
        cursor_key(&self.checkpoint_key)
    }

    /// Store key of the watermark
    pub fn watermark_key(&self) -> String {
        watermark_key(&self.checkpoint_key)
    }

    /// Whether runs after the first are narrowed by a watermark filter
    pub fn is_incremental(&self) -> bool {
        self.filter_template.is_some()
    }

    /// Check the descriptor is usable.
    pub fn validate(&self) -> Result<(), CollectError> {
        let invalid = |reason: String| CollectError::InvalidCollection {
            name: self.name.clone(),
            reason,
        };

        if self.name.is_empty()
            || !self
                .name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(invalid(
                "name must be non-empty ASCII letters, digits, '_' or '-'".to_string(),
            ));
        }
        if !self.resource_path.starts_with('/') {
            return Err(invalid(format!(
                "resource_path {:?} must start with '/'",
                self.resource_path
            )));
        }
        if self.sourcetype.trim().is_empty() {
            return Err(invalid("sourcetype is empty".to_string()));
        }
        if self.checkpoint_key.trim().is_empty() {
            return Err(invalid("checkpoint_key is empty".to_string()));
        }
        if self.page_size == Some(0) {
            return Err(invalid("page_size must be positive".to_string()));
        }
        if let Some(template) = &self.filter_template {
            if !template.contains("{watermark}") {
                return Err(invalid(
                    "filter_template has no {watermark} placeholder".to_string(),
                ));
            }
            if self.timestamp_fields.is_empty() {
                return Err(invalid(
                    "filter_template requires at least one timestamp field".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Builder for [`CollectionTaskConfig`]
#[derive(Debug, Clone)]
pub struct CollectionTaskConfigBuilder {
    config: CollectionTaskConfig,
}

impl CollectionTaskConfigBuilder {
    /// `$top` for the first request
    pub fn page_size(mut self, size: u32) -> Self {
        self.config.page_size = Some(size);
        self
    }

    /// Add a timestamp field path.
    pub fn timestamp_field(mut self, path: impl Into<String>) -> Self {
        self.config.timestamp_fields.push(path.into());
        self
    }

    /// Watermark filter template
    pub fn filter_template(mut self, template: impl Into<String>) -> Self {
        self.config.filter_template = Some(template.into());
        self
    }

    /// Override the checkpoint key prefix.
    pub fn checkpoint_key(mut self, key: impl Into<String>) -> Self {
        self.config.checkpoint_key = key.into();
        self
    }

    /// Add a query parameter to the first request.
    pub fn extra_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.extra_params.insert(name.into(), value.into());
        self
    }

    /// Response envelope
    pub fn response_style(mut self, style: ResponseStyle) -> Self {
        self.config.response_style = style;
        self
    }

    /// Description
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.config.description = description.into();
        self
    }

    /// Validate and return the descriptor.
    pub fn build(self) -> Result<CollectionTaskConfig, CollectError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
