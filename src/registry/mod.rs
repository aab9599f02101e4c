//! Registry of supported collections
//!
//! The table of every collection (resource path, page size, timestamp fields,
//! filter template, sourcetype, checkpoint key) is embedded as JSON and
//! parsed once.

use once_cell::sync::Lazy;
use serde::Deserialize;
use std::collections::BTreeMap;

use crate::collector::CollectionTaskConfig;

/// Embedded registry data
const REGISTRY_JSON: &str = include_str!("collections.json");

/// Global registry instance (loaded once)
static REGISTRY: Lazy<Result<CollectionRegistry, RegistryError>> =
    Lazy::new(|| CollectionRegistry::from_json(REGISTRY_JSON));

/// Registry of collection descriptors, keyed by name
#[derive(Debug, Clone)]
pub struct CollectionRegistry {
    schema_version: String,
    entries: BTreeMap<String, CollectionTaskConfig>,
}

impl CollectionRegistry {
    /// Load the embedded registry
    ///
    /// This is a singleton operation - the registry is loaded once and cached.
    pub fn load() -> Result<&'static Self, &'static RegistryError> {
        REGISTRY.as_ref()
    }

    /// Load embedded registry, returning an owned copy
    pub fn load_embedded() -> Result<Self, RegistryError> {
        Self::from_json(REGISTRY_JSON)
    }

    /// Parse a registry document.
    pub fn from_json(json: &str) -> Result<Self, RegistryError> {
        let raw: RawRegistry = serde_json::from_str(json)
            .map_err(|e| RegistryError::ParseError(format!("Failed to parse registry: {e}")))?;

        let mut entries = BTreeMap::new();
        for entry in raw.collections {
            entry
                .validate()
                .map_err(|e| RegistryError::ParseError(e.to_string()))?;
            let name = entry.name.clone();
            if entries.insert(name.clone(), entry).is_some() {
                return Err(RegistryError::ParseError(format!(
                    "duplicate collection {name}"
                )));
            }
        }

        Ok(Self {
            schema_version: raw.schema_version,
            entries,
        })
    }

    /// Registry schema version
    pub fn schema_version(&self) -> &str {
        &self.schema_version
    }

    /// Descriptor by name
    pub fn get(&self, name: &str) -> Option<&CollectionTaskConfig> {
        self.entries.get(name)
    }

    /// Descriptor by name, or `NotFound`
    pub fn require(&self, name: &str) -> Result<&CollectionTaskConfig, RegistryError> {
        self.get(name)
            .ok_or_else(|| RegistryError::NotFound(format!("unknown collection {name}")))
    }

    /// All descriptors, sorted by name
    pub fn list_all(&self) -> Vec<&CollectionTaskConfig> {
        self.entries.values().collect()
    }

    /// Number of collections
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolve a name or a wildcard pattern to descriptors, sorted by name.
    ///
    /// `*` matches any sequence, e.g. `rbac_*` or `*_records`.
    pub fn resolve_pattern(
        &self,
        pattern: &str,
    ) -> Result<Vec<&CollectionTaskConfig>, RegistryError> {
        if !pattern.contains('*') {
            return self.require(pattern).map(|entry| vec![entry]);
        }

        let matches: Vec<&CollectionTaskConfig> = self
            .entries
            .values()
            .filter(|entry| matches_pattern(pattern, &entry.name))
            .collect();

        if matches.is_empty() {
            return Err(RegistryError::NotFound(format!(
                "pattern {pattern} does not match any collection"
            )));
        }
        Ok(matches)
    }
}

/// Match `value` against a pattern where `*` is a wildcard
pub fn matches_pattern(pattern: &str, value: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if !pattern.contains('*') {
        return pattern == value;
    }

    let parts: Vec<&str> = pattern.split('*').collect();
    let last = parts.len() - 1;
    let mut pos = 0;

    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            if !value.starts_with(part) {
                return false;
            }
            pos = part.len();
        } else if i == last {
            if value.len() < pos + part.len() || !value[pos..].ends_with(part) {
                return false;
            }
        } else if let Some(found) = value[pos..].find(part) {
            pos += found + part.len();
        } else {
            return false;
        }
    }
    true
}

#[derive(Debug, Deserialize)]
struct RawRegistry {
    schema_version: String,
    collections: Vec<CollectionTaskConfig>,
}

/// Errors that can occur when working with the registry
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Failed to parse registry JSON
    #[error("registry parse error: {0}")]
    ParseError(String),

    /// Collection not found
    #[error("{0}")]
    NotFound(String),
}
