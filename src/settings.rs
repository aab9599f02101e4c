//! Settings snapshot and secret lookup
//!
//! Settings are a flat map of string keys to string values. They come from an
//! optional TOML file, overlaid by `EASM_<KEY>` environment variables. Secrets
//! are looked up by logical name through [`SecretSource`] and never stored in
//! the settings map.
//!
//! ```toml
//! [settings]
//! tenant_id = "00000000-0000-0000-0000-000000000000"
//! client_id = "11111111-1111-1111-1111-111111111111"
//! subscription_id = "sub"
//! resource_group = "rg"
//! workspace_name = "ws"
//!
//! [secrets]
//! client_secret = "..."
//! ```

use secrecy::{ExposeSecret, SecretString};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::debug;

use crate::collector::config::DEFAULT_API_VERSION;

/// Default OAuth2 authority
pub const DEFAULT_AUTHORITY_URL: &str = "https://login.microsoftonline.com";
/// Default token scope for the EASM data plane
pub const DEFAULT_SCOPE: &str = "https://api.easm.defender.microsoft.com/.default";
/// Default data-plane endpoint
pub const DEFAULT_DATA_PLANE_ENDPOINT: &str = "https://api.easm.defender.microsoft.com";
/// Default downstream index label
pub const DEFAULT_TARGET_INDEX: &str = "security_defender_easm";

/// Logical name of the OAuth2 client secret
pub const CLIENT_SECRET: &str = "client_secret";
/// Logical name of the proxy password
pub const PROXY_PASSWORD: &str = "proxy_password";

const ENV_PREFIX: &str = "EASM_";

/// Setting keys recognised in files and the environment.
pub const KNOWN_KEYS: &[&str] = &[
    "tenant_id",
    "client_id",
    "authority_url",
    "scope",
    "subscription_id",
    "resource_group",
    "workspace_name",
    "data_plane_endpoint",
    "easm_base_url",
    "api_version",
    "use_proxy",
    "proxy_url",
    "proxy_username",
    "target_index",
    "access_token",
];

/// Configuration errors. All of them are fatal before any network call.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required setting is absent or empty
    #[error("missing required setting '{0}'")]
    MissingSetting(String),

    /// A required secret is absent
    #[error("missing required secret '{0}'")]
    MissingSecret(String),

    /// A setting has an unusable value
    #[error("invalid value for '{key}': {reason}")]
    InvalidValue {
        /// Setting key
        key: String,
        /// What is wrong with it
        reason: String,
    },

    /// The proxy URL cannot be parsed or carry credentials
    #[error("invalid proxy URL: {0}")]
    InvalidProxyUrl(String),

    /// The HTTP client could not be built
    #[error("HTTP client error: {0}")]
    HttpClient(String),

    /// Settings file could not be read
    #[error("IO error: {0}")]
    IoError(String),

    /// Settings file could not be parsed
    #[error("parse error: {0}")]
    ParseError(String),
}

/// Interpret a flag value. `1`, `true`, `yes` and `on` are truthy.
pub fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Read-only settings snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    values: BTreeMap<String, String>,
}

impl Settings {
    /// Empty settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Build settings from key/value pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Parse a settings document.
    ///
    /// String values in a `[settings]` table, or at the top level, become
    /// settings. String values in a `[secrets]` table become static secrets.
    pub fn from_toml_str(input: &str) -> Result<(Self, StaticSecrets), ConfigError> {
        let doc: toml::Table = input
            .parse()
            .map_err(|e: toml::de::Error| ConfigError::ParseError(e.message().to_string()))?;

        let mut settings = Settings::new();
        let mut secrets = StaticSecrets::new();

        for (key, value) in &doc {
            match (key.as_str(), value) {
                ("settings", toml::Value::Table(table)) => {
                    for (k, v) in table {
                        settings.set(k, toml_scalar(k, v)?);
                    }
                }
                ("secrets", toml::Value::Table(table)) => {
                    for (k, v) in table {
                        secrets.insert(k, toml_scalar(k, v)?);
                    }
                }
                (_, toml::Value::Table(_)) => {
                    debug!(table = %key, "Ignoring unknown settings table");
                }
                (k, v) => settings.set(k, toml_scalar(k, v)?),
            }
        }

        Ok((settings, secrets))
    }

    /// Load settings from an optional file, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<(Self, StaticSecrets), ConfigError> {
        let (mut settings, mut secrets) = match path {
            Some(path) => {
                let contents = std::fs::read_to_string(path).map_err(|e| {
                    ConfigError::IoError(format!("failed to read {}: {e}", path.display()))
                })?;
                Self::from_toml_str(&contents)?
            }
            None => (Settings::new(), StaticSecrets::new()),
        };

        settings.apply_overrides(|name| std::env::var(name).ok());
        secrets.apply_overrides(|name| std::env::var(name).ok());
        Ok((settings, secrets))
    }

    /// Overlay values from `EASM_<KEY>` variables using the given lookup.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        for key in KNOWN_KEYS {
            if let Some(value) = lookup(&env_name(key)) {
                debug!(key = %key, "Setting overridden from environment");
                self.set(*key, value);
            }
        }
    }

    /// Set a value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// Value for `key`, ignoring empty and whitespace-only values.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    /// Value for `key` or a default.
    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    /// Value for a required key.
    pub fn require(&self, key: &str) -> Result<&str, ConfigError> {
        self.get(key)
            .ok_or_else(|| ConfigError::MissingSetting(key.to_string()))
    }

    /// Truthiness of a flag setting. Absent flags are false.
    pub fn flag(&self, key: &str) -> bool {
        self.get(key).is_some_and(is_truthy)
    }

    /// Keys present in the snapshot
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Data-plane API version
    pub fn api_version(&self) -> &str {
        self.get_or("api_version", DEFAULT_API_VERSION)
    }

    /// Downstream index label carried on every event
    pub fn target_index(&self) -> &str {
        self.get_or("target_index", DEFAULT_TARGET_INDEX)
    }

    /// Workspace base URL on the data plane.
    ///
    /// `easm_base_url` wins when set. Otherwise the URL is derived from the
    /// endpoint, subscription, resource group and workspace name.
    pub fn data_plane_base_url(&self) -> Result<String, ConfigError> {
        if let Some(base) = self.get("easm_base_url") {
            return Ok(base.trim_end_matches('/').to_string());
        }

        let endpoint = self
            .get_or("data_plane_endpoint", DEFAULT_DATA_PLANE_ENDPOINT)
            .trim_end_matches('/');
        let subscription = self.require("subscription_id")?;
        let resource_group = self.require("resource_group")?;
        let workspace = self.require("workspace_name")?;

        Ok(format!(
            "{endpoint}/subscriptions/{subscription}/resourceGroups/{resource_group}/providers/Microsoft.Easm/workspaces/{workspace}"
        ))
    }

    /// Check everything a collection run needs before touching the network.
    pub fn validate_for_collection(&self, secrets: &dyn SecretSource) -> Result<(), ConfigError> {
        self.data_plane_base_url()?;

        if self.get("access_token").is_none() {
            self.require("tenant_id")?;
            self.require("client_id")?;
            if secrets.secret(CLIENT_SECRET).is_none() {
                return Err(ConfigError::MissingSecret(CLIENT_SECRET.to_string()));
            }
        }

        if self.flag("use_proxy") {
            self.require("proxy_url")?;
        }
        Ok(())
    }
}

fn env_name(key: &str) -> String {
    format!("{ENV_PREFIX}{}", key.to_ascii_uppercase())
}

fn toml_scalar(key: &str, value: &toml::Value) -> Result<String, ConfigError> {
    match value {
        toml::Value::String(s) => Ok(s.clone()),
        toml::Value::Integer(i) => Ok(i.to_string()),
        toml::Value::Boolean(b) => Ok(b.to_string()),
        toml::Value::Float(f) => Ok(f.to_string()),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            reason: "expected a string, number or boolean".to_string(),
        }),
    }
}

/// Secret lookup by logical name
pub trait SecretSource: Send + Sync {
    /// Look up a secret. Empty secrets are reported as absent.
    fn secret(&self, name: &str) -> Option<SecretString>;
}

/// Secrets read from `EASM_<NAME>` environment variables
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvSecrets;

impl SecretSource for EnvSecrets {
    fn secret(&self, name: &str) -> Option<SecretString> {
        std::env::var(env_name(name))
            .ok()
            .filter(|v| !v.is_empty())
            .map(SecretString::from)
    }
}

/// In-memory secrets, typically from the `[secrets]` table of a settings file
#[derive(Debug, Default)]
pub struct StaticSecrets {
    values: HashMap<String, SecretString>,
}

impl StaticSecrets {
    /// Empty secret set
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from name/value pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut secrets = Self::new();
        for (k, v) in pairs {
            secrets.insert(k, v);
        }
        secrets
    }

    /// Add or replace a secret.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values
            .insert(name.into(), SecretString::from(value.into()));
    }

    /// Overlay secrets from `EASM_<NAME>` variables using the given lookup.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        for name in [CLIENT_SECRET, PROXY_PASSWORD] {
            if let Some(value) = lookup(&env_name(name)).filter(|v| !v.is_empty()) {
                self.insert(name, value);
            }
        }
    }
}

impl SecretSource for StaticSecrets {
    fn secret(&self, name: &str) -> Option<SecretString> {
        self.values
            .get(name)
            .filter(|s| !s.expose_secret().is_empty())
            .map(|s| SecretString::from(s.expose_secret().to_owned()))
    }
}
