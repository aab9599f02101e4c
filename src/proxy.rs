//! Outbound proxy resolution
//!
//! [`resolve`] is a pure function of the settings snapshot and the proxy
//! password. It never touches the network.

use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use url::Url;

use crate::settings::{ConfigError, Settings};

/// Resolved proxy route
#[derive(Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    url: String,
}

impl ProxyConfig {
    /// Effective proxy URL, including any embedded credentials.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Whether the URL carries basic-auth credentials.
    pub fn has_credentials(&self) -> bool {
        Url::parse(&self.url)
            .map(|u| !u.username().is_empty() || u.password().is_some())
            .unwrap_or(false)
    }

    /// URL with the password masked, safe for logs.
    pub fn redacted(&self) -> String {
        match Url::parse(&self.url) {
            Ok(mut u) if u.password().is_some() => {
                let _ = u.set_password(Some("****"));
                strip_root_slash(u.as_str(), &self.url)
            }
            _ => self.url.clone(),
        }
    }

    /// Proxy applied to both http and https traffic.
    pub fn to_reqwest(&self) -> Result<reqwest::Proxy, ConfigError> {
        reqwest::Proxy::all(&self.url).map_err(|e| ConfigError::InvalidProxyUrl(e.to_string()))
    }
}

impl fmt::Debug for ProxyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyConfig")
            .field("url", &self.redacted())
            .finish()
    }
}

/// Build the proxy route from settings.
///
/// - `use_proxy` absent or false: no proxy
/// - `proxy_url` absent: no proxy
/// - `proxy_url` only: direct route
/// - `proxy_username` (and optionally a password): credentials embedded,
///   percent-encoded, unless the URL already carries credentials
pub fn resolve(
    settings: &Settings,
    password: Option<&SecretString>,
) -> Result<Option<ProxyConfig>, ConfigError> {
    if !settings.flag("use_proxy") {
        return Ok(None);
    }
    let Some(raw) = settings.get("proxy_url") else {
        return Ok(None);
    };

    let normalized = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("http://{raw}")
    };

    let mut url = Url::parse(&normalized)
        .map_err(|e| ConfigError::InvalidProxyUrl(format!("{raw}: {e}")))?;
    if url.host_str().is_none() {
        return Err(ConfigError::InvalidProxyUrl(format!("{raw}: missing host")));
    }

    if !url.username().is_empty() || url.password().is_some() {
        return Ok(Some(ProxyConfig { url: normalized }));
    }

    let Some(username) = settings.get("proxy_username") else {
        return Ok(Some(ProxyConfig { url: normalized }));
    };

    url.set_username(username)
        .map_err(|_| ConfigError::InvalidProxyUrl(format!("{raw}: cannot carry credentials")))?;

    let password = password
        .map(|p| p.expose_secret())
        .filter(|p| !p.is_empty());
    if let Some(password) = password {
        url.set_password(Some(password))
            .map_err(|_| ConfigError::InvalidProxyUrl(format!("{raw}: cannot carry credentials")))?;
    }

    Ok(Some(ProxyConfig {
        url: strip_root_slash(url.as_str(), &normalized),
    }))
}

// Url always serializes an empty path as "/". Keep the configured form.
fn strip_root_slash(serialized: &str, configured: &str) -> String {
    if serialized.ends_with('/') && !configured.ends_with('/') {
        serialized.trim_end_matches('/').to_string()
    } else {
        serialized.to_string()
    }
}
