//! Per-task dependency wiring
//!
//! Every collection task gets its own transport and credential provider, so
//! token caches and rate limits are not shared between tasks. The checkpoint
//! store is passed in and may be shared; keys never overlap.

use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::config::{BACKOFF_UNIT, DEFAULT_REQUESTS_PER_SECOND, MAX_ATTEMPTS};
use super::rate_limit::RateLimiter;
use crate::auth::provider_from_settings;
use crate::fetcher::client::{build_http_client, ClientOptions};
use crate::fetcher::{RetryPolicy, Transport, WalkContext};
use crate::proxy;
use crate::resume::CheckpointStore;
use crate::settings::{ConfigError, SecretSource, Settings, PROXY_PASSWORD};

/// Knobs for [`build_context`]
#[derive(Debug, Clone)]
pub struct EnvironmentOptions {
    /// Attempts per request, first try included
    pub max_attempts: u32,
    /// Linear backoff unit
    pub backoff_unit: Duration,
    /// Request pacing per transport, `None` to disable
    pub requests_per_second: Option<usize>,
    /// Client options; the proxy is filled in from settings
    pub client: ClientOptions,
}

impl Default for EnvironmentOptions {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            backoff_unit: BACKOFF_UNIT,
            requests_per_second: Some(DEFAULT_REQUESTS_PER_SECOND),
            client: ClientOptions::default(),
        }
    }
}

impl EnvironmentOptions {
    /// Override the attempt bound.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }
}

/// Build the walk dependencies for one task from settings.
///
/// Fails before any network call when settings are incomplete.
pub fn build_context(
    settings: &Settings,
    secrets: &dyn SecretSource,
    store: Arc<dyn CheckpointStore>,
    options: &EnvironmentOptions,
) -> Result<WalkContext, ConfigError> {
    settings.validate_for_collection(secrets)?;

    let proxy_password = secrets.secret(PROXY_PASSWORD);
    let route = proxy::resolve(settings, proxy_password.as_ref())?;
    let client_options = options.client.clone().with_proxy(route);
    let client = build_http_client(&client_options)?;

    let mut transport = Transport::new(
        client,
        RetryPolicy::new(options.max_attempts, options.backoff_unit),
    );
    if let Some(rps) = options.requests_per_second {
        transport = transport.with_rate_limiter(Arc::new(RateLimiter::per_second(rps)));
    }
    let transport = Arc::new(transport);

    let credentials = provider_from_settings(settings, secrets, transport.clone())?;
    let base_url = settings.data_plane_base_url()?;
    debug!(base_url = %base_url, api_version = settings.api_version(), "Built collection context");

    Ok(WalkContext {
        transport,
        credentials,
        store,
        base_url,
        api_version: settings.api_version().to_string(),
    })
}
