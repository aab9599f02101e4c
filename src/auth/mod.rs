//! Bearer credentials for the data plane
//!
//! [`ClientCredentialProvider`] runs the OAuth2 client-credentials exchange
//! through the shared [`Transport`] and caches the token until shortly before
//! it expires. Refresh is lazy: the next `get_token` after expiry, or after an
//! explicit [`CredentialProvider::invalidate`], performs a new exchange.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::collector::config::{
    DEFAULT_TOKEN_LIFETIME_SECS, MAX_TOKEN_LIFETIME_SECS, TOKEN_REFRESH_SKEW_SECS,
};
use crate::fetcher::{Transport, TransportError, TransportErrorKind, TransportRequest};
use crate::metrics::record_token_refresh;
use crate::settings::{
    ConfigError, SecretSource, Settings, CLIENT_SECRET, DEFAULT_AUTHORITY_URL, DEFAULT_SCOPE,
};

/// Credential errors. Fatal for the run.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The token endpoint could not be reached after retries
    #[error("token endpoint unreachable: {0}")]
    Exchange(#[source] TransportError),

    /// The token endpoint answered with a non-success status
    #[error("token endpoint returned HTTP {status}: {message}")]
    Rejected {
        /// HTTP status
        status: u16,
        /// Response body excerpt
        message: String,
    },

    /// The response has no `access_token`
    #[error("token response did not contain an access_token")]
    MissingToken,

    /// The response is not a JSON object
    #[error("invalid token response: {0}")]
    InvalidResponse(String),
}

impl From<TransportError> for AuthError {
    fn from(err: TransportError) -> Self {
        match err.kind {
            TransportErrorKind::HttpStatus(status) => AuthError::Rejected {
                status,
                message: err.message,
            },
            _ => AuthError::Exchange(err),
        }
    }
}

/// Source of bearer tokens
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Current token, exchanging a new one if the cache is empty or expired.
    async fn get_token(&self) -> Result<String, AuthError>;

    /// Drop the cached token so the next call performs a fresh exchange.
    async fn invalidate(&self);
}

/// Client-credentials grant parameters
#[derive(Debug)]
pub struct ClientCredentials {
    tenant_id: String,
    client_id: String,
    client_secret: SecretString,
    authority_url: String,
    scope: String,
}

impl ClientCredentials {
    /// Credentials with the default authority and scope
    pub fn new(
        tenant_id: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: SecretString,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            client_id: client_id.into(),
            client_secret,
            authority_url: DEFAULT_AUTHORITY_URL.to_string(),
            scope: DEFAULT_SCOPE.to_string(),
        }
    }

    /// Override the authority, e.g. for sovereign clouds or tests.
    pub fn with_authority(mut self, authority_url: impl Into<String>) -> Self {
        self.authority_url = authority_url.into();
        self
    }

    /// Override the requested scope.
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    /// Read tenant, client, authority and scope from settings and the client
    /// secret from `secrets`.
    pub fn from_settings(
        settings: &Settings,
        secrets: &dyn SecretSource,
    ) -> Result<Self, ConfigError> {
        let tenant_id = settings.require("tenant_id")?;
        let client_id = settings.require("client_id")?;
        let client_secret = secrets
            .secret(CLIENT_SECRET)
            .ok_or_else(|| ConfigError::MissingSecret(CLIENT_SECRET.to_string()))?;

        Ok(Self::new(tenant_id, client_id, client_secret)
            .with_authority(settings.get_or("authority_url", DEFAULT_AUTHORITY_URL))
            .with_scope(settings.get_or("scope", DEFAULT_SCOPE)))
    }

    /// `{authority}/{tenant}/oauth2/v2.0/token`
    pub fn token_url(&self) -> String {
        format!(
            "{}/{}/oauth2/v2.0/token",
            self.authority_url.trim_end_matches('/'),
            self.tenant_id
        )
    }

    /// Client ID
    pub fn client_id(&self) -> &str {
        &self.client_id
    }
}

/// Token endpoint response. `expires_in` is a number on v2 endpoints and a
/// string on some v1 deployments.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    expires_in: Option<serde_json::Value>,
}

impl TokenResponse {
    fn lifetime_secs(&self) -> i64 {
        match &self.expires_in {
            Some(serde_json::Value::Number(n)) => n.as_i64(),
            Some(serde_json::Value::String(s)) => s.trim().parse().ok(),
            _ => None,
        }
        .filter(|secs| *secs > 0)
        .map(|secs| secs.min(MAX_TOKEN_LIFETIME_SECS))
        .unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS)
    }
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_expired(&self, skew: Duration) -> bool {
        Utc::now() + skew >= self.expires_at
    }
}

/// Client-credentials provider with an in-memory token cache
pub struct ClientCredentialProvider {
    credentials: ClientCredentials,
    transport: Arc<Transport>,
    cached_token: RwLock<Option<CachedToken>>,
    refresh_skew: Duration,
}

impl ClientCredentialProvider {
    /// Provider exchanging `credentials` over `transport`.
    pub fn new(credentials: ClientCredentials, transport: Arc<Transport>) -> Self {
        Self {
            credentials,
            transport,
            cached_token: RwLock::new(None),
            refresh_skew: Duration::seconds(TOKEN_REFRESH_SKEW_SECS),
        }
    }

    /// Treat tokens as expired this long before their stated expiry.
    pub fn with_refresh_skew(mut self, skew: Duration) -> Self {
        self.refresh_skew = skew;
        self
    }

    /// Expiry of the cached token, if any
    pub async fn cached_expiry(&self) -> Option<DateTime<Utc>> {
        self.cached_token.read().await.as_ref().map(|t| t.expires_at)
    }

    #[instrument(skip(self), fields(client_id = %self.credentials.client_id))]
    async fn exchange(&self) -> Result<CachedToken, AuthError> {
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.expose_secret()),
            ("scope", self.credentials.scope.as_str()),
        ];
        let request =
            TransportRequest::post_form(self.credentials.token_url(), form).accept_json();

        let response = self.transport.request(&request).await.map_err(|e| {
            warn!(error = %e, "Token exchange failed");
            AuthError::from(e)
        })?;

        let parsed: TokenResponse = response
            .json()
            .map_err(|e| AuthError::InvalidResponse(e.to_string()))?;
        let lifetime = parsed.lifetime_secs();
        let access_token = parsed
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::MissingToken)?;

        let now = Utc::now();
        let expires_at = Duration::try_seconds(lifetime)
            .and_then(|lifetime| now.checked_add_signed(lifetime))
            .unwrap_or(now + Duration::seconds(DEFAULT_TOKEN_LIFETIME_SECS));
        info!(
            expires_at = %expires_at.format("%Y-%m-%d %H:%M:%S UTC"),
            "Acquired access token"
        );
        Ok(CachedToken {
            access_token,
            expires_at,
        })
    }
}

#[async_trait]
impl CredentialProvider for ClientCredentialProvider {
    async fn get_token(&self) -> Result<String, AuthError> {
        {
            let cache = self.cached_token.read().await;
            if let Some(token) = cache.as_ref() {
                if !token.is_expired(self.refresh_skew) {
                    debug!("Using cached token");
                    return Ok(token.access_token.clone());
                }
            }
        }

        let mut cache = self.cached_token.write().await;
        // Another caller may have refreshed while we waited for the lock.
        if let Some(token) = cache.as_ref() {
            if !token.is_expired(self.refresh_skew) {
                return Ok(token.access_token.clone());
            }
        }

        debug!("Refreshing access token");
        match self.exchange().await {
            Ok(token) => {
                record_token_refresh(true);
                let access_token = token.access_token.clone();
                *cache = Some(token);
                Ok(access_token)
            }
            Err(e) => {
                record_token_refresh(false);
                Err(e)
            }
        }
    }

    async fn invalidate(&self) {
        debug!("Invalidating cached token");
        *self.cached_token.write().await = None;
    }
}

/// Provider returning a pre-issued token, e.g. from the `access_token` setting
pub struct StaticTokenProvider {
    token: SecretString,
}

impl StaticTokenProvider {
    /// Provider for `token`
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: SecretString::from(token.into()),
        }
    }
}

#[async_trait]
impl CredentialProvider for StaticTokenProvider {
    async fn get_token(&self) -> Result<String, AuthError> {
        Ok(self.token.expose_secret().to_string())
    }

    async fn invalidate(&self) {
        debug!("Static token cannot be refreshed");
    }
}

/// Provider for a run: a static token when `access_token` is set, the
/// client-credentials exchange otherwise.
pub fn provider_from_settings(
    settings: &Settings,
    secrets: &dyn SecretSource,
    transport: Arc<Transport>,
) -> Result<Arc<dyn CredentialProvider>, ConfigError> {
    if let Some(token) = settings.get("access_token") {
        return Ok(Arc::new(StaticTokenProvider::new(token)));
    }
    let credentials = ClientCredentials::from_settings(settings, secrets)?;
    Ok(Arc::new(ClientCredentialProvider::new(credentials, transport)))
}
