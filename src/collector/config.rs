//! Collection engine constants

use std::time::Duration;

/// Maximum number of attempts for a single HTTP request (first try included).
pub const MAX_ATTEMPTS: u32 = 5;

/// Linear backoff unit. The delay before attempt `n + 1` is `n * BACKOFF_UNIT`.
pub const BACKOFF_UNIT: Duration = Duration::from_secs(2);

/// Hard cap on pages walked in a single run.
pub const MAX_PAGES: u64 = 100_000;

/// Requests per second allowed on one transport.
/// Matches the 200 ms inter-page pause the hosts collection has always used.
pub const DEFAULT_REQUESTS_PER_SECOND: usize = 5;

/// Tokens are considered expired this many seconds before their stated expiry.
pub const TOKEN_REFRESH_SKEW_SECS: i64 = 60;

/// Token lifetime assumed when the token response omits `expires_in`.
pub const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;

/// Upper bound on a token lifetime taken from `expires_in`.
pub const MAX_TOKEN_LIFETIME_SECS: i64 = 86_400;

/// Default data-plane API version.
pub const DEFAULT_API_VERSION: &str = "2024-10-01-preview";

/// Calculate the linear backoff delay that follows a failed attempt.
///
/// `attempt` is 1-based: after the first failure the delay is one `unit`,
/// after the second two units, and so on.
pub fn calculate_backoff(attempt: u32, unit: Duration) -> Duration {
    unit.saturating_mul(attempt)
}
