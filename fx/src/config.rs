//! Resolver configuration.

use std::time::Duration;

use rust_decimal::Decimal;

use crate::error::{FxError, FxResult};
use crate::retry::RetryPolicy;

/// Default upstream converter endpoint.
pub const DEFAULT_ENDPOINT: &str = "http://www.google.com/finance/converter";

/// Configuration for the rate resolver.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Local store TTL. `None` means cached rates never expire.
    pub ttl: Option<Duration>,
    /// Expiry applied to writes into the shared store.
    pub shared_ttl: Duration,
    /// Retry policy for upstream requests.
    pub retry: RetryPolicy,
    /// Per-attempt request timeout.
    pub request_timeout: Duration,
    /// Upstream converter endpoint.
    pub endpoint: String,
    /// Direct quotes below this magnitude are replaced by the inverted
    /// quote of the opposite pair.
    pub inversion_threshold: Decimal,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            ttl: None,
            shared_ttl: Duration::from_secs(3600),
            retry: RetryPolicy::default(),
            request_timeout: Duration::from_secs(10),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            inversion_threshold: Decimal::new(1, 1),
        }
    }
}

impl ResolverConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    ///
    /// Unparseable values are ignored and the default is kept.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let secs = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        if let Some(ttl) = secs("RATEBANK_TTL_SECS") {
            config.ttl = Some(Duration::from_secs(ttl));
        }

        if let Some(ttl) = secs("RATEBANK_SHARED_TTL_SECS") {
            config.shared_ttl = Duration::from_secs(ttl);
        }

        if let Some(attempts) = lookup("RATEBANK_MAX_ATTEMPTS").and_then(|v| v.trim().parse().ok()) {
            config.retry.max_attempts = attempts;
        }

        if let Some(ms) = secs("RATEBANK_BACKOFF_STEP_MS") {
            config.retry.backoff_step = Duration::from_millis(ms);
        }

        if let Some(timeout) = secs("RATEBANK_REQUEST_TIMEOUT_SECS") {
            config.request_timeout = Duration::from_secs(timeout);
        }

        if let Some(endpoint) = lookup("RATEBANK_ENDPOINT") {
            config.endpoint = endpoint;
        }

        config
    }

    /// Validate configuration.
    pub fn validate(&self) -> FxResult<()> {
        if self.retry.max_attempts == 0 {
            return Err(FxError::InvalidConfig("max attempts must be at least 1".to_string()));
        }

        if self.request_timeout.is_zero() {
            return Err(FxError::InvalidConfig("request timeout cannot be zero".to_string()));
        }

        if self.shared_ttl.is_zero() {
            return Err(FxError::InvalidConfig("shared store TTL cannot be zero".to_string()));
        }

        if self.endpoint.trim().is_empty() {
            return Err(FxError::InvalidConfig("endpoint cannot be empty".to_string()));
        }

        if self.inversion_threshold.is_sign_negative() {
            return Err(FxError::InvalidConfig("inversion threshold cannot be negative".to_string()));
        }

        Ok(())
    }
}
