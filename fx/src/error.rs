//! FX resolver error types.

use ratebank_common::{CurrencyError, CurrencyPair};
use thiserror::Error;

use crate::decoder::DecodeError;

/// Errors that can occur while resolving a rate.
#[derive(Debug, Error)]
pub enum FxError {
    /// An input identifier does not denote a known currency.
    #[error("Invalid currency: {0}")]
    InvalidCurrency(#[from] CurrencyError),

    /// The upstream source could not be reached.
    #[error("Network error for {pair} after {attempts} attempt(s): {reason}")]
    Network {
        pair: CurrencyPair,
        attempts: u32,
        reason: String,
    },

    /// Upstream reports that no conversion exists for the pair.
    #[error("Unknown rate for {0}")]
    UnknownRate(CurrencyPair),

    /// Upstream answered with content that could not be decoded.
    #[error("Unrecognized upstream response for {pair}: {reason}")]
    Upstream { pair: CurrencyPair, reason: String },

    /// Configuration is inconsistent.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl FxError {
    /// Map a decoder failure onto the pair it was fetched for.
    pub fn from_decode(pair: &CurrencyPair, err: DecodeError) -> Self {
        match err {
            DecodeError::NoConversion => FxError::UnknownRate(pair.clone()),
            DecodeError::Unrecognized(reason) => FxError::Upstream {
                pair: pair.clone(),
                reason,
            },
        }
    }

    /// Attribute a failure to `pair`, e.g. when it came from fetching the
    /// opposite direction on its behalf.
    pub fn for_pair(self, pair: &CurrencyPair) -> Self {
        match self {
            FxError::Network { attempts, reason, .. } => FxError::Network {
                pair: pair.clone(),
                attempts,
                reason,
            },
            FxError::UnknownRate(_) => FxError::UnknownRate(pair.clone()),
            FxError::Upstream { reason, .. } => FxError::Upstream {
                pair: pair.clone(),
                reason,
            },
            other => other,
        }
    }

    /// Whether the fallback table should be consulted for this failure.
    pub fn triggers_fallback(&self) -> bool {
        matches!(self, FxError::UnknownRate(_) | FxError::Upstream { .. })
    }

    /// Get error code for log events and operator output.
    pub fn error_code(&self) -> &'static str {
        match self {
            FxError::InvalidCurrency(_) => "INVALID_CURRENCY",
            FxError::Network { .. } => "NETWORK_ERROR",
            FxError::UnknownRate(_) => "UNKNOWN_RATE",
            FxError::Upstream { .. } => "UPSTREAM_ERROR",
            FxError::InvalidConfig(_) => "INVALID_CONFIG",
        }
    }
}

/// Result type for FX operations.
pub type FxResult<T> = Result<T, FxError>;

#[cfg(test)]
mod tests {
    use super::*;
    use ratebank_common::Currency;

    fn pair() -> CurrencyPair {
        CurrencyPair::new(Currency::usd(), Currency::eur())
    }

    #[test]
    fn test_decode_mapping() {
        let unknown = FxError::from_decode(&pair(), DecodeError::NoConversion);
        assert!(matches!(unknown, FxError::UnknownRate(ref p) if *p == pair()));

        let upstream = FxError::from_decode(&pair(), DecodeError::Unrecognized("junk".into()));
        assert!(matches!(upstream, FxError::Upstream { ref reason, .. } if reason == "junk"));
    }

    #[test]
    fn test_fallback_classification() {
        assert!(FxError::UnknownRate(pair()).triggers_fallback());
        assert!(FxError::Upstream {
            pair: pair(),
            reason: String::new()
        }
        .triggers_fallback());
        assert!(!FxError::Network {
            pair: pair(),
            attempts: 3,
            reason: "refused".into()
        }
        .triggers_fallback());
        assert!(!FxError::InvalidCurrency(CurrencyError::Unknown("X".into())).triggers_fallback());
    }

    #[test]
    fn test_for_pair_keeps_kind() {
        let requested = CurrencyPair::new(Currency::usd(), Currency::new("VND"));
        let inverse = requested.inverse();

        let unknown = FxError::UnknownRate(inverse.clone()).for_pair(&requested);
        assert!(matches!(unknown, FxError::UnknownRate(ref p) if *p == requested));

        let network = FxError::Network {
            pair: inverse,
            attempts: 2,
            reason: "timeout".into(),
        }
        .for_pair(&requested);
        assert!(matches!(
            network,
            FxError::Network { ref pair, attempts: 2, .. } if *pair == requested
        ));
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(FxError::UnknownRate(pair()).error_code(), "UNKNOWN_RATE");
        assert_eq!(
            FxError::InvalidConfig("x".into()).error_code(),
            "INVALID_CONFIG"
        );
    }
}
