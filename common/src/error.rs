//! Error types for currency handling.

use thiserror::Error;

/// Errors raised while normalizing currency identifiers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CurrencyError {
    /// The identifier does not denote a known ISO 4217 currency.
    #[error("Unknown currency: {0}")]
    Unknown(String),
}

impl CurrencyError {
    /// Get error code for log events and operator output.
    pub fn error_code(&self) -> &'static str {
        match self {
            CurrencyError::Unknown(_) => "UNKNOWN_CURRENCY",
        }
    }
}
