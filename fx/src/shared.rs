//! Shared, cross-process rate store adapter.
//!
//! The shared store sits between the local cache and the upstream source.
//! It is strictly best-effort: the resolver turns every failure here into a
//! miss or a skipped write.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use ratebank_common::{to_chrono, Clock, SystemClock, Timestamp};
use rust_decimal::Decimal;
use thiserror::Error;

/// Failures reaching the shared store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SharedStoreError {
    /// The backing service could not be reached or refused the operation.
    #[error("Shared store unavailable: {0}")]
    Unavailable(String),
}

/// Narrow read/write-with-expiry interface over an external cache.
///
/// Keys are `"FROM:TO"` with uppercase codes. Implementations must not block
/// indefinitely.
pub trait SharedStore: Send + Sync {
    /// Read a live value.
    fn read(&self, key: &str) -> Result<Option<Decimal>, SharedStoreError>;

    /// Write a value that expires after `expires_in`.
    fn write(&self, key: &str, value: Decimal, expires_in: Duration) -> Result<(), SharedStoreError>;

    /// Remove a value. Missing keys are not an error.
    fn delete(&self, key: &str) -> Result<(), SharedStoreError>;
}

#[derive(Debug, Clone)]
struct SharedEntry {
    value: Decimal,
    expires_at: Timestamp,
}

/// In-process shared store, for single-host deployments and tests.
pub struct MemorySharedStore {
    entries: DashMap<String, SharedEntry>,
    clock: Arc<dyn Clock>,
}

impl MemorySharedStore {
    /// Create a store that reads the wall clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a store driven by the given clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    /// Number of stored entries, live or not yet evicted.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for MemorySharedStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedStore for MemorySharedStore {
    fn read(&self, key: &str) -> Result<Option<Decimal>, SharedStoreError> {
        let now = self.clock.now();
        if let Some(entry) = self.entries.get(key) {
            if now < entry.expires_at {
                return Ok(Some(entry.value));
            }
        }
        self.entries.remove_if(key, |_, entry| now >= entry.expires_at);
        Ok(None)
    }

    fn write(&self, key: &str, value: Decimal, expires_in: Duration) -> Result<(), SharedStoreError> {
        let expires_at = self
            .clock
            .now()
            .checked_add_signed(to_chrono(expires_in))
            .unwrap_or(Timestamp::MAX_UTC);

        self.entries
            .insert(key.to_string(), SharedEntry { value, expires_at });
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), SharedStoreError> {
        self.entries.remove(key);
        Ok(())
    }
}
