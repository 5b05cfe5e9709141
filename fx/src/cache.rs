//! Local rate store with whole-store expiry.
//!
//! Expiry is generational: when a TTL is configured, the whole store is
//! flushed once `now >= expires_at`, and the deadline moves to `now + ttl`.
//! Individual entries carry no TTL of their own. The check runs lazily on
//! lookup; nothing ticks in the background.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use ratebank_common::{to_chrono, Clock, CurrencyPair, Timestamp};
use rust_decimal::Decimal;
use tracing::{debug, info};

/// A resolved rate held by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Pair the rate converts.
    pub pair: CurrencyPair,
    /// Units of quote per unit of base.
    pub rate: Decimal,
    /// When the rate was stored.
    pub resolved_at: Timestamp,
}

#[derive(Debug, Default)]
struct StoreState {
    entries: HashMap<CurrencyPair, CacheEntry>,
    ttl: Option<Duration>,
    expires_at: Option<Timestamp>,
}

impl StoreState {
    fn refresh_expiration(&mut self, now: Timestamp) {
        self.expires_at = self.ttl.map(|ttl| {
            now.checked_add_signed(to_chrono(ttl))
                .unwrap_or(Timestamp::MAX_UTC)
        });
    }

    fn expire(&mut self, now: Timestamp) -> bool {
        match self.expires_at {
            Some(deadline) if now >= deadline => {
                let flushed = self.entries.len();
                self.entries.clear();
                self.refresh_expiration(now);
                info!(flushed, next_expiry = ?self.expires_at, "Rate store expired");
                true
            }
            _ => false,
        }
    }
}

/// Thread-safe rate store guarded by a single lock.
pub struct RateStore {
    state: Mutex<StoreState>,
    clock: Arc<dyn Clock>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl RateStore {
    /// Create a store with the given TTL policy.
    pub fn new(clock: Arc<dyn Clock>, ttl: Option<Duration>) -> Self {
        let store = Self {
            state: Mutex::new(StoreState::default()),
            clock,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        };
        store.configure_ttl(ttl);
        store
    }

    /// Set or clear the TTL. Setting it restarts the expiry clock from now.
    pub fn configure_ttl(&self, ttl: Option<Duration>) {
        let now = self.clock.now();
        let mut state = self.state.lock();
        state.ttl = ttl;
        state.refresh_expiration(now);
    }

    /// Current TTL.
    pub fn ttl(&self) -> Option<Duration> {
        self.state.lock().ttl
    }

    /// Current expiry deadline, if a TTL is set.
    pub fn expires_at(&self) -> Option<Timestamp> {
        self.state.lock().expires_at
    }

    /// Flush everything if the deadline has passed. Returns whether it did.
    pub fn expire(&self) -> bool {
        let now = self.clock.now();
        self.state.lock().expire(now)
    }

    /// Run the expiry check and look up a pair in one critical section.
    pub fn lookup(&self, pair: &CurrencyPair) -> Option<Decimal> {
        let now = self.clock.now();
        let rate = {
            let mut state = self.state.lock();
            state.expire(now);
            state.entries.get(pair).map(|entry| entry.rate)
        };

        match rate {
            Some(_) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(pair = %pair, "Cache hit");
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!(pair = %pair, "Cache miss");
            }
        }
        rate
    }

    /// Get an entry without touching expiry or counters.
    pub fn peek(&self, pair: &CurrencyPair) -> Option<CacheEntry> {
        self.state.lock().entries.get(pair).cloned()
    }

    /// Store a rate, replacing any previous entry for the pair.
    pub fn insert(&self, pair: CurrencyPair, rate: Decimal) {
        let entry = CacheEntry {
            pair: pair.clone(),
            rate,
            resolved_at: self.clock.now(),
        };
        self.state.lock().entries.insert(pair, entry);
    }

    /// Remove one directional entry.
    pub fn remove(&self, pair: &CurrencyPair) -> Option<Decimal> {
        self.state.lock().entries.remove(pair).map(|entry| entry.rate)
    }

    /// Clear all cached rates. The TTL deadline is left as is.
    pub fn clear(&self) {
        self.state.lock().entries.clear();
    }

    /// Cached pairs, sorted.
    pub fn pairs(&self) -> Vec<CurrencyPair> {
        let mut pairs: Vec<CurrencyPair> = self.state.lock().entries.keys().cloned().collect();
        pairs.sort();
        pairs
    }

    /// Get the number of entries in the store.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    /// Get store statistics.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

/// Store statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}
