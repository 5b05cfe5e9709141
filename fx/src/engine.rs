//! Rate resolver: the public entry point.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use ratebank_common::{Clock, Currency, CurrencyPair, Money, SystemClock, Timestamp};
use rust_decimal::Decimal;
use tracing::{debug, info, instrument, warn};

use crate::cache::{CacheStats, RateStore};
use crate::config::ResolverConfig;
use crate::decoder::ResponseDecoder;
use crate::error::{FxError, FxResult};
use crate::fallback::FallbackTable;
use crate::fetcher::{HttpTransport, RemoteFetcher, Transport};
use crate::shared::SharedStore;

/// Resolves currency-pair rates through the local store, an optional shared
/// store, the upstream source and the fallback table, in that order.
pub struct RateResolver {
    fetcher: RemoteFetcher,
    store: RateStore,
    fallback: FallbackTable,
    shared: Option<Arc<dyn SharedStore>>,
    shared_ttl: Duration,
    inversion_threshold: Decimal,
    /// One gate per pair so concurrent misses on a pair fetch once.
    in_flight: DashMap<CurrencyPair, Arc<Mutex<()>>>,
    fetches: AtomicU64,
    fallbacks: AtomicU64,
    shared_hits: AtomicU64,
}

impl RateResolver {
    /// Create a resolver over the given transport.
    pub fn new(config: ResolverConfig, transport: Arc<dyn Transport>) -> FxResult<Self> {
        config.validate()?;

        Ok(Self {
            fetcher: RemoteFetcher::new(transport, config.endpoint.clone(), config.retry.clone()),
            store: RateStore::new(Arc::new(SystemClock), config.ttl),
            fallback: FallbackTable::default(),
            shared: None,
            shared_ttl: config.shared_ttl,
            inversion_threshold: config.inversion_threshold,
            in_flight: DashMap::new(),
            fetches: AtomicU64::new(0),
            fallbacks: AtomicU64::new(0),
            shared_hits: AtomicU64::new(0),
        })
    }

    /// Create a resolver that talks HTTP to the configured endpoint.
    pub fn with_http(config: ResolverConfig) -> FxResult<Self> {
        config.validate()?;
        let transport = HttpTransport::new(config.request_timeout)?;
        Self::new(config, Arc::new(transport))
    }

    /// Drive expiry from the given clock. Cached rates are discarded.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.store = RateStore::new(clock, self.store.ttl());
        self
    }

    /// Add a shared store consulted before the upstream source.
    pub fn with_shared_store(mut self, shared: Arc<dyn SharedStore>) -> Self {
        self.shared = Some(shared);
        self
    }

    /// Replace the fallback table.
    pub fn with_fallback(mut self, fallback: FallbackTable) -> Self {
        debug!(entries = fallback.len(), "Replaced fallback table");
        self.fallback = fallback;
        self
    }

    /// Replace the response decoder.
    pub fn with_decoder(mut self, decoder: Arc<dyn ResponseDecoder>) -> Self {
        self.fetcher = self.fetcher.with_decoder(decoder);
        self
    }

    /// Resolve the rate converting one unit of `from` into `to`.
    #[instrument(skip(self))]
    pub fn resolve(&self, from: &str, to: &str) -> FxResult<Decimal> {
        let pair = CurrencyPair::parse(from, to)?;
        self.resolve_pair(&pair)
    }

    /// Resolve an already normalized pair.
    pub fn resolve_pair(&self, pair: &CurrencyPair) -> FxResult<Decimal> {
        if pair.is_identity() {
            return Ok(Decimal::ONE);
        }

        if let Some(rate) = self.store.lookup(pair) {
            return Ok(rate);
        }

        let gate = Arc::clone(&self.in_flight.entry(pair.clone()).or_default());
        let result = {
            let _guard = gate.lock();
            self.resolve_gated(pair)
        };

        // Whoever drops the last outside reference removes the gate.
        let released = Arc::as_ptr(&gate);
        drop(gate);
        self.in_flight.remove_if(pair, |_, entry| {
            std::ptr::eq(Arc::as_ptr(entry), released) && Arc::strong_count(entry) == 1
        });
        result
    }

    fn resolve_gated(&self, pair: &CurrencyPair) -> FxResult<Decimal> {
        // Filled by another caller while we waited on the gate.
        if let Some(entry) = self.store.peek(pair) {
            debug!(pair = %pair, "Rate resolved by concurrent caller");
            return Ok(entry.rate);
        }

        let rate = self.fetch_rate(pair)?;
        self.store.insert(pair.clone(), rate);
        Ok(rate)
    }

    /// Convert an amount, rounded to the target currency's minor units.
    pub fn exchange(&self, amount: &Money, to: &str) -> FxResult<Money> {
        let pair = CurrencyPair::new(Currency::parse(amount.currency.code())?, Currency::parse(to)?);
        let rate = self.resolve_pair(&pair)?;
        Ok(Money::new(amount.value * rate, pair.quote).round())
    }

    /// Remove one directional entry from the local store and, best-effort,
    /// from the shared store. Returns the flushed local rate.
    pub fn flush(&self, from: &str, to: &str) -> FxResult<Option<Decimal>> {
        let pair = CurrencyPair::parse(from, to)?;
        let flushed = self.store.remove(&pair);

        if let Some(shared) = &self.shared {
            if let Err(e) = shared.delete(&pair.store_key()) {
                warn!(pair = %pair, error = %e, "Shared store delete failed");
            }
        }

        info!(pair = %pair, flushed = flushed.is_some(), "Flushed rate");
        Ok(flushed)
    }

    /// Clear every locally cached rate. The shared store is left untouched.
    pub fn flush_all(&self) {
        let flushed = self.store.len();
        self.store.clear();
        info!(flushed, "Flushed all rates");
    }

    /// Set or clear the whole-store TTL. Setting it restarts the expiry clock.
    pub fn configure_ttl(&self, ttl: Option<Duration>) {
        self.store.configure_ttl(ttl);
        info!(ttl_secs = ?ttl.map(|t| t.as_secs()), "Configured rate TTL");
    }

    /// Flush the store if its TTL has elapsed. Returns whether it did.
    pub fn expire_rates(&self) -> bool {
        self.store.expire()
    }

    /// Current TTL.
    pub fn ttl(&self) -> Option<Duration> {
        self.store.ttl()
    }

    /// Current expiry deadline.
    pub fn expires_at(&self) -> Option<Timestamp> {
        self.store.expires_at()
    }

    /// Locally cached rate for a pair, without resolving.
    pub fn cached_rate(&self, pair: &CurrencyPair) -> Option<Decimal> {
        self.store.peek(pair).map(|entry| entry.rate)
    }

    /// Pairs currently cached locally.
    pub fn cached_pairs(&self) -> Vec<CurrencyPair> {
        self.store.pairs()
    }

    /// Get resolver statistics.
    pub fn stats(&self) -> ResolverStats {
        ResolverStats {
            cache: self.store.stats(),
            fetches: self.fetches.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
            shared_hits: self.shared_hits.load(Ordering::Relaxed),
        }
    }

    /// Shared store, then upstream, then fallback table.
    fn fetch_rate(&self, pair: &CurrencyPair) -> FxResult<Decimal> {
        if let Some(rate) = self.shared_read(pair) {
            return Ok(rate);
        }

        let rate = match self.fetch_live(pair) {
            Ok(rate) => rate,
            Err(err) if err.triggers_fallback() => match self.fallback.lookup(pair) {
                Some(rate) => {
                    self.fallbacks.fetch_add(1, Ordering::Relaxed);
                    info!(pair = %pair, rate = %rate, error = %err, "Using fallback rate");
                    rate
                }
                None => return Err(err),
            },
            Err(err) => return Err(err),
        };

        self.shared_write(pair, rate);
        Ok(rate)
    }

    /// Fetch the direct quote; a quote under the threshold is replaced by
    /// the inverted quote of the opposite pair. Inversion happens at most once.
    fn fetch_live(&self, pair: &CurrencyPair) -> FxResult<Decimal> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        let direct = self.fetcher.fetch_quote(pair)?;
        if direct >= self.inversion_threshold {
            return Ok(direct);
        }

        let inverse_pair = pair.inverse();
        warn!(
            pair = %pair,
            direct = %direct,
            threshold = %self.inversion_threshold,
            "Direct quote below threshold, inverting opposite quote"
        );

        let inverse = self
            .fetcher
            .fetch_quote(&inverse_pair)
            .map_err(|e| e.for_pair(pair))?;
        Decimal::ONE
            .checked_div(inverse)
            .ok_or_else(|| FxError::Upstream {
                pair: pair.clone(),
                reason: format!("inverse quote {} is not invertible", inverse),
            })
    }

    fn shared_read(&self, pair: &CurrencyPair) -> Option<Decimal> {
        let shared = self.shared.as_ref()?;

        match shared.read(&pair.store_key()) {
            Ok(Some(rate)) if rate > Decimal::ZERO => {
                self.shared_hits.fetch_add(1, Ordering::Relaxed);
                debug!(pair = %pair, "Shared store hit");
                Some(rate)
            }
            Ok(_) => None,
            Err(e) => {
                warn!(pair = %pair, error = %e, "Shared store read failed, treating as miss");
                None
            }
        }
    }

    fn shared_write(&self, pair: &CurrencyPair, rate: Decimal) {
        if let Some(shared) = &self.shared {
            if let Err(e) = shared.write(&pair.store_key(), rate, self.shared_ttl) {
                warn!(pair = %pair, error = %e, "Shared store write failed");
            }
        }
    }
}

/// Resolver statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverStats {
    pub cache: CacheStats,
    pub fetches: u64,
    pub fallbacks: u64,
    pub shared_hits: u64,
}
