//! Static fallback rates.
//!
//! Consulted only after live resolution has failed with an unknown-rate or
//! upstream error. A live rate always wins.

use std::collections::HashMap;

use ratebank_common::{Currency, CurrencyPair};
use rust_decimal::Decimal;

/// Hand-curated rates for pairs the upstream source does not serve reliably.
#[derive(Debug, Clone)]
pub struct FallbackTable {
    rates: HashMap<CurrencyPair, Decimal>,
}

impl FallbackTable {
    /// A table with no entries.
    pub fn empty() -> Self {
        Self {
            rates: HashMap::new(),
        }
    }

    /// Add or replace a rate.
    pub fn with_rate(mut self, base: Currency, quote: Currency, rate: Decimal) -> Self {
        self.insert(CurrencyPair::new(base, quote), rate);
        self
    }

    /// Add or replace a rate. Non-positive rates are ignored.
    pub fn insert(&mut self, pair: CurrencyPair, rate: Decimal) {
        if rate > Decimal::ZERO {
            self.rates.insert(pair, rate);
        }
    }

    /// Look up a pair, using `1 / rate` of the inverse pair when only that
    /// direction is listed.
    pub fn lookup(&self, pair: &CurrencyPair) -> Option<Decimal> {
        if let Some(rate) = self.rates.get(pair) {
            return Some(*rate);
        }
        self.rates
            .get(&pair.inverse())
            .and_then(|inverse| Decimal::ONE.checked_div(*inverse))
    }

    /// Number of listed pairs.
    pub fn len(&self) -> usize {
        self.rates.len()
    }

    /// Whether the table has no entries.
    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }
}

impl Default for FallbackTable {
    /// Fixed statutory parities.
    fn default() -> Self {
        let parities: [(&str, &str, Decimal); 10] = [
            ("EUR", "XOF", Decimal::new(655957, 3)),
            ("EUR", "XAF", Decimal::new(655957, 3)),
            ("EUR", "BAM", Decimal::new(195583, 5)),
            ("EUR", "KMF", Decimal::new(49196775, 5)),
            ("USD", "PAB", Decimal::ONE),
            ("USD", "BMD", Decimal::ONE),
            ("INR", "BTN", Decimal::ONE),
            ("SGD", "BND", Decimal::ONE),
            ("ZAR", "NAD", Decimal::ONE),
            ("ZAR", "LSL", Decimal::ONE),
        ];

        parities
            .into_iter()
            .fold(Self::empty(), |table, (base, quote, rate)| {
                table.with_rate(Currency::new(base), Currency::new(quote), rate)
            })
    }
}
