//! Remote rate fetching.

use std::sync::Arc;
use std::time::Duration;

use ratebank_common::CurrencyPair;
use reqwest::blocking::Client;
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::debug;

use crate::decoder::{AutoDecoder, ResponseDecoder};
use crate::error::{FxError, FxResult};
use crate::retry::{RetryPolicy, Transient};

/// Transport-level failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Connection refused, reset or unreachable.
    #[error("Connection failed: {0}")]
    Connect(String),

    /// The attempt exceeded its timeout.
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// Upstream answered with a non-success status.
    #[error("HTTP status {0}")]
    Status(u16),

    /// The request could not be built or was rejected as malformed.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The response body could not be read.
    #[error("Failed to read response body: {0}")]
    Body(String),
}

impl Transient for TransportError {
    fn is_transient(&self) -> bool {
        match self {
            TransportError::Connect(_) | TransportError::Timeout(_) | TransportError::Body(_) => true,
            TransportError::Status(code) => !(400..500).contains(code) || *code == 408 || *code == 429,
            TransportError::InvalidRequest(_) => false,
        }
    }
}

/// One GET round-trip returning the raw payload.
pub trait Transport: Send + Sync {
    /// Fetch a URL.
    fn get(&self, url: &str) -> Result<Vec<u8>, TransportError>;
}

/// Blocking HTTP transport.
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Create a transport with the given per-attempt timeout.
    pub fn new(timeout: Duration) -> FxResult<Self> {
        let client = Client::builder()
            .user_agent(concat!("ratebank/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| FxError::InvalidConfig(format!("HTTP client: {}", e)))?;

        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    fn get(&self, url: &str) -> Result<Vec<u8>, TransportError> {
        let response = self.client.get(url).send().map_err(classify)?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }

        let body = response
            .bytes()
            .map_err(|e| TransportError::Body(e.to_string()))?;
        Ok(body.to_vec())
    }
}

fn classify(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(err.to_string())
    } else if err.is_builder() {
        TransportError::InvalidRequest(err.to_string())
    } else if let Some(status) = err.status() {
        TransportError::Status(status.as_u16())
    } else {
        TransportError::Connect(err.to_string())
    }
}

/// Fetches and decodes a quote for one pair, retrying transient faults.
pub struct RemoteFetcher {
    transport: Arc<dyn Transport>,
    decoder: Arc<dyn ResponseDecoder>,
    retry: RetryPolicy,
    endpoint: String,
}

impl RemoteFetcher {
    /// Create a fetcher using the default decoder.
    pub fn new(transport: Arc<dyn Transport>, endpoint: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            transport,
            decoder: Arc::new(AutoDecoder),
            retry,
            endpoint: endpoint.into(),
        }
    }

    /// Replace the response decoder.
    pub fn with_decoder(mut self, decoder: Arc<dyn ResponseDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    /// Build the upstream URL for a pair.
    pub fn url_for(&self, pair: &CurrencyPair) -> String {
        let separator = if self.endpoint.contains('?') { '&' } else { '?' };
        format!(
            "{}{}a=1&from={}&to={}",
            self.endpoint,
            separator,
            pair.base.code(),
            pair.quote.code()
        )
    }

    /// Perform the round-trip for a pair.
    pub fn fetch_raw(&self, pair: &CurrencyPair) -> FxResult<Vec<u8>> {
        let url = self.url_for(pair);

        self.retry
            .run(|attempt| {
                debug!(pair = %pair, attempt, "Fetching quote");
                self.transport.get(&url)
            })
            .map_err(|failure| FxError::Network {
                pair: pair.clone(),
                attempts: failure.attempts,
                reason: failure.error.to_string(),
            })
    }

    /// Fetch and decode a quote for a pair.
    pub fn fetch_quote(&self, pair: &CurrencyPair) -> FxResult<Decimal> {
        let payload = self.fetch_raw(pair)?;
        let rate = self
            .decoder
            .decode(&payload)
            .map_err(|e| FxError::from_decode(pair, e))?;

        debug!(pair = %pair, rate = %rate, "Decoded quote");
        Ok(rate)
    }
}

/// Transport that replays scripted responses, for tests.
#[cfg(any(test, feature = "test-utils"))]
pub struct ScriptedTransport {
    steady: dashmap::DashMap<String, Result<Vec<u8>, TransportError>>,
    queued: dashmap::DashMap<String, std::collections::VecDeque<Result<Vec<u8>, TransportError>>>,
    calls: dashmap::DashMap<String, usize>,
}

#[cfg(any(test, feature = "test-utils"))]
impl ScriptedTransport {
    /// Create a transport with no scripted responses.
    pub fn new() -> Self {
        Self {
            steady: dashmap::DashMap::new(),
            queued: dashmap::DashMap::new(),
            calls: dashmap::DashMap::new(),
        }
    }

    /// Always answer `pair` (a `"FROM:TO"` key) with `body`.
    pub fn respond(&self, pair: &str, body: impl Into<Vec<u8>>) {
        self.steady.insert(pair.to_string(), Ok(body.into()));
    }

    /// Always fail `pair` with `error`.
    pub fn fail(&self, pair: &str, error: TransportError) {
        self.steady.insert(pair.to_string(), Err(error));
    }

    /// Answer the next request for `pair` with `result`, ahead of the steady response.
    pub fn push(&self, pair: &str, result: Result<Vec<u8>, TransportError>) {
        self.queued.entry(pair.to_string()).or_default().push_back(result);
    }

    /// Requests seen for `pair`.
    pub fn calls(&self, pair: &str) -> usize {
        self.calls.get(pair).map(|c| *c).unwrap_or(0)
    }

    /// Requests seen in total.
    pub fn total_calls(&self) -> usize {
        self.calls.iter().map(|c| *c.value()).sum()
    }

    fn pair_key(url: &str) -> String {
        let query = url.split_once('?').map(|(_, q)| q).unwrap_or("");
        let param = |name: &str| {
            query
                .split('&')
                .filter_map(|kv| kv.split_once('='))
                .find(|(k, _)| *k == name)
                .map(|(_, v)| v.to_string())
                .unwrap_or_default()
        };
        format!("{}:{}", param("from"), param("to"))
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl Default for ScriptedTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl Transport for ScriptedTransport {
    fn get(&self, url: &str) -> Result<Vec<u8>, TransportError> {
        let key = Self::pair_key(url);
        *self.calls.entry(key.clone()).or_insert(0) += 1;

        if let Some(mut queue) = self.queued.get_mut(&key) {
            if let Some(result) = queue.pop_front() {
                return result;
            }
        }

        self.steady
            .get(&key)
            .map(|r| r.clone())
            .unwrap_or_else(|| Err(TransportError::Connect(format!("no route to {}", key))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratebank_common::Currency;
    use rust_decimal_macros::dec;

    fn usd_eur() -> CurrencyPair {
        CurrencyPair::new(Currency::usd(), Currency::eur())
    }

    fn fetcher(transport: Arc<ScriptedTransport>, max_attempts: u32) -> RemoteFetcher {
        RemoteFetcher::new(
            transport,
            "http://rates.test/finance/converter",
            RetryPolicy::immediate(max_attempts),
        )
    }

    #[test]
    fn test_url_for() {
        let fetcher = fetcher(Arc::new(ScriptedTransport::new()), 1);
        assert_eq!(
            fetcher.url_for(&usd_eur()),
            "http://rates.test/finance/converter?a=1&from=USD&to=EUR"
        );

        let with_query = RemoteFetcher::new(
            Arc::new(ScriptedTransport::new()),
            "http://rates.test/convert?hl=en",
            RetryPolicy::immediate(1),
        );
        assert_eq!(
            with_query.url_for(&usd_eur()),
            "http://rates.test/convert?hl=en&a=1&from=USD&to=EUR"
        );
    }

    #[test]
    fn test_transient_classification() {
        assert!(TransportError::Connect("refused".into()).is_transient());
        assert!(TransportError::Timeout("slow".into()).is_transient());
        assert!(TransportError::Status(503).is_transient());
        assert!(TransportError::Status(429).is_transient());
        assert!(!TransportError::Status(400).is_transient());
        assert!(!TransportError::Status(404).is_transient());
        assert!(!TransportError::InvalidRequest("bad url".into()).is_transient());
    }

    #[test]
    fn test_fetch_quote() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond("USD:EUR", "<span class=bld>0.9213 EUR</span>");

        let rate = fetcher(transport.clone(), 3).fetch_quote(&usd_eur()).unwrap();

        assert_eq!(rate, dec!(0.9213));
        assert_eq!(transport.calls("USD:EUR"), 1);
    }

    #[test]
    fn test_retry_bound() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.fail("USD:EUR", TransportError::Connect("refused".into()));

        let err = fetcher(transport.clone(), 3).fetch_raw(&usd_eur()).unwrap_err();

        assert_eq!(transport.calls("USD:EUR"), 3);
        assert!(matches!(err, FxError::Network { attempts: 3, .. }));
    }

    #[test]
    fn test_recovers_within_bound() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push("USD:EUR", Err(TransportError::Status(502)));
        transport.push("USD:EUR", Err(TransportError::Timeout("slow".into())));
        transport.respond("USD:EUR", "0.92 EUR");

        let rate = fetcher(transport.clone(), 3).fetch_quote(&usd_eur()).unwrap();

        assert_eq!(rate, dec!(0.92));
        assert_eq!(transport.calls("USD:EUR"), 3);
    }

    #[test]
    fn test_malformed_request_not_retried() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.fail("USD:EUR", TransportError::Status(400));

        let err = fetcher(transport.clone(), 3).fetch_raw(&usd_eur()).unwrap_err();

        assert_eq!(transport.calls("USD:EUR"), 1);
        assert!(matches!(err, FxError::Network { attempts: 1, .. }));
    }

    #[test]
    fn test_decode_failure_maps_to_pair() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond("USD:EUR", "Could not convert.");

        let err = fetcher(transport, 3).fetch_quote(&usd_eur()).unwrap_err();

        assert!(matches!(err, FxError::UnknownRate(ref p) if *p == usd_eur()));
    }

    #[test]
    fn test_custom_decoder() {
        struct Fixed;
        impl ResponseDecoder for Fixed {
            fn decode(&self, _: &[u8]) -> Result<Decimal, crate::decoder::DecodeError> {
                Ok(dec!(1.5))
            }
        }

        let transport = Arc::new(ScriptedTransport::new());
        transport.respond("USD:EUR", "anything");

        let rate = fetcher(transport, 1)
            .with_decoder(Arc::new(Fixed))
            .fetch_quote(&usd_eur())
            .unwrap();
        assert_eq!(rate, dec!(1.5));
    }
}
