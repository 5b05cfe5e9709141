//! Ratebank FX Resolver
//!
//! Resolves currency-pair exchange rates on demand and caches them.
//!
//! # Features
//!
//! - Whole-store TTL expiry, checked lazily on every resolution
//! - Bounded retry with linear backoff for transient transport faults
//! - Tolerant decoding of the upstream converter's response formats
//! - Inversion of unreliably small quotes through the opposite pair
//! - Static fallback rates when live resolution fails
//! - Optional shared store with its own expiry, for cross-process reuse
//!
//! # Example
//!
//! ```rust,ignore
//! use ratebank_fx::{RateResolver, ResolverConfig};
//!
//! let resolver = RateResolver::with_http(ResolverConfig::from_env())?;
//!
//! let rate = resolver.resolve("usd", "eur")?;
//! resolver.flush("USD", "EUR")?;
//! ```

pub mod cache;
pub mod config;
pub mod decoder;
pub mod engine;
pub mod error;
pub mod fallback;
pub mod fetcher;
pub mod retry;
pub mod shared;

pub use cache::{CacheEntry, CacheStats, RateStore};
pub use config::ResolverConfig;
pub use decoder::{AutoDecoder, DecodeError, PlainDecoder, ResponseDecoder, StructuredDecoder};
pub use engine::{RateResolver, ResolverStats};
pub use error::{FxError, FxResult};
pub use fallback::FallbackTable;
pub use fetcher::{HttpTransport, RemoteFetcher, Transport, TransportError};
pub use retry::RetryPolicy;
pub use shared::{MemorySharedStore, SharedStore, SharedStoreError};
