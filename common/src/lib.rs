//! Ratebank Common Types
//!
//! Shared types used across the ratebank crates: currency identifiers and
//! the ISO 4217 table they are validated against, directional currency
//! pairs, monetary amounts, and the clock abstraction used for expiry.

pub mod error;
pub mod iso4217;
pub mod monetary;
pub mod time;

pub use error::*;
pub use monetary::*;
pub use time::*;
