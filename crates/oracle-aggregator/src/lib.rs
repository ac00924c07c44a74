//! # oracle-aggregator
//!
//! Turns raw multi-plugin samples into one authoritative [`Price`] per
//! protocol symbol.
//!
//! Forex symbols are combined with a median, crypto symbols with a
//! volume-weighted average. `ATN-USD` and `NTN-USD` are bridged through
//! `USDC-USD`, `NTN-ATN` can be derived from both USD prices, and a symbol
//! with no live sample falls back to the last voted price with decayed
//! confidence.
//!
//! ## Modules
//!
//! - [`combine`] — median and VWAP
//! - [`confidence`] — sample-count confidence and historic-price decay
//! - [`aggregator`] — per-symbol aggregation strategy
//!
//! [`Price`]: oracle_types::Price

pub mod aggregator;
pub mod combine;
pub mod confidence;

use bigdecimal::BigDecimal;

pub use aggregator::PriceAggregator;
pub use confidence::{compute_confidence, confidence_adjusted_price};

/// Error types for aggregation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AggregatorError {
    /// No live plugin delivered a fresh sample.
    #[error("no live samples for {0}")]
    NoSamples(String),

    /// Neither live samples nor a usable historic price exist.
    #[error("no available price for {0}")]
    NoAvailablePrice(String),

    /// Price and volume slices differ in length.
    #[error("got {prices} prices but {volumes} volumes")]
    LengthMismatch {
        /// Number of prices.
        prices: usize,
        /// Number of volumes.
        volumes: usize,
    },

    /// Nothing to combine.
    #[error("empty input")]
    EmptyInput,

    /// VWAP over samples that all report zero volume.
    #[error("total volume is zero")]
    ZeroVolume,

    /// A derived price would divide by zero.
    #[error("cannot derive {0}: zero divisor")]
    ZeroDivisor(String),
}

/// Convenience result type for aggregation.
pub type Result<T> = std::result::Result<T, AggregatorError>;

/// Where live samples come from.
///
/// Implemented by the plugin manager; tests use an in-memory map.
pub trait SampleSource {
    /// The freshest in-window sample of `symbol` from every live source, as
    /// parallel price and volume slices.
    fn select_samples(&self, symbol: &str, target: u64) -> (Vec<BigDecimal>, Vec<BigDecimal>);
}
