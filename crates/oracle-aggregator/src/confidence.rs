//! Confidence scoring.
//!
//! ## Live samples
//!
//! Forex symbols under the linear strategy scale with the number of sources:
//!
//! ```text
//! confidence = min(100, 40 + 10 * floor(1.75 ^ samples))
//! ```
//!
//! Every other symbol/strategy combination reports full confidence; crypto
//! markets are assumed liquid enough that the source count does not matter.
//!
//! ## Historic fallback
//!
//! A price reused from an earlier round loses confidence with age:
//! unchanged under [`FRESH_AGE`], halved under [`STALE_AGE`], `1` beyond.

use oracle_types::symbols::is_forex;
use oracle_types::{ConfidenceStrategy, Price, MAX_CONFIDENCE};

use crate::{AggregatorError, Result};

/// Confidence floor of the linear strategy.
pub const BASE_CONFIDENCE: u64 = 40;

/// Weight of the sample-count term.
pub const SOURCE_SCALING_FACTOR: u64 = 10;

/// Historic prices younger than this keep their confidence (seconds).
pub const FRESH_AGE: u64 = 60;

/// Historic prices younger than this keep half their confidence (seconds).
pub const STALE_AGE: u64 = 3600;

/// Confidence for a price built from `samples` live sources.
pub fn compute_confidence(symbol: &str, samples: usize, strategy: ConfidenceStrategy) -> u8 {
    if !is_forex(symbol) || strategy == ConfidenceStrategy::Fixed {
        return MAX_CONFIDENCE;
    }

    // 1.75^8 already saturates the cap.
    let exponent = samples.min(16) as i32;
    let growth = 1.75f64.powi(exponent) as u64;
    let confidence = BASE_CONFIDENCE + SOURCE_SCALING_FACTOR * growth;
    confidence.min(u64::from(MAX_CONFIDENCE)) as u8
}

/// Reuse a historic price at `target`, decaying its confidence with age.
///
/// # Errors
///
/// [`AggregatorError::NoAvailablePrice`] if the decayed confidence is zero.
pub fn confidence_adjusted_price(historic: &Price, target: u64) -> Result<Price> {
    let age = target.saturating_sub(historic.timestamp);
    let confidence = if age < FRESH_AGE {
        historic.confidence
    } else if age < STALE_AGE {
        historic.confidence / 2
    } else {
        1
    };

    if confidence == 0 {
        return Err(AggregatorError::NoAvailablePrice(historic.symbol.clone()));
    }

    Ok(Price {
        confidence,
        ..historic.clone()
    })
}
