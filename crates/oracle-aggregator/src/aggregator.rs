//! Per-symbol aggregation.
//!
//! ```text
//! ATN-USD = ATN-USDC * USDC-USD      (confidence of ATN-USDC)
//! NTN-USD = NTN-USDC * USDC-USD      (confidence of NTN-USDC)
//! NTN-ATN = NTN-USD / ATN-USD        (only without a direct NTN-ATN sample)
//! ```

use std::collections::BTreeMap;

use bigdecimal::{BigDecimal, Zero};
use oracle_types::symbols::{bridge_source, is_forex, ATN_USD, NTN_ATN, NTN_USD, USDC_USD};
use oracle_types::{ConfidenceStrategy, Price};
use tracing::debug;

use crate::combine::{median, vwap};
use crate::confidence::{compute_confidence, confidence_adjusted_price};
use crate::{AggregatorError, Result, SampleSource};

/// Builds one [`Price`] per symbol from live samples and history.
#[derive(Debug, Clone, Copy, Default)]
pub struct PriceAggregator {
    strategy: ConfidenceStrategy,
}

impl PriceAggregator {
    /// Create an aggregator using `strategy` for forex confidence.
    pub fn new(strategy: ConfidenceStrategy) -> Self {
        Self { strategy }
    }

    /// Aggregate `symbol` at `target`.
    ///
    /// `history` holds the latest recorded price per symbol; it is the
    /// fallback when no live sample (or derivation) is available.
    ///
    /// # Errors
    ///
    /// [`AggregatorError::NoAvailablePrice`] if neither live data nor a
    /// usable historic price exists.
    pub fn aggregate<S>(
        &self,
        source: &S,
        symbol: &str,
        target: u64,
        history: &BTreeMap<String, Price>,
    ) -> Result<Price>
    where
        S: SampleSource + ?Sized,
    {
        let live = if bridge_source(symbol).is_some() {
            self.aggregate_bridged(source, symbol, target)
        } else if symbol == NTN_ATN {
            self.aggregate_live(source, symbol, target)
                .or_else(|_| self.derive_ntn_atn(source, target))
        } else {
            self.aggregate_live(source, symbol, target)
        };

        match live {
            Ok(price) => Ok(price),
            Err(err) => {
                debug!(symbol, target, error = %err, "no live price, trying history");
                match history.get(symbol) {
                    Some(historic) => confidence_adjusted_price(historic, target),
                    None => Err(AggregatorError::NoAvailablePrice(symbol.to_string())),
                }
            }
        }
    }

    /// Combine the live samples of a single symbol.
    fn aggregate_live<S>(&self, source: &S, symbol: &str, target: u64) -> Result<Price>
    where
        S: SampleSource + ?Sized,
    {
        let (prices, volumes) = source.select_samples(symbol, target);
        if prices.is_empty() {
            return Err(AggregatorError::NoSamples(symbol.to_string()));
        }

        let value = if prices.len() == 1 {
            prices[0].clone()
        } else if is_forex(symbol) {
            median(&prices)?
        } else {
            match vwap(&prices, &volumes) {
                Ok(v) => v,
                Err(AggregatorError::ZeroVolume) => median(&prices)?,
                Err(e) => return Err(e),
            }
        };

        let volume = volumes
            .iter()
            .fold(BigDecimal::zero(), |acc, v| acc + v);

        Ok(Price {
            symbol: symbol.to_string(),
            value,
            timestamp: target,
            confidence: compute_confidence(symbol, prices.len(), self.strategy),
            volume,
        })
    }

    /// `symbol = pair * USDC-USD`, with the pair's confidence and volume.
    fn aggregate_bridged<S>(&self, source: &S, symbol: &str, target: u64) -> Result<Price>
    where
        S: SampleSource + ?Sized,
    {
        let pair_symbol =
            bridge_source(symbol).ok_or_else(|| AggregatorError::NoSamples(symbol.to_string()))?;
        let pivot = self.aggregate_live(source, USDC_USD, target)?;
        let pair = self.aggregate_live(source, pair_symbol, target)?;

        Ok(Price {
            symbol: symbol.to_string(),
            value: &pair.value * &pivot.value,
            timestamp: target,
            confidence: pair.confidence,
            volume: pair.volume,
        })
    }

    /// `NTN-ATN = NTN-USD / ATN-USD`, with the lower of both confidences.
    fn derive_ntn_atn<S>(&self, source: &S, target: u64) -> Result<Price>
    where
        S: SampleSource + ?Sized,
    {
        let ntn = self.aggregate_bridged(source, NTN_USD, target)?;
        let atn = self.aggregate_bridged(source, ATN_USD, target)?;
        if atn.value.is_zero() {
            return Err(AggregatorError::ZeroDivisor(NTN_ATN.to_string()));
        }

        Ok(Price {
            symbol: NTN_ATN.to_string(),
            value: &ntn.value / &atn.value,
            timestamp: target,
            confidence: ntn.confidence.min(atn.confidence),
            volume: BigDecimal::zero(),
        })
    }
}
