//! Price, sample and report types.

use bigdecimal::{BigDecimal, Zero};
use serde::{Deserialize, Serialize};

/// An aggregated price for one symbol.
///
/// Produced by the aggregator once per round and frozen once it is placed
/// in a [`VoteRecord`](crate::VoteRecord).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Price {
    pub symbol: String,
    pub value: BigDecimal,
    /// Unix timestamp (seconds) the price refers to.
    pub timestamp: u64,
    /// Confidence in `0..=100`.
    pub confidence: u8,
    pub volume: BigDecimal,
}

impl Price {
    /// Whether the value is a literal zero, which the protocol rejects.
    pub fn is_zero(&self) -> bool {
        self.value.is_zero()
    }
}

/// One raw price observation delivered by a plugin.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    pub symbol: String,
    pub price: BigDecimal,
    pub volume: BigDecimal,
    /// Sampling timestamp the observation was requested for.
    pub timestamp: u64,
}

/// The ABI-ready form of a price: `price * 10^18` truncated, plus confidence.
///
/// Matches the on-chain `Report { uint120 price; uint8 confidence; }`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    #[serde(with = "decimal_string")]
    pub price: u128,
    pub confidence: u8,
}

/// How confidence is derived from the number of live samples.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceStrategy {
    /// Confidence grows with the number of samples (forex only).
    #[default]
    Linear,
    /// Always full confidence.
    Fixed,
}

/// Serializes a `u128` as a base-10 string so JSON readers never lose precision.
pub mod decimal_string {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse::<u128>().map_err(D::Error::custom)
    }
}
