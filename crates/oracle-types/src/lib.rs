//! # oracle-types
//!
//! Shared domain types used across the oracle workspace: prices, samples,
//! commit-reveal vote records, penalty records, on-chain events and the
//! JSON-RPC envelope spoken by plugins and the chain gateway.

pub mod events;
pub mod price;
pub mod rpc;
pub mod symbols;
pub mod vote;

pub use alloy_primitives::{Address, B256, U256};
pub use bigdecimal::BigDecimal;

pub use events::ChainEvent;
pub use price::{ConfidenceStrategy, Price, Report, Sample};
pub use vote::{OutlierRecord, RoundData, VoteRecord};

/// Number of decimals a price is scaled by before it is reported on-chain.
pub const PRICE_PRECISION_DECIMALS: u32 = 18;

/// Highest confidence a report can carry.
pub const MAX_CONFIDENCE: u8 = 100;

/// Current Unix time in seconds.
pub fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_secs() {
        // Anything after 2023-01-01.
        assert!(now_secs() > 1_672_531_200);
    }
}
