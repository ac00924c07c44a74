//! Commit-reveal vote records and penalty records.

use std::collections::BTreeMap;

use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};

use crate::price::{Price, Report};

/// Everything the node needs to reveal a commitment one round later.
///
/// Invariant: `commitment_hash == keccak256(abi.encode(reports, salt, sender))`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRecord {
    pub round_id: u64,
    pub round_height: u64,
    pub vote_period: u64,
    pub symbols: Vec<String>,
    pub prices: BTreeMap<String, Price>,
    /// One report per symbol, in `symbols` order.
    pub reports: Vec<Report>,
    /// Random salt in `[0, 2^63)`.
    pub salt: u64,
    pub commitment_hash: B256,
    #[serde(default)]
    pub tx_hash: Option<B256>,
    #[serde(default)]
    pub tx_nonce: u64,
    #[serde(default)]
    pub tx_cost: U256,
    #[serde(default)]
    pub mined: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl VoteRecord {
    /// Mark the vote transaction as included on-chain, optionally with the
    /// failure cause reported by the contract.
    pub fn mark_mined(&mut self, error: Option<String>) {
        self.mined = true;
        if error.is_some() {
            self.error = error;
        }
    }
}

/// The last outlier penalty applied to this node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutlierRecord {
    pub last_penalized_at_block: u64,
    pub participant: Address,
    pub symbol: String,
    pub median: U256,
    pub reported: U256,
    pub slashing_amount: U256,
    /// Unix timestamp the penalty was observed locally.
    pub logged_at: u64,
}

impl OutlierRecord {
    /// Whether the post-penalty cool-down still covers `height`.
    pub fn cools_down(&self, height: u64, vote_buffer: u64) -> bool {
        !self.slashing_amount.is_zero()
            && height < self.last_penalized_at_block.saturating_add(vote_buffer)
    }
}

/// A finalized on-chain round price.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundData {
    pub round: u64,
    /// Price scaled by `10^18`.
    pub price: U256,
    pub timestamp: u64,
    pub success: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> VoteRecord {
        VoteRecord {
            round_id: 7,
            round_height: 210,
            vote_period: 30,
            symbols: vec!["EUR-USD".to_string()],
            prices: BTreeMap::new(),
            reports: vec![Report {
                price: 1_080_000_000_000_000_000,
                confidence: 100,
            }],
            salt: 42,
            commitment_hash: B256::repeat_byte(0x11),
            tx_hash: None,
            tx_nonce: 0,
            tx_cost: U256::ZERO,
            mined: false,
            error: None,
        }
    }

    #[test]
    fn test_mark_mined_keeps_error() {
        let mut r = record();
        r.mark_mined(Some("invalid commit".to_string()));
        assert!(r.mined);
        assert_eq!(r.error.as_deref(), Some("invalid commit"));

        r.mark_mined(None);
        assert_eq!(r.error.as_deref(), Some("invalid commit"));
    }

    #[test]
    fn test_vote_record_json() {
        let r = record();
        let json = serde_json::to_string_pretty(&r).expect("serialize");
        assert!(json.contains("\"1080000000000000000\""));
        let back: VoteRecord = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, r);
    }

    #[test]
    fn test_outlier_cool_down() {
        let outlier = OutlierRecord {
            last_penalized_at_block: 1000,
            participant: Address::ZERO,
            symbol: "NTN-USD".to_string(),
            median: U256::from(100u64),
            reported: U256::from(200u64),
            slashing_amount: U256::from(5u64),
            logged_at: 0,
        };
        assert!(outlier.cools_down(1000, 50));
        assert!(outlier.cools_down(1049, 50));
        assert!(!outlier.cools_down(1050, 50));

        let free = OutlierRecord {
            slashing_amount: U256::ZERO,
            ..outlier
        };
        assert!(!free.cools_down(1000, 50));
    }
}
