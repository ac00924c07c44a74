//! Oracle contract events.
//!
//! The chain gateway delivers these as `oracle_event` JSON-RPC notifications;
//! the server consumes them through a single event stream.

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};

/// Every contract event the server reacts to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChainEvent {
    /// A new round started at block `height`.
    NewRound {
        round: u64,
        height: u64,
        timestamp: u64,
        vote_period: u64,
    },
    /// Symbols that become mandatory from `round` on.
    NewSymbols { symbols: Vec<String>, round: u64 },
    SuccessfulVote { reporter: Address },
    InvalidVote {
        cause: String,
        reporter: Address,
        exp_value: U256,
        actual_value: U256,
    },
    NoRevealPenalty {
        voter: Address,
        round: u64,
        missed_reveal: u64,
    },
    /// Outlier slashing, emitted at block `block`.
    Penalized {
        participant: Address,
        slashing_amount: U256,
        symbol: String,
        median: U256,
        reported: U256,
        block: u64,
    },
    TotalOracleRewards { ntn_reward: U256, atn_reward: U256 },
}

impl ChainEvent {
    /// Short event name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            ChainEvent::NewRound { .. } => "NewRound",
            ChainEvent::NewSymbols { .. } => "NewSymbols",
            ChainEvent::SuccessfulVote { .. } => "SuccessfulVote",
            ChainEvent::InvalidVote { .. } => "InvalidVote",
            ChainEvent::NoRevealPenalty { .. } => "NoRevealPenalty",
            ChainEvent::Penalized { .. } => "Penalized",
            ChainEvent::TotalOracleRewards { .. } => "TotalOracleRewards",
        }
    }
}
