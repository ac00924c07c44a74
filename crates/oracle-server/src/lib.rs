//! Validator-side price oracle client.
//!
//! Samples prices from data-source plugins ahead of every round, aggregates
//! them into one report per protocol symbol and takes part in the oracle
//! contract's commit-reveal vote.

pub mod bridge;
pub mod chain;
pub mod config;
pub mod metrics;
pub mod round;
pub mod server;
pub mod vote;

pub use bridge::BridgeContract;
pub use chain::{ChainError, EventStream, OracleContract, PenaltyLog, TxReceipt, TxStatus, VoteTx};
pub use config::ServerConfig;
pub use metrics::{Counter, OracleMetrics};
pub use round::{Phase, RoundState};
pub use server::{Server, ServerEvent};
pub use vote::VoteError;
