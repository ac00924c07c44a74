//! The oracle contract as seen by the server.
//!
//! Everything the round coordinator reads from or writes to the chain goes
//! through [`OracleContract`], so the event loop can be driven by an
//! in-process fake in tests and by the socket gateway in production.

use async_trait::async_trait;
use oracle_types::{Address, ChainEvent, Report, RoundData, B256, U256};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Error types for chain access.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainError {
    /// The gateway is unreachable or dropped the connection.
    #[error("chain connectivity lost: {0}")]
    Connectivity(String),

    /// The event subscription failed.
    #[error("event subscription failed: {0}")]
    Subscription(String),

    /// The call reached the chain and was rejected.
    #[error("contract call {method} failed: {message}")]
    Call { method: String, message: String },

    /// A reply could not be decoded.
    #[error("malformed reply to {method}: {detail}")]
    Decode { method: String, detail: String },

    #[error("chain call {0} timed out")]
    Timeout(String),
}

pub type Result<T> = std::result::Result<T, ChainError>;

/// Stream of contract events. An `Err` item means the subscription is lost.
pub type EventStream = mpsc::Receiver<std::result::Result<ChainEvent, ChainError>>;

/// EIP-1559 fee settings for the vote transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeParams {
    pub max_fee_per_gas: U256,
    pub gas_tip_cap: U256,
}

/// Arguments of `Vote(commitment, reports, salt, version)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteTx {
    pub commitment: B256,
    pub reports: Vec<Report>,
    pub salt: u64,
    pub version: u8,
    pub fees: FeeParams,
}

/// What the gateway returns for a submitted transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    pub tx_hash: B256,
    pub nonce: u64,
    /// Upper bound of the fee paid, in wei.
    pub cost: U256,
}

/// Inclusion status of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxStatus {
    pub block: u64,
    pub success: bool,
}

/// A `Penalized` log found by a filter query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PenaltyLog {
    pub participant: Address,
    pub symbol: String,
    pub median: U256,
    pub reported: U256,
    pub slashing_amount: U256,
    pub block: u64,
}

/// Read and write access to the oracle contract and the chain around it.
#[async_trait]
pub trait OracleContract: Send + Sync {
    async fn get_round(&self) -> Result<u64>;
    async fn get_last_round_block(&self) -> Result<u64>;
    async fn get_symbols(&self) -> Result<Vec<String>>;
    async fn get_vote_period(&self) -> Result<u64>;
    async fn get_voters(&self) -> Result<Vec<Address>>;
    async fn get_round_data(&self, round: u64, symbol: &str) -> Result<RoundData>;
    async fn latest_round_data(&self, symbol: &str) -> Result<RoundData>;

    /// Submit this round's commitment together with last round's reveal.
    async fn vote(&self, tx: VoteTx) -> Result<TxReceipt>;

    async fn block_number(&self) -> Result<u64>;

    /// Whether the node is still catching up with its peers.
    async fn syncing(&self) -> Result<bool>;
    async fn balance(&self, account: Address) -> Result<U256>;
    async fn base_fee(&self) -> Result<U256>;
    async fn suggest_gas_tip_cap(&self) -> Result<U256>;

    /// `Penalized` logs for `participant` within `[from, to]`.
    async fn penalized_logs(&self, from: u64, to: u64, participant: Address)
        -> Result<Vec<PenaltyLog>>;

    /// `None` while the transaction is pending.
    async fn transaction_receipt(&self, tx_hash: B256) -> Result<Option<TxStatus>>;

    /// Subscribe to every oracle contract event.
    async fn subscribe(&self) -> Result<EventStream>;
}
