//! Vote construction: prices to reports, reports to commitment, fees, and
//! the bounded round buffer.

use std::collections::BTreeMap;

use oracle_aggregator::{PriceAggregator, SampleSource};
use oracle_crypto::{random_salt, report_from_price, CommitmentError, CommitmentHashComputer};
use oracle_types::{Address, Price, VoteRecord, U256};

use crate::chain::{ChainError, FeeParams};
use crate::round::RoundState;

/// Reasons a round's vote is not submitted.
#[derive(Debug, thiserror::Error)]
pub enum VoteError {
    #[error("node is syncing")]
    Syncing,

    #[error("protocol has no symbols yet")]
    NoSymbols,

    /// A protocol symbol has no usable price; the whole report is dropped.
    #[error("missing data for {symbol}: {reason}")]
    MissingData { symbol: String, reason: String },

    #[error("no funds to pay for the vote transaction")]
    InsufficientFunds,

    #[error(transparent)]
    Commitment(#[from] CommitmentError),

    #[error(transparent)]
    Chain(#[from] ChainError),
}

pub type Result<T> = std::result::Result<T, VoteError>;

/// `max_fee = 2 * base_fee + tip`, `tip = max(floor, suggested)`.
pub fn fee_params(base_fee: U256, suggested_tip: U256, tip_floor: U256) -> FeeParams {
    let gas_tip_cap = suggested_tip.max(tip_floor);
    FeeParams {
        max_fee_per_gas: base_fee
            .saturating_mul(U256::from(2u64))
            .saturating_add(gas_tip_cap),
        gas_tip_cap,
    }
}

/// Everything [`build_vote_record`] needs besides the samples.
pub struct VoteContext<'a> {
    pub aggregator: &'a PriceAggregator,
    pub computer: &'a CommitmentHashComputer,
    pub sender: Address,
    /// Latest recorded price per symbol, used when a symbol has no live data.
    pub history: &'a BTreeMap<String, Price>,
}

/// Price every protocol symbol of `round` at `target` and commit to the
/// resulting reports.
///
/// All or nothing: a single unpriced or zero symbol fails the round.
pub fn build_vote_record<S>(
    ctx: &VoteContext<'_>,
    source: &S,
    round: &RoundState,
    target: u64,
) -> Result<VoteRecord>
where
    S: SampleSource + ?Sized,
{
    if round.symbols.is_empty() {
        return Err(VoteError::NoSymbols);
    }

    let mut prices = BTreeMap::new();
    let mut reports = Vec::with_capacity(round.symbols.len());
    for symbol in &round.symbols {
        let price = ctx
            .aggregator
            .aggregate(source, symbol, target, ctx.history)
            .map_err(|e| VoteError::MissingData {
                symbol: symbol.clone(),
                reason: e.to_string(),
            })?;
        if price.is_zero() {
            return Err(VoteError::MissingData {
                symbol: symbol.clone(),
                reason: "zero price".to_string(),
            });
        }
        reports.push(report_from_price(&price)?);
        prices.insert(symbol.clone(), price);
    }

    let salt = random_salt();
    let commitment_hash = ctx.computer.commitment_hash(&reports, salt, ctx.sender)?;

    Ok(VoteRecord {
        round_id: round.round,
        round_height: round.height,
        vote_period: round.vote_period,
        symbols: round.symbols.clone(),
        prices,
        reports,
        salt,
        commitment_hash,
        tx_hash: None,
        tx_nonce: 0,
        tx_cost: U256::ZERO,
        mined: false,
        error: None,
    })
}

/// Drop records older than the last `max` rounds before `current_round`.
///
/// Returns the number of records removed.
pub fn gc_vote_records(records: &mut BTreeMap<u64, VoteRecord>, current_round: u64, max: u64) -> usize {
    let before = records.len();
    let oldest_kept = current_round.saturating_sub(max.saturating_sub(1));
    records.retain(|round, _| *round >= oldest_kept);
    let max = usize::try_from(max).unwrap_or(usize::MAX);
    while records.len() > max {
        records.pop_first();
    }
    before - records.len()
}
