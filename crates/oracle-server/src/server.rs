//! The round coordinator.
//!
//! A single task owns all round state. Chain events, the pre-sampling tick
//! and the regular tick are turned into [`ServerEvent`]s by [`Server::run`]
//! and applied one at a time by [`Server::handle`]; nothing else mutates
//! the server, so no locking is needed around round state or vote records.
//!
//! Per round the node submits one transaction carrying this round's
//! commitment and the plaintext reveal of last round's commitment.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use oracle_aggregator::PriceAggregator;
use oracle_crypto::CommitmentHashComputer;
use oracle_memories::{Memories, Record};
use oracle_plugins::PluginManager;
use oracle_types::{now_secs, Address, ChainEvent, OutlierRecord, Price, VoteRecord, B256, U256};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::chain::{ChainError, EventStream, OracleContract, PenaltyLog, VoteTx};
use crate::config::ServerConfig;
use crate::metrics::{Counter, OracleMetrics};
use crate::round::{Phase, RoundState};
use crate::vote::{build_vote_record, fee_params, gc_vote_records, VoteContext, VoteError};

/// Everything the coordinator reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    Chain(ChainEvent),
    /// The event subscription failed; resync on the next health check.
    SubscriptionLost(ChainError),
    /// Pre-sampling and health-check tick, carrying the wall-clock time.
    PreSampleTick(u64),
    /// Reconciliation, garbage collection and plugin management.
    RegularTick,
    Stop,
}

/// What happened to a vote attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VoteOutcome {
    Submitted,
    Skipped,
}

/// Validator-side oracle client.
pub struct Server {
    config: ServerConfig,
    address: Address,
    contract: Arc<dyn OracleContract>,
    plugins: Arc<PluginManager>,
    aggregator: PriceAggregator,
    computer: CommitmentHashComputer,
    memories: Memories,
    metrics: Arc<OracleMetrics>,
    round: RoundState,
    phase: Phase,
    lost_sync: bool,
    vote_records: BTreeMap<u64, VoteRecord>,
    outlier: Option<OutlierRecord>,
    last_sample_ts: Option<u64>,
    sampling: Option<JoinHandle<usize>>,
    subscription: Option<EventStream>,
}

impl Server {
    /// Build the server and load persisted vote state.
    ///
    /// Fails if the commitment schema does not reproduce the reference hash
    /// or the profile directory cannot be created or read. Malformed
    /// documents do not fail startup; they are set aside by [`Memories`].
    pub fn new(
        config: ServerConfig,
        contract: Arc<dyn OracleContract>,
        plugins: Arc<PluginManager>,
    ) -> anyhow::Result<Self> {
        let computer = CommitmentHashComputer::new()?;
        let memories = Memories::open(&config.profile_dir())?;
        let snapshot = memories.init()?;
        info!(
            records = snapshot.vote_records.len(),
            outlier = snapshot.outlier.is_some(),
            "vote state loaded"
        );

        Ok(Self {
            address: config.oracle_address,
            aggregator: PriceAggregator::new(config.confidence_strategy),
            config,
            contract,
            plugins,
            computer,
            memories,
            metrics: Arc::new(OracleMetrics::new()),
            round: RoundState::default(),
            phase: Phase::Syncing,
            lost_sync: false,
            vote_records: snapshot.vote_records,
            outlier: snapshot.outlier,
            last_sample_ts: None,
            sampling: None,
            subscription: None,
        })
    }

    pub fn round(&self) -> &RoundState {
        &self.round
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn lost_sync(&self) -> bool {
        self.lost_sync
    }

    pub fn vote_records(&self) -> &BTreeMap<u64, VoteRecord> {
        &self.vote_records
    }

    pub fn outlier(&self) -> Option<&OutlierRecord> {
        self.outlier.as_ref()
    }

    pub fn metrics(&self) -> Arc<OracleMetrics> {
        self.metrics.clone()
    }

    /// Initial contract read and subscription. Errors here are fatal.
    pub async fn start(&mut self) -> Result<(), ChainError> {
        self.sync().await?;
        self.plugins.manage().await;
        Ok(())
    }

    /// Drive the event loop until `shutdown` fires.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        let timing = &self.config.timing;
        let mut pre_sample = tokio::time::interval(Duration::from_secs(timing.pre_sample_interval_secs));
        let mut regular = tokio::time::interval(Duration::from_secs(timing.regular_interval_secs));
        pre_sample.set_missed_tick_behavior(MissedTickBehavior::Skip);
        regular.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let event = tokio::select! {
                _ = shutdown.recv() => ServerEvent::Stop,
                event = next_chain_event(&mut self.subscription) => event,
                _ = pre_sample.tick() => ServerEvent::PreSampleTick(now_secs()),
                _ = regular.tick() => ServerEvent::RegularTick,
            };
            let stop = event == ServerEvent::Stop;
            self.handle(event).await;
            if stop {
                break;
            }
        }
    }

    /// Apply one event.
    pub async fn handle(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::Chain(event) => self.on_chain_event(event).await,
            ServerEvent::SubscriptionLost(e) => {
                warn!(error = %e, "lost chain subscription");
                self.lost_sync = true;
                self.subscription = None;
            }
            ServerEvent::PreSampleTick(ts) => self.on_pre_sample_tick(ts).await,
            ServerEvent::RegularTick => self.on_regular_tick().await,
            ServerEvent::Stop => self.stop().await,
        }
    }

    /// Wait for the sample broadcast in flight, if any.
    pub async fn settle_sampling(&mut self) -> usize {
        match self.sampling.take() {
            Some(task) => task.await.unwrap_or_else(|e| {
                warn!(error = %e, "sampling task failed");
                0
            }),
            None => 0,
        }
    }

    /// Unsubscribe, flush state and stop the plugins.
    pub async fn stop(&mut self) {
        self.subscription = None;
        if let Some(task) = self.sampling.take() {
            task.abort();
        }
        self.flush_votes();
        if let Some(outlier) = &self.outlier {
            if let Err(e) = self.memories.flush(Record::Outlier(outlier)) {
                warn!(error = %e, "failed to persist outlier record");
            }
        }
        self.plugins.stop().await;
        info!(metrics = ?self.metrics.snapshot(), "oracle server stopped");
    }

    async fn sync(&mut self) -> Result<(), ChainError> {
        let round = self.contract.get_round().await?;
        let height = self.contract.get_last_round_block().await?;
        let vote_period = self.contract.get_vote_period().await?;
        let symbols = self.contract.get_symbols().await?;

        let mut state = RoundState {
            round,
            height,
            timestamp: now_secs(),
            vote_period,
            ..RoundState::default()
        };
        state.set_protocol_symbols(symbols);
        let subscription = self.contract.subscribe().await?;

        if state.symbols.is_empty() {
            warn!(round, "protocol has no symbols yet");
        }
        info!(round, height, vote_period, symbols = ?state.symbols, "synced with oracle contract");
        self.round = state;
        self.subscription = Some(subscription);
        self.lost_sync = false;
        self.phase = Phase::Synced;
        Ok(())
    }

    async fn resync(&mut self) {
        self.metrics.incr(Counter::Resyncs);
        if let Err(e) = self.sync().await {
            warn!(error = %e, "resync failed, retrying");
        }
    }

    async fn on_pre_sample_tick(&mut self, ts: u64) {
        if self.lost_sync {
            self.resync().await;
            return;
        }

        let block = match self.contract.block_number().await {
            Ok(block) => block,
            Err(e) => {
                debug!(error = %e, "cannot read block number");
                return;
            }
        };
        if !self
            .round
            .in_pre_sampling_window(block, self.config.timing.pre_sampling_range)
        {
            return;
        }
        if self.last_sample_ts == Some(ts) {
            return;
        }

        self.last_sample_ts = Some(ts);
        self.phase = Phase::PreSampling;
        let plugins = self.plugins.clone();
        let symbols = self.round.sampling_symbols.clone();
        debug!(ts, block, symbols = symbols.len(), "broadcasting sample request");
        if let Some(previous) = self.sampling.take() {
            if !previous.is_finished() {
                debug!("previous sample broadcast still running");
            }
        }
        self.sampling = Some(tokio::spawn(async move { plugins.sample(ts, &symbols).await }));
    }

    async fn on_regular_tick(&mut self) {
        self.reconcile().await;
        let removed = gc_vote_records(
            &mut self.vote_records,
            self.round.round,
            self.config.timing.max_buffered_rounds,
        );
        if removed > 0 {
            debug!(removed, "garbage-collected vote records");
            self.flush_votes();
        }
        self.plugins.manage().await;
        debug!(
            phase = ?self.phase,
            round = self.round.round,
            plugins = ?self.plugins.running(),
            metrics = ?self.metrics.snapshot(),
            "server status"
        );
    }

    /// Pull inclusion status for submitted but unconfirmed votes.
    async fn reconcile(&mut self) {
        let mut changed = false;
        for (round, record) in self.vote_records.iter_mut() {
            let Some(tx_hash) = record.tx_hash else {
                continue;
            };
            if record.mined {
                continue;
            }
            match self.contract.transaction_receipt(tx_hash).await {
                Ok(Some(status)) => {
                    let error = (!status.success).then(|| "transaction reverted".to_string());
                    debug!(round, %tx_hash, block = status.block, "vote transaction mined");
                    record.mark_mined(error);
                    changed = true;
                }
                Ok(None) => {}
                Err(e) => {
                    debug!(round, error = %e, "cannot reconcile vote transaction");
                    break;
                }
            }
        }
        if changed {
            self.flush_votes();
        }
    }

    async fn on_chain_event(&mut self, event: ChainEvent) {
        match event {
            ChainEvent::NewRound {
                round,
                height,
                timestamp,
                vote_period,
            } => {
                info!(round, height, vote_period, "new round");
                let symbols = std::mem::take(&mut self.round.symbols);
                self.round = RoundState {
                    round,
                    height,
                    timestamp,
                    vote_period,
                    ..RoundState::default()
                };
                self.round.set_protocol_symbols(symbols);
                self.phase = Phase::Voting;

                self.phase = match self.vote().await {
                    Ok(VoteOutcome::Submitted) => Phase::WaitingReveal,
                    Ok(VoteOutcome::Skipped) => Phase::Synced,
                    Err(e) => {
                        self.on_vote_error(round, e);
                        Phase::Synced
                    }
                };

                let symbols = self.round.symbols.clone();
                self.round.set_protocol_symbols(symbols);
                self.log_previous_round().await;
            }
            ChainEvent::NewSymbols { symbols, round } => {
                info!(round, symbols = ?symbols, "symbols announced");
                self.round.add_sampling_symbols(&symbols);
            }
            ChainEvent::SuccessfulVote { reporter } if reporter == self.address => {
                info!(round = self.round.round, "vote accepted");
                self.metrics.incr(Counter::SuccessfulVotes);
                self.mark_current_mined(None);
            }
            ChainEvent::InvalidVote {
                cause,
                reporter,
                exp_value,
                actual_value,
            } if reporter == self.address => {
                warn!(
                    round = self.round.round,
                    cause = %cause,
                    expected = %exp_value,
                    actual = %actual_value,
                    "vote rejected as invalid"
                );
                self.metrics.incr(Counter::InvalidVotes);
                self.mark_current_mined(Some(cause));
            }
            ChainEvent::NoRevealPenalty {
                voter,
                round,
                missed_reveal,
            } if voter == self.address => {
                warn!(round, missed_reveal, "penalized for missing reveal");
                self.metrics.incr(Counter::NoRevealPenalties);
            }
            ChainEvent::Penalized {
                participant,
                slashing_amount,
                symbol,
                median,
                reported,
                block,
            } if participant == self.address => {
                warn!(
                    symbol = %symbol,
                    %median,
                    %reported,
                    %slashing_amount,
                    block,
                    "outlier penalty"
                );
                self.metrics.incr(Counter::OutlierPenalties);
                self.mark_current_mined(None);
                self.store_outlier(PenaltyLog {
                    participant,
                    symbol,
                    median,
                    reported,
                    slashing_amount,
                    block,
                });
            }
            ChainEvent::TotalOracleRewards {
                ntn_reward,
                atn_reward,
            } => {
                info!(%ntn_reward, %atn_reward, "oracle rewards distributed");
                self.metrics.incr(Counter::Rewards);
            }
            other => debug!(event = other.name(), "event for another participant"),
        }
    }

    /// The commit-reveal vote for the current round.
    async fn vote(&mut self) -> Result<VoteOutcome, VoteError> {
        if self.contract.syncing().await? {
            return Err(VoteError::Syncing);
        }

        let symbols = self.contract.get_symbols().await?;
        if symbols.is_empty() {
            return Err(VoteError::NoSymbols);
        }
        self.round.set_protocol_symbols(symbols);

        let round = self.round.round;
        let height = self.round.height;
        if self.vote_records.contains_key(&round) {
            debug!(round, "already voted this round");
            return Ok(VoteOutcome::Skipped);
        }

        let penalties = self
            .contract
            .penalized_logs(height, height, self.address)
            .await?;
        if let Some(penalty) = penalties.into_iter().find(|p| !p.slashing_amount.is_zero()) {
            warn!(round, height, symbol = %penalty.symbol, "penalized in the round block, skipping vote");
            self.store_outlier(penalty);
            return Ok(VoteOutcome::Skipped);
        }

        let is_voter = self.contract.get_voters().await?.contains(&self.address);
        let last = round
            .checked_sub(1)
            .and_then(|previous| self.vote_records.get(&previous))
            .cloned();
        if !is_voter && last.is_none() {
            debug!(round, "not a voter and nothing to reveal");
            return Ok(VoteOutcome::Skipped);
        }

        if self.contract.balance(self.address).await?.is_zero() {
            return Err(VoteError::InsufficientFunds);
        }

        let cooling_down = self
            .outlier
            .as_ref()
            .is_some_and(|o| o.cools_down(height, self.config.timing.vote_buffer));
        let record = if is_voter && !cooling_down {
            Some(self.build_record()?)
        } else {
            if cooling_down {
                info!(round, "outlier cool-down, revealing only");
            }
            None
        };
        if record.is_none() && last.is_none() {
            return Ok(VoteOutcome::Skipped);
        }

        let commitment = record.as_ref().map_or(B256::ZERO, |r| r.commitment_hash);
        let (reports, salt) = last.map(|l| (l.reports, l.salt)).unwrap_or_default();
        let fees = fee_params(
            self.contract.base_fee().await?,
            self.contract.suggest_gas_tip_cap().await?,
            U256::from(self.config.gas_tip_cap),
        );

        let receipt = self
            .contract
            .vote(VoteTx {
                commitment,
                reports,
                salt,
                version: self.config.protocol_version,
                fees,
            })
            .await?;
        self.metrics.incr(Counter::VotesSubmitted);
        info!(round, tx_hash = %receipt.tx_hash, nonce = receipt.nonce, %commitment, "vote submitted");

        if let Some(mut record) = record {
            record.tx_hash = Some(receipt.tx_hash);
            record.tx_nonce = receipt.nonce;
            record.tx_cost = receipt.cost;
            self.vote_records.insert(round, record);
            gc_vote_records(
                &mut self.vote_records,
                round,
                self.config.timing.max_buffered_rounds,
            );
            self.flush_votes();
        }
        Ok(VoteOutcome::Submitted)
    }

    fn build_record(&self) -> Result<VoteRecord, VoteError> {
        let history = self.latest_prices();
        let ctx = VoteContext {
            aggregator: &self.aggregator,
            computer: &self.computer,
            sender: self.address,
            history: &history,
        };
        let target = self.last_sample_ts.unwrap_or(self.round.timestamp);
        build_vote_record(&ctx, self.plugins.as_ref(), &self.round, target)
    }

    /// Latest recorded price of every symbol, newest record first.
    fn latest_prices(&self) -> BTreeMap<String, Price> {
        let mut prices = BTreeMap::new();
        for record in self.vote_records.values().rev() {
            for (symbol, price) in &record.prices {
                prices
                    .entry(symbol.clone())
                    .or_insert_with(|| price.clone());
            }
        }
        prices
    }

    fn on_vote_error(&mut self, round: u64, e: VoteError) {
        match &e {
            VoteError::Syncing | VoteError::NoSymbols => {
                info!(round, reason = %e, "not voting this round");
            }
            VoteError::MissingData { symbol, .. } => {
                self.metrics.incr(Counter::MissedRounds);
                warn!(round, symbol = %symbol, error = %e, "incomplete data, skipping round");
            }
            VoteError::InsufficientFunds => {
                self.metrics.incr(Counter::MissedRounds);
                error!(round, address = %self.address, "{e}");
            }
            VoteError::Chain(ChainError::Connectivity(_)) => {
                error!(round, error = %e, "vote failed");
                self.lost_sync = true;
            }
            VoteError::Chain(_) | VoteError::Commitment(_) => {
                error!(round, error = %e, "vote failed");
            }
        }
    }

    async fn log_previous_round(&self) {
        let Some(previous) = self.round.round.checked_sub(1).filter(|r| *r > 0) else {
            return;
        };
        for symbol in &self.round.symbols {
            match self.contract.get_round_data(previous, symbol).await {
                Ok(data) => info!(
                    round = previous,
                    symbol = %symbol,
                    price = %data.price,
                    success = data.success,
                    "round price"
                ),
                Err(e) => debug!(round = previous, symbol = %symbol, error = %e, "no round data"),
            }
        }
    }

    fn mark_current_mined(&mut self, error: Option<String>) {
        if let Some(record) = self.vote_records.get_mut(&self.round.round) {
            record.mark_mined(error);
            self.flush_votes();
        }
    }

    fn store_outlier(&mut self, penalty: PenaltyLog) {
        let record = OutlierRecord {
            last_penalized_at_block: penalty.block,
            participant: penalty.participant,
            symbol: penalty.symbol,
            median: penalty.median,
            reported: penalty.reported,
            slashing_amount: penalty.slashing_amount,
            logged_at: now_secs(),
        };
        if let Err(e) = self.memories.flush(Record::Outlier(&record)) {
            warn!(error = %e, "failed to persist outlier record");
        }
        self.outlier = Some(record);
    }

    fn flush_votes(&self) {
        if let Err(e) = self.memories.flush(Record::VoteRecords(&self.vote_records)) {
            warn!(error = %e, "failed to persist vote records");
        }
    }
}

async fn next_chain_event(subscription: &mut Option<EventStream>) -> ServerEvent {
    let Some(events) = subscription else {
        return std::future::pending().await;
    };
    match events.recv().await {
        Some(Ok(event)) => ServerEvent::Chain(event),
        Some(Err(e)) => ServerEvent::SubscriptionLost(e),
        None => ServerEvent::SubscriptionLost(ChainError::Subscription(
            "event stream closed".to_string(),
        )),
    }
}
