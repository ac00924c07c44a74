//! Test support for end-to-end oracle flows.
//!
//! [`FakeContract`] stands in for the chain gateway: tests script round
//! state and inject events, and read back every vote the server sent.
//! [`Harness`] wires a [`Server`] to it with in-process plugins.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use oracle_plugins::fake::FakeLauncher;
use oracle_plugins::{ManagerConfig, PluginManager};
use oracle_server::chain::{ChainError, EventStream, OracleContract, PenaltyLog, Result, TxReceipt, TxStatus, VoteTx};
use oracle_server::config::{ServerConfig, TimingConfig};
use oracle_server::{Server, ServerEvent};
use oracle_types::{Address, ChainEvent, ConfidenceStrategy, RoundData, B256, U256};
use tempfile::TempDir;
use tokio::sync::mpsc;

/// The voter address every harness server uses.
pub const VOTER: Address = Address::new([0x71; 20]);

/// Plugin protocol version the harness launcher speaks.
pub const PLUGIN_PROTOCOL: u32 = oracle_plugins::PROTOCOL_VERSION;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Scriptable chain state.
#[derive(Debug, Clone)]
pub struct ChainState {
    pub round: u64,
    pub last_round_block: u64,
    pub vote_period: u64,
    pub symbols: Vec<String>,
    pub voters: Vec<Address>,
    pub block: u64,
    pub syncing: bool,
    pub balance: U256,
    pub base_fee: U256,
    pub tip: U256,
    pub penalties: Vec<PenaltyLog>,
    pub round_data: BTreeMap<(u64, String), RoundData>,
    /// Fail every call with a connectivity error.
    pub offline: bool,
}

impl Default for ChainState {
    fn default() -> Self {
        Self {
            round: 1,
            last_round_block: 0,
            vote_period: 30,
            symbols: Vec::new(),
            voters: vec![VOTER],
            block: 1,
            syncing: false,
            balance: U256::from(10u64).pow(U256::from(18u64)),
            base_fee: U256::from(100u64),
            tip: U256::from(2u64),
            penalties: Vec::new(),
            round_data: BTreeMap::new(),
            offline: false,
        }
    }
}

/// In-process oracle contract.
#[derive(Debug, Default)]
pub struct FakeContract {
    state: Mutex<ChainState>,
    votes: Mutex<Vec<(TxReceipt, VoteTx)>>,
    receipts: Mutex<HashMap<B256, TxStatus>>,
    events: Mutex<Option<mpsc::Sender<std::result::Result<ChainEvent, ChainError>>>>,
    subscriptions: Mutex<usize>,
}

impl FakeContract {
    pub fn new(symbols: &[&str]) -> Self {
        let contract = Self::default();
        contract.update(|s| s.symbols = symbols.iter().map(|s| s.to_string()).collect());
        contract
    }

    /// Change chain state.
    pub fn update(&self, f: impl FnOnce(&mut ChainState)) {
        f(&mut lock(&self.state));
    }

    pub fn state(&self) -> ChainState {
        lock(&self.state).clone()
    }

    /// Every vote transaction sent so far, oldest first.
    pub fn votes(&self) -> Vec<VoteTx> {
        lock(&self.votes).iter().map(|(_, tx)| tx.clone()).collect()
    }

    pub fn receipts(&self) -> Vec<TxReceipt> {
        lock(&self.votes).iter().map(|(r, _)| *r).collect()
    }

    /// Include every sent transaction in `block`.
    pub fn mine_all(&self, block: u64, success: bool) {
        let hashes: Vec<B256> = lock(&self.votes).iter().map(|(r, _)| r.tx_hash).collect();
        let mut receipts = lock(&self.receipts);
        for hash in hashes {
            receipts.insert(hash, TxStatus { block, success });
        }
    }

    pub fn subscriptions(&self) -> usize {
        *lock(&self.subscriptions)
    }

    /// Deliver an event on the current subscription.
    pub async fn emit(&self, event: ChainEvent) -> bool {
        let sender = lock(&self.events).clone();
        match sender {
            Some(tx) => tx.send(Ok(event)).await.is_ok(),
            None => false,
        }
    }

    /// Fail the current subscription.
    pub async fn break_subscription(&self) {
        let sender = lock(&self.events).take();
        if let Some(tx) = sender {
            let _ = tx
                .send(Err(ChainError::Subscription("connection reset".to_string())))
                .await;
        }
    }

    fn read<T>(&self, f: impl FnOnce(&ChainState) -> T) -> Result<T> {
        let state = lock(&self.state);
        if state.offline {
            return Err(ChainError::Connectivity("gateway offline".to_string()));
        }
        Ok(f(&state))
    }
}

#[async_trait]
impl OracleContract for FakeContract {
    async fn get_round(&self) -> Result<u64> {
        self.read(|s| s.round)
    }

    async fn get_last_round_block(&self) -> Result<u64> {
        self.read(|s| s.last_round_block)
    }

    async fn get_symbols(&self) -> Result<Vec<String>> {
        self.read(|s| s.symbols.clone())
    }

    async fn get_vote_period(&self) -> Result<u64> {
        self.read(|s| s.vote_period)
    }

    async fn get_voters(&self) -> Result<Vec<Address>> {
        self.read(|s| s.voters.clone())
    }

    async fn get_round_data(&self, round: u64, symbol: &str) -> Result<RoundData> {
        self.read(|s| s.round_data.get(&(round, symbol.to_string())).cloned())?
            .ok_or_else(|| ChainError::Call {
                method: "get_round_data".to_string(),
                message: format!("no data for {symbol} in round {round}"),
            })
    }

    async fn latest_round_data(&self, symbol: &str) -> Result<RoundData> {
        let round = self.read(|s| s.round)?;
        self.get_round_data(round.saturating_sub(1), symbol).await
    }

    async fn vote(&self, tx: VoteTx) -> Result<TxReceipt> {
        self.read(|_| ())?;
        let mut votes = lock(&self.votes);
        let nonce = votes.len() as u64;
        let receipt = TxReceipt {
            tx_hash: B256::left_padding_from(&(nonce + 1).to_be_bytes()),
            nonce,
            cost: tx.fees.max_fee_per_gas.saturating_mul(U256::from(300_000u64)),
        };
        votes.push((receipt, tx));
        Ok(receipt)
    }

    async fn block_number(&self) -> Result<u64> {
        self.read(|s| s.block)
    }

    async fn syncing(&self) -> Result<bool> {
        self.read(|s| s.syncing)
    }

    async fn balance(&self, _account: Address) -> Result<U256> {
        self.read(|s| s.balance)
    }

    async fn base_fee(&self) -> Result<U256> {
        self.read(|s| s.base_fee)
    }

    async fn suggest_gas_tip_cap(&self) -> Result<U256> {
        self.read(|s| s.tip)
    }

    async fn penalized_logs(&self, from: u64, to: u64, participant: Address) -> Result<Vec<PenaltyLog>> {
        self.read(|s| {
            s.penalties
                .iter()
                .filter(|p| p.participant == participant && p.block >= from && p.block <= to)
                .cloned()
                .collect()
        })
    }

    async fn transaction_receipt(&self, tx_hash: B256) -> Result<Option<TxStatus>> {
        self.read(|_| ())?;
        Ok(lock(&self.receipts).get(&tx_hash).copied())
    }

    async fn subscribe(&self) -> Result<EventStream> {
        self.read(|_| ())?;
        let (tx, rx) = mpsc::channel(64);
        *lock(&self.events) = Some(tx);
        *lock(&self.subscriptions) += 1;
        Ok(rx)
    }
}

/// A server wired to a [`FakeContract`] and in-process plugins.
pub struct Harness {
    pub contract: Arc<FakeContract>,
    pub launcher: Arc<FakeLauncher>,
    pub profile: TempDir,
    pub plugin_dir: TempDir,
}

impl Harness {
    pub fn new(symbols: &[&str]) -> std::io::Result<Self> {
        Ok(Self {
            contract: Arc::new(FakeContract::new(symbols)),
            launcher: Arc::new(FakeLauncher::new(PLUGIN_PROTOCOL)),
            profile: tempfile::tempdir()?,
            plugin_dir: tempfile::tempdir()?,
        })
    }

    /// Server configuration pointing at the harness directories.
    pub fn config(&self) -> ServerConfig {
        ServerConfig {
            oracle_address: VOTER,
            profile_dir: self.profile.path().display().to_string(),
            plugin_dir: self.plugin_dir.path().display().to_string(),
            confidence_strategy: ConfidenceStrategy::Fixed,
            timing: TimingConfig {
                pre_sample_interval_secs: 1,
                regular_interval_secs: 1,
                vote_buffer: 100,
                plugin_timeout_secs: 1,
                ..TimingConfig::default()
            },
            ..ServerConfig::default()
        }
    }

    pub fn plugin_manager(&self, config: &ServerConfig) -> Arc<PluginManager> {
        let manager = ManagerConfig {
            call_timeout: Duration::from_millis(300),
            ..config.manager_config(None)
        };
        Arc::new(PluginManager::new(manager, self.launcher.clone()))
    }

    /// Build a server over the harness state, including anything already
    /// persisted in the profile directory.
    pub fn server(&self) -> anyhow::Result<Server> {
        let config = self.config();
        let plugins = self.plugin_manager(&config);
        Server::new(config, self.contract.clone(), plugins)
    }

    /// Place an executable for `name` in the plugin directory.
    pub fn install_plugin(&self, name: &str) -> std::io::Result<()> {
        install_binary(self.plugin_dir.path(), name)
    }
}

pub fn install_binary(dir: &Path, name: &str) -> std::io::Result<()> {
    let path = dir.join(name);
    std::fs::write(&path, "#!/bin/sh\n")?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(&path)?.permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms)?;
    }
    Ok(())
}

/// Sample in the pre-sampling window of the round after `server`'s
/// current one, then start that round.
pub async fn sample_and_start_round(server: &mut Server, contract: &FakeContract, ts: u64) -> usize {
    let current = server.round().clone();
    let next_height = current.next_round_height();
    contract.update(|s| s.block = next_height.saturating_sub(1));
    server.handle(ServerEvent::PreSampleTick(ts)).await;
    let stored = server.settle_sampling().await;

    let round = current.round + 1;
    contract.update(|s| {
        s.round = round;
        s.last_round_block = next_height;
        s.block = next_height;
    });
    server
        .handle(ServerEvent::Chain(ChainEvent::NewRound {
            round,
            height: next_height,
            timestamp: ts,
            vote_period: current.vote_period,
        }))
        .await;
    stored
}

/// Poll `check` until it holds or a few seconds pass.
pub async fn eventually(check: impl Fn() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    check()
}
