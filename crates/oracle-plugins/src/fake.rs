//! In-process plugins for tests.
//!
//! [`FakeLauncher`] hands out [`FakeCapability`] instances whose quotes,
//! liveness and latency can be changed while the manager holds them.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use bigdecimal::BigDecimal;

use crate::capability::{Capability, DataSourceType, Launcher, PluginPrice, PluginState, PriceResult};
use crate::config::PluginConfig;
use crate::{PluginError, Result};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Debug)]
struct FakeInner {
    name: String,
    protocol_version: u32,
    key_required: bool,
    close_fails: bool,
    quotes: Mutex<BTreeMap<String, (BigDecimal, BigDecimal)>>,
    delay: Mutex<Option<Duration>>,
    alive: AtomicBool,
    closed: AtomicBool,
    fetches: AtomicUsize,
}

/// A scripted plugin instance. Clones share state.
#[derive(Debug, Clone)]
pub struct FakeCapability {
    inner: Arc<FakeInner>,
}

impl FakeCapability {
    pub fn new(name: &str, protocol_version: u32) -> Self {
        Self::build(name, protocol_version, false, false)
    }

    fn build(name: &str, protocol_version: u32, key_required: bool, close_fails: bool) -> Self {
        Self {
            inner: Arc::new(FakeInner {
                name: name.to_string(),
                protocol_version,
                key_required,
                close_fails,
                quotes: Mutex::new(BTreeMap::new()),
                delay: Mutex::new(None),
                alive: AtomicBool::new(true),
                closed: AtomicBool::new(false),
                fetches: AtomicUsize::new(0),
            }),
        }
    }

    /// Quote `symbol` at `price` with `volume` from now on.
    pub fn set_quote(&self, symbol: &str, price: BigDecimal, volume: BigDecimal) {
        lock(&self.inner.quotes).insert(symbol.to_string(), (price, volume));
    }

    /// Sleep this long before answering `fetch_prices`.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *lock(&self.inner.delay) = delay;
    }

    /// Simulate a crash.
    pub fn kill(&self) {
        self.inner.alive.store(false, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn fetches(&self) -> usize {
        self.inner.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Capability for FakeCapability {
    async fn fetch_prices(&self, symbols: &[String]) -> Result<PriceResult> {
        self.inner.fetches.fetch_add(1, Ordering::SeqCst);
        let delay = *lock(&self.inner.delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if !self.is_alive() {
            return Err(PluginError::Closed(self.inner.name.clone()));
        }

        let quotes = lock(&self.inner.quotes);
        let mut result = PriceResult::default();
        for symbol in symbols {
            match quotes.get(symbol) {
                Some((price, volume)) => result.prices.push(PluginPrice {
                    symbol: symbol.clone(),
                    price: price.clone(),
                    confidence: oracle_types::MAX_CONFIDENCE,
                    timestamp: oracle_types::now_secs(),
                    volume: volume.clone(),
                }),
                None => result.unrecognized_symbols.push(symbol.clone()),
            }
        }
        Ok(result)
    }

    async fn state(&self) -> Result<PluginState> {
        Ok(PluginState {
            version: "0.0.0-fake".to_string(),
            available_symbols: lock(&self.inner.quotes).keys().cloned().collect(),
            key_required: self.inner.key_required,
            data_source_type: DataSourceType::Forex,
            protocol_version: self.inner.protocol_version,
        })
    }

    async fn close(&self) -> Result<()> {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.alive.store(false, Ordering::SeqCst);
        if self.inner.close_fails {
            return Err(PluginError::Closed(self.inner.name.clone()));
        }
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.inner.alive.load(Ordering::SeqCst)
    }
}

/// Launches [`FakeCapability`] instances and remembers the latest per name.
#[derive(Debug, Default)]
pub struct FakeLauncher {
    protocol_version: u32,
    key_required: HashSet<String>,
    close_fails: HashSet<String>,
    quotes: Mutex<HashMap<String, Vec<(String, BigDecimal, BigDecimal)>>>,
    instances: Mutex<HashMap<String, FakeCapability>>,
    launches: Mutex<HashMap<String, usize>>,
}

impl FakeLauncher {
    pub fn new(protocol_version: u32) -> Self {
        Self {
            protocol_version,
            ..Self::default()
        }
    }

    /// Plugins named `name` report that they need a service key.
    pub fn require_key(mut self, name: &str) -> Self {
        self.key_required.insert(name.to_string());
        self
    }

    /// Plugins named `name` report an error when closed.
    pub fn fail_close(mut self, name: &str) -> Self {
        self.close_fails.insert(name.to_string());
        self
    }

    /// Quote every future instance of `name` will start with.
    pub fn quote(&self, name: &str, symbol: &str, price: BigDecimal, volume: BigDecimal) {
        lock(&self.quotes)
            .entry(name.to_string())
            .or_default()
            .push((symbol.to_string(), price, volume));
    }

    /// Latest instance launched for `name`.
    pub fn instance(&self, name: &str) -> Option<FakeCapability> {
        lock(&self.instances).get(name).cloned()
    }

    /// How many times `name` was launched.
    pub fn launches(&self, name: &str) -> usize {
        lock(&self.launches).get(name).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Launcher for FakeLauncher {
    async fn launch(
        &self,
        name: &str,
        _path: &Path,
        _config: &PluginConfig,
    ) -> Result<Box<dyn Capability>> {
        let capability = FakeCapability::build(
            name,
            self.protocol_version,
            self.key_required.contains(name),
            self.close_fails.contains(name),
        );
        if let Some(quotes) = lock(&self.quotes).get(name) {
            for (symbol, price, volume) in quotes {
                capability.set_quote(symbol, price.clone(), volume.clone());
            }
        }
        *lock(&self.launches).entry(name.to_string()).or_default() += 1;
        lock(&self.instances).insert(name.to_string(), capability.clone());
        Ok(Box::new(capability))
    }
}
