//! Plugin discovery, hot swap and sampling.
//!
//! The running set lives behind a lock that is never held across an
//! `.await`: callers snapshot the handles they need, release the lock, and
//! then talk to the plugins.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{Duration, SystemTime};

use bigdecimal::BigDecimal;
use oracle_aggregator::SampleSource;
use oracle_types::Sample;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::capability::{Capability, Launcher, PluginState, PriceResult};
use crate::config::{load_plugin_configs, PluginConfig};
use crate::store::SampleStore;
use crate::{PluginError, Result};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Settings of the plugin manager.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub plugin_dir: PathBuf,
    /// TOML file holding the `[[plugins]]` entries, re-read on every pass.
    pub config_file: Option<PathBuf>,
    pub protocol_version: u32,
    pub call_timeout: Duration,
    pub sample_window_secs: u64,
    pub sample_buffer_len: usize,
}

/// A running plugin instance.
pub struct PluginHandle {
    pub name: String,
    pub path: PathBuf,
    pub start_time: SystemTime,
    pub config: PluginConfig,
    pub state: PluginState,
    capability: Arc<dyn Capability>,
    samples: Mutex<SampleStore>,
}

impl std::fmt::Debug for PluginHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginHandle")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("start_time", &self.start_time)
            .field("version", &self.state.version)
            .finish()
    }
}

impl PluginHandle {
    /// Store the answer to the broadcast at `timestamp`.
    fn record(&self, timestamp: u64, result: PriceResult) -> usize {
        if !result.unrecognized_symbols.is_empty() {
            debug!(
                plugin = %self.name,
                symbols = ?result.unrecognized_symbols,
                "plugin does not quote some symbols"
            );
        }
        let mut store = lock(&self.samples);
        let mut stored = 0;
        for price in result.prices {
            store.push(Sample {
                symbol: price.symbol,
                price: price.price,
                volume: price.volume,
                timestamp,
            });
            stored += 1;
        }
        stored
    }

    fn select(&self, symbol: &str, target: u64) -> Option<(BigDecimal, BigDecimal)> {
        lock(&self.samples)
            .select(symbol, target)
            .map(|s| (s.price.clone(), s.volume.clone()))
    }
}

/// One executable found in the plugin directory.
#[derive(Debug, Clone)]
struct Binary {
    path: PathBuf,
    modified: SystemTime,
}

/// Keeps one live instance per enabled plugin binary.
pub struct PluginManager {
    config: ManagerConfig,
    launcher: Arc<dyn Launcher>,
    configs: RwLock<BTreeMap<String, PluginConfig>>,
    plugins: RwLock<BTreeMap<String, Arc<PluginHandle>>>,
    /// Plugins that need a key, with the config they were rejected under.
    key_missing: Mutex<HashMap<String, PluginConfig>>,
}

impl PluginManager {
    pub fn new(config: ManagerConfig, launcher: Arc<dyn Launcher>) -> Self {
        Self {
            config,
            launcher,
            configs: RwLock::new(BTreeMap::new()),
            plugins: RwLock::new(BTreeMap::new()),
            key_missing: Mutex::new(HashMap::new()),
        }
    }

    /// Replace the plugin configurations. Takes effect on the next pass.
    pub fn set_configs(&self, configs: BTreeMap<String, PluginConfig>) {
        *self.configs.write().unwrap_or_else(|e| e.into_inner()) = configs;
    }

    /// Names of the running plugins.
    pub fn running(&self) -> Vec<String> {
        self.read_plugins().keys().cloned().collect()
    }

    /// Handle of a running plugin.
    pub fn handle(&self, name: &str) -> Option<Arc<PluginHandle>> {
        self.read_plugins().get(name).cloned()
    }

    /// Run one management pass: reload configuration, retire stale
    /// instances, launch missing ones.
    pub async fn manage(&self) {
        self.reload_configs();
        let binaries = self.discover();

        for handle in self.snapshot() {
            let config = self.config_for(&handle.name);
            let reason = match binaries.get(&handle.name) {
                None => Some("binary removed"),
                Some(_) if config.disabled => Some("disabled"),
                Some(_) if config != handle.config => Some("config changed"),
                Some(_) if !handle.capability.is_alive() => Some("exited"),
                Some(bin) if bin.modified > handle.start_time => Some("binary updated"),
                Some(_) => None,
            };
            if let Some(reason) = reason {
                info!(plugin = %handle.name, reason, "stopping plugin");
                self.write_plugins().remove(&handle.name);
                self.close(&handle).await;
            }
        }

        for (name, binary) in &binaries {
            if self.read_plugins().contains_key(name) {
                continue;
            }
            let config = self.config_for(name);
            if config.disabled {
                continue;
            }
            if lock(&self.key_missing).get(name) == Some(&config) {
                debug!(plugin = %name, "skipping plugin until a key is configured");
                continue;
            }

            match self.launch(name, binary, config.clone()).await {
                Ok(handle) => {
                    info!(plugin = %name, version = %handle.state.version, "plugin started");
                    lock(&self.key_missing).remove(name);
                    self.write_plugins().insert(name.clone(), Arc::new(handle));
                }
                Err(PluginError::KeyRequired(_)) => {
                    warn!(plugin = %name, "plugin requires a key, configure it to enable");
                    lock(&self.key_missing).insert(name.clone(), config);
                }
                Err(e) => {
                    warn!(plugin = %name, error = %e, "failed to start plugin");
                }
            }
        }
    }

    /// Ask every live plugin for `symbols` and store the replies under
    /// `timestamp`. Slow or failing plugins contribute nothing.
    ///
    /// Returns the number of samples stored.
    pub async fn sample(&self, timestamp: u64, symbols: &[String]) -> usize {
        if symbols.is_empty() {
            return 0;
        }
        let timeout = self.config.call_timeout;
        let mut tasks = JoinSet::new();
        for handle in self.snapshot() {
            let symbols = symbols.to_vec();
            tasks.spawn(async move {
                let result =
                    tokio::time::timeout(timeout, handle.capability.fetch_prices(&symbols)).await;
                (handle, result)
            });
        }

        let mut stored = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((handle, Ok(Ok(result)))) => stored += handle.record(timestamp, result),
                Ok((handle, Ok(Err(e)))) => {
                    warn!(plugin = %handle.name, error = %e, "fetch_prices failed");
                }
                Ok((handle, Err(_))) => {
                    warn!(plugin = %handle.name, timeout = ?timeout, "fetch_prices timed out");
                }
                Err(e) => warn!(error = %e, "sampling task failed"),
            }
        }
        debug!(timestamp, stored, "sample round complete");
        stored
    }

    /// Close every plugin and forget them.
    pub async fn stop(&self) {
        let handles: Vec<_> = std::mem::take(&mut *self.write_plugins())
            .into_values()
            .collect();
        for handle in handles {
            self.close(&handle).await;
        }
        info!("plugin manager stopped");
    }

    async fn launch(&self, name: &str, binary: &Binary, config: PluginConfig) -> Result<PluginHandle> {
        let start_time = SystemTime::now();
        let capability: Arc<dyn Capability> =
            Arc::from(self.launcher.launch(name, &binary.path, &config).await?);

        let state = match tokio::time::timeout(self.config.call_timeout, capability.state()).await {
            Ok(Ok(state)) => state,
            Ok(Err(e)) => {
                self.close_capability(name, capability.as_ref()).await;
                return Err(e);
            }
            Err(_) => {
                self.close_capability(name, capability.as_ref()).await;
                return Err(PluginError::Timeout(name.to_string()));
            }
        };

        if state.protocol_version != self.config.protocol_version {
            self.close_capability(name, capability.as_ref()).await;
            return Err(PluginError::Handshake {
                name: name.to_string(),
                expected: self.config.protocol_version,
                actual: state.protocol_version,
            });
        }
        if state.key_required && config.key.is_empty() {
            self.close_capability(name, capability.as_ref()).await;
            return Err(PluginError::KeyRequired(name.to_string()));
        }

        Ok(PluginHandle {
            name: name.to_string(),
            path: binary.path.clone(),
            start_time,
            config,
            state,
            capability,
            samples: Mutex::new(SampleStore::new(
                self.config.sample_buffer_len,
                self.config.sample_window_secs,
            )),
        })
    }

    async fn close(&self, handle: &PluginHandle) {
        self.close_capability(&handle.name, handle.capability.as_ref()).await;
    }

    /// Close `capability`; failures are logged and otherwise ignored.
    async fn close_capability(&self, name: &str, capability: &dyn Capability) {
        match tokio::time::timeout(self.config.call_timeout, capability.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(plugin = %name, error = %e, "close failed"),
            Err(_) => warn!(plugin = %name, "close timed out"),
        }
    }

    fn reload_configs(&self) {
        let Some(path) = &self.config.config_file else {
            return;
        };
        match load_plugin_configs(path) {
            Ok(configs) => self.set_configs(configs),
            Err(e) => warn!(path = %path.display(), error = %e, "keeping previous plugin configs"),
        }
    }

    fn config_for(&self, name: &str) -> PluginConfig {
        self.configs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
            .unwrap_or_else(|| PluginConfig::named(name))
    }

    /// Executables in the plugin directory, keyed by file name.
    fn discover(&self) -> BTreeMap<String, Binary> {
        let mut found = BTreeMap::new();
        let entries = match std::fs::read_dir(&self.config.plugin_dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %self.config.plugin_dir.display(), error = %e, "cannot read plugin directory");
                return found;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            let Ok(meta) = std::fs::metadata(&path) else {
                continue;
            };
            if !meta.is_file() || !is_executable(&meta) {
                continue;
            }
            let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            found.insert(name, Binary { path, modified });
        }
        found
    }

    fn snapshot(&self) -> Vec<Arc<PluginHandle>> {
        self.read_plugins().values().cloned().collect()
    }

    fn read_plugins(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, Arc<PluginHandle>>> {
        self.plugins.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_plugins(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, Arc<PluginHandle>>> {
        self.plugins.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl SampleSource for PluginManager {
    fn select_samples(&self, symbol: &str, target: u64) -> (Vec<BigDecimal>, Vec<BigDecimal>) {
        self.read_plugins()
            .values()
            .filter_map(|handle| handle.select(symbol, target))
            .unzip()
    }
}

#[cfg(unix)]
fn is_executable(meta: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_meta: &std::fs::Metadata) -> bool {
    true
}
