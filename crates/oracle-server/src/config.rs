//! Configuration file management.
//!
//! `oracle.toml` lives in the profile directory (`$ORACLE_PROFILE_DIR`,
//! default `~/.oracle-server`). A missing file means defaults; the voter
//! address has no default and must be set.

use std::path::{Path, PathBuf};
use std::time::Duration;

use oracle_plugins::{ManagerConfig, PluginConfig};
use oracle_types::{Address, ConfidenceStrategy};
use serde::{Deserialize, Serialize};

/// Environment variable overriding the profile directory.
pub const PROFILE_DIR_ENV: &str = "ORACLE_PROFILE_DIR";

/// Config file name inside the profile directory.
pub const CONFIG_FILE: &str = "oracle.toml";

/// Complete server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address this node votes with.
    #[serde(default)]
    pub oracle_address: Address,
    /// Persistence directory. Empty = platform default.
    #[serde(default)]
    pub profile_dir: String,
    /// Plugin binaries. Empty = `<profile_dir>/plugins`.
    #[serde(default)]
    pub plugin_dir: String,
    /// Chain gateway socket. Empty = `<profile_dir>/chain.sock`.
    #[serde(default)]
    pub bridge_socket: String,
    /// Log level: "trace" | "debug" | "info" | "warn" | "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Lower bound of the priority fee (wei).
    #[serde(default = "default_gas_tip_cap")]
    pub gas_tip_cap: u64,
    #[serde(default)]
    pub confidence_strategy: ConfidenceStrategy,
    /// Version passed with every vote.
    #[serde(default = "default_protocol_version")]
    pub protocol_version: u8,
    #[serde(default)]
    pub timing: TimingConfig,
    /// Re-read from disk on every plugin management pass.
    #[serde(default)]
    pub plugins: Vec<PluginConfig>,
}

/// Round timing and buffering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Blocks before the next round in which sampling starts.
    #[serde(default = "default_pre_sampling_range")]
    pub pre_sampling_range: u64,
    #[serde(default = "default_pre_sample_interval")]
    pub pre_sample_interval_secs: u64,
    #[serde(default = "default_regular_interval")]
    pub regular_interval_secs: u64,
    /// Vote records kept in memory and on disk.
    #[serde(default = "default_max_buffered_rounds")]
    pub max_buffered_rounds: u64,
    /// Blocks to sit out after an outlier penalty.
    #[serde(default = "default_vote_buffer")]
    pub vote_buffer: u64,
    #[serde(default = "default_plugin_timeout")]
    pub plugin_timeout_secs: u64,
    /// Samples further than this from the round target are ignored.
    #[serde(default = "default_sample_window")]
    pub sample_window_secs: u64,
    /// Samples kept per plugin and symbol.
    #[serde(default = "default_sample_buffer_len")]
    pub sample_buffer_len: usize,
}

// Default value functions

fn default_log_level() -> String {
    "info".to_string()
}

fn default_gas_tip_cap() -> u64 {
    1
}

fn default_protocol_version() -> u8 {
    1
}

fn default_pre_sampling_range() -> u64 {
    15
}

fn default_pre_sample_interval() -> u64 {
    1
}

fn default_regular_interval() -> u64 {
    10
}

fn default_max_buffered_rounds() -> u64 {
    10
}

fn default_vote_buffer() -> u64 {
    86_400
}

fn default_plugin_timeout() -> u64 {
    5
}

fn default_sample_window() -> u64 {
    30
}

fn default_sample_buffer_len() -> usize {
    64
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            pre_sampling_range: default_pre_sampling_range(),
            pre_sample_interval_secs: default_pre_sample_interval(),
            regular_interval_secs: default_regular_interval(),
            max_buffered_rounds: default_max_buffered_rounds(),
            vote_buffer: default_vote_buffer(),
            plugin_timeout_secs: default_plugin_timeout(),
            sample_window_secs: default_sample_window(),
            sample_buffer_len: default_sample_buffer_len(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            oracle_address: Address::ZERO,
            profile_dir: String::new(),
            plugin_dir: String::new(),
            bridge_socket: String::new(),
            log_level: default_log_level(),
            gas_tip_cap: default_gas_tip_cap(),
            confidence_strategy: ConfidenceStrategy::default(),
            protocol_version: default_protocol_version(),
            timing: TimingConfig::default(),
            plugins: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from `path`, or the default location.
    ///
    /// Falls back to defaults if the file does not exist.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let config_path = path.map_or_else(Self::default_config_path, Path::to_path_buf);
        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: ServerConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Reject configurations the server cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.oracle_address.is_zero() {
            anyhow::bail!("oracle_address is not configured");
        }
        if self.timing.max_buffered_rounds == 0 {
            anyhow::bail!("timing.max_buffered_rounds must be at least 1");
        }
        if self.timing.pre_sample_interval_secs == 0 || self.timing.regular_interval_secs == 0 {
            anyhow::bail!("timing intervals must be at least one second");
        }
        Ok(())
    }

    /// Get the profile directory path.
    pub fn profile_dir(&self) -> PathBuf {
        if self.profile_dir.is_empty() {
            Self::default_profile_dir()
        } else {
            PathBuf::from(&self.profile_dir)
        }
    }

    pub fn plugin_dir(&self) -> PathBuf {
        if self.plugin_dir.is_empty() {
            self.profile_dir().join("plugins")
        } else {
            PathBuf::from(&self.plugin_dir)
        }
    }

    pub fn bridge_socket(&self) -> PathBuf {
        if self.bridge_socket.is_empty() {
            self.profile_dir().join("chain.sock")
        } else {
            PathBuf::from(&self.bridge_socket)
        }
    }

    /// Plugin manager settings derived from this configuration.
    pub fn manager_config(&self, config_file: Option<PathBuf>) -> ManagerConfig {
        ManagerConfig {
            plugin_dir: self.plugin_dir(),
            config_file,
            protocol_version: oracle_plugins::PROTOCOL_VERSION,
            call_timeout: Duration::from_secs(self.timing.plugin_timeout_secs),
            sample_window_secs: self.timing.sample_window_secs,
            sample_buffer_len: self.timing.sample_buffer_len,
        }
    }

    /// Get the config file path.
    pub fn default_config_path() -> PathBuf {
        Self::default_profile_dir().join(CONFIG_FILE)
    }

    fn default_profile_dir() -> PathBuf {
        if let Ok(dir) = std::env::var(PROFILE_DIR_ENV) {
            return PathBuf::from(dir);
        }
        std::env::var("HOME")
            .map(|h| PathBuf::from(h).join(".oracle-server"))
            .unwrap_or_else(|_| PathBuf::from("/tmp/oracle-server"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.gas_tip_cap, 1);
        assert_eq!(config.protocol_version, 1);
        assert_eq!(config.confidence_strategy, ConfidenceStrategy::Linear);
        assert_eq!(config.timing.pre_sampling_range, 15);
        assert_eq!(config.timing.max_buffered_rounds, 10);
        assert_eq!(config.timing.vote_buffer, 86_400);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_serialization() {
        let config = ServerConfig::default();
        let toml_str = toml::to_string(&config).expect("serialize");
        let parsed: ServerConfig = toml::from_str(&toml_str).expect("parse");
        assert_eq!(parsed.timing, config.timing);
    }

    #[test]
    fn test_load_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(
            &path,
            r#"
oracle_address = "0x7156e0c4b4b6dcc24e7d6d3b3df9bd3d2d2b2f86"
profile_dir = "/var/lib/oracle"
confidence_strategy = "fixed"

[timing]
vote_buffer = 100

[[plugins]]
name = "forex-fx"
key = "abc"
"#,
        )
        .expect("write");

        let config = ServerConfig::load(Some(&path)).expect("load");
        config.validate().expect("valid");
        assert_eq!(config.confidence_strategy, ConfidenceStrategy::Fixed);
        assert_eq!(config.timing.vote_buffer, 100);
        assert_eq!(config.timing.regular_interval_secs, 10);
        assert_eq!(config.plugins.len(), 1);
        assert_eq!(config.plugin_dir(), PathBuf::from("/var/lib/oracle/plugins"));
        assert_eq!(config.bridge_socket(), PathBuf::from("/var/lib/oracle/chain.sock"));
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = ServerConfig::load(Some(&dir.path().join("none.toml"))).expect("load");
        assert!(config.oracle_address.is_zero());
        assert!(config.plugins.is_empty());
    }

    #[test]
    fn test_manager_config() {
        let config = ServerConfig {
            plugin_dir: "/opt/plugins".to_string(),
            ..ServerConfig::default()
        };
        let manager = config.manager_config(None);
        assert_eq!(manager.plugin_dir, PathBuf::from("/opt/plugins"));
        assert_eq!(manager.call_timeout, Duration::from_secs(5));
        assert_eq!(manager.sample_buffer_len, 64);
    }
}
