//! The transport-independent plugin seam.

use std::path::Path;

use async_trait::async_trait;
use bigdecimal::{BigDecimal, Zero};
use serde::{Deserialize, Serialize};

use crate::config::PluginConfig;
use crate::Result;

/// One priced symbol returned by `fetch_prices`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginPrice {
    pub symbol: String,
    pub price: BigDecimal,
    #[serde(default = "default_confidence")]
    pub confidence: u8,
    #[serde(default)]
    pub timestamp: u64,
    #[serde(default = "BigDecimal::zero")]
    pub volume: BigDecimal,
}

/// Reply of `fetch_prices`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceResult {
    #[serde(default)]
    pub prices: Vec<PluginPrice>,
    #[serde(default)]
    pub unrecognized_symbols: Vec<String>,
}

/// Kind of market a plugin reads from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSourceType {
    #[default]
    Forex,
    Crypto,
    Amm,
}

/// Reply of `state`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginState {
    pub version: String,
    #[serde(default)]
    pub available_symbols: Vec<String>,
    #[serde(default)]
    pub key_required: bool,
    #[serde(default)]
    pub data_source_type: DataSourceType,
    pub protocol_version: u32,
}

fn default_confidence() -> u8 {
    oracle_types::MAX_CONFIDENCE
}

/// What a running plugin instance can do.
#[async_trait]
pub trait Capability: Send + Sync {
    /// Prices for `symbols`, plus the symbols the plugin does not know.
    async fn fetch_prices(&self, symbols: &[String]) -> Result<PriceResult>;

    /// Version and capabilities.
    async fn state(&self) -> Result<PluginState>;

    /// Ask the plugin to shut down.
    async fn close(&self) -> Result<()>;

    /// Whether the instance is still running.
    fn is_alive(&self) -> bool {
        true
    }
}

/// Starts plugin instances. The manager only ever talks to this trait.
#[async_trait]
pub trait Launcher: Send + Sync {
    async fn launch(
        &self,
        name: &str,
        path: &Path,
        config: &PluginConfig,
    ) -> Result<Box<dyn Capability>>;
}
