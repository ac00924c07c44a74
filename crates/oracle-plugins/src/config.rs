//! Per-plugin configuration.
//!
//! Lives in the `[[plugins]]` array of the server's TOML file and is handed
//! to the plugin as JSON in its environment.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{PluginError, Result};

/// Configuration of one plugin, matched to a binary by `name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginConfig {
    /// File name of the plugin binary.
    pub name: String,
    /// Service key for the data provider, empty if none.
    #[serde(default)]
    pub key: String,
    #[serde(default = "default_scheme")]
    pub scheme: String,
    #[serde(default)]
    pub endpoint: String,
    /// Data provider request timeout (seconds).
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    /// Data refresh interval (seconds).
    #[serde(default = "default_refresh")]
    pub refresh: u64,
    #[serde(default)]
    pub disabled: bool,
    /// Plugin-specific settings passed through untouched.
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
struct PluginSection {
    #[serde(default)]
    plugins: Vec<PluginConfig>,
}

fn default_scheme() -> String {
    "https".to_string()
}

fn default_timeout() -> u64 {
    10
}

fn default_refresh() -> u64 {
    30
}

impl PluginConfig {
    /// Default configuration for a plugin that has no entry in the file.
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            key: String::new(),
            scheme: default_scheme(),
            endpoint: String::new(),
            timeout: default_timeout(),
            refresh: default_refresh(),
            disabled: false,
            extra: BTreeMap::new(),
        }
    }

    /// JSON handed to the plugin process.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| PluginError::Config(e.to_string()))
    }
}

/// Read the `plugins` array from the server TOML file, keyed by name.
///
/// A missing file yields no entries.
pub fn load_plugin_configs(path: &Path) -> Result<BTreeMap<String, PluginConfig>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(e) => return Err(e.into()),
    };
    parse_plugin_configs(&content)
}

/// Parse the `plugins` array out of a TOML document.
pub fn parse_plugin_configs(content: &str) -> Result<BTreeMap<String, PluginConfig>> {
    let section: PluginSection =
        toml::from_str(content).map_err(|e| PluginError::Config(e.to_string()))?;
    let mut configs = BTreeMap::new();
    for config in section.plugins {
        if config.name.is_empty() {
            return Err(PluginError::Config("plugin entry without a name".to_string()));
        }
        configs.insert(config.name.clone(), config);
    }
    Ok(configs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plugins_with_defaults() {
        let toml = r#"
            oracle_address = "0x0000000000000000000000000000000000000001"

            [[plugins]]
            name = "forex-fx"
            key = "secret"

            [[plugins]]
            name = "crypto-cex"
            disabled = true
            endpoint = "api.example.org"
            [plugins.extra]
            pairs = "ATN-USDC,NTN-USDC"
        "#;
        let configs = parse_plugin_configs(toml).expect("parse");
        assert_eq!(configs.len(), 2);

        let fx = &configs["forex-fx"];
        assert_eq!(fx.key, "secret");
        assert_eq!(fx.scheme, "https");
        assert_eq!(fx.timeout, 10);
        assert!(!fx.disabled);

        let cex = &configs["crypto-cex"];
        assert!(cex.disabled);
        assert_eq!(cex.extra["pairs"], "ATN-USDC,NTN-USDC");
    }

    #[test]
    fn test_no_plugin_section() {
        let configs = parse_plugin_configs("log_level = \"debug\"").expect("parse");
        assert!(configs.is_empty());
    }

    #[test]
    fn test_nameless_entry_rejected() {
        let err = parse_plugin_configs("[[plugins]]\nkey = \"k\"").expect_err("no name");
        assert!(matches!(err, PluginError::Config(_)));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let configs = load_plugin_configs(&dir.path().join("oracle.toml")).expect("load");
        assert!(configs.is_empty());
    }

    #[test]
    fn test_named_matches_serde_defaults() {
        let parsed = parse_plugin_configs("[[plugins]]\nname = \"p\"").expect("parse");
        assert_eq!(parsed["p"], PluginConfig::named("p"));
    }

    #[test]
    fn test_to_json() {
        let json = PluginConfig::named("p").to_json().expect("json");
        let value: serde_json::Value = serde_json::from_str(&json).expect("parse");
        assert_eq!(value["name"], "p");
        assert_eq!(value["refresh"], 30);
    }
}
