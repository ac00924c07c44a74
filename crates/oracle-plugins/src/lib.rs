//! # oracle-plugins
//!
//! Data-source plugin lifecycle and sample collection.
//!
//! A plugin is an executable in the plugin directory that answers three
//! calls: `fetch_prices`, `state` and `close`. The [`PluginManager`] keeps
//! exactly one running instance per enabled binary, replaces instances whose
//! binary or configuration changed, and fans sample requests out to every
//! live instance concurrently. Collected samples are served back to the
//! aggregator through [`oracle_aggregator::SampleSource`].
//!
//! ## Modules
//!
//! - [`capability`] — the `Capability` / `Launcher` seam and wire types
//! - [`config`] — per-plugin configuration
//! - [`store`] — per-plugin sample ring buffers
//! - [`process`] — subprocess transport (JSON-RPC over stdio)
//! - [`manager`] — discovery, hot swap, sampling
//! - [`fake`] — in-process plugins for tests

pub mod capability;
pub mod config;
pub mod fake;
pub mod manager;
pub mod process;
pub mod store;

pub use capability::{Capability, Launcher, PluginPrice, PluginState, PriceResult};
pub use config::PluginConfig;
pub use manager::{ManagerConfig, PluginManager};
pub use process::ProcessLauncher;

/// Version of the plugin call protocol this manager speaks.
pub const PROTOCOL_VERSION: u32 = 1;

/// Error types for plugin operations.
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    /// Filesystem access to the plugin directory or config file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The plugin binary could not be started.
    #[error("failed to spawn plugin {name}: {source}")]
    Spawn {
        /// Plugin binary file name.
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// The plugin returned a JSON-RPC error object.
    #[error("plugin {name} answered {method} with an error: {error}")]
    Rpc {
        /// Plugin binary file name.
        name: String,
        /// RPC method that failed.
        method: String,
        /// Error object as sent by the plugin.
        error: oracle_types::rpc::RpcError,
    },

    /// A reply line could not be decoded or did not match the request.
    #[error("malformed reply from plugin {name}: {detail}")]
    Protocol {
        /// Plugin binary file name.
        name: String,
        /// What was wrong with the reply.
        detail: String,
    },

    /// The plugin's protocol version differs from the one we speak.
    #[error("plugin {name} speaks protocol {actual}, expected {expected}")]
    Handshake {
        /// Plugin binary file name.
        name: String,
        /// Protocol version required by the manager.
        expected: u32,
        /// Protocol version the plugin reported.
        actual: u32,
    },

    /// A call to the named plugin did not answer in time.
    #[error("plugin {0} timed out")]
    Timeout(String),

    /// The named plugin exited or closed its stdio pipes.
    #[error("plugin {0} closed its pipe")]
    Closed(String),

    /// The named plugin needs a service key and none is configured.
    #[error("plugin {0} requires a service key")]
    KeyRequired(String),

    /// A `[[plugins]]` entry or the config file is invalid.
    #[error("invalid plugin configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, PluginError>;
