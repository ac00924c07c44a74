//! oracle-server: the validator oracle client daemon.
//!
//! Talks to the chain through a gateway on a Unix socket and to data
//! sources through plugin processes.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use oracle_plugins::{PluginManager, ProcessLauncher};
use oracle_server::{BridgeContract, Server, ServerConfig};
use tokio::sync::broadcast;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "oracle-server", version, about = "Validator price oracle client")]
struct Args {
    /// Config file. Defaults to `<profile dir>/oracle.toml`.
    #[arg(long, env = "ORACLE_CONFIG")]
    config: Option<PathBuf>,

    /// Directory for persisted vote state.
    #[arg(long)]
    profile_dir: Option<PathBuf>,

    #[arg(long)]
    plugin_dir: Option<PathBuf>,

    /// Chain gateway socket.
    #[arg(long)]
    bridge_socket: Option<PathBuf>,

    #[arg(long)]
    log_level: Option<String>,
}

impl Args {
    fn apply(&self, config: &mut ServerConfig) {
        if let Some(dir) = &self.profile_dir {
            config.profile_dir = dir.display().to_string();
        }
        if let Some(dir) = &self.plugin_dir {
            config.plugin_dir = dir.display().to_string();
        }
        if let Some(socket) = &self.bridge_socket {
            config.bridge_socket = socket.display().to_string();
        }
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(ServerConfig::default_config_path);
    let mut config = ServerConfig::load(Some(&config_path))?;
    args.apply(&mut config);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .or_else(|_| tracing_subscriber::EnvFilter::try_new(&config.log_level))?,
        )
        .init();

    config.validate()?;
    info!(address = %config.oracle_address, "oracle server starting");

    let profile_dir = config.profile_dir();
    std::fs::create_dir_all(&profile_dir)?;

    let call_timeout = Duration::from_secs(config.timing.plugin_timeout_secs);
    let socket = config.bridge_socket();
    info!("Connecting to chain gateway on {:?}", socket);
    let contract = Arc::new(BridgeContract::connect(&socket, call_timeout).await?);

    let config_file = config_path.exists().then(|| config_path.clone());
    let plugins = Arc::new(PluginManager::new(
        config.manager_config(config_file),
        Arc::new(ProcessLauncher::new(call_timeout)),
    ));
    plugins.set_configs(
        config
            .plugins
            .iter()
            .map(|p| (p.name.clone(), p.clone()))
            .collect(),
    );

    let mut server = Server::new(config, contract, plugins)?;
    server.start().await?;

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Ctrl-C received, shutting down"),
            Err(e) => warn!(error = %e, "cannot listen for Ctrl-C, shutting down"),
        }
        let _ = shutdown_tx.send(());
    });

    server.run(shutdown_rx).await;
    info!("Oracle server stopped");
    Ok(())
}
