//! Subprocess plugin transport.
//!
//! The plugin binary is spawned with its configuration JSON in an
//! environment variable named after the binary and a handshake cookie in
//! [`PLUGIN_COOKIE_ENV`]. Requests and replies are newline-delimited
//! JSON-RPC 2.0 on the child's stdin/stdout; stderr is inherited so plugin
//! logs end up next to the server's.

use std::path::Path;
use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use oracle_types::rpc::{RpcMessage, RpcRequest};
use serde::de::DeserializeOwned;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, warn};

use crate::capability::{Capability, Launcher, PluginState, PriceResult};
use crate::config::PluginConfig;
use crate::{PluginError, Result};

/// Environment variable carrying the handshake cookie.
pub const PLUGIN_COOKIE_ENV: &str = "ORACLE_PLUGIN_COOKIE";

/// Cookie value a plugin must see before it starts serving.
pub const PLUGIN_COOKIE: &str = "b1e7f2a0-oracle-price-plugin";

/// Spawns plugin binaries as child processes.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    call_timeout: Duration,
}

impl ProcessLauncher {
    pub fn new(call_timeout: Duration) -> Self {
        Self { call_timeout }
    }
}

#[async_trait]
impl Launcher for ProcessLauncher {
    async fn launch(
        &self,
        name: &str,
        path: &Path,
        config: &PluginConfig,
    ) -> Result<Box<dyn Capability>> {
        let mut child = Command::new(path)
            .env(name, config.to_json()?)
            .env(PLUGIN_COOKIE_ENV, PLUGIN_COOKIE)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| PluginError::Spawn {
                name: name.to_string(),
                source,
            })?;

        let stdin = child.stdin.take().ok_or_else(|| PluginError::Protocol {
            name: name.to_string(),
            detail: "stdin not captured".to_string(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| PluginError::Protocol {
            name: name.to_string(),
            detail: "stdout not captured".to_string(),
        })?;

        debug!(plugin = name, pid = ?child.id(), "plugin process spawned");
        Ok(Box::new(ProcessPlugin {
            name: name.to_string(),
            call_timeout: self.call_timeout,
            pipe: tokio::sync::Mutex::new(Pipe {
                stdin,
                stdout: BufReader::new(stdout),
                next_id: 0,
            }),
            child: Mutex::new(child),
        }))
    }
}

struct Pipe {
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    next_id: u64,
}

/// A running plugin child process.
struct ProcessPlugin {
    name: String,
    call_timeout: Duration,
    pipe: tokio::sync::Mutex<Pipe>,
    child: Mutex<Child>,
}

impl ProcessPlugin {
    async fn call<T: DeserializeOwned>(&self, method: &str, params: serde_json::Value) -> Result<T> {
        let value = tokio::time::timeout(self.call_timeout, self.round_trip(method, params))
            .await
            .map_err(|_| PluginError::Timeout(self.name.clone()))??;
        serde_json::from_value(value).map_err(|e| self.protocol(format!("{method}: {e}")))
    }

    async fn round_trip(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value> {
        let mut pipe = self.pipe.lock().await;
        pipe.next_id += 1;
        let id = pipe.next_id;

        let line = RpcRequest::new(id, method, params)
            .to_line()
            .map_err(|e| self.protocol(e.to_string()))?;
        pipe.stdin.write_all(line.as_bytes()).await?;
        pipe.stdin.flush().await?;

        let mut reply = String::new();
        loop {
            reply.clear();
            if pipe.stdout.read_line(&mut reply).await? == 0 {
                return Err(PluginError::Closed(self.name.clone()));
            }
            let response = match RpcMessage::parse(&reply) {
                Ok(RpcMessage::Response(response)) => response,
                Ok(RpcMessage::Notification(note)) => {
                    debug!(plugin = %self.name, method = %note.method, "ignoring plugin notification");
                    continue;
                }
                Err(e) => return Err(self.protocol(e.to_string())),
            };
            // Replies to requests that timed out earlier are stale.
            if response.id != Some(id) {
                continue;
            }
            return response.into_result().map_err(|error| PluginError::Rpc {
                name: self.name.clone(),
                method: method.to_string(),
                error,
            });
        }
    }

    fn protocol(&self, detail: String) -> PluginError {
        PluginError::Protocol {
            name: self.name.clone(),
            detail,
        }
    }
}

#[async_trait]
impl Capability for ProcessPlugin {
    async fn fetch_prices(&self, symbols: &[String]) -> Result<PriceResult> {
        self.call("fetch_prices", serde_json::json!({ "symbols": symbols }))
            .await
    }

    async fn state(&self) -> Result<PluginState> {
        self.call("state", serde_json::Value::Null).await
    }

    async fn close(&self) -> Result<()> {
        let result: Result<serde_json::Value> = self.call("close", serde_json::Value::Null).await;
        if let Err(e) = result {
            debug!(plugin = %self.name, error = %e, "close call failed, killing");
        }
        let mut child = self.child.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = child.start_kill() {
            // Already exited.
            debug!(plugin = %self.name, error = %e, "kill");
        }
        Ok(())
    }

    fn is_alive(&self) -> bool {
        let mut child = self.child.lock().unwrap_or_else(|e| e.into_inner());
        match child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                warn!(plugin = %self.name, %status, "plugin process exited");
                false
            }
            Err(e) => {
                warn!(plugin = %self.name, error = %e, "cannot query plugin process");
                false
            }
        }
    }
}
