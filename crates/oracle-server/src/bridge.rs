//! JSON-RPC client for the chain gateway over a Unix socket.
//!
//! The gateway owns the node connection, the signing key and the contract
//! bindings; the server only speaks newline-delimited JSON-RPC 2.0 to it.
//! Replies are matched to requests by id. Contract events arrive as
//! `oracle_event` notifications on the same connection and are forwarded
//! to the stream returned by [`OracleContract::subscribe`].
//!
//! When the connection drops, pending calls fail with
//! [`ChainError::Connectivity`], the event stream yields a
//! [`ChainError::Subscription`], and the next call reconnects.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use oracle_types::rpc::{RpcMessage, RpcRequest};
use oracle_types::{Address, ChainEvent, RoundData, B256, U256};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::chain::{
    ChainError, EventStream, OracleContract, PenaltyLog, Result, TxReceipt, TxStatus, VoteTx,
};

/// Notification method carrying contract events.
pub const EVENT_METHOD: &str = "oracle_event";

const EVENT_BUFFER: usize = 256;

type Reply = std::result::Result<Value, ChainError>;
type Pending = Arc<Mutex<HashMap<u64, (String, oneshot::Sender<Reply>)>>>;
type EventSink = Arc<Mutex<Option<mpsc::Sender<std::result::Result<ChainEvent, ChainError>>>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

struct Connection {
    writer: OwnedWriteHalf,
    alive: Arc<AtomicBool>,
}

/// [`OracleContract`] backed by the chain gateway.
pub struct BridgeContract {
    socket_path: PathBuf,
    call_timeout: Duration,
    next_id: AtomicU64,
    connection: tokio::sync::Mutex<Option<Connection>>,
    pending: Pending,
    events: EventSink,
}

impl BridgeContract {
    /// Connect to the gateway at `socket_path`.
    pub async fn connect(socket_path: &Path, call_timeout: Duration) -> Result<Self> {
        let bridge = Self {
            socket_path: socket_path.to_path_buf(),
            call_timeout,
            next_id: AtomicU64::new(1),
            connection: tokio::sync::Mutex::new(None),
            pending: Arc::new(Mutex::new(HashMap::new())),
            events: Arc::new(Mutex::new(None)),
        };
        let connection = bridge.open().await?;
        *bridge.connection.lock().await = Some(connection);
        info!(socket = %socket_path.display(), "connected to chain gateway");
        Ok(bridge)
    }

    async fn open(&self) -> Result<Connection> {
        let stream = UnixStream::connect(&self.socket_path)
            .await
            .map_err(|e| ChainError::Connectivity(format!("{}: {e}", self.socket_path.display())))?;
        let (reader, writer) = stream.into_split();
        let alive = Arc::new(AtomicBool::new(true));
        tokio::spawn(read_loop(
            reader,
            alive.clone(),
            self.pending.clone(),
            self.events.clone(),
        ));
        Ok(Connection { writer, alive })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(id, (method.to_string(), tx));

        if let Err(e) = self.send(id, method, params).await {
            lock(&self.pending).remove(&id);
            return Err(e);
        }

        let value = match tokio::time::timeout(self.call_timeout, rx).await {
            Ok(Ok(reply)) => reply?,
            Ok(Err(_)) => {
                return Err(ChainError::Connectivity(format!("{method}: reply dropped")));
            }
            Err(_) => {
                lock(&self.pending).remove(&id);
                return Err(ChainError::Timeout(method.to_string()));
            }
        };
        serde_json::from_value(value).map_err(|e| ChainError::Decode {
            method: method.to_string(),
            detail: e.to_string(),
        })
    }

    async fn send(&self, id: u64, method: &str, params: Value) -> Result<()> {
        let line = RpcRequest::new(id, method, params)
            .to_line()
            .map_err(|e| ChainError::Decode {
                method: method.to_string(),
                detail: e.to_string(),
            })?;

        let mut slot = self.connection.lock().await;
        let stale = slot
            .as_ref()
            .map_or(true, |c| !c.alive.load(Ordering::SeqCst));
        if stale {
            debug!(socket = %self.socket_path.display(), "reconnecting to chain gateway");
            *slot = Some(self.open().await?);
        }
        let Some(connection) = slot.as_mut() else {
            return Err(ChainError::Connectivity("no connection".to_string()));
        };

        let written = async {
            connection.writer.write_all(line.as_bytes()).await?;
            connection.writer.flush().await
        }
        .await;
        if let Err(e) = written {
            *slot = None;
            return Err(ChainError::Connectivity(e.to_string()));
        }
        Ok(())
    }
}

/// Route replies to their callers and events to the subscriber until the
/// connection ends.
async fn read_loop(reader: OwnedReadHalf, alive: Arc<AtomicBool>, pending: Pending, events: EventSink) {
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    let reason = loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break "gateway closed the connection".to_string(),
            Ok(_) => {}
            Err(e) => break e.to_string(),
        }

        match RpcMessage::parse(&line) {
            Ok(RpcMessage::Response(response)) => {
                let Some(id) = response.id else {
                    warn!("gateway reply without id");
                    continue;
                };
                let waiter = lock(&pending).remove(&id);
                if let Some((method, waiter)) = waiter {
                    let reply = response.into_result().map_err(|e| ChainError::Call {
                        method,
                        message: e.to_string(),
                    });
                    // The caller may have timed out.
                    let _ = waiter.send(reply);
                }
            }
            Ok(RpcMessage::Notification(note)) if note.method == EVENT_METHOD => {
                let event = match serde_json::from_value::<ChainEvent>(note.params) {
                    Ok(event) => event,
                    Err(e) => {
                        warn!(error = %e, "undecodable oracle event");
                        continue;
                    }
                };
                let sink = lock(&events).clone();
                match sink {
                    Some(sink) => {
                        if sink.send(Ok(event)).await.is_err() {
                            debug!("event subscriber dropped");
                        }
                    }
                    None => debug!(event = event.name(), "event without subscriber"),
                }
            }
            Ok(RpcMessage::Notification(note)) => {
                debug!(method = %note.method, "ignoring gateway notification");
            }
            Err(e) => warn!(error = %e, "malformed line from gateway"),
        }
    };

    alive.store(false, Ordering::SeqCst);
    warn!(reason = %reason, "chain gateway connection lost");

    let waiters: Vec<_> = lock(&pending).drain().collect();
    for (_, (_, waiter)) in waiters {
        let _ = waiter.send(Err(ChainError::Connectivity(reason.clone())));
    }
    let sink = lock(&events).take();
    if let Some(sink) = sink {
        let _ = sink.try_send(Err(ChainError::Subscription(reason)));
    }
}

#[async_trait]
impl OracleContract for BridgeContract {
    async fn get_round(&self) -> Result<u64> {
        self.call("get_round", Value::Null).await
    }

    async fn get_last_round_block(&self) -> Result<u64> {
        self.call("get_last_round_block", Value::Null).await
    }

    async fn get_symbols(&self) -> Result<Vec<String>> {
        self.call("get_symbols", Value::Null).await
    }

    async fn get_vote_period(&self) -> Result<u64> {
        self.call("get_vote_period", Value::Null).await
    }

    async fn get_voters(&self) -> Result<Vec<Address>> {
        self.call("get_voters", Value::Null).await
    }

    async fn get_round_data(&self, round: u64, symbol: &str) -> Result<RoundData> {
        self.call("get_round_data", json!({ "round": round, "symbol": symbol }))
            .await
    }

    async fn latest_round_data(&self, symbol: &str) -> Result<RoundData> {
        self.call("latest_round_data", json!({ "symbol": symbol }))
            .await
    }

    async fn vote(&self, tx: VoteTx) -> Result<TxReceipt> {
        let params = serde_json::to_value(&tx).map_err(|e| ChainError::Decode {
            method: "vote".to_string(),
            detail: e.to_string(),
        })?;
        self.call("vote", params).await
    }

    async fn block_number(&self) -> Result<u64> {
        self.call("block_number", Value::Null).await
    }

    async fn syncing(&self) -> Result<bool> {
        self.call("syncing", Value::Null).await
    }

    async fn balance(&self, account: Address) -> Result<U256> {
        self.call("balance", json!({ "account": account })).await
    }

    async fn base_fee(&self) -> Result<U256> {
        self.call("base_fee", Value::Null).await
    }

    async fn suggest_gas_tip_cap(&self) -> Result<U256> {
        self.call("suggest_gas_tip_cap", Value::Null).await
    }

    async fn penalized_logs(
        &self,
        from: u64,
        to: u64,
        participant: Address,
    ) -> Result<Vec<PenaltyLog>> {
        self.call(
            "penalized_logs",
            json!({ "from": from, "to": to, "participant": participant }),
        )
        .await
    }

    async fn transaction_receipt(&self, tx_hash: B256) -> Result<Option<TxStatus>> {
        self.call("transaction_receipt", json!({ "tx_hash": tx_hash }))
            .await
    }

    async fn subscribe(&self) -> Result<EventStream> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        *lock(&self.events) = Some(tx);
        let subscribed: Result<Value> = self.call("subscribe", Value::Null).await;
        if let Err(e) = subscribed {
            lock(&self.events).take();
            return Err(ChainError::Subscription(e.to_string()));
        }
        Ok(rx)
    }
}
