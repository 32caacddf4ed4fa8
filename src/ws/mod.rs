//! GraphQL over WebSocket (`graphql-ws` subprotocol).
//!
//! One [`WsTransport`] keeps a single socket open and multiplexes every
//! operation over it. Nothing is dialed until [`WsTransport::run`] (or
//! [`WsTransport::start`]) is called; requests issued before that are queued
//! and started once the server acknowledges the connection.
//!
//! ## Lifecycle
//!
//! ```text
//! Idle -> Connecting -> Acked -> Running -> (Resetting -> Connecting ...) -> Closed
//! ```
//!
//! - Dial failures are retried every `retry_delay` until `retry_timeout`
//!   elapses, after which the run fails with [`Error::RetryTimeout`].
//! - Any read failure other than a normal closure resets the connection:
//!   operations are kept, redialed, and started again with their original ids.
//! - [`WsTransport::close`] stops every operation and ends the run cleanly.
//!
//! ```rust,no_run
//! use gql_transport::ws::WsTransport;
//! use gql_transport::response::Response;
//! use gql_transport::transport::Transport;
//! use gql_transport::types::Request;
//!
//! # async fn demo() -> gql_transport::Result<()> {
//! let ws = WsTransport::new(gql_transport::ws::WsConfig::new("ws://localhost:8080/query"))?;
//! let run = ws.start();
//!
//! let res = ws.request(Request::subscription("subscription { messages }")).await?;
//! while res.next().await {
//!     println!("{:?}", res.current().data);
//! }
//!
//! ws.close().await?;
//! run.wait().await?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use url::Url;

use crate::response::{ChanResponse, Response, ResponseRef};
use crate::transport::Transport;
use crate::types::Request;
use crate::{Error, ErrorContext, Result};

pub mod config;
pub mod conn;
pub mod message;

pub use config::{WsConfig, GRAPHQL_WS};
pub use conn::{ReadError, TungsteniteProvider, WebsocketConn, WebsocketConnProvider};
pub use message::{MessageType, OperationMessage};

/// What the run loop does after the read loop returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Stop,
    Reset,
}

struct WsOperation {
    id: String,
    request: Request,
    response: Arc<ChanResponse>,
    started: AtomicBool,
}

#[derive(Default)]
struct WsState {
    operations: HashMap<String, Arc<WsOperation>>,
    running: bool,
    acked: bool,
    /// Set by `close()`, cleared by the next `run()`.
    closed: bool,
}

struct WsInner {
    config: WsConfig,
    url: Url,
    provider: Arc<dyn WebsocketConnProvider>,
    state: Mutex<WsState>,
    conn: RwLock<Option<Arc<dyn WebsocketConn>>>,
    lifetime: Mutex<CancellationToken>,
    counter: AtomicU64,
}

/// WebSocket transport handle. Clones share the same connection.
#[derive(Clone)]
pub struct WsTransport {
    inner: Arc<WsInner>,
}

impl WsTransport {
    pub fn new(config: WsConfig) -> Result<Self> {
        let provider = Arc::new(TungsteniteProvider::from_config(&config));
        Self::with_provider(config, provider)
    }

    pub fn builder(url: impl Into<String>) -> WsTransportBuilder {
        WsTransportBuilder {
            config: WsConfig::new(url),
            provider: None,
        }
    }

    /// Transport dialing through a custom socket provider.
    pub fn with_provider(config: WsConfig, provider: Arc<dyn WebsocketConnProvider>) -> Result<Self> {
        let url = config.endpoint()?;
        Ok(Self {
            inner: Arc::new(WsInner {
                config,
                url,
                provider,
                state: Mutex::new(WsState::default()),
                conn: RwLock::new(None),
                lifetime: Mutex::new(CancellationToken::new()),
                counter: AtomicU64::new(0),
            }),
        })
    }

    /// Connect and process frames until the transport is closed, the server
    /// closes normally, or redialing exceeds the retry timeout.
    ///
    /// May be called again after it returns.
    pub async fn run(&self) -> Result<()> {
        let lifetime = self.inner.begin();
        self.inner.run(lifetime).await
    }

    /// Spawn [`run`](Self::run) on the runtime.
    ///
    /// The run is registered before this returns, so a `close()` issued right
    /// after still ends it.
    pub fn start(&self) -> RunHandle {
        let inner = self.inner.clone();
        let lifetime = inner.begin();
        RunHandle {
            handle: tokio::spawn(async move { inner.run(lifetime).await }),
        }
    }

    /// Stop every operation, terminate the connection and end the run.
    pub async fn close(&self) -> Result<()> {
        self.inner.close().await
    }

    /// Stop one operation: send `stop`, close its stream and forget it.
    pub async fn unsubscribe(&self, id: &str) -> Result<()> {
        self.inner.unsubscribe(id).await
    }

    /// Ids of the operations currently tracked, in allocation order.
    pub fn operation_ids(&self) -> Vec<String> {
        let state = self.inner.state.lock();
        let mut ids: Vec<String> = state.operations.keys().cloned().collect();
        sort_ids(&mut ids);
        ids
    }

    pub fn is_running(&self) -> bool {
        self.inner.state.lock().running
    }

    pub fn config(&self) -> &WsConfig {
        &self.inner.config
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn request(&self, req: Request) -> Result<ResponseRef> {
        self.inner.request(req).await
    }
}

/// Builder for [`WsTransport`].
pub struct WsTransportBuilder {
    config: WsConfig,
    provider: Option<Arc<dyn WebsocketConnProvider>>,
}

impl WsTransportBuilder {
    /// Adjust the configuration in place.
    pub fn configure(mut self, f: impl FnOnce(WsConfig) -> WsConfig) -> Self {
        self.config = f(self.config);
        self
    }

    pub fn connection_params(mut self, params: serde_json::Value) -> Self {
        self.config.connection_params = Some(params);
        self
    }

    pub fn provider(mut self, provider: Arc<dyn WebsocketConnProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn build(self) -> Result<WsTransport> {
        match self.provider {
            Some(provider) => WsTransport::with_provider(self.config, provider),
            None => WsTransport::new(self.config),
        }
    }
}

/// Handle of a spawned run loop.
pub struct RunHandle {
    handle: JoinHandle<Result<()>>,
}

impl RunHandle {
    /// Resolve with the run's result: `Ok` after a clean stop.
    pub async fn wait(self) -> Result<()> {
        self.handle.await.map_err(|e| {
            Error::runtime_with_context(
                format!("websocket run task failed: {}", e),
                ErrorContext::new().with_source("ws_transport"),
            )
        })?
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn abort(&self) {
        self.handle.abort();
    }
}

fn sort_ids(ids: &mut [String]) {
    ids.sort_by_key(|id| (id.parse::<u64>().unwrap_or(u64::MAX), id.clone()));
}

impl WsInner {
    fn log_frame(&self, direction: &'static str, msg: &OperationMessage) {
        let op_id = msg.id.as_deref().unwrap_or("");
        let msg_type = msg.kind.as_str();
        if self.config.protocol_log {
            debug!(direction, op_id, msg_type, payload = ?msg.payload, "ws frame");
        } else {
            trace!(direction, op_id, msg_type, payload = ?msg.payload, "ws frame");
        }
    }

    fn log_state(&self, state: &'static str) {
        if self.config.protocol_log {
            debug!(url = %self.url, state, "ws state");
        } else {
            trace!(url = %self.url, state, "ws state");
        }
    }

    fn current_conn(&self) -> Option<Arc<dyn WebsocketConn>> {
        self.conn.read().clone()
    }

    fn take_conn(&self) -> Option<Arc<dyn WebsocketConn>> {
        self.conn.write().take()
    }

    /// Leave the running state, keeping operations to be started by the next run.
    fn park_operations(&self) {
        let mut state = self.state.lock();
        state.running = false;
        state.acked = false;
        for op in state.operations.values() {
            op.started.store(false, Ordering::Release);
        }
    }

    async fn write(&self, conn: &Arc<dyn WebsocketConn>, msg: &OperationMessage) -> Result<()> {
        self.log_frame("send", msg);
        conn.write_message(msg).await
    }

    /// Open a run session: clear a previous `close()` and install a fresh
    /// lifetime. Runs synchronously so a racing `close()` cannot be lost.
    fn begin(&self) -> CancellationToken {
        let mut state = self.state.lock();
        state.closed = false;
        let lifetime = CancellationToken::new();
        *self.lifetime.lock() = lifetime.clone();
        lifetime
    }

    /// Fresh lifetime for the next connection of this session. `None` once closed.
    fn renew(&self) -> Option<CancellationToken> {
        let state = self.state.lock();
        if state.closed {
            return None;
        }
        let lifetime = CancellationToken::new();
        *self.lifetime.lock() = lifetime.clone();
        Some(lifetime)
    }

    async fn run(self: &Arc<Self>, mut lifetime: CancellationToken) -> Result<()> {
        loop {
            self.log_state("connecting");
            match self.init(&lifetime).await {
                Ok(true) => {}
                Ok(false) => {
                    self.log_state("closed while connecting");
                    return Ok(());
                }
                Err(e) => {
                    self.fail_operations(&e);
                    return Err(e);
                }
            }

            {
                let mut state = self.state.lock();
                if state.closed || lifetime.is_cancelled() {
                    return Ok(());
                }
                state.running = true;
            }
            self.log_state("running");

            match self.read_loop(&lifetime).await {
                Flow::Stop => {
                    self.log_state("stopped");
                    return Ok(());
                }
                Flow::Reset => {
                    if !self.reset().await {
                        return Ok(());
                    }
                    match self.renew() {
                        Some(next) => lifetime = next,
                        None => return Ok(()),
                    }
                }
            }
        }
    }

    /// The run failed for good: leave the running state and end every tracked
    /// stream with `err` so consumers stop waiting.
    fn fail_operations(&self, err: &Error) {
        let ops: Vec<Arc<WsOperation>> = {
            let mut state = self.state.lock();
            state.running = false;
            state.acked = false;
            state.operations.drain().map(|(_, op)| op).collect()
        };
        for op in ops {
            op.response.close_with_error(err.clone());
        }
    }

    /// Dial and send `connection_init`, retrying until the retry timeout.
    /// `false` when the transport was closed meanwhile.
    async fn init(&self, lifetime: &CancellationToken) -> Result<bool> {
        let started = Instant::now();
        let mut attempt: u32 = 0;
        loop {
            if lifetime.is_cancelled() {
                return Ok(false);
            }
            attempt += 1;
            let err = match self.connect(lifetime).await {
                Ok(()) => return Ok(true),
                Err(e) => e,
            };

            if lifetime.is_cancelled() {
                return Ok(false);
            }

            let elapsed = started.elapsed();
            if elapsed >= self.config.retry_timeout {
                error!(url = %self.url, attempt, error = %err, "websocket retry timeout exceeded");
                return Err(Error::RetryTimeout {
                    elapsed_ms: elapsed.as_millis() as u64,
                    last_error: err.to_string(),
                });
            }

            warn!(
                url = %self.url,
                attempt,
                error = %err,
                retry_in_ms = self.config.retry_delay.as_millis() as u64,
                "websocket connect failed, retrying"
            );
            tokio::select! {
                _ = lifetime.cancelled() => return Ok(false),
                _ = tokio::time::sleep(self.config.retry_delay) => {}
            }
        }
    }

    async fn connect(&self, lifetime: &CancellationToken) -> Result<()> {
        let conn = match self.current_conn() {
            Some(conn) => conn,
            None => {
                let conn = self.provider.dial(&self.url, lifetime.clone()).await?;
                // Checked under the state lock, which `close()` holds while
                // cancelling: either close sees this socket or we see the cancel.
                let installed = {
                    let _state = self.state.lock();
                    if lifetime.is_cancelled() {
                        false
                    } else {
                        *self.conn.write() = Some(conn.clone());
                        true
                    }
                };
                if !installed {
                    let _ = conn.close().await;
                    return Err(Error::Cancelled);
                }
                conn
            }
        };

        let init = OperationMessage::connection_init(self.config.connection_params.clone());
        if let Err(e) = self.write(&conn, &init).await {
            if let Some(conn) = self.take_conn() {
                let _ = conn.close().await;
            }
            return Err(e);
        }
        Ok(())
    }

    async fn read_loop(&self, lifetime: &CancellationToken) -> Flow {
        loop {
            if !self.state.lock().running {
                return Flow::Stop;
            }
            let Some(conn) = self.current_conn() else {
                return Flow::Reset;
            };

            let read = tokio::select! {
                _ = lifetime.cancelled() => return Flow::Stop,
                read = conn.read_message() => read,
            };

            match read {
                Ok(msg) => {
                    self.log_frame("recv", &msg);
                    if let Some(flow) = self.handle_message(msg).await {
                        return flow;
                    }
                }
                Err(ReadError::Timeout) => continue,
                Err(ReadError::NormalClosure) => {
                    info!(url = %self.url, "websocket closed by server");
                    self.take_conn();
                    self.park_operations();
                    return Flow::Stop;
                }
                Err(ReadError::Disconnected(reason)) => {
                    warn!(url = %self.url, reason = %reason, "websocket connection lost");
                    return Flow::Reset;
                }
                Err(ReadError::Malformed(reason)) => {
                    warn!(url = %self.url, reason = %reason, "skipping malformed websocket frame");
                }
            }
        }
    }

    async fn handle_message(&self, msg: OperationMessage) -> Option<Flow> {
        match msg.kind {
            MessageType::ConnectionAck => {
                let mut pending: Vec<Arc<WsOperation>> = {
                    let mut state = self.state.lock();
                    state.acked = true;
                    state.operations.values().cloned().collect()
                };
                pending.sort_by_key(|op| (op.id.parse::<u64>().unwrap_or(u64::MAX), op.id.clone()));

                for op in pending {
                    if let Err(e) = self.start_operation(&op).await {
                        warn!(op_id = %op.id, error = %e, "start after ack failed");
                        return Some(Flow::Reset);
                    }
                }
            }
            MessageType::Data | MessageType::Error => {
                let op = msg
                    .id
                    .as_deref()
                    .and_then(|id| self.state.lock().operations.get(id).cloned());
                match op {
                    Some(op) => {
                        op.response.send(msg.envelope()).await;
                    }
                    None => debug!(op_id = ?msg.id, "frame for unknown operation"),
                }
            }
            MessageType::Complete => {
                if let Some(id) = msg.id.as_deref() {
                    if let Err(e) = self.unsubscribe(id).await {
                        debug!(op_id = id, error = %e, "complete for untracked operation");
                    }
                }
            }
            MessageType::ConnectionError => {
                warn!(url = %self.url, payload = ?msg.payload, "server reported a connection error");
            }
            MessageType::KeepAlive => {}
            other => {
                debug!(msg_type = other.as_str(), "unhandled websocket frame");
            }
        }
        None
    }

    /// Send `start` unless the operation already has been. No socket means it
    /// stays pending until the next ack.
    async fn start_operation(&self, op: &WsOperation) -> Result<()> {
        if op
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(());
        }

        let Some(conn) = self.current_conn() else {
            op.started.store(false, Ordering::Release);
            return Ok(());
        };

        let result = match OperationMessage::start(&op.id, &op.request) {
            Ok(msg) => self.write(&conn, &msg).await,
            Err(e) => Err(e),
        };
        if result.is_err() {
            op.started.store(false, Ordering::Release);
        }
        result
    }

    /// Best-effort `stop`. Without a socket there is nothing to stop.
    async fn stop_operation(&self, id: &str) -> Result<()> {
        match self.current_conn() {
            Some(conn) => self.write(&conn, &OperationMessage::stop(id)).await,
            None => Ok(()),
        }
    }

    async fn terminate(&self, conn: &Arc<dyn WebsocketConn>) -> Result<()> {
        self.write(conn, &OperationMessage::terminate()).await
    }

    async fn unsubscribe(&self, id: &str) -> Result<()> {
        let op = self
            .state
            .lock()
            .operations
            .remove(id)
            .ok_or_else(|| Error::OperationNotFound(id.to_string()))?;
        trace!(op_id = id, "unsubscribe");

        let result = self.stop_operation(id).await;
        op.response.close_channel();
        result
    }

    /// Tear the connection down, keeping operations for the next ack.
    /// Returns `false` when the transport was closed and the run should end.
    async fn reset(&self) -> bool {
        let ops: Vec<Arc<WsOperation>> = {
            let mut state = self.state.lock();
            if !state.running {
                return false;
            }
            state.acked = false;
            state.operations.values().cloned().collect()
        };
        info!(url = %self.url, operations = ops.len(), "resetting websocket connection");

        for op in &ops {
            let _ = self.stop_operation(&op.id).await;
            op.started.store(false, Ordering::Release);
        }

        if let Some(conn) = self.take_conn() {
            let _ = self.terminate(&conn).await;
            let _ = conn.close().await;
        }
        self.lifetime.lock().cancel();
        self.counter.store(0, Ordering::Release);
        true
    }

    async fn close(&self) -> Result<()> {
        self.log_state("closing");
        {
            let mut state = self.state.lock();
            state.closed = true;
            state.running = false;
            state.acked = false;
            self.lifetime.lock().cancel();
        }

        let ids: Vec<String> = self.state.lock().operations.keys().cloned().collect();
        let mut first_err = None;
        for id in ids {
            match self.unsubscribe(&id).await {
                Ok(()) | Err(Error::OperationNotFound(_)) => {}
                Err(e) => {
                    first_err.get_or_insert(e);
                }
            }
        }

        let mut result = Ok(());
        if let Some(conn) = self.take_conn() {
            let _ = self.terminate(&conn).await;
            result = conn.close().await;
        }

        match first_err {
            Some(e) => Err(e),
            None => result,
        }
    }

    async fn request(self: &Arc<Self>, req: Request) -> Result<ResponseRef> {
        let weak: Weak<WsInner> = Arc::downgrade(self);
        let context = req.context.clone();

        let (op, acked) = {
            let mut state = self.state.lock();
            let id = loop {
                let n = self.counter.fetch_add(1, Ordering::AcqRel) + 1;
                let id = n.to_string();
                if !state.operations.contains_key(&id) {
                    break id;
                }
            };

            let teardown = {
                let weak = weak.clone();
                let id = id.clone();
                move || async move {
                    let Some(inner) = weak.upgrade() else {
                        return Ok(());
                    };
                    match inner.unsubscribe(&id).await {
                        Err(Error::OperationNotFound(_)) => Ok(()),
                        other => other,
                    }
                }
            };

            let op = Arc::new(WsOperation {
                id: id.clone(),
                request: req,
                response: Arc::new(ChanResponse::with_teardown(teardown)),
                started: AtomicBool::new(false),
            });
            state.operations.insert(id, op.clone());
            (op, state.running && state.acked)
        };
        trace!(op_id = %op.id, operation = %op.request.operation, acked, "ws request");

        if acked {
            if let Err(e) = self.start_operation(&op).await {
                self.state.lock().operations.remove(&op.id);
                op.response.close_channel();
                return Err(e);
            }
        }

        let id = op.id.clone();
        let done = op.response.done();
        tokio::spawn(async move {
            tokio::select! {
                _ = context.cancelled() => {
                    if let Some(inner) = weak.upgrade() {
                        trace!(op_id = %id, "request context cancelled");
                        let _ = inner.unsubscribe(&id).await;
                    }
                }
                _ = done.wait() => {}
            }
        });

        Ok(op.response.clone())
    }
}
