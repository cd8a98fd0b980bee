//! The gateway connection state machine.
//!
//! One background task owns the WebSocket and drives:
//!
//! ```text
//! Disconnected ──▶ Connecting ──▶ Connected ──▶ (error) ──▶ Disconnected
//!                      ▲                              │
//!                      └────────── backoff ◀──────────┘
//! ```
//!
//! plus `Draining` on intentional shutdown: no new sends are accepted,
//! in-flight correlated calls may complete within a grace period, then the
//! socket is closed for good.
//!
//! Inbound chat events are handed to the dispatcher in arrival order over a
//! bounded channel. Outbound frames queue in a small outbox while the
//! connection is down and are flushed on reconnect; frames in flight when
//! the socket drops are lost, never duplicated.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use crate::backoff::ExponentialBackoff;
use crate::codec::{self, ApiResponse, Inbound, OutboundAction};
use crate::correlate::PendingTable;
use crate::envelope::ChatEnvelope;
use crate::error::GatewayError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection; a reconnect is pending.
    Disconnected,
    /// Handshake in progress.
    Connecting,
    /// Live session.
    Connected,
    /// Shutting down; no new sends, in-flight calls finishing.
    Draining,
}

/// Client tuning, normally derived from the bridge configuration.
#[derive(Debug, Clone)]
pub struct GatewayClientConfig {
    /// WebSocket URL of the gateway.
    pub ws_url: String,
    /// Bearer token for the handshake; empty sends no Authorization header.
    pub token: String,
    /// Minimum reconnect delay.
    pub backoff_min: Duration,
    /// Maximum reconnect delay.
    pub backoff_max: Duration,
    /// Deadline for correlated API calls.
    pub call_timeout: Duration,
    /// Grace period for in-flight calls while draining.
    pub drain_grace: Duration,
    /// Capacity of the inbound event channel to the dispatcher.
    pub inbound_buffer: usize,
}

impl Default for GatewayClientConfig {
    fn default() -> Self {
        Self {
            ws_url: "ws://127.0.0.1:3011/".to_string(),
            token: String::new(),
            backoff_min: Duration::from_secs(1),
            backoff_max: Duration::from_secs(60),
            call_timeout: Duration::from_secs(10),
            drain_grace: Duration::from_secs(5),
            inbound_buffer: 256,
        }
    }
}

/// Frames queued while the connection is down; beyond this the oldest are
/// dropped (the gateway would have missed them anyway).
const MAX_OUTBOX: usize = 1024;

enum Command {
    Send(String),
    Drain,
}

/// Cloneable handle used by the dispatcher to talk to the gateway.
#[derive(Clone)]
pub struct GatewayHandle {
    cmd_tx: mpsc::Sender<Command>,
    state_rx: watch::Receiver<ConnectionState>,
    pending: Arc<PendingTable>,
    reconnects: Arc<AtomicU64>,
    call_timeout: Duration,
}

impl std::fmt::Debug for GatewayHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayHandle")
            .field("state", &self.state())
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

impl GatewayHandle {
    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// A watch receiver for observing state transitions.
    #[must_use]
    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Reconnect attempts made since startup.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }

    /// Number of correlated calls currently in flight.
    #[must_use]
    pub fn pending_calls(&self) -> usize {
        self.pending.len()
    }

    /// Queue an envelope for delivery, fire-and-forget.
    ///
    /// # Errors
    /// Returns [`GatewayError::Draining`] once shutdown has begun.
    pub async fn send(&self, envelope: &ChatEnvelope) -> Result<(), GatewayError> {
        if self.state() == ConnectionState::Draining {
            return Err(GatewayError::Draining);
        }
        let frame = OutboundAction::from_envelope(envelope).encode()?;
        self.cmd_tx
            .send(Command::Send(frame))
            .await
            .map_err(|_| GatewayError::Draining)
    }

    /// Perform a correlated API call and wait for the gateway's response.
    ///
    /// # Errors
    /// Returns [`GatewayError::CorrelationTimeout`] if no response arrives
    /// within the configured deadline (the pending entry is removed), or
    /// [`GatewayError::Draining`] once shutdown has begun.
    pub async fn call(&self, action: &str, params: Value) -> Result<ApiResponse, GatewayError> {
        if self.state() == ConnectionState::Draining {
            return Err(GatewayError::Draining);
        }

        let (id, rx) = self.pending.register();
        let frame = OutboundAction {
            action: action.to_string(),
            params,
            echo: Some(id.clone()),
        }
        .encode()?;

        if self.cmd_tx.send(Command::Send(frame)).await.is_err() {
            self.pending.abandon(&id);
            return Err(GatewayError::Draining);
        }

        match tokio::time::timeout(self.call_timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => {
                self.pending.abandon(&id);
                Err(GatewayError::Connection("client task ended".to_string()))
            }
            Err(_) => {
                self.pending.abandon(&id);
                Err(GatewayError::CorrelationTimeout {
                    id,
                    timeout_ms: self.call_timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Send an envelope as a correlated call, waiting for the gateway ack.
    ///
    /// # Errors
    /// Same as [`GatewayHandle::call`].
    pub async fn send_acked(&self, envelope: &ChatEnvelope) -> Result<ApiResponse, GatewayError> {
        let action = OutboundAction::from_envelope(envelope);
        self.call(&action.action, action.params).await
    }

    /// Begin draining: reject new sends, let in-flight calls finish up to
    /// the grace period, then close the connection.
    pub async fn drain(&self) {
        let _ = self.cmd_tx.send(Command::Drain).await;
    }
}

/// Spawn the gateway client task.
///
/// Returns the handle, the inbound event stream for the dispatcher, and
/// the task's join handle (it completes after a drain).
#[must_use]
pub fn spawn(
    config: GatewayClientConfig,
) -> (
    GatewayHandle,
    mpsc::Receiver<ChatEnvelope>,
    tokio::task::JoinHandle<()>,
) {
    let (cmd_tx, cmd_rx) = mpsc::channel(64);
    let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_buffer.max(1));
    let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
    let pending = Arc::new(PendingTable::new());
    let reconnects = Arc::new(AtomicU64::new(0));

    let handle = GatewayHandle {
        cmd_tx,
        state_rx,
        pending: Arc::clone(&pending),
        reconnects: Arc::clone(&reconnects),
        call_timeout: config.call_timeout,
    };

    let task = ClientTask {
        config,
        cmd_rx,
        inbound_tx,
        state_tx,
        pending,
        reconnects,
    };
    let join = tokio::spawn(task.run());

    (handle, inbound_rx, join)
}

struct ClientTask {
    config: GatewayClientConfig,
    cmd_rx: mpsc::Receiver<Command>,
    inbound_tx: mpsc::Sender<ChatEnvelope>,
    state_tx: watch::Sender<ConnectionState>,
    pending: Arc<PendingTable>,
    reconnects: Arc<AtomicU64>,
}

enum ServeExit {
    /// The socket dropped; reconnect.
    Dropped,
    /// Drain completed (or the dispatcher went away); stop for good.
    Finished,
}

impl ClientTask {
    fn set_state(&self, state: ConnectionState) {
        if *self.state_tx.borrow() != state {
            debug!(?state, "Gateway connection state change");
            self.state_tx.send_replace(state);
        }
    }

    async fn run(mut self) {
        let mut backoff =
            ExponentialBackoff::new(self.config.backoff_min, self.config.backoff_max);
        let mut outbox: VecDeque<String> = VecDeque::new();

        loop {
            self.set_state(ConnectionState::Connecting);
            self.reconnects.fetch_add(1, Ordering::Relaxed);

            match self.connect().await {
                Ok(ws) => {
                    info!(url = %self.config.ws_url, "Connected to chat gateway");
                    backoff.reset();
                    self.set_state(ConnectionState::Connected);
                    match self.serve(ws, &mut outbox).await {
                        ServeExit::Finished => break,
                        ServeExit::Dropped => {
                            warn!("Gateway connection lost");
                            self.set_state(ConnectionState::Disconnected);
                        }
                    }
                }
                Err(e) => {
                    warn!(url = %self.config.ws_url, error = %e, "Gateway connect failed");
                    self.set_state(ConnectionState::Disconnected);
                }
            }

            let delay = backoff.next_delay();
            debug!(?delay, attempt = backoff.attempt(), "Backing off before reconnect");
            if !self.wait_backoff(delay, &mut outbox).await {
                break;
            }
        }

        self.set_state(ConnectionState::Disconnected);
    }

    async fn connect(&self) -> Result<WsStream, GatewayError> {
        let mut request = self
            .config
            .ws_url
            .as_str()
            .into_client_request()
            .map_err(|e| GatewayError::Connection(e.to_string()))?;
        if !self.config.token.is_empty() {
            let value = HeaderValue::from_str(&format!("Bearer {}", self.config.token))
                .map_err(|e| GatewayError::Connection(e.to_string()))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (ws, _response) = connect_async(request)
            .await
            .map_err(|e| GatewayError::Connection(e.to_string()))?;
        Ok(ws)
    }

    /// Sleep out the backoff while still accepting commands. Returns
    /// `false` when a drain arrived (nothing is in flight while
    /// disconnected, so draining here completes immediately).
    async fn wait_backoff(&mut self, delay: Duration, outbox: &mut VecDeque<String>) -> bool {
        let deadline = Instant::now() + delay;
        loop {
            tokio::select! {
                () = tokio::time::sleep_until(deadline) => return true,
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(Command::Send(frame)) => push_outbox(outbox, frame),
                    Some(Command::Drain) | None => {
                        self.set_state(ConnectionState::Draining);
                        return false;
                    }
                },
            }
        }
    }

    async fn serve(&mut self, ws: WsStream, outbox: &mut VecDeque<String>) -> ServeExit {
        let (mut sink, mut stream) = ws.split();

        // Flush frames queued while we were down.
        while let Some(frame) = outbox.pop_front() {
            if let Err(e) = sink.send(Message::Text(frame)).await {
                warn!(error = %e, "Failed flushing queued frame");
                return ServeExit::Dropped;
            }
        }

        loop {
            tokio::select! {
                msg = stream.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        if !self.handle_frame(&text).await {
                            return ServeExit::Finished;
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        if sink.send(Message::Pong(payload)).await.is_err() {
                            return ServeExit::Dropped;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => return ServeExit::Dropped,
                    Some(Ok(_)) => {} // binary / pong frames are ignored
                    Some(Err(e)) => {
                        warn!(error = %e, "Gateway read error");
                        return ServeExit::Dropped;
                    }
                },
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(Command::Send(frame)) => {
                        if let Err(e) = sink.send(Message::Text(frame)).await {
                            // The frame is lost, not retried: re-sending
                            // after reconnect could duplicate it.
                            warn!(error = %e, "Gateway send failed");
                            return ServeExit::Dropped;
                        }
                    }
                    Some(Command::Drain) | None => {
                        return self.drain(&mut sink, &mut stream).await;
                    }
                },
            }
        }
    }

    /// Decode and route one inbound frame. Returns `false` when the
    /// dispatcher has gone away and the client should stop.
    async fn handle_frame(&self, text: &str) -> bool {
        match codec::decode(text) {
            Ok(Inbound::Event(envelope)) => {
                debug!(sender = %envelope.sender, "Inbound chat event");
                if self.inbound_tx.send(envelope).await.is_err() {
                    warn!("Dispatcher closed the inbound channel, stopping client");
                    return false;
                }
            }
            Ok(Inbound::ApiResponse(response)) => {
                match response.echo.clone() {
                    Some(id) => {
                        self.pending.resolve(&id, response);
                    }
                    None => warn!("Discarding API response without correlation id"),
                }
            }
            Ok(Inbound::Meta { kind }) => debug!(kind, "Gateway meta frame"),
            Ok(Inbound::Unknown(value)) => warn!(frame = %value, "Unrecognised gateway frame"),
            Err(e) => warn!(error = %e, "Undecodable gateway frame"),
        }
        true
    }

    /// Drain: let pending calls resolve up to the grace deadline, then
    /// close the socket.
    async fn drain(
        &mut self,
        sink: &mut SplitSink<WsStream, Message>,
        stream: &mut SplitStream<WsStream>,
    ) -> ServeExit {
        self.set_state(ConnectionState::Draining);
        info!(
            pending = self.pending.len(),
            grace_ms = self.config.drain_grace.as_millis() as u64,
            "Draining gateway connection"
        );

        let deadline = Instant::now() + self.config.drain_grace;
        while !self.pending.is_empty() {
            match tokio::time::timeout_at(deadline, stream.next()).await {
                Ok(Some(Ok(Message::Text(text)))) => {
                    self.handle_frame(&text).await;
                }
                Ok(Some(Ok(_))) => {}
                Ok(Some(Err(_)) | None) => break,
                Err(_) => {
                    warn!(abandoned = self.pending.len(), "Drain grace period elapsed");
                    break;
                }
            }
        }

        let _ = sink.send(Message::Close(None)).await;
        ServeExit::Finished
    }
}

fn push_outbox(outbox: &mut VecDeque<String>, frame: String) {
    if outbox.len() >= MAX_OUTBOX {
        warn!("Outbox full, dropping oldest queued frame");
        outbox.pop_front();
    }
    outbox.push_back(frame);
}
