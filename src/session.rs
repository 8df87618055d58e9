//! STOMP-over-WebSocket transport session.
//!
//! A [`Session`] owns at most one live connection. Connecting spawns a
//! background task that owns the WebSocket and drives the whole lifecycle:
//! STOMP handshake, heart-beats, frame routing and fixed-delay reconnects.
//!
//! # Architecture
//!
//! ```text
//!   Session ─────── connect(identity, token) ──► ConnectionHandle
//!      │                                              │
//!      │ subscribe_to / unsubscribe_from / publish    │ commands (mpsc)
//!      │                                              ▼
//!      │                                     connection task
//!      │                                     (handshake, heart-beat,
//!      ▼                                      route, reconnect)
//!   SharedRegistry ◄──── route(destination) ──────────┘
//! ```
//!
//! # Protocol
//!
//! - CONNECT carries `userId` and `Authorization: Bearer <token>` (empty
//!   when no token is known)
//! - Heart-beats are negotiated from CONNECTED; silence for twice the
//!   negotiated incoming interval drops the connection
//! - After every (re)connect, all registry entries are re-subscribed
//! - ERROR frames and transport failures go to [`SessionConfig::on_error`];
//!   nothing is returned to the caller of `connect`

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::constants;
use crate::registry::{lock_registry, new_shared_registry, MessageCallback, SharedRegistry};
use crate::stomp::{Command, Decoded, Frame, HeartBeat, Inbound};
use crate::ws::{self, FrameSink, FrameStream, Incoming};

/// Error reported by the broker or the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StompErrorReport {
    /// Human-readable summary (`message` header of an ERROR frame).
    pub message: String,
    /// Raw diagnostic body.
    pub body: String,
}

impl StompErrorReport {
    fn from_frame(frame: &Frame) -> Self {
        Self {
            message: frame.get("message").unwrap_or("broker error").to_string(),
            body: frame.body.clone(),
        }
    }

    fn transport(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            body: String::new(),
        }
    }
}

/// Callback for asynchronous connection errors.
pub type ErrorCallback = Arc<dyn Fn(&StompErrorReport) + Send + Sync>;

/// Connection state observable from outside the session.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No connection task is running.
    #[default]
    Disconnected,
    /// Opening the WebSocket or waiting for CONNECTED.
    Connecting,
    /// CONNECTED received; subscribe and send are usable.
    Connected,
    /// Waiting out the reconnect delay.
    Reconnecting {
        /// Consecutive failed attempts so far.
        attempt: u32,
        /// Milliseconds until the next attempt.
        next_retry_ms: u64,
    },
}

/// Session settings fixed at construction time.
#[derive(Clone)]
pub struct SessionConfig {
    /// WebSocket endpoint (`ws://` or `wss://`).
    pub url: String,
    /// Interval the client is willing to receive heart-beats at.
    pub heartbeat_incoming: Duration,
    /// Interval the client offers to send heart-beats at.
    pub heartbeat_outgoing: Duration,
    /// Fixed delay between reconnection attempts.
    pub reconnect_delay: Duration,
    /// Maximum wait for CONNECTED after CONNECT.
    pub handshake_timeout: Duration,
    /// Receives ERROR frames and transport failures.
    pub on_error: Option<ErrorCallback>,
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("url", &self.url)
            .field("heartbeat_incoming", &self.heartbeat_incoming)
            .field("heartbeat_outgoing", &self.heartbeat_outgoing)
            .field("reconnect_delay", &self.reconnect_delay)
            .field("handshake_timeout", &self.handshake_timeout)
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

impl SessionConfig {
    /// Settings for `url` with the default timings from [`constants`].
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            heartbeat_incoming: constants::HEARTBEAT_INCOMING,
            heartbeat_outgoing: constants::HEARTBEAT_OUTGOING,
            reconnect_delay: constants::RECONNECT_DELAY,
            handshake_timeout: constants::STOMP_HANDSHAKE_TIMEOUT,
            on_error: None,
        }
    }

    /// Override the reconnect delay.
    #[must_use]
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Override both heart-beat offers. Zero disables a direction.
    #[must_use]
    pub fn heartbeat(mut self, outgoing: Duration, incoming: Duration) -> Self {
        self.heartbeat_outgoing = outgoing;
        self.heartbeat_incoming = incoming;
        self
    }

    /// Register the asynchronous error callback.
    #[must_use]
    pub fn on_error(mut self, callback: impl Fn(&StompErrorReport) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(callback));
        self
    }
}

/// Command queued for the connection task.
#[derive(Debug)]
enum Outbound {
    Subscribe { id: String, destination: String },
    Unsubscribe { id: String },
    Send { destination: String, body: String },
}

/// Opaque reference to one connection task.
///
/// Cloning is cheap; clones refer to the same connection. Use
/// [`Self::same_connection`] to compare identities.
#[derive(Clone)]
pub struct ConnectionHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    identity: String,
    command_tx: mpsc::UnboundedSender<Outbound>,
    state_rx: watch::Receiver<ConnectionState>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("identity", &self.inner.identity)
            .field("state", &*self.inner.state_rx.borrow())
            .finish_non_exhaustive()
    }
}

impl ConnectionHandle {
    /// Identity (user id) the connection authenticates as.
    #[must_use]
    pub fn identity(&self) -> &str {
        &self.inner.identity
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.state_rx.borrow().clone()
    }

    /// Whether the transport reports itself connected.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(*self.inner.state_rx.borrow(), ConnectionState::Connected)
    }

    /// Receiver that observes every state transition.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_rx.clone()
    }

    /// Wait until the CONNECTED frame has been received.
    ///
    /// Returns `false` if the connection task ended first.
    pub async fn connected(&self) -> bool {
        let mut rx = self.inner.state_rx.clone();
        let up = rx
            .wait_for(|state| *state == ConnectionState::Connected)
            .await
            .is_ok();
        up
    }

    /// Whether two handles refer to the same underlying connection.
    #[must_use]
    pub fn same_connection(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn send(&self, command: Outbound) -> bool {
        self.inner.command_tx.send(command).is_ok()
    }
}

/// One active interest in a destination, as returned by
/// [`Session::subscribe_to`].
///
/// The registry owns the subscription; this value is only the capability
/// to release it. Dropping it does not unsubscribe.
#[derive(Debug)]
pub struct Subscription {
    id: String,
    destination: String,
    registry: SharedRegistry,
    command_tx: mpsc::UnboundedSender<Outbound>,
}

impl Subscription {
    /// Wire subscription id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Subscribed destination.
    #[must_use]
    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Release this subscription.
    ///
    /// Does nothing (and returns `false`) when the destination has since
    /// been re-subscribed or the session was torn down.
    pub fn unsubscribe(self) -> bool {
        let mut registry = lock_registry(&self.registry);
        if !registry.remove_if_current(&self.destination, &self.id) {
            return false;
        }
        let _ = self.command_tx.send(Outbound::Unsubscribe {
            id: self.id.clone(),
        });
        log::debug!("[STOMP] Unsubscribed {} from {}", self.id, self.destination);
        true
    }
}

/// A single logical connection to the real-time backend.
///
/// Construct one per application root (or per test) and hand it to the
/// consumers that need it.
#[derive(Debug)]
pub struct Session {
    config: SessionConfig,
    handle: Option<ConnectionHandle>,
    registry: SharedRegistry,
}

impl Session {
    /// Create a disconnected session.
    #[must_use]
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            handle: None,
            registry: new_shared_registry(),
        }
    }

    /// Start the connection task, or return the existing handle.
    ///
    /// The handshake runs in the background; the handle becomes usable once
    /// [`ConnectionHandle::connected`] resolves. Must be called from within
    /// a tokio runtime.
    pub fn connect(&mut self, identity: &str, token: Option<&str>) -> ConnectionHandle {
        if let Some(ref handle) = self.handle {
            log::debug!("[STOMP] connect() with an existing handle, reusing it");
            return handle.clone();
        }

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let cancel = CancellationToken::new();

        let task = ConnectionTask {
            config: self.config.clone(),
            identity: identity.to_string(),
            token: token.map(str::to_string),
            registry: Arc::clone(&self.registry),
            state_tx,
            cancel: cancel.clone(),
        };
        tokio::spawn(task.run(command_rx));

        let handle = ConnectionHandle {
            inner: Arc::new(HandleInner {
                identity: identity.to_string(),
                command_tx,
                state_rx,
                cancel,
            }),
        };
        self.handle = Some(handle.clone());
        handle
    }

    /// Release every subscription, close the connection and clear the handle.
    ///
    /// Safe to call when not connected.
    pub fn disconnect(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };

        release_all(&self.registry, &handle);
        handle.inner.cancel.cancel();
        log::info!("[STOMP] Disconnected session for {}", handle.identity());
    }

    /// Whether a handle exists and its transport is connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.handle.as_ref().is_some_and(ConnectionHandle::is_active)
    }

    /// The current connection handle, if any.
    #[must_use]
    pub fn handle(&self) -> Option<&ConnectionHandle> {
        self.handle.as_ref()
    }

    /// Current connection state (`Disconnected` without a handle).
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.handle
            .as_ref()
            .map_or(ConnectionState::Disconnected, ConnectionHandle::state)
    }

    /// Number of tracked subscriptions.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        lock_registry(&self.registry).len()
    }

    /// Whether `destination` has a tracked subscription.
    #[must_use]
    pub fn is_subscribed(&self, destination: &str) -> bool {
        lock_registry(&self.registry).contains(destination)
    }

    /// Subscribe `callback` to every frame delivered to `destination`.
    ///
    /// Returns `None` when not connected. An existing subscription for the
    /// same destination is released and replaced in one step.
    pub fn subscribe_to<F>(&self, destination: &str, callback: F) -> Option<Subscription>
    where
        F: Fn(serde_json::Value) + Send + Sync + 'static,
    {
        let handle = self.handle.as_ref().filter(|h| h.is_active())?;
        let callback: MessageCallback = Arc::new(callback);

        let id = {
            let mut registry = lock_registry(&self.registry);
            let (id, replaced) = registry.insert(destination, callback);
            if let Some(old) = replaced {
                handle.send(Outbound::Unsubscribe { id: old });
            }
            handle.send(Outbound::Subscribe {
                id: id.clone(),
                destination: destination.to_string(),
            });
            id
        };

        log::debug!("[STOMP] Subscribed {} to {}", id, destination);

        Some(Subscription {
            id,
            destination: destination.to_string(),
            registry: Arc::clone(&self.registry),
            command_tx: handle.inner.command_tx.clone(),
        })
    }

    /// Release the subscription for `destination`, if any.
    pub fn unsubscribe_from(&self, destination: &str) {
        let Some(id) = lock_registry(&self.registry).remove(destination) else {
            return;
        };
        if let Some(ref handle) = self.handle {
            handle.send(Outbound::Unsubscribe { id: id.clone() });
        }
        log::debug!("[STOMP] Unsubscribed {} from {}", id, destination);
    }

    /// Release every subscription and clear the registry.
    pub fn remove_all(&self) {
        match self.handle {
            Some(ref handle) => release_all(&self.registry, handle),
            None => {
                lock_registry(&self.registry).take_all();
            }
        }
    }

    /// Queue a SEND frame carrying `body` (JSON text) to `destination`.
    ///
    /// Returns `false` without sending when not connected.
    pub fn publish(&self, destination: &str, body: String) -> bool {
        match self.handle {
            Some(ref handle) if handle.is_active() => handle.send(Outbound::Send {
                destination: destination.to_string(),
                body,
            }),
            _ => {
                log::debug!("[STOMP] Not connected, dropping publish to {}", destination);
                false
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn release_all(registry: &SharedRegistry, handle: &ConnectionHandle) {
    let released = lock_registry(registry).take_all();
    for id in released {
        handle.send(Outbound::Unsubscribe { id });
    }
}

/// Route one MESSAGE frame to its destination's callback.
///
/// Returns `true` if a callback was invoked. Unknown destinations, stale
/// subscription ids and bodies that are not JSON are dropped.
pub(crate) fn dispatch_message(registry: &SharedRegistry, frame: &Frame) -> bool {
    let Some(destination) = frame.get("destination") else {
        log::warn!("[STOMP] MESSAGE frame without destination, dropping");
        return false;
    };

    let callback = lock_registry(registry).route(destination, frame.get("subscription"));
    let Some(callback) = callback else {
        log::trace!("[STOMP] No subscription for {}, dropping frame", destination);
        return false;
    };

    match serde_json::from_str::<serde_json::Value>(&frame.body) {
        Ok(payload) => {
            callback(payload);
            true
        }
        Err(e) => {
            log::warn!(
                "[STOMP] Dropping malformed payload on {}: {} (body={})",
                destination,
                e,
                preview(&frame.body)
            );
            false
        }
    }
}

/// Result of the inner message loop.
enum LoopExit {
    /// Shutdown was requested.
    Shutdown,
    /// Connection was lost, should reconnect.
    Disconnected,
}

/// Background task state for one [`ConnectionHandle`].
struct ConnectionTask {
    config: SessionConfig,
    identity: String,
    token: Option<String>,
    registry: SharedRegistry,
    state_tx: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
}

impl ConnectionTask {
    /// Connect, run, and reconnect after the fixed delay until cancelled.
    async fn run(self, mut command_rx: mpsc::UnboundedReceiver<Outbound>) {
        let mut attempt: u32 = 0;

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            self.state_tx.send_replace(ConnectionState::Connecting);

            let established = tokio::select! {
                () = self.cancel.cancelled() => break,
                result = self.establish() => result,
            };

            match established {
                Ok((mut sink, mut stream, heartbeat)) => {
                    attempt = 0;
                    discard_stale_commands(&mut command_rx);

                    let mut sent = HashSet::new();
                    if let Err(e) = self.resubscribe_all(&mut sink, &mut sent).await {
                        self.report_error(&StompErrorReport::transport(format!(
                            "Failed to re-subscribe: {e:#}"
                        )));
                    } else {
                        self.state_tx.send_replace(ConnectionState::Connected);
                        log::info!("[STOMP] Connected as {}", self.identity);

                        let exit = self
                            .run_message_loop(
                                &mut sink,
                                &mut stream,
                                &mut command_rx,
                                heartbeat,
                                &mut sent,
                            )
                            .await;

                        if let LoopExit::Shutdown = exit {
                            break;
                        }
                        log::warn!("[STOMP] Connection lost");
                    }
                }
                Err(report) => {
                    log::warn!("[STOMP] Connection failed: {}", report.message);
                    self.report_error(&report);
                }
            }

            attempt = attempt.saturating_add(1);
            let delay = self.config.reconnect_delay;
            self.state_tx.send_replace(ConnectionState::Reconnecting {
                attempt,
                next_retry_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            });
            log::info!("[STOMP] Reconnecting in {:.1}s...", delay.as_secs_f32());

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = self.cancel.cancelled() => break,
            }
        }

        self.state_tx.send_replace(ConnectionState::Disconnected);
        log::debug!("[STOMP] Connection task for {} exited", self.identity);
    }

    /// Open the WebSocket and complete the STOMP handshake.
    async fn establish(&self) -> Result<(FrameSink, FrameStream, HeartBeat), StompErrorReport> {
        log::info!("[STOMP] Connecting to {}", self.config.url);

        let (mut sink, mut stream) = ws::connect(&self.config.url)
            .await
            .map_err(|e| StompErrorReport::transport(format!("{e:#}")))?;

        let authorization = self
            .token
            .as_deref()
            .map(|t| format!("Bearer {t}"))
            .unwrap_or_default();

        let connect = Frame::new(Command::Connect)
            .header("accept-version", constants::ACCEPT_VERSION)
            .header(
                "heart-beat",
                HeartBeat::header_value(self.config.heartbeat_outgoing, self.config.heartbeat_incoming),
            )
            .header("userId", self.identity.as_str())
            .header("Authorization", authorization);

        sink
            .send(&connect)
            .await
            .map_err(|e| StompErrorReport::transport(format!("{e:#}")))?;

        let connected = tokio::time::timeout(
            self.config.handshake_timeout,
            wait_for_connected(&mut stream),
        )
        .await
        .map_err(|_elapsed| StompErrorReport::transport("Timeout waiting for CONNECTED"))??;

        let heartbeat = HeartBeat::negotiate(
            self.config.heartbeat_outgoing,
            self.config.heartbeat_incoming,
            connected.get("heart-beat"),
        );
        log::debug!(
            "[STOMP] CONNECTED version={} heart-beat send={:?} expect={:?}",
            connected.get("version").unwrap_or("1.0"),
            heartbeat.send_every,
            heartbeat.expect_every
        );

        Ok((sink, stream, heartbeat))
    }

    /// Send SUBSCRIBE for every destination still in the registry.
    async fn resubscribe_all(
        &self,
        sink: &mut FrameSink,
        sent: &mut HashSet<String>,
    ) -> anyhow::Result<()> {
        let active = lock_registry(&self.registry).active();
        if !active.is_empty() {
            log::info!("[STOMP] Re-subscribing {} destination(s)", active.len());
        }
        for (id, destination) in active {
            sink.send(&subscribe_frame(&id, &destination)).await?;
            sent.insert(id);
        }
        Ok(())
    }

    /// Inner loop for one live connection.
    async fn run_message_loop(
        &self,
        sink: &mut FrameSink,
        stream: &mut FrameStream,
        command_rx: &mut mpsc::UnboundedReceiver<Outbound>,
        heartbeat: HeartBeat,
        sent: &mut HashSet<String>,
    ) -> LoopExit {
        let mut send_tick = heartbeat.send_every.map(|every| {
            let mut interval = tokio::time::interval_at(Instant::now() + every, every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            interval
        });
        let stale_after = heartbeat
            .expect_every
            .map(|every| every * constants::HEARTBEAT_GRACE_FACTOR);
        let mut last_inbound = Instant::now();

        loop {
            let stale_deadline = stale_after.map(|grace| last_inbound + grace);

            tokio::select! {
                () = self.cancel.cancelled() => {
                    self.shutdown(sink, command_rx, sent).await;
                    return LoopExit::Shutdown;
                }

                msg = stream.next() => {
                    last_inbound = Instant::now();
                    match msg {
                        Some(Ok(Incoming::Message(decoded))) => self.handle_message(decoded),
                        Some(Ok(Incoming::Closed { code, reason })) => {
                            log::info!("[STOMP] Connection closed by server ({} {})", code, reason);
                            return LoopExit::Disconnected;
                        }
                        Some(Err(e)) => {
                            self.report_error(&StompErrorReport::transport(format!("{e:#}")));
                            return LoopExit::Disconnected;
                        }
                        None => {
                            log::info!("[STOMP] WebSocket stream ended");
                            return LoopExit::Disconnected;
                        }
                    }
                }

                Some(command) = command_rx.recv() => {
                    if let Err(e) = self.write_command(sink, command, sent).await {
                        self.report_error(&StompErrorReport::transport(format!(
                            "Write failed: {e:#}"
                        )));
                        return LoopExit::Disconnected;
                    }
                }

                () = tick_or_pending(&mut send_tick) => {
                    if let Err(e) = sink.heartbeat().await {
                        self.report_error(&StompErrorReport::transport(format!(
                            "Heart-beat failed: {e:#}"
                        )));
                        return LoopExit::Disconnected;
                    }
                }

                () = sleep_until_or_pending(stale_deadline) => {
                    self.report_error(&StompErrorReport::transport(format!(
                        "Nothing received for {:?}, dropping stale connection",
                        stale_after.unwrap_or_default()
                    )));
                    return LoopExit::Disconnected;
                }
            }
        }
    }

    /// Act on each frame decoded from one WebSocket message.
    ///
    /// Frames ahead of a malformed one are still handled; the remainder of
    /// the message is logged and dropped.
    fn handle_message(&self, decoded: Decoded) {
        for item in decoded.items {
            let Inbound::Frame(frame) = item else {
                continue;
            };
            match frame.command {
                Command::Message => {
                    dispatch_message(&self.registry, &frame);
                }
                Command::Error => self.report_error(&StompErrorReport::from_frame(&frame)),
                Command::Receipt => {
                    log::trace!("[STOMP] Receipt {}", frame.get("receipt-id").unwrap_or("?"));
                }
                other => log::trace!("[STOMP] Ignoring {} frame", other),
            }
        }

        if let Some(malformed) = decoded.malformed {
            log::warn!(
                "[STOMP] Dropping undecodable frame data: {} ({})",
                malformed.error,
                preview(&malformed.rest)
            );
        }
    }

    /// Write a queued command, skipping ones made stale by later registry changes.
    async fn write_command(
        &self,
        sink: &mut FrameSink,
        command: Outbound,
        sent: &mut HashSet<String>,
    ) -> anyhow::Result<()> {
        match command {
            Outbound::Subscribe { id, destination } => {
                let current = lock_registry(&self.registry).is_current(&destination, &id);
                if !current || sent.contains(&id) {
                    log::trace!("[STOMP] Skipping stale subscribe {}", id);
                    return Ok(());
                }
                sink.send(&subscribe_frame(&id, &destination)).await?;
                sent.insert(id);
            }
            Outbound::Unsubscribe { id } => {
                if sent.remove(&id) {
                    sink.send(&Frame::new(Command::Unsubscribe).header("id", id)).await?;
                }
            }
            Outbound::Send { destination, body } => {
                let frame = Frame::new(Command::Send)
                    .header("destination", destination)
                    .header("content-type", "application/json")
                    .body(body);
                sink.send(&frame).await?;
            }
        }
        Ok(())
    }

    /// Flush queued commands, send DISCONNECT and close the socket.
    async fn shutdown(
        &self,
        sink: &mut FrameSink,
        command_rx: &mut mpsc::UnboundedReceiver<Outbound>,
        sent: &mut HashSet<String>,
    ) {
        while let Ok(command) = command_rx.try_recv() {
            if self.write_command(sink, command, sent).await.is_err() {
                break;
            }
        }
        let _ = sink.send(&Frame::new(Command::Disconnect)).await;
        let _ = sink.close().await;
        log::info!("[STOMP] Shutdown requested, connection closed");
    }

    fn report_error(&self, report: &StompErrorReport) {
        log::error!("[STOMP] {} {}", report.message, report.body);
        if let Some(ref callback) = self.config.on_error {
            callback(report);
        }
    }
}

/// Wait for CONNECTED. An ERROR frame fails the handshake.
async fn wait_for_connected(stream: &mut FrameStream) -> Result<Frame, StompErrorReport> {
    while let Some(msg) = stream.next().await {
        let decoded = match msg {
            Ok(Incoming::Message(decoded)) => decoded,
            Ok(Incoming::Closed { code, reason }) => {
                return Err(StompErrorReport::transport(format!(
                    "Closed during handshake ({code} {reason})"
                )));
            }
            Err(e) => return Err(StompErrorReport::transport(format!("{e:#}"))),
        };

        if let Some(ref malformed) = decoded.malformed {
            log::warn!("[STOMP] Undecodable data during handshake: {}", malformed.error);
        }

        for item in decoded.items {
            match item {
                Inbound::Frame(frame) if frame.command == Command::Connected => return Ok(frame),
                Inbound::Frame(frame) if frame.command == Command::Error => {
                    return Err(StompErrorReport::from_frame(&frame));
                }
                _ => {}
            }
        }
    }

    Err(StompErrorReport::transport("WebSocket closed before CONNECTED"))
}

/// First 100 characters of `text`, for log lines.
fn preview(text: &str) -> &str {
    text.char_indices().nth(100).map_or(text, |(end, _)| &text[..end])
}

fn subscribe_frame(id: &str, destination: &str) -> Frame {
    Frame::new(Command::Subscribe)
        .header("id", id)
        .header("destination", destination)
}

fn discard_stale_commands(command_rx: &mut mpsc::UnboundedReceiver<Outbound>) {
    while let Ok(command) = command_rx.try_recv() {
        log::debug!("[STOMP] Discarding command queued while offline: {:?}", command);
    }
}

async fn tick_or_pending(interval: &mut Option<tokio::time::Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

async fn sleep_until_or_pending(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn message(destination: &str, subscription: &str, body: &str) -> Frame {
        Frame::new(Command::Message)
            .header("destination", destination)
            .header("subscription", subscription)
            .body(body)
    }

    #[test]
    fn test_session_starts_disconnected() {
        let session = Session::new(SessionConfig::new("ws://127.0.0.1:1/ws"));
        assert!(!session.is_connected());
        assert!(session.handle().is_none());
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_subscribe_without_connection_returns_none() {
        let session = Session::new(SessionConfig::new("ws://127.0.0.1:1/ws"));
        assert!(session.subscribe_to("/topic/chats/1", |_| {}).is_none());
        assert_eq!(session.subscription_count(), 0);
    }

    #[test]
    fn test_disconnect_and_unsubscribe_without_connection_are_noops() {
        let mut session = Session::new(SessionConfig::new("ws://127.0.0.1:1/ws"));
        session.unsubscribe_from("/topic/chats/1");
        session.remove_all();
        session.disconnect();
        session.disconnect();
        assert!(!session.is_connected());
    }

    #[test]
    fn test_publish_without_connection_is_dropped() {
        let session = Session::new(SessionConfig::new("ws://127.0.0.1:1/ws"));
        assert!(!session.publish("/app/x", "{}".to_string()));
    }

    #[tokio::test]
    async fn test_connect_twice_returns_same_handle() {
        let mut session = Session::new(
            SessionConfig::new("ws://127.0.0.1:1/ws").reconnect_delay(Duration::from_secs(60)),
        );
        let first = session.connect("u1", None);
        let second = session.connect("u2", Some("tok"));
        assert!(first.same_connection(&second));
        assert_eq!(second.identity(), "u1");
        session.disconnect();
        assert!(session.handle().is_none());
    }

    #[tokio::test]
    async fn test_unreachable_broker_reports_error_and_reconnects() {
        let reports = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&reports);
        let config = SessionConfig::new("ws://127.0.0.1:1/ws")
            .reconnect_delay(Duration::from_secs(60))
            .on_error(move |r| sink.lock().unwrap().push(r.clone()));

        let mut session = Session::new(config);
        let handle = session.connect("u1", None);
        let mut state = handle.watch_state();
        state
            .wait_for(|s| matches!(s, ConnectionState::Reconnecting { .. }))
            .await
            .unwrap();

        assert!(!session.is_connected());
        assert_eq!(reports.lock().unwrap().len(), 1);
        assert!(matches!(
            handle.state(),
            ConnectionState::Reconnecting { attempt: 1, next_retry_ms: 60_000 }
        ));

        session.disconnect();
        state
            .wait_for(|s| *s == ConnectionState::Disconnected)
            .await
            .unwrap();
        assert!(!handle.connected().await);
    }

    #[test]
    fn test_dispatch_routes_payload() {
        let registry = new_shared_registry();
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        let (id, _) = lock_registry(&registry).insert(
            "/topic/chats/1",
            Arc::new(move |v| sink.lock().unwrap().push(v)),
        );

        assert!(dispatch_message(
            &registry,
            &message("/topic/chats/1", &id, r#"{"content":"hi"}"#)
        ));
        assert_eq!(received.lock().unwrap()[0]["content"], "hi");
    }

    #[test]
    fn test_dispatch_malformed_body_does_not_block_later_frames() {
        let registry = new_shared_registry();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let (id, _) = lock_registry(&registry).insert(
            "/topic/chats/1",
            Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        assert!(!dispatch_message(&registry, &message("/topic/chats/1", &id, "{not json")));
        assert!(!dispatch_message(&registry, &message("/topic/chats/1", &id, "")));
        assert!(dispatch_message(&registry, &message("/topic/chats/1", &id, "{}")));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dispatch_after_unsubscribe_is_dropped() {
        let registry = new_shared_registry();
        let (id, _) = lock_registry(&registry).insert("/topic/chats/1", Arc::new(|_| {}));
        lock_registry(&registry).remove("/topic/chats/1");
        assert!(!dispatch_message(&registry, &message("/topic/chats/1", &id, "{}")));
    }

    #[test]
    fn test_dispatch_callback_may_touch_registry() {
        let registry = new_shared_registry();
        let inner = Arc::clone(&registry);
        let (id, _) = lock_registry(&registry).insert(
            "/topic/chats/1",
            Arc::new(move |_| {
                lock_registry(&inner).remove("/topic/chats/1");
            }),
        );
        assert!(dispatch_message(&registry, &message("/topic/chats/1", &id, "{}")));
        assert!(lock_registry(&registry).is_empty());
    }

    #[test]
    fn test_preview_respects_char_boundaries() {
        let text = "é".repeat(150);
        assert_eq!(preview(&text).chars().count(), 100);
        assert_eq!(preview("short"), "short");
    }

    #[test]
    fn test_error_report_from_frame() {
        let frame = Frame::new(Command::Error)
            .header("message", "Access denied")
            .body("details");
        let report = StompErrorReport::from_frame(&frame);
        assert_eq!(report.message, "Access denied");
        assert_eq!(report.body, "details");
    }
}
