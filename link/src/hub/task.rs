//! Background connection task.
//!
//! Owns every piece of mutable hub state. The public [`RealtimeHub`] handle
//! talks to it over a command channel; connection attempts run in spawned
//! tasks and report back tagged with a generation number so that outcomes
//! of abandoned attempts are discarded.
//!
//! [`RealtimeHub`]: super::RealtimeHub

use crate::{
    auth::{validate_token, ArcTokenSource, AuthFailureFlag, TokenSource},
    connection::{CloseReason, Transport, TransportEvent, TransportLink},
    error::{LinkError, Result},
    event_dispatcher::{EventDispatcher, EventName},
    hub::{backoff, methods},
    models::{ClientFrame, ConnectionState, HubOptions, HubStatus, ServerFrame, StateChange},
    timeouts::HubTimeouts,
};
use serde_json::{json, Value as JsonValue};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Sleep;

// ── Commands ────────────────────────────────────────────────────────────────

/// Commands sent from the public API to the background connection task.
pub(crate) enum HubCmd {
    Connect {
        reply: oneshot::Sender<Result<()>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    Invoke {
        invocation_id: String,
        target: String,
        arguments: Vec<JsonValue>,
        reply: oneshot::Sender<Result<JsonValue>>,
    },
    /// The caller stopped waiting (invoke timeout).
    CancelInvocation {
        invocation_id: String,
    },
    TrackTrace {
        trace_id: String,
        subscribed: bool,
    },
    Shutdown,
}

/// Messages from tasks spawned by the connection task itself.
enum Internal {
    Attempt {
        generation: u64,
        result: Result<TransportLink>,
    },
    TokenChecked(Result<()>),
}

/// Everything the connection task needs that never changes.
pub(crate) struct HubConfig {
    pub endpoint: String,
    pub tokens: ArcTokenSource,
    pub transport: Arc<dyn Transport>,
    pub options: HubOptions,
    pub timeouts: HubTimeouts,
    pub flag: AuthFailureFlag,
    pub dispatcher: EventDispatcher,
}

struct InFlight {
    generation: u64,
    is_retry: bool,
    handle: JoinHandle<()>,
}

pub(crate) struct HubTask {
    endpoint: Arc<str>,
    tokens: ArcTokenSource,
    transport: Arc<dyn Transport>,
    options: HubOptions,
    timeouts: HubTimeouts,
    flag: AuthFailureFlag,
    dispatcher: EventDispatcher,
    status_tx: watch::Sender<HubStatus>,

    state: ConnectionState,
    reconnect_attempts: u32,
    auth_suspended: bool,
    last_close: Option<CloseReason>,

    generation: u64,
    attempt: Option<InFlight>,
    waiters: Vec<oneshot::Sender<Result<()>>>,
    link: Option<TransportLink>,
    retry: Option<Pin<Box<Sleep>>>,
    retry_delay: Option<Duration>,

    pending: HashMap<String, oneshot::Sender<Result<JsonValue>>>,
    traces: Vec<String>,
    replay_seq: u64,

    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
    token_changes: Option<watch::Receiver<()>>,
}

impl HubTask {
    pub(crate) fn new(config: HubConfig, status_tx: watch::Sender<HubStatus>) -> Self {
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let token_changes = config.tokens.changes();
        Self {
            endpoint: Arc::from(config.endpoint),
            tokens: config.tokens,
            transport: config.transport,
            options: config.options,
            timeouts: config.timeouts,
            flag: config.flag,
            dispatcher: config.dispatcher,
            status_tx,
            state: ConnectionState::Disconnected,
            reconnect_attempts: 0,
            auth_suspended: false,
            last_close: None,
            generation: 0,
            attempt: None,
            waiters: Vec::new(),
            link: None,
            retry: None,
            retry_delay: None,
            pending: HashMap::new(),
            traces: Vec::new(),
            replay_seq: 0,
            internal_tx,
            internal_rx,
            token_changes,
        }
    }

    pub(crate) async fn run(mut self, mut cmd_rx: mpsc::Receiver<HubCmd>) {
        loop {
            tokio::select! {
                biased;

                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(HubCmd::Shutdown) | None => {
                            self.shutdown();
                            return;
                        },
                        Some(cmd) => self.handle_command(cmd),
                    }
                }

                Some(msg) = self.internal_rx.recv() => {
                    match msg {
                        Internal::Attempt { generation, result } => {
                            self.on_attempt_finished(generation, result);
                        },
                        Internal::TokenChecked(result) => self.on_token_checked(result),
                    }
                }

                event = next_inbound(&mut self.link) => {
                    match event {
                        TransportEvent::Frame(frame) => self.on_frame(frame),
                        TransportEvent::Closed(reason) => self.on_close(reason),
                    }
                }

                () = wait_retry(&mut self.retry) => self.on_retry_due(),

                alive = wait_token_change(&mut self.token_changes) => {
                    if alive {
                        self.on_token_rotated();
                    } else {
                        self.token_changes = None;
                    }
                }
            }
        }
    }

    fn handle_command(&mut self, cmd: HubCmd) {
        match cmd {
            HubCmd::Connect { reply } => self.on_connect_requested(reply),
            HubCmd::Disconnect { reply } => {
                self.on_disconnect_requested();
                let _ = reply.send(());
            },
            HubCmd::Invoke {
                invocation_id,
                target,
                arguments,
                reply,
            } => self.on_invoke(invocation_id, target, arguments, reply),
            HubCmd::CancelInvocation { invocation_id } => {
                if self.pending.remove(&invocation_id).is_some() {
                    log::debug!("[pulse-link] Abandoned invocation {}", invocation_id);
                }
            },
            HubCmd::TrackTrace {
                trace_id,
                subscribed,
            } => {
                if subscribed {
                    if !self.traces.contains(&trace_id) {
                        self.traces.push(trace_id);
                    }
                } else {
                    self.traces.retain(|id| *id != trace_id);
                }
            },
            HubCmd::Shutdown => {},
        }
    }

    // ── connect / disconnect ────────────────────────────────────────────

    fn on_connect_requested(&mut self, reply: oneshot::Sender<Result<()>>) {
        if self.state == ConnectionState::Connected && self.link.is_some() {
            let _ = reply.send(Ok(()));
            return;
        }
        self.waiters.push(reply);
        if self.attempt.is_some() {
            log::debug!("[pulse-link] connect() joined the attempt in flight");
            return;
        }

        // A manual connect while a retry is pending skips the wait.
        let resuming = self.state == ConnectionState::Reconnecting;
        self.retry = None;
        self.retry_delay = None;
        if !resuming {
            self.reconnect_attempts = 0;
        }
        self.start_attempt(resuming);
    }

    fn on_disconnect_requested(&mut self) {
        self.generation += 1;
        if let Some(in_flight) = self.attempt.take() {
            in_flight.handle.abort();
        }
        self.retry = None;
        self.retry_delay = None;
        self.link = None;

        self.fail_pending(|| LinkError::NotConnected("Hub disconnected".to_string()));
        self.reply_waiters(Err(LinkError::NotConnected(
            "Disconnected before the connection was established".to_string(),
        )));

        self.reconnect_attempts = 0;
        self.auth_suspended = false;
        self.traces.clear();
        self.set_state(ConnectionState::Disconnected);
        self.emit_state(StateChange::new(ConnectionState::Disconnected));
        self.dispatcher.clear();
        log::info!("[pulse-link] Disconnected from {}", self.endpoint);
    }

    fn shutdown(&mut self) {
        if let Some(in_flight) = self.attempt.take() {
            in_flight.handle.abort();
        }
        self.link = None;
        self.fail_pending(|| LinkError::NotConnected("Hub dropped".to_string()));
        self.reply_waiters(Err(LinkError::NotConnected("Hub dropped".to_string())));
        log::debug!("[pulse-link] Connection task for {} stopped", self.endpoint);
    }

    // ── attempts ────────────────────────────────────────────────────────

    fn start_attempt(&mut self, is_retry: bool) {
        self.generation += 1;
        let generation = self.generation;

        let endpoint = Arc::clone(&self.endpoint);
        let tokens = Arc::clone(&self.tokens);
        let transport = Arc::clone(&self.transport);
        let connection_timeout = self.timeouts.connection_timeout;
        let internal_tx = self.internal_tx.clone();

        let handle = tokio::spawn(async move {
            let result =
                open_connection(&endpoint, &*tokens, &*transport, connection_timeout).await;
            let _ = internal_tx.send(Internal::Attempt { generation, result });
        });
        self.attempt = Some(InFlight {
            generation,
            is_retry,
            handle,
        });

        if is_retry {
            log::info!(
                "[pulse-link] Reconnecting to {} (attempt {})",
                self.endpoint,
                self.reconnect_attempts + 1
            );
        } else {
            log::info!("[pulse-link] Connecting to {}", self.endpoint);
        }
        if self.state == ConnectionState::Reconnecting {
            self.publish();
        } else {
            self.set_state(ConnectionState::Connecting);
            self.emit_state(StateChange::new(ConnectionState::Connecting));
        }
    }

    fn on_attempt_finished(&mut self, generation: u64, result: Result<TransportLink>) {
        match &self.attempt {
            Some(in_flight) if in_flight.generation == generation => {},
            _ => {
                log::debug!("[pulse-link] Discarding outcome of stale attempt {}", generation);
                return;
            },
        }
        let is_retry = self.attempt.take().is_some_and(|a| a.is_retry);

        match result {
            Ok(link) => self.on_connected(link, is_retry),
            Err(err) => self.on_attempt_failed(err, is_retry),
        }
    }

    fn on_connected(&mut self, link: TransportLink, was_retry: bool) {
        let previous_attempts = self.reconnect_attempts;
        self.link = Some(link);
        self.reconnect_attempts = 0;
        self.auth_suspended = false;
        self.retry = None;
        self.retry_delay = None;
        if self.flag.clear() {
            log::info!("[pulse-link] Authentication failure flag cleared by successful connect");
        }

        self.set_state(ConnectionState::Connected);
        log::info!("[pulse-link] Connected to {}", self.endpoint);
        self.emit_state(StateChange::new(ConnectionState::Connected));
        if was_retry {
            self.dispatcher.emit(
                &EventName::Reconnected,
                &json!({ "attempts": previous_attempts }),
            );
        }
        self.replay_traces();
        self.reply_waiters(Ok(()));
    }

    fn on_attempt_failed(&mut self, err: LinkError, was_retry: bool) {
        log::warn!("[pulse-link] Connection attempt to {} failed: {}", self.endpoint, err);
        self.emit_state(StateChange::error(err.to_string()));

        if err.is_auth_failure() {
            self.enter_auth_suspension(&err.to_string());
        } else if was_retry {
            self.schedule_retry_or_fail(err.to_string());
        } else {
            self.set_state(ConnectionState::Disconnected);
        }
        self.reply_waiters(Err(err));
    }

    // ── closes and retries ──────────────────────────────────────────────

    fn on_close(&mut self, reason: CloseReason) {
        self.link = None;
        let message = reason.to_string();
        self.fail_pending(|| LinkError::NetworkError(format!("Connection closed: {}", message)));
        self.last_close = Some(reason.clone());
        log::warn!("[pulse-link] Connection to {} closed: {}", self.endpoint, reason);

        if reason.is_auth_failure() {
            self.enter_auth_suspension(&reason.message);
        } else if !reason.allow_reconnect || !self.options.auto_reconnect {
            self.set_state(ConnectionState::Disconnected);
            self.emit_state(StateChange::new(ConnectionState::Disconnected).with_error(message));
        } else if self.flag.is_set() {
            self.suppress_reconnect(message);
        } else {
            self.schedule_retry_or_fail(message);
        }
    }

    fn enter_auth_suspension(&mut self, message: &str) {
        self.flag.set();
        self.auth_suspended = true;
        self.reconnect_attempts = 0;
        self.retry = None;
        self.retry_delay = None;
        log::warn!(
            "[pulse-link] Authentication failed ({}); automatic reconnect suspended until a fresh token is available",
            message
        );
        self.dispatcher
            .emit(&EventName::AuthenticationFailed, &json!({ "error": message }));
        self.set_state(ConnectionState::Disconnected);
        self.emit_state(StateChange::new(ConnectionState::Disconnected).with_error(message));
    }

    fn suppress_reconnect(&mut self, message: String) {
        log::warn!(
            "[pulse-link] Automatic reconnect to {} suppressed: authentication failure flag is set",
            self.endpoint
        );
        self.auth_suspended = true;
        self.reconnect_attempts = 0;
        self.retry = None;
        self.retry_delay = None;
        self.set_state(ConnectionState::Disconnected);
        self.emit_state(StateChange::new(ConnectionState::Disconnected).with_error(message));
    }

    fn schedule_retry_or_fail(&mut self, message: String) {
        self.reconnect_attempts = self.reconnect_attempts.saturating_add(1);
        let attempt = self.reconnect_attempts;

        if backoff::attempts_exhausted(attempt, self.options.max_reconnect_attempts) {
            log::warn!("[pulse-link] Max reconnection attempts ({}) reached", attempt);
            self.retry = None;
            self.retry_delay = None;
            self.set_state(ConnectionState::Failed);
            self.emit_state(
                StateChange::new(ConnectionState::Failed)
                    .with_attempt(attempt)
                    .with_error(message),
            );
            return;
        }

        let delay =
            backoff::reconnect_delay(self.options.base_delay_ms, self.options.max_delay_ms, attempt);
        log::info!(
            "[pulse-link] Attempting reconnection in {}ms (attempt {})",
            delay.as_millis(),
            attempt
        );
        self.retry = Some(Box::pin(tokio::time::sleep(delay)));
        self.retry_delay = Some(delay);
        self.set_state(ConnectionState::Reconnecting);
        self.emit_state(
            StateChange::new(ConnectionState::Reconnecting)
                .with_attempt(attempt)
                .with_next_retry(delay)
                .with_error(message),
        );
    }

    fn on_retry_due(&mut self) {
        self.retry = None;
        self.retry_delay = None;
        if self.flag.is_set() {
            self.suppress_reconnect(
                "Authentication failure reported by another connection".to_string(),
            );
            return;
        }
        self.start_attempt(true);
    }

    // ── token rotation ──────────────────────────────────────────────────

    fn on_token_rotated(&mut self) {
        let tokens = Arc::clone(&self.tokens);
        let internal_tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let checked = match tokens.token().await {
                Some(token) => validate_token(&token, now_secs()).map(|_| ()),
                None => Err(LinkError::AuthenticationError(
                    "No access token available".to_string(),
                )),
            };
            let _ = internal_tx.send(Internal::TokenChecked(checked));
        });
    }

    fn on_token_checked(&mut self, result: Result<()>) {
        if let Err(e) = result {
            log::debug!("[pulse-link] Rotated token is not usable yet: {}", e);
            return;
        }
        if self.flag.clear() {
            log::info!("[pulse-link] Token rotated; authentication failure flag cleared");
        }
        if self.auth_suspended && self.attempt.is_none() && self.link.is_none() {
            log::info!("[pulse-link] Token rotated; resuming connection to {}", self.endpoint);
            self.auth_suspended = false;
            self.start_attempt(true);
        }
    }

    // ── traffic ─────────────────────────────────────────────────────────

    fn on_invoke(
        &mut self,
        invocation_id: String,
        target: String,
        arguments: Vec<JsonValue>,
        reply: oneshot::Sender<Result<JsonValue>>,
    ) {
        let outbound = match (&self.link, self.state) {
            (Some(link), ConnectionState::Connected) => link.outbound.clone(),
            _ => {
                let _ = reply.send(Err(LinkError::NotConnected(format!(
                    "Cannot invoke '{}' while {}",
                    target, self.state
                ))));
                return;
            },
        };

        if self.options.debug {
            log::debug!("[pulse-link] Invoking {} ({})", target, invocation_id);
        }
        match outbound.try_send(ClientFrame::invocation(invocation_id.clone(), target, arguments)) {
            Ok(()) => {
                self.pending.insert(invocation_id, reply);
            },
            Err(e) => {
                let _ = reply.send(Err(LinkError::NetworkError(format!(
                    "Failed to send invocation: {}",
                    e
                ))));
            },
        }
    }

    fn on_frame(&mut self, frame: ServerFrame) {
        match frame {
            ServerFrame::Event { target, payload } => {
                let name = EventName::from(target);
                let delivered = self.dispatcher.emit(&name, &payload);
                if self.options.debug {
                    log::debug!("[pulse-link] Event '{}' delivered to {} listener(s)", name, delivered);
                }
            },
            ServerFrame::Completion {
                invocation_id,
                result,
                error,
            } => match self.pending.remove(&invocation_id) {
                Some(reply) => {
                    let outcome = match error {
                        Some(message) => Err(LinkError::RemoteError(message)),
                        None => Ok(result.unwrap_or(JsonValue::Null)),
                    };
                    let _ = reply.send(outcome);
                },
                None => {
                    log::debug!(
                        "[pulse-link] Ignoring completion for unknown invocation {}",
                        invocation_id
                    );
                },
            },
            ServerFrame::Ping => {
                if let Some(link) = &self.link {
                    let _ = link.outbound.try_send(ClientFrame::Ping);
                }
            },
            ServerFrame::Close {
                error,
                allow_reconnect,
            } => {
                let reason = CloseReason {
                    message: error.unwrap_or_else(|| "Server closed connection".to_string()),
                    code: None,
                    allow_reconnect,
                };
                self.on_close(reason);
            },
        }
    }

    fn replay_traces(&mut self) {
        let Some(link) = &self.link else {
            return;
        };
        if self.traces.is_empty() {
            return;
        }
        log::info!(
            "[pulse-link] Re-subscribing {} trace(s) after connect",
            self.traces.len()
        );
        for trace_id in &self.traces {
            self.replay_seq += 1;
            let frame = ClientFrame::invocation(
                format!("replay-{}", self.replay_seq),
                methods::SUBSCRIBE_TO_TRACE,
                vec![JsonValue::String(trace_id.clone())],
            );
            if let Err(e) = link.outbound.try_send(frame) {
                log::warn!("[pulse-link] Failed to re-subscribe trace {}: {}", trace_id, e);
            }
        }
    }

    // ── bookkeeping ─────────────────────────────────────────────────────

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state && self.options.debug {
            log::debug!("[pulse-link] State {} -> {}", self.state, state);
        }
        self.state = state;
        self.publish();
    }

    fn publish(&self) {
        self.status_tx.send_replace(HubStatus {
            state: self.state,
            reconnect_attempts: self.reconnect_attempts,
            next_retry_delay: self.retry_delay,
            auth_suspended: self.auth_suspended,
            last_close: self.last_close.clone(),
        });
    }

    fn emit_state(&self, change: StateChange) {
        match serde_json::to_value(&change) {
            Ok(payload) => {
                self.dispatcher
                    .emit(&EventName::ConnectionStateChanged, &payload);
            },
            Err(e) => log::warn!("[pulse-link] Failed to encode state change: {}", e),
        }
    }

    fn fail_pending(&mut self, make_err: impl Fn() -> LinkError) {
        for (_, reply) in self.pending.drain() {
            let _ = reply.send(Err(make_err()));
        }
    }

    fn reply_waiters(&mut self, result: Result<()>) {
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(result.clone());
        }
    }
}

async fn open_connection(
    endpoint: &str,
    tokens: &dyn TokenSource,
    transport: &dyn Transport,
    connection_timeout: Duration,
) -> Result<TransportLink> {
    let token = tokens.token().await.ok_or_else(|| {
        LinkError::AuthenticationError("No access token available".to_string())
    })?;
    validate_token(&token, now_secs())?;

    if HubTimeouts::is_no_timeout(connection_timeout) {
        return transport.open(endpoint, &token).await;
    }
    match tokio::time::timeout(connection_timeout, transport.open(endpoint, &token)).await {
        Ok(result) => result,
        Err(_) => Err(LinkError::TimeoutError(format!(
            "Connection timeout ({:?})",
            connection_timeout
        ))),
    }
}

async fn next_inbound(link: &mut Option<TransportLink>) -> TransportEvent {
    match link {
        Some(link) => link.inbound.recv().await.unwrap_or_else(|| {
            TransportEvent::Closed(CloseReason::new("Transport ended without a close frame"))
        }),
        None => std::future::pending().await,
    }
}

async fn wait_retry(retry: &mut Option<Pin<Box<Sleep>>>) {
    match retry {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}

/// Resolves `true` on rotation, `false` once the source stops notifying.
async fn wait_token_change(changes: &mut Option<watch::Receiver<()>>) -> bool {
    match changes {
        Some(rx) => rx.changed().await.is_ok(),
        None => std::future::pending().await,
    }
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
