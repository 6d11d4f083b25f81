//! Realtime hub: one persistent push connection per endpoint.
//!
//! The hub negotiates authentication on every connection attempt, reconnects
//! with exponential backoff after unexpected closes, stops retrying when the
//! server rejects the token, and fans pushed events out through an
//! [`EventDispatcher`].
//!
//! # Example
//!
//! ```rust,no_run
//! use pulse_link::{EventName, RealtimeHub, StaticTokenSource};
//!
//! # async fn example() -> pulse_link::Result<()> {
//! let hub = RealtimeHub::builder()
//!     .endpoint("https://api.example.com/hubs/reasoning")
//!     .token_source(StaticTokenSource::new("eyJhbGc..."))
//!     .build()?;
//!
//! let _sub = hub.subscribe(EventName::StepCompleted, |payload| {
//!     println!("step: {}", payload);
//! });
//!
//! hub.connect().await?;
//! hub.subscribe_to_trace("trace-42").await?;
//! # Ok(())
//! # }
//! ```

mod backoff;
mod task;

use crate::{
    auth::{ArcTokenSource, AuthFailureFlag, StaticTokenSource, TokenSource},
    connection::{resolve_ws_url, Transport, WsTransport},
    error::{LinkError, Result},
    event_dispatcher::{EventDispatcher, EventName, Subscription},
    models::{ConnectionState, HubOptions, HubStatus},
    timeouts::HubTimeouts,
};
use serde::de::DeserializeOwned;
use serde_json::{json, Value as JsonValue};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use task::{HubCmd, HubConfig, HubTask};

const COMMAND_CHANNEL_CAPACITY: usize = 256;

/// Server method names used by the trace helpers.
pub mod methods {
    pub const SUBSCRIBE_TO_TRACE: &str = "SubscribeToTrace";
    pub const UNSUBSCRIBE_FROM_TRACE: &str = "UnsubscribeFromTrace";
    pub const GET_STATUS: &str = "GetStatus";
}

/// Handle to a push connection managed by a background task.
///
/// Dropping the handle stops the task and closes the connection.
pub struct RealtimeHub {
    cmd_tx: mpsc::Sender<HubCmd>,
    dispatcher: EventDispatcher,
    status_rx: watch::Receiver<HubStatus>,
    auth_failure_flag: AuthFailureFlag,
    timeouts: HubTimeouts,
    endpoint: String,
    next_invocation_id: AtomicU64,
    _task: JoinHandle<()>,
}

impl std::fmt::Debug for RealtimeHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeHub")
            .field("endpoint", &self.endpoint)
            .field("state", &self.state())
            .finish()
    }
}

impl RealtimeHub {
    pub fn builder() -> RealtimeHubBuilder {
        RealtimeHubBuilder::default()
    }

    /// Open the connection.
    ///
    /// Returns immediately when already connected. Concurrent calls share the
    /// attempt in flight and all receive its outcome. Never blocked by the
    /// authentication failure flag.
    pub async fn connect(&self) -> Result<()> {
        let (reply, reply_rx) = oneshot::channel();
        self.send(HubCmd::Connect { reply }).await?;
        reply_rx.await.map_err(|_| task_gone())?
    }

    /// Close the connection, cancel any pending retry, reject outstanding
    /// invocations and drop every event registration.
    pub async fn disconnect(&self) {
        let (reply, reply_rx) = oneshot::channel();
        if self.send(HubCmd::Disconnect { reply }).await.is_ok() {
            let _ = reply_rx.await;
        }
    }

    /// Register a listener. Works in any connection state.
    pub fn subscribe(
        &self,
        event: impl Into<EventName>,
        listener: impl Fn(&JsonValue) + Send + Sync + 'static,
    ) -> Subscription {
        self.dispatcher.subscribe(event, listener)
    }

    /// Register a listener that receives the payload deserialized as `T`.
    pub fn subscribe_typed<T, F>(&self, event: impl Into<EventName>, listener: F) -> Subscription
    where
        T: DeserializeOwned,
        F: Fn(T) + Send + Sync + 'static,
    {
        self.dispatcher.subscribe_typed(event, listener)
    }

    /// The dispatcher shared with the connection task.
    pub fn events(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    /// Call a server method and wait for its completion.
    ///
    /// Fails with [`LinkError::NotConnected`] unless the hub is connected.
    pub async fn invoke(&self, target: &str, arguments: Vec<JsonValue>) -> Result<JsonValue> {
        let invocation_id = self
            .next_invocation_id
            .fetch_add(1, Ordering::Relaxed)
            .to_string();
        let (reply, reply_rx) = oneshot::channel();
        self.send(HubCmd::Invoke {
            invocation_id: invocation_id.clone(),
            target: target.to_string(),
            arguments,
            reply,
        })
        .await?;

        let timeout = self.timeouts.invoke_timeout;
        if HubTimeouts::is_no_timeout(timeout) {
            return reply_rx.await.map_err(|_| task_gone())?;
        }
        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(reply) => reply.map_err(|_| task_gone())?,
            Err(_) => {
                let _ = self.cmd_tx.try_send(HubCmd::CancelInvocation { invocation_id });
                Err(LinkError::TimeoutError(format!(
                    "Invocation '{}' timed out after {:?}",
                    target, timeout
                )))
            },
        }
    }

    /// [`invoke`](Self::invoke) and deserialize the result.
    pub async fn invoke_as<T: DeserializeOwned>(
        &self,
        target: &str,
        arguments: Vec<JsonValue>,
    ) -> Result<T> {
        let value = self.invoke(target, arguments).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Ask the server to push updates for a trace.
    ///
    /// Successful subscriptions are replayed after every reconnect.
    pub async fn subscribe_to_trace(&self, trace_id: &str) -> Result<()> {
        self.invoke(methods::SUBSCRIBE_TO_TRACE, vec![json!(trace_id)])
            .await?;
        self.send(HubCmd::TrackTrace {
            trace_id: trace_id.to_string(),
            subscribed: true,
        })
        .await
    }

    pub async fn unsubscribe_from_trace(&self, trace_id: &str) -> Result<()> {
        self.send(HubCmd::TrackTrace {
            trace_id: trace_id.to_string(),
            subscribed: false,
        })
        .await?;
        self.invoke(methods::UNSUBSCRIBE_FROM_TRACE, vec![json!(trace_id)])
            .await
            .map(|_| ())
    }

    /// Server-side status report.
    pub async fn get_status(&self) -> Result<JsonValue> {
        self.invoke(methods::GET_STATUS, Vec::new()).await
    }

    pub fn status(&self) -> HubStatus {
        self.status_rx.borrow().clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.status_rx.borrow().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.status_rx.borrow().reconnect_attempts
    }

    /// A receiver that observes every status change.
    pub fn watch_status(&self) -> watch::Receiver<HubStatus> {
        self.status_rx.clone()
    }

    pub fn auth_failure_flag(&self) -> &AuthFailureFlag {
        &self.auth_failure_flag
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn send(&self, cmd: HubCmd) -> Result<()> {
        self.cmd_tx.send(cmd).await.map_err(|_| task_gone())
    }
}

impl Drop for RealtimeHub {
    fn drop(&mut self) {
        let _ = self.cmd_tx.try_send(HubCmd::Shutdown);
    }
}

fn task_gone() -> LinkError {
    LinkError::NotConnected("Connection task is not running".to_string())
}

/// Builder for [`RealtimeHub`].
#[derive(Default)]
pub struct RealtimeHubBuilder {
    endpoint: Option<String>,
    token_source: Option<ArcTokenSource>,
    transport: Option<Arc<dyn Transport>>,
    options: HubOptions,
    timeouts: HubTimeouts,
    auth_failure_flag: Option<AuthFailureFlag>,
}

impl RealtimeHubBuilder {
    /// Push endpoint. `http(s)` URLs are mapped to `ws(s)`.
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn token_source(mut self, source: impl TokenSource) -> Self {
        self.token_source = Some(Arc::new(source));
        self
    }

    pub fn token_source_arc(mut self, source: ArcTokenSource) -> Self {
        self.token_source = Some(source);
        self
    }

    /// Shorthand for a [`StaticTokenSource`].
    pub fn token(self, token: impl Into<String>) -> Self {
        self.token_source(StaticTokenSource::new(token))
    }

    /// Replace the default WebSocket transport.
    pub fn transport(mut self, transport: impl Transport) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    pub fn transport_arc(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn options(mut self, options: HubOptions) -> Self {
        self.options = options;
        self
    }

    pub fn timeouts(mut self, timeouts: HubTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Share a failure flag other than the process-wide one.
    pub fn auth_failure_flag(mut self, flag: AuthFailureFlag) -> Self {
        self.auth_failure_flag = Some(flag);
        self
    }

    /// Validate the configuration and start the connection task.
    ///
    /// Must be called from within a Tokio runtime. Does not connect.
    pub fn build(self) -> Result<RealtimeHub> {
        let endpoint = self
            .endpoint
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty())
            .ok_or_else(|| LinkError::ConfigurationError("endpoint is required".to_string()))?;
        let tokens = self.token_source.ok_or_else(|| {
            LinkError::ConfigurationError("token source is required".to_string())
        })?;
        if self.options.base_delay_ms > self.options.max_delay_ms {
            return Err(LinkError::ConfigurationError(format!(
                "base_delay_ms ({}) must not exceed max_delay_ms ({})",
                self.options.base_delay_ms, self.options.max_delay_ms
            )));
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            LinkError::ConfigurationError(
                "RealtimeHub must be built inside a Tokio runtime".to_string(),
            )
        })?;

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => {
                resolve_ws_url(&endpoint)?;
                Arc::new(
                    WsTransport::new(self.timeouts.clone()).with_debug(self.options.debug),
                )
            },
        };
        let flag = self.auth_failure_flag.unwrap_or_else(AuthFailureFlag::global);
        let dispatcher = EventDispatcher::new();
        let (status_tx, status_rx) = watch::channel(HubStatus::default());
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);

        let task = HubTask::new(
            HubConfig {
                endpoint: endpoint.clone(),
                tokens,
                transport,
                options: self.options,
                timeouts: self.timeouts.clone(),
                flag: flag.clone(),
                dispatcher: dispatcher.clone(),
            },
            status_tx,
        );
        let handle = runtime.spawn(task.run(cmd_rx));

        Ok(RealtimeHub {
            cmd_tx,
            dispatcher,
            status_rx,
            auth_failure_flag: flag,
            timeouts: self.timeouts,
            endpoint,
            next_invocation_id: AtomicU64::new(1),
            _task: handle,
        })
    }
}
