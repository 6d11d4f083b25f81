use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::connection::CloseReason;

/// Lifecycle state of the hub's push connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Waiting on a backoff timer before the next attempt.
    Reconnecting,
    /// Gave up after too many consecutive failures.
    Failed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of the hub published on every transition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HubStatus {
    pub state: ConnectionState,
    /// Consecutive failed (re)connects since the last success.
    pub reconnect_attempts: u32,
    /// Delay of the retry currently scheduled, if any.
    pub next_retry_delay: Option<Duration>,
    /// Automatic reconnects are paused until a fresh token arrives.
    pub auth_suspended: bool,
    pub last_close: Option<CloseReason>,
}

/// State label carried by `connectionStateChanged` events.
///
/// Adds `error` to the connection states for failed attempts that do not
/// change the lifecycle state on their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportedState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
    Error,
}

impl From<ConnectionState> for ReportedState {
    fn from(state: ConnectionState) -> Self {
        match state {
            ConnectionState::Disconnected => Self::Disconnected,
            ConnectionState::Connecting => Self::Connecting,
            ConnectionState::Connected => Self::Connected,
            ConnectionState::Reconnecting => Self::Reconnecting,
            ConnectionState::Failed => Self::Failed,
        }
    }
}

/// Payload of the `connectionStateChanged` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateChange {
    pub state: ReportedState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Consecutive failures so far, for `reconnecting` and `failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_retry_ms: Option<u64>,
}

impl StateChange {
    pub fn new(state: impl Into<ReportedState>) -> Self {
        Self {
            state: state.into(),
            error: None,
            attempt: None,
            next_retry_ms: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::new(ReportedState::Error)
        }
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }

    pub fn with_next_retry(mut self, delay: Duration) -> Self {
        self.next_retry_ms = Some(delay.as_millis() as u64);
        self
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error = Some(message.into());
        self
    }
}
