//! Token sources for the realtime hub.
//!
//! Use a [`TokenSource`] to supply bearer tokens lazily. The hub calls
//! [`TokenSource::token`] on every connect or reconnect, so rotated tokens
//! are picked up without rebuilding the hub.
//!
//! ```rust,no_run
//! use pulse_link::TokenSource;
//!
//! struct SessionStore { /* ... */ }
//!
//! #[async_trait::async_trait]
//! impl TokenSource for SessionStore {
//!     async fn token(&self) -> Option<String> {
//!         // read or refresh the session token here
//!         Some("eyJhbGc...".into())
//!     }
//! }
//! ```

use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::watch;

/// Async token provider consulted before every connection attempt.
#[async_trait::async_trait]
pub trait TokenSource: Send + Sync + 'static {
    /// Return the current token, or `None` when no session exists.
    async fn token(&self) -> Option<String>;

    /// Change notifications, if this source can rotate its token.
    ///
    /// The hub re-reads and re-validates the token whenever the receiver
    /// reports a change.
    fn changes(&self) -> Option<watch::Receiver<()>> {
        None
    }
}

/// A boxed, reference-counted [`TokenSource`].
pub type ArcTokenSource = Arc<dyn TokenSource>;

/// A token fixed at construction time.
#[derive(Debug, Clone)]
pub struct StaticTokenSource {
    token: Option<String>,
}

impl StaticTokenSource {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }

    /// A source that never yields a token.
    pub fn none() -> Self {
        Self { token: None }
    }
}

#[async_trait::async_trait]
impl TokenSource for StaticTokenSource {
    async fn token(&self) -> Option<String> {
        self.token.clone()
    }
}

/// A token that can be replaced at runtime, notifying the hub on change.
///
/// Cloning shares the same underlying slot, so the clone kept by the session
/// layer and the one handed to the hub always agree.
#[derive(Debug, Clone)]
pub struct RotatingTokenSource {
    current: Arc<RwLock<Option<String>>>,
    notify: Arc<watch::Sender<()>>,
}

impl RotatingTokenSource {
    pub fn new(initial: Option<String>) -> Self {
        let (notify, _) = watch::channel(());
        Self {
            current: Arc::new(RwLock::new(initial)),
            notify: Arc::new(notify),
        }
    }

    /// Replace the token and notify every watching hub.
    pub fn rotate(&self, token: Option<String>) {
        *self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner) = token;
        self.notify.send_replace(());
    }

    /// Current token without going through the async trait.
    pub fn current(&self) -> Option<String> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait::async_trait]
impl TokenSource for RotatingTokenSource {
    async fn token(&self) -> Option<String> {
        self.current()
    }

    fn changes(&self) -> Option<watch::Receiver<()>> {
        Some(self.notify.subscribe())
    }
}
