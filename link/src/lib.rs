//! # pulse-link
//!
//! Client-side plumbing for realtime dashboards.
//!
//! Two independent pieces:
//!
//! - [`RealtimeHub`]: a persistent push connection with authenticated
//!   connects, exponential-backoff reconnects, a process-wide
//!   [`AuthFailureFlag`] that stops retry storms after the server rejects a
//!   token, and an [`EventDispatcher`] fanning server events out to listeners.
//! - [`BoundedTaskProcessor`]: runs heavy data transforms on an isolated
//!   worker thread with a hard concurrency ceiling and per-operation timeouts.
//!
//! ## Example
//!
//! ```rust,no_run
//! use pulse_link::{BoundedTaskProcessor, EventName, RealtimeHub};
//! use pulse_link::processor::FilterOptions;
//! use pulse_link::processor::FilterOp;
//! use serde_json::json;
//!
//! # async fn example() -> pulse_link::Result<()> {
//! let hub = RealtimeHub::builder()
//!     .endpoint("https://api.example.com/hubs/reasoning")
//!     .token("eyJhbGc...")
//!     .build()?;
//! let _sub = hub.subscribe(EventName::TraceCompleted, |payload| {
//!     println!("trace done: {}", payload);
//! });
//! hub.connect().await?;
//!
//! let processor = BoundedTaskProcessor::new(Default::default());
//! let passing = processor
//!     .filter(
//!         vec![json!({"score": 0.9}), json!({"score": 0.2})],
//!         FilterOptions::new("score", FilterOp::Gte, json!(0.5)),
//!     )
//!     .await?;
//! assert_eq!(passing.len(), 1);
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod config;
pub mod connection;
pub mod error;
pub mod event_dispatcher;
pub mod hub;
pub mod models;
pub mod processor;
pub mod timeouts;

pub use auth::{
    inspect_token, validate_token, ArcTokenSource, AuthFailureFlag, RotatingTokenSource,
    StaticTokenSource, TokenClaims, TokenSource,
};
pub use config::LinkConfig;
pub use connection::{CloseReason, Transport, TransportEvent, TransportLink, WsTransport};
pub use error::{LinkError, Result};
pub use event_dispatcher::{EventDispatcher, EventName, Listener, ListenerId, Subscription};
pub use hub::{RealtimeHub, RealtimeHubBuilder};
pub use models::{
    ClientFrame, ConnectionState, HubOptions, HubStatus, Operation, OperationStatus,
    ProcessorOptions, ProcessorStats, ServerFrame, StateChange, TaskKind, WorkerOutcome,
    WorkerRequest, WorkerResponse,
};
pub use processor::{
    BoundedTaskProcessor, IsolatedWorker, PendingOperation, ThreadWorkerSpawner, WorkerEvent,
    WorkerReplies, WorkerSpawner,
};
pub use timeouts::HubTimeouts;
