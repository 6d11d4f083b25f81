//! Push connection plumbing.
//!
//! This module contains:
//! - [`transport`]: the [`Transport`] seam the hub opens connections through
//! - [`websocket`]: the default WebSocket implementation
//! - [`close_reason`]: classification of connection closes

pub mod close_reason;
pub mod transport;
pub mod websocket;

pub use close_reason::CloseReason;
pub use transport::{Transport, TransportEvent, TransportLink};
pub use websocket::{resolve_ws_url, WsTransport};
