use tokio::sync::mpsc;

use super::close_reason::CloseReason;
use crate::error::Result;
use crate::models::{ClientFrame, ServerFrame};

/// What the transport hands back to the hub.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Frame(ServerFrame),
    /// The connection is gone. No further events follow.
    Closed(CloseReason),
}

/// An open push connection, expressed as a pair of channels.
///
/// Dropping `outbound` closes the connection from the client side.
#[derive(Debug)]
pub struct TransportLink {
    pub outbound: mpsc::Sender<ClientFrame>,
    pub inbound: mpsc::Receiver<TransportEvent>,
}

/// Opens push connections for the hub.
///
/// `open` resolves once the connection is usable. A server-side credential
/// rejection during the handshake must be reported as
/// [`LinkError::AuthenticationError`](crate::LinkError::AuthenticationError)
/// so the hub stops retrying.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn open(&self, endpoint: &str, token: &str) -> Result<TransportLink>;
}
