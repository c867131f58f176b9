//! Peer abstractions
//!
//! A `Peer` is one remote connection. Peers come from a `PeerFactory`
//! (outbound) or a `PeerListener` (inbound); the node only relies on the
//! contracts defined here.

use crate::network::message::Message;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Peer connection errors
#[derive(Error, Debug)]
pub enum PeerError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Connection to {0} timed out")]
    Timeout(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Peer disconnected")]
    Disconnected,
    #[error("Peer {0} denied by access control")]
    Denied(SocketAddr),
    #[error("Malformed handshake: {0}")]
    MalformedHandshake(String),
    #[error("Protocol violation: {0}")]
    Misbehaving(String),
    #[error("Peer {0} is already connected")]
    AlreadyConnected(SocketAddr),
    #[error("Max peers reached")]
    MaxPeersReached,
    #[error("Node is not accepting peers")]
    Closed,
}

/// One remote node connection
#[async_trait]
pub trait Peer: Send + Sync {
    /// Remote address
    fn address(&self) -> SocketAddr;

    /// Queue a message for delivery
    async fn send(&self, message: Message) -> Result<(), PeerError>;

    /// Next inbound message; `None` once the connection is closed
    async fn receive(&self) -> Option<Message>;

    fn is_connected(&self) -> bool;

    /// True once the handshake completed
    fn is_ready(&self) -> bool;

    /// Record handshake completion
    fn mark_ready(&self);

    /// Close the connection. Calling it again has no effect.
    async fn disconnect(&self);
}

/// Opens outbound connections
#[async_trait]
pub trait PeerFactory: Send + Sync {
    /// Connect to `endpoint` (`host:port`), failing after the factory's own timeout
    async fn connect_to(&self, endpoint: &str) -> Result<Arc<dyn Peer>, PeerError>;
}

/// Accepts inbound connections and reports each one on `events`
#[async_trait]
pub trait PeerListener: Send + Sync {
    async fn start(&self, events: mpsc::Sender<Arc<dyn Peer>>) -> Result<(), PeerError>;

    /// Stop accepting; a listener that is not running ignores this
    async fn stop(&self);
}

/// Compare peers by identity rather than by address
pub fn same_peer(a: &Arc<dyn Peer>, b: &Arc<dyn Peer>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}
