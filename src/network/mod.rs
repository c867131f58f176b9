//! P2P Networking module
//!
//! Connection management and the node protocol.
//!
//! # Features
//! - `LocalNode` coordinator with start/stop generations
//! - Handshake gate with access control and a connection limit
//! - Paced per-peer receive loops
//! - Protocol handler answering chain queries and relaying transactions
//! - TCP transport with length-prefixed framing

pub mod acl;
pub mod delay;
pub mod handler;
pub mod message;
pub mod node;
pub mod peer;
pub mod peer_set;
pub mod tcp;

#[cfg(test)]
pub(crate) mod testing;

pub use acl::{AccessControl, AclAction, AclConfig, AclError, AclRule};
pub use delay::{Delayer, TokioDelayer};
pub use handler::{MessageHandler, ProtocolHandler};
pub use message::{
    GetBlocksPayload, InvPayload, InventoryType, Message, NodeIdentity, PingPayload,
    RejectPayload, ServiceFlags, VersionPayload, DEFAULT_USER_AGENT, MAGIC, MAX_MESSAGE_SIZE,
    MIN_PROTOCOL_VERSION, PROTOCOL_VERSION,
};
pub use node::{LocalNode, LocalNodeBuilder, NodeError, NodeStatus};
pub use peer::{same_peer, Peer, PeerError, PeerFactory, PeerListener};
pub use peer_set::{PeerSet, DEFAULT_MAX_PEERS};
pub use tcp::{MessageCodec, TcpPeer, TcpPeerFactory, TcpPeerListener};
