//! Network message types for P2P communication
//!
//! Defines every message exchanged between nodes. `Version` and `Verack`
//! form the handshake; everything else is only accepted from ready peers.

use crate::core::{Block, BlockHeader, Transaction};
use crate::crypto::Hash256;
use bitflags::bitflags;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Protocol version
pub const PROTOCOL_VERSION: u32 = 0;

/// Oldest protocol version we still talk to
pub const MIN_PROTOCOL_VERSION: u32 = 0;

/// Magic bytes for message framing
pub const MAGIC: [u8; 4] = [0x41, 0x6E, 0x74, 0x00];

/// Largest accepted message payload (32 MiB)
pub const MAX_MESSAGE_SIZE: usize = 0x0200_0000;

/// Maximum headers in a single `Headers` response
pub const MAX_HEADERS_PER_MESSAGE: usize = 2000;

/// Maximum hashes in a single inventory message
pub const MAX_INV_HASHES: usize = 500;

/// Maximum addresses in a single `Addr` message
pub const MAX_ADDR_PER_MESSAGE: usize = 200;

/// User agent advertised when none is configured
pub const DEFAULT_USER_AGENT: &str = concat!("/ledger-node:", env!("CARGO_PKG_VERSION"), "/");

bitflags! {
    /// Services offered by a node
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct ServiceFlags: u64 {
        /// Full node serving blocks and transactions
        const NODE_NETWORK = 0x01;
    }
}

/// Version message opening the handshake
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionPayload {
    /// Protocol version
    pub version: u32,
    pub services: ServiceFlags,
    /// Unix timestamp at the time of sending
    pub timestamp: i64,
    /// Port the sender listens on
    pub port: u16,
    /// Random value identifying the sending node
    pub nonce: u32,
    pub user_agent: String,
    /// Sender's chain height; absent when it has no ledger attached
    pub start_height: Option<u32>,
    /// Whether the sender wants transactions relayed to it
    pub relay: bool,
}

/// Static description of this node, fixed at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIdentity {
    pub version: u32,
    pub services: ServiceFlags,
    /// Random value used to detect connections to ourselves
    pub nonce: u32,
    pub user_agent: String,
    pub port: u16,
    pub relay: bool,
}

impl NodeIdentity {
    /// Identity with a fresh random nonce
    pub fn new(port: u16, user_agent: impl Into<String>, relay: bool) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            services: ServiceFlags::NODE_NETWORK,
            nonce: rand::random(),
            user_agent: user_agent.into(),
            port,
            relay,
        }
    }

    /// Version message stamped with the current time and `height`
    pub fn version_payload(&self, height: Option<u32>) -> VersionPayload {
        VersionPayload {
            version: self.version,
            services: self.services,
            timestamp: Utc::now().timestamp(),
            port: self.port,
            nonce: self.nonce,
            user_agent: self.user_agent.clone(),
            start_height: height,
            relay: self.relay,
        }
    }
}

/// Liveness probe carrying the sender's height
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingPayload {
    pub nonce: u32,
    pub height: Option<u32>,
}

/// Locator for `GetHeaders` / `GetBlocks`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetBlocksPayload {
    /// Known hashes, most recent first; the first one we have is the start
    pub hash_start: Vec<Hash256>,
    /// Stop after this hash; zero means "as many as allowed"
    pub hash_stop: Hash256,
}

/// Kind of item an inventory hash refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InventoryType {
    Tx,
    Block,
}

/// Announcement or request of items by hash
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvPayload {
    pub kind: InventoryType,
    pub hashes: Vec<Hash256>,
}

impl InvPayload {
    pub fn new(kind: InventoryType, hashes: Vec<Hash256>) -> Self {
        Self { kind, hashes }
    }
}

/// Why a message was refused
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectPayload {
    /// Command that was rejected
    pub message: String,
    pub reason: String,
    pub hash: Option<Hash256>,
}

/// Network message types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    /// Opens the handshake
    Version(VersionPayload),
    /// Acknowledges a `Version`
    Verack,

    Ping(PingPayload),
    Pong(PingPayload),

    /// Request addresses of other nodes
    GetAddr,
    Addr(Vec<SocketAddr>),

    GetHeaders(GetBlocksPayload),
    Headers(Vec<BlockHeader>),
    /// Answered with an `Inv` of block hashes
    GetBlocks(GetBlocksPayload),

    Inv(InvPayload),
    GetData(InvPayload),
    NotFound(InvPayload),

    Block(Block),
    Tx(Transaction),

    Reject(RejectPayload),
}

impl Message {
    /// Serialize message to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize message from bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }

    /// True for the messages that make up the handshake
    pub fn is_handshake(&self) -> bool {
        matches!(self, Message::Version(_) | Message::Verack)
    }

    /// Get the command name for logging
    pub fn command(&self) -> &'static str {
        match self {
            Message::Version(_) => "version",
            Message::Verack => "verack",
            Message::Ping(_) => "ping",
            Message::Pong(_) => "pong",
            Message::GetAddr => "getaddr",
            Message::Addr(_) => "addr",
            Message::GetHeaders(_) => "getheaders",
            Message::Headers(_) => "headers",
            Message::GetBlocks(_) => "getblocks",
            Message::Inv(_) => "inv",
            Message::GetData(_) => "getdata",
            Message::NotFound(_) => "notfound",
            Message::Block(_) => "block",
            Message::Tx(_) => "tx",
            Message::Reject(_) => "reject",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_serialization() {
        let msg = Message::Ping(PingPayload {
            nonce: 12345,
            height: Some(7),
        });
        let decoded = Message::from_bytes(&msg.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_handshake_classification() {
        let version = Message::Version(VersionPayload {
            version: PROTOCOL_VERSION,
            services: ServiceFlags::NODE_NETWORK,
            timestamp: 0,
            port: 20333,
            nonce: 1,
            user_agent: "test".to_string(),
            start_height: None,
            relay: true,
        });
        assert!(version.is_handshake());
        assert!(Message::Verack.is_handshake());
        assert!(!Message::GetAddr.is_handshake());
        assert_eq!(Message::GetAddr.command(), "getaddr");
    }

    #[test]
    fn test_version_payload_is_fresh() {
        let identity = NodeIdentity::new(20333, DEFAULT_USER_AGENT, true);
        let first = identity.version_payload(Some(1));
        let second = identity.version_payload(Some(2));

        assert_eq!(first.nonce, identity.nonce);
        assert_eq!(first.start_height, Some(1));
        assert_eq!(second.start_height, Some(2));
        assert!(second.timestamp >= first.timestamp);
        assert_eq!(first.user_agent, DEFAULT_USER_AGENT);
    }

    #[test]
    fn test_absent_height_survives_encoding() {
        let msg = Message::Pong(PingPayload {
            nonce: 1,
            height: None,
        });
        let decoded = Message::from_bytes(&msg.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, msg);
    }
}
