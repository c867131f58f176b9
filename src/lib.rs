//! Ledger-Node: peer coordination and ledger state for a UTXO blockchain
//!
//! This crate provides:
//! - An in-memory canonical chain with height, hash and transaction indexes
//! - Unspent output tracking and double-spend checks
//! - Stake-weighted validator election with pending-transaction previews
//! - Cumulative system fees per block
//! - A local node that admits, paces and disconnects peers
//! - Access control lists over IP addresses and networks
//!
//! # Example
//!
//! ```rust
//! use ledger_node::core::{Blockchain, ChainSettings, Ledger};
//! use ledger_node::crypto::KeyPair;
//!
//! let validator = KeyPair::generate().validator_key();
//! let chain = Blockchain::new(ChainSettings::new(vec![validator]));
//!
//! assert_eq!(chain.height(), 0);
//! assert_eq!(chain.get_validators(), vec![validator]);
//! let genesis = chain.get_block_hash(0).unwrap();
//! assert!(chain.get_next_block_hash(&genesis).is_err());
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod crypto;
pub mod network;

// Re-export commonly used types
pub use config::{ConfigError, NetworkConfig, Settings};
pub use core::{Block, Blockchain, ChainSettings, Ledger, LedgerError, Transaction};
pub use crypto::{Hash256, KeyPair, ValidatorKey};
pub use network::{LocalNode, NodeStatus, PeerSet, ProtocolHandler};
