//! Cryptographic utilities
//!
//! This module provides:
//! - SHA-256 hashing and the `Hash256` chain identifier
//! - Validator keys (secp256k1) and addresses
//! - Merkle root calculation

pub mod hash;
pub mod keys;
pub mod merkle;

pub use hash::{double_sha256, sha256, Hash256, HashParseError, HASH_SIZE};
pub use keys::{public_key_from_hex, public_key_to_address, KeyError, KeyPair, ValidatorKey};
pub use merkle::calculate_merkle_root;
