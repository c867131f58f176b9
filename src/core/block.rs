//! Block implementation for the ledger
//!
//! A block contains a header with metadata and a list of transactions. The
//! block hash is the double SHA-256 of the header, so a header alone is
//! enough to identify and link a block.

use crate::core::transaction::{Transaction, TransactionError};
use crate::crypto::{calculate_merkle_root, Hash256};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// Block Constants
// =============================================================================

/// Current block version
pub const BLOCK_VERSION: u32 = 0;

/// Maximum number of transactions per block
pub const MAX_BLOCK_TXS: usize = 65_535;

// =============================================================================
// Block Errors
// =============================================================================

/// Block validation errors
#[derive(Error, Debug, PartialEq)]
pub enum BlockError {
    #[error("Too many transactions: {0} (max: {1})")]
    TooManyTransactions(usize, usize),
    #[error("Invalid merkle root")]
    InvalidMerkleRoot,
    #[error("Invalid transaction {hash}: {source}")]
    InvalidTransaction {
        hash: Hash256,
        source: TransactionError,
    },
    #[error("Duplicate transaction {0} in block")]
    DuplicateTransaction(Hash256),
}

/// Block header containing metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Block version
    pub version: u32,
    /// Hash of the previous block
    pub previous_hash: Hash256,
    /// Merkle root of all transactions
    pub merkle_root: Hash256,
    /// Block creation timestamp
    pub timestamp: DateTime<Utc>,
    /// Height of the block in the chain
    pub height: u32,
    /// Arbitrary value chosen by the block producer
    pub nonce: u64,
}

impl BlockHeader {
    /// Calculate the hash of the block header
    pub fn hash(&self) -> Hash256 {
        let mut data = Vec::with_capacity(88);
        data.extend_from_slice(&self.version.to_le_bytes());
        data.extend_from_slice(self.previous_hash.as_bytes());
        data.extend_from_slice(self.merkle_root.as_bytes());
        data.extend_from_slice(&self.timestamp.timestamp().to_le_bytes());
        data.extend_from_slice(&self.height.to_le_bytes());
        data.extend_from_slice(&self.nonce.to_le_bytes());
        Hash256::digest(&data)
    }
}

/// A block in the chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Block header
    pub header: BlockHeader,
    /// List of transactions in the block
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Create a new block on top of `previous_hash`
    pub fn new(height: u32, previous_hash: Hash256, transactions: Vec<Transaction>) -> Self {
        Self::with_timestamp(height, previous_hash, transactions, Utc::now())
    }

    pub fn with_timestamp(
        height: u32,
        previous_hash: Hash256,
        transactions: Vec<Transaction>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let merkle_root = Self::calculate_merkle_root(&transactions);

        let header = BlockHeader {
            version: BLOCK_VERSION,
            previous_hash,
            merkle_root,
            // Second precision, matching what the hash commits to
            timestamp: Utc
                .timestamp_opt(timestamp.timestamp(), 0)
                .single()
                .unwrap_or(timestamp),
            height,
            nonce: rand::random(),
        };

        Self {
            header,
            transactions,
        }
    }

    fn calculate_merkle_root(transactions: &[Transaction]) -> Hash256 {
        let hashes: Vec<Hash256> = transactions.iter().map(|tx| tx.hash).collect();
        calculate_merkle_root(&hashes)
    }

    pub fn hash(&self) -> Hash256 {
        self.header.hash()
    }

    pub fn height(&self) -> u32 {
        self.header.height
    }

    /// Verify the block's merkle root
    pub fn verify_merkle_root(&self) -> bool {
        Self::calculate_merkle_root(&self.transactions) == self.header.merkle_root
    }

    /// Sum of the system fees of all transactions in this block, or `None`
    /// if it does not fit in a `u64`
    pub fn system_fee(&self) -> Option<u64> {
        self.transactions
            .iter()
            .try_fold(0u64, |total, tx| total.checked_add(tx.system_fee))
    }

    /// Context-free validation: size, merkle root and every transaction
    pub fn validate(&self) -> Result<(), BlockError> {
        let tx_count = self.transactions.len();
        if tx_count > MAX_BLOCK_TXS {
            return Err(BlockError::TooManyTransactions(tx_count, MAX_BLOCK_TXS));
        }

        if !self.verify_merkle_root() {
            return Err(BlockError::InvalidMerkleRoot);
        }

        let mut seen = std::collections::HashSet::with_capacity(tx_count);
        for tx in &self.transactions {
            tx.validate()
                .map_err(|source| BlockError::InvalidTransaction {
                    hash: tx.hash,
                    source,
                })?;
            if !seen.insert(tx.hash) {
                return Err(BlockError::DuplicateTransaction(tx.hash));
            }
        }

        Ok(())
    }
}
