//! Ledger state accessor
//!
//! The read-only query surface over the canonical chain that protocol
//! handlers and validation code depend on. Appending blocks is the job of
//! whoever owns the concrete ledger; nothing behind this trait mutates.

use crate::core::block::{Block, BlockError, BlockHeader};
use crate::core::transaction::{OutPoint, Transaction, TransactionOutput};
use crate::core::unspent::UnspentOutputs;
use crate::crypto::{Hash256, ValidatorKey};
use std::fmt;
use thiserror::Error;

/// What a failed lookup was keyed by
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupKey {
    Height(u32),
    Hash(Hash256),
    Output(OutPoint),
}

impl fmt::Display for LookupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LookupKey::Height(height) => write!(f, "height {}", height),
            LookupKey::Hash(hash) => write!(f, "hash {}", hash),
            LookupKey::Output(outpoint) => write!(f, "output {}", outpoint),
        }
    }
}

/// Ledger query and import errors
#[derive(Error, Debug, PartialEq)]
pub enum LedgerError {
    #[error("Not found: {0}")]
    NotFound(LookupKey),
    #[error("Output {0} already spent")]
    AlreadySpent(OutPoint),
    #[error("Invalid block: {0}")]
    InvalidBlock(#[from] BlockError),
    #[error("Unexpected height: expected {expected}, got {got}")]
    UnexpectedHeight { expected: u32, got: u32 },
    #[error("Block at height {0} does not link to its predecessor")]
    PreviousHashMismatch(u32),
    #[error("Block at height {0} does not match the known header")]
    HeaderMismatch(u32),
    #[error("Transaction {0} is already in the chain")]
    DuplicateTransaction(Hash256),
    #[error("Transaction {tx} double spends {input}")]
    DoubleSpend { tx: Hash256, input: OutPoint },
    #[error("System fees overflow at height {0}")]
    FeeOverflow(u32),
}

impl LedgerError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, LedgerError::NotFound(_))
    }
}

/// Query contract over canonical chain state
///
/// Keyed lookups are hash map or vector lookups; none of them walks the
/// chain from genesis.
pub trait Ledger: Send + Sync {
    /// Height of the highest block in the canonical chain
    fn height(&self) -> u32;

    /// Height of the highest known header, never below `height()`
    fn header_height(&self) -> u32;

    fn contains_block(&self, hash: &Hash256) -> bool;

    /// True if the transaction was included in a canonical block
    fn contains_transaction(&self, hash: &Hash256) -> bool;

    fn contains_unspent_ref(&self, outpoint: &OutPoint) -> bool;

    fn contains_unspent(&self, hash: &Hash256, index: u32) -> bool {
        self.contains_unspent_ref(&OutPoint::new(*hash, index))
    }

    fn get_block(&self, height: u32) -> Result<&Block, LedgerError>;

    fn get_block_by_hash(&self, hash: &Hash256) -> Result<&Block, LedgerError>;

    /// Hash of the block at `height`; NotFound above the current height
    fn get_block_hash(&self, height: u32) -> Result<Hash256, LedgerError>;

    fn get_header(&self, height: u32) -> Result<&BlockHeader, LedgerError>;

    fn get_header_by_hash(&self, hash: &Hash256) -> Result<&BlockHeader, LedgerError>;

    /// Hash of the block following `hash`; NotFound for the tip or an unknown hash
    fn get_next_block_hash(&self, hash: &Hash256) -> Result<Hash256, LedgerError>;

    fn get_next_block(&self, hash: &Hash256) -> Result<&Block, LedgerError> {
        let next = self.get_next_block_hash(hash)?;
        self.get_block_by_hash(&next)
    }

    /// Validator set as if `pending` were applied on top of the chain.
    /// Committed state is left untouched.
    fn get_validators_with(&self, pending: &[Transaction]) -> Vec<ValidatorKey>;

    /// Active validator set at the current height
    fn get_validators(&self) -> Vec<ValidatorKey> {
        self.get_validators_with(&[])
    }

    /// Cumulative system fee through the block at `height`
    fn get_sys_fee_amount(&self, height: u32) -> Result<u64, LedgerError>;

    fn get_sys_fee_amount_by_hash(&self, hash: &Hash256) -> Result<u64, LedgerError> {
        let height = self.get_header_by_hash(hash)?.height;
        self.get_sys_fee_amount(height)
    }

    /// Transaction and the height of the block containing it
    fn get_transaction_with_height(
        &self,
        hash: &Hash256,
    ) -> Result<(&Transaction, u32), LedgerError>;

    fn get_transaction(&self, hash: &Hash256) -> Result<&Transaction, LedgerError> {
        self.get_transaction_with_height(hash).map(|(tx, _)| tx)
    }

    /// The output if unspent. NotFound when it never existed, AlreadySpent
    /// when a canonical transaction consumed it.
    fn get_unspent(&self, hash: &Hash256, index: u32) -> Result<&TransactionOutput, LedgerError>;

    /// Every unspent output of a transaction, lazily, in index order
    fn get_unspent_outputs(&self, hash: &Hash256) -> UnspentOutputs<'_>;

    /// True if any input of `tx` is not currently unspent
    fn is_double_spend(&self, tx: &Transaction) -> bool {
        tx.inputs
            .iter()
            .any(|input| !self.contains_unspent_ref(input))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = LedgerError::NotFound(LookupKey::Height(7));
        assert_eq!(err.to_string(), "Not found: height 7");
        assert!(err.is_not_found());

        let outpoint = OutPoint::new(Hash256::ZERO, 1);
        let spent = LedgerError::AlreadySpent(outpoint);
        assert!(spent.to_string().ends_with(":1 already spent"));
        assert!(!spent.is_not_found());
    }
}
