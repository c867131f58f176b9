//! Transaction handling for the ledger
//!
//! Implements a UTXO-based transaction model. Every transaction spends zero
//! or more previously created outputs and creates one or more new ones.
//! Enrollment transactions additionally register a validator candidate.

use crate::crypto::{Hash256, ValidatorKey};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

// =============================================================================
// Constants
// =============================================================================

/// Current transaction version
pub const TX_VERSION: u8 = 0;

/// Maximum number of inputs or outputs in a single transaction
pub const MAX_TX_IO: usize = u16::MAX as usize;

// =============================================================================
// Error Types
// =============================================================================

/// Transaction-related errors
#[derive(Error, Debug, PartialEq)]
pub enum TransactionError {
    #[error("Transaction has no outputs")]
    NoOutputs,
    #[error("Contract transaction has no inputs")]
    NoInputs,
    #[error("Output {0} has zero amount")]
    ZeroAmount(usize),
    #[error("Input {0} is referenced more than once")]
    DuplicateInput(OutPoint),
    #[error("Too many inputs or outputs: {0}")]
    TooManyEntries(usize),
    #[error("Output amounts overflow")]
    OutputOverflow,
    #[error("Hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: Hash256, actual: Hash256 },
}

// =============================================================================
// Output reference
// =============================================================================

/// Reference to an output of a previous transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutPoint {
    /// Hash of the transaction that created the output
    pub hash: Hash256,
    /// Position of the output in that transaction
    pub index: u32,
}

impl OutPoint {
    pub fn new(hash: Hash256, index: u32) -> Self {
        Self { hash, index }
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.hash, self.index)
    }
}

// =============================================================================
// Transaction Output
// =============================================================================

/// Transaction output
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransactionOutput {
    /// Asset being transferred
    pub asset_id: Hash256,
    /// Amount of the asset
    pub amount: u64,
    /// Recipient's address
    pub recipient: String,
}

impl TransactionOutput {
    pub fn new(asset_id: Hash256, amount: u64, recipient: impl Into<String>) -> Self {
        Self {
            asset_id,
            amount,
            recipient: recipient.into(),
        }
    }
}

// =============================================================================
// Transaction
// =============================================================================

/// What a transaction does besides moving outputs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionKind {
    /// Creates new outputs without spending anything (genesis, rewards)
    Issue,
    /// Plain transfer of existing outputs
    Contract,
    /// Registers `validator` as a candidate; its governing-asset outputs are the stake
    Enrollment { validator: ValidatorKey },
}

impl TransactionKind {
    fn tag(&self) -> u8 {
        match self {
            TransactionKind::Issue => 0x01,
            TransactionKind::Contract => 0x80,
            TransactionKind::Enrollment { .. } => 0x20,
        }
    }
}

/// A ledger transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub version: u8,
    pub kind: TransactionKind,
    pub inputs: Vec<OutPoint>,
    pub outputs: Vec<TransactionOutput>,
    /// Fee charged by the system, accumulated per block
    #[serde(default)]
    pub system_fee: u64,
    /// Distinguishes otherwise identical transactions
    pub nonce: u64,
    /// Cached hash of the fields above
    pub hash: Hash256,
}

impl Transaction {
    fn build(kind: TransactionKind, inputs: Vec<OutPoint>, outputs: Vec<TransactionOutput>) -> Self {
        let mut tx = Self {
            version: TX_VERSION,
            kind,
            inputs,
            outputs,
            system_fee: 0,
            nonce: rand::random(),
            hash: Hash256::ZERO,
        };
        tx.hash = tx.calculate_hash();
        tx
    }

    /// Create an issue transaction minting new outputs
    pub fn issue(outputs: Vec<TransactionOutput>) -> Self {
        Self::build(TransactionKind::Issue, Vec::new(), outputs)
    }

    /// Create a transfer spending `inputs`
    pub fn contract(inputs: Vec<OutPoint>, outputs: Vec<TransactionOutput>) -> Self {
        Self::build(TransactionKind::Contract, inputs, outputs)
    }

    /// Create a validator enrollment
    pub fn enrollment(
        validator: ValidatorKey,
        inputs: Vec<OutPoint>,
        outputs: Vec<TransactionOutput>,
    ) -> Self {
        Self::build(TransactionKind::Enrollment { validator }, inputs, outputs)
    }

    /// Set the system fee, recomputing the hash
    pub fn with_system_fee(mut self, fee: u64) -> Self {
        self.system_fee = fee;
        self.hash = self.calculate_hash();
        self
    }

    /// Set a fixed nonce, recomputing the hash
    pub fn with_nonce(mut self, nonce: u64) -> Self {
        self.nonce = nonce;
        self.hash = self.calculate_hash();
        self
    }

    /// Canonical byte encoding that the hash commits to
    pub fn encode(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(64 + self.inputs.len() * 36 + self.outputs.len() * 80);
        data.push(self.version);
        data.push(self.kind.tag());
        if let TransactionKind::Enrollment { validator } = &self.kind {
            data.extend_from_slice(&validator.to_bytes());
        }
        data.extend_from_slice(&(self.inputs.len() as u32).to_le_bytes());
        for input in &self.inputs {
            data.extend_from_slice(input.hash.as_bytes());
            data.extend_from_slice(&input.index.to_le_bytes());
        }
        data.extend_from_slice(&(self.outputs.len() as u32).to_le_bytes());
        for output in &self.outputs {
            data.extend_from_slice(output.asset_id.as_bytes());
            data.extend_from_slice(&output.amount.to_le_bytes());
            data.extend_from_slice(&(output.recipient.len() as u32).to_le_bytes());
            data.extend_from_slice(output.recipient.as_bytes());
        }
        data.extend_from_slice(&self.system_fee.to_le_bytes());
        data.extend_from_slice(&self.nonce.to_le_bytes());
        data
    }

    pub fn calculate_hash(&self) -> Hash256 {
        Hash256::digest(&self.encode())
    }

    /// Reference to output `index` of this transaction
    pub fn outpoint(&self, index: u32) -> OutPoint {
        OutPoint::new(self.hash, index)
    }

    /// Validator registered by this transaction, if any
    pub fn enrolled_validator(&self) -> Option<&ValidatorKey> {
        match &self.kind {
            TransactionKind::Enrollment { validator } => Some(validator),
            _ => None,
        }
    }

    /// Get total output amount, or `None` if it does not fit in a `u64`
    pub fn total_output(&self) -> Option<u64> {
        self.outputs
            .iter()
            .try_fold(0u64, |total, o| total.checked_add(o.amount))
    }

    /// Stateless checks: structure, input uniqueness and cached hash
    pub fn validate(&self) -> Result<(), TransactionError> {
        if self.outputs.is_empty() {
            return Err(TransactionError::NoOutputs);
        }
        if self.kind == TransactionKind::Contract && self.inputs.is_empty() {
            return Err(TransactionError::NoInputs);
        }
        let entries = self.inputs.len().max(self.outputs.len());
        if entries > MAX_TX_IO {
            return Err(TransactionError::TooManyEntries(entries));
        }
        if let Some(index) = self.outputs.iter().position(|o| o.amount == 0) {
            return Err(TransactionError::ZeroAmount(index));
        }
        if self.total_output().is_none() {
            return Err(TransactionError::OutputOverflow);
        }

        let mut seen = HashSet::with_capacity(self.inputs.len());
        for input in &self.inputs {
            if !seen.insert(input) {
                return Err(TransactionError::DuplicateInput(*input));
            }
        }

        let actual = self.calculate_hash();
        if actual != self.hash {
            return Err(TransactionError::HashMismatch {
                expected: self.hash,
                actual,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;

    fn asset() -> Hash256 {
        Hash256::digest(b"asset")
    }

    #[test]
    fn test_issue_transaction() {
        let tx = Transaction::issue(vec![TransactionOutput::new(asset(), 100, "alice")]);
        assert!(tx.inputs.is_empty());
        assert_eq!(tx.total_output(), Some(100));
        assert!(tx.validate().is_ok());
    }

    #[test]
    fn test_hash_changes_with_fee() {
        let tx = Transaction::issue(vec![TransactionOutput::new(asset(), 1, "a")]).with_nonce(7);
        let with_fee = tx.clone().with_system_fee(10);
        assert_ne!(tx.hash, with_fee.hash);
        assert_eq!(with_fee.hash, with_fee.calculate_hash());
    }

    #[test]
    fn test_duplicate_input_rejected() {
        let prev = Hash256::digest(b"prev");
        let tx = Transaction::contract(
            vec![OutPoint::new(prev, 0), OutPoint::new(prev, 0)],
            vec![TransactionOutput::new(asset(), 5, "bob")],
        );
        assert_eq!(
            tx.validate(),
            Err(TransactionError::DuplicateInput(OutPoint::new(prev, 0)))
        );
    }

    #[test]
    fn test_contract_requires_inputs() {
        let tx = Transaction::contract(vec![], vec![TransactionOutput::new(asset(), 5, "bob")]);
        assert_eq!(tx.validate(), Err(TransactionError::NoInputs));
    }

    #[test]
    fn test_outputs_required_and_positive() {
        let empty = Transaction::issue(vec![]);
        assert_eq!(empty.validate(), Err(TransactionError::NoOutputs));

        let zero = Transaction::issue(vec![TransactionOutput::new(asset(), 0, "bob")]);
        assert_eq!(zero.validate(), Err(TransactionError::ZeroAmount(0)));
    }

    #[test]
    fn test_output_overflow_rejected() {
        let tx = Transaction::issue(vec![
            TransactionOutput::new(asset(), u64::MAX, "alice"),
            TransactionOutput::new(asset(), 1, "bob"),
        ]);
        assert_eq!(tx.total_output(), None);
        assert_eq!(tx.validate(), Err(TransactionError::OutputOverflow));
    }

    #[test]
    fn test_tampered_transaction_detected() {
        let mut tx = Transaction::issue(vec![TransactionOutput::new(asset(), 5, "bob")]);
        tx.outputs[0].amount = 500;
        assert!(matches!(
            tx.validate(),
            Err(TransactionError::HashMismatch { .. })
        ));
    }

    #[test]
    fn test_enrollment_exposes_validator() {
        let key = KeyPair::generate().validator_key();
        let tx = Transaction::enrollment(key, vec![], vec![TransactionOutput::new(asset(), 1, "x")]);
        assert_eq!(tx.enrolled_validator(), Some(&key));
        assert!(Transaction::issue(vec![]).enrolled_validator().is_none());
    }
}
