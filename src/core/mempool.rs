//! Transaction pool (mempool) for pending transactions
//!
//! Holds relayed transactions that are not in a block yet. A transaction is
//! admitted only if every input is unspent, either in the chain or as an
//! output of another pending transaction, and no other pending transaction
//! already spends it.

use crate::core::ledger::Ledger;
use crate::core::transaction::{OutPoint, Transaction, TransactionError};
use crate::crypto::Hash256;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

/// Default maximum mempool transaction count
pub const DEFAULT_MEMPOOL_SIZE: usize = 10_000;

/// Pool shared between the protocol handler and the block importer
pub type SharedMempool = Arc<RwLock<Mempool>>;

/// Mempool errors
#[derive(Error, Debug, PartialEq)]
pub enum MempoolError {
    #[error("Transaction {0} already known")]
    Duplicate(Hash256),
    #[error("Invalid transaction: {0}")]
    Invalid(#[from] TransactionError),
    #[error("Input {0} is not unspent")]
    MissingInput(OutPoint),
    #[error("Input {input} already spent by pending transaction {by}")]
    Conflict { input: OutPoint, by: Hash256 },
    #[error("Mempool full")]
    Full,
}

/// Memory pool for pending transactions
#[derive(Debug)]
pub struct Mempool {
    entries: HashMap<Hash256, Transaction>,
    /// Hashes in order of arrival
    by_time: Vec<Hash256>,
    /// Which pending transaction spends each outpoint
    spends: HashMap<OutPoint, Hash256>,
    max_size: usize,
}

impl Mempool {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MEMPOOL_SIZE)
    }

    pub fn with_capacity(max_size: usize) -> Self {
        Self {
            entries: HashMap::new(),
            by_time: Vec::new(),
            spends: HashMap::new(),
            max_size,
        }
    }

    /// Validate `tx` against the chain and the pool, then add it
    pub fn add_transaction<L>(&mut self, tx: Transaction, ledger: &L) -> Result<(), MempoolError>
    where
        L: Ledger + ?Sized,
    {
        if self.entries.contains_key(&tx.hash) || ledger.contains_transaction(&tx.hash) {
            return Err(MempoolError::Duplicate(tx.hash));
        }

        tx.validate()?;

        for input in &tx.inputs {
            if let Some(by) = self.spends.get(input) {
                return Err(MempoolError::Conflict {
                    input: *input,
                    by: *by,
                });
            }
            if !ledger.contains_unspent_ref(input) && !self.creates(input) {
                return Err(MempoolError::MissingInput(*input));
            }
        }

        if self.entries.len() >= self.max_size {
            return Err(MempoolError::Full);
        }

        for input in &tx.inputs {
            self.spends.insert(*input, tx.hash);
        }
        self.by_time.push(tx.hash);
        self.entries.insert(tx.hash, tx);
        Ok(())
    }

    /// True if a pending transaction creates this output
    fn creates(&self, outpoint: &OutPoint) -> bool {
        self.entries
            .get(&outpoint.hash)
            .map(|tx| (outpoint.index as usize) < tx.outputs.len())
            .unwrap_or(false)
    }

    /// Remove a transaction from the pool
    pub fn remove_transaction(&mut self, hash: &Hash256) -> Option<Transaction> {
        let tx = self.entries.remove(hash)?;
        self.by_time.retain(|h| h != hash);
        for input in &tx.inputs {
            self.spends.remove(input);
        }
        Some(tx)
    }

    /// Drop transactions that made it into a block, and any whose inputs
    /// are no longer available. Returns how many were removed.
    pub fn remove_confirmed<L>(&mut self, ledger: &L) -> usize
    where
        L: Ledger + ?Sized,
    {
        let mut removed = 0;
        loop {
            let stale: Vec<Hash256> = self
                .entries
                .values()
                .filter(|tx| {
                    ledger.contains_transaction(&tx.hash)
                        || tx.inputs.iter().any(|input| {
                            !ledger.contains_unspent_ref(input) && !self.creates(input)
                        })
                })
                .map(|tx| tx.hash)
                .collect();

            if stale.is_empty() {
                return removed;
            }
            for hash in &stale {
                self.remove_transaction(hash);
            }
            removed += stale.len();
        }
    }

    pub fn get_transaction(&self, hash: &Hash256) -> Option<&Transaction> {
        self.entries.get(hash)
    }

    pub fn contains(&self, hash: &Hash256) -> bool {
        self.entries.contains_key(hash)
    }

    /// Pending transactions in arrival order
    pub fn transactions(&self) -> Vec<Transaction> {
        self.by_time
            .iter()
            .filter_map(|hash| self.entries.get(hash).cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for Mempool {
    fn default() -> Self {
        Self::new()
    }
}
