//! Unspent output set
//!
//! Outputs are grouped by the transaction that created them so that both
//! point lookups and "every unspent output of this transaction" are cheap.
//! An output leaves the set exactly once, when a canonical transaction
//! spends it, and is never inserted again.

use crate::core::transaction::{OutPoint, Transaction, TransactionOutput};
use crate::crypto::Hash256;
use std::collections::{btree_map, BTreeMap, HashMap};

/// The set of all outputs not yet consumed by the canonical chain
#[derive(Debug, Clone, Default)]
pub struct UnspentSet {
    /// Remaining outputs keyed by creating transaction, then output index
    entries: HashMap<Hash256, BTreeMap<u32, TransactionOutput>>,
    /// Number of outputs across all transactions
    len: usize,
}

impl UnspentSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add every output of a newly included transaction
    pub fn insert_outputs(&mut self, tx: &Transaction) {
        let outputs: BTreeMap<u32, TransactionOutput> = tx
            .outputs
            .iter()
            .enumerate()
            .map(|(index, output)| (index as u32, output.clone()))
            .collect();
        self.len += outputs.len();
        if let Some(previous) = self.entries.insert(tx.hash, outputs) {
            self.len -= previous.len();
        }
    }

    /// Remove an output, returning it if it was unspent
    pub fn spend(&mut self, outpoint: &OutPoint) -> Option<TransactionOutput> {
        let outputs = self.entries.get_mut(&outpoint.hash)?;
        let output = outputs.remove(&outpoint.index)?;
        if outputs.is_empty() {
            self.entries.remove(&outpoint.hash);
        }
        self.len -= 1;
        Some(output)
    }

    /// Check if an output exists and is unspent
    pub fn contains(&self, outpoint: &OutPoint) -> bool {
        self.get(outpoint).is_some()
    }

    pub fn get(&self, outpoint: &OutPoint) -> Option<&TransactionOutput> {
        self.entries
            .get(&outpoint.hash)
            .and_then(|outputs| outputs.get(&outpoint.index))
    }

    /// Lazily iterate the unspent outputs of one transaction in index order
    pub fn outputs_of(&self, hash: &Hash256) -> UnspentOutputs<'_> {
        UnspentOutputs {
            inner: self.entries.get(hash).map(|outputs| outputs.iter()),
        }
    }

    /// Total number of unspent outputs
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Iterator over the unspent outputs of a single transaction
#[derive(Debug, Clone)]
pub struct UnspentOutputs<'a> {
    inner: Option<btree_map::Iter<'a, u32, TransactionOutput>>,
}

impl<'a> Iterator for UnspentOutputs<'a> {
    type Item = (u32, &'a TransactionOutput);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner
            .as_mut()
            .and_then(|iter| iter.next())
            .map(|(index, output)| (*index, output))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner
            .as_ref()
            .map(|iter| iter.size_hint())
            .unwrap_or((0, Some(0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx_with_outputs(count: u64) -> Transaction {
        let asset = Hash256::digest(b"asset");
        Transaction::issue(
            (1..=count)
                .map(|i| TransactionOutput::new(asset, i * 10, "addr1"))
                .collect(),
        )
    }

    #[test]
    fn test_insert_and_get() {
        let mut set = UnspentSet::new();
        let tx = tx_with_outputs(2);
        set.insert_outputs(&tx);

        assert_eq!(set.len(), 2);
        assert_eq!(set.get(&tx.outpoint(1)).map(|o| o.amount), Some(20));
        assert!(!set.contains(&tx.outpoint(2)));
    }

    #[test]
    fn test_spend_removes_once() {
        let mut set = UnspentSet::new();
        let tx = tx_with_outputs(1);
        set.insert_outputs(&tx);

        assert!(set.spend(&tx.outpoint(0)).is_some());
        assert!(set.spend(&tx.outpoint(0)).is_none());
        assert!(!set.contains(&tx.outpoint(0)));
        assert!(set.is_empty());
    }

    #[test]
    fn test_outputs_of_is_restartable() {
        let mut set = UnspentSet::new();
        let tx = tx_with_outputs(3);
        set.insert_outputs(&tx);
        set.spend(&tx.outpoint(1));

        let first: Vec<u32> = set.outputs_of(&tx.hash).map(|(i, _)| i).collect();
        let second: Vec<u32> = set.outputs_of(&tx.hash).map(|(i, _)| i).collect();
        assert_eq!(first, vec![0, 2]);
        assert_eq!(first, second);

        assert_eq!(set.outputs_of(&Hash256::ZERO).count(), 0);
    }
}
