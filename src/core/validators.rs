//! Validator election
//!
//! Enrollment transactions register a candidate key. Every governing-asset
//! output of an enrollment is stake behind that key until it is spent. The
//! active set is the best-staked candidates, padded with the standby
//! validators, ordered by key.

use crate::core::transaction::{OutPoint, Transaction};
use crate::crypto::{Hash256, ValidatorKey};
use std::collections::{BTreeMap, HashMap};

/// Candidate stakes derived from the canonical chain
#[derive(Debug, Clone, Default)]
pub struct CandidateTable {
    /// Total stake per candidate; only positive stakes are kept. Wider
    /// than a single output so that any number of deposits sums exactly.
    stakes: BTreeMap<ValidatorKey, u128>,
    /// Enrollment outputs still backing a candidate
    deposits: HashMap<OutPoint, (ValidatorKey, u64)>,
}

impl CandidateTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one transaction into the table. Spends are applied before the
    /// transaction's own enrollment outputs.
    pub fn apply(&mut self, tx: &Transaction, governing_asset: &Hash256) {
        for input in &tx.inputs {
            if let Some((key, amount)) = self.deposits.remove(input) {
                self.withdraw(&key, amount);
            }
        }

        let Some(validator) = tx.enrolled_validator() else {
            return;
        };

        for (index, output) in tx.outputs.iter().enumerate() {
            if output.asset_id != *governing_asset {
                continue;
            }
            self.deposits
                .insert(tx.outpoint(index as u32), (*validator, output.amount));
            *self.stakes.entry(*validator).or_insert(0) += u128::from(output.amount);
        }
    }

    fn withdraw(&mut self, key: &ValidatorKey, amount: u64) {
        if let Some(stake) = self.stakes.get_mut(key) {
            *stake = stake.saturating_sub(u128::from(amount));
            if *stake == 0 {
                self.stakes.remove(key);
            }
        }
    }

    pub fn stake_of(&self, key: &ValidatorKey) -> u128 {
        self.stakes.get(key).copied().unwrap_or(0)
    }

    pub fn candidate_count(&self) -> usize {
        self.stakes.len()
    }

    /// Pick `count` validators: highest stake first (ties by key), then
    /// standby validators in configured order. The result is sorted by key.
    pub fn elect(&self, count: usize, standby: &[ValidatorKey]) -> Vec<ValidatorKey> {
        let mut ranked: Vec<(&ValidatorKey, &u128)> = self.stakes.iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));

        let mut elected: Vec<ValidatorKey> =
            ranked.into_iter().take(count).map(|(key, _)| *key).collect();

        for key in standby {
            if elected.len() >= count {
                break;
            }
            if !elected.contains(key) {
                elected.push(*key);
            }
        }

        elected.sort();
        elected
    }
}
