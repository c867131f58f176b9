//! Blockchain implementation
//!
//! In-memory canonical chain with the indexes the `Ledger` queries need:
//! height and hash lookups for headers and blocks, a transaction index, the
//! unspent output set, candidate stakes and cumulative system fees.

use crate::core::block::{Block, BlockHeader};
use crate::core::ledger::{Ledger, LedgerError, LookupKey};
use crate::core::transaction::{OutPoint, Transaction, TransactionOutput};
use crate::core::unspent::{UnspentOutputs, UnspentSet};
use crate::core::validators::CandidateTable;
use crate::crypto::{Hash256, ValidatorKey};
use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Genesis timestamp (2016-07-15 15:08:21 UTC)
pub const GENESIS_TIMESTAMP: i64 = 1_468_595_301;

/// Genesis header nonce
pub const GENESIS_NONCE: u64 = 2_083_236_893;

/// Default amount of governing asset issued in the genesis block
pub const DEFAULT_INITIAL_SUPPLY: u64 = 100_000_000;

/// Ledger shared between the network layer (readers) and the block importer
pub type SharedBlockchain = Arc<RwLock<Blockchain>>;

fn default_governing_asset() -> Hash256 {
    Hash256::digest(b"governing")
}

fn default_initial_supply() -> u64 {
    DEFAULT_INITIAL_SUPPLY
}

/// Chain parameters fixed for the lifetime of a ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainSettings {
    /// Validators used when too few candidates are staked
    pub standby_validators: Vec<ValidatorKey>,
    /// Size of the active validator set; defaults to the standby count
    #[serde(default)]
    pub validators_count: Option<usize>,
    /// Asset whose enrollment outputs count as stake
    #[serde(default = "default_governing_asset")]
    pub governing_asset: Hash256,
    /// Governing asset issued to the first standby validator at genesis
    #[serde(default = "default_initial_supply")]
    pub initial_supply: u64,
}

impl ChainSettings {
    pub fn new(standby_validators: Vec<ValidatorKey>) -> Self {
        Self {
            standby_validators,
            validators_count: None,
            governing_asset: default_governing_asset(),
            initial_supply: DEFAULT_INITIAL_SUPPLY,
        }
    }

    pub fn validators_count(&self) -> usize {
        self.validators_count
            .unwrap_or(self.standby_validators.len())
    }

    /// Address that receives the genesis issue
    pub fn genesis_recipient(&self) -> String {
        self.standby_validators
            .first()
            .map(|key| key.address())
            .unwrap_or_default()
    }
}

/// The canonical chain and its indexes
#[derive(Debug, Clone)]
pub struct Blockchain {
    settings: ChainSettings,
    /// Header hash by height; may run ahead of the blocks
    header_index: Vec<Hash256>,
    headers: HashMap<Hash256, BlockHeader>,
    /// Full canonical blocks by hash
    blocks: HashMap<Hash256, Block>,
    /// Transaction hash -> (block height, position in block)
    transactions: HashMap<Hash256, (u32, usize)>,
    unspent: UnspentSet,
    candidates: CandidateTable,
    /// Cumulative system fee by height
    sys_fees: Vec<u64>,
}

impl Blockchain {
    /// Create a new chain holding only the genesis block
    pub fn new(settings: ChainSettings) -> Self {
        let genesis = Self::genesis_block(&settings);
        let mut chain = Self {
            settings,
            header_index: Vec::new(),
            headers: HashMap::new(),
            blocks: HashMap::new(),
            transactions: HashMap::new(),
            unspent: UnspentSet::new(),
            candidates: CandidateTable::new(),
            sys_fees: Vec::new(),
        };
        let sys_fee = genesis.system_fee().unwrap_or(0);
        chain.apply_block(genesis, sys_fee);
        chain
    }

    /// Deterministic genesis block for the given settings
    pub fn genesis_block(settings: &ChainSettings) -> Block {
        let issue = Transaction::issue(vec![TransactionOutput::new(
            settings.governing_asset,
            settings.initial_supply,
            settings.genesis_recipient(),
        )])
        .with_nonce(0);

        let timestamp = Utc
            .timestamp_opt(GENESIS_TIMESTAMP, 0)
            .single()
            .unwrap_or_else(Utc::now);
        let mut genesis = Block::with_timestamp(0, Hash256::ZERO, vec![issue], timestamp);
        genesis.header.nonce = GENESIS_NONCE;
        genesis
    }

    pub fn settings(&self) -> &ChainSettings {
        &self.settings
    }

    /// Hash of the current tip block
    pub fn current_block_hash(&self) -> Hash256 {
        self.header_index[self.height() as usize]
    }

    /// Hash of the highest known header
    pub fn current_header_hash(&self) -> Hash256 {
        self.header_index[self.header_height() as usize]
    }

    pub fn unspent_count(&self) -> usize {
        self.unspent.len()
    }

    /// Append a header ahead of the blocks (headers-first sync)
    pub fn add_header(&mut self, header: BlockHeader) -> Result<(), LedgerError> {
        let expected = self.header_index.len() as u32;
        if header.height != expected {
            return Err(LedgerError::UnexpectedHeight {
                expected,
                got: header.height,
            });
        }
        if header.previous_hash != self.current_header_hash() {
            return Err(LedgerError::PreviousHashMismatch(header.height));
        }

        let hash = header.hash();
        self.header_index.push(hash);
        self.headers.insert(hash, header);
        Ok(())
    }

    /// Validate and append the next block. Either every index is updated
    /// or none is.
    pub fn add_block(&mut self, block: Block) -> Result<(), LedgerError> {
        let sys_fee = self.validate_block(&block)?;
        let height = block.height();
        let hash = block.hash();
        self.apply_block(block, sys_fee);
        log::debug!("Added block {} at height {}", hash, height);
        Ok(())
    }

    /// Check `block` against the current tip and return the cumulative
    /// system fee it would bring the chain to
    fn validate_block(&self, block: &Block) -> Result<u64, LedgerError> {
        let expected = self.height() + 1;
        if block.height() != expected {
            return Err(LedgerError::UnexpectedHeight {
                expected,
                got: block.height(),
            });
        }

        if block.header.previous_hash != self.current_block_hash() {
            return Err(LedgerError::PreviousHashMismatch(expected));
        }

        if let Some(known) = self.header_index.get(expected as usize) {
            if *known != block.hash() {
                return Err(LedgerError::HeaderMismatch(expected));
            }
        }

        block.validate()?;

        // Outputs created earlier in this block may be spent later in it
        let mut created: HashSet<OutPoint> = HashSet::new();
        let mut spent: HashSet<OutPoint> = HashSet::new();
        for tx in &block.transactions {
            if self.transactions.contains_key(&tx.hash) {
                return Err(LedgerError::DuplicateTransaction(tx.hash));
            }
            for input in &tx.inputs {
                let available = self.unspent.contains(input) || created.contains(input);
                if !available || !spent.insert(*input) {
                    return Err(LedgerError::DoubleSpend {
                        tx: tx.hash,
                        input: *input,
                    });
                }
            }
            created.extend((0..tx.outputs.len() as u32).map(|index| tx.outpoint(index)));
        }

        let previous_fee = self.sys_fees.last().copied().unwrap_or(0);
        block
            .system_fee()
            .and_then(|fee| previous_fee.checked_add(fee))
            .ok_or(LedgerError::FeeOverflow(expected))
    }

    fn apply_block(&mut self, block: Block, sys_fee: u64) {
        let height = block.height();
        let hash = block.hash();

        for (position, tx) in block.transactions.iter().enumerate() {
            for input in &tx.inputs {
                self.unspent.spend(input);
            }
            self.unspent.insert_outputs(tx);
            self.candidates.apply(tx, &self.settings.governing_asset);
            self.transactions.insert(tx.hash, (height, position));
        }

        self.sys_fees.push(sys_fee);

        if self.header_index.len() == height as usize {
            self.header_index.push(hash);
        }
        self.headers.insert(hash, block.header.clone());
        self.blocks.insert(hash, block);
    }
}

impl Ledger for Blockchain {
    fn height(&self) -> u32 {
        // Genesis is always present
        (self.sys_fees.len() - 1) as u32
    }

    fn header_height(&self) -> u32 {
        (self.header_index.len() - 1) as u32
    }

    fn contains_block(&self, hash: &Hash256) -> bool {
        self.blocks.contains_key(hash)
    }

    fn contains_transaction(&self, hash: &Hash256) -> bool {
        self.transactions.contains_key(hash)
    }

    fn contains_unspent_ref(&self, outpoint: &OutPoint) -> bool {
        self.unspent.contains(outpoint)
    }

    fn get_block(&self, height: u32) -> Result<&Block, LedgerError> {
        let hash = self.get_block_hash(height)?;
        self.get_block_by_hash(&hash)
    }

    fn get_block_by_hash(&self, hash: &Hash256) -> Result<&Block, LedgerError> {
        self.blocks
            .get(hash)
            .ok_or(LedgerError::NotFound(LookupKey::Hash(*hash)))
    }

    fn get_block_hash(&self, height: u32) -> Result<Hash256, LedgerError> {
        if height > self.height() {
            return Err(LedgerError::NotFound(LookupKey::Height(height)));
        }
        Ok(self.header_index[height as usize])
    }

    fn get_header(&self, height: u32) -> Result<&BlockHeader, LedgerError> {
        let hash = self
            .header_index
            .get(height as usize)
            .ok_or(LedgerError::NotFound(LookupKey::Height(height)))?;
        self.get_header_by_hash(hash)
    }

    fn get_header_by_hash(&self, hash: &Hash256) -> Result<&BlockHeader, LedgerError> {
        self.headers
            .get(hash)
            .ok_or(LedgerError::NotFound(LookupKey::Hash(*hash)))
    }

    fn get_next_block_hash(&self, hash: &Hash256) -> Result<Hash256, LedgerError> {
        let block = self.get_block_by_hash(hash)?;
        self.get_block_hash(block.height() + 1)
            .map_err(|_| LedgerError::NotFound(LookupKey::Hash(*hash)))
    }

    fn get_validators_with(&self, pending: &[Transaction]) -> Vec<ValidatorKey> {
        let mut candidates = self.candidates.clone();
        for tx in pending {
            candidates.apply(tx, &self.settings.governing_asset);
        }
        candidates.elect(
            self.settings.validators_count(),
            &self.settings.standby_validators,
        )
    }

    fn get_sys_fee_amount(&self, height: u32) -> Result<u64, LedgerError> {
        self.sys_fees
            .get(height as usize)
            .copied()
            .ok_or(LedgerError::NotFound(LookupKey::Height(height)))
    }

    fn get_transaction_with_height(
        &self,
        hash: &Hash256,
    ) -> Result<(&Transaction, u32), LedgerError> {
        let not_found = || LedgerError::NotFound(LookupKey::Hash(*hash));
        let (height, position) = *self.transactions.get(hash).ok_or_else(not_found)?;
        let block = self.get_block(height)?;
        block
            .transactions
            .get(position)
            .map(|tx| (tx, height))
            .ok_or_else(not_found)
    }

    fn get_unspent(&self, hash: &Hash256, index: u32) -> Result<&TransactionOutput, LedgerError> {
        let outpoint = OutPoint::new(*hash, index);
        if let Some(output) = self.unspent.get(&outpoint) {
            return Ok(output);
        }

        let existed = self
            .get_transaction(hash)
            .map(|tx| (index as usize) < tx.outputs.len())
            .unwrap_or(false);
        if existed {
            Err(LedgerError::AlreadySpent(outpoint))
        } else {
            Err(LedgerError::NotFound(LookupKey::Output(outpoint)))
        }
    }

    fn get_unspent_outputs(&self, hash: &Hash256) -> UnspentOutputs<'_> {
        self.unspent.outputs_of(hash)
    }
}
