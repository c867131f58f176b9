//! Core ledger components
//!
//! This module contains the chain data model and the state queries built on it:
//! - Transactions (UTXO model, validator enrollment, system fees)
//! - Blocks and headers
//! - Blockchain (canonical chain with height, hash and transaction indexes)
//! - Unspent output set
//! - Validator election
//! - The `Ledger` query trait
//! - Pending transaction pool and block import

pub mod block;
pub mod blockchain;
pub mod import;
pub mod ledger;
pub mod mempool;
pub mod transaction;
pub mod unspent;
pub mod validators;

pub use block::{Block, BlockError, BlockHeader, BLOCK_VERSION, MAX_BLOCK_TXS};
pub use blockchain::{
    Blockchain, ChainSettings, SharedBlockchain, DEFAULT_INITIAL_SUPPLY, GENESIS_NONCE,
    GENESIS_TIMESTAMP,
};
pub use import::{import_headers, spawn_importer, LedgerUpdate};
pub use ledger::{Ledger, LedgerError, LookupKey};
pub use mempool::{Mempool, MempoolError, SharedMempool, DEFAULT_MEMPOOL_SIZE};
pub use transaction::{
    OutPoint, Transaction, TransactionError, TransactionKind, TransactionOutput, MAX_TX_IO,
    TX_VERSION,
};
pub use unspent::{UnspentOutputs, UnspentSet};
pub use validators::CandidateTable;
