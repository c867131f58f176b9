//! Block import
//!
//! The only writer of the shared chain. Blocks and headers received from
//! peers arrive on a channel and are applied one at a time under the write
//! lock; afterwards the mempool drops whatever the new block confirmed or
//! invalidated.

use crate::core::block::{Block, BlockHeader};
use crate::core::blockchain::{Blockchain, SharedBlockchain};
use crate::core::ledger::{Ledger, LedgerError};
use crate::core::mempool::SharedMempool;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Chain data received from the network
#[derive(Debug, Clone)]
pub enum LedgerUpdate {
    Block(Block),
    Headers(Vec<BlockHeader>),
}

/// Apply headers in order, skipping ones already known. Returns how many
/// were new.
pub fn import_headers(
    chain: &mut Blockchain,
    headers: Vec<BlockHeader>,
) -> Result<usize, LedgerError> {
    let mut added = 0;
    for header in headers {
        if chain.get_header_by_hash(&header.hash()).is_ok() {
            continue;
        }
        chain.add_header(header)?;
        added += 1;
    }
    Ok(added)
}

/// Apply updates until every sender is dropped
pub fn spawn_importer(
    chain: SharedBlockchain,
    mempool: SharedMempool,
    mut updates: mpsc::Receiver<LedgerUpdate>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(update) = updates.recv().await {
            match update {
                LedgerUpdate::Block(block) => {
                    let hash = block.hash();
                    let height = block.height();
                    let mut ledger = chain.write().await;
                    if ledger.contains_block(&hash) {
                        continue;
                    }
                    match ledger.add_block(block) {
                        Ok(()) => {
                            log::info!("Imported block {} at height {}", hash, height);
                            let removed = mempool.write().await.remove_confirmed(&*ledger);
                            if removed > 0 {
                                log::debug!("Removed {} transactions from mempool", removed);
                            }
                        }
                        Err(e) => log::warn!("Rejected block {}: {}", hash, e),
                    }
                }
                LedgerUpdate::Headers(headers) => {
                    let mut ledger = chain.write().await;
                    match import_headers(&mut ledger, headers) {
                        Ok(0) => {}
                        Ok(added) => log::info!(
                            "Imported {} headers, header height {}",
                            added,
                            ledger.header_height()
                        ),
                        Err(e) => log::warn!("Rejected headers: {}", e),
                    }
                }
            }
        }
        log::debug!("Block importer stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ChainSettings, Mempool, Transaction, TransactionOutput};
    use crate::crypto::KeyPair;
    use std::sync::Arc;
    use tokio::sync::RwLock;

    fn shared_chain() -> SharedBlockchain {
        let key = KeyPair::generate().validator_key();
        Arc::new(RwLock::new(Blockchain::new(ChainSettings::new(vec![key]))))
    }

    #[tokio::test]
    async fn test_importer_applies_blocks_and_prunes_mempool() {
        let chain = shared_chain();
        let mempool: SharedMempool = Arc::new(RwLock::new(Mempool::new()));

        let (block, tx) = {
            let chain = chain.read().await;
            let genesis_tx = chain.get_block(0).unwrap().transactions[0].clone();
            let out = &genesis_tx.outputs[0];
            let tx = Transaction::contract(
                vec![genesis_tx.outpoint(0)],
                vec![TransactionOutput::new(out.asset_id, out.amount, "receiver")],
            );
            mempool
                .write()
                .await
                .add_transaction(tx.clone(), &*chain)
                .unwrap();
            (Block::new(1, chain.current_block_hash(), vec![tx.clone()]), tx)
        };

        let (sender, receiver) = mpsc::channel(8);
        let importer = spawn_importer(chain.clone(), mempool.clone(), receiver);
        sender.send(LedgerUpdate::Block(block.clone())).await.unwrap();
        // A repeat is ignored
        sender.send(LedgerUpdate::Block(block)).await.unwrap();
        drop(sender);
        importer.await.unwrap();

        let chain = chain.read().await;
        assert_eq!(chain.height(), 1);
        assert!(chain.contains_transaction(&tx.hash));
        assert!(mempool.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_import_headers_skips_known() {
        let chain = shared_chain();
        let mut chain = chain.write().await;

        let genesis = chain.get_header(0).unwrap().clone();
        let next = Block::new(1, genesis.hash(), vec![Transaction::issue(vec![
            TransactionOutput::new(chain.settings().governing_asset, 1, "someone"),
        ])]);

        let added = import_headers(&mut chain, vec![genesis, next.header.clone()]).unwrap();
        assert_eq!(added, 1);
        assert_eq!(chain.header_height(), 1);
        assert_eq!(chain.height(), 0);

        chain.add_block(next).unwrap();
        assert_eq!(chain.height(), 1);
    }
}
