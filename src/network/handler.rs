//! Protocol message handling
//!
//! The node hands every deliverable message to a `MessageHandler`. The
//! default `ProtocolHandler` completes the version/verack handshake, answers
//! chain queries from the ledger, keeps the mempool and forwards blocks and
//! headers to the importer.

use crate::core::{
    Blockchain, Ledger, LedgerUpdate, Mempool, MempoolError, SharedBlockchain, SharedMempool,
    Transaction,
};
use crate::crypto::{Hash256, ValidatorKey};
use crate::network::message::{
    GetBlocksPayload, InvPayload, InventoryType, Message, NodeIdentity, PingPayload,
    RejectPayload, VersionPayload, MAX_ADDR_PER_MESSAGE, MAX_HEADERS_PER_MESSAGE,
    MAX_INV_HASHES, MIN_PROTOCOL_VERSION,
};
use crate::network::peer::{Peer, PeerError};
use crate::network::peer_set::PeerSet;
use async_trait::async_trait;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};

/// Receives messages that passed the node's handshake gate
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Process one message. An error disconnects `peer`.
    async fn handle(&self, message: Message, peer: Arc<dyn Peer>) -> Result<(), PeerError>;

    /// Called once a peer has left the connected set
    async fn peer_closed(&self, _addr: SocketAddr) {}
}

#[derive(Debug, Default, Clone, Copy)]
struct HandshakeProgress {
    version: bool,
    verack: bool,
}

/// Default handler for the node protocol
pub struct ProtocolHandler {
    identity: Arc<NodeIdentity>,
    peers: Arc<PeerSet>,
    ledger: Option<SharedBlockchain>,
    mempool: SharedMempool,
    updates: Option<mpsc::Sender<LedgerUpdate>>,
    handshakes: Mutex<HashMap<SocketAddr, HandshakeProgress>>,
}

impl ProtocolHandler {
    pub fn new(identity: Arc<NodeIdentity>, peers: Arc<PeerSet>) -> Self {
        Self {
            identity,
            peers,
            ledger: None,
            mempool: Arc::new(RwLock::new(Mempool::new())),
            updates: None,
            handshakes: Mutex::new(HashMap::new()),
        }
    }

    /// Answer queries from `ledger` and keep pending transactions in `mempool`
    pub fn with_ledger(mut self, ledger: SharedBlockchain, mempool: SharedMempool) -> Self {
        self.ledger = Some(ledger);
        self.mempool = mempool;
        self
    }

    /// Forward received blocks and headers to `updates`
    pub fn with_updates(mut self, updates: mpsc::Sender<LedgerUpdate>) -> Self {
        self.updates = Some(updates);
        self
    }

    pub fn mempool(&self) -> &SharedMempool {
        &self.mempool
    }

    async fn height(&self) -> Option<u32> {
        match &self.ledger {
            Some(ledger) => Some(ledger.read().await.height()),
            None => None,
        }
    }

    /// Validators that would be active if the mempool were confirmed
    pub async fn preview_validators(&self) -> Option<Vec<ValidatorKey>> {
        let ledger = self.ledger.as_ref()?;
        let chain = ledger.read().await;
        let pending = self.mempool.read().await.transactions();
        Some(chain.get_validators_with(&pending))
    }

    async fn advance_handshake<F>(&self, peer: &Arc<dyn Peer>, step: F)
    where
        F: FnOnce(&mut HandshakeProgress),
    {
        let addr = peer.address();
        let mut handshakes = self.handshakes.lock().await;
        let progress = handshakes.entry(addr).or_default();
        step(progress);
        if progress.version && progress.verack {
            handshakes.remove(&addr);
            peer.mark_ready();
            log::info!("Handshake complete with {}", addr);
        }
    }

    async fn on_version(
        &self,
        version: VersionPayload,
        peer: &Arc<dyn Peer>,
    ) -> Result<(), PeerError> {
        if version.nonce == self.identity.nonce {
            return Err(PeerError::MalformedHandshake(
                "connected to self".to_string(),
            ));
        }
        if version.version < MIN_PROTOCOL_VERSION {
            return Err(PeerError::MalformedHandshake(format!(
                "unsupported protocol version {}",
                version.version
            )));
        }

        log::debug!(
            "Version from {}: {} at height {:?}",
            peer.address(),
            version.user_agent,
            version.start_height
        );

        peer.send(Message::Verack).await?;
        self.advance_handshake(peer, |p| p.version = true).await;
        Ok(())
    }

    async fn on_get_addr(&self, peer: &Arc<dyn Peer>) -> Result<(), PeerError> {
        let requester = peer.address();
        let addrs: Vec<SocketAddr> = self
            .peers
            .snapshot()
            .await
            .into_iter()
            .filter(|p| p.is_ready() && p.address() != requester)
            .map(|p| p.address())
            .take(MAX_ADDR_PER_MESSAGE)
            .collect();

        peer.send(Message::Addr(addrs)).await
    }

    async fn on_get_headers(
        &self,
        locator: GetBlocksPayload,
        peer: &Arc<dyn Peer>,
    ) -> Result<(), PeerError> {
        let Some(ledger) = &self.ledger else {
            return Ok(());
        };

        let headers = {
            let chain = ledger.read().await;
            let start = locate(&chain, &locator.hash_start);
            let mut headers = Vec::new();
            for height in start + 1..=chain.header_height() {
                let header = match chain.get_header(height) {
                    Ok(header) => header,
                    Err(_) => break,
                };
                headers.push(header.clone());
                if headers.len() >= MAX_HEADERS_PER_MESSAGE || header.hash() == locator.hash_stop
                {
                    break;
                }
            }
            headers
        };

        if headers.is_empty() {
            return Ok(());
        }
        peer.send(Message::Headers(headers)).await
    }

    async fn on_get_blocks(
        &self,
        locator: GetBlocksPayload,
        peer: &Arc<dyn Peer>,
    ) -> Result<(), PeerError> {
        let Some(ledger) = &self.ledger else {
            return Ok(());
        };

        let hashes = {
            let chain = ledger.read().await;
            let start = locate(&chain, &locator.hash_start);
            let mut hashes = Vec::new();
            for height in start + 1..=chain.height() {
                let hash = match chain.get_block_hash(height) {
                    Ok(hash) => hash,
                    Err(_) => break,
                };
                hashes.push(hash);
                if hashes.len() >= MAX_INV_HASHES || hash == locator.hash_stop {
                    break;
                }
            }
            hashes
        };

        if hashes.is_empty() {
            return Ok(());
        }
        peer.send(Message::Inv(InvPayload::new(InventoryType::Block, hashes)))
            .await
    }

    async fn on_inv(&self, inv: InvPayload, peer: &Arc<dyn Peer>) -> Result<(), PeerError> {
        let Some(ledger) = &self.ledger else {
            return Ok(());
        };

        let wanted: Vec<Hash256> = {
            let chain = ledger.read().await;
            let mempool = self.mempool.read().await;
            inv.hashes
                .into_iter()
                .take(MAX_INV_HASHES)
                .filter(|hash| match inv.kind {
                    InventoryType::Block => !chain.contains_block(hash),
                    InventoryType::Tx => {
                        !mempool.contains(hash) && !chain.contains_transaction(hash)
                    }
                })
                .collect()
        };

        if wanted.is_empty() {
            return Ok(());
        }
        peer.send(Message::GetData(InvPayload::new(inv.kind, wanted)))
            .await
    }

    async fn on_get_data(&self, inv: InvPayload, peer: &Arc<dyn Peer>) -> Result<(), PeerError> {
        let mut found = Vec::new();
        let mut missing = Vec::new();

        {
            let chain = match &self.ledger {
                Some(ledger) => Some(ledger.read().await),
                None => None,
            };
            let mempool = self.mempool.read().await;

            for hash in inv.hashes.into_iter().take(MAX_INV_HASHES) {
                let item = match inv.kind {
                    InventoryType::Block => chain
                        .as_ref()
                        .and_then(|c| c.get_block_by_hash(&hash).ok())
                        .map(|block| Message::Block(block.clone())),
                    InventoryType::Tx => mempool
                        .get_transaction(&hash)
                        .or_else(|| chain.as_ref().and_then(|c| c.get_transaction(&hash).ok()))
                        .map(|tx| Message::Tx(tx.clone())),
                };
                match item {
                    Some(message) => found.push(message),
                    None => missing.push(hash),
                }
            }
        }

        for message in found {
            peer.send(message).await?;
        }
        if !missing.is_empty() {
            peer.send(Message::NotFound(InvPayload::new(inv.kind, missing)))
                .await?;
        }
        Ok(())
    }

    async fn forward(&self, update: LedgerUpdate, from: SocketAddr) {
        match &self.updates {
            Some(updates) => {
                if updates.send(update).await.is_err() {
                    log::warn!("Block importer is gone, dropping data from {}", from);
                }
            }
            None => log::debug!("No importer attached, dropping data from {}", from),
        }
    }

    async fn on_tx(&self, tx: Transaction, peer: &Arc<dyn Peer>) -> Result<(), PeerError> {
        let Some(ledger) = &self.ledger else {
            return Ok(());
        };

        let hash = tx.hash;
        let result = {
            let chain = ledger.read().await;
            let mut mempool = self.mempool.write().await;
            mempool.add_transaction(tx, &*chain)
        };

        match result {
            Ok(()) => {
                log::debug!("Accepted transaction {} from {}", hash, peer.address());
                self.relay(InvPayload::new(InventoryType::Tx, vec![hash]), peer.address())
                    .await;
                Ok(())
            }
            Err(MempoolError::Duplicate(_)) => Ok(()),
            Err(e) => {
                log::debug!("Rejected transaction {} from {}: {}", hash, peer.address(), e);
                peer.send(Message::Reject(RejectPayload {
                    message: "tx".to_string(),
                    reason: e.to_string(),
                    hash: Some(hash),
                }))
                .await
            }
        }
    }

    /// Announce `inv` to every ready peer except `except`
    async fn relay(&self, inv: InvPayload, except: SocketAddr) {
        for peer in self.peers.snapshot().await {
            if !peer.is_ready() || peer.address() == except {
                continue;
            }
            if let Err(e) = peer.send(Message::Inv(inv.clone())).await {
                log::debug!("Failed to relay to {}: {}", peer.address(), e);
            }
        }
    }
}

/// Height of the first locator hash found in the chain, or genesis
fn locate(chain: &Blockchain, locator: &[Hash256]) -> u32 {
    locator
        .iter()
        .find_map(|hash| chain.get_header_by_hash(hash).ok())
        .map(|header| header.height)
        .unwrap_or(0)
}

#[async_trait]
impl MessageHandler for ProtocolHandler {
    async fn handle(&self, message: Message, peer: Arc<dyn Peer>) -> Result<(), PeerError> {
        log::debug!("Received {} from {}", message.command(), peer.address());

        match message {
            Message::Version(version) => self.on_version(version, &peer).await,
            Message::Verack => {
                self.advance_handshake(&peer, |p| p.verack = true).await;
                Ok(())
            }
            Message::Ping(ping) => {
                let height = self.height().await;
                peer.send(Message::Pong(PingPayload {
                    nonce: ping.nonce,
                    height,
                }))
                .await
            }
            Message::Pong(pong) => {
                log::debug!("Pong from {} at height {:?}", peer.address(), pong.height);
                Ok(())
            }
            Message::GetAddr => self.on_get_addr(&peer).await,
            Message::Addr(addrs) => {
                log::debug!("{} sent {} addresses", peer.address(), addrs.len());
                Ok(())
            }
            Message::GetHeaders(locator) => self.on_get_headers(locator, &peer).await,
            Message::GetBlocks(locator) => self.on_get_blocks(locator, &peer).await,
            Message::Headers(headers) => {
                if headers.len() > MAX_HEADERS_PER_MESSAGE {
                    return Err(PeerError::Misbehaving(format!(
                        "{} headers in one message",
                        headers.len()
                    )));
                }
                self.forward(LedgerUpdate::Headers(headers), peer.address())
                    .await;
                Ok(())
            }
            Message::Inv(inv) => self.on_inv(inv, &peer).await,
            Message::GetData(inv) => self.on_get_data(inv, &peer).await,
            Message::NotFound(inv) => {
                log::debug!("{} lacks {} items", peer.address(), inv.hashes.len());
                Ok(())
            }
            Message::Block(block) => {
                self.forward(LedgerUpdate::Block(block), peer.address())
                    .await;
                Ok(())
            }
            Message::Tx(tx) => self.on_tx(tx, &peer).await,
            Message::Reject(reject) => {
                log::warn!(
                    "{} rejected our {}: {}",
                    peer.address(),
                    reject.message,
                    reject.reason
                );
                Ok(())
            }
        }
    }

    async fn peer_closed(&self, addr: SocketAddr) {
        self.handshakes.lock().await.remove(&addr);
    }
}
