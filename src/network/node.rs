//! Local node coordinator
//!
//! `LocalNode` owns the connected peer set and the receive loops. Peers
//! reach it from the seed dialler and the listener through one channel,
//! and a single admission task runs each of them through the handshake
//! gate: access check, insertion, receive loop, version message.
//!
//! Every `start` opens a new generation with its own cancellation token.
//! `stop` cancels the token and drains the set, and insertion checks the
//! token under the set's write lock, so a peer still being admitted when
//! the node stops is either drained or turned away. Whoever takes a peer
//! out of the set disconnects it, which makes every disconnect happen once.

use crate::config::NetworkConfig;
use crate::core::{Ledger, SharedBlockchain};
use crate::network::acl::AccessControl;
use crate::network::delay::{Delayer, TokioDelayer};
use crate::network::handler::MessageHandler;
use crate::network::message::{Message, NodeIdentity, VersionPayload};
use crate::network::peer::{Peer, PeerError, PeerFactory, PeerListener};
use crate::network::peer_set::PeerSet;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

/// Connected-peer events buffered before producers wait
const EVENT_QUEUE_SIZE: usize = 64;

/// Node construction and startup errors
#[derive(Error, Debug)]
pub enum NodeError {
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Failed to start listener: {0}")]
    Listener(#[source] PeerError),
}

/// Snapshot of the node's state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeStatus {
    pub port: u16,
    pub peers: usize,
    pub height: Option<u32>,
    pub running: bool,
}

/// Assembles a `LocalNode`. The peer factory, listener and message handler
/// are required.
pub struct LocalNodeBuilder {
    config: NetworkConfig,
    identity: Option<Arc<NodeIdentity>>,
    peers: Option<Arc<PeerSet>>,
    ledger: Option<SharedBlockchain>,
    handler: Option<Arc<dyn MessageHandler>>,
    factory: Option<Arc<dyn PeerFactory>>,
    listener: Option<Arc<dyn PeerListener>>,
    delayer: Option<Arc<dyn Delayer>>,
    acl: Option<Arc<AccessControl>>,
}

impl LocalNodeBuilder {
    pub fn identity(mut self, identity: Arc<NodeIdentity>) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn peers(mut self, peers: Arc<PeerSet>) -> Self {
        self.peers = Some(peers);
        self
    }

    pub fn ledger(mut self, ledger: SharedBlockchain) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn handler(mut self, handler: Arc<dyn MessageHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn peer_factory(mut self, factory: Arc<dyn PeerFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn listener(mut self, listener: Arc<dyn PeerListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn delayer(mut self, delayer: Arc<dyn Delayer>) -> Self {
        self.delayer = Some(delayer);
        self
    }

    /// Use this filter instead of one built from the configured rules
    pub fn acl(mut self, acl: Arc<AccessControl>) -> Self {
        self.acl = Some(acl);
        self
    }

    pub fn build(self) -> Result<Arc<LocalNode>, NodeError> {
        let missing = |what: &str| NodeError::Configuration(format!("{} is required", what));

        let handler = self.handler.ok_or_else(|| missing("message handler"))?;
        let factory = self.factory.ok_or_else(|| missing("peer factory"))?;
        let listener = self.listener.ok_or_else(|| missing("peer listener"))?;

        let acl = match (self.acl, &self.config.acl) {
            (Some(acl), _) => Some(acl),
            (None, Some(rules)) => Some(Arc::new(
                AccessControl::from_config(rules)
                    .map_err(|e| NodeError::Configuration(e.to_string()))?,
            )),
            (None, None) => None,
        };

        let identity = self.identity.unwrap_or_else(|| {
            Arc::new(NodeIdentity::new(
                self.config.port,
                self.config.user_agent.clone(),
                self.config.relay,
            ))
        });
        let peers = self
            .peers
            .unwrap_or_else(|| Arc::new(PeerSet::with_capacity(self.config.max_connections)));
        let delayer = self.delayer.unwrap_or_else(|| Arc::new(TokioDelayer));

        // Nothing is admitted before the first start
        let cancel = CancellationToken::new();
        cancel.cancel();

        Ok(Arc::new(LocalNode {
            config: self.config,
            identity,
            peers,
            ledger: self.ledger,
            handler,
            factory,
            listener,
            delayer,
            acl,
            cancel: Mutex::new(cancel),
            running: AtomicBool::new(false),
        }))
    }
}

/// The local node: connection management and message delivery
pub struct LocalNode {
    config: NetworkConfig,
    identity: Arc<NodeIdentity>,
    peers: Arc<PeerSet>,
    ledger: Option<SharedBlockchain>,
    handler: Arc<dyn MessageHandler>,
    factory: Arc<dyn PeerFactory>,
    listener: Arc<dyn PeerListener>,
    delayer: Arc<dyn Delayer>,
    acl: Option<Arc<AccessControl>>,
    /// Token of the current generation
    cancel: Mutex<CancellationToken>,
    running: AtomicBool,
}

impl LocalNode {
    pub fn builder(config: NetworkConfig) -> LocalNodeBuilder {
        LocalNodeBuilder {
            config,
            identity: None,
            peers: None,
            ledger: None,
            handler: None,
            factory: None,
            listener: None,
            delayer: None,
            acl: None,
        }
    }

    pub fn identity(&self) -> &Arc<NodeIdentity> {
        &self.identity
    }

    pub fn peers(&self) -> &Arc<PeerSet> {
        &self.peers
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Version message for the handshake, with the current time and height
    pub async fn version_payload(&self) -> VersionPayload {
        self.identity.version_payload(self.height().await)
    }

    async fn height(&self) -> Option<u32> {
        match &self.ledger {
            Some(ledger) => Some(ledger.read().await.height()),
            None => None,
        }
    }

    pub async fn status(&self) -> NodeStatus {
        NodeStatus {
            port: self.config.port,
            peers: self.peers.len().await,
            height: self.height().await,
            running: self.is_running(),
        }
    }

    /// Start a new generation: dial every seed and start listening. Any
    /// previous generation is stopped first.
    pub async fn start(self: &Arc<Self>) -> Result<(), NodeError> {
        self.stop().await;

        let token = CancellationToken::new();
        *self.cancel.lock().await = token.clone();

        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_SIZE);
        self.spawn_admission(events_rx, token.clone());

        for seed in &self.config.seeds {
            self.spawn_dial(seed.clone(), events_tx.clone(), token.clone());
        }

        if let Err(e) = self.listener.start(events_tx).await {
            log::error!("Failed to start listener on port {}: {}", self.config.port, e);
            self.stop().await;
            return Err(NodeError::Listener(e));
        }

        self.running.store(true, Ordering::SeqCst);
        log::info!(
            "Node started on port {} with {} seeds",
            self.config.port,
            self.config.seeds.len()
        );
        Ok(())
    }

    /// Stop listening, end the receive loops and disconnect every peer.
    /// Safe to call any number of times.
    pub async fn stop(&self) {
        self.listener.stop().await;
        self.cancel.lock().await.cancel();

        let peers = self.peers.drain().await;
        for peer in &peers {
            peer.disconnect().await;
            self.handler.peer_closed(peer.address()).await;
        }

        if self.running.swap(false, Ordering::SeqCst) {
            log::info!("Node stopped, disconnected {} peers", peers.len());
        }
    }

    fn spawn_dial(
        &self,
        seed: String,
        events: mpsc::Sender<Arc<dyn Peer>>,
        token: CancellationToken,
    ) {
        let factory = self.factory.clone();
        tokio::spawn(async move {
            let connected = tokio::select! {
                _ = token.cancelled() => return,
                connected = factory.connect_to(&seed) => connected,
            };
            match connected {
                Ok(peer) => {
                    if let Err(mpsc::error::SendError(peer)) = events.send(peer).await {
                        peer.disconnect().await;
                    }
                }
                Err(e) => log::warn!("Failed to connect to seed {}: {}", seed, e),
            }
        });
    }

    fn spawn_admission(
        self: &Arc<Self>,
        mut events: mpsc::Receiver<Arc<dyn Peer>>,
        token: CancellationToken,
    ) {
        let node = self.clone();
        tokio::spawn(async move {
            loop {
                let peer = tokio::select! {
                    _ = token.cancelled() => break,
                    peer = events.recv() => match peer {
                        Some(peer) => peer,
                        None => break,
                    },
                };
                node.admit(peer, &token).await;
            }

            // Peers still queued belong to a finished generation
            events.close();
            while let Ok(peer) = events.try_recv() {
                peer.disconnect().await;
            }
        });
    }

    /// Run a newly connected peer through the handshake gate of the
    /// current generation
    pub async fn on_peer_connected(self: &Arc<Self>, peer: Arc<dyn Peer>) {
        let token = self.cancel.lock().await.clone();
        self.admit(peer, &token).await;
    }

    async fn admit(self: &Arc<Self>, peer: Arc<dyn Peer>, token: &CancellationToken) {
        let addr = peer.address();
        if let Err(e) = self.try_admit(peer, token).await {
            log::warn!("Peer {} rejected: {}", addr, e);
        }
    }

    async fn try_admit(
        self: &Arc<Self>,
        peer: Arc<dyn Peer>,
        token: &CancellationToken,
    ) -> Result<(), PeerError> {
        let addr = peer.address();

        if let Some(acl) = &self.acl {
            if !acl.is_allowed(&addr).await {
                peer.disconnect().await;
                return Err(PeerError::Denied(addr));
            }
        }

        if let Err(e) = self.peers.insert(peer.clone(), token).await {
            peer.disconnect().await;
            return Err(e);
        }

        self.spawn_receive_loop(peer.clone(), token.clone());

        let version = Message::Version(self.version_payload().await);
        if let Err(e) = peer.send(version).await {
            self.close_peer(&peer).await;
            return Err(e);
        }

        log::debug!("Sent version to {}", addr);
        Ok(())
    }

    /// Remove a peer and disconnect it, unless someone else already did
    async fn close_peer(&self, peer: &Arc<dyn Peer>) {
        if self.peers.remove(peer).await {
            peer.disconnect().await;
            self.handler.peer_closed(peer.address()).await;
        }
    }

    fn spawn_receive_loop(self: &Arc<Self>, peer: Arc<dyn Peer>, token: CancellationToken) {
        let node = self.clone();
        tokio::spawn(async move {
            node.receive_loop(peer, token).await;
        });
    }

    async fn receive_loop(&self, peer: Arc<dyn Peer>, token: CancellationToken) {
        let addr = peer.address();
        let interval = self.config.message_interval();

        loop {
            let message = tokio::select! {
                _ = token.cancelled() => return,
                message = peer.receive() => message,
            };

            match message {
                None => {
                    if !peer.is_connected() {
                        log::info!("Peer {} closed the connection", addr);
                        break;
                    }
                }
                Some(message) if message.is_handshake() == peer.is_ready() => {
                    log::debug!(
                        "Dropped {} from {}: handshake {}",
                        message.command(),
                        addr,
                        if peer.is_ready() { "already complete" } else { "pending" }
                    );
                }
                Some(message) => {
                    if let Err(e) = self.handler.handle(message, peer.clone()).await {
                        log::warn!("Disconnecting {}: {}", addr, e);
                        break;
                    }
                }
            }

            if !self.delayer.delay(interval, &token).await {
                return;
            }
        }

        self.close_peer(&peer).await;
    }
}
