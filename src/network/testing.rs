//! In-memory peers, factories and listeners for unit tests

use crate::network::delay::Delayer;
use crate::network::message::Message;
use crate::network::peer::{Peer, PeerError, PeerFactory, PeerListener};
use async_trait::async_trait;
use std::collections::HashSet;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio_util::sync::CancellationToken;

pub fn local_addr(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

/// Peer whose inbound stream is fed by the test and whose outbound
/// messages are recorded
pub struct MockPeer {
    addr: SocketAddr,
    inbound_tx: mpsc::UnboundedSender<Message>,
    inbound: Mutex<mpsc::UnboundedReceiver<Message>>,
    sent: StdMutex<Vec<Message>>,
    connected: AtomicBool,
    ready: AtomicBool,
    fail_sends: AtomicBool,
    disconnects: AtomicUsize,
    closed: CancellationToken,
    send_gate: StdMutex<Option<Arc<Notify>>>,
    send_entered: Notify,
}

impl MockPeer {
    pub fn new(port: u16) -> Arc<Self> {
        Self::at(local_addr(port))
    }

    pub fn at(addr: SocketAddr) -> Arc<Self> {
        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        Arc::new(Self {
            addr,
            inbound_tx,
            inbound: Mutex::new(inbound),
            sent: StdMutex::new(Vec::new()),
            connected: AtomicBool::new(true),
            ready: AtomicBool::new(false),
            fail_sends: AtomicBool::new(false),
            disconnects: AtomicUsize::new(0),
            closed: CancellationToken::new(),
            send_gate: StdMutex::new(None),
            send_entered: Notify::new(),
        })
    }

    /// Peer that already completed the handshake
    pub fn ready(port: u16) -> Arc<Self> {
        let peer = Self::new(port);
        peer.mark_ready();
        peer
    }

    /// Deliver a message as if the remote had sent it
    pub fn push(&self, message: Message) {
        let _ = self.inbound_tx.send(message);
    }

    pub fn sent(&self) -> Vec<Message> {
        self.sent.lock().unwrap().clone()
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn fail_sends(&self) {
        self.fail_sends.store(true, Ordering::SeqCst);
    }

    /// Park every `send` until the returned gate is notified
    pub fn hold_sends(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.send_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    /// Wait until a `send` is parked on the gate
    pub async fn send_started(&self) {
        self.send_entered.notified().await;
    }
}

#[async_trait]
impl Peer for MockPeer {
    fn address(&self) -> SocketAddr {
        self.addr
    }

    async fn send(&self, message: Message) -> Result<(), PeerError> {
        let gate = self.send_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            self.send_entered.notify_one();
            gate.notified().await;
        }
        if self.fail_sends.load(Ordering::SeqCst) || !self.is_connected() {
            return Err(PeerError::Disconnected);
        }
        self.sent.lock().unwrap().push(message);
        Ok(())
    }

    async fn receive(&self) -> Option<Message> {
        let mut inbound = self.inbound.lock().await;
        tokio::select! {
            _ = self.closed.cancelled() => None,
            message = inbound.recv() => message,
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn mark_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    async fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        self.closed.cancel();
    }
}

/// Factory that only reaches the listed endpoints
#[derive(Default)]
pub struct MockFactory {
    reachable: HashSet<String>,
    created: StdMutex<Vec<Arc<MockPeer>>>,
}

impl MockFactory {
    pub fn reaching<I, S>(endpoints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            reachable: endpoints.into_iter().map(Into::into).collect(),
            created: StdMutex::new(Vec::new()),
        }
    }

    pub fn created(&self) -> Vec<Arc<MockPeer>> {
        self.created.lock().unwrap().clone()
    }
}

#[async_trait]
impl PeerFactory for MockFactory {
    async fn connect_to(&self, endpoint: &str) -> Result<Arc<dyn Peer>, PeerError> {
        if !self.reachable.contains(endpoint) {
            return Err(PeerError::ConnectionFailed(endpoint.to_string()));
        }
        let addr: SocketAddr = endpoint
            .parse()
            .map_err(|_| PeerError::ConnectionFailed(endpoint.to_string()))?;
        let peer = MockPeer::at(addr);
        self.created.lock().unwrap().push(peer.clone());
        Ok(peer)
    }
}

/// Listener whose accepted peers are injected by the test
#[derive(Default)]
pub struct MockListener {
    events: Mutex<Option<mpsc::Sender<Arc<dyn Peer>>>>,
    starts: AtomicUsize,
    stops: AtomicUsize,
    fail_start: AtomicBool,
}

impl MockListener {
    pub fn failing() -> Self {
        let listener = Self::default();
        listener.fail_start.store(true, Ordering::SeqCst);
        listener
    }

    /// Report an inbound connection. Returns false if the listener is stopped.
    pub async fn accept(&self, peer: Arc<dyn Peer>) -> bool {
        let events = self.events.lock().await.clone();
        match events {
            Some(events) => events.send(peer).await.is_ok(),
            None => false,
        }
    }

    pub fn start_count(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PeerListener for MockListener {
    async fn start(&self, events: mpsc::Sender<Arc<dyn Peer>>) -> Result<(), PeerError> {
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(PeerError::ConnectionFailed("port in use".to_string()));
        }
        self.starts.fetch_add(1, Ordering::SeqCst);
        *self.events.lock().await = Some(events);
        Ok(())
    }

    async fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.events.lock().await.take();
    }
}

/// Delayer that only yields to the scheduler
pub struct InstantDelayer;

#[async_trait]
impl Delayer for InstantDelayer {
    async fn delay(&self, _duration: Duration, cancel: &CancellationToken) -> bool {
        tokio::task::yield_now().await;
        !cancel.is_cancelled()
    }
}

/// Poll `condition` until it holds or a second passes
pub async fn eventually<F, Fut>(mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition().await
}
