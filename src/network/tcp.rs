//! TCP transport
//!
//! Framing codec plus the `Peer`, `PeerFactory` and `PeerListener`
//! implementations used by the node binary. Every connection gets a reader
//! task and a writer task; the `TcpPeer` handle talks to them over channels.

use crate::network::message::{Message, MAGIC, MAX_MESSAGE_SIZE};
use crate::network::peer::{Peer, PeerError, PeerFactory, PeerListener};
use async_trait::async_trait;
use bytes::{Buf, BufMut, BytesMut};
use futures::sink::SinkExt;
use futures::stream::StreamExt;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio_util::codec::{Decoder, Encoder, Framed};
use tokio_util::sync::CancellationToken;

/// Magic (4) + length (4)
const HEADER_SIZE: usize = 8;

/// Messages buffered per direction before senders wait
const QUEUE_SIZE: usize = 100;

/// Length-prefixed framing: magic, big-endian payload length, JSON payload
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageCodec;

impl Encoder<Message> for MessageCodec {
    type Error = io::Error;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let data = item
            .to_bytes()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;

        if data.len() > MAX_MESSAGE_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Message too large: {} bytes", data.len()),
            ));
        }

        dst.reserve(HEADER_SIZE + data.len());
        dst.put_slice(&MAGIC);
        dst.put_u32(data.len() as u32);
        dst.put_slice(&data);

        Ok(())
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        if src[..4] != MAGIC {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "Invalid magic bytes",
            ));
        }

        let len = u32::from_be_bytes([src[4], src[5], src[6], src[7]]) as usize;
        if len > MAX_MESSAGE_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Frame of {} bytes exceeds limit", len),
            ));
        }

        if src.len() < HEADER_SIZE + len {
            src.reserve(HEADER_SIZE + len - src.len());
            return Ok(None);
        }

        src.advance(HEADER_SIZE);
        let data = src.split_to(len);

        let msg = Message::from_bytes(&data)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;

        Ok(Some(msg))
    }
}

/// A peer reached over TCP
pub struct TcpPeer {
    addr: SocketAddr,
    tx: mpsc::Sender<Message>,
    inbound: Mutex<mpsc::Receiver<Message>>,
    connected: Arc<AtomicBool>,
    ready: AtomicBool,
    shutdown: CancellationToken,
}

impl TcpPeer {
    /// Take ownership of `stream` and start its reader and writer tasks.
    /// `outbound` is true if we dialled the peer.
    pub fn spawn(stream: TcpStream, addr: SocketAddr, outbound: bool) -> Arc<Self> {
        let framed = Framed::new(stream, MessageCodec);
        let (mut writer, mut reader) = framed.split();

        let (tx, mut out_rx) = mpsc::channel::<Message>(QUEUE_SIZE);
        let (in_tx, inbound) = mpsc::channel::<Message>(QUEUE_SIZE);
        let connected = Arc::new(AtomicBool::new(true));
        let shutdown = CancellationToken::new();

        let token = shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    msg = out_rx.recv() => match msg {
                        Some(msg) => {
                            if let Err(e) = writer.send(msg).await {
                                log::warn!("Error writing to {}: {}", addr, e);
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
            let _ = writer.close().await;
            token.cancel();
        });

        let token = shutdown.clone();
        let flag = connected.clone();
        tokio::spawn(async move {
            loop {
                let next = tokio::select! {
                    _ = token.cancelled() => break,
                    next = reader.next() => next,
                };
                match next {
                    Some(Ok(msg)) => {
                        let delivered = tokio::select! {
                            _ = token.cancelled() => false,
                            sent = in_tx.send(msg) => sent.is_ok(),
                        };
                        if !delivered {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        log::warn!("Error reading from {}: {}", addr, e);
                        break;
                    }
                    None => {
                        let direction = if outbound { "Outbound" } else { "Inbound" };
                        log::info!("{} peer {} disconnected", direction, addr);
                        break;
                    }
                }
            }
            // Cleared before `in_tx` drops so a closed receive sees it
            flag.store(false, Ordering::SeqCst);
            token.cancel();
        });

        Arc::new(Self {
            addr,
            tx,
            inbound: Mutex::new(inbound),
            connected,
            ready: AtomicBool::new(false),
            shutdown,
        })
    }
}

#[async_trait]
impl Peer for TcpPeer {
    fn address(&self) -> SocketAddr {
        self.addr
    }

    async fn send(&self, message: Message) -> Result<(), PeerError> {
        if !self.is_connected() {
            return Err(PeerError::Disconnected);
        }
        self.tx
            .send(message)
            .await
            .map_err(|_| PeerError::Disconnected)
    }

    async fn receive(&self) -> Option<Message> {
        self.inbound.lock().await.recv().await
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
        if self.connected.swap(false, Ordering::SeqCst) {
            log::debug!("Disconnecting {}", self.addr);
        }
        self.shutdown.cancel();
    }
}

/// Dials peers with a connect timeout
#[derive(Debug, Clone)]
pub struct TcpPeerFactory {
    timeout: Duration,
}

impl TcpPeerFactory {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl PeerFactory for TcpPeerFactory {
    async fn connect_to(&self, endpoint: &str) -> Result<Arc<dyn Peer>, PeerError> {
        let stream = match tokio::time::timeout(self.timeout, TcpStream::connect(endpoint)).await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(PeerError::ConnectionFailed(format!("{}: {}", endpoint, e)))
            }
            Err(_) => return Err(PeerError::Timeout(endpoint.to_string())),
        };

        let addr = stream
            .peer_addr()
            .map_err(|e| PeerError::ConnectionFailed(e.to_string()))?;

        log::info!("Connected to peer: {}", addr);
        Ok(TcpPeer::spawn(stream, addr, true))
    }
}

struct ListenerState {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
}

/// Accepts inbound TCP connections
pub struct TcpPeerListener {
    bind_addr: SocketAddr,
    state: Mutex<Option<ListenerState>>,
}

impl TcpPeerListener {
    /// Listen on every interface at `port`
    pub fn new(port: u16) -> Self {
        Self::bind_to(SocketAddr::from(([0, 0, 0, 0], port)))
    }

    pub fn bind_to(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            state: Mutex::new(None),
        }
    }

    /// Bound address while running
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.state.lock().await.as_ref().map(|s| s.local_addr)
    }
}

#[async_trait]
impl PeerListener for TcpPeerListener {
    async fn start(&self, events: mpsc::Sender<Arc<dyn Peer>>) -> Result<(), PeerError> {
        let mut state = self.state.lock().await;
        if let Some(previous) = state.take() {
            previous.shutdown.cancel();
        }

        let listener = TcpListener::bind(self.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        log::info!("Listening on {}", local_addr);

        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        tokio::spawn(async move {
            loop {
                let accepted = tokio::select! {
                    _ = token.cancelled() => break,
                    accepted = listener.accept() => accepted,
                };
                match accepted {
                    Ok((stream, addr)) => {
                        log::info!("Incoming connection from {}", addr);
                        let peer: Arc<dyn Peer> = TcpPeer::spawn(stream, addr, false);
                        if events.send(peer).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        log::warn!("Failed to accept connection: {}", e);
                    }
                }
            }
            log::info!("Stopped listening on {}", local_addr);
        });

        *state = Some(ListenerState {
            local_addr,
            shutdown,
        });
        Ok(())
    }

    async fn stop(&self) {
        if let Some(state) = self.state.lock().await.take() {
            state.shutdown.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::message::PingPayload;

    #[test]
    fn test_message_codec() {
        let mut codec = MessageCodec;
        let msg = Message::Ping(PingPayload {
            nonce: 12345,
            height: Some(3),
        });

        let mut buf = BytesMut::new();
        codec.encode(msg.clone(), &mut buf).unwrap();

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, msg);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_partial_frame_waits() {
        let mut codec = MessageCodec;
        let mut buf = BytesMut::new();
        codec.encode(Message::Verack, &mut buf).unwrap();

        let mut partial = buf.split_to(buf.len() - 1);
        assert!(codec.decode(&mut partial).unwrap().is_none());
        partial.unsplit(buf);
        assert_eq!(codec.decode(&mut partial).unwrap(), Some(Message::Verack));
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut codec = MessageCodec;
        let mut buf = BytesMut::from(&[0u8, 1, 2, 3, 0, 0, 0, 0][..]);
        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut codec = MessageCodec;
        let mut buf = BytesMut::new();
        buf.put_slice(&MAGIC);
        buf.put_u32(MAX_MESSAGE_SIZE as u32 + 1);
        assert!(codec.decode(&mut buf).is_err());
    }

    #[tokio::test]
    async fn test_connect_send_and_disconnect() {
        let listener = TcpPeerListener::bind_to(SocketAddr::from(([127, 0, 0, 1], 0)));
        let (events_tx, mut events) = mpsc::channel(4);
        listener.start(events_tx).await.unwrap();
        let addr = listener.local_addr().await.unwrap();

        let factory = TcpPeerFactory::new(Duration::from_secs(5));
        let outbound = factory.connect_to(&addr.to_string()).await.unwrap();
        let inbound = events.recv().await.unwrap();

        outbound.send(Message::Verack).await.unwrap();
        assert_eq!(inbound.receive().await, Some(Message::Verack));

        outbound.disconnect().await;
        assert!(!outbound.is_connected());
        assert!(outbound.send(Message::Verack).await.is_err());
        assert_eq!(inbound.receive().await, None);
        assert!(!inbound.is_connected());

        listener.stop().await;
        assert!(listener.local_addr().await.is_none());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_fails() {
        // Bind then drop to get a port nobody listens on
        let port = {
            let socket = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            socket.local_addr().unwrap().port()
        };
        let factory = TcpPeerFactory::new(Duration::from_secs(2));
        let result = factory.connect_to(&format!("127.0.0.1:{}", port)).await;
        assert!(result.is_err());
    }
}
