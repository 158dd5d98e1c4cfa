//! Newline-delimited JSON over TCP.

use async_trait::async_trait;
use beacon_protocol::{Frame, FrameCodec, ProtocolError};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::traits::{Connection, Outbound, Transport, TransportError};

/// TCP transport configuration.
#[derive(Debug, Clone)]
pub struct TcpConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Maximum frame size in bytes.
    pub max_frame_size: usize,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], beacon_protocol::address::DEFAULT_PORT)),
            max_frame_size: beacon_protocol::codec::MAX_FRAME_SIZE,
        }
    }
}

/// TCP transport.
pub struct TcpTransport {
    listener: TcpListener,
    config: TcpConfig,
}

impl TcpTransport {
    /// Bind a new TCP transport.
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the address fails.
    pub async fn new(config: TcpConfig) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(config.bind_addr).await?;
        info!("TCP transport listening on {}", listener.local_addr()?);
        Ok(Self { listener, config })
    }

    /// Bind with the default frame size limit.
    ///
    /// # Errors
    ///
    /// Returns an error if binding fails.
    pub async fn bind(addr: SocketAddr) -> Result<Self, TransportError> {
        Self::new(TcpConfig {
            bind_addr: addr,
            ..Default::default()
        })
        .await
    }

    /// Get the local address this transport is bound to.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr().ok()
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn accept(&self) -> Result<Box<dyn Connection>, TransportError> {
        let (stream, addr) = self.listener.accept().await?;
        debug!("Accepted TCP connection from {}", addr);
        let conn = TcpConnection::new(stream, self.config.max_frame_size)?;
        Ok(Box::new(conn))
    }

    fn name(&self) -> &'static str {
        "tcp"
    }
}

/// A TCP connection with a queued writer.
pub struct TcpConnection {
    reader: FramedRead<OwnedReadHalf, FrameCodec>,
    outbound: Outbound,
    writer: Option<JoinHandle<()>>,
    closing: CancellationToken,
    remote_addr: SocketAddr,
    is_open: Arc<AtomicBool>,
}

impl TcpConnection {
    /// Wrap an established stream.
    ///
    /// # Errors
    ///
    /// Returns an error if the peer address cannot be read.
    pub fn new(stream: TcpStream, max_frame_size: usize) -> Result<Self, TransportError> {
        let remote_addr = stream.peer_addr()?;
        let _ = stream.set_nodelay(true);
        let (read_half, write_half) = stream.into_split();

        let (outbound, queue) = mpsc::unbounded_channel();
        let closing = CancellationToken::new();
        let is_open = Arc::new(AtomicBool::new(true));
        let writer = tokio::spawn(write_loop(
            FramedWrite::new(write_half, FrameCodec::with_max_frame_size(max_frame_size)),
            queue,
            closing.clone(),
            is_open.clone(),
        ));

        Ok(Self {
            reader: FramedRead::new(read_half, FrameCodec::with_max_frame_size(max_frame_size)),
            outbound,
            writer: Some(writer),
            closing,
            remote_addr,
            is_open,
        })
    }

    /// Connect to a broker.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr).await?;
        Self::new(stream, beacon_protocol::codec::MAX_FRAME_SIZE)
    }
}

async fn write_loop(
    mut sink: FramedWrite<OwnedWriteHalf, FrameCodec>,
    mut queue: mpsc::UnboundedReceiver<Frame>,
    closing: CancellationToken,
    is_open: Arc<AtomicBool>,
) {
    loop {
        let frame = tokio::select! {
            frame = queue.recv() => frame,
            () = closing.cancelled() => {
                // Flush whatever was queued before the close.
                while let Ok(frame) = queue.try_recv() {
                    if write_frame(&mut sink, frame).await.is_err() {
                        break;
                    }
                }
                break;
            }
        };
        let Some(frame) = frame else { break };
        if write_frame(&mut sink, frame).await.is_err() {
            break;
        }
    }

    is_open.store(false, Ordering::Release);
    let _ = sink.get_mut().shutdown().await;
    trace!("Writer stopped");
}

/// Write one frame. Oversized frames are dropped without closing.
async fn write_frame(
    sink: &mut FramedWrite<OwnedWriteHalf, FrameCodec>,
    frame: Frame,
) -> Result<(), ProtocolError> {
    match sink.send(frame).await {
        Err(ProtocolError::FrameTooLarge(limit)) => {
            warn!(limit, "Dropping oversized outbound frame");
            Ok(())
        }
        other => other,
    }
}

#[async_trait]
impl Connection for TcpConnection {
    async fn recv(&mut self) -> Result<Option<Frame>, TransportError> {
        match self.reader.next().await {
            Some(Ok(frame)) => Ok(Some(frame)),
            Some(Err(e)) => Err(e.into()),
            None => Ok(None),
        }
    }

    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        self.outbound
            .send(frame)
            .map_err(|_| TransportError::ConnectionClosed)
    }

    fn outbound(&self) -> Outbound {
        self.outbound.clone()
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.closing.cancel();
        if let Some(writer) = self.writer.take() {
            let _ = writer.await;
        }
        debug!("Closed connection to {}", self.remote_addr);
        Ok(())
    }

    fn remote_addr(&self) -> Option<String> {
        Some(self.remote_addr.to_string())
    }

    fn is_open(&self) -> bool {
        self.is_open.load(Ordering::Acquire)
    }
}

impl Drop for TcpConnection {
    fn drop(&mut self) {
        self.closing.cancel();
    }
}
