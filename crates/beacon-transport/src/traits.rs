//! Transport abstraction traits for Beacon.
//!
//! These traits define the interface that all transport implementations must provide,
//! allowing the server to be transport-agnostic.

use async_trait::async_trait;
use beacon_protocol::Frame;
use thiserror::Error;
use tokio::sync::mpsc;

/// Queue feeding a connection's writer.
pub type Outbound = mpsc::UnboundedSender<Frame>;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(#[from] beacon_protocol::ProtocolError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A transport that can accept connections.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Accept a new connection.
    ///
    /// This method blocks until a new connection is available or an error occurs.
    async fn accept(&self) -> Result<Box<dyn Connection>, TransportError>;

    /// Get the transport name (e.g., "tcp").
    fn name(&self) -> &'static str;
}

/// An active connection over a transport.
///
/// Reads happen on the caller's task; writes go through a queue drained by
/// a dedicated writer, so any task holding [`Connection::outbound`] can send
/// without touching the socket.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Receive the next frame from the connection.
    ///
    /// Returns `None` if the connection is closed cleanly.
    async fn recv(&mut self) -> Result<Option<Frame>, TransportError>;

    /// Queue a frame for sending.
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError>;

    /// A handle for queueing frames from other tasks.
    fn outbound(&self) -> Outbound;

    /// Flush queued frames and close the connection.
    async fn close(&mut self) -> Result<(), TransportError>;

    /// Get the remote address of the connection, if available.
    fn remote_addr(&self) -> Option<String> {
        None
    }

    /// Check if the connection is still open.
    fn is_open(&self) -> bool;
}
