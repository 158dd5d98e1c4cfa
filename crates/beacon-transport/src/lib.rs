//! # beacon-transport
//!
//! Transport layer for the Beacon broker.
//!
//! Frames travel as newline-delimited JSON over TCP. Each connection splits
//! into a read half, consumed by the session's own task, and a write half
//! drained from a queue so other tasks can deliver frames concurrently.
//!
//! ```rust,ignore
//! use beacon_transport::{Connection, TcpTransport, Transport};
//!
//! async fn serve(transport: TcpTransport) {
//!     while let Ok(mut conn) = transport.accept().await {
//!         tokio::spawn(async move {
//!             while let Ok(Some(frame)) = conn.recv().await {
//!                 // Process frame
//!             }
//!         });
//!     }
//! }
//! ```

pub mod tcp;
pub mod traits;

pub use tcp::{TcpConfig, TcpConnection, TcpTransport};
pub use traits::{Connection, Outbound, Transport, TransportError};
