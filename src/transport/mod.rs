//! Byte-stream transports the pool runs HTTP over.
//!
//! The pool only needs to open a stream to an [`Origin`], read and write it,
//! and ask it without blocking whether the peer has gone away. Deadlines are
//! applied by the caller around each operation.

pub mod memory;
pub mod tcp;

use crate::protocol::Origin;
use std::future::Future;
use std::io;
use tokio::io::{AsyncRead, AsyncWrite};

pub use memory::{MemoryConnector, MemoryListener, MemoryStream};
pub use tcp::TcpConnector;

/// Result of a non-blocking liveness check on an idle stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    /// The peer closed the stream (or it failed).
    Eof,
    /// Unread bytes are waiting on the stream.
    DataAvailable,
    /// Nothing to read yet: the stream looks healthy.
    WouldBlock,
}

/// A connected, exclusively owned byte stream. Dropping it closes it.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send + 'static {
    /// Check the stream without waiting and without consuming data.
    fn probe(&mut self) -> Probe;
}

/// Opens new transports to an origin.
pub trait Connector: Send + Sync + 'static {
    type Stream: Transport;

    fn connect(&self, origin: &Origin) -> impl Future<Output = io::Result<Self::Stream>> + Send;
}
