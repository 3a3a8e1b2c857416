//! In-process transport over tokio duplex pipes.
//!
//! A [`MemoryConnector`] plays the network: connecting fails with
//! `ConnectionRefused` until [`MemoryConnector::listen`] is called, after
//! which every connect hands the server half of a fresh pipe to the
//! [`MemoryListener`]. Connections queue up like a TCP backlog, so a listener
//! that never accepts models an unresponsive server.

use super::{Connector, Probe, Transport};
use crate::protocol::Origin;
use futures::task::noop_waker_ref;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::io::{duplex, AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tokio::sync::mpsc;

const PIPE_CAPACITY: usize = 64 * 1024;

/// One end of an in-memory connection.
#[derive(Debug)]
pub struct MemoryStream {
    inner: DuplexStream,
    peeked: Option<u8>,
}

impl MemoryStream {
    pub(crate) fn new(inner: DuplexStream) -> Self {
        Self {
            inner,
            peeked: None,
        }
    }
}

impl AsyncRead for MemoryStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if buf.remaining() > 0 {
            if let Some(byte) = self.peeked.take() {
                buf.put_slice(&[byte]);
                return Poll::Ready(Ok(()));
            }
        }
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for MemoryStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

impl Transport for MemoryStream {
    fn probe(&mut self) -> Probe {
        if self.peeked.is_some() {
            return Probe::DataAvailable;
        }

        let mut cx = Context::from_waker(noop_waker_ref());
        let mut byte = [0u8; 1];
        let mut buf = ReadBuf::new(&mut byte);
        match Pin::new(&mut self.inner).poll_read(&mut cx, &mut buf) {
            Poll::Pending => Probe::WouldBlock,
            Poll::Ready(Ok(())) if buf.filled().is_empty() => Probe::Eof,
            Poll::Ready(Ok(())) => {
                self.peeked = Some(byte[0]);
                Probe::DataAvailable
            }
            Poll::Ready(Err(_)) => Probe::Eof,
        }
    }
}

type Backlog = mpsc::UnboundedSender<MemoryStream>;

/// In-memory "network" with at most one listening server.
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    backlog: Arc<Mutex<Option<Backlog>>>,
    connects: Arc<AtomicUsize>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start accepting connections, replacing any previous listener.
    pub fn listen(&self) -> MemoryListener {
        let (tx, rx) = mpsc::unbounded_channel();
        *self
            .backlog
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(tx);
        MemoryListener { rx }
    }

    /// Number of connections successfully opened so far.
    pub fn connection_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    fn open(&self) -> io::Result<MemoryStream> {
        let backlog = self
            .backlog
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let tx = backlog
            .as_ref()
            .ok_or_else(|| io::Error::from(io::ErrorKind::ConnectionRefused))?;

        let (client, server) = duplex(PIPE_CAPACITY);
        tx.send(MemoryStream::new(server))
            .map_err(|_| io::Error::from(io::ErrorKind::ConnectionRefused))?;
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(MemoryStream::new(client))
    }
}

impl Connector for MemoryConnector {
    type Stream = MemoryStream;

    fn connect(&self, _origin: &Origin) -> impl Future<Output = io::Result<MemoryStream>> + Send {
        let result = self.open();
        async move { result }
    }
}

/// Server side of a [`MemoryConnector`]. Dropping it refuses new connects.
#[derive(Debug)]
pub struct MemoryListener {
    rx: mpsc::UnboundedReceiver<MemoryStream>,
}

impl MemoryListener {
    /// Next queued connection, or `None` once the connector is gone.
    pub async fn accept(&mut self) -> Option<MemoryStream> {
        self.rx.recv().await
    }
}
