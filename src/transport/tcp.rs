use super::{Connector, Probe, Transport};
use crate::protocol::Origin;
use socket2::SockRef;
use std::future::Future;
use std::io;
use std::mem::MaybeUninit;
use tokio::net::TcpStream;
use tracing::trace;

/// Plain TCP connector backed by tokio.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    nodelay: bool,
}

impl TcpConnector {
    pub fn new() -> Self {
        Self { nodelay: true }
    }

    /// Toggle `TCP_NODELAY` on new connections (enabled by default).
    pub fn nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl Connector for TcpConnector {
    type Stream = TcpStream;

    fn connect(&self, origin: &Origin) -> impl Future<Output = io::Result<TcpStream>> + Send {
        // IPv6 literals keep their URL brackets in the origin.
        let host = origin
            .host()
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        let port = origin.port();
        let nodelay = self.nodelay;

        async move {
            let stream = TcpStream::connect((host.as_str(), port)).await?;
            stream.set_nodelay(nodelay)?;
            trace!("Connected to {}:{} from {:?}", host, port, stream.local_addr().ok());
            Ok(stream)
        }
    }
}

impl Transport for TcpStream {
    fn probe(&mut self) -> Probe {
        // tokio sockets are non-blocking, so MSG_PEEK returns immediately.
        let mut buf = [MaybeUninit::<u8>::uninit(); 1];
        match SockRef::from(&*self).peek(&mut buf) {
            Ok(0) => Probe::Eof,
            Ok(_) => Probe::DataAvailable,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Probe::WouldBlock,
            Err(e) => {
                trace!("Probe failed on idle connection: {}", e);
                Probe::Eof
            }
        }
    }
}
