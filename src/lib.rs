// connpool - HTTP/1.1 keep-alive connection pool

pub mod config;
pub mod pool;
pub mod protocol;
pub mod proxy;
pub mod transport;
pub mod utils;

// Re-export commonly used types
pub use pool::{ConnectionPool, OverflowPolicy, PoolConfig, PoolStats, RequestOptions, Retries};
pub use protocol::{HeaderMultiMap, Origin, Request, Response};
pub use proxy::{proxy_from_url, ProxyManager};
pub use transport::{Connector, Probe, TcpConnector, Transport};
pub use utils::error::{PoolError, Result};
