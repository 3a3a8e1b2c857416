//! Keep-alive connection pool for a single origin.

pub mod connection;
pub mod executor;
pub mod retry;

pub use connection::{ConnectionState, PooledConnection};
pub use retry::{Retries, RetryBudget};

use crate::protocol::types::{origin_form, parse_http_url};
use crate::protocol::{HeaderMultiMap, Origin, Request, Response};
use crate::transport::{Connector, TcpConnector, Transport};
use crate::utils::error::{PoolError, Result, TimeoutPhase};
use bytes::Bytes;
use connection::Lease;
use executor::RequestExecutor;
use http::Method;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, trace};

/// What `acquire` does when every slot is taken and nothing is idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// Open an extra connection that is closed instead of pooled on release.
    #[default]
    Overflow,
    /// Wait for a connection to be released (bounded by `pool_timeout_ms`).
    Block,
    /// Fail with `EmptyPool`.
    Error,
}

/// Configuration for connection pool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Maximum connections (idle plus checked out) kept for the origin
    #[serde(default = "default_max_size")]
    pub max_size: usize,
    /// Timeout for establishing new connections (milliseconds, at least 1)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Timeout for each socket read or write (milliseconds, at least 1)
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    /// Retries per request when none is given; negative means unlimited
    #[serde(default = "default_retries")]
    pub default_retries: i64,
    /// Behaviour when the pool is at capacity
    #[serde(default)]
    pub overflow: OverflowPolicy,
    /// How long `block` waits for a free connection (milliseconds, unset waits forever)
    #[serde(default)]
    pub pool_timeout_ms: Option<u64>,
    /// How long to keep idle connections alive (seconds, 0 disables)
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

fn default_max_size() -> usize {
    4
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_read_timeout_ms() -> u64 {
    30_000
}

fn default_retries() -> i64 {
    3
}

fn default_idle_timeout_secs() -> u64 {
    90
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: default_max_size(),
            connect_timeout_ms: default_connect_timeout_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            default_retries: default_retries(),
            overflow: OverflowPolicy::default(),
            pool_timeout_ms: None,
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

impl PoolConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn retries(&self) -> Retries {
        Retries::from_count(self.default_retries)
    }

    pub fn pool_timeout(&self) -> Option<Duration> {
        self.pool_timeout_ms.map(Duration::from_millis)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_size == 0 {
            return Err(PoolError::Config("pool max_size must be at least 1".to_string()));
        }
        if self.connect_timeout_ms == 0 || self.read_timeout_ms == 0 {
            return Err(PoolError::Config(
                "pool connect and read timeouts must be non-zero".to_string(),
            ));
        }
        if self.pool_timeout_ms.is_some() && self.overflow != OverflowPolicy::Block {
            return Err(PoolError::Config(
                "pool_timeout_ms only applies to the block overflow policy".to_string(),
            ));
        }
        Ok(())
    }
}

/// Per-call overrides for `request`.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub retries: Option<Retries>,
    pub headers: HeaderMultiMap,
    pub body: Option<Bytes>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = Some(Retries::Limited(retries));
        self
    }

    pub fn unlimited_retries(mut self) -> Self {
        self.retries = Some(Retries::Unlimited);
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }
}

/// Statistics about the connection pool
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub origin: String,
    pub max_size: usize,
    /// Connections parked and ready for reuse
    pub idle: usize,
    /// Pooled connections currently in use (overflow connections excluded)
    pub checked_out: usize,
    /// Slots with no connection behind them yet
    pub free_slots: usize,
    pub connections_opened: u64,
    pub requests: u64,
    /// Idle connections dropped by the reuse health check
    pub stale_discarded: u64,
    pub closed: bool,
}

struct PoolState<S: Transport> {
    idle: Vec<PooledConnection<S>>,
    free_slots: usize,
    checked_out: usize,
    closed: bool,
    connections_opened: u64,
    requests: u64,
    stale_discarded: u64,
}

pub(crate) struct Shared<S: Transport> {
    origin: Origin,
    state: Mutex<PoolState<S>>,
    available: Notify,
    next_id: AtomicU64,
}

impl<S: Transport> Shared<S> {
    fn lock(&self) -> MutexGuard<'_, PoolState<S>> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// A checked-out pooled connection went away without being parked.
    pub(crate) fn return_slot(&self) {
        {
            let mut state = self.lock();
            state.checked_out = state.checked_out.saturating_sub(1);
            state.free_slots += 1;
            trace!(
                "Slot returned for {} (free: {}, idle: {})",
                self.origin,
                state.free_slots,
                state.idle.len()
            );
        }
        self.available.notify_one();
    }
}

enum Checkout<S: Transport> {
    Idle(PooledConnection<S>),
    /// Open a new connection; `None` means an overflow connection.
    Fresh(Option<Lease<S>>),
}

/// Connection pool for one HTTP origin
///
/// Idle connections are reused most-recently-released first and checked for
/// peer closure before every reuse. Cloning is cheap and yields a handle to
/// the same pool.
pub struct ConnectionPool<C: Connector = TcpConnector> {
    config: Arc<PoolConfig>,
    connector: Arc<C>,
    shared: Arc<Shared<C::Stream>>,
}

impl<C: Connector> Clone for ConnectionPool<C> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            connector: Arc::clone(&self.connector),
            shared: Arc::clone(&self.shared),
        }
    }
}

impl ConnectionPool<TcpConnector> {
    /// Pool over plain TCP.
    pub fn new(origin: Origin, config: PoolConfig) -> Result<Self> {
        Self::with_connector(origin, config, TcpConnector::new())
    }

    /// Pool over plain TCP for the origin of `url`.
    pub fn from_url(url: &str, config: PoolConfig) -> Result<Self> {
        Self::new(Origin::parse(url)?, config)
    }
}

impl<C: Connector> ConnectionPool<C> {
    pub fn with_connector(origin: Origin, config: PoolConfig, connector: C) -> Result<Self> {
        config.validate()?;
        let state = PoolState {
            idle: Vec::new(),
            free_slots: config.max_size,
            checked_out: 0,
            closed: false,
            connections_opened: 0,
            requests: 0,
            stale_discarded: 0,
        };
        debug!(
            "Created pool for {} (max_size: {}, overflow: {:?})",
            origin, config.max_size, config.overflow
        );
        Ok(Self {
            config: Arc::new(config),
            connector: Arc::new(connector),
            shared: Arc::new(Shared {
                origin,
                state: Mutex::new(state),
                available: Notify::new(),
                next_id: AtomicU64::new(1),
            }),
        })
    }

    pub fn origin(&self) -> &Origin {
        &self.shared.origin
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Issue a request and read the full response.
    ///
    /// `target` is an origin-form path or an absolute URL on this pool's
    /// origin. A `Host` header is added unless `options` carries one.
    pub async fn request(
        &self,
        method: Method,
        target: &str,
        options: RequestOptions,
    ) -> Result<Response> {
        let target = self.resolve_target(target)?;

        let mut headers = HeaderMultiMap::new();
        if !options.headers.contains("host") {
            headers.append("Host", self.origin().host_header());
        }
        headers.extend(options.headers.iter());

        let request = Request {
            method,
            target,
            headers,
            body: options.body,
        };
        self.send(request, options.retries).await
    }

    /// Execute a fully prepared request, retrying under the given budget.
    pub async fn send(&self, request: Request, retries: Option<Retries>) -> Result<Response> {
        let retries = retries.unwrap_or_else(|| self.config.retries());
        RequestExecutor::new(self).execute(&request, retries).await
    }

    /// Whether `url` addresses this pool's origin. Origin-form paths do.
    pub fn is_same_host(&self, url: &str) -> bool {
        if url.starts_with('/') {
            return true;
        }
        Origin::parse(url).is_ok_and(|origin| &origin == self.origin())
    }

    fn resolve_target(&self, target: &str) -> Result<String> {
        if target.starts_with('/') || target == "*" {
            return Ok(target.to_string());
        }
        let url = parse_http_url(target)?;
        if Origin::from_url(&url)? != *self.origin() {
            return Err(PoolError::HostChanged {
                origin: self.origin().to_string(),
                url: target.to_string(),
            });
        }
        Ok(origin_form(&url))
    }

    /// Check out a connection: a healthy idle one if available, else a new one.
    ///
    /// Idle connections that fail the health check are discarded here and
    /// never reach the caller.
    pub async fn acquire(&self) -> Result<PooledConnection<C::Stream>> {
        loop {
            match self.checkout().await? {
                Checkout::Idle(mut conn) => {
                    if let Some(reason) = conn.staleness(self.config.idle_timeout()) {
                        self.shared.lock().stale_discarded += 1;
                        conn.discard(reason);
                        continue;
                    }
                    trace!("Reusing pooled connection #{} to {}", conn.id(), self.origin());
                    return Ok(conn);
                }
                Checkout::Fresh(lease) => {
                    if lease.is_none() {
                        debug!("Pool for {} is full, opening overflow connection", self.origin());
                    }
                    // On failure the lease drops and the slot is returned.
                    let stream = self.open().await?;
                    let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
                    self.shared.lock().connections_opened += 1;
                    debug!("Opened connection #{} to {}", id, self.origin());
                    return Ok(PooledConnection::new(stream, id, lease));
                }
            }
        }
    }

    /// Return a connection. It is parked for reuse only if `reusable`, the
    /// pool is open and it is not an overflow connection.
    pub fn release(&self, mut conn: PooledConnection<C::Stream>, reusable: bool) {
        let rejected = {
            let mut state = self.shared.lock();
            if reusable && !state.closed && !conn.is_overflow() {
                if let Some(lease) = conn.park() {
                    lease.disarm();
                }
                state.checked_out = state.checked_out.saturating_sub(1);
                trace!(
                    "Returned connection #{} to pool for {} (idle: {})",
                    conn.id(),
                    self.shared.origin,
                    state.idle.len() + 1
                );
                state.idle.push(conn);
                None
            } else {
                Some(conn)
            }
        };

        match rejected {
            // Dropped outside the lock: its lease re-enters the pool state.
            Some(conn) => {
                let reason = if !reusable {
                    "response does not allow reuse"
                } else if conn.is_overflow() {
                    "overflow connection"
                } else {
                    "pool closed"
                };
                conn.discard(reason);
            }
            None => self.shared.available.notify_one(),
        }
    }

    /// Close the pool: drop idle connections and refuse further checkouts.
    pub fn close(&self) {
        let idle = {
            let mut state = self.shared.lock();
            state.closed = true;
            let idle = std::mem::take(&mut state.idle);
            state.free_slots += idle.len();
            idle
        };
        debug!("Closed pool for {} ({} idle connections dropped)", self.origin(), idle.len());
        for conn in idle {
            conn.discard("pool closed");
        }
        self.shared.available.notify_waiters();
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.shared.lock();
        PoolStats {
            origin: self.origin().to_string(),
            max_size: self.config.max_size,
            idle: state.idle.len(),
            checked_out: state.checked_out,
            free_slots: state.free_slots,
            connections_opened: state.connections_opened,
            requests: state.requests,
            stale_discarded: state.stale_discarded,
            closed: state.closed,
        }
    }

    pub(crate) fn record_request(&self) {
        self.shared.lock().requests += 1;
    }

    async fn checkout(&self) -> Result<Checkout<C::Stream>> {
        let deadline = self.config.pool_timeout().map(|wait| Instant::now() + wait);

        loop {
            let notified = self.shared.available.notified();
            tokio::pin!(notified);
            // Register before inspecting the state so a release in between wakes us.
            notified.as_mut().enable();

            {
                let mut state = self.shared.lock();
                if state.closed {
                    return Err(PoolError::ClosedPool {
                        origin: self.origin().to_string(),
                    });
                }
                if let Some(mut conn) = state.idle.pop() {
                    state.checked_out += 1;
                    conn.activate(Lease::new(Arc::downgrade(&self.shared)));
                    return Ok(Checkout::Idle(conn));
                }
                if state.free_slots > 0 {
                    state.free_slots -= 1;
                    state.checked_out += 1;
                    return Ok(Checkout::Fresh(Some(Lease::new(Arc::downgrade(
                        &self.shared,
                    )))));
                }
                match self.config.overflow {
                    OverflowPolicy::Overflow => return Ok(Checkout::Fresh(None)),
                    OverflowPolicy::Error => {
                        return Err(PoolError::EmptyPool {
                            origin: self.origin().to_string(),
                        })
                    }
                    OverflowPolicy::Block => {}
                }
            }

            trace!("Pool for {} is exhausted, waiting for a release", self.origin());
            match deadline {
                Some(deadline) => {
                    if timeout_at(deadline, notified).await.is_err() {
                        return Err(PoolError::EmptyPool {
                            origin: self.origin().to_string(),
                        });
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Create a new transport with timeout
    async fn open(&self) -> Result<C::Stream> {
        let connect_timeout = self.config.connect_timeout();

        match timeout(connect_timeout, self.connector.connect(self.origin())).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::TimedOut => Err(PoolError::Timeout {
                origin: self.origin().to_string(),
                phase: TimeoutPhase::Connect,
                timeout_ms: connect_timeout.as_millis(),
            }),
            Ok(Err(e)) => Err(PoolError::Connect {
                origin: self.origin().to_string(),
                source: e,
            }),
            Err(_) => Err(PoolError::Timeout {
                origin: self.origin().to_string(),
                phase: TimeoutPhase::Connect,
                timeout_ms: connect_timeout.as_millis(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MemoryConnector, MemoryListener};

    fn memory_pool(config: PoolConfig) -> (ConnectionPool<MemoryConnector>, MemoryListener) {
        let connector = MemoryConnector::new();
        let listener = connector.listen();
        let pool = ConnectionPool::with_connector(Origin::new("memory", 80), config, connector)
            .unwrap();
        (pool, listener)
    }

    fn assert_slots_balanced<C: Connector>(pool: &ConnectionPool<C>) {
        let stats = pool.stats();
        assert_eq!(
            stats.idle + stats.checked_out + stats.free_slots,
            stats.max_size,
            "slot accounting out of balance: {:?}",
            stats
        );
    }

    #[tokio::test]
    async fn pool_creation_with_defaults() {
        let (pool, _listener) = memory_pool(PoolConfig::default());
        let stats = pool.stats();

        assert_eq!(stats.idle, 0);
        assert_eq!(stats.checked_out, 0);
        assert_eq!(stats.free_slots, 4);
        assert!(!stats.closed);
    }

    #[tokio::test]
    async fn rejects_invalid_config() {
        let connector = MemoryConnector::new();
        let config = PoolConfig {
            max_size: 0,
            ..Default::default()
        };
        let result = ConnectionPool::with_connector(Origin::new("memory", 80), config, connector);
        assert!(matches!(result, Err(PoolError::Config(_))));
    }

    #[tokio::test]
    async fn huge_max_size_does_not_preallocate() {
        let (pool, _listener) = memory_pool(PoolConfig {
            max_size: usize::MAX,
            ..Default::default()
        });

        let stats = pool.stats();
        assert_eq!(stats.free_slots, usize::MAX);
        assert_eq!(stats.idle, 0);

        let conn = pool.acquire().await.unwrap();
        pool.release(conn, true);
        assert_eq!(pool.stats().idle, 1);
        assert_slots_balanced(&pool);
    }

    #[test]
    fn timeouts_have_a_one_millisecond_floor() {
        let config = PoolConfig {
            connect_timeout_ms: 1,
            read_timeout_ms: 1,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
        assert_eq!(config.read_timeout(), Duration::from_millis(1));

        let config = PoolConfig {
            read_timeout_ms: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(PoolError::Config(_))));
    }

    #[tokio::test]
    async fn reuses_most_recently_released_connection_first() {
        let (pool, mut listener) = memory_pool(PoolConfig::default());

        let first = pool.acquire().await.unwrap();
        let second = pool.acquire().await.unwrap();
        let _server1 = listener.accept().await.unwrap();
        let _server2 = listener.accept().await.unwrap();
        let (first_id, second_id) = (first.id(), second.id());

        pool.release(first, true);
        pool.release(second, true);
        assert_eq!(pool.stats().idle, 2);
        assert_slots_balanced(&pool);

        let reused = pool.acquire().await.unwrap();
        assert_eq!(reused.id(), second_id);
        assert_eq!(reused.state(), ConnectionState::Active);
        let reused_again = pool.acquire().await.unwrap();
        assert_eq!(reused_again.id(), first_id);
        assert_eq!(pool.stats().connections_opened, 2);
        assert_slots_balanced(&pool);
    }

    #[tokio::test]
    async fn discards_idle_connection_closed_by_peer() {
        let (pool, mut listener) = memory_pool(PoolConfig::default());

        let conn = pool.acquire().await.unwrap();
        let server = listener.accept().await.unwrap();
        let stale_id = conn.id();
        pool.release(conn, true);

        drop(server);

        let fresh = pool.acquire().await.unwrap();
        assert_ne!(fresh.id(), stale_id);
        assert!(fresh.is_suspect());

        let stats = pool.stats();
        assert_eq!(stats.stale_discarded, 1);
        assert_eq!(stats.connections_opened, 2);
        assert_eq!(stats.checked_out, 1);
        assert_slots_balanced(&pool);
    }

    #[tokio::test]
    async fn discards_idle_connection_with_unsolicited_data() {
        use tokio::io::AsyncWriteExt;

        let (pool, mut listener) = memory_pool(PoolConfig::default());
        let conn = pool.acquire().await.unwrap();
        let mut server = listener.accept().await.unwrap();
        pool.release(conn, true);

        server.write_all(b"HTTP/1.1 408 Request Timeout\r\n\r\n").await.unwrap();

        let _fresh = pool.acquire().await.unwrap();
        assert_eq!(pool.stats().stale_discarded, 1);
    }

    #[tokio::test]
    async fn non_reusable_release_frees_the_slot() {
        let (pool, _listener) = memory_pool(PoolConfig {
            max_size: 1,
            ..Default::default()
        });

        let conn = pool.acquire().await.unwrap();
        assert_eq!(pool.stats().free_slots, 0);
        pool.release(conn, false);

        let stats = pool.stats();
        assert_eq!(stats.idle, 0);
        assert_eq!(stats.free_slots, 1);
        assert_slots_balanced(&pool);
    }

    #[tokio::test]
    async fn dropped_connection_returns_its_slot() {
        let (pool, _listener) = memory_pool(PoolConfig {
            max_size: 1,
            ..Default::default()
        });

        let conn = pool.acquire().await.unwrap();
        drop(conn);
        assert_eq!(pool.stats().free_slots, 1);
        assert_slots_balanced(&pool);
    }

    #[tokio::test]
    async fn overflow_connections_are_not_pooled() {
        let (pool, _listener) = memory_pool(PoolConfig {
            max_size: 1,
            overflow: OverflowPolicy::Overflow,
            ..Default::default()
        });

        let pooled = pool.acquire().await.unwrap();
        let overflow = pool.acquire().await.unwrap();
        assert!(!pooled.is_overflow());
        assert!(overflow.is_overflow());

        pool.release(overflow, true);
        pool.release(pooled, true);

        let stats = pool.stats();
        assert_eq!(stats.idle, 1);
        assert_eq!(stats.connections_opened, 2);
        assert_slots_balanced(&pool);
    }

    #[tokio::test]
    async fn error_policy_fails_when_exhausted() {
        let (pool, _listener) = memory_pool(PoolConfig {
            max_size: 1,
            overflow: OverflowPolicy::Error,
            ..Default::default()
        });

        let _held = pool.acquire().await.unwrap();
        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, PoolError::EmptyPool { .. }));
    }

    #[tokio::test]
    async fn block_policy_waits_for_release() {
        let (pool, _listener) = memory_pool(PoolConfig {
            max_size: 1,
            overflow: OverflowPolicy::Block,
            ..Default::default()
        });

        let held = pool.acquire().await.unwrap();
        let held_id = held.id();

        let waiter_pool = pool.clone();
        let waiter = tokio::spawn(async move { waiter_pool.acquire().await.map(|c| c.id()) });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        pool.release(held, true);
        let reused_id = waiter.await.unwrap().unwrap();
        assert_eq!(reused_id, held_id);
    }

    #[tokio::test(start_paused = true)]
    async fn block_policy_times_out() {
        let (pool, _listener) = memory_pool(PoolConfig {
            max_size: 1,
            overflow: OverflowPolicy::Block,
            pool_timeout_ms: Some(250),
            ..Default::default()
        });

        let _held = pool.acquire().await.unwrap();
        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, PoolError::EmptyPool { .. }));
    }

    #[tokio::test]
    async fn closed_pool_refuses_checkout_and_drops_idle() {
        let (pool, _listener) = memory_pool(PoolConfig::default());

        let idle = pool.acquire().await.unwrap();
        let active = pool.acquire().await.unwrap();
        pool.release(idle, true);
        pool.close();

        let stats = pool.stats();
        assert!(stats.closed);
        assert_eq!(stats.idle, 0);

        pool.release(active, true);
        assert_eq!(pool.stats().idle, 0);
        assert_slots_balanced(&pool);

        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, PoolError::ClosedPool { .. }));
    }

    #[tokio::test]
    async fn refused_connect_is_typed_and_returns_slot() {
        let connector = MemoryConnector::new();
        let pool = ConnectionPool::with_connector(
            Origin::new("memory", 80),
            PoolConfig::default(),
            connector,
        )
        .unwrap();

        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, PoolError::Connect { .. }));
        assert!(err.is_retryable());
        assert_eq!(pool.stats().free_slots, 4);
        assert_slots_balanced(&pool);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_idle_connection_is_replaced() {
        let (pool, _listener) = memory_pool(PoolConfig {
            idle_timeout_secs: 1,
            ..Default::default()
        });

        let conn = pool.acquire().await.unwrap();
        let old_id = conn.id();
        pool.release(conn, true);

        tokio::time::sleep(Duration::from_secs(2)).await;

        let fresh = pool.acquire().await.unwrap();
        assert_ne!(fresh.id(), old_id);
        assert_eq!(pool.stats().stale_discarded, 1);
    }

    #[tokio::test]
    async fn same_host_detection() {
        let (pool, _listener) = memory_pool(PoolConfig::default());

        assert!(pool.is_same_host("/index.html"));
        assert!(pool.is_same_host("http://memory/"));
        assert!(pool.is_same_host("http://memory:80/a?b=c"));
        assert!(!pool.is_same_host("http://memory:8080/"));
        assert!(!pool.is_same_host("http://google.com/"));

        assert_eq!(pool.resolve_target("http://memory/a?b=c").unwrap(), "/a?b=c");
        assert!(matches!(
            pool.resolve_target("http://google.com/"),
            Err(PoolError::HostChanged { .. })
        ));
    }
}
