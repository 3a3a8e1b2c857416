use super::Shared;
use crate::transport::{Probe, Transport};
use std::sync::Weak;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Lifecycle of a pooled connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Parked in the pool, not in use.
    Idle,
    /// Checked out by a request.
    Active,
    /// Closed and forgotten by the pool.
    Discarded,
}

/// Claim on one pool slot, held by a checked-out connection.
///
/// Dropping an armed lease gives the slot back, so a connection that is
/// discarded (or leaked by a cancelled request) never shrinks the pool.
pub(crate) struct Lease<S: Transport> {
    shared: Weak<Shared<S>>,
    armed: bool,
}

impl<S: Transport> Lease<S> {
    pub(crate) fn new(shared: Weak<Shared<S>>) -> Self {
        Self {
            shared,
            armed: true,
        }
    }

    /// Keep the slot: the connection is going back to the idle stack.
    pub(crate) fn disarm(mut self) {
        self.armed = false;
    }
}

impl<S: Transport> Drop for Lease<S> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Some(shared) = self.shared.upgrade() {
            shared.return_slot();
        }
    }
}

/// A persistent transport stream owned by one request at a time.
pub struct PooledConnection<S: Transport> {
    stream: S,
    id: u64,
    created_at: Instant,
    last_used_at: Instant,
    suspect: bool,
    requests: u64,
    state: ConnectionState,
    overflow: bool,
    lease: Option<Lease<S>>,
}

impl<S: Transport> PooledConnection<S> {
    pub(crate) fn new(stream: S, id: u64, lease: Option<Lease<S>>) -> Self {
        let now = Instant::now();
        Self {
            stream,
            id,
            created_at: now,
            last_used_at: now,
            suspect: true,
            requests: 0,
            state: ConnectionState::Active,
            overflow: lease.is_none(),
            lease,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// True until the stream has carried one complete request/response.
    pub fn is_suspect(&self) -> bool {
        self.suspect
    }

    pub fn requests(&self) -> u64 {
        self.requests
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn last_used_at(&self) -> Instant {
        self.last_used_at
    }

    /// Opened beyond the pool's capacity; never parked on release.
    pub fn is_overflow(&self) -> bool {
        self.overflow
    }

    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    /// Record a completed request/response exchange.
    pub(crate) fn mark_completed(&mut self) {
        self.suspect = false;
        self.requests += 1;
        self.last_used_at = Instant::now();
    }

    pub(crate) fn activate(&mut self, lease: Lease<S>) {
        debug_assert_eq!(self.state, ConnectionState::Idle);
        self.state = ConnectionState::Active;
        self.lease = Some(lease);
    }

    /// Park the connection. The returned lease must be disarmed by the pool.
    pub(crate) fn park(&mut self) -> Option<Lease<S>> {
        self.state = ConnectionState::Idle;
        self.last_used_at = Instant::now();
        self.lease.take()
    }

    fn is_expired(&self, idle_timeout: Duration) -> bool {
        self.last_used_at.elapsed() > idle_timeout
    }

    /// Why an idle connection must not be reused, if it must not.
    pub(crate) fn staleness(&mut self, idle_timeout: Option<Duration>) -> Option<&'static str> {
        if idle_timeout.is_some_and(|timeout| self.is_expired(timeout)) {
            return Some("idle timeout expired");
        }
        match self.stream.probe() {
            Probe::WouldBlock => None,
            Probe::Eof => Some("closed by peer"),
            Probe::DataAvailable => Some("unsolicited data on idle connection"),
        }
    }

    /// Close the stream and release its slot.
    pub(crate) fn discard(mut self, reason: &str) {
        self.state = ConnectionState::Discarded;
        debug!(
            "Discarding connection #{} after {} request(s): {}",
            self.id, self.requests, reason
        );
    }
}

impl<S: Transport> Drop for PooledConnection<S> {
    fn drop(&mut self) {
        if self.state == ConnectionState::Discarded {
            trace!("Connection #{} closed", self.id);
        }
    }
}

impl<S: Transport> std::fmt::Debug for PooledConnection<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("suspect", &self.suspect)
            .field("requests", &self.requests)
            .field("overflow", &self.is_overflow())
            .finish()
    }
}
