use std::fmt;
use thiserror::Error;

/// Phase of an attempt in which a deadline expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutPhase {
    Connect,
    Write,
    Read,
}

impl fmt::Display for TimeoutPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Connect => "connect",
            Self::Write => "write",
            Self::Read => "read",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to connect to {origin}: {source}")]
    Connect {
        origin: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Connection to {origin} reset before a response was received: {source}")]
    Reset {
        origin: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Timed out in {phase} phase after {timeout_ms}ms talking to {origin}")]
    Timeout {
        origin: String,
        phase: TimeoutPhase,
        timeout_ms: u128,
    },

    #[error("Connection to {origin} failed after {received} response bytes: {source}")]
    PartialResponse {
        origin: String,
        received: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("Max retries exceeded for {origin} after {attempts} attempt(s): {source}")]
    MaxRetry {
        origin: String,
        attempts: u32,
        #[source]
        source: Box<PoolError>,
    },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Pool for {origin} has no free connection slot")]
    EmptyPool { origin: String },

    #[error("Pool for {origin} is closed")]
    ClosedPool { origin: String },

    #[error("Tried to open a foreign host with url {url} on pool for {origin}")]
    HostChanged { origin: String, url: String },

    #[error("Invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl PoolError {
    /// Whether another attempt on a fresh connection may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PoolError::Connect { .. } | PoolError::Reset { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, PoolError::Timeout { .. })
    }

    /// The innermost error, looking through `MaxRetry` wrappers.
    pub fn root_cause(&self) -> &PoolError {
        match self {
            PoolError::MaxRetry { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, PoolError>;
