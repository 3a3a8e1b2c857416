//! Retry state machine for one logical request.
//!
//! Every attempt runs acquire -> send -> receive against its own connection.
//! A failed attempt is classified once:
//!
//! - connect failures and resets before any response byte are retryable and
//!   consume one unit of the [`RetryBudget`];
//! - timeouts, partial responses and malformed responses end the request
//!   immediately, whatever budget is left.
//!
//! Exhausting the budget on a retryable failure yields `MaxRetry` with the
//! last failure as its source.

use super::{ConnectionPool, PooledConnection, Retries, RetryBudget};
use crate::protocol::{read_response, write_request, Request, Response, WireError};
use crate::transport::Connector;
use crate::utils::error::{PoolError, Result, TimeoutPhase};
use tracing::{debug, warn};

/// Outcome of a single failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Failure {
    Retryable,
    Fatal,
}

fn classify(error: &PoolError) -> Failure {
    if error.is_retryable() {
        Failure::Retryable
    } else {
        Failure::Fatal
    }
}

pub(crate) struct RequestExecutor<'a, C: Connector> {
    pool: &'a ConnectionPool<C>,
}

impl<'a, C: Connector> RequestExecutor<'a, C> {
    pub(crate) fn new(pool: &'a ConnectionPool<C>) -> Self {
        Self { pool }
    }

    pub(crate) async fn execute(&self, request: &Request, retries: Retries) -> Result<Response> {
        let mut budget = RetryBudget::new(retries);

        loop {
            let attempt = budget.start_attempt();
            let error = match self.attempt(request).await {
                Ok(response) => {
                    debug!(
                        "{} {} -> {} (attempt {})",
                        request.method, request.target, response.status, attempt
                    );
                    return Ok(response);
                }
                Err(error) => error,
            };

            match classify(&error) {
                Failure::Fatal => {
                    debug!(
                        "{} {} failed on attempt {}: {}",
                        request.method, request.target, attempt, error
                    );
                    return Err(error);
                }
                Failure::Retryable if budget.try_consume() => {
                    let remaining = budget
                        .remaining()
                        .map_or_else(|| "unlimited".to_string(), |n| n.to_string());
                    warn!(
                        "Retrying {} {} after attempt {} failed (retries left: {}): {}",
                        request.method, request.target, attempt, remaining, error
                    );
                }
                Failure::Retryable => {
                    return Err(PoolError::MaxRetry {
                        origin: self.pool.origin().to_string(),
                        attempts: budget.attempts(),
                        source: Box::new(error),
                    });
                }
            }
        }
    }

    async fn attempt(&self, request: &Request) -> Result<Response> {
        let mut conn = self.pool.acquire().await?;
        self.pool.record_request();

        let config = self.pool.config();
        if let Err(err) = write_request(conn.stream_mut(), request, config.read_timeout()).await {
            return Err(self.fail(conn, err, TimeoutPhase::Write));
        }

        match read_response(conn.stream_mut(), &request.method, config.read_timeout()).await {
            Ok(read) => {
                conn.mark_completed();
                let reusable = read.reusable && !request.wants_close();
                self.pool.release(conn, reusable);
                Ok(read.response)
            }
            Err(err) => Err(self.fail(conn, err, TimeoutPhase::Read)),
        }
    }

    /// Discard the connection and turn a wire failure into a pool error.
    fn fail(
        &self,
        conn: PooledConnection<C::Stream>,
        err: WireError,
        phase: TimeoutPhase,
    ) -> PoolError {
        let origin = self.pool.origin().to_string();
        let reused = !conn.is_suspect();
        let error = match err {
            WireError::Io {
                received: 0,
                source,
            } => PoolError::Reset { origin, source },
            WireError::Io { received, source } => PoolError::PartialResponse {
                origin,
                received,
                source,
            },
            WireError::TimedOut { .. } => PoolError::Timeout {
                origin,
                phase,
                timeout_ms: self.pool.config().read_timeout().as_millis(),
            },
            WireError::Malformed(message) => PoolError::Protocol(message),
        };

        if reused && error.is_retryable() {
            debug!(
                "Reused connection #{} was dropped by the server before responding",
                conn.id()
            );
        }
        conn.discard(&error.to_string());
        error
    }
}
