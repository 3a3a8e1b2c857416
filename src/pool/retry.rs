use std::fmt;

/// How many times a request may be retried after its first attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retries {
    Limited(u32),
    Unlimited,
}

impl Retries {
    /// Map a configured count onto a policy: negative means unlimited.
    pub fn from_count(count: i64) -> Self {
        if count < 0 {
            Retries::Unlimited
        } else {
            Retries::Limited(u32::try_from(count).unwrap_or(u32::MAX))
        }
    }
}

impl Default for Retries {
    fn default() -> Self {
        Retries::Limited(3)
    }
}

impl From<u32> for Retries {
    fn from(count: u32) -> Self {
        Retries::Limited(count)
    }
}

impl fmt::Display for Retries {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Retries::Limited(count) => write!(f, "{}", count),
            Retries::Unlimited => f.write_str("unlimited"),
        }
    }
}

/// Per-request retry counter.
///
/// The first attempt is free; every retryable failure that leads to another
/// attempt consumes one unit.
#[derive(Debug, Clone)]
pub struct RetryBudget {
    remaining: Option<u32>,
    attempts: u32,
}

impl RetryBudget {
    pub fn new(retries: Retries) -> Self {
        let remaining = match retries {
            Retries::Limited(count) => Some(count),
            Retries::Unlimited => None,
        };
        Self {
            remaining,
            attempts: 0,
        }
    }

    /// Record the start of an attempt and return its 1-based number.
    pub fn start_attempt(&mut self) -> u32 {
        self.attempts = self.attempts.saturating_add(1);
        self.attempts
    }

    /// Take one retry. Returns `false` when the budget is exhausted.
    pub fn try_consume(&mut self) -> bool {
        match self.remaining.as_mut() {
            None => true,
            Some(0) => false,
            Some(remaining) => {
                *remaining -= 1;
                true
            }
        }
    }

    /// Retries left, `None` when unlimited.
    pub fn remaining(&self) -> Option<u32> {
        self.remaining
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}
