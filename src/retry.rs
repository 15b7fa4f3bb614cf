// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Retry policies applied by the session.

use std::{fmt::Debug, sync::Arc, time::Duration};

/// Delay before repeating a failed attempt.
pub trait Backoff: Send + Sync + Debug {
    /// Delay after the given failed `attempt`, starting at `1`.
    fn delay(&self, attempt: u32) -> Duration;
}

/// Doubles the delay after every attempt, up to a limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exponential {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for Exponential {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(10),
        }
    }
}

impl Backoff for Exponential {
    fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial.saturating_mul(factor).min(self.max)
    }
}

/// Always waits the same time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Constant(pub Duration);

impl Backoff for Constant {
    fn delay(&self, _attempt: u32) -> Duration {
        self.0
    }
}

/// How often and how patiently a failed operation is repeated.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Number of attempts including the first one.
    pub max_attempts: u32,
    pub backoff: Arc<dyn Backoff>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            backoff: Arc::new(Exponential::default()),
        }
    }
}

impl RetryPolicy {
    /// Try only once.
    #[must_use]
    pub fn never() -> Self {
        Self {
            max_attempts: 1,
            backoff: Arc::new(Constant(Duration::ZERO)),
        }
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: impl Backoff + 'static) -> Self {
        self.backoff = Arc::new(backoff);
        self
    }

    /// Delay after `attempt` or `None` if attempts are exhausted.
    #[must_use]
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        (attempt < self.max_attempts).then(|| self.backoff.delay(attempt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_backoff_is_capped() {
        let backoff = Exponential::default();
        let delays: Vec<_> = (1..=7).map(|attempt| backoff.delay(attempt)).collect();
        assert_eq!(
            vec![
                Duration::from_millis(500),
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8),
                Duration::from_secs(10),
                Duration::from_secs(10),
            ],
            delays
        );
        assert_eq!(Duration::from_secs(10), backoff.delay(100));
    }

    #[test]
    fn attempts_are_limited() {
        let policy = RetryPolicy::default().with_max_attempts(3);
        assert!(policy.next_delay(1).is_some());
        assert!(policy.next_delay(2).is_some());
        assert_eq!(None, policy.next_delay(3));
        assert_eq!(None, RetryPolicy::never().next_delay(1));
    }
}
