use std::time::Duration;

use futures::future::LocalBoxFuture;
use serde::{Deserialize, Serialize};

/// Time source and timer for the single-threaded event loop the widget runs on.
pub trait Clock {
    fn now_ms(&self) -> u64;
    fn sleep(&self, duration: Duration) -> LocalBoxFuture<'static, ()>;
}

/// Detaches a future onto the event loop (`spawn_local` in the browser).
pub trait Spawner {
    fn spawn_local(&self, future: LocalBoxFuture<'static, ()>);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay_ms: u64,
}

impl RetryPolicy {
    #[must_use]
    pub const fn new(max_attempts: u32, delay_ms: u64) -> Self {
        Self {
            max_attempts,
            delay_ms,
        }
    }

    #[must_use]
    pub fn start(self) -> Retry {
        Retry {
            policy: self,
            attempts: 0,
        }
    }
}

/// Bounded retry state machine. Callers make an attempt, then ask for the
/// delay before the next one; `None` means the budget is spent.
#[derive(Debug, Clone)]
pub struct Retry {
    policy: RetryPolicy,
    attempts: u32,
}

impl Retry {
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.policy.max_attempts
    }

    pub fn next_delay(&mut self) -> Option<Duration> {
        self.attempts = self.attempts.saturating_add(1);
        if self.is_exhausted() {
            None
        } else {
            Some(Duration::from_millis(self.policy.delay_ms))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_yields_delays_until_budget_is_spent() {
        let mut retry = RetryPolicy::new(3, 40).start();
        assert_eq!(retry.next_delay(), Some(Duration::from_millis(40)));
        assert_eq!(retry.next_delay(), Some(Duration::from_millis(40)));
        assert_eq!(retry.next_delay(), None);
        assert!(retry.is_exhausted());
        assert_eq!(retry.attempts(), 3);
    }

    #[test]
    fn single_attempt_policy_never_waits() {
        let mut retry = RetryPolicy::new(1, 500).start();
        assert_eq!(retry.next_delay(), None);
    }
}
