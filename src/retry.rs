//! Bounded retry with exponential backoff.
//!
//! Shared by the stages that talk to external services (AI extraction,
//! catalog load, payment gateway). The caller supplies a predicate deciding
//! which errors are transient; anything else propagates immediately.

use std::time::Duration;

/// Retry schedule: `max_attempts` total tries, doubling the delay after each
/// failure, capped at `max_delay`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: Duration::from_secs(10),
        }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `op` until it succeeds, a non-retryable error occurs, or the
    /// attempt budget is exhausted. The attempt index (0-based) is passed to
    /// `op` so callers can log it.
    pub fn run<T, E>(
        &self,
        mut is_retryable: impl FnMut(&E) -> bool,
        mut op: impl FnMut(u32) -> Result<T, E>,
    ) -> Result<T, E> {
        let mut attempt = 0;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(e) if attempt + 1 < self.max_attempts && is_retryable(&e) => {
                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        attempt = attempt + 1,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Transient failure, backing off before retry"
                    );
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn fast_policy(attempts: u32) -> RetryPolicy {
        RetryPolicy::new(attempts, Duration::from_millis(1))
    }

    #[test]
    fn succeeds_first_try_without_retrying() {
        let calls = Cell::new(0u32);
        let result: Result<u32, &str> = fast_policy(3).run(
            |_| true,
            |_| {
                calls.set(calls.get() + 1);
                Ok(7)
            },
        );
        assert_eq!(result, Ok(7));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn retries_transient_errors_until_success() {
        let calls = Cell::new(0u32);
        let result: Result<&str, &str> = fast_policy(3).run(
            |_| true,
            |attempt| {
                calls.set(calls.get() + 1);
                if attempt < 2 {
                    Err("timeout")
                } else {
                    Ok("done")
                }
            },
        );
        assert_eq!(result, Ok("done"));
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn exhausts_budget_and_returns_last_error() {
        let calls = Cell::new(0u32);
        let result: Result<(), &str> = fast_policy(3).run(
            |_| true,
            |_| {
                calls.set(calls.get() + 1);
                Err("timeout")
            },
        );
        assert_eq!(result, Err("timeout"));
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn non_retryable_error_propagates_immediately() {
        let calls = Cell::new(0u32);
        let result: Result<(), &str> = fast_policy(5).run(
            |e| *e == "timeout",
            |_| {
                calls.set(calls.get() + 1);
                Err("bad request")
            },
        );
        assert_eq!(result, Err("bad request"));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn delay_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(350));
        assert_eq!(policy.delay_for(6), Duration::from_millis(350));
    }

    #[test]
    fn none_policy_never_retries() {
        let calls = Cell::new(0u32);
        let result: Result<(), &str> = RetryPolicy::none().run(
            |_| true,
            |_| {
                calls.set(calls.get() + 1);
                Err("timeout")
            },
        );
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }
}
