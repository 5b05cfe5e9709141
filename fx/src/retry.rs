//! Bounded retry with linear backoff.

use std::time::Duration;

use tracing::warn;

/// Classifies failures for retry.
pub trait Transient {
    /// Whether another attempt could succeed.
    fn is_transient(&self) -> bool;
}

/// Outcome of an exhausted or aborted retry loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryError<E> {
    /// The last error seen.
    pub error: E,
    /// How many attempts were made.
    pub attempts: u32,
}

/// Retry policy for one remote call.
///
/// Delays grow linearly from zero: with a one second step the waits before
/// attempts 1, 2, 3 are 0s, 1s, 2s.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Backoff increment between attempts.
    pub backoff_step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_step: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Policy with the given attempt bound and no waiting.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff_step: Duration::ZERO,
        }
    }

    /// Delay before the given 1-based attempt.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        self.backoff_step
            .saturating_mul(attempt.saturating_sub(1))
    }

    /// Upper bound on total wall time, given a per-attempt timeout.
    pub fn worst_case(&self, per_attempt: Duration) -> Duration {
        (1..=self.max_attempts).fold(Duration::ZERO, |total, attempt| {
            total
                .saturating_add(per_attempt)
                .saturating_add(self.delay_before(attempt))
        })
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    ///
    /// `op` receives the 1-based attempt number.
    pub fn run<T, E, F>(&self, mut op: F) -> Result<T, RetryError<E>>
    where
        E: Transient + std::fmt::Display,
        F: FnMut(u32) -> Result<T, E>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let delay = self.delay_before(attempt);
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }

            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(error) if error.is_transient() && attempt < max_attempts => {
                    warn!(
                        attempt,
                        max_attempts,
                        error = %error,
                        "Transient failure, retrying"
                    );
                    attempt += 1;
                }
                Err(error) => return Err(RetryError { error, attempts: attempt }),
            }
        }
    }
}
