use crate::types::{EmbedError, EmbedResult};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Granularity of cancellation checks while waiting between attempts
const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Shared flag that stops in-flight extractions at their next checkpoint
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Cancellation token plus optional deadline for one extraction
#[derive(Debug, Clone)]
pub struct CallContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl CallContext {
    /// Context that never cancels and never times out
    pub fn unbounded() -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: None,
        }
    }

    /// A timeout too large to represent as an instant means no deadline
    pub fn new(token: CancellationToken, timeout: Option<Duration>) -> Self {
        Self {
            token,
            deadline: timeout.and_then(|t| Instant::now().checked_add(t)),
        }
    }

    /// Fail with `Cancelled` if the token fired or the deadline passed
    pub fn check(&self, operation: &str) -> EmbedResult<()> {
        if self.token.is_cancelled() {
            return Err(EmbedError::Cancelled(format!("{} cancelled", operation)));
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(EmbedError::Cancelled(format!("{} timed out", operation)));
            }
        }
        Ok(())
    }

    /// Sleep for `duration`, waking early (with an error) on cancellation or deadline
    pub fn sleep(&self, duration: Duration, operation: &str) -> EmbedResult<()> {
        let wake_at = Instant::now() + duration;
        loop {
            self.check(operation)?;
            let now = Instant::now();
            if now >= wake_at {
                return Ok(());
            }
            std::thread::sleep(SLEEP_SLICE.min(wake_at - now));
        }
    }
}

impl Default for CallContext {
    fn default() -> Self {
        Self::unbounded()
    }
}

/// Bounded retry with exponential backoff for remote calls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Factor applied to the delay after every failed attempt
    pub multiplier: f64,
    /// Upper bound for a single delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(2),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no waiting
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            multiplier: 1.0,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay after failed attempt number `attempt` (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.max(1.0).powi(exponent);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    /// Run `op` until it succeeds, fails permanently, or the attempts are exhausted.
    /// Only transient errors are retried.
    pub fn run<T, F>(&self, operation: &str, ctx: &CallContext, mut op: F) -> EmbedResult<T>
    where
        F: FnMut(u32) -> EmbedResult<T>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            ctx.check(operation)?;
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let delay = self.delay_after(attempt);
                    log::warn!(
                        "{} attempt {} of {} failed: {}; retrying in {:.1}s",
                        operation,
                        attempt,
                        max_attempts,
                        e,
                        delay.as_secs_f64()
                    );
                    ctx.sleep(delay, operation)?;
                    attempt += 1;
                }
                Err(e) => {
                    if e.is_transient() {
                        log::error!("{} failed after {} attempt(s): {}", operation, attempt, e);
                    }
                    return Err(e);
                }
            }
        }
    }
}
