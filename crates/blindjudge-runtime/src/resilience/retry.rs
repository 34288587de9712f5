//! Bounded retry with fixed or exponential backoff.

use backon::{ConstantBuilder, ExponentialBuilder, Retryable};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Delay growth between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Backoff {
    /// Same delay before every retry
    #[default]
    Fixed,

    /// Delay multiplied by `factor` each retry, capped at `max_delay`
    Exponential { factor: f32, max_delay: Duration },
}

/// Backoff selector as written in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    #[default]
    Fixed,
    Exponential,
}

/// How many times to try a task, and how long to wait in between.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,

    /// Delay before the first retry
    pub delay: Duration,

    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            delay: Duration::from_secs(1),
            backoff: Backoff::Fixed,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
            backoff: Backoff::Fixed,
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Retries after the first attempt.
    pub fn retries(&self) -> usize {
        self.max_attempts.max(1).saturating_sub(1) as usize
    }

    /// Run `op` until it succeeds, returns an error `retryable` rejects, or
    /// the attempts run out. Returns the first success or the last error.
    pub async fn run<T, E, F, Fut, P>(&self, op: F, retryable: P) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: FnMut(&E) -> bool,
        E: Display,
    {
        self.run_with_floor(op, retryable, |_: &E| None).await
    }

    /// Like [`RetryPolicy::run`], but `floor` can ask for a longer wait after
    /// a given error, such as a server's `retry-after`. The policy delay is
    /// stretched to the floor, never shortened.
    pub async fn run_with_floor<T, E, F, Fut, P, H>(
        &self,
        mut op: F,
        retryable: P,
        mut floor: H,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: FnMut(&E) -> bool,
        H: FnMut(&E) -> Option<Duration>,
        E: Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1u32;
        // Wait owed on top of the backoff delay, paid before the next attempt
        let owed = Mutex::new(Duration::ZERO);

        let notify = |error: &E, delay: Duration| {
            attempt += 1;
            let extra = floor(error).map_or(Duration::ZERO, |min| min.saturating_sub(delay));
            *owed.lock() = extra;
            tracing::warn!(
                attempt,
                max_attempts,
                delay = ?(delay + extra),
                error = %error,
                "Attempt failed, retrying"
            );
        };
        let attempt_op = || {
            let extra = std::mem::take(&mut *owed.lock());
            let fut = op();
            async move {
                if !extra.is_zero() {
                    tokio::time::sleep(extra).await;
                }
                fut.await
            }
        };

        match self.backoff {
            Backoff::Fixed => {
                let builder = ConstantBuilder::default()
                    .with_delay(self.delay)
                    .with_max_times(self.retries());
                attempt_op.retry(builder).when(retryable).notify(notify).await
            }
            Backoff::Exponential { factor, max_delay } => {
                let builder = ExponentialBuilder::default()
                    .with_min_delay(self.delay)
                    .with_max_delay(max_delay)
                    .with_factor(factor)
                    .with_max_times(self.retries());
                attempt_op.retry(builder).when(retryable).notify(notify).await
            }
        }
    }
}
