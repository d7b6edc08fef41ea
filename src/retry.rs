/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Bounded polling with backoff, for waiting on conditions that become true asynchronously, like a pool
//! converging after a membership change.
//!
//! [`Eventually`] calls an action until it succeeds or the attempts run out, sleeping between attempts. The
//! delay before attempt `n + 1` is `interval * backoff^(n - 1)`, clamped to `max_interval`. A [`CancelToken`]
//! stops the polling early, from any thread.
//!
//! The outcome distinguishes:
//! - [`RetryError::Exhausted`]: the condition never became true.
//! - [`RetryError::Cancelled`]: someone cancelled the wait.
//! - [`RetryError::Action`]: the action failed in a way retrying cannot fix.
//!
//! ```
//! use std::time::Duration;
//! use pool_consensus::retry::{Eventually, RetryError};
//!
//! let eventually = Eventually::builder()
//!     .max_attempts(3)
//!     .interval(Duration::from_millis(1))
//!     .build();
//! let mut calls = 0;
//! let result = eventually.until(|| {
//!     calls += 1;
//!     calls == 2
//! });
//! assert_eq!(result, Ok(2));
//! assert_eq!(eventually.until(|| false), Err(RetryError::Exhausted { attempts: 3 }));
//! ```

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use typed_builder::TypedBuilder;

/// Longest slice of a sleep between checks of the cancel token.
const CANCEL_CHECK_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Clone, Debug, TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building an [Eventually]. Every setter is optional.

    Optional:
    - `.max_attempts(...)` (default 10)
    - `.interval(...)` (default 100ms)
    - `.backoff(...)` (default 1.0, a fixed interval)
    - `.max_interval(...)` (default 5s)
    - `.cancel_token(...)` (default: never cancelled)
"))]
pub struct Eventually {
    #[builder(default = 10, setter(doc = "Set the maximum number of attempts, the first included. Optional."))]
    max_attempts: u32,
    #[builder(
        default = Duration::from_millis(100),
        setter(doc = "Set the delay between the first and the second attempt. Optional.")
    )]
    interval: Duration,
    #[builder(default = 1.0, setter(doc = "Set the factor the delay grows by after every attempt. Optional."))]
    backoff: f64,
    #[builder(
        default = Duration::from_secs(5),
        setter(doc = "Set the upper bound of the delay between two attempts. Optional.")
    )]
    max_interval: Duration,
    #[builder(default, setter(doc = "Set the token that cancels the polling. Optional."))]
    cancel_token: CancelToken,
}

impl Eventually {
    /// Poll `predicate` until it returns `true`. Returns the number of attempts it took.
    pub fn until(&self, mut predicate: impl FnMut() -> bool) -> Result<u32, RetryError<()>> {
        self.retry(|| if predicate() { Some(Ok(())) } else { None })
            .map(|(_, attempts)| attempts)
    }

    /// Poll `check` until it returns `Ok`. Every `Err` counts as "not yet"; the last one is dropped.
    pub fn check<T, E>(&self, mut check: impl FnMut() -> Result<T, E>) -> Result<T, RetryError<()>> {
        self.retry(|| check().ok().map(Ok)).map(|(value, _)| value)
    }

    /// Poll `action` until it returns `Some(Ok(_))` or `Some(Err(_))`. `None` means "not yet". An error is
    /// returned as [`RetryError::Action`] without retrying.
    pub fn retry<T, E>(
        &self,
        mut action: impl FnMut() -> Option<Result<T, E>>,
    ) -> Result<(T, u32), RetryError<E>> {
        for attempt in 1..=self.max_attempts {
            if self.cancel_token.is_cancelled() {
                return Err(RetryError::Cancelled);
            }
            match action() {
                Some(Ok(value)) => return Ok((value, attempt)),
                Some(Err(err)) => return Err(RetryError::Action(err)),
                None => (),
            }
            if attempt < self.max_attempts && !self.sleep(self.delay(attempt)) {
                return Err(RetryError::Cancelled);
            }
        }
        Err(RetryError::Exhausted {
            attempts: self.max_attempts,
        })
    }

    /// The delay after the `attempt`-th (1-indexed) attempt.
    fn delay(&self, attempt: u32) -> Duration {
        let factor = self.backoff.powi(attempt.saturating_sub(1) as i32);
        let secs = self.interval.as_secs_f64() * factor;
        let max = self.max_interval.as_secs_f64();
        if secs.is_nan() || secs < 0.0 {
            Duration::ZERO
        } else if secs > max {
            self.max_interval
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    /// Sleep for `duration`, waking up early if cancelled. Returns whether the full duration was slept.
    fn sleep(&self, duration: Duration) -> bool {
        let mut remaining = duration;
        while !remaining.is_zero() {
            if self.cancel_token.is_cancelled() {
                return false;
            }
            let slice = remaining.min(CANCEL_CHECK_INTERVAL);
            thread::sleep(slice);
            remaining -= slice;
        }
        !self.cancel_token.is_cancelled()
    }
}

/// A shared flag that cancels every [`Eventually`] it was given to.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RetryError<E> {
    #[error("condition still false after {attempts} attempts")]
    Exhausted { attempts: u32 },

    #[error("cancelled")]
    Cancelled,

    #[error("action failed: {0:?}")]
    Action(E),
}
