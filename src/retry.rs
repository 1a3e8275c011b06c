//! Retry policies deciding whether, and after what delay, a failed attempt
//! is tried again.
//!
//! Policies are stateless: every counter they read or write lives in the
//! per-request [`ConnectionState`], so one policy instance can be shared by
//! any number of concurrent requests.

use std::{
    fmt,
    time::{Duration, Instant},
};

use crate::{timer::Timer, ConnectionState};

/// Outcome of consulting a [`RetryPolicy`] after a failed attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// No further attempt; the original failure is surfaced.
    Exhausted,
    /// Retry immediately on the calling thread.
    RetryNow,
    /// Retry once the delay has elapsed.
    RetryAfter(Duration),
}

/// Decision authority for retrying connect-class failures.
pub trait RetryPolicy: Send + Sync + fmt::Debug {
    /// Returns whether another attempt should run.
    ///
    /// Called after `state.retry_count` was incremented for the failure
    /// being handled. Implementations may set `state.ms_before_retry`.
    fn should_retry(&self, state: &mut ConnectionState) -> bool;

    /// Counts the failure, moves to the next endpoint and consults
    /// [`should_retry`](Self::should_retry).
    fn decide(&self, state: &mut ConnectionState) -> RetryDecision {
        state.advance();
        if !self.should_retry(state) {
            return RetryDecision::Exhausted;
        }
        if state.ms_before_retry > 0 {
            RetryDecision::RetryAfter(Duration::from_millis(state.ms_before_retry))
        } else {
            RetryDecision::RetryNow
        }
    }
}

/// Applies `policy` to a failed attempt and runs or schedules the next one.
pub(crate) fn retry<F>(
    policy: &dyn RetryPolicy,
    mut state: ConnectionState,
    timer: &Timer,
    attempt: F,
) -> RetryDecision
where
    F: FnOnce(ConnectionState) + Send + 'static,
{
    let decision = policy.decide(&mut state);

    #[cfg(feature = "tracing")]
    tracing::debug!(
        retry_count = state.retry_count(),
        uri_index = state.uri_index(),
        ?decision,
        "consulted retry policy"
    );

    match decision {
        RetryDecision::Exhausted => {}
        RetryDecision::RetryNow => attempt(state),
        RetryDecision::RetryAfter(delay) => timer.schedule(delay, move || attempt(state)),
    }
    decision
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Retries while fewer than `times` retries have been counted.
///
/// `RetryNTimes::new(1)` never retries; `RetryNTimes::new(3)` allows at most
/// three attempts in total.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryNTimes {
    times: u32,
    delay_ms: u64,
}

impl RetryNTimes {
    pub fn new(times: u32) -> Self {
        Self { times, delay_ms: 0 }
    }

    /// Waits `delay` before every retry.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay_ms = millis(delay);
        self
    }
}

impl RetryPolicy for RetryNTimes {
    fn should_retry(&self, state: &mut ConnectionState) -> bool {
        state.ms_before_retry = self.delay_ms;
        state.retry_count < self.times
    }
}

/// Retries exactly once per request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RetryOnce {
    delay_ms: u64,
}

impl RetryOnce {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay_ms = millis(delay);
        self
    }
}

impl RetryPolicy for RetryOnce {
    fn should_retry(&self, state: &mut ConnectionState) -> bool {
        if state.retried_once {
            return false;
        }
        state.retried_once = true;
        state.ms_before_retry = self.delay_ms;
        true
    }
}

/// Retries until `timeout` has elapsed since the request was sent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryWithTimeout {
    timeout: Duration,
    delay_ms: u64,
}

impl RetryWithTimeout {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            delay_ms: 0,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay_ms = millis(delay);
        self
    }
}

impl RetryPolicy for RetryWithTimeout {
    fn should_retry(&self, state: &mut ConnectionState) -> bool {
        state.ms_before_retry = self.delay_ms;
        Instant::now().saturating_duration_since(state.start_time) < self.timeout
    }
}

/// Doubles the delay after every failure, starting at `start_ms` and capped
/// at `max_delay_ms`.
///
/// A negative `max_retry_count` retries without bound.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExponentialBackoff {
    start_ms: u64,
    max_retry_count: i32,
    max_delay_ms: u64,
}

impl ExponentialBackoff {
    pub fn new(start_ms: u64, max_retry_count: i32, max_delay_ms: u64) -> Self {
        Self {
            start_ms,
            max_retry_count,
            max_delay_ms,
        }
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(20, -1, 10_000)
    }
}

impl RetryPolicy for ExponentialBackoff {
    fn should_retry(&self, state: &mut ConnectionState) -> bool {
        if self.max_retry_count >= 0 && i64::from(state.retry_count) > i64::from(self.max_retry_count)
        {
            return false;
        }

        let next = if state.ms_before_retry == 0 {
            self.start_ms
        } else {
            state.ms_before_retry.saturating_mul(2)
        };
        state.ms_before_retry = next.min(self.max_delay_ms);
        true
    }
}
