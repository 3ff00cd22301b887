//! Resiliency policy: decides whether a command may be retried, and when.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of asking a policy whether another attempt is allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RetryDecision {
    /// The next attempt is due now.
    Enabled,

    /// Another attempt is allowed, but not before the next retry time.
    Suspended,

    /// Retries are exhausted (count or timeout).
    Stopped,
}

/// Declarative retry configuration for command processing.
///
/// Backoff shape:
/// - retry 1 waits `initial_period`
/// - every following retry adds one step to the accumulated wait
/// - a step is `period × fib(retry)` when `exponential`, `period` otherwise,
///   and never exceeds `maximum_exponential_period`
///
/// Waits are measured from the start of processing, so the accumulated
/// period keeps growing and retries stay spaced out even once steps hit
/// the cap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResiliencyPolicy {
    /// `-1` means unlimited.
    pub maximum_retries: i32,
    pub initial_period: Duration,
    pub period: Duration,
    pub maximum_exponential_period: Duration,

    /// `Duration::MAX` disables the timeout.
    pub timeout: Duration,
    pub exponential: bool,
}

impl Default for ResiliencyPolicy {
    fn default() -> Self {
        Self {
            maximum_retries: 10,
            initial_period: Duration::from_secs(5),
            period: Duration::from_secs(10),
            maximum_exponential_period: Duration::from_secs(60 * 60),
            timeout: Duration::from_secs(24 * 60 * 60),
            exponential: true,
        }
    }
}

impl ResiliencyPolicy {
    /// A policy that cancels on the first failure.
    pub fn none() -> Self {
        Self {
            maximum_retries: 0,
            initial_period: Duration::ZERO,
            period: Duration::ZERO,
            maximum_exponential_period: Duration::ZERO,
            timeout: Duration::MAX,
            exponential: false,
        }
    }

    pub fn is_unlimited(&self) -> bool {
        self.maximum_retries < 0
    }

    /// Decide whether attempt number `retry_count + 1` may run at `now`.
    pub fn can_retry(
        &self,
        started: DateTime<Utc>,
        retry_count: u32,
        now: DateTime<Utc>,
    ) -> RetryDecision {
        if !self.is_unlimited() && i64::from(retry_count) > i64::from(self.maximum_retries) {
            return RetryDecision::Stopped;
        }
        if self.is_timed_out(started, now) {
            return RetryDecision::Stopped;
        }
        if self.next_retry_time(started, retry_count) <= now {
            RetryDecision::Enabled
        } else {
            RetryDecision::Suspended
        }
    }

    /// Has the overall timeout elapsed since `started`?
    pub fn is_timed_out(&self, started: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        if self.timeout == Duration::MAX {
            return false;
        }
        match add_duration(started, self.timeout) {
            Some(deadline) => now >= deadline,
            None => false,
        }
    }

    /// Accumulated wait, measured from the start of processing, before
    /// retry number `retry` may run.
    pub fn evaluate_period(&self, retry: u32) -> Duration {
        if retry <= 1 {
            return self.initial_period;
        }
        let mut total = self.initial_period;
        for n in 2..=retry {
            total = total.saturating_add(self.step(n));
            if total == Duration::MAX {
                break;
            }
        }
        total
    }

    pub fn next_retry_time(&self, started: DateTime<Utc>, retry: u32) -> DateTime<Utc> {
        add_duration(started, self.evaluate_period(retry)).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// How long to wait from `now` until retry number `retry` is due.
    pub fn retry_wait_time(
        &self,
        started: DateTime<Utc>,
        retry: u32,
        now: DateTime<Utc>,
    ) -> Duration {
        (self.next_retry_time(started, retry) - now)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    fn step(&self, retry: u32) -> Duration {
        let cap = self.maximum_exponential_period;
        if !self.exponential {
            return self.period.min(cap);
        }
        u32::try_from(fibonacci(retry))
            .ok()
            .and_then(|factor| self.period.checked_mul(factor))
            .map_or(cap, |step| step.min(cap))
    }
}

/// fib(1) = fib(2) = 1, saturating at `u64::MAX`.
fn fibonacci(n: u32) -> u64 {
    let (mut a, mut b) = (0u64, 1u64);
    for _ in 0..n {
        let next = a.saturating_add(b);
        a = b;
        b = next;
    }
    a
}

fn add_duration(at: DateTime<Utc>, duration: Duration) -> Option<DateTime<Utc>> {
    let delta = TimeDelta::from_std(duration).ok()?;
    at.checked_add_signed(delta)
}
