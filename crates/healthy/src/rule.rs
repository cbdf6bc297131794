//! Execution rules and failure tracking.
//!
//! An [`ExecRule`] binds one task to its schedule, its failure policy and
//! its consecutive-failure counter. The counter lives in a
//! [`FailureTracker`], a plain state machine that turns each outcome into
//! a [`Verdict`] the check loop acts on.

use std::time::Duration;

use crate::schedule::Schedule;
use crate::task::TaskRef;

/// When to report a detected task failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureOptions {
    report_failures_count: u32,
    first_retry_delay: Duration,
}

impl FailureOptions {
    /// `report_failures_count` is clamped to at least 1.
    pub fn new(report_failures_count: u32, first_retry_delay: Duration) -> Self {
        Self {
            report_failures_count: report_failures_count.max(1),
            first_retry_delay,
        }
    }

    /// Number of consecutive failures required to report a failure.
    pub fn report_failures_count(&self) -> u32 {
        self.report_failures_count
    }

    /// Delay before the first retry after a failure.
    pub fn first_retry_delay(&self) -> Duration {
        self.first_retry_delay
    }

    /// Backoff delay after `failures` consecutive failures.
    ///
    /// Doubles with each failure: `first_retry_delay * 2^(failures - 1)`.
    pub fn retry_delay(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(31);
        self.first_retry_delay.saturating_mul(1 << exponent)
    }
}

impl Default for FailureOptions {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(3))
    }
}

/// What the check loop should do after an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Success with no preceding failures.
    Healthy,
    /// Success ending a failure episode.
    Recovered,
    /// Failure below the threshold: reschedule the next tick.
    Backoff(Duration),
    /// Failure that reached the threshold: report it.
    Notify,
    /// Failure in an episode that was already reported.
    Suppressed,
}

/// Consecutive failure counter for one rule.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FailureTracker {
    failures: u32,
}

impl FailureTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.failures
    }

    pub fn record_success(&mut self) -> Verdict {
        let previous = std::mem::take(&mut self.failures);
        if previous == 0 {
            Verdict::Healthy
        } else {
            Verdict::Recovered
        }
    }

    /// Record a failure.
    ///
    /// The counter stops at the threshold: the failure that reaches it is
    /// reported once, and later failures are suppressed until a success
    /// resets the episode.
    pub fn record_failure(&mut self, options: &FailureOptions) -> Verdict {
        let threshold = options.report_failures_count();
        if self.failures >= threshold {
            return Verdict::Suppressed;
        }
        self.failures += 1;
        if self.failures == threshold {
            Verdict::Notify
        } else {
            Verdict::Backoff(options.retry_delay(self.failures))
        }
    }
}

/// One registered task with its schedule and failure state.
pub struct ExecRule {
    pub(crate) task: TaskRef,
    pub(crate) schedule: Schedule,
    pub(crate) options: FailureOptions,
    pub(crate) tracker: FailureTracker,
}

impl ExecRule {
    pub fn new(task: TaskRef, schedule: Schedule, options: FailureOptions) -> Self {
        Self {
            task,
            schedule,
            options,
            tracker: FailureTracker::new(),
        }
    }

    pub fn name(&self) -> &str {
        self.task.name()
    }

    pub fn schedule(&self) -> Schedule {
        self.schedule
    }

    pub fn options(&self) -> FailureOptions {
        self.options
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.tracker.consecutive_failures()
    }
}
