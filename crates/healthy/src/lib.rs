//! healthy — periodic health checks with failure escalation.
//!
//! Runs user-supplied checks on independent, jittered schedules, backs off
//! on failure, and notifies only after a configurable number of
//! consecutive failures.
//!
//! # Architecture
//!
//! ```text
//! Checker
//!   ├── Per-task background loop
//!   │   ├── Schedule → Ticks (period ± flex, Backoff override)
//!   │   ├── Task::run(ctx) → Result<(), TaskError>
//!   │   └── FailureTracker (consecutive failures → Verdict)
//!   └── Optional Notifier for failures reaching the threshold
//! ```
//!
//! # Failure escalation
//!
//! Each failure below `report_failures_count` reschedules the next tick
//! after `first_retry_delay * 2^(failures - 1)`. The failure that reaches
//! the threshold is reported once; later failures run on the regular
//! schedule without further reports until a success resets the count.

pub mod checker;
pub mod error;
pub mod notify;
pub mod probe;
pub mod retry;
pub mod rule;
pub mod schedule;
pub mod task;

pub use checker::Checker;
pub use error::{CheckerError, CheckerResult, ProbeError, TaskError};
pub use notify::{CompositeNotifier, LogNotifier, Notifier};
pub use probe::HttpCheck;
pub use retry::{Retrying, with_retries};
pub use rule::{ExecRule, FailureOptions, FailureTracker, Verdict};
pub use schedule::{Backoff, Schedule, Tick, Ticks};
pub use task::{Task, TaskFn, TaskRef};
