//! Retry decorator for tasks.
//!
//! [`Retrying`] re-invokes the wrapped task within a single execution
//! attempt until it succeeds or the attempt budget is spent. When every
//! attempt fails, only the last error is returned.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::TaskError;
use crate::task::{Task, TaskRef};

/// A task that retries its inner task up to `max_attempts` times.
pub struct Retrying {
    task: TaskRef,
    max_attempts: u32,
}

impl Retrying {
    /// Wrap `task`; `max_attempts` is clamped to at least 1.
    pub fn new(task: TaskRef, max_attempts: u32) -> Self {
        Self {
            task,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

/// Wrap a task to retry it in the case of failure.
pub fn with_retries(task: TaskRef, max_attempts: u32) -> TaskRef {
    Arc::new(Retrying::new(task, max_attempts))
}

#[async_trait]
impl Task for Retrying {
    fn name(&self) -> &str {
        self.task.name()
    }

    async fn run(&self, ctx: CancellationToken) -> Result<(), TaskError> {
        let mut attempt = 1;
        loop {
            match self.task.run(ctx.clone()).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt >= self.max_attempts => return Err(e),
                Err(e) => {
                    debug!(task = %self.task.name(), attempt, error = %e, "attempt failed, retrying");
                    attempt += 1;
                }
            }
        }
    }
}
