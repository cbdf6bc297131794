//! The check abstraction.
//!
//! A [`Task`] is a named, independently schedulable unit of fallible work.
//! The checker shares tasks as [`TaskRef`] handles and invokes them with a
//! [`CancellationToken`] that implementations should honor to bound their
//! own work (network calls in particular).

use std::borrow::Cow;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::TaskError;

/// Any check run by the checker.
#[async_trait]
pub trait Task: Send + Sync + 'static {
    /// Descriptive task name, used in logs and notifications.
    fn name(&self) -> &str;

    /// Execute the check once.
    async fn run(&self, ctx: CancellationToken) -> Result<(), TaskError>;
}

/// Shared handle to a task.
pub type TaskRef = Arc<dyn Task>;

/// Closure-backed task.
///
/// The closure builds a fresh future per execution; shared state must be
/// captured explicitly (e.g. behind an `Arc`).
pub struct TaskFn<F> {
    name: Cow<'static, str>,
    f: F,
}

impl<F, Fut> TaskFn<F>
where
    F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
{
    pub fn new(name: impl Into<Cow<'static, str>>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }

    /// Create the task and return it as a [`TaskRef`].
    pub fn arc(name: impl Into<Cow<'static, str>>, f: F) -> TaskRef {
        Arc::new(Self::new(name, f))
    }
}

#[async_trait]
impl<F, Fut> Task for TaskFn<F>
where
    F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: CancellationToken) -> Result<(), TaskError> {
        (self.f)(ctx).await
    }
}
