//! Notification sinks for failures that reach their report threshold.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::error::TaskError;

/// Receives failures that crossed a rule's report threshold.
///
/// Called from the failing rule's own loop; a slow notifier delays that
/// rule's next tick, so implementations should bound their own I/O and
/// handle their own errors.
#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    async fn notify(&self, task_name: &str, error: &TaskError);
}

/// Writes a log line per reported failure.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, task_name: &str, error: &TaskError) {
        warn!(task = %task_name, error = %error, "new failure detected");
    }
}

/// Fans a notification out to several notifiers, in order.
#[derive(Default, Clone)]
pub struct CompositeNotifier {
    notifiers: Vec<Arc<dyn Notifier>>,
}

impl CompositeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    pub fn push(&mut self, notifier: Arc<dyn Notifier>) {
        self.notifiers.push(notifier);
    }

    pub fn len(&self) -> usize {
        self.notifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }
}

#[async_trait]
impl Notifier for CompositeNotifier {
    async fn notify(&self, task_name: &str, error: &TaskError) {
        for notifier in &self.notifiers {
            notifier.notify(task_name, error).await;
        }
    }
}
