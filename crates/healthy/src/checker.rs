//! Checker — runs registered tasks on their schedules.
//!
//! `Checker::run` spawns one background loop per registered task. Each loop
//! consumes ticks from its own schedule, executes the task, updates the
//! rule's failure state and either reschedules the next tick (backoff) or
//! hands the failure to the notifier. `Checker::stop` cancels every loop
//! and waits until all of them have exited.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{CheckerError, CheckerResult, TaskError};
use crate::notify::Notifier;
use crate::rule::{ExecRule, FailureOptions, Verdict};
use crate::schedule::Schedule;
use crate::task::TaskRef;

/// A rule whose loop is currently running.
struct RunningRule {
    cancel: CancellationToken,
    /// Resolves to the rule, with its failure state, once the loop exits.
    handle: JoinHandle<ExecRule>,
    task: TaskRef,
    schedule: Schedule,
    options: FailureOptions,
}

/// Runs configured tasks with their schedules.
///
/// Tasks must be registered before [`Checker::run`]. After
/// [`Checker::stop`] the checker can be run again; consecutive failure
/// counts carry over to the next run.
pub struct Checker {
    /// Rules at rest (not running).
    rules: Vec<ExecRule>,
    /// Loops of the current run, if any.
    running: Option<Vec<RunningRule>>,
    notifier: Option<Arc<dyn Notifier>>,
    default_options: FailureOptions,
}

impl Default for Checker {
    fn default() -> Self {
        Self::new()
    }
}

impl Checker {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            running: None,
            notifier: None,
            default_options: FailureOptions::default(),
        }
    }

    /// Set the notifier for failures that reach their threshold.
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Set the failure options used by tasks added without their own.
    ///
    /// Only affects tasks registered afterwards.
    pub fn with_failure_options(mut self, options: FailureOptions) -> Self {
        self.default_options = options;
        self
    }

    pub fn default_options(&self) -> FailureOptions {
        self.default_options
    }

    /// Add a task to be run every `period`.
    ///
    /// `flex` adds a random component: the next invocation happens at
    /// `now + period ± U(0, flex)`.
    pub fn add_task_with_period(
        &mut self,
        task: TaskRef,
        period: Duration,
        flex: Duration,
    ) -> CheckerResult<()> {
        let options = self.default_options;
        self.add_task_with_options(task, period, flex, options)
    }

    /// Add a task with its own failure options.
    pub fn add_task_with_options(
        &mut self,
        task: TaskRef,
        period: Duration,
        flex: Duration,
        options: FailureOptions,
    ) -> CheckerResult<()> {
        if self.running.is_some() {
            return Err(CheckerError::AlreadyRunning);
        }
        debug!(task = %task.name(), ?period, ?flex, "task registered");
        self.rules
            .push(ExecRule::new(task, Schedule::new(period, flex), options));
        Ok(())
    }

    /// Number of registered tasks.
    pub fn len(&self) -> usize {
        self.rules.len() + self.running.as_ref().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Consecutive failure count of the named task.
    ///
    /// Only available while the checker is stopped; during a run the
    /// counters belong to their loops.
    pub fn consecutive_failures(&self, task_name: &str) -> Option<u32> {
        self.rules
            .iter()
            .find(|rule| rule.name() == task_name)
            .map(ExecRule::consecutive_failures)
    }

    /// Start all registered tasks.
    ///
    /// Returns right after spawning one loop per task; must be called from
    /// within a tokio runtime. `ctx` is handed to every task execution.
    pub fn run(&mut self, ctx: CancellationToken) -> CheckerResult<()> {
        if self.running.is_some() {
            return Err(CheckerError::AlreadyRunning);
        }

        let mut running = Vec::with_capacity(self.rules.len());
        for rule in self.rules.drain(..) {
            let cancel = CancellationToken::new();
            let task = rule.task.clone();
            let schedule = rule.schedule;
            let options = rule.options;

            let handle = tokio::spawn(run_check_loop(
                rule,
                ctx.clone(),
                cancel.clone(),
                self.notifier.clone(),
            ));

            running.push(RunningRule {
                cancel,
                handle,
                task,
                schedule,
                options,
            });
        }

        info!(tasks = running.len(), "checker started");
        self.running = Some(running);
        Ok(())
    }

    /// Cancel all scheduled invocations and wait for the loops to exit.
    ///
    /// An execution in flight is allowed to finish. No task is started
    /// after this returns. Stopping an idle checker does nothing.
    ///
    /// Cancel-safe: a rule is handed back only once its loop has been
    /// joined, so if this future is dropped early, calling `stop` again
    /// finishes the job.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.as_mut() else {
            return;
        };

        for rule in running.iter() {
            rule.cancel.cancel();
        }

        while let Some(rule) = running.first_mut() {
            let joined = (&mut rule.handle).await;
            let rule = running.remove(0);
            match joined {
                Ok(exec_rule) => self.rules.push(exec_rule),
                Err(e) => {
                    error!(
                        task = %rule.task.name(),
                        error = %e,
                        "check loop panicked; failure count reset"
                    );
                    self.rules
                        .push(ExecRule::new(rule.task, rule.schedule, rule.options));
                }
            }
        }

        self.running = None;
        info!(tasks = self.rules.len(), "checker stopped");
    }
}

/// The loop driving a single rule for one run.
async fn run_check_loop(
    mut rule: ExecRule,
    ctx: CancellationToken,
    cancel: CancellationToken,
    notifier: Option<Arc<dyn Notifier>>,
) -> ExecRule {
    let task = rule.task.clone();
    let (mut ticks, backoff) = rule.schedule.start(cancel);

    debug!(task = %task.name(), period = ?rule.schedule.period(), "check loop starting");

    while ticks.recv().await.is_some() {
        let outcome = AssertUnwindSafe(task.run(ctx.clone()))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| {
                Err(TaskError::Panicked {
                    message: panic_message(payload.as_ref()),
                })
            });

        match outcome {
            Ok(()) => match rule.tracker.record_success() {
                Verdict::Recovered => info!(task = %task.name(), "task recovered"),
                _ => info!(task = %task.name(), "task succeeded"),
            },
            Err(e) => {
                warn!(task = %task.name(), error = %e, "task failed");
                match rule.tracker.record_failure(&rule.options) {
                    Verdict::Notify => {
                        info!(
                            task = %task.name(),
                            failures = rule.tracker.consecutive_failures(),
                            "failure threshold reached"
                        );
                        if let Some(notifier) = &notifier {
                            notifier.notify(task.name(), &e).await;
                        }
                    }
                    Verdict::Backoff(delay) => {
                        debug!(task = %task.name(), ?delay, "retry scheduled");
                        backoff.reschedule(delay);
                    }
                    _ => {}
                }
            }
        }
    }

    drop(backoff);
    debug!(task = %task.name(), "check loop stopped");
    rule
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::task::TaskFn;

    fn noop(name: &'static str) -> TaskRef {
        TaskFn::arc(name, |_ctx| async { Ok(()) })
    }

    #[test]
    fn tasks_use_checker_default_options() {
        let options = FailureOptions::new(7, Duration::from_millis(5));
        let mut checker = Checker::new().with_failure_options(options);
        checker
            .add_task_with_period(noop("a"), Duration::from_secs(1), Duration::ZERO)
            .unwrap();

        assert_eq!(checker.rules[0].options(), options);
        assert_eq!(checker.len(), 1);
    }

    #[test]
    fn task_options_override_default() {
        let options = FailureOptions::new(1, Duration::ZERO);
        let mut checker = Checker::new();
        checker
            .add_task_with_options(noop("a"), Duration::from_secs(1), Duration::ZERO, options)
            .unwrap();

        assert_eq!(checker.rules[0].options(), options);
    }

    #[tokio::test(start_paused = true)]
    async fn registration_is_rejected_while_running() {
        let mut checker = Checker::new();
        checker
            .add_task_with_period(noop("a"), Duration::from_secs(1), Duration::ZERO)
            .unwrap();
        checker.run(CancellationToken::new()).unwrap();

        let err = checker
            .add_task_with_period(noop("b"), Duration::from_secs(1), Duration::ZERO)
            .unwrap_err();
        assert_eq!(err, CheckerError::AlreadyRunning);
        assert_eq!(
            checker.run(CancellationToken::new()).unwrap_err(),
            CheckerError::AlreadyRunning
        );

        checker.stop().await;
        assert!(!checker.is_running());
        assert_eq!(checker.len(), 1);
    }

    #[tokio::test]
    async fn stop_on_idle_checker_is_a_no_op() {
        let mut checker = Checker::new();
        checker.stop().await;
        assert!(checker.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_task_keeps_being_checked() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let mut checker = Checker::new();
        checker
            .add_task_with_period(
                TaskFn::arc("panics once", move |_ctx| {
                    let counter = counter.clone();
                    async move {
                        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                            panic!("check exploded");
                        }
                        Ok(())
                    }
                }),
                Duration::from_millis(100),
                Duration::ZERO,
            )
            .unwrap();

        checker.run(CancellationToken::new()).unwrap();
        tokio::time::sleep(Duration::from_millis(950)).await;
        checker.stop().await;

        // Immediate tick plus one every 100ms.
        assert_eq!(calls.load(Ordering::SeqCst), 10);
        assert_eq!(checker.consecutive_failures("panics once"), Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn panic_counts_as_failure() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let mut checker =
            Checker::new().with_failure_options(FailureOptions::new(1, Duration::ZERO));
        checker
            .add_task_with_period(
                TaskFn::arc("always panics", move |_ctx| {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        let exploded = true;
                        if exploded {
                            panic!("check exploded");
                        }
                        Ok(())
                    }
                }),
                Duration::from_millis(100),
                Duration::ZERO,
            )
            .unwrap();

        checker.run(CancellationToken::new()).unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;
        checker.stop().await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(checker.consecutive_failures("always panics"), Some(1));
    }

    #[test]
    fn panic_message_reads_str_and_string_payloads() {
        assert_eq!(panic_message(&"boom"), "boom");
        assert_eq!(panic_message(&"boom".to_string()), "boom");
        assert_eq!(panic_message(&42_u8), "unknown panic payload");
    }

    #[tokio::test(start_paused = true)]
    async fn interrupted_stop_can_be_resumed() {
        let mut checker = Checker::new();
        checker
            .add_task_with_period(
                TaskFn::arc("slow", |_ctx| async {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    Ok(())
                }),
                Duration::from_secs(1),
                Duration::ZERO,
            )
            .unwrap();

        checker.run(CancellationToken::new()).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let interrupted = tokio::time::timeout(Duration::from_millis(10), checker.stop()).await;
        assert!(interrupted.is_err());
        assert!(checker.is_running());
        assert_eq!(checker.len(), 1);

        checker.stop().await;
        assert!(!checker.is_running());
        assert_eq!(checker.len(), 1);
        assert_eq!(checker.consecutive_failures("slow"), Some(0));
    }
}
