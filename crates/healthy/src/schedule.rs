//! Jittered periodic tick generation.
//!
//! A [`Schedule`] is a factory of tick streams. Each call to
//! [`Schedule::start`] spawns a timer task that emits one [`Tick`]
//! immediately and then one every `period ± U(0, flex)`, re-sampling the
//! jitter for every interval. The returned [`Backoff`] handle lets the
//! consumer replace the delay before the *next* tick, which is how retry
//! backoff shares the regular timer instead of racing a second one.
//!
//! ```text
//! start()
//!   ├── Tick (immediate)
//!   ├── timer task ── sleep(period ± flex) ── Tick ── sleep(...) ── ...
//!   │                   ▲
//!   │                   └── Backoff::reschedule(d) resets the pending sleep to d
//!   └── cancel ──► timer stops, Ticks::recv() returns None
//! ```

use std::time::Duration;

use rand::Rng;
use tokio::sync::{mpsc, watch};
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Stand-in deadline for delays that overflow the clock (about 30 years).
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// A scheduling signal meaning "execute now".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    /// When the tick was emitted.
    pub at: Instant,
}

/// Period and jitter of a periodic schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    period: Duration,
    flex: Duration,
}

impl Schedule {
    pub fn new(period: Duration, flex: Duration) -> Self {
        Self { period, flex }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn flex(&self) -> Duration {
        self.flex
    }

    /// Sample the delay before the next regular tick.
    ///
    /// Uniform in `[period - flex, period + flex]`, clamped at zero.
    /// A zero flex yields exactly `period`.
    pub fn next_delay(&self) -> Duration {
        if self.flex.is_zero() {
            return self.period;
        }
        let flex_nanos = u64::try_from(self.flex.as_nanos()).unwrap_or(u64::MAX / 2);
        let offset = rand::rng().random_range(0..=flex_nanos.saturating_mul(2));
        self.period
            .saturating_add(Duration::from_nanos(offset))
            .saturating_sub(self.flex)
    }

    /// Start a fresh tick stream bound to `cancel`.
    ///
    /// Must be called from within a tokio runtime. The stream is not
    /// restartable: once `cancel` fires it is closed for good.
    pub fn start(&self, cancel: CancellationToken) -> (Ticks, Backoff) {
        let (tick_tx, tick_rx) = mpsc::channel(1);
        let (backoff_tx, backoff_rx) = watch::channel(None);

        let now = Instant::now();
        // The buffer is empty, so the first tick always fits.
        let _ = tick_tx.try_send(Tick { at: now });

        let first_deadline = deadline_after(now, self.next_delay());
        tokio::spawn(drive(*self, first_deadline, tick_tx, backoff_rx, cancel.clone()));

        (
            Ticks {
                rx: tick_rx,
                cancel,
            },
            Backoff { tx: backoff_tx },
        )
    }
}

/// Consumer side of a started schedule.
#[derive(Debug)]
pub struct Ticks {
    rx: mpsc::Receiver<Tick>,
    cancel: CancellationToken,
}

impl Ticks {
    /// Wait for the next tick.
    ///
    /// Returns `None` once the schedule is cancelled. A tick still sitting
    /// in the buffer when cancellation fires is never delivered.
    pub async fn recv(&mut self) -> Option<Tick> {
        if self.cancel.is_cancelled() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            tick = self.rx.recv() => tick,
        }
    }
}

/// Override path into a running schedule.
#[derive(Debug)]
pub struct Backoff {
    tx: watch::Sender<Option<Duration>>,
}

impl Backoff {
    /// Fire the next tick after `delay` instead of the regular period.
    ///
    /// Only the latest pending override is kept.
    pub fn reschedule(&self, delay: Duration) {
        self.tx.send_replace(Some(delay));
    }
}

fn deadline_after(now: Instant, delay: Duration) -> Instant {
    now.checked_add(delay.min(FAR_FUTURE)).unwrap_or(now)
}

/// Timer task behind a started schedule.
async fn drive(
    schedule: Schedule,
    first_deadline: Instant,
    ticks: mpsc::Sender<Tick>,
    mut overrides: watch::Receiver<Option<Duration>>,
    cancel: CancellationToken,
) {
    let sleep = time::sleep_until(first_deadline);
    tokio::pin!(sleep);
    let mut overrides_open = true;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            changed = overrides.changed(), if overrides_open => {
                if changed.is_err() {
                    overrides_open = false;
                    continue;
                }
                let pending = *overrides.borrow_and_update();
                if let Some(delay) = pending {
                    trace!(?delay, "next tick rescheduled");
                    sleep.as_mut().reset(deadline_after(Instant::now(), delay));
                }
            }
            _ = &mut sleep => {
                let tick = Tick { at: Instant::now() };
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    sent = ticks.send(tick) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
                sleep
                    .as_mut()
                    .reset(deadline_after(Instant::now(), schedule.next_delay()));
            }
        }
    }

    trace!(period = ?schedule.period, "schedule timer stopped");
}
