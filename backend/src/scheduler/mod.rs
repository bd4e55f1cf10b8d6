//! Rate-limited, retrying task queue shared by every upstream fetcher.
//!
//! One [`RateLimitedScheduler`] is built per upstream host and handed to the
//! callers that talk to it. Dispatches are admitted in enqueue order against a
//! sliding 60 second budget plus a fixed anti-burst spacing; retries of tasks
//! already in flight are admitted ahead of fresh enqueues.

pub mod backoff;
pub mod window;

pub use backoff::BackoffPolicy;
pub use window::SlidingWindow;

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::Notify;
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, warn};

use crate::config::SchedulerConfig;

/// Transient-vs-fatal classification supplied by callers for their error type.
pub trait Retryable {
    fn is_transient(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Non-transient error, not retried.
    Fatal,
    /// Transient error on every allowed attempt.
    Exhausted,
}

/// Terminal failure of one scheduled task. Returned as a value so batch callers can move on.
#[derive(Debug)]
pub struct TaskFailure<E> {
    pub label: String,
    pub attempts: u32,
    pub kind: FailureKind,
    pub error: E,
}

impl<E: fmt::Display> fmt::Display for TaskFailure<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            FailureKind::Fatal => write!(f, "{} failed on attempt {}: {}", self.label, self.attempts, self.error),
            FailureKind::Exhausted => write!(
                f,
                "{} failed after {} attempts: {}",
                self.label, self.attempts, self.error
            ),
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for TaskFailure<E> {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStats {
    pub dispatched: u64,
    pub retried: u64,
    pub succeeded: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lane {
    Fresh,
    Retry,
}

#[derive(Debug)]
struct QueueState {
    window: SlidingWindow,
    last_dispatch: Option<Instant>,
    retries: VecDeque<u64>,
    fresh: VecDeque<u64>,
    next_ticket: u64,
    stats: SchedulerStats,
}

impl QueueState {
    fn push(&mut self, lane: Lane) -> u64 {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        match lane {
            Lane::Fresh => self.fresh.push_back(ticket),
            Lane::Retry => self.retries.push_back(ticket),
        }
        ticket
    }

    fn head(&self) -> Option<u64> {
        self.retries.front().or_else(|| self.fresh.front()).copied()
    }

    fn pop_head(&mut self) {
        if self.retries.pop_front().is_none() {
            self.fresh.pop_front();
        }
    }

    fn remove(&mut self, ticket: u64) {
        self.retries.retain(|t| *t != ticket);
        self.fresh.retain(|t| *t != ticket);
    }

    fn delay_until_dispatch(&mut self, now: Instant, spacing: Duration) -> Duration {
        let window_delay = self.window.delay_until_admit(now);
        let spacing_delay = self
            .last_dispatch
            .map(|last| (last + spacing).saturating_duration_since(now))
            .unwrap_or(Duration::ZERO);
        window_delay.max(spacing_delay)
    }
}

enum Step {
    Dispatched,
    Sleep(Duration),
    Wait,
}

/// Removes an abandoned ticket so a dropped caller never stalls the queue.
struct TicketGuard<'a> {
    scheduler: &'a RateLimitedScheduler,
    ticket: u64,
    armed: bool,
}

impl Drop for TicketGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.scheduler.state().remove(self.ticket);
            self.scheduler.wake.notify_waiters();
        }
    }
}

pub struct RateLimitedScheduler {
    name: String,
    config: SchedulerConfig,
    backoff: BackoffPolicy,
    state: Mutex<QueueState>,
    wake: Notify,
}

impl RateLimitedScheduler {
    pub fn new(name: impl Into<String>, config: SchedulerConfig) -> Self {
        let backoff = BackoffPolicy::new(config.base_delay, config.max_delay);
        let state = QueueState {
            window: SlidingWindow::per_minute(config.max_per_minute),
            last_dispatch: None,
            retries: VecDeque::new(),
            fresh: VecDeque::new(),
            next_ticket: 0,
            stats: SchedulerStats::default(),
        };
        Self {
            name: name.into(),
            config,
            backoff,
            state: Mutex::new(state),
            wake: Notify::new(),
        }
    }

    pub fn stats(&self) -> SchedulerStats {
        self.state().stats.clone()
    }

    // Critical sections never await, so a poisoned lock only means a panicking
    // caller; the queue itself is still consistent.
    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run `task` under the budget, retrying transient failures with backoff.
    ///
    /// `task` is invoked once per attempt and must build a fresh request each time.
    pub async fn enqueue<T, E, F, Fut>(&self, label: &str, mut task: F) -> Result<T, TaskFailure<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + fmt::Display,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let lane = if attempt == 1 { Lane::Fresh } else { Lane::Retry };
            self.admit(lane).await;

            match task().await {
                Ok(value) => {
                    self.state().stats.succeeded += 1;
                    return Ok(value);
                }
                Err(error) if !error.is_transient() => {
                    self.state().stats.failed += 1;
                    warn!("[{}] {} failed with non-retryable error: {}", self.name, label, error);
                    return Err(TaskFailure {
                        label: label.to_string(),
                        attempts: attempt,
                        kind: FailureKind::Fatal,
                        error,
                    });
                }
                Err(error) if attempt >= max_attempts => {
                    self.state().stats.failed += 1;
                    warn!("[{}] {} gave up after {} attempts: {}", self.name, label, attempt, error);
                    return Err(TaskFailure {
                        label: label.to_string(),
                        attempts: attempt,
                        kind: FailureKind::Exhausted,
                        error,
                    });
                }
                Err(error) => {
                    let delay = self.backoff.jittered_delay(attempt, &mut rand::thread_rng());
                    self.state().stats.retried += 1;
                    debug!(
                        "[{}] {} attempt {} failed ({}), retrying in {:?}",
                        self.name, label, attempt, error, delay
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn admit(&self, lane: Lane) {
        let ticket = self.state().push(lane);
        self.wake.notify_waiters();
        let mut guard = TicketGuard {
            scheduler: self,
            ticket,
            armed: true,
        };

        loop {
            // Registered before inspecting the queue so a dispatch in between is not missed.
            let notified = self.wake.notified();
            let step = {
                let mut state = self.state();
                if state.head() != Some(ticket) {
                    Step::Wait
                } else {
                    let now = Instant::now();
                    let delay = state.delay_until_dispatch(now, self.config.min_spacing);
                    if delay.is_zero() {
                        state.pop_head();
                        state.window.record(now);
                        state.last_dispatch = Some(now);
                        state.stats.dispatched += 1;
                        Step::Dispatched
                    } else {
                        Step::Sleep(delay)
                    }
                }
            };

            match step {
                Step::Dispatched => {
                    guard.armed = false;
                    self.wake.notify_waiters();
                    return;
                }
                Step::Sleep(delay) => sleep(delay).await,
                Step::Wait => notified.await,
            }
        }
    }
}
