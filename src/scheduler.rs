//! Cooperative interval timers
//!
//! Nothing here sleeps or spawns. The host owns the clock and asks each timer
//! whether a tick is due; every timer hands out a [`TaskHandle`] at creation so
//! its owner can cancel it on teardown. A cancelled timer never yields again.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// Cancellation handle for a scheduled task
#[derive(Debug, Clone)]
pub struct TaskHandle {
    id: u64,
    cancelled: Arc<AtomicBool>,
}

impl TaskHandle {
    fn new() -> Self {
        Self {
            id: NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Cancel the task; idempotent
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Whole seconds as a [`TimeDelta`], saturating at the largest representable span
pub fn seconds_delta(secs: u64) -> TimeDelta {
    let max = TimeDelta::MAX.num_seconds().unsigned_abs();
    TimeDelta::try_seconds(secs.min(max) as i64).unwrap_or(TimeDelta::MAX)
}

/// Milliseconds as a [`TimeDelta`], saturating at the largest representable span
pub fn millis_delta(ms: u64) -> TimeDelta {
    let max = TimeDelta::MAX.num_milliseconds().unsigned_abs();
    TimeDelta::try_milliseconds(ms.min(max) as i64).unwrap_or(TimeDelta::MAX)
}

/// Fixed-period timer driven by an external clock
#[derive(Debug)]
pub struct IntervalTimer {
    period: TimeDelta,
    next_due: Option<DateTime<Utc>>,
    handle: TaskHandle,
}

impl IntervalTimer {
    /// Timer whose first tick is due one `period` after `now`.
    /// Periods below one millisecond are raised to one millisecond. A tick
    /// that would fall past the end of the calendar is never due.
    pub fn start(period: TimeDelta, now: DateTime<Utc>) -> Self {
        let period = period.max(TimeDelta::milliseconds(1));
        Self {
            period,
            next_due: now.checked_add_signed(period),
            handle: TaskHandle::new(),
        }
    }

    pub fn period(&self) -> TimeDelta {
        self.period
    }

    /// Handle that cancels this timer
    pub fn handle(&self) -> TaskHandle {
        self.handle.clone()
    }

    /// Next scheduled tick, or `None` once cancelled
    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.next_due.filter(|_| !self.handle.is_cancelled())
    }

    /// Take the next tick if it is due at or before `now`. Call repeatedly to
    /// catch up on ticks missed while the host was busy.
    pub fn poll(&mut self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let due = self.next_due()?;
        if due > now {
            return None;
        }
        self.next_due = due.checked_add_signed(self.period);
        Some(due)
    }

    pub fn cancel(&self) {
        self.handle.cancel();
    }
}
