//! Manually driven clock
//!
//! Collects the jobs the timer schedules and fires them when the test
//! advances time. Firing a job may schedule new jobs; those are picked up
//! in the same pass if they are already due.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use veridie_runtime::Job;

const STEP: Duration = Duration::from_secs(1);

struct TimerEntry {
    due: Duration,
    job: Job,
}

struct ClockInner {
    now: Duration,
    timers: Vec<TimerEntry>,
    firing: bool,
}

/// Deterministic replacement for the host's timer scheduler
#[derive(Clone)]
pub struct TestClock {
    inner: Rc<RefCell<ClockInner>>,
}

impl TestClock {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(ClockInner {
                now: Duration::ZERO,
                timers: Vec::new(),
                firing: false,
            })),
        }
    }

    /// The scheduler half handed to the timer
    pub fn scheduler(&self) -> impl Fn(Job, Duration) + 'static {
        let inner = self.inner.clone();
        move |job, delay| {
            let mut inner = inner.borrow_mut();
            let due = inner.now + delay;
            inner.timers.push(TimerEntry { due, job });
        }
    }

    /// Advance time and fire everything that comes due; a zero advance
    /// fires the jobs that are due right now
    pub fn fast_forward(&self, duration: Duration) {
        if duration.is_zero() {
            self.fire_due();
            return;
        }
        let end = self.inner.borrow().now + duration;
        loop {
            {
                let mut inner = self.inner.borrow_mut();
                if inner.now >= end {
                    break;
                }
                inner.now = (inner.now + STEP).min(end);
            }
            self.fire_due();
        }
    }

    /// Number of jobs still waiting for their due time
    pub fn pending(&self) -> usize {
        self.inner.borrow().timers.len()
    }

    fn fire_due(&self) {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.firing {
                return;
            }
            inner.firing = true;
        }
        loop {
            let job = {
                let mut inner = self.inner.borrow_mut();
                let now = inner.now;
                match inner.timers.iter().position(|entry| entry.due <= now) {
                    Some(index) => inner.timers.remove(index).job,
                    None => break,
                }
            };
            job();
        }
        self.inner.borrow_mut().firing = false;
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}
