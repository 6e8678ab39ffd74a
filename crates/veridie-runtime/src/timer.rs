//! Timer built on an external scheduler
//!
//! The timer has no thread of its own: waiting hands the suspended task's
//! resume handle and the delay to a constructor-injected scheduler, which
//! must eventually invoke the handle on the executor thread. Negative
//! delays clamp to zero.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context as PollContext, Poll};
use std::time::Duration;

use crate::executor::Job;
use crate::task::current_resume;

/// Marker value produced by an elapsed wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeout;

/// Schedules a job to be invoked after a delay
pub type Scheduler = Box<dyn Fn(Job, Duration)>;

pub struct Timer {
    scheduler: Scheduler,
}

impl Timer {
    pub fn new<S: Fn(Job, Duration) + 'static>(scheduler: S) -> Self {
        Self {
            scheduler: Box::new(scheduler),
        }
    }

    /// Suspend the current task for `delay`
    pub fn wait_for(&self, delay: Duration) -> WaitFuture<'_> {
        WaitFuture {
            timer: self,
            delay,
            registered: false,
        }
    }

    /// Suspend for `millis` milliseconds; negative delays clamp to zero
    pub fn wait_for_ms(&self, millis: i64) -> WaitFuture<'_> {
        self.wait_for(Duration::from_millis(millis.max(0) as u64))
    }
}

impl std::fmt::Debug for Timer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Timer")
    }
}

/// Future side of [`Timer::wait_for`]
pub struct WaitFuture<'t> {
    timer: &'t Timer,
    delay: Duration,
    registered: bool,
}

impl Future for WaitFuture<'_> {
    type Output = Timeout;

    fn poll(mut self: Pin<&mut Self>, _cx: &mut PollContext<'_>) -> Poll<Timeout> {
        if self.registered {
            return Poll::Ready(Timeout);
        }
        self.registered = true;
        let resume = current_resume();
        (self.timer.scheduler)(Box::new(move || resume.invoke()), self.delay);
        Poll::Pending
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ExecutorHandle;
    use crate::task::Task;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    fn capturing_timer() -> (Rc<RefCell<Vec<(Job, Duration)>>>, Timer) {
        let scheduled: Rc<RefCell<Vec<(Job, Duration)>>> = Rc::new(RefCell::new(Vec::new()));
        let timer = Timer::new({
            let scheduled = scheduled.clone();
            move |job, delay| scheduled.borrow_mut().push((job, delay))
        });
        (scheduled, timer)
    }

    #[test]
    fn test_wait_hands_continuation_and_delay_to_the_scheduler() {
        let (scheduled, timer) = capturing_timer();
        let timer = Rc::new(timer);
        let elapsed = Rc::new(Cell::new(false));

        let task = Task::new({
            let timer = timer.clone();
            let elapsed = elapsed.clone();
            async move {
                timer.wait_for(Duration::from_secs(1)).await;
                elapsed.set(true);
            }
        });
        task.run(&ExecutorHandle::inline(), None);

        assert!(!elapsed.get());
        let (job, delay) = scheduled.borrow_mut().pop().expect("one scheduled job");
        assert_eq!(delay, Duration::from_secs(1));

        job();
        assert!(elapsed.get());
    }

    #[test]
    fn test_negative_delay_clamps_to_zero() {
        let (scheduled, timer) = capturing_timer();
        let timer = Rc::new(timer);

        let task = Task::new({
            let timer = timer.clone();
            async move {
                timer.wait_for_ms(-250).await;
            }
        });
        task.run(&ExecutorHandle::inline(), None);

        let (_, delay) = scheduled.borrow_mut().pop().expect("one scheduled job");
        assert_eq!(delay, Duration::ZERO);
    }
}
