//! Cooperative task primitive with cancellation
//!
//! A [`Task`] is a suspendable computation producing a value. Building a
//! task does not start it; the body runs up to its first suspension point
//! only once `run` posts it to an executor. Dropping the handle before
//! completion marks the task canceled: the body is not unwound on the spot,
//! but the next time a suspension point would resume it, the stored future
//! is dropped instead, running destructors and terminating the task. A task
//! started with a parent cancellation flag observes that flag the same way,
//! so canceling a root cancels the whole tree at its next resumption.
//!
//! Suspension points are the runtime's own awaitables (command futures,
//! timer waits, task joins, nested starts). Each registers a [`Resume`] for
//! the task being polled and hands it to whatever will eventually deliver
//! the wake-up; the host contract guarantees those deliveries arrive on the
//! executor thread. Ordinary `async fn` composition needs no machinery:
//! awaiting a child `async fn` directly inherits executor and cancellation
//! from the enclosing task.

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context as PollContext, Poll, Waker};

use veridie_core::VeridieError;

use crate::executor::ExecutorHandle;

/// Completion value of an owned background task
pub type TaskResult = Result<(), VeridieError>;

// ----------------------------------------------------------------------------
// Cancellation
// ----------------------------------------------------------------------------

/// Shared cancellation flag; observed, never owned, by child tasks
#[derive(Clone, Default)]
pub struct CancelFlag(Rc<Cell<bool>>);

impl CancelFlag {
    pub fn set(&self) {
        self.0.set(true);
    }

    pub fn is_set(&self) -> bool {
        self.0.get()
    }
}

// ----------------------------------------------------------------------------
// Resume Handles
// ----------------------------------------------------------------------------

/// Re-enters a suspended task when invoked
#[derive(Clone)]
pub(crate) struct Resume(Rc<dyn Fn()>);

impl Resume {
    pub(crate) fn invoke(&self) {
        (self.0)();
    }
}

thread_local! {
    static CURRENT: RefCell<Vec<Resume>> = const { RefCell::new(Vec::new()) };
}

/// Resume handle of the task currently being polled
///
/// Panics outside of a task step; the runtime's awaitables may only be
/// suspended upon from within a running task.
pub(crate) fn current_resume() -> Resume {
    CURRENT
        .with(|stack| stack.borrow().last().cloned())
        .expect("suspension point reached outside of a running task")
}

// ----------------------------------------------------------------------------
// Task Core
// ----------------------------------------------------------------------------

struct TaskCore<T> {
    future: RefCell<Option<Pin<Box<dyn Future<Output = T>>>>>,
    value: RefCell<Option<T>>,
    done: Cell<bool>,
    canceled: CancelFlag,
    parent: RefCell<Option<CancelFlag>>,
    executor: RefCell<Option<ExecutorHandle>>,
    continuation: RefCell<Option<Resume>>,
}

impl<T> TaskCore<T> {
    fn new(future: Pin<Box<dyn Future<Output = T>>>) -> Rc<Self> {
        Rc::new(Self {
            future: RefCell::new(Some(future)),
            value: RefCell::new(None),
            done: Cell::new(false),
            canceled: CancelFlag::default(),
            parent: RefCell::new(None),
            executor: RefCell::new(None),
            continuation: RefCell::new(None),
        })
    }

    fn is_canceled(&self) -> bool {
        self.canceled.is_set()
            || self
                .parent
                .borrow()
                .as_ref()
                .is_some_and(CancelFlag::is_set)
    }
}

fn resume_for<T: 'static>(core: &Rc<TaskCore<T>>) -> Resume {
    let core = core.clone();
    Resume(Rc::new(move || step(&core)))
}

/// Advance a task by one poll
fn step<T: 'static>(core: &Rc<TaskCore<T>>) {
    if core.done.get() {
        return;
    }

    if core.is_canceled() {
        // Cancellation observed at the suspension point: drop the body
        // (running its destructors) and never resume user code again.
        let future = core.future.borrow_mut().take();
        drop(future);
        core.done.set(true);
        return;
    }

    CURRENT.with(|stack| stack.borrow_mut().push(resume_for(core)));
    let poll = {
        let mut slot = core.future.borrow_mut();
        match slot.as_mut() {
            Some(future) => {
                let mut cx = PollContext::from_waker(Waker::noop());
                future.as_mut().poll(&mut cx)
            }
            None => Poll::Pending,
        }
    };
    CURRENT.with(|stack| {
        stack.borrow_mut().pop();
    });

    if let Poll::Ready(value) = poll {
        let future = core.future.borrow_mut().take();
        drop(future);
        *core.value.borrow_mut() = Some(value);
        core.done.set(true);
        if let Some(continuation) = core.continuation.borrow_mut().take() {
            let executor = core
                .executor
                .borrow()
                .clone()
                .expect("completed task has an executor");
            executor.execute(Box::new(move || continuation.invoke()));
        }
    }
}

// ----------------------------------------------------------------------------
// Task Handle
// ----------------------------------------------------------------------------

/// Owning handle to a suspendable computation
pub struct Task<T: 'static> {
    core: Option<Rc<TaskCore<T>>>,
}

impl<T: 'static> Task<T> {
    /// Build a task from its body; the body does not run yet
    pub fn new<F: Future<Output = T> + 'static>(body: F) -> Self {
        Self {
            core: Some(TaskCore::new(Box::pin(body))),
        }
    }

    fn core(&self) -> &Rc<TaskCore<T>> {
        self.core.as_ref().expect("task core present until moved")
    }

    /// Start the task: the first step is posted through the executor
    ///
    /// `parent` is a bare observation of an ancestor's cancellation flag;
    /// setting it cancels this task at its next resumption.
    pub fn run(&self, executor: &ExecutorHandle, parent: Option<&CancelFlag>) {
        let core = self.core();
        *core.executor.borrow_mut() = Some(executor.clone());
        *core.parent.borrow_mut() = parent.cloned();
        let resume = resume_for(core);
        executor.execute(Box::new(move || resume.invoke()));
    }

    /// False once the task has completed (or its cancellation was observed)
    pub fn is_active(&self) -> bool {
        !self.core().done.get()
    }

    /// This task's own cancellation flag, for children to observe
    pub fn cancel_flag(&self) -> CancelFlag {
        self.core().canceled.clone()
    }

    /// Await completion; consumes the handle without canceling the task
    pub fn join(mut self) -> TaskJoin<T> {
        TaskJoin {
            core: self.core.take().expect("task core present until moved"),
        }
    }
}

impl Task<TaskResult> {
    /// Take the stored error of a failed task, if any
    pub fn take_error(&self) -> Option<VeridieError> {
        if !self.core().done.get() {
            return None;
        }
        let mut value = self.core().value.borrow_mut();
        match value.take() {
            Some(Err(error)) => Some(error),
            other => {
                *value = other;
                None
            }
        }
    }

    pub fn has_error(&self) -> bool {
        self.core().done.get()
            && matches!(self.core().value.borrow().as_ref(), Some(Err(_)))
    }
}

impl<T: 'static> Drop for Task<T> {
    fn drop(&mut self) {
        if let Some(core) = self.core.take() {
            if !core.done.get() {
                core.canceled.set();
            }
        }
    }
}

/// Future side of [`Task::join`]
pub struct TaskJoin<T: 'static> {
    core: Rc<TaskCore<T>>,
}

impl<T: 'static> Future for TaskJoin<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, _cx: &mut PollContext<'_>) -> Poll<T> {
        if self.core.done.get() {
            if let Some(value) = self.core.value.borrow_mut().take() {
                return Poll::Ready(value);
            }
            // Completed by cancellation: there is no value and the awaiter
            // itself is being canceled; stay suspended until it is dropped.
            return Poll::Pending;
        }
        *self.core.continuation.borrow_mut() = Some(current_resume());
        Poll::Pending
    }
}

impl<T: 'static> Drop for TaskJoin<T> {
    fn drop(&mut self) {
        if !self.core.done.get() {
            self.core.canceled.set();
        }
    }
}

// ----------------------------------------------------------------------------
// Detached Tasks
// ----------------------------------------------------------------------------

/// Run a fire-and-forget task: the body starts eagerly on the calling
/// thread and keeps itself alive through its registered resumptions. Used
/// for state transitions, which must outlive the state that posts them.
pub fn detach<F: Future<Output = ()> + 'static>(body: F) {
    let core = TaskCore::new(Box::pin(body) as Pin<Box<dyn Future<Output = ()>>>);
    *core.executor.borrow_mut() = Some(ExecutorHandle::inline());
    step(&core);
}

// ----------------------------------------------------------------------------
// Task Owner
// ----------------------------------------------------------------------------

struct OwnerInner {
    executor: ExecutorHandle,
    tasks: Vec<Task<TaskResult>>,
}

/// A bag that owns background tasks; dropping it cancels every one of them
pub struct TaskOwner {
    inner: Rc<RefCell<OwnerInner>>,
}

impl TaskOwner {
    pub fn new(executor: ExecutorHandle) -> Self {
        Self {
            inner: Rc::new(RefCell::new(OwnerInner {
                executor,
                tasks: Vec::new(),
            })),
        }
    }

    pub fn executor(&self) -> ExecutorHandle {
        self.inner.borrow().executor.clone()
    }

    /// Start a task under this owner
    pub fn start_root(&self, task: Task<TaskResult>) {
        let executor = {
            let mut inner = self.inner.borrow_mut();
            inner
                .tasks
                .retain(|task| task.is_active() || task.has_error());
            inner.executor.clone()
        };
        task.run(&executor, None);
        self.inner.borrow_mut().tasks.push(task);
    }

    /// Awaitable that starts a task under this owner without awaiting its
    /// completion; the awaiter resumes immediately
    pub fn start_nested(&self, task: Task<TaskResult>) -> NestedStart {
        self.downgrade().start_nested(task)
    }

    /// Take the first stored error of a finished child, if any
    pub fn take_error(&self) -> Option<VeridieError> {
        let inner = self.inner.borrow();
        inner.tasks.iter().find_map(Task::take_error)
    }

    pub fn downgrade(&self) -> WeakTaskOwner {
        WeakTaskOwner(Rc::downgrade(&self.inner))
    }
}

/// Non-owning reference to a [`TaskOwner`], held by the owner's own tasks
#[derive(Clone)]
pub struct WeakTaskOwner(Weak<RefCell<OwnerInner>>);

impl WeakTaskOwner {
    /// Start a task under the owner, if it is still alive
    pub fn start(&self, task: Task<TaskResult>) {
        if let Some(inner) = self.0.upgrade() {
            TaskOwner { inner }.start_root(task);
        }
    }

    /// See [`TaskOwner::start_nested`]
    pub fn start_nested(&self, task: Task<TaskResult>) -> NestedStart {
        NestedStart {
            owner: self.clone(),
            task: Some(task),
        }
    }
}

/// Future side of [`TaskOwner::start_nested`]
pub struct NestedStart {
    owner: WeakTaskOwner,
    task: Option<Task<TaskResult>>,
}

impl Future for NestedStart {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, _cx: &mut PollContext<'_>) -> Poll<()> {
        if let Some(task) = self.task.take() {
            self.owner.start(task);
        }
        Poll::Ready(())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{Execute, Job};
    use std::collections::VecDeque;

    /// A suspension point the test opens by hand
    #[derive(Clone, Default)]
    struct Gate {
        resume: Rc<RefCell<Option<Resume>>>,
        opened: Rc<Cell<bool>>,
    }

    impl Gate {
        fn wait(&self) -> GateWait {
            GateWait { gate: self.clone() }
        }

        fn open(&self) {
            self.opened.set(true);
            let resume = self.resume.borrow_mut().take();
            if let Some(resume) = resume {
                resume.invoke();
            }
        }

        fn armed(&self) -> bool {
            self.resume.borrow().is_some()
        }
    }

    struct GateWait {
        gate: Gate,
    }

    impl Future for GateWait {
        type Output = ();

        fn poll(self: Pin<&mut Self>, _cx: &mut PollContext<'_>) -> Poll<()> {
            if self.gate.opened.get() {
                Poll::Ready(())
            } else {
                *self.gate.resume.borrow_mut() = Some(current_resume());
                Poll::Pending
            }
        }
    }

    /// Flips a flag when dropped, to observe destructor runs on cancel
    struct DropProbe(Rc<Cell<bool>>);

    impl Drop for DropProbe {
        fn drop(&mut self) {
            self.0.set(true);
        }
    }

    #[derive(Clone, Default)]
    struct QueueExecutor {
        queue: Rc<RefCell<VecDeque<Job>>>,
    }

    impl QueueExecutor {
        fn drain(&self) {
            loop {
                let job = self.queue.borrow_mut().pop_front();
                match job {
                    Some(job) => job(),
                    None => break,
                }
            }
        }
    }

    impl Execute for QueueExecutor {
        fn execute(&self, job: Job) {
            self.queue.borrow_mut().push_back(job);
        }
    }

    #[test]
    fn test_body_does_not_run_until_started() {
        let before = Rc::new(Cell::new(false));
        let after = Rc::new(Cell::new(false));
        let gate = Gate::default();

        let task = Task::new({
            let before = before.clone();
            let after = after.clone();
            let gate = gate.clone();
            async move {
                before.set(true);
                gate.wait().await;
                after.set(true);
            }
        });
        assert!(!before.get());
        assert!(task.is_active());

        task.run(&ExecutorHandle::inline(), None);
        assert!(before.get());
        assert!(!after.get());
        assert!(task.is_active());

        gate.open();
        assert!(after.get());
        assert!(!task.is_active());
    }

    #[test]
    fn test_run_posts_first_step_through_the_executor() {
        let queue = QueueExecutor::default();
        let executor = ExecutorHandle::new(queue.clone());
        let started = Rc::new(Cell::new(false));

        let task = Task::new({
            let started = started.clone();
            async move {
                started.set(true);
            }
        });
        task.run(&executor, None);
        assert!(!started.get());

        queue.drain();
        assert!(started.get());
    }

    #[test]
    fn test_join_resumes_awaiter_with_the_value() {
        let gate = Gate::default();
        let observed = Rc::new(Cell::new(0));
        let executor = ExecutorHandle::inline();

        let child = Task::new({
            let gate = gate.clone();
            async move {
                gate.wait().await;
                41
            }
        });
        child.run(&executor, None);

        let parent = Task::new({
            let observed = observed.clone();
            async move {
                observed.set(child.join().await + 1);
            }
        });
        parent.run(&executor, None);
        assert_eq!(observed.get(), 0);

        gate.open();
        assert_eq!(observed.get(), 42);
    }

    #[test]
    fn test_drop_cancels_at_next_resumption() {
        let gate = Gate::default();
        let after = Rc::new(Cell::new(false));
        let destroyed = Rc::new(Cell::new(false));

        let task = Task::new({
            let gate = gate.clone();
            let after = after.clone();
            let probe = DropProbe(destroyed.clone());
            async move {
                let _probe = probe;
                gate.wait().await;
                after.set(true);
            }
        });
        task.run(&ExecutorHandle::inline(), None);
        assert!(gate.armed());

        drop(task);
        // Not unwound on the spot; destructors run at the next resumption.
        assert!(!destroyed.get());

        gate.open();
        assert!(destroyed.get());
        assert!(!after.get());
    }

    #[test]
    fn test_parent_flag_cancels_child_tree() {
        let gate = Gate::default();
        let after = Rc::new(Cell::new(false));
        let parent_flag = CancelFlag::default();

        let child = Task::new({
            let gate = gate.clone();
            let after = after.clone();
            async move {
                gate.wait().await;
                after.set(true);
            }
        });
        child.run(&ExecutorHandle::inline(), Some(&parent_flag));

        parent_flag.set();
        gate.open();
        assert!(!after.get());
        assert!(!child.is_active());
    }

    #[test]
    fn test_owner_drop_cancels_owned_tasks() {
        let gate = Gate::default();
        let after = Rc::new(Cell::new(false));
        let owner = TaskOwner::new(ExecutorHandle::inline());

        owner.start_root(Task::new({
            let gate = gate.clone();
            let after = after.clone();
            async move {
                gate.wait().await;
                after.set(true);
                Ok(())
            }
        }));

        drop(owner);
        gate.open();
        assert!(!after.get());
    }

    #[test]
    fn test_nested_start_resumes_immediately_and_tracks_the_task() {
        let outer_gate = Gate::default();
        let inner_gate = Gate::default();
        let inner_done = Rc::new(Cell::new(false));
        let outer_resumed = Rc::new(Cell::new(false));
        let owner = TaskOwner::new(ExecutorHandle::inline());
        let weak = owner.downgrade();

        owner.start_root(Task::new({
            let outer_gate = outer_gate.clone();
            let inner_gate = inner_gate.clone();
            let inner_done = inner_done.clone();
            let outer_resumed = outer_resumed.clone();
            async move {
                outer_gate.wait().await;
                weak.start_nested(Task::new({
                    let inner_done = inner_done.clone();
                    async move {
                        inner_gate.wait().await;
                        inner_done.set(true);
                        Ok(())
                    }
                }))
                .await;
                outer_resumed.set(true);
                Ok(())
            }
        }));

        outer_gate.open();
        // The nested task was started but not awaited.
        assert!(outer_resumed.get());
        assert!(!inner_done.get());

        inner_gate.open();
        assert!(inner_done.get());
    }

    #[test]
    fn test_owner_surfaces_stored_errors_once() {
        let owner = TaskOwner::new(ExecutorHandle::inline());
        owner.start_root(Task::new(async {
            Err(VeridieError::config_error("boom"))
        }));

        let error = owner.take_error().expect("stored error");
        assert!(matches!(error, VeridieError::Configuration { .. }));
        assert!(owner.take_error().is_none());
    }

    #[test]
    fn test_detached_task_runs_eagerly() {
        let gate = Gate::default();
        let before = Rc::new(Cell::new(false));
        let after = Rc::new(Cell::new(false));

        detach({
            let gate = gate.clone();
            let before = before.clone();
            let after = after.clone();
            async move {
                before.set(true);
                gate.wait().await;
                after.set(true);
            }
        });
        assert!(before.get());
        assert!(!after.get());

        gate.open();
        assert!(after.get());
    }
}
