//! Request/response command manager
//!
//! Bridges the task-oriented core to the two fire-and-reply outbound
//! channels (UI and transport). Issuing a command picks the smallest unused
//! correlation id above the command's base id, hands the command to the
//! external invoker and returns an awaitable that resolves to the response
//! code the host later submits. At most 256 ids exist per kind; exhaustion
//! and invoker refusal resolve to `INTEROP_FAILURE` synchronously, and so
//! does every still-pending await when the manager shuts down.

use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context as PollContext, Poll};

use tracing::{error, info, warn};

use veridie_core::command::{Command, CommandChannel, ResponseCode};

use crate::task::{current_resume, Resume};

const INVALID_CMD_ID: i32 = 0;
/// Width of each kind's correlation-id range
const ID_SPAN: i32 = 1 << 8;

// ----------------------------------------------------------------------------
// External Invoker
// ----------------------------------------------------------------------------

/// Outbound sink supplied by the host; one per channel
///
/// Returning `false` refuses the command, which then resolves to
/// `INTEROP_FAILURE` without an id being consumed.
pub trait ExternalInvoker {
    fn invoke(&self, command: Command, id: i32) -> bool;
}

// ----------------------------------------------------------------------------
// Manager
// ----------------------------------------------------------------------------

#[derive(Default)]
struct PendingCommand {
    continuation: Option<Resume>,
    response: Option<i64>,
}

pub(crate) struct ManagerInner {
    ui: Box<dyn ExternalInvoker>,
    bt: Box<dyn ExternalInvoker>,
    pending: RefCell<HashMap<i32, PendingCommand>>,
}

fn issue(inner: &Rc<ManagerInner>, command: Command) -> ResponseFuture {
    let name = command.name();

    let base = command.base_id();
    let mut id = base;
    {
        let pending = inner.pending.borrow();
        while pending.contains_key(&id) {
            id += 1;
        }
    }
    if id - base >= ID_SPAN {
        error!("command storage is full for {name}");
        return ResponseFuture::resolved(name);
    }

    let invoker = match command.channel() {
        CommandChannel::Ui => &inner.ui,
        CommandChannel::Bt => &inner.bt,
    };
    if !invoker.invoke(command, id) {
        error!("external invoker failed for {name}");
        return ResponseFuture::resolved(name);
    }

    inner
        .pending
        .borrow_mut()
        .insert(id, PendingCommand::default());
    ResponseFuture {
        manager: Rc::downgrade(inner),
        id,
        name,
        registered: false,
        finished: false,
    }
}

impl ManagerInner {
    fn submit_response(&self, id: i32, response: i64) {
        let continuation = {
            let mut pending = self.pending.borrow_mut();
            let Some(entry) = pending.get_mut(&id) else {
                warn!("received a response to a non-existing command, id = {id}");
                return;
            };
            match entry.continuation.take() {
                Some(continuation) => {
                    entry.response = Some(response);
                    continuation
                }
                None => {
                    pending.remove(&id);
                    info!("received an orphaned response, id = {id}");
                    return;
                }
            }
        };
        continuation.invoke();
    }

    fn shutdown(&self) {
        loop {
            let entry = {
                let mut pending = self.pending.borrow_mut();
                let Some(&id) = pending.keys().next() else {
                    break;
                };
                pending.remove(&id)
            };
            if let Some(PendingCommand {
                continuation: Some(continuation),
                ..
            }) = entry
            {
                continuation.invoke();
            }
        }
    }
}

/// Owns the pending-command table; hosts route responses through it
pub struct CommandManager {
    inner: Rc<ManagerInner>,
}

impl CommandManager {
    pub fn new(ui: Box<dyn ExternalInvoker>, bt: Box<dyn ExternalInvoker>) -> Self {
        Self {
            inner: Rc::new(ManagerInner {
                ui,
                bt,
                pending: RefCell::new(HashMap::new()),
            }),
        }
    }

    /// Issuing side of the manager, cheap to clone into tasks
    pub fn proxy(&self) -> CommandProxy {
        CommandProxy {
            inner: self.inner.clone(),
        }
    }

    /// Route a host response back to the awaiting task
    pub fn submit_response(&self, id: i32, response: i64) {
        self.inner.submit_response(id, response);
    }
}

impl Drop for CommandManager {
    fn drop(&mut self) {
        // Every still-pending awaiter observes INTEROP_FAILURE instead of
        // hanging forever.
        self.inner.shutdown();
    }
}

// ----------------------------------------------------------------------------
// Proxy
// ----------------------------------------------------------------------------

/// Issues commands on behalf of the state machine
#[derive(Clone)]
pub struct CommandProxy {
    inner: Rc<ManagerInner>,
}

impl CommandProxy {
    /// Issue a command and await its response code
    pub fn command(&self, command: Command) -> ResponseFuture {
        log_command(&command);
        issue(&self.inner, command)
    }

    /// Issue a command without awaiting; a later response is dropped with a
    /// single informational log
    pub fn fire_and_forget(&self, command: Command) {
        log_command(&command);
        let _ = issue(&self.inner, command);
    }
}

fn log_command(command: &Command) {
    let mut rendered = String::new();
    for arg in command.args() {
        rendered.push_str(" [");
        rendered.push_str(&arg);
        rendered.push(']');
    }
    info!(">>>>> {}{}", command.name(), rendered);
}

// ----------------------------------------------------------------------------
// Response Future
// ----------------------------------------------------------------------------

/// Awaitable response of an issued command
pub struct ResponseFuture {
    manager: Weak<ManagerInner>,
    id: i32,
    name: &'static str,
    registered: bool,
    finished: bool,
}

impl ResponseFuture {
    /// A future that resolves to `INTEROP_FAILURE` without touching the table
    fn resolved(name: &'static str) -> Self {
        Self {
            manager: Weak::new(),
            id: INVALID_CMD_ID,
            name,
            registered: false,
            finished: false,
        }
    }

    fn finish(&mut self, code: ResponseCode) -> Poll<ResponseCode> {
        self.finished = true;
        info!("<<<<< {}Response [{}]", self.name, code);
        Poll::Ready(code)
    }
}

impl Future for ResponseFuture {
    type Output = ResponseCode;

    fn poll(mut self: Pin<&mut Self>, _cx: &mut PollContext<'_>) -> Poll<ResponseCode> {
        if self.id == INVALID_CMD_ID {
            return self.finish(ResponseCode::InteropFailure);
        }
        let Some(inner) = self.manager.upgrade() else {
            return self.finish(ResponseCode::InteropFailure);
        };

        let outcome = {
            let mut pending = inner.pending.borrow_mut();
            match pending.get_mut(&self.id) {
                // Erased under us: the manager shut down.
                None => Some(ResponseCode::InteropFailure),
                Some(entry) => match entry.response {
                    Some(raw) => {
                        pending.remove(&self.id);
                        Some(ResponseCode::from_raw(raw).unwrap_or_else(|| {
                            warn!("unknown response code {raw} for {}", self.name);
                            ResponseCode::InteropFailure
                        }))
                    }
                    None => None,
                },
            }
        };

        match outcome {
            Some(code) => self.finish(code),
            None => {
                let mut pending = inner.pending.borrow_mut();
                if let Some(entry) = pending.get_mut(&self.id) {
                    entry.continuation = Some(current_resume());
                }
                self.registered = true;
                Poll::Pending
            }
        }
    }
}

impl Drop for ResponseFuture {
    fn drop(&mut self) {
        // A never-polled future belongs to a fire-and-forget issue; its
        // entry stays behind so the late response can be logged and dropped.
        if self.finished || !self.registered {
            return;
        }
        if let Some(inner) = self.manager.upgrade() {
            inner.pending.borrow_mut().remove(&self.id);
        }
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
    use std::cell::Cell;
    use std::collections::VecDeque;

    #[derive(Clone, Default)]
    struct RecordingInvoker {
        queue: Rc<RefCell<VecDeque<(Command, i32)>>>,
        refuse: Rc<Cell<bool>>,
        invocations: Rc<Cell<u32>>,
    }

    impl RecordingInvoker {
        fn pop(&self) -> Option<(Command, i32)> {
            self.queue.borrow_mut().pop_front()
        }
    }

    impl ExternalInvoker for RecordingInvoker {
        fn invoke(&self, command: Command, id: i32) -> bool {
            self.invocations.set(self.invocations.get() + 1);
            if self.refuse.get() {
                return false;
            }
            self.queue.borrow_mut().push_back((command, id));
            true
        }
    }

    struct Fixture {
        ui: RecordingInvoker,
        bt: RecordingInvoker,
        manager: CommandManager,
    }

    fn fixture() -> Fixture {
        let ui = RecordingInvoker::default();
        let bt = RecordingInvoker::default();
        let manager = CommandManager::new(Box::new(ui.clone()), Box::new(bt.clone()));
        Fixture { ui, bt, manager }
    }

    fn await_command(
        proxy: &CommandProxy,
        command: Command,
    ) -> (Rc<RefCell<Option<ResponseCode>>>, Task<()>) {
        let observed = Rc::new(RefCell::new(None));
        let task = Task::new({
            let proxy = proxy.clone();
            let observed = observed.clone();
            async move {
                *observed.borrow_mut() = Some(proxy.command(command).await);
            }
        });
        task.run(&ExecutorHandle::inline(), None);
        (observed, task)
    }

    #[test]
    fn test_forwards_command_and_response() {
        let fx = fixture();
        let proxy = fx.manager.proxy();

        let (observed, _task) = await_command(&proxy, Command::EnableBluetooth);
        let (command, id) = fx.bt.pop().expect("command reached the invoker");
        assert_eq!(command.name(), "EnableBluetooth");
        assert_eq!(id, command.base_id());
        assert!(observed.borrow().is_none());

        fx.manager.submit_response(id, ResponseCode::Ok.as_raw());
        assert_eq!(*observed.borrow(), Some(ResponseCode::Ok));
    }

    #[test]
    fn test_routes_by_channel() {
        let fx = fixture();
        let proxy = fx.manager.proxy();

        proxy.fire_and_forget(Command::NegotiationStart);
        proxy.fire_and_forget(Command::ResetConnections);

        assert_eq!(fx.ui.pop().unwrap().0.name(), "NegotiationStart");
        assert_eq!(fx.bt.pop().unwrap().0.name(), "ResetConnections");
    }

    #[test]
    fn test_forwards_responses_out_of_order() {
        let fx = fixture();
        let proxy = fx.manager.proxy();

        let (first, _first_task) = await_command(&proxy, Command::EnableBluetooth);
        let (second, _second_task) = await_command(&proxy, Command::EnableBluetooth);
        let (_, first_id) = fx.bt.pop().unwrap();
        let (_, second_id) = fx.bt.pop().unwrap();
        assert_eq!(second_id, first_id + 1);

        fx.manager
            .submit_response(second_id, ResponseCode::UserDeclined.as_raw());
        assert_eq!(*second.borrow(), Some(ResponseCode::UserDeclined));
        assert!(first.borrow().is_none());

        fx.manager.submit_response(first_id, ResponseCode::Ok.as_raw());
        assert_eq!(*first.borrow(), Some(ResponseCode::Ok));
    }

    #[test]
    fn test_resolves_pending_awaits_on_shutdown() {
        let fx = fixture();
        let proxy = fx.manager.proxy();

        let (observed, _task) = await_command(&proxy, Command::EnableBluetooth);
        assert!(observed.borrow().is_none());

        drop(fx.manager);
        assert_eq!(*observed.borrow(), Some(ResponseCode::InteropFailure));
    }

    #[test]
    fn test_overflow_fails_synchronously_without_invoking() {
        let fx = fixture();
        let proxy = fx.manager.proxy();

        for _ in 0..ID_SPAN {
            proxy.fire_and_forget(Command::EnableBluetooth);
        }
        let invocations_before = fx.bt.invocations.get();

        let (observed, _task) = await_command(&proxy, Command::EnableBluetooth);
        assert_eq!(*observed.borrow(), Some(ResponseCode::InteropFailure));
        assert_eq!(fx.bt.invocations.get(), invocations_before);
    }

    #[test]
    fn test_increments_id_for_non_awaited_commands() {
        let fx = fixture();
        let proxy = fx.manager.proxy();

        proxy.fire_and_forget(Command::EnableBluetooth);
        proxy.fire_and_forget(Command::EnableBluetooth);

        let base = Command::EnableBluetooth.base_id();
        assert_eq!(fx.bt.pop().unwrap().1, base);
        assert_eq!(fx.bt.pop().unwrap().1, base + 1);
    }

    #[test]
    fn test_does_not_consume_id_on_invoker_refusal() {
        let fx = fixture();
        let proxy = fx.manager.proxy();
        let base = Command::EnableBluetooth.base_id();

        fx.bt.refuse.set(true);
        let (observed, _task) = await_command(&proxy, Command::EnableBluetooth);
        assert_eq!(*observed.borrow(), Some(ResponseCode::InteropFailure));

        fx.bt.refuse.set(false);
        proxy.fire_and_forget(Command::EnableBluetooth);
        assert_eq!(fx.bt.pop().unwrap().1, base);
    }

    #[test]
    fn test_orphaned_response_erases_the_entry() {
        let fx = fixture();
        let proxy = fx.manager.proxy();
        let base = Command::EnableBluetooth.base_id();

        proxy.fire_and_forget(Command::EnableBluetooth);
        let (_, id) = fx.bt.pop().unwrap();
        fx.manager.submit_response(id, ResponseCode::Ok.as_raw());

        // The id is free again.
        proxy.fire_and_forget(Command::EnableBluetooth);
        assert_eq!(fx.bt.pop().unwrap().1, base);
    }

    #[test]
    fn test_late_response_is_ignored() {
        let fx = fixture();
        fx.manager.submit_response(12345, ResponseCode::Ok.as_raw());
    }
}
