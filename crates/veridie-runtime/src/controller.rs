//! Controller: the host-facing entry point
//!
//! The host drives the core through exactly three calls, all on the single
//! executor thread: `start` wires the command manager and enters Idle,
//! `on_event` feeds an inbound event to the current state, and
//! `on_command_response` routes a command response back to the awaiting
//! task. Background-task errors are surfaced and logged at the top of every
//! event dispatch, before the state sees the event.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use tracing::{error, info};

use veridie_core::dice::Engine;
use veridie_core::protocol::MessageCodec;
use veridie_core::{Config, Event, VeridieError};

use crate::executor::ExecutorHandle;
use crate::fsm::{switch_to_idle, Context, StateHolder, StateKind};
use crate::manager::{CommandManager, ExternalInvoker};
use crate::timer::Timer;

pub struct Controller {
    engine: Rc<RefCell<dyn Engine>>,
    codec: Rc<dyn MessageCodec>,
    timer: Rc<Timer>,
    executor: ExecutorHandle,
    config: Rc<Config>,
    round: Rc<Cell<u32>>,
    state: StateHolder,
    manager: Option<CommandManager>,
}

impl Controller {
    pub fn new(
        engine: Rc<RefCell<dyn Engine>>,
        timer: Timer,
        codec: Rc<dyn MessageCodec>,
        config: Config,
        executor: ExecutorHandle,
    ) -> Result<Self, VeridieError> {
        config.validate()?;
        Ok(Self {
            engine,
            codec,
            timer: Rc::new(timer),
            executor,
            config: Rc::new(config),
            round: Rc::new(Cell::new(0)),
            state: Rc::new(RefCell::new(None)),
            manager: None,
        })
    }

    /// Wire the outbound sinks and enter Idle; a second call is a no-op
    pub fn start(&mut self, ui: Box<dyn ExternalInvoker>, bt: Box<dyn ExternalInvoker>) {
        if self.manager.is_some() {
            return;
        }
        let manager = CommandManager::new(ui, bt);
        let ctx = Context {
            engine: self.engine.clone(),
            codec: self.codec.clone(),
            timer: self.timer.clone(),
            proxy: manager.proxy(),
            executor: self.executor.clone(),
            config: self.config.clone(),
            round: self.round.clone(),
            state: Rc::downgrade(&self.state),
        };
        self.manager = Some(manager);
        switch_to_idle(&ctx, false);
    }

    /// Feed an inbound event to the current state
    pub fn on_event(&self, event_id: i32, args: &[String]) {
        let Some(name) = veridie_core::event::name(event_id) else {
            error!("event handler not found, id = {event_id}");
            return;
        };
        let mut rendered = String::new();
        for arg in args {
            rendered.push_str(" [");
            rendered.push_str(arg);
            rendered.push(']');
        }
        info!("<<<<< {name}{rendered}");

        let mut slot = self.state.borrow_mut();
        let Some(state) = slot.as_mut() else {
            error!("no active state for {name}");
            return;
        };
        if let Some(err) = state.take_error() {
            error!("background task failed: {err}");
        }
        match Event::parse(event_id, args) {
            Ok(event) => state.handle(event),
            Err(err) => error!("could not parse event args: {err}"),
        }
    }

    /// Route a command response to the awaiting task
    pub fn on_command_response(&self, cmd_id: i32, response: i64) {
        let Some(manager) = &self.manager else {
            error!("no command manager to accept a response");
            return;
        };
        manager.submit_response(cmd_id, response);
    }

    /// Lifecycle phase currently active; `None` is Terminal (or not started)
    pub fn state_kind(&self) -> Option<StateKind> {
        self.state.borrow().as_ref().map(|state| state.kind())
    }

    /// Current negotiation round
    pub fn negotiation_round(&self) -> u32 {
        self.round.get()
    }

    /// Override the negotiation round counter (useful in tests)
    pub fn set_negotiation_round(&self, round: u32) {
        self.round.set(round);
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        // The state must die before the command manager: resuming pending
        // commands during manager shutdown may only reach canceled tasks.
        let state = self.state.borrow_mut().take();
        drop(state);
    }
}
