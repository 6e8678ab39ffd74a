//! VeriDie Harness
//!
//! Deterministic fakes for driving a real [`Controller`] in tests: recording
//! command sinks for the UI and transport channels, a manually advanced
//! clock backing the timer, and a fixed-value roll engine. Host
//! applications can use the same pieces for their own integration tests.

mod clock;
mod invoker;

pub use clock::TestClock;
pub use invoker::{CommandLog, CommandRecord};

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use veridie_core::dice::{Cast, Engine};
use veridie_core::protocol::XmlCodec;
use veridie_core::{CommandChannel, Config, ResponseCode};
use veridie_runtime::{Controller, ExecutorHandle, Timer};

// ----------------------------------------------------------------------------
// Fixed Engine
// ----------------------------------------------------------------------------

/// Roll engine that fills every slot with one fixed value
pub struct FixedEngine {
    pub value: u32,
}

impl FixedEngine {
    pub fn new(value: u32) -> Self {
        Self { value }
    }
}

impl Engine for FixedEngine {
    fn fill(&mut self, cast: &mut Cast) {
        for slot in cast.values_mut() {
            *slot = self.value;
        }
    }
}

// ----------------------------------------------------------------------------
// Test Rig
// ----------------------------------------------------------------------------

/// A started controller wired to recording sinks and a manual clock
pub struct TestRig {
    pub ui: CommandLog,
    pub bt: CommandLog,
    pub clock: TestClock,
    pub controller: Controller,
}

impl TestRig {
    /// Rig with the roll engine fixed to 3
    pub fn new() -> Self {
        Self::with_engine_value(3)
    }

    pub fn with_engine_value(value: u32) -> Self {
        let ui = CommandLog::new(CommandChannel::Ui);
        let bt = CommandLog::new(CommandChannel::Bt);
        let clock = TestClock::new();
        let timer = Timer::new(clock.scheduler());

        let mut controller = Controller::new(
            Rc::new(RefCell::new(FixedEngine::new(value))),
            timer,
            Rc::new(XmlCodec),
            Config::default(),
            ExecutorHandle::inline(),
        )
        .expect("default config is valid");
        controller.start(ui.invoker(), bt.invoker());
        // Drive the zero-delay hop into Idle.
        clock.fast_forward(Duration::ZERO);

        Self {
            ui,
            bt,
            clock,
            controller,
        }
    }

    /// Deliver a host event
    pub fn event(&self, event_id: i32, args: &[&str]) {
        let args: Vec<String> = args.iter().map(|arg| arg.to_string()).collect();
        self.controller.on_event(event_id, &args);
    }

    /// Deliver a command response
    pub fn respond(&self, id: i32, code: ResponseCode) {
        self.controller.on_command_response(id, code.as_raw());
    }
}

impl Default for TestRig {
    fn default() -> Self {
        Self::new()
    }
}
