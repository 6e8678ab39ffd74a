//! Shared context handed to every state
//!
//! The context is a bundle of cheaply cloneable handles: the external
//! collaborators (roll engine, wire codec, timer, command proxy), the
//! executor, the configuration and the negotiation round counter. It holds
//! the state slot only weakly, so a state reaching back through its context
//! never keeps the controller alive.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use veridie_core::dice::Engine;
use veridie_core::protocol::MessageCodec;
use veridie_core::Config;

use crate::executor::ExecutorHandle;
use crate::fsm::State;
use crate::manager::CommandProxy;
use crate::timer::Timer;

#[derive(Clone)]
pub(crate) struct Context {
    pub engine: Rc<RefCell<dyn Engine>>,
    pub codec: Rc<dyn MessageCodec>,
    pub timer: Rc<Timer>,
    pub proxy: CommandProxy,
    pub executor: ExecutorHandle,
    pub config: Rc<Config>,
    /// Monotonically increasing negotiation round, shared across states
    pub round: Rc<Cell<u32>>,
    pub(crate) state: Weak<RefCell<Option<State>>>,
}
