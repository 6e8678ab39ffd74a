//! VeriDie Coordination Engine
//!
//! The single-threaded coordination core of the VeriDie peer-to-peer dice
//! application. Devices discover each other over a short-range radio link,
//! elect one device as the authoritative random-number generator, exchange
//! dice-roll requests and responses, and periodically re-elect the
//! generator.
//!
//! ## Architecture Overview
//!
//! Everything runs on one executor thread supplied by the host:
//!
//! - The [`task`] module provides the cooperative task primitive all higher
//!   layers are written in: construction is inert, `run` posts the body
//!   through the executor, dropping a handle cancels at the next
//!   suspension point, and a [`task::TaskOwner`] cancels its whole bag on
//!   drop.
//! - The [`timer`] module resumes suspended tasks through an injected
//!   scheduler.
//! - The [`manager`] module turns the two fire-and-reply outbound channels
//!   (UI and transport) into awaitable request/response pairs keyed by
//!   correlation id.
//! - The `fsm` module drives the lifecycle
//!   (Idle → Connecting → Negotiating → Playing) with retry and backoff on
//!   every external action.
//! - The [`Controller`] ties it all together behind the three host-facing
//!   entry points: `start`, `on_event` and `on_command_response`.
//!
//! ## Host Contract
//!
//! The host may run as many threads as it likes, but every call into the
//! core — events, command responses and timer callbacks — must be
//! marshaled onto the one executor thread, in order.
//!
//! ```rust
//! use std::cell::RefCell;
//! use std::rc::Rc;
//! use veridie_core::dice::UniformEngine;
//! use veridie_core::protocol::XmlCodec;
//! use veridie_core::Config;
//! use veridie_runtime::{Controller, ExecutorHandle, Timer};
//!
//! // The host parks scheduled jobs with its own timer queue and invokes
//! // them on the executor thread when they come due. A continuation must
//! // never be invoked from inside the scheduler callback itself.
//! let timer = Timer::new(|job, delay| {
//!     // host_timer_queue.push(job, delay)
//!     let _ = (job, delay);
//! });
//! let controller = Controller::new(
//!     Rc::new(RefCell::new(UniformEngine::new())),
//!     timer,
//!     Rc::new(XmlCodec),
//!     Config::default(),
//!     ExecutorHandle::inline(),
//! )
//! .unwrap();
//! assert!(controller.state_kind().is_none());
//! ```

pub mod executor;
pub mod manager;
pub mod task;
pub mod timer;

mod controller;
mod fsm;

pub use controller::Controller;
pub use executor::{Execute, ExecutorHandle, InlineExecutor, Job};
pub use fsm::StateKind;
pub use manager::{CommandManager, CommandProxy, ExternalInvoker};
pub use task::{CancelFlag, Task, TaskOwner, TaskResult};
pub use timer::{Timeout, Timer};
