//! Finite-state machine over the peer-group lifecycle
//!
//! Exactly zero or one state object exists at a time, reachable through the
//! controller's state holder. Transitions are posted as detached tasks that
//! first await a zero-delay timer hop, so the outgoing state's destructor
//! never runs underneath one of its own methods; clearing the holder cancels
//! every task the outgoing state owns.

mod connecting;
mod context;
mod idle;
mod negotiating;
mod playing;

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;
use std::time::Duration;

use veridie_core::{Event, Peer, VeridieError};

pub(crate) use context::Context;

pub(crate) use connecting::StateConnecting;
pub(crate) use idle::StateIdle;
pub(crate) use negotiating::StateNegotiating;
pub(crate) use playing::StatePlaying;

use crate::task::detach;

/// Text of the unrecoverable-failure dialog
pub(crate) const FATAL_FAILURE_TEXT: &str = "Cannot proceed due to a fatal failure.";

// ----------------------------------------------------------------------------
// State Holder
// ----------------------------------------------------------------------------

/// Discriminant of the current lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateKind {
    Idle,
    Connecting,
    Negotiating,
    Playing,
}

/// The current state object
pub(crate) enum State {
    Idle(StateIdle),
    Connecting(StateConnecting),
    Negotiating(StateNegotiating),
    Playing(StatePlaying),
}

/// Shared slot holding the current state; `None` is the terminal phase
pub(crate) type StateHolder = Rc<RefCell<Option<State>>>;

impl State {
    pub(crate) fn kind(&self) -> StateKind {
        match self {
            State::Idle(_) => StateKind::Idle,
            State::Connecting(_) => StateKind::Connecting,
            State::Negotiating(_) => StateKind::Negotiating,
            State::Playing(_) => StateKind::Playing,
        }
    }

    /// Dispatch an inbound event to the current state
    pub(crate) fn handle(&mut self, event: Event) {
        match self {
            State::Idle(state) => state.handle(event),
            State::Connecting(state) => state.handle(event),
            State::Negotiating(state) => state.handle(event),
            State::Playing(state) => state.handle(event),
        }
    }

    /// Surface the first stored error of this state's background tasks
    pub(crate) fn take_error(&self) -> Option<VeridieError> {
        match self {
            State::Idle(state) => state.take_error(),
            State::Connecting(state) => state.take_error(),
            State::Negotiating(state) => state.take_error(),
            State::Playing(state) => state.take_error(),
        }
    }
}

// ----------------------------------------------------------------------------
// Transitions
// ----------------------------------------------------------------------------

fn switch(ctx: &Context, target: StateKind, build: impl FnOnce(&Context) -> State + 'static) {
    let ctx = ctx.clone();
    detach(async move {
        ctx.timer.wait_for(Duration::ZERO).await;
        let Some(holder) = ctx.state.upgrade() else {
            return;
        };
        if holder
            .borrow()
            .as_ref()
            .is_some_and(|state| state.kind() == target)
        {
            return;
        }
        // Destroy the outgoing state first; its owned tasks are canceled
        // before the new state exists.
        let previous = holder.borrow_mut().take();
        drop(previous);
        let next = build(&ctx);
        *holder.borrow_mut() = Some(next);
    });
}

pub(crate) fn switch_to_idle(ctx: &Context, start_new_game: bool) {
    switch(ctx, StateKind::Idle, move |ctx| {
        State::Idle(StateIdle::new(ctx, start_new_game))
    });
}

pub(crate) fn switch_to_connecting(ctx: &Context) {
    switch(ctx, StateKind::Connecting, |ctx| {
        State::Connecting(StateConnecting::new(ctx))
    });
}

pub(crate) fn switch_to_negotiating(
    ctx: &Context,
    peers: HashSet<Peer>,
    local_mac: String,
    trigger: Option<(Peer, String)>,
) {
    switch(ctx, StateKind::Negotiating, move |ctx| {
        State::Negotiating(StateNegotiating::new(ctx, peers, local_mac, trigger))
    });
}

pub(crate) fn switch_to_playing(
    ctx: &Context,
    peers: HashSet<Peer>,
    local_mac: String,
    generator_mac: String,
) {
    switch(ctx, StateKind::Playing, move |ctx| {
        State::Playing(StatePlaying::new(ctx, peers, local_mac, generator_mac))
    });
}

/// Clear the state holder for good; only process restart leaves Terminal
pub(crate) fn switch_to_terminal(ctx: &Context) {
    let ctx = ctx.clone();
    detach(async move {
        ctx.timer.wait_for(Duration::ZERO).await;
        if let Some(holder) = ctx.state.upgrade() {
            let previous = holder.borrow_mut().take();
            drop(previous);
        }
    });
}
