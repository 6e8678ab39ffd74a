//! Idle state
//!
//! Waits for the radio to come up. A background task nags the host with
//! `EnableBluetooth` until it succeeds, the user declines, or the device
//! turns out to have no adapter at all; the latter is fatal.

use std::cell::Cell;
use std::rc::Rc;

use tracing::info;

use veridie_core::{Command, Event, ResponseCode, VeridieError};

use crate::fsm::{switch_to_connecting, switch_to_terminal, Context, FATAL_FAILURE_TEXT};
use crate::task::{Task, TaskResult};

pub(crate) struct StateIdle {
    ctx: Context,
    data: Rc<IdleData>,
    enable_bt_task: Option<Task<TaskResult>>,
}

#[derive(Default)]
struct IdleData {
    new_game_pending: Cell<bool>,
    bluetooth_on: Cell<bool>,
}

impl StateIdle {
    pub(crate) fn new(ctx: &Context, start_new_game: bool) -> Self {
        info!("New state: StateIdle");
        let mut state = Self {
            ctx: ctx.clone(),
            data: Rc::new(IdleData::default()),
            enable_bt_task: None,
        };
        state.spawn_enable_bluetooth();
        if start_new_game {
            state.on_new_game();
        }
        state
    }

    pub(crate) fn handle(&mut self, event: Event) {
        match event {
            Event::BluetoothOn => self.on_bluetooth_on(),
            Event::BluetoothOff => self.on_bluetooth_off(),
            Event::NewGameRequested => self.on_new_game(),
            _ => {}
        }
    }

    pub(crate) fn take_error(&self) -> Option<VeridieError> {
        self.enable_bt_task.as_ref().and_then(Task::take_error)
    }

    fn on_bluetooth_on(&mut self) {
        self.data.bluetooth_on.set(true);
        self.enable_bt_task = None;
        if self.data.new_game_pending.get() {
            switch_to_connecting(&self.ctx);
        }
    }

    fn on_bluetooth_off(&mut self) {
        self.data.bluetooth_on.set(false);
        if !self.enable_task_active() {
            self.spawn_enable_bluetooth();
        }
    }

    fn on_new_game(&mut self) {
        self.data.new_game_pending.set(true);
        if self.data.bluetooth_on.get() {
            switch_to_connecting(&self.ctx);
        } else if !self.enable_task_active() {
            self.spawn_enable_bluetooth();
        }
    }

    fn enable_task_active(&self) -> bool {
        self.enable_bt_task
            .as_ref()
            .is_some_and(Task::is_active)
    }

    fn spawn_enable_bluetooth(&mut self) {
        let task = Task::new(request_bluetooth_on(self.ctx.clone(), self.data.clone()));
        task.run(&self.ctx.executor, None);
        self.enable_bt_task = Some(task);
    }
}

async fn request_bluetooth_on(ctx: Context, data: Rc<IdleData>) -> TaskResult {
    while !data.bluetooth_on.get() {
        let response = ctx.proxy.command(Command::EnableBluetooth).await;
        match response {
            ResponseCode::Ok => {
                if data.new_game_pending.get() {
                    switch_to_connecting(&ctx);
                }
                data.bluetooth_on.set(true);
            }
            ResponseCode::NoBtAdapter => {
                ctx.proxy.fire_and_forget(Command::ShowAndExit {
                    text: FATAL_FAILURE_TEXT.to_string(),
                });
                switch_to_terminal(&ctx);
                return Ok(());
            }
            ResponseCode::UserDeclined => return Ok(()),
            _ => {
                ctx.timer.wait_for(ctx.config.retry_backoff).await;
            }
        }
    }
    Ok(())
}
