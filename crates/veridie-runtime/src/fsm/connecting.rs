//! Connecting state
//!
//! Brings up discovery and listening, greets every peer with a hello that
//! tells it its own address, and keeps polling for the local address until
//! negotiation can start. Both discovery and listening failing for good is
//! fatal.

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use tracing::{error, info};

use veridie_core::protocol::{Hello, Message};
use veridie_core::{Command, Event, Peer, ResponseCode, VeridieError};

use crate::fsm::{
    switch_to_idle, switch_to_negotiating, switch_to_terminal, Context, FATAL_FAILURE_TEXT,
};
use crate::task::{Task, TaskOwner, TaskResult, WeakTaskOwner};

pub(crate) struct StateConnecting {
    ctx: Context,
    owner: TaskOwner,
    data: Rc<RefCell<ConnectingData>>,
    negotiation_kickoff: Option<Task<TaskResult>>,
}

#[derive(Default)]
struct ConnectingData {
    /// `None` until the first StartDiscovery outcome settles
    discovering: Option<bool>,
    /// `None` until the first StartListening outcome settles
    listening: Option<bool>,
    local_mac: Option<String>,
    peers: HashSet<Peer>,
}

impl StateConnecting {
    pub(crate) fn new(ctx: &Context) -> Self {
        info!("New state: StateConnecting");
        let owner = TaskOwner::new(ctx.executor.clone());
        let data = Rc::new(RefCell::new(ConnectingData::default()));

        owner.start_root(Task::new(kick_off_discovery(ctx.clone(), data.clone())));
        owner.start_root(Task::new(kick_off_listening(ctx.clone(), data.clone())));

        Self {
            ctx: ctx.clone(),
            owner,
            data,
            negotiation_kickoff: None,
        }
    }

    pub(crate) fn handle(&mut self, event: Event) {
        match event {
            Event::BluetoothOff => switch_to_idle(&self.ctx, true),
            Event::RemoteDeviceConnected { peer } => self.on_device_connected(peer),
            Event::RemoteDeviceDisconnected { peer } => {
                self.data.borrow_mut().peers.remove(&peer);
            }
            Event::MessageReceived { sender, message } => {
                self.on_message_received(sender, &message);
            }
            Event::ConnectivityEstablished => self.on_connectivity_established(),
            Event::GameStopped => {
                self.ctx.proxy.fire_and_forget(Command::ResetConnections);
                switch_to_idle(&self.ctx, false);
            }
            Event::SocketReadFailed { peer } => self.on_socket_read_failure(&peer),
            _ => {}
        }
    }

    pub(crate) fn take_error(&self) -> Option<VeridieError> {
        self.owner
            .take_error()
            .or_else(|| self.negotiation_kickoff.as_ref().and_then(Task::take_error))
    }

    fn on_device_connected(&mut self, peer: Peer) {
        let addr = peer.addr.clone();
        self.data.borrow_mut().peers.insert(peer);
        self.owner.start_root(Task::new(send_hello(
            self.ctx.clone(),
            self.data.clone(),
            self.owner.downgrade(),
            addr,
        )));
    }

    fn on_message_received(&mut self, sender: Peer, message: &str) {
        if !self.data.borrow().peers.contains(&sender) {
            self.on_device_connected(sender);
        }
        if self.data.borrow().local_mac.is_some() {
            return;
        }
        match self.ctx.codec.decode(message) {
            Ok(Message::Hello(Hello { mac })) => {
                self.data.borrow_mut().local_mac = Some(mac);
            }
            Ok(other) => {
                error!("expected a hello, received {other:?}");
            }
            Err(e) => {
                error!("failed to decode message: {e}");
            }
        }
    }

    fn on_connectivity_established(&mut self) {
        if self
            .negotiation_kickoff
            .as_ref()
            .is_some_and(Task::is_active)
        {
            return;
        }
        let task = Task::new(attempt_negotiation_start(
            self.ctx.clone(),
            self.data.clone(),
        ));
        task.run(&self.ctx.executor, None);
        self.negotiation_kickoff = Some(task);
    }

    fn on_socket_read_failure(&mut self, peer: &Peer) {
        if self.data.borrow_mut().peers.take(peer).is_some() {
            self.owner.start_root(Task::new(disconnect_device(
                self.ctx.clone(),
                peer.addr.clone(),
            )));
        }
    }
}

impl Drop for StateConnecting {
    fn drop(&mut self) {
        let data = self.data.borrow();
        if data.discovering.unwrap_or(false) {
            self.ctx.proxy.fire_and_forget(Command::StopDiscovery);
        }
        if data.listening.unwrap_or(false) {
            self.ctx.proxy.fire_and_forget(Command::StopListening);
        }
    }
}

// ----------------------------------------------------------------------------
// Background Tasks
// ----------------------------------------------------------------------------

fn detect_fatal_failure(ctx: &Context, data: &Rc<RefCell<ConnectingData>>) {
    let stuck = {
        let data = data.borrow();
        data.listening == Some(false) && data.discovering == Some(false)
    };
    if stuck {
        ctx.proxy.fire_and_forget(Command::ShowAndExit {
            text: FATAL_FAILURE_TEXT.to_string(),
        });
        switch_to_terminal(ctx);
    }
}

async fn kick_off_discovery(ctx: Context, data: Rc<RefCell<ConnectingData>>) -> TaskResult {
    let mut response;
    let mut retries_left = ctx.config.max_discovery_retries;
    loop {
        response = ctx
            .proxy
            .command(Command::StartDiscovery {
                uuid: ctx.config.service_uuid.to_string(),
                name: ctx.config.service_name.clone(),
                include_paired: true,
            })
            .await;

        match response {
            ResponseCode::Ok => {
                data.borrow_mut().discovering = Some(true);
            }
            ResponseCode::BluetoothOff => {
                switch_to_idle(&ctx, true);
            }
            ResponseCode::InvalidState => {
                ctx.timer.wait_for(ctx.config.retry_backoff).await;
            }
            _ => {
                data.borrow_mut().discovering = Some(false);
            }
        }

        if retries_left == 0 || response != ResponseCode::InvalidState {
            break;
        }
        retries_left -= 1;
    }

    if response == ResponseCode::InvalidState {
        data.borrow_mut().discovering = Some(false);
        detect_fatal_failure(&ctx, &data);
    }
    Ok(())
}

async fn kick_off_listening(ctx: Context, data: Rc<RefCell<ConnectingData>>) -> TaskResult {
    let mut retries_left = ctx.config.max_listening_retries;
    loop {
        let response = ctx
            .proxy
            .command(Command::StartListening {
                uuid: ctx.config.service_uuid.to_string(),
                name: ctx.config.service_name.clone(),
                duration_secs: ctx.config.discoverability_secs(),
            })
            .await;

        match response {
            ResponseCode::Ok => {
                data.borrow_mut().listening = Some(true);
                return Ok(());
            }
            ResponseCode::BluetoothOff => {
                switch_to_idle(&ctx, true);
                return Ok(());
            }
            ResponseCode::UserDeclined => {
                data.borrow_mut().listening = Some(false);
                detect_fatal_failure(&ctx, &data);
                return Ok(());
            }
            _ => {
                ctx.timer.wait_for(ctx.config.retry_backoff).await;
            }
        }

        if retries_left == 0 {
            break;
        }
        retries_left -= 1;
    }

    data.borrow_mut().listening = Some(false);
    detect_fatal_failure(&ctx, &data);
    Ok(())
}

async fn send_hello(
    ctx: Context,
    data: Rc<RefCell<ConnectingData>>,
    owner: WeakTaskOwner,
    mac: String,
) -> TaskResult {
    let hello = ctx.codec.encode(&Message::Hello(Hello { mac: mac.clone() }));
    let mut retries_left = ctx.config.max_send_retries;

    loop {
        if !data.borrow().peers.contains(mac.as_str()) {
            return Ok(());
        }

        let response = ctx
            .proxy
            .command(Command::SendMessage {
                message: hello.clone(),
                addr: mac.clone(),
            })
            .await;

        match response {
            ResponseCode::ConnectionNotFound => {
                data.borrow_mut().peers.remove(mac.as_str());
            }
            ResponseCode::SocketError => {
                data.borrow_mut().peers.remove(mac.as_str());
                owner
                    .start_nested(Task::new(disconnect_device(ctx.clone(), mac.clone())))
                    .await;
            }
            _ => {}
        }

        retries_left -= 1;
        if retries_left == 0 || response != ResponseCode::InvalidState {
            return Ok(());
        }
    }
}

/// Close a lost connection, retrying `INVALID_STATE` indefinitely
async fn disconnect_device(ctx: Context, mac: String) -> TaskResult {
    loop {
        let response = ctx
            .proxy
            .command(Command::CloseConnection {
                error: String::new(),
                addr: mac.clone(),
            })
            .await;
        if response != ResponseCode::InvalidState {
            return Ok(());
        }
    }
}

async fn attempt_negotiation_start(ctx: Context, data: Rc<RefCell<ConnectingData>>) -> TaskResult {
    let mut retries_left = ctx.config.max_game_start_retries;
    loop {
        let ready = data.borrow().local_mac.is_some();
        if ready {
            let (peers, local_mac) = {
                let mut data = data.borrow_mut();
                let peers = std::mem::take(&mut data.peers);
                let local_mac = data.local_mac.take().unwrap_or_default();
                (peers, local_mac)
            };
            switch_to_negotiating(&ctx, peers, local_mac, None);
            return Ok(());
        }

        if retries_left % 3 == 0 {
            ctx.proxy.fire_and_forget(Command::ShowToast {
                text: "Getting ready...".to_string(),
                duration_secs: 3,
            });
        }
        ctx.timer.wait_for(ctx.config.retry_backoff).await;

        retries_left -= 1;
        if retries_left == 0 {
            break;
        }
    }

    ctx.proxy.fire_and_forget(Command::ResetGame);
    ctx.proxy.fire_and_forget(Command::ResetConnections);
    switch_to_idle(&ctx, false);
    Ok(())
}
