//! Playing state
//!
//! Exactly one participant is the generator. A local generator serves every
//! request straight from the roll engine and broadcasts both request and
//! response; everyone else forwards requests to the remote generator and
//! waits. One manager per peer handles connection errors, retries and
//! queueing, and pulls the state back into negotiation when the generator
//! becomes unreachable.
//!
//! Peer managers re-enter the shared playing data through a weak reference
//! only; the data owns the managers, never the other way around.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::{Rc, Weak};

use tracing::{error, info};

use veridie_core::command::{LONG_MESSAGE_LIMIT, SHORT_MESSAGE_LIMIT};
use veridie_core::dice::success_count;
use veridie_core::protocol::{Message, Request, Response};
use veridie_core::{Command, Event, Peer, ResponseCode, VeridieError};

use crate::fsm::{switch_to_idle, switch_to_negotiating, Context};
use crate::task::{Task, TaskOwner, TaskResult, WeakTaskOwner};
use crate::timer::Timeout;

pub(crate) struct StatePlaying {
    ctx: Context,
    owner: TaskOwner,
    data: Rc<RefCell<PlayingData>>,
    /// Done once inbound offers may trigger renegotiation again
    ignore_offers: Task<Timeout>,
}

struct PlayingData {
    local_mac: String,
    local_generator: bool,
    pending_request: Option<Request>,
    managers: HashMap<String, PeerManager>,
    response_count: u32,
}

impl StatePlaying {
    pub(crate) fn new(
        ctx: &Context,
        peers: HashSet<Peer>,
        local_mac: String,
        generator_mac: String,
    ) -> Self {
        info!("New state: StatePlaying");

        let local_generator = local_mac == generator_mac;
        let ignore_offers = Task::new({
            let ctx = ctx.clone();
            async move { ctx.timer.wait_for(ctx.config.ignore_offers_duration).await }
        });
        ignore_offers.run(&ctx.executor, None);

        let managers = peers
            .into_iter()
            .map(|peer| {
                let is_generator = !local_generator && peer.addr == generator_mac;
                (
                    peer.addr.clone(),
                    PeerManager::new(ctx.clone(), peer, is_generator),
                )
            })
            .collect();

        Self {
            ctx: ctx.clone(),
            owner: TaskOwner::new(ctx.executor.clone()),
            data: Rc::new(RefCell::new(PlayingData {
                local_mac,
                local_generator,
                pending_request: None,
                managers,
                response_count: 0,
            })),
            ignore_offers,
        }
    }

    pub(crate) fn handle(&mut self, event: Event) {
        match event {
            Event::BluetoothOff | Event::GameStopped => {
                self.ctx.proxy.fire_and_forget(Command::ResetConnections);
                self.ctx.proxy.fire_and_forget(Command::ResetGame);
                switch_to_idle(&self.ctx, false);
            }
            Event::RemoteDeviceConnected { peer } => {
                if let Some(manager) = self.data.borrow_mut().managers.get_mut(&peer.addr) {
                    manager.on_reception_success(true);
                }
            }
            Event::MessageReceived { sender, message } => {
                self.on_message_received(sender, message);
            }
            Event::CastRequestIssued { request } => self.on_cast_request(request),
            Event::SocketReadFailed { peer } => {
                let generator_lost = self
                    .data
                    .borrow_mut()
                    .managers
                    .get_mut(&peer.addr)
                    .map(PeerManager::on_reception_failure);
                if generator_lost == Some(true) {
                    renegotiate(&self.ctx, &self.data, None);
                }
            }
            _ => {}
        }
    }

    pub(crate) fn take_error(&self) -> Option<VeridieError> {
        self.owner.take_error()
    }

    fn on_message_received(&mut self, sender: Peer, message: String) {
        if !self.data.borrow().managers.contains_key(&sender.addr) {
            return;
        }
        let weak = Rc::downgrade(&self.data);

        match self.ctx.codec.decode(&message) {
            Ok(Message::Offer(_)) => {
                {
                    let mut data = self.data.borrow_mut();
                    let answered = data.pending_request.is_none();
                    if let Some(manager) = data.managers.get_mut(&sender.addr) {
                        manager.on_reception_success(answered);
                    }
                }
                if !self.ignore_offers.is_active() {
                    renegotiate(&self.ctx, &self.data, Some((sender, message)));
                }
            }
            Ok(Message::Response(response)) => {
                let from = {
                    let mut data = self.data.borrow_mut();
                    if !data
                        .managers
                        .get(&sender.addr)
                        .is_some_and(PeerManager::is_generator)
                    {
                        return;
                    }
                    if matches_pending(&response, data.pending_request.as_ref()) {
                        data.pending_request = None;
                    }
                    let answered = data.pending_request.is_none();
                    let Some(manager) = data.managers.get_mut(&sender.addr) else {
                        return;
                    };
                    manager.on_reception_success(answered);
                    manager.peer.name.clone()
                };
                self.owner.start_root(Task::new(show_response(
                    self.ctx.clone(),
                    weak,
                    response,
                    from,
                )));
            }
            Ok(Message::Request(request)) => {
                let (from, local_generator) = {
                    let mut data = self.data.borrow_mut();
                    let answered = data.pending_request.is_none();
                    let local_generator = data.local_generator;
                    let Some(manager) = data.managers.get_mut(&sender.addr) else {
                        return;
                    };
                    manager.on_reception_success(answered);
                    (manager.peer.name.clone(), local_generator)
                };
                self.owner.start_root(Task::new(show_request(
                    self.ctx.clone(),
                    weak.clone(),
                    request.clone(),
                    from,
                )));
                if local_generator {
                    self.serve_locally(request);
                }
            }
            Ok(Message::Hello(_)) => {}
            Err(e) => {
                error!("failed to decode message: {e}");
            }
        }
    }

    fn on_cast_request(&mut self, request: Request) {
        let weak = Rc::downgrade(&self.data);
        self.owner.start_root(Task::new(show_request(
            self.ctx.clone(),
            weak.clone(),
            request.clone(),
            "You".to_string(),
        )));

        let encoded = self.ctx.codec.encode(&Message::Request(request.clone()));
        {
            let mut data = self.data.borrow_mut();
            for manager in data.managers.values_mut() {
                manager.send_request(&weak, encoded.clone());
            }
        }

        if self.data.borrow().local_generator {
            self.serve_locally(request);
        } else {
            self.data.borrow_mut().pending_request = Some(request);
        }
    }

    /// Local generator path: roll, broadcast and display the response
    fn serve_locally(&mut self, request: Request) {
        let weak = Rc::downgrade(&self.data);
        let response = generate_response(&self.ctx, request);
        let encoded = self.ctx.codec.encode(&Message::Response(response.clone()));
        {
            let mut data = self.data.borrow_mut();
            for manager in data.managers.values_mut() {
                manager.send_response(&weak, encoded.clone());
            }
        }
        self.owner.start_root(Task::new(show_response(
            self.ctx.clone(),
            weak,
            response,
            "You".to_string(),
        )));
    }
}

// ----------------------------------------------------------------------------
// Helpers
// ----------------------------------------------------------------------------

fn matches_pending(response: &Response, request: Option<&Request>) -> bool {
    let Some(request) = request else {
        return false;
    };
    response.cast.die() == request.cast.die()
        && response.cast.len() == request.cast.len()
        && response.success_count.is_some() == request.threshold.is_some()
}

fn generate_response(ctx: &Context, request: Request) -> Response {
    let Request {
        mut cast,
        threshold,
    } = request;
    ctx.engine.borrow_mut().fill(&mut cast);
    let count = threshold.map(|threshold| success_count(&cast, threshold));
    Response {
        cast,
        success_count: count,
    }
}

/// Collect the still-connected peers and fall back to negotiation,
/// optionally carrying the offer that caused the trigger
fn renegotiate(ctx: &Context, data: &Rc<RefCell<PlayingData>>, trigger: Option<(Peer, String)>) {
    let (peers, local_mac) = {
        let mut data = data.borrow_mut();
        let peers: HashSet<Peer> = data
            .managers
            .values()
            .filter(|manager| manager.connected)
            .map(|manager| manager.peer.clone())
            .collect();
        if trigger.is_some() {
            // Dropping a manager whose peer is unreachable issues the
            // CloseConnection for it.
            data.managers.clear();
        }
        (peers, data.local_mac.clone())
    };
    switch_to_negotiating(ctx, peers, local_mac, trigger);
}

/// Same effect as a GameStopped event
fn stop_game(ctx: &Context) {
    ctx.proxy.fire_and_forget(Command::ResetConnections);
    ctx.proxy.fire_and_forget(Command::ResetGame);
    switch_to_idle(ctx, false);
}

async fn show_request(
    ctx: Context,
    _data: Weak<RefCell<PlayingData>>,
    request: Request,
    from: String,
) -> TaskResult {
    let response = ctx
        .proxy
        .command(Command::ShowRequest {
            die: request.cast.die(),
            size: request.cast.len() as u32,
            threshold: request.threshold.unwrap_or(0),
            from,
        })
        .await;
    if response != ResponseCode::Ok {
        stop_game(&ctx);
    }
    Ok(())
}

async fn show_response(
    ctx: Context,
    data: Weak<RefCell<PlayingData>>,
    response: Response,
    from: String,
) -> TaskResult {
    let size = response.cast.len();
    if size > LONG_MESSAGE_LIMIT / 3 {
        ctx.proxy.fire_and_forget(Command::ShowToast {
            text: "Request is too big, cannot proceed".to_string(),
            duration_secs: 7,
        });
        return Ok(());
    }

    let success_count = response.success_count.map_or(-1, |count| count as i32);
    let command = if size <= SHORT_MESSAGE_LIMIT / 3 {
        Command::ShowResponse {
            cast: response.cast,
            success_count,
            from,
        }
    } else {
        Command::ShowLongResponse {
            cast: response.cast,
            success_count,
            from,
        }
    };

    let code = ctx.proxy.command(command).await;
    if code != ResponseCode::Ok {
        stop_game(&ctx);
        return Ok(());
    }

    let Some(data) = data.upgrade() else {
        return Ok(());
    };
    let rotation_due = {
        let mut data = data.borrow_mut();
        data.response_count += 1;
        data.response_count >= ctx.config.rounds_per_generator
    };
    if rotation_due {
        renegotiate(&ctx, &data, None);
    }
    Ok(())
}

// ----------------------------------------------------------------------------
// Per-Peer Manager
// ----------------------------------------------------------------------------

/// Handles connection errors, retries and buffering for one peer.
/// No new request is issued until the previous one has been answered.
struct PeerManager {
    ctx: Context,
    peer: Peer,
    is_generator: bool,
    connected: bool,
    pending_request: bool,
    queued: Vec<String>,
    owner: TaskOwner,
}

impl PeerManager {
    fn new(ctx: Context, peer: Peer, is_generator: bool) -> Self {
        let owner = TaskOwner::new(ctx.executor.clone());
        Self {
            ctx,
            peer,
            is_generator,
            connected: true,
            pending_request: false,
            queued: Vec::new(),
            owner,
        }
    }

    fn is_generator(&self) -> bool {
        self.is_generator
    }

    fn send_request(&mut self, data: &Weak<RefCell<PlayingData>>, message: String) {
        self.pending_request = true;
        let task = if self.is_generator {
            Task::new(send_request_to_generator(
                self.ctx.clone(),
                data.clone(),
                self.owner.downgrade(),
                self.peer.addr.clone(),
                message,
            ))
        } else {
            Task::new(send(
                self.ctx.clone(),
                data.clone(),
                self.peer.addr.clone(),
                message,
            ))
        };
        self.owner.start_root(task);
    }

    fn send_response(&mut self, data: &Weak<RefCell<PlayingData>>, message: String) {
        self.owner.start_root(Task::new(send(
            self.ctx.clone(),
            data.clone(),
            self.peer.addr.clone(),
            message,
        )));
    }

    fn on_reception_success(&mut self, answered_request: bool) {
        self.connected = true;
        if answered_request {
            self.pending_request = false;
        }
    }

    /// Returns true when the lost peer was the generator and a
    /// renegotiation is due
    fn on_reception_failure(&mut self) -> bool {
        self.connected = false;
        self.is_generator
    }
}

impl Drop for PeerManager {
    fn drop(&mut self) {
        if !self.connected {
            self.ctx.proxy.fire_and_forget(Command::CloseConnection {
                error: "Connection has been lost".to_string(),
                addr: self.peer.addr.clone(),
            });
        }
    }
}

/// Send a message, draining the queue on success; transport-level failures
/// mark the peer disconnected, park the message and, for the generator,
/// trigger renegotiation
async fn send(
    ctx: Context,
    data: Weak<RefCell<PlayingData>>,
    addr: String,
    mut message: String,
) -> TaskResult {
    if message.len() > LONG_MESSAGE_LIMIT {
        ctx.proxy.fire_and_forget(Command::ShowToast {
            text: "Cannot send too long message, try fewer dices".to_string(),
            duration_secs: 7,
        });
        return Ok(());
    }

    let mut retries_left = ctx.config.playing_send_retries;
    loop {
        let command = if message.len() <= SHORT_MESSAGE_LIMIT {
            Command::SendMessage {
                message: message.clone(),
                addr: addr.clone(),
            }
        } else {
            Command::SendLongMessage {
                message: message.clone(),
                addr: addr.clone(),
            }
        };
        let response = ctx.proxy.command(command).await;

        match response {
            ResponseCode::InvalidState | ResponseCode::InteropFailure => {}
            ResponseCode::Ok => {
                let Some(data) = data.upgrade() else {
                    return Ok(());
                };
                let mut data = data.borrow_mut();
                let Some(manager) = data.managers.get_mut(&addr) else {
                    return Ok(());
                };
                manager.connected = true;
                match manager.queued.pop() {
                    None => return Ok(()),
                    Some(next) => {
                        message = next;
                        retries_left = ctx.config.playing_send_retries + 1;
                    }
                }
            }
            _ => {
                let Some(data) = data.upgrade() else {
                    return Ok(());
                };
                let generator_lost = {
                    let mut borrowed = data.borrow_mut();
                    match borrowed.managers.get_mut(&addr) {
                        Some(manager) => {
                            manager.connected = false;
                            manager.queued.push(message);
                            manager.is_generator
                        }
                        None => return Ok(()),
                    }
                };
                if generator_lost {
                    renegotiate(&ctx, &data, None);
                }
                return Ok(());
            }
        }

        retries_left -= 1;
        if retries_left == 0 {
            return Ok(());
        }
    }
}

/// Push a request at the generator, re-sending until it is answered;
/// exhausting the budget triggers renegotiation
async fn send_request_to_generator(
    ctx: Context,
    data: Weak<RefCell<PlayingData>>,
    owner: WeakTaskOwner,
    addr: String,
    message: String,
) -> TaskResult {
    for _attempt in 0..ctx.config.request_attempts {
        owner
            .start_nested(Task::new(send(
                ctx.clone(),
                data.clone(),
                addr.clone(),
                message.clone(),
            )))
            .await;
        ctx.timer.wait_for(ctx.config.retry_backoff).await;

        let Some(data) = data.upgrade() else {
            return Ok(());
        };
        let still_pending = data
            .borrow()
            .managers
            .get(&addr)
            .map(|manager| manager.pending_request);
        match still_pending {
            Some(true) => {}
            _ => return Ok(()),
        }
    }

    if let Some(data) = data.upgrade() {
        renegotiate(&ctx, &data, None);
    }
    Ok(())
}
