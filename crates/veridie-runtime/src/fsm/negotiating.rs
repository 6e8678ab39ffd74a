//! Negotiating state
//!
//! Round-based generator election. Every participant keeps a map of the
//! latest offer per address (its own included) and repeatedly broadcasts a
//! local offer computed from the highest round seen so far; the candidate
//! address rotates deterministically through the sorted list of all known
//! addresses. The round a participant observes can only grow, so all
//! participants converge on the same (round, address) pair.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashSet};
use std::rc::Rc;

use tracing::{error, info};

use veridie_core::protocol::{Message, Offer};
use veridie_core::{Command, Event, Peer, ResponseCode, VeridieError};

use crate::fsm::{switch_to_idle, switch_to_playing, Context};
use crate::task::{Task, TaskOwner, TaskResult, WeakTaskOwner};

pub(crate) struct StateNegotiating {
    ctx: Context,
    owner: TaskOwner,
    data: Rc<RefCell<NegotiatingData>>,
}

struct NegotiatingData {
    local_mac: String,
    peers: HashSet<Peer>,
    /// Latest offer per address, local node included; sorted by address
    offers: BTreeMap<String, Offer>,
}

impl StateNegotiating {
    pub(crate) fn new(
        ctx: &Context,
        peers: HashSet<Peer>,
        local_mac: String,
        trigger: Option<(Peer, String)>,
    ) -> Self {
        info!("New state: StateNegotiating");

        let mut offers: BTreeMap<String, Offer> = peers
            .iter()
            .map(|peer| {
                (
                    peer.addr.clone(),
                    Offer {
                        mac: String::new(),
                        round: 0,
                    },
                )
            })
            .collect();

        let round = ctx.round.get() + 1;
        ctx.round.set(round);
        offers.insert(
            local_mac.clone(),
            Offer {
                mac: String::new(),
                round,
            },
        );
        let candidate = rotation_candidate(&offers, round);
        if let Some(local) = offers.get_mut(&local_mac) {
            local.mac = candidate;
        }

        let owner = TaskOwner::new(ctx.executor.clone());
        let data = Rc::new(RefCell::new(NegotiatingData {
            local_mac,
            peers,
            offers,
        }));
        owner.start_root(Task::new(run_negotiation(
            ctx.clone(),
            data.clone(),
            owner.downgrade(),
        )));

        let mut state = Self {
            ctx: ctx.clone(),
            owner,
            data,
        };
        if let Some((sender, message)) = trigger {
            state.on_message_received(sender, &message);
        }
        state
    }

    pub(crate) fn handle(&mut self, event: Event) {
        match event {
            Event::BluetoothOff => {
                self.ctx.proxy.fire_and_forget(Command::ResetConnections);
                self.ctx.proxy.fire_and_forget(Command::ResetGame);
                switch_to_idle(&self.ctx, false);
            }
            Event::MessageReceived { sender, message } => {
                self.on_message_received(sender, &message);
            }
            Event::GameStopped => {
                self.ctx.proxy.fire_and_forget(Command::ResetConnections);
                switch_to_idle(&self.ctx, false);
            }
            Event::SocketReadFailed { peer } => self.on_socket_read_failure(&peer),
            _ => {}
        }
    }

    pub(crate) fn take_error(&self) -> Option<VeridieError> {
        self.owner.take_error()
    }

    fn on_message_received(&mut self, sender: Peer, message: &str) {
        if !self.data.borrow().peers.contains(&sender) {
            return;
        }
        match self.ctx.codec.decode(message) {
            Ok(Message::Offer(offer)) => {
                self.data.borrow_mut().offers.insert(sender.addr, offer);
            }
            Ok(other) => {
                error!("expected an offer, received {other:?}");
            }
            Err(e) => {
                error!("failed to decode message: {e}");
            }
        }
    }

    fn on_socket_read_failure(&mut self, peer: &Peer) {
        let known = {
            let mut data = self.data.borrow_mut();
            let known = data.peers.take(peer).is_some();
            if known {
                data.offers.remove(&peer.addr);
            }
            known
        };
        if known {
            self.owner.start_root(Task::new(disconnect_device(
                self.ctx.clone(),
                peer.addr.clone(),
            )));
        }
    }
}

/// Address at index `round % len` in the sorted list of all known addresses
fn rotation_candidate(offers: &BTreeMap<String, Offer>, round: u32) -> String {
    let index = round as usize % offers.len();
    offers
        .keys()
        .nth(index)
        .cloned()
        .unwrap_or_default()
}

// ----------------------------------------------------------------------------
// Background Tasks
// ----------------------------------------------------------------------------

async fn run_negotiation(
    ctx: Context,
    data: Rc<RefCell<NegotiatingData>>,
    owner: WeakTaskOwner,
) -> TaskResult {
    let response = ctx.proxy.command(Command::NegotiationStart).await;
    match response {
        ResponseCode::Ok => update_and_broadcast(ctx, data, owner).await,
        _ => {
            error!("cannot start negotiation in an invalid state");
            Ok(())
        }
    }
}

async fn update_and_broadcast(
    ctx: Context,
    data: Rc<RefCell<NegotiatingData>>,
    owner: WeakTaskOwner,
) -> TaskResult {
    loop {
        let nominee = {
            let data = data.borrow();
            let local = &data.offers[&data.local_mac];
            data.offers
                .values()
                .all(|offer| offer.round == local.round && offer.mac == local.mac)
                .then(|| local.mac.clone())
        };

        if let Some(nominee) = nominee {
            let (peers, local_mac) = {
                let mut data = data.borrow_mut();
                (
                    std::mem::take(&mut data.peers),
                    std::mem::take(&mut data.local_mac),
                )
            };
            let nominee_name = peers
                .get(nominee.as_str())
                .map(|peer| peer.name.clone())
                .unwrap_or_else(|| "You".to_string());
            ctx.proxy.fire_and_forget(Command::NegotiationStop {
                nominee: nominee_name,
            });
            switch_to_playing(&ctx, peers, local_mac, nominee);
            return Ok(());
        }

        // Adopt the highest round seen, refresh the local offer and
        // broadcast it.
        let message = {
            let mut data = data.borrow_mut();
            let round = data
                .offers
                .values()
                .map(|offer| offer.round)
                .max()
                .unwrap_or(0)
                .max(ctx.round.get());
            ctx.round.set(round);
            let candidate = rotation_candidate(&data.offers, round);
            let local_mac = data.local_mac.clone();
            if let Some(local) = data.offers.get_mut(&local_mac) {
                local.round = round;
                local.mac = candidate.clone();
            }
            ctx.codec.encode(&Message::Offer(Offer {
                mac: candidate,
                round,
            }))
        };

        let peers: Vec<Peer> = data.borrow().peers.iter().cloned().collect();
        for peer in peers {
            owner
                .start_nested(Task::new(send_offer(
                    ctx.clone(),
                    data.clone(),
                    message.clone(),
                    peer,
                )))
                .await;
        }
        ctx.timer.wait_for(ctx.config.retry_backoff).await;
    }
}

async fn send_offer(
    ctx: Context,
    data: Rc<RefCell<NegotiatingData>>,
    message: String,
    receiver: Peer,
) -> TaskResult {
    let response = ctx
        .proxy
        .command(Command::SendMessage {
            message,
            addr: receiver.addr.clone(),
        })
        .await;

    match response {
        ResponseCode::SocketError => {
            disconnect_device(ctx.clone(), receiver.addr.clone()).await?;
            drop_peer(&data, &receiver);
        }
        ResponseCode::ConnectionNotFound => {
            drop_peer(&data, &receiver);
        }
        _ => {}
    }
    Ok(())
}

fn drop_peer(data: &Rc<RefCell<NegotiatingData>>, peer: &Peer) {
    let mut data = data.borrow_mut();
    data.peers.remove(peer);
    data.offers.remove(&peer.addr);
}

/// Close a lost connection, tolerating transient refusals
async fn disconnect_device(ctx: Context, mac: String) -> TaskResult {
    loop {
        let response = ctx
            .proxy
            .command(Command::CloseConnection {
                error: String::new(),
                addr: mac.clone(),
            })
            .await;
        if response != ResponseCode::InvalidState && response != ResponseCode::InteropFailure {
            return Ok(());
        }
    }
}
