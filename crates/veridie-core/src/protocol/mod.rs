//! Peer-to-peer messages and their wire codec

mod message;
mod wire;

pub use message::{Hello, Message, Offer, Request, Response};
pub use wire::{MessageCodec, XmlCodec};
