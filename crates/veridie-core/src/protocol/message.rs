//! Protocol message types
//!
//! Four root messages travel between peers: a greeting that tells the
//! receiver its own address, a generator nomination offer, and the
//! request/response pair for dice rolls.

use serde::{Deserialize, Serialize};

use crate::dice::Cast;

// ----------------------------------------------------------------------------
// Message Types
// ----------------------------------------------------------------------------

/// Greeting sent to a freshly connected peer
///
/// Carries the *receiver's* address: devices cannot observe their own radio
/// address, so each side learns it from the first hello it receives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    pub mac: String,
}

/// Generator nomination: (candidate address, negotiation round)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offer {
    pub mac: String,
    pub round: u32,
}

/// A dice-roll request: an unrolled cast plus an optional success threshold
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub cast: Cast,
    pub threshold: Option<u32>,
}

/// A dice-roll response: a filled cast plus an optional success count
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub cast: Cast,
    pub success_count: Option<u32>,
}

/// Any message exchanged between peers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    Hello(Hello),
    Offer(Offer),
    Request(Request),
    Response(Response),
}
