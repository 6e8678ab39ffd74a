//! VeriDie Core Protocol Implementation
//!
//! This crate provides the foundational types and serialization for the
//! VeriDie peer-to-peer dice protocol: a set of devices discovers each other
//! over a short-range radio link, elects one device as the authoritative
//! random-number generator, and exchanges dice-roll requests and responses.
//!
//! ## Architecture Overview
//!
//! VeriDie follows a clean separation of concerns across multiple crates:
//!
//! ### veridie-core: The Headless Data Model
//!
//! This crate has no knowledge of the runtime or any user interface. It
//! defines:
//!
//! - **Dice**: die kinds, casts and the roll [`dice::Engine`]
//! - **Protocol**: the peer-to-peer messages and their wire codec
//! - **Commands**: outbound directives to the host (UI and transport sinks)
//!   together with the shared response-code space
//! - **Events**: the inbound host-to-core event vocabulary
//!
//! ### veridie-runtime: The Coordination Engine
//!
//! The `veridie-runtime` crate drives the peer-group lifecycle
//! (Idle → Connecting → Negotiating → Playing) from a single-threaded
//! cooperative task runtime, consuming the types defined here.
//!
//! ### veridie-harness: Test Tooling
//!
//! Recording command sinks, a manually driven clock and a fixed-value roll
//! engine for deterministic tests.
//!
//! ## Usage Examples
//!
//! ```rust
//! use veridie_core::dice::{Cast, Die};
//! use veridie_core::protocol::{Message, MessageCodec, Request, XmlCodec};
//!
//! let request = Request {
//!     cast: Cast::zeroed(Die::D6, 4),
//!     threshold: Some(3),
//! };
//!
//! let codec = XmlCodec;
//! let text = codec.encode(&Message::Request(request.clone()));
//! assert_eq!(codec.decode(&text).unwrap(), Message::Request(request));
//! ```

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod command;
pub mod config;
pub mod dice;
pub mod errors;
pub mod event;
pub mod protocol;
pub mod types;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use command::{Command, CommandChannel, ResponseCode};
pub use config::Config;
pub use errors::{ParseError, VeridieError, VeridieResult};
pub use event::Event;
pub use types::Peer;
