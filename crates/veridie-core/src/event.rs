//! Inbound events from the host
//!
//! The host marshals everything that happens outside the core (transport
//! callbacks and user actions) into numbered events with positional string
//! arguments. Parsing is strict: missing or malformed arguments reject the
//! event without touching any state.

use crate::dice::Cast;
use crate::errors::VeridieError;
use crate::protocol::Request;
use crate::types::Peer;

// ----------------------------------------------------------------------------
// Event Ids
// ----------------------------------------------------------------------------

/// Numeric event ids, shared with the host interop layer
pub mod id {
    pub const REMOTE_DEVICE_CONNECTED: i32 = 10;
    pub const REMOTE_DEVICE_DISCONNECTED: i32 = 11;
    pub const CONNECTIVITY_ESTABLISHED: i32 = 12;
    pub const NEW_GAME_REQUESTED: i32 = 13;
    pub const MESSAGE_RECEIVED: i32 = 14;
    pub const CAST_REQUEST_ISSUED: i32 = 15;
    pub const GAME_STOPPED: i32 = 16;
    pub const BLUETOOTH_ON: i32 = 17;
    pub const BLUETOOTH_OFF: i32 = 18;
    pub const SOCKET_READ_FAILED: i32 = 19;
}

/// Human-readable name of an event id, if it is known
pub fn name(event_id: i32) -> Option<&'static str> {
    match event_id {
        id::REMOTE_DEVICE_CONNECTED => Some("RemoteDeviceConnected"),
        id::REMOTE_DEVICE_DISCONNECTED => Some("RemoteDeviceDisconnected"),
        id::CONNECTIVITY_ESTABLISHED => Some("ConnectivityEstablished"),
        id::NEW_GAME_REQUESTED => Some("NewGameRequested"),
        id::MESSAGE_RECEIVED => Some("MessageReceived"),
        id::CAST_REQUEST_ISSUED => Some("CastRequestIssued"),
        id::GAME_STOPPED => Some("GameStopped"),
        id::BLUETOOTH_ON => Some("BluetoothOn"),
        id::BLUETOOTH_OFF => Some("BluetoothOff"),
        id::SOCKET_READ_FAILED => Some("SocketReadFailed"),
        _ => None,
    }
}

// ----------------------------------------------------------------------------
// Events
// ----------------------------------------------------------------------------

/// A parsed inbound event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    RemoteDeviceConnected { peer: Peer },
    RemoteDeviceDisconnected { peer: Peer },
    ConnectivityEstablished,
    NewGameRequested,
    MessageReceived { sender: Peer, message: String },
    CastRequestIssued { request: Request },
    GameStopped,
    BluetoothOn,
    BluetoothOff,
    SocketReadFailed { peer: Peer },
}

impl Event {
    /// Parse an event from its id and positional arguments
    pub fn parse(event_id: i32, args: &[String]) -> Result<Event, VeridieError> {
        match event_id {
            id::REMOTE_DEVICE_CONNECTED => {
                parse_peer("RemoteDeviceConnected", args)
                    .map(|peer| Event::RemoteDeviceConnected { peer })
            }
            id::REMOTE_DEVICE_DISCONNECTED => {
                parse_peer("RemoteDeviceDisconnected", args)
                    .map(|peer| Event::RemoteDeviceDisconnected { peer })
            }
            id::CONNECTIVITY_ESTABLISHED => Ok(Event::ConnectivityEstablished),
            id::NEW_GAME_REQUESTED => Ok(Event::NewGameRequested),
            id::MESSAGE_RECEIVED => {
                // "message", "addr", "name"
                if args.len() < 3 {
                    return Err(VeridieError::malformed_event(
                        "MessageReceived",
                        format!("expected 3 arguments, got {}", args.len()),
                    ));
                }
                Ok(Event::MessageReceived {
                    sender: Peer::new(args[1].clone(), args[2].clone()),
                    message: args[0].clone(),
                })
            }
            id::CAST_REQUEST_ISSUED => parse_cast_request(args),
            id::GAME_STOPPED => Ok(Event::GameStopped),
            id::BLUETOOTH_ON => Ok(Event::BluetoothOn),
            id::BLUETOOTH_OFF => Ok(Event::BluetoothOff),
            id::SOCKET_READ_FAILED => {
                parse_peer("SocketReadFailed", args).map(|peer| Event::SocketReadFailed { peer })
            }
            other => Err(VeridieError::UnknownEvent(other)),
        }
    }
}

// "addr", "name"; the address must be non-empty
fn parse_peer(event: &'static str, args: &[String]) -> Result<Peer, VeridieError> {
    if args.len() < 2 || args[0].is_empty() {
        return Err(VeridieError::malformed_event(
            event,
            "expected a non-empty address and a name",
        ));
    }
    Ok(Peer::new(args[0].clone(), args[1].clone()))
}

// "type", "size" and an optional "threshold"
fn parse_cast_request(args: &[String]) -> Result<Event, VeridieError> {
    const EVENT: &str = "CastRequestIssued";

    if args.len() < 2 {
        return Err(VeridieError::malformed_event(
            EVENT,
            format!("expected at least 2 arguments, got {}", args.len()),
        ));
    }
    let die = args[0]
        .parse()
        .map_err(|e| VeridieError::malformed_event(EVENT, e))?;
    let size: usize = args[1]
        .parse()
        .map_err(|_| VeridieError::malformed_event(EVENT, format!("bad size `{}`", args[1])))?;
    let threshold = match args.get(2) {
        Some(raw) => Some(raw.parse::<u32>().map_err(|_| {
            VeridieError::malformed_event(EVENT, format!("bad threshold `{raw}`"))
        })?),
        None => None,
    };
    Ok(Event::CastRequestIssued {
        request: Request {
            cast: Cast::zeroed(die, size),
            threshold,
        },
    })
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dice::Die;

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_connected() {
        let event = Event::parse(id::REMOTE_DEVICE_CONNECTED, &strings(&["aa:bb", "Alice"]));
        assert_eq!(
            event.unwrap(),
            Event::RemoteDeviceConnected {
                peer: Peer::new("aa:bb", "Alice")
            }
        );
    }

    #[test]
    fn test_parse_rejects_empty_address() {
        assert!(Event::parse(id::REMOTE_DEVICE_CONNECTED, &strings(&["", "Alice"])).is_err());
        assert!(Event::parse(id::SOCKET_READ_FAILED, &strings(&["aa:bb"])).is_err());
    }

    #[test]
    fn test_parse_message_received_argument_order() {
        let event = Event::parse(
            id::MESSAGE_RECEIVED,
            &strings(&["<Hello><Mac>x</Mac></Hello>", "aa:bb", "Alice"]),
        )
        .unwrap();
        assert_eq!(
            event,
            Event::MessageReceived {
                sender: Peer::new("aa:bb", "Alice"),
                message: "<Hello><Mac>x</Mac></Hello>".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_cast_request_with_threshold() {
        let event = Event::parse(id::CAST_REQUEST_ISSUED, &strings(&["D6", "4", "3"])).unwrap();
        let Event::CastRequestIssued { request } = event else {
            panic!("wrong event kind");
        };
        assert_eq!(request.cast.die(), Die::D6);
        assert_eq!(request.cast.len(), 4);
        assert_eq!(request.threshold, Some(3));
        assert!(request.cast.values().iter().all(|&v| v == 0));
    }

    #[test]
    fn test_parse_cast_request_rejects_bad_args() {
        assert!(Event::parse(id::CAST_REQUEST_ISSUED, &strings(&["D6"])).is_err());
        assert!(Event::parse(id::CAST_REQUEST_ISSUED, &strings(&["D7", "4"])).is_err());
        assert!(Event::parse(id::CAST_REQUEST_ISSUED, &strings(&["D6", "many"])).is_err());
        assert!(Event::parse(id::CAST_REQUEST_ISSUED, &strings(&["D6", "4", "x"])).is_err());
    }

    #[test]
    fn test_parse_unknown_id() {
        assert!(matches!(
            Event::parse(99, &[]),
            Err(VeridieError::UnknownEvent(99))
        ));
        assert_eq!(name(99), None);
        assert_eq!(name(id::BLUETOOTH_ON), Some("BluetoothOn"));
    }
}
