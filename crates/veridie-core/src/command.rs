//! Outbound commands and the shared response-code space
//!
//! A command is a one-shot directive to the host, awaiting a numeric
//! response. The id space is partitioned per kind: every kind has a base id
//! (`kind << 8`) and the command manager may append small increments to
//! deduplicate concurrent issues of the same kind. UI kinds and transport
//! kinds partition the space; see [`Command::channel`].

use std::fmt;

use smallvec::SmallVec;

use crate::dice::{write_values, Cast, Die};

/// Longest payload accepted by the short send transport
pub const SHORT_MESSAGE_LIMIT: usize = 255;
/// Longest payload accepted by the long send transport
pub const LONG_MESSAGE_LIMIT: usize = 1023;

// ----------------------------------------------------------------------------
// Response Codes
// ----------------------------------------------------------------------------

/// Shared response-code space; each command kind accepts a subset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i64)]
pub enum ResponseCode {
    Ok = 0,
    InvalidState = -1,
    InteropFailure = -2,
    BluetoothOff = 2,
    ListenFailed = 3,
    ConnectionNotFound = 4,
    NoBtAdapter = 5,
    UserDeclined = 6,
    SocketError = 7,
}

impl ResponseCode {
    /// Decode a raw host-supplied value
    pub fn from_raw(raw: i64) -> Option<Self> {
        match raw {
            0 => Some(ResponseCode::Ok),
            -1 => Some(ResponseCode::InvalidState),
            -2 => Some(ResponseCode::InteropFailure),
            2 => Some(ResponseCode::BluetoothOff),
            3 => Some(ResponseCode::ListenFailed),
            4 => Some(ResponseCode::ConnectionNotFound),
            5 => Some(ResponseCode::NoBtAdapter),
            6 => Some(ResponseCode::UserDeclined),
            7 => Some(ResponseCode::SocketError),
            _ => None,
        }
    }

    pub fn as_raw(self) -> i64 {
        self as i64
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResponseCode::Ok => "OK",
            ResponseCode::InvalidState => "INVALID_STATE",
            ResponseCode::InteropFailure => "INTEROP_FAILURE",
            ResponseCode::BluetoothOff => "BLUETOOTH_OFF",
            ResponseCode::ListenFailed => "LISTEN_FAILED",
            ResponseCode::ConnectionNotFound => "CONNECTION_NOT_FOUND",
            ResponseCode::NoBtAdapter => "NO_BT_ADAPTER",
            ResponseCode::UserDeclined => "USER_DECLINED",
            ResponseCode::SocketError => "SOCKET_ERROR",
        };
        f.write_str(name)
    }
}

// ----------------------------------------------------------------------------
// Command Channel
// ----------------------------------------------------------------------------

/// The outbound sink a command is routed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandChannel {
    /// User-facing surface: dialogs, toasts, roll displays
    Ui,
    /// Radio transport: discovery, listening, socket traffic
    Bt,
}

// ----------------------------------------------------------------------------
// Commands
// ----------------------------------------------------------------------------

/// An outbound directive to the host
///
/// `SendLongMessage` and `ShowLongResponse` share their base id with the
/// short variants; they differ only in the payload budget of the host-side
/// buffer they address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    StartListening {
        uuid: String,
        name: String,
        duration_secs: u32,
    },
    StartDiscovery {
        uuid: String,
        name: String,
        include_paired: bool,
    },
    StopListening,
    StopDiscovery,
    CloseConnection {
        error: String,
        addr: String,
    },
    EnableBluetooth,
    NegotiationStart,
    NegotiationStop {
        nominee: String,
    },
    SendMessage {
        message: String,
        addr: String,
    },
    SendLongMessage {
        message: String,
        addr: String,
    },
    ShowAndExit {
        text: String,
    },
    ShowToast {
        text: String,
        duration_secs: u32,
    },
    ShowNotification {
        text: String,
    },
    ShowRequest {
        die: Die,
        size: u32,
        /// Success threshold; zero encodes "not set"
        threshold: u32,
        from: String,
    },
    ShowResponse {
        cast: Cast,
        /// Success count; minus one encodes "not set"
        success_count: i32,
        from: String,
    },
    ShowLongResponse {
        cast: Cast,
        success_count: i32,
        from: String,
    },
    ResetGame,
    ResetConnections,
}

impl Command {
    /// Base correlation id of this kind (`kind << 8`)
    pub fn base_id(&self) -> i32 {
        let kind: i32 = match self {
            Command::StartListening { .. } => 100,
            Command::StartDiscovery { .. } => 101,
            Command::StopListening => 102,
            Command::StopDiscovery => 103,
            Command::CloseConnection { .. } => 104,
            Command::EnableBluetooth => 105,
            Command::NegotiationStart => 106,
            Command::NegotiationStop { .. } => 107,
            Command::SendMessage { .. } | Command::SendLongMessage { .. } => 108,
            Command::ShowAndExit { .. } => 109,
            Command::ShowToast { .. } => 110,
            Command::ShowNotification { .. } => 111,
            Command::ShowRequest { .. } => 112,
            Command::ShowResponse { .. } | Command::ShowLongResponse { .. } => 113,
            Command::ResetGame => 114,
            Command::ResetConnections => 115,
        };
        kind << 8
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::StartListening { .. } => "StartListening",
            Command::StartDiscovery { .. } => "StartDiscovery",
            Command::StopListening => "StopListening",
            Command::StopDiscovery => "StopDiscovery",
            Command::CloseConnection { .. } => "CloseConnection",
            Command::EnableBluetooth => "EnableBluetooth",
            Command::NegotiationStart => "NegotiationStart",
            Command::NegotiationStop { .. } => "NegotiationStop",
            Command::SendMessage { .. } => "SendMessage",
            Command::SendLongMessage { .. } => "SendLongMessage",
            Command::ShowAndExit { .. } => "ShowAndExit",
            Command::ShowToast { .. } => "ShowToast",
            Command::ShowNotification { .. } => "ShowNotification",
            Command::ShowRequest { .. } => "ShowRequest",
            Command::ShowResponse { .. } => "ShowResponse",
            Command::ShowLongResponse { .. } => "ShowLongResponse",
            Command::ResetGame => "ResetGame",
            Command::ResetConnections => "ResetConnections",
        }
    }

    /// The sink this command is routed to
    pub fn channel(&self) -> CommandChannel {
        match self {
            Command::EnableBluetooth
            | Command::StartListening { .. }
            | Command::StartDiscovery { .. }
            | Command::StopListening
            | Command::StopDiscovery
            | Command::CloseConnection { .. }
            | Command::SendMessage { .. }
            | Command::SendLongMessage { .. }
            | Command::ResetConnections => CommandChannel::Bt,
            Command::NegotiationStart
            | Command::NegotiationStop { .. }
            | Command::ShowAndExit { .. }
            | Command::ShowToast { .. }
            | Command::ShowNotification { .. }
            | Command::ShowRequest { .. }
            | Command::ShowResponse { .. }
            | Command::ShowLongResponse { .. }
            | Command::ResetGame => CommandChannel::Ui,
        }
    }

    /// The argument vector as shipped to the host, in declaration order
    pub fn args(&self) -> SmallVec<[String; 4]> {
        let mut args = SmallVec::new();
        match self {
            Command::StartListening {
                uuid,
                name,
                duration_secs,
            } => {
                args.push(uuid.clone());
                args.push(name.clone());
                args.push(duration_secs.to_string());
            }
            Command::StartDiscovery {
                uuid,
                name,
                include_paired,
            } => {
                args.push(uuid.clone());
                args.push(name.clone());
                args.push(include_paired.to_string());
            }
            Command::CloseConnection { error, addr } => {
                args.push(error.clone());
                args.push(addr.clone());
            }
            Command::NegotiationStop { nominee } => {
                args.push(nominee.clone());
            }
            Command::SendMessage { message, addr }
            | Command::SendLongMessage { message, addr } => {
                args.push(message.clone());
                args.push(addr.clone());
            }
            Command::ShowAndExit { text } | Command::ShowNotification { text } => {
                args.push(text.clone());
            }
            Command::ShowToast {
                text,
                duration_secs,
            } => {
                args.push(text.clone());
                args.push(duration_secs.to_string());
            }
            Command::ShowRequest {
                die,
                size,
                threshold,
                from,
            } => {
                args.push(die.to_string());
                args.push(size.to_string());
                args.push(threshold.to_string());
                args.push(from.clone());
            }
            Command::ShowResponse {
                cast,
                success_count,
                from,
            }
            | Command::ShowLongResponse {
                cast,
                success_count,
                from,
            } => {
                args.push(write_values(cast));
                args.push(cast.die().to_string());
                args.push(success_count.to_string());
                args.push(from.clone());
            }
            Command::StopListening
            | Command::StopDiscovery
            | Command::EnableBluetooth
            | Command::NegotiationStart
            | Command::ResetGame
            | Command::ResetConnections => {}
        }
        args
    }

    pub fn arg_count(&self) -> usize {
        self.args().len()
    }

    /// Whether `code` belongs to this kind's response subset
    pub fn accepts(&self, code: ResponseCode) -> bool {
        use ResponseCode::*;
        if matches!(code, Ok | InvalidState | InteropFailure) {
            return true;
        }
        match self {
            Command::StartListening { .. } => {
                matches!(code, BluetoothOff | UserDeclined | ListenFailed)
            }
            Command::StartDiscovery { .. } => matches!(code, NoBtAdapter | BluetoothOff),
            Command::CloseConnection { .. } => matches!(code, ConnectionNotFound),
            Command::EnableBluetooth => matches!(code, NoBtAdapter | UserDeclined),
            Command::SendMessage { .. } | Command::SendLongMessage { .. } => {
                matches!(code, ConnectionNotFound | SocketError)
            }
            _ => false,
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_ids_match_the_interop_table() {
        assert_eq!(
            Command::StartListening {
                uuid: String::new(),
                name: String::new(),
                duration_secs: 0
            }
            .base_id(),
            25600
        );
        assert_eq!(Command::EnableBluetooth.base_id(), 26880);
        assert_eq!(
            Command::SendMessage {
                message: String::new(),
                addr: String::new()
            }
            .base_id(),
            27648
        );
        // Long variants share the base id of their short counterparts.
        assert_eq!(
            Command::SendLongMessage {
                message: String::new(),
                addr: String::new()
            }
            .base_id(),
            27648
        );
        assert_eq!(Command::ResetConnections.base_id(), 29440);
    }

    #[test]
    fn test_show_response_args() {
        let cmd = Command::ShowResponse {
            cast: Cast::zeroed(Die::D6, 4),
            success_count: 2,
            from: "Player 1".to_string(),
        };
        assert_eq!(cmd.name(), "ShowResponse");
        assert_eq!(cmd.arg_count(), 4);
        let args = cmd.args();
        assert_eq!(args[0], "0;0;0;0;");
        assert_eq!(args[1], "D6");
        assert_eq!(args[2], "2");
        assert_eq!(args[3], "Player 1");
    }

    #[test]
    fn test_discovery_args_render_bool_and_seconds() {
        let discovery = Command::StartDiscovery {
            uuid: "uuid".to_string(),
            name: "VeriDie".to_string(),
            include_paired: true,
        };
        assert_eq!(discovery.args()[2], "true");

        let listening = Command::StartListening {
            uuid: "uuid".to_string(),
            name: "VeriDie".to_string(),
            duration_secs: 300,
        };
        assert_eq!(listening.args()[2], "300");
    }

    #[test]
    fn test_channel_partition() {
        assert_eq!(Command::EnableBluetooth.channel(), CommandChannel::Bt);
        assert_eq!(Command::ResetConnections.channel(), CommandChannel::Bt);
        assert_eq!(Command::NegotiationStart.channel(), CommandChannel::Ui);
        assert_eq!(Command::ResetGame.channel(), CommandChannel::Ui);
    }

    #[test]
    fn test_response_subsets() {
        let enable = Command::EnableBluetooth;
        assert!(enable.accepts(ResponseCode::Ok));
        assert!(enable.accepts(ResponseCode::NoBtAdapter));
        assert!(enable.accepts(ResponseCode::UserDeclined));
        assert!(!enable.accepts(ResponseCode::SocketError));

        let send = Command::SendMessage {
            message: String::new(),
            addr: String::new(),
        };
        assert!(send.accepts(ResponseCode::SocketError));
        assert!(send.accepts(ResponseCode::ConnectionNotFound));
        assert!(!send.accepts(ResponseCode::UserDeclined));
    }

    #[test]
    fn test_response_code_raw_round_trip() {
        for code in [
            ResponseCode::Ok,
            ResponseCode::InvalidState,
            ResponseCode::InteropFailure,
            ResponseCode::BluetoothOff,
            ResponseCode::ListenFailed,
            ResponseCode::ConnectionNotFound,
            ResponseCode::NoBtAdapter,
            ResponseCode::UserDeclined,
            ResponseCode::SocketError,
        ] {
            assert_eq!(ResponseCode::from_raw(code.as_raw()), Some(code));
        }
        assert_eq!(ResponseCode::from_raw(42), None);
    }
}
