//! Error types for the VeriDie core
//!
//! This module contains all error types used throughout the core: wire
//! parsing errors, event parsing errors and the main `VeridieError` type
//! that unifies them.

use std::fmt;

// ----------------------------------------------------------------------------
// Wire Parse Errors
// ----------------------------------------------------------------------------

/// Errors produced while decoding a peer-to-peer message
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("unknown message element `{0}`")]
    UnknownElement(String),
    #[error("unknown die kind `{0}`")]
    UnknownDieKind(String),
    #[error("missing attribute `{0}`")]
    MissingAttribute(&'static str),
    #[error("malformed message: {0}")]
    Malformed(String),
}

impl ParseError {
    /// Create a malformed-message error with a description
    pub fn malformed<T: Into<String>>(detail: T) -> Self {
        ParseError::Malformed(detail.into())
    }
}

// ----------------------------------------------------------------------------
// Core Error Type
// ----------------------------------------------------------------------------

/// Core error type for the VeriDie protocol
#[derive(Debug, thiserror::Error)]
pub enum VeridieError {
    #[error("wire parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("unknown event id {0}")]
    UnknownEvent(i32),

    #[error("malformed arguments for event {event}: {reason}")]
    MalformedEvent { event: &'static str, reason: String },

    #[error("command storage is full for {0}")]
    CommandStorageFull(&'static str),

    #[error("external invoker rejected {0}")]
    InvokerRejected(&'static str),

    /// Configuration error
    #[error("configuration error: {reason}")]
    Configuration { reason: String },
}

impl VeridieError {
    /// Create a malformed-event error
    pub fn malformed_event<T: fmt::Display>(event: &'static str, reason: T) -> Self {
        VeridieError::MalformedEvent {
            event,
            reason: reason.to_string(),
        }
    }

    /// Create a configuration error with a reason
    pub fn config_error<T: Into<String>>(reason: T) -> Self {
        VeridieError::Configuration {
            reason: reason.into(),
        }
    }
}

// ----------------------------------------------------------------------------
// Type Aliases
// ----------------------------------------------------------------------------

pub type VeridieResult<T> = Result<T, VeridieError>;
