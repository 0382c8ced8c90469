use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::types::ParameterId;

/// The primary error type for the `navibelt-lib` library.
#[derive(Error, Debug)]
pub enum BeltError {
    #[error("Connection error: {0}")]
    Connection(#[from] io::Error),

    #[error("Serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    #[error("No belt connected")]
    NotConnected,

    /// A blocking command lost its connection before the ACK arrived. Ends
    /// the wait early, so callers waiting for an ACK see either this or
    /// [`BeltError::AckTimeout`] when no ACK comes.
    #[error("Connection closed while waiting for ACK {ack_id:#04x}")]
    Disconnected { ack_id: u8 },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("ACK {ack_id:#04x} not received within {timeout:?}")]
    AckTimeout { ack_id: u8, timeout: Duration },

    #[error("Handshake incomplete, missing: {missing:?}")]
    HandshakeIncomplete { missing: Vec<ParameterId> },

    #[error("No belt found matching '{0}'")]
    DeviceNotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl BeltError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        BeltError::InvalidArgument(message.into())
    }
}

pub type Result<T, E = BeltError> = std::result::Result<T, E>;
