use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SimulatorError {
    /// Framing, checksum or header validation failed
    MalformedMessage(String),

    /// A required field is absent (or its value cannot be parsed)
    FieldNotFound(u32),

    /// Invalid quantity (e.g., zero, negative or not a number)
    InvalidQuantity,

    /// Limit order without a usable price
    InvalidPrice,

    /// Send attempted while the session is not logged on
    SessionNotActive,

    /// Transport failure; the session has been forced to Disconnected
    ConnectivityLost(String),

    /// Symbol is not tracked by the price book
    UnknownInstrument(String),

    /// Inbound MsgSeqNum was a duplicate or skipped ahead
    SequenceMismatch { expected: u64, received: u64 },

    /// Application message type this endpoint does not process
    UnsupportedMessage(String),

    /// Settings could not be loaded
    Config(String),
}

impl fmt::Display for SimulatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimulatorError::MalformedMessage(reason) => write!(f, "Malformed message: {}", reason),
            SimulatorError::FieldNotFound(tag) => write!(f, "Field not found: {}", tag),
            SimulatorError::InvalidQuantity => write!(f, "Invalid quantity"),
            SimulatorError::InvalidPrice => write!(f, "Invalid price"),
            SimulatorError::SessionNotActive => write!(f, "Session not active"),
            SimulatorError::ConnectivityLost(reason) => write!(f, "Connectivity lost: {}", reason),
            SimulatorError::UnknownInstrument(symbol) => {
                write!(f, "Price not available for symbol: {}", symbol)
            }
            SimulatorError::SequenceMismatch { expected, received } => write!(
                f,
                "Sequence mismatch: expected {}, received {}",
                expected, received
            ),
            SimulatorError::UnsupportedMessage(msg_type) => {
                write!(f, "Message type {} not processed", msg_type)
            }
            SimulatorError::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for SimulatorError {}

/// Result type for simulator operations
pub type SimulatorResult<T> = Result<T, SimulatorError>;
