//! Error taxonomy for TV control. Adapters never let these escape as faults;
//! they are folded into a `TvCommandResult` at the adapter boundary.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ControlError {
    #[error("Could not reach {0}")]
    Unreachable(String),

    #[error("Timed out waiting for {0}")]
    Timeout(String),

    #[error("TV rejected the command: {0}")]
    Rejected(String),

    #[error("Not paired with {0}. Accept the pairing prompt on the TV and try again")]
    PairingRequired(String),

    #[error("Pairing was declined on the TV at {0}")]
    PairingDeclined(String),

    #[error("{0}")]
    Unsupported(String),

    #[error("Unknown TV brand: {0}")]
    UnknownBrand(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Connection to {0} was lost")]
    SessionLost(String),

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Coarse failure category used to pick user-facing wording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// No or garbled response within the timeout.
    Unreachable,
    /// The device answered but declined.
    Rejected,
    /// The brand or protocol cannot do this at all.
    Unsupported,
}

impl ErrorKind {
    pub fn headline(&self) -> &'static str {
        match self {
            ErrorKind::Unreachable => "Could not reach device",
            ErrorKind::Rejected => "Device rejected command",
            ErrorKind::Unsupported => "Not supported on this device",
        }
    }
}

impl ControlError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ControlError::Unreachable(_)
            | ControlError::Timeout(_)
            | ControlError::SessionLost(_)
            | ControlError::Malformed(_)
            | ControlError::Storage(_)
            | ControlError::Serialization(_)
            | ControlError::Config(_) => ErrorKind::Unreachable,
            ControlError::Rejected(_)
            | ControlError::PairingRequired(_)
            | ControlError::PairingDeclined(_)
            | ControlError::InvalidInput(_) => ErrorKind::Rejected,
            ControlError::Unsupported(_) | ControlError::UnknownBrand(_) => {
                ErrorKind::Unsupported
            }
        }
    }
}

pub type Result<T, E = ControlError> = std::result::Result<T, E>;
