//! Error types for the bridge.

use crate::types::CallbackId;
use thiserror::Error;

/// Errors that can occur on either side of the bridge.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BridgeError {
    /// The remote call could not complete (connection lost, endpoint not dialable).
    #[error("Transport error: {0}")]
    Transport(String),

    /// A bounded remote call ran out of time.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// The extension does not recognize the callback identifier.
    #[error("{kind} handler {id} not found")]
    HandlerNotFound { kind: String, id: CallbackId },

    /// A payload could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The host refused a registration.
    #[error("Registration rejected: {0}")]
    Registration(String),

    /// The bootstrap exchange failed; the bridge cannot exist.
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// The reverse link was already set.
    #[error("Reverse link already established")]
    LinkAlreadyEstablished,

    /// An extension handler reported a failure.
    #[error("Handler failed: {0}")]
    Handler(String),

    /// The peer processed the call but reported it as unsuccessful.
    #[error("Remote call failed: {0}")]
    Remote(String),
}

impl BridgeError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, BridgeError::Timeout(_))
    }

    /// Failures that affect a single event occurrence and are recovered locally.
    pub fn is_delivery_failure(&self) -> bool {
        matches!(
            self,
            BridgeError::Transport(_) | BridgeError::Timeout(_) | BridgeError::Serialization(_)
        )
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::Serialization(err.to_string())
    }
}

/// Result type for bridge operations.
pub type BridgeResult<T> = std::result::Result<T, BridgeError>;
