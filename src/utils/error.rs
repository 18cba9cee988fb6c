//! The `error` module defines the error types used within `connhub`.
//!
//! Failures are grouped by where they surface: registry bookkeeping,
//! admission of a new connection, the transport of an established
//! connection, and process-level setup in the binary. Per-connection
//! failures never escape the connection they belong to; they are turned
//! into a close of that connection by the hub.

use thiserror::Error;

use crate::hub::connection::ConnectionId;

/// Errors returned by [`Registry`](crate::hub::Registry) operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("connection {0} is already registered")]
    AlreadyExists(ConnectionId),

    #[error("connection {0} is not registered")]
    NotFound(ConnectionId),

    #[error("connection limit of {limit} reached")]
    CapacityReached { limit: usize },

    #[error("registry is sealed for shutdown")]
    Sealed,
}

/// Reasons a transport is refused before a connection object is admitted.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("hub is shutting down")]
    ShuttingDown,

    #[error("connection limit of {limit} reached")]
    CapacityReached { limit: usize },

    #[error("connection {0} is already admitted")]
    Duplicate(ConnectionId),
}

impl AdmissionError {
    /// WebSocket close code sent to a refused peer.
    pub fn close_code(&self) -> u16 {
        match self {
            AdmissionError::ShuttingDown => 1001,
            AdmissionError::CapacityReached { .. } => 1013,
            AdmissionError::Duplicate(_) => 1008,
        }
    }
}

impl From<RegistryError> for AdmissionError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::Sealed => AdmissionError::ShuttingDown,
            RegistryError::CapacityReached { limit } => AdmissionError::CapacityReached { limit },
            RegistryError::AlreadyExists(id) | RegistryError::NotFound(id) => {
                AdmissionError::Duplicate(id)
            }
        }
    }
}

/// Failures reading from or writing to an established transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport closed")]
    Closed,

    #[error("handshake timed out")]
    HandshakeTimeout,

    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Process-level failures surfaced by the binary.
#[derive(Debug, Error)]
pub enum HubError {
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
