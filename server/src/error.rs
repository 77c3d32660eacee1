//! Error types for the relay server.
//!
//! Only start-up failures surface as [`ServerError`]. Everything that goes
//! wrong on an individual connection is logged and contained there.

use crate::client_manager::DeliveryFailure;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// A listener could not be bound
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration, detected before anything is bound
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Why a `hello` did not result in a registered client.
#[derive(Debug, thiserror::Error)]
pub enum JoinError {
    #[error("server is full")]
    ServerFull,

    #[error("welcome could not be queued: {0}")]
    Unreachable(DeliveryFailure),
}

