//! Errors returned synchronously to callers.
//!
//! Transport faults are not in here: they surface as state transitions and
//! disconnect events, never as a failed call.

use crate::types::PeerId;
use thiserror::Error;

/// Caller-visible errors
#[derive(Error, Debug)]
pub enum NetworkError {
    /// Peer ID not present in the peer table
    #[error("unknown peer {0}")]
    UnknownPeer(PeerId),

    /// Send attempted while the peer is not connected
    #[error("peer {0} is not connected")]
    NotConnected(PeerId),

    /// Payload exceeds the configured maximum frame size
    #[error("payload too large: {len} bytes (limit {max})")]
    TooLarge {
        /// Payload length
        len: usize,
        /// Configured limit
        max: usize,
    },

    /// Host or port cannot be used as a connect target
    #[error("invalid address {host:?}:{port}")]
    InvalidAddress {
        /// Host as given
        host: String,
        /// Port as given
        port: u16,
    },

    /// Invalid configuration value
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Socket layer or runtime failure
    #[error("platform error: {0}")]
    Platform(#[from] std::io::Error),

    /// Process-wide instance already set up
    #[error("network already initialized")]
    AlreadyInitialized,

    /// Process-wide instance not set up
    #[error("network not initialized")]
    NotInitialized,

    /// Instance has been shut down
    #[error("network has been shut down")]
    ShutDown,
}

impl From<peerlink_wire::WireError> for NetworkError {
    fn from(err: peerlink_wire::WireError) -> Self {
        match err {
            peerlink_wire::WireError::Size { len, max } => NetworkError::TooLarge { len, max },
        }
    }
}

/// Result alias for network operations
pub type Result<T> = std::result::Result<T, NetworkError>;
