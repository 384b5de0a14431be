//! Error types for call signaling.

use linkcall_protocol::ProtocolError;
use thiserror::Error;

use crate::session::CallState;

/// Result type for signaling operations.
pub type SignalingResult<T> = Result<T, SignalingError>;

/// Errors surfaced by the signaling state machine and the media capability.
#[derive(Debug, Error)]
pub enum SignalingError {
    /// Camera or microphone could not be acquired.
    #[error("media access denied: {0}")]
    MediaAccessDenied(String),

    /// The operation is not valid in the current call state.
    #[error("{operation} is not valid while the call is {state}")]
    Precondition {
        operation: &'static str,
        state: CallState,
    },

    /// The peer connection rejected an operation.
    #[error("peer connection error: {0}")]
    Peer(String),

    /// The signaling message could not be delivered.
    #[error("signaling channel error: {0}")]
    Channel(String),

    /// A signaling payload could not be encoded or decoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl SignalingError {
    /// Creates a peer connection error.
    pub fn peer(message: impl Into<String>) -> Self {
        Self::Peer(message.into())
    }

    /// Creates a channel error.
    pub fn channel(message: impl Into<String>) -> Self {
        Self::Channel(message.into())
    }
}
