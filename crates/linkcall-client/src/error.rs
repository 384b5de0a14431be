//! Client error types.

use std::fmt;

use linkcall_core::TracingError;
use linkcall_signaling::SignalingError;

use crate::config::ConfigError;
use crate::correlator::RequestError;
use crate::transport::TransportError;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by the `linkcall` binary.
#[derive(Debug)]
pub enum ClientError {
    /// Configuration error.
    Config(ConfigError),
    /// IO error.
    Io(std::io::Error),
    /// Logging could not be set up.
    Tracing(TracingError),
    /// Connecting or sending failed.
    Transport(TransportError),
    /// A request failed.
    Request(RequestError),
    /// A call operation failed.
    Signaling(SignalingError),
    /// Bad command-line input.
    Usage(String),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(err) => write!(f, "configuration error: {}", err),
            Self::Io(err) => write!(f, "IO error: {}", err),
            Self::Tracing(err) => write!(f, "logging setup failed: {}", err),
            Self::Transport(err) => write!(f, "connection error: {}", err),
            Self::Request(err) => write!(f, "request failed: {}", err),
            Self::Signaling(err) => write!(f, "call error: {}", err),
            Self::Usage(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Config(err) => Some(err),
            Self::Io(err) => Some(err),
            Self::Tracing(err) => Some(err),
            Self::Transport(err) => Some(err),
            Self::Request(err) => Some(err),
            Self::Signaling(err) => Some(err),
            Self::Usage(_) => None,
        }
    }
}

impl From<ConfigError> for ClientError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err)
    }
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<TracingError> for ClientError {
    fn from(err: TracingError) -> Self {
        Self::Tracing(err)
    }
}

impl From<TransportError> for ClientError {
    fn from(err: TransportError) -> Self {
        Self::Transport(err)
    }
}

impl From<RequestError> for ClientError {
    fn from(err: RequestError) -> Self {
        Self::Request(err)
    }
}

impl From<SignalingError> for ClientError {
    fn from(err: SignalingError) -> Self {
        Self::Signaling(err)
    }
}
