//! Wire protocol for linkcall.
//!
//! Every WebSocket text frame is one JSON [`Message`]:
//!
//! ```text
//! { "event": "<class>:<name>", "status"?: int, "payload"?: object, "timestamp"?: int }
//! ```
//!
//! The class prefix decides routing, decoded once into [`EventKind`]:
//! - `service:*`: control plane (`ping`, `pong`, `connection_established`,
//!   `connection_closed`, `error`)
//! - `broadcast:*`: server push, including call signaling ([`Signal`])
//! - `api/*` or `api:*`: replies to requests, correlated by route
//!
//! # Example
//!
//! ```rust
//! use linkcall_protocol::{decode_message, EventKind};
//!
//! let msg = decode_message(r#"{"event":"api/login","status":200}"#).unwrap();
//! assert_eq!(msg.kind(), EventKind::ApiResponse("login"));
//! ```

mod close;
mod error;
mod framing;
mod signaling;
mod types;

pub use close::{ClosePolicy, NON_RETRYABLE, UNAUTHORIZED};
pub use error::{ProtocolError, ProtocolResult};
pub use framing::{decode_message, encode_message};
pub use signaling::{
    CALL_ANSWER, CALL_OFFER, CallAnswer, CallOffer, CandidateSignal, ICE_CANDIDATE, Signal,
};
pub use types::{
    API_CLASS, ApiError, BROADCAST_CLASS, EventKind, Message, PING, PONG, SERVICE_CLASS,
    ServiceEvent, to_payload,
};

/// Maximum frame size accepted in either direction (1 MB).
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;
