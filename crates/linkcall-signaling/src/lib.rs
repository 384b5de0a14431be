//! Call signaling for linkcall.
//!
//! This crate drives one peer-to-peer call at a time:
//!
//! - [`MediaEngine`], [`PeerConnection`], [`MediaStream`] - The platform media capability
//! - [`CallResources`] - Owned media handles, released on every exit path
//! - [`SignalingMachine`] - The offer/answer/candidate state machine
//! - [`SignalingChannel`] - Where outgoing signals go (the transport)
//!
//! # Architecture
//!
//! ```text
//!   caller ops          remote signals          peer events
//!  start/accept/end    offer/answer/ice     candidate/ice state/stream
//!        │                    │                      │
//!        └────────────────────┼──────────────────────┘
//!                             ▼
//!                   ┌──────────────────┐
//!                   │ SignalingMachine │──▶ EventBus notifications
//!                   └────────┬─────────┘
//!                            │ Signal (targetUserId)
//!                            ▼
//!                   ┌──────────────────┐
//!                   │ SignalingChannel │
//!                   └──────────────────┘
//! ```

pub mod error;
pub mod machine;
pub mod media;
pub mod session;

pub use error::{SignalingError, SignalingResult};
pub use machine::{PeerEvents, SignalingChannel, SignalingMachine};
pub use media::{
    BoxFuture, IceServer, MediaConstraints, MediaEngine, MediaStream, PeerConfig, PeerConnection,
    PeerEvent, PeerEventSink, SessionId, SharedStream, TrackInfo, TrackKind,
};
pub use session::{CallError, CallResources, CallSession, CallSnapshot, CallState, Direction};
