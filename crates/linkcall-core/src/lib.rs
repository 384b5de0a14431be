//! Core types: call domain, notification bus, tracing

pub mod bus;
pub mod call;
pub mod tracing;

pub use bus::{DEFAULT_BUS_CAPACITY, EventBus, Notification};
pub use call::{CallKind, IceCandidate, IceConnectionState, SdpType, SessionDescription, UserId};
pub use tracing::{TracingConfig, TracingError, TracingOutputFormat, init_tracing};
