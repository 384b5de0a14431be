//! Transport, request correlation, routing and CLI
//!
//! This crate provides the linkcall [`Client`] and the `linkcall`
//! command-line interface.
//!
//! ```text
//!   Client::call ──▶ Correlator ──▶ Transport ──▶ WebSocket
//!                        ▲              │
//!                        │ settle       │ TransportEvent
//!                        │              ▼
//!                        └──────────  Router ──▶ SignalingMachine
//!                                       │
//!                                       └─────▶ EventBus
//! ```

pub mod cli;
pub mod client;
pub mod commands;
pub mod config;
pub mod correlator;
pub mod error;
pub mod router;
pub mod secret;
pub mod transport;

pub use cli::Cli;
pub use client::Client;
pub use config::{ClientConfig, ConfigError};
pub use correlator::{Correlator, CorrelatorConfig, RequestError};
pub use error::{ClientError, ClientResult};
pub use router::Router;
pub use transport::{
    ConnectionSnapshot, DisconnectReason, FrameSink, HeartbeatConfig, LinkId, LinkState,
    ReconnectPolicy, Transport, TransportConfig, TransportError, TransportEvent, TransportEvents,
    TransportResult,
};
