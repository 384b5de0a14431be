//! Media capability traits.
//!
//! Capturing camera/microphone streams, generating SDP and gathering ICE
//! candidates are platform concerns. The state machine only talks to them
//! through the traits in this module:
//!
//! - [`MediaEngine`] acquires local media and creates peer connections
//! - [`PeerConnection`] performs the offer/answer/candidate operations
//! - [`MediaStream`] is a handle on a set of tracks
//!
//! Asynchronous notifications from a peer connection (gathered candidates,
//! connectivity changes, remote tracks) go back through the [`PeerEventSink`]
//! handed to [`MediaEngine::create_peer_connection`].

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use linkcall_core::{CallKind, IceCandidate, IceConnectionState, SessionDescription};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::SignalingResult;

/// A boxed future for object-safe async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A media stream shared between the call session and its peer connection.
pub type SharedStream = Arc<dyn MediaStream>;

/// Kind of a media track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

/// Snapshot of one track of a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackInfo {
    pub id: String,
    pub kind: TrackKind,
    pub enabled: bool,
}

/// Which devices to capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl MediaConstraints {
    /// Audio always; video only for video calls.
    pub fn for_call(kind: CallKind) -> Self {
        Self {
            audio: true,
            video: kind.wants_video(),
        }
    }
}

/// One ICE server entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServer {
    /// A credential-less server (STUN).
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }

    /// Builder: set TURN credentials.
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        credential: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.credential = Some(credential.into());
        self
    }
}

/// Configuration for new peer connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerConfig {
    pub ice_servers: Vec<IceServer>,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![
                IceServer::new("stun:stun.l.google.com:19302"),
                IceServer::new("stun:stun1.l.google.com:19302"),
                IceServer::new("stun:stun2.l.google.com:19302"),
            ],
        }
    }
}

impl PeerConfig {
    /// Creates a config from a list of server URLs.
    pub fn from_urls<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ice_servers: urls.into_iter().map(IceServer::new).collect(),
        }
    }
}

/// Identifies one call session; peer events are tagged with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Asynchronous notification from a peer connection.
pub enum PeerEvent {
    /// A local candidate was gathered and must reach the counterpart.
    LocalCandidate(IceCandidate),
    /// Connectivity state changed.
    IceState(IceConnectionState),
    /// The counterpart's media arrived.
    RemoteStream(SharedStream),
}

impl fmt::Debug for PeerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LocalCandidate(c) => f.debug_tuple("LocalCandidate").field(c).finish(),
            Self::IceState(s) => f.debug_tuple("IceState").field(s).finish(),
            Self::RemoteStream(s) => f.debug_tuple("RemoteStream").field(&s.id()).finish(),
        }
    }
}

/// Sender half handed to a peer connection for its events.
#[derive(Debug, Clone)]
pub struct PeerEventSink {
    session: SessionId,
    tx: mpsc::UnboundedSender<(SessionId, PeerEvent)>,
}

impl PeerEventSink {
    pub(crate) fn new(session: SessionId, tx: mpsc::UnboundedSender<(SessionId, PeerEvent)>) -> Self {
        Self { session, tx }
    }

    /// Returns the session this sink reports for.
    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Reports an event. Events sent after the machine is gone are dropped.
    pub fn emit(&self, event: PeerEvent) {
        let _ = self.tx.send((self.session, event));
    }

    pub fn local_candidate(&self, candidate: IceCandidate) {
        self.emit(PeerEvent::LocalCandidate(candidate));
    }

    pub fn ice_state(&self, state: IceConnectionState) {
        self.emit(PeerEvent::IceState(state));
    }

    pub fn remote_stream(&self, stream: SharedStream) {
        self.emit(PeerEvent::RemoteStream(stream));
    }
}

/// A handle on captured or received media.
///
/// Implementations use interior mutability; handles are shared.
pub trait MediaStream: Send + Sync {
    /// Stable stream id.
    fn id(&self) -> &str;

    /// Current tracks.
    fn tracks(&self) -> Vec<TrackInfo>;

    /// Enables or disables one track without stopping it.
    fn set_track_enabled(&self, track_id: &str, enabled: bool);

    /// Stops every track. Must be idempotent.
    fn stop(&self);
}

/// One peer-to-peer media session.
pub trait PeerConnection: Send {
    /// Attaches every track of `stream` for sending.
    fn add_stream(&mut self, stream: SharedStream) -> SignalingResult<()>;

    /// Produces a local offer.
    fn create_offer(&mut self) -> BoxFuture<'_, SignalingResult<SessionDescription>>;

    /// Produces a local answer to the installed remote offer.
    fn create_answer(&mut self) -> BoxFuture<'_, SignalingResult<SessionDescription>>;

    /// Installs the local description, starting candidate gathering.
    fn set_local_description(
        &mut self,
        description: SessionDescription,
    ) -> BoxFuture<'_, SignalingResult<()>>;

    /// Installs the counterpart's description.
    fn set_remote_description(
        &mut self,
        description: SessionDescription,
    ) -> BoxFuture<'_, SignalingResult<()>>;

    /// Adds a candidate received from the counterpart.
    fn add_ice_candidate(&mut self, candidate: IceCandidate) -> BoxFuture<'_, SignalingResult<()>>;

    /// Closes the connection. Must be idempotent.
    fn close(&mut self);
}

/// Platform media capability.
pub trait MediaEngine: Send + Sync {
    /// Captures local media matching `constraints`.
    fn acquire_local_media(
        &self,
        constraints: MediaConstraints,
    ) -> BoxFuture<'_, SignalingResult<SharedStream>>;

    /// Creates a peer connection reporting its events to `events`.
    fn create_peer_connection(
        &self,
        config: &PeerConfig,
        events: PeerEventSink,
    ) -> SignalingResult<Box<dyn PeerConnection>>;
}
