//! Call session state and owned call resources.

use std::fmt;

use linkcall_core::{CallKind, UserId};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::media::{PeerConnection, SessionId, SharedStream, TrackInfo, TrackKind};

/// Lifecycle state of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CallState {
    Idle,
    OutgoingNegotiating,
    IncomingNegotiating,
    Connected,
    /// Connectivity was lost; the call may still recover.
    Ended,
}

impl CallState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::OutgoingNegotiating => "outgoing-negotiating",
            Self::IncomingNegotiating => "incoming-negotiating",
            Self::Connected => "connected",
            Self::Ended => "ended",
        }
    }

    pub fn is_negotiating(self) -> bool {
        matches!(self, Self::OutgoingNegotiating | Self::IncomingNegotiating)
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who placed the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Outgoing,
    Incoming,
}

/// Error recorded on a call, surfaced through [`CallSnapshot`].
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallError {
    #[error("connection failed")]
    ConnectionFailed,
    #[error("media access denied")]
    MediaAccessDenied,
    #[error("negotiation failed: {0}")]
    Negotiation(String),
}

/// Media handles owned by one call.
///
/// Releasing stops local tracks and closes the peer connection. Release is
/// idempotent and also runs when the value is dropped, so every exit path of
/// a call gives its devices back.
#[derive(Default)]
pub struct CallResources {
    peer: Option<Box<dyn PeerConnection>>,
    local: Option<SharedStream>,
    remote: Option<SharedStream>,
}

impl CallResources {
    /// Takes ownership of freshly captured local media.
    pub fn with_local(local: SharedStream) -> Self {
        Self {
            peer: None,
            local: Some(local),
            remote: None,
        }
    }

    pub fn set_peer(&mut self, peer: Box<dyn PeerConnection>) {
        self.peer = Some(peer);
    }

    pub fn peer_mut(&mut self) -> Option<&mut (dyn PeerConnection + 'static)> {
        self.peer.as_deref_mut()
    }

    pub fn local(&self) -> Option<&SharedStream> {
        self.local.as_ref()
    }

    pub fn remote(&self) -> Option<&SharedStream> {
        self.remote.as_ref()
    }

    /// Replaces the remote stream handle.
    pub fn set_remote(&mut self, remote: SharedStream) {
        self.remote = Some(remote);
    }

    /// Returns true if nothing is held.
    pub fn is_empty(&self) -> bool {
        self.peer.is_none() && self.local.is_none() && self.remote.is_none()
    }

    /// Stops local tracks, closes the peer connection and drops stream
    /// references. Returns true if anything was held.
    pub fn release(&mut self) -> bool {
        let held = !self.is_empty();
        if let Some(local) = self.local.take() {
            debug!(stream = local.id(), "stopping local media");
            local.stop();
        }
        if let Some(mut peer) = self.peer.take() {
            peer.close();
        }
        self.remote = None;
        held
    }
}

impl Drop for CallResources {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for CallResources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallResources")
            .field("peer", &self.peer.is_some())
            .field("local", &self.local.as_ref().map(|s| s.id().to_string()))
            .field("remote", &self.remote.as_ref().map(|s| s.id().to_string()))
            .finish()
    }
}

/// The single active call of a signaling machine.
#[derive(Debug)]
pub struct CallSession {
    pub id: SessionId,
    pub kind: CallKind,
    pub direction: Direction,
    pub counterpart: UserId,
    pub state: CallState,
    /// Connectivity checks are running.
    pub connecting: bool,
    pub error: Option<CallError>,
    pub resources: CallResources,
}

impl CallSession {
    pub fn new(
        id: SessionId,
        kind: CallKind,
        direction: Direction,
        counterpart: UserId,
        resources: CallResources,
    ) -> Self {
        let state = match direction {
            Direction::Outgoing => CallState::OutgoingNegotiating,
            Direction::Incoming => CallState::IncomingNegotiating,
        };
        Self {
            id,
            kind,
            direction,
            counterpart,
            state,
            connecting: false,
            error: None,
            resources,
        }
    }

    /// Flips the first local track of `kind`. Returns the new enabled flag.
    pub fn toggle_local(&self, kind: TrackKind) -> Option<bool> {
        let local = self.resources.local()?;
        let track = local.tracks().into_iter().find(|t| t.kind == kind)?;
        let enabled = !track.enabled;
        local.set_track_enabled(&track.id, enabled);
        Some(enabled)
    }
}

/// Point-in-time view of the call for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallSnapshot {
    pub session_id: Option<SessionId>,
    pub state: CallState,
    pub kind: Option<CallKind>,
    pub direction: Option<Direction>,
    pub counterpart: Option<UserId>,
    pub connecting: bool,
    pub connected: bool,
    pub local_stream_id: Option<String>,
    pub remote_stream_id: Option<String>,
    pub local_audio_enabled: bool,
    pub local_video_enabled: bool,
    pub remote_audio_enabled: bool,
    pub remote_video_enabled: bool,
    pub error: Option<CallError>,
}

impl CallSnapshot {
    /// Snapshot with no active call.
    pub fn idle(error: Option<CallError>) -> Self {
        Self {
            session_id: None,
            state: CallState::Idle,
            kind: None,
            direction: None,
            counterpart: None,
            connecting: false,
            connected: false,
            local_stream_id: None,
            remote_stream_id: None,
            local_audio_enabled: false,
            local_video_enabled: false,
            remote_audio_enabled: false,
            remote_video_enabled: false,
            error,
        }
    }

    pub fn of(session: &CallSession) -> Self {
        let local = session.resources.local();
        let remote = session.resources.remote();
        let local_tracks = local.map(|s| s.tracks()).unwrap_or_default();
        let remote_tracks = remote.map(|s| s.tracks()).unwrap_or_default();

        Self {
            session_id: Some(session.id),
            state: session.state,
            kind: Some(session.kind),
            direction: Some(session.direction),
            counterpart: Some(session.counterpart.clone()),
            connecting: session.connecting,
            connected: session.state == CallState::Connected,
            local_stream_id: local.map(|s| s.id().to_string()),
            remote_stream_id: remote.map(|s| s.id().to_string()),
            local_audio_enabled: any_enabled(&local_tracks, TrackKind::Audio),
            local_video_enabled: any_enabled(&local_tracks, TrackKind::Video),
            remote_audio_enabled: any_enabled(&remote_tracks, TrackKind::Audio),
            remote_video_enabled: any_enabled(&remote_tracks, TrackKind::Video),
            error: session.error.clone(),
        }
    }
}

fn any_enabled(tracks: &[TrackInfo], kind: TrackKind) -> bool {
    tracks.iter().any(|t| t.kind == kind && t.enabled)
}
