//! Process-wide notification bus.
//!
//! The bus is an explicitly constructed value: the composition root creates
//! one and hands clones to every component that publishes. Subscribers get a
//! [`tokio::sync::broadcast`] receiver and see every notification published
//! after they subscribed.

use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tracing::trace;

use crate::call::{CallKind, IceCandidate, SessionDescription, UserId};

/// Default number of notifications buffered per subscriber.
pub const DEFAULT_BUS_CAPACITY: usize = 256;

/// A notification delivered to the rest of the application.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// The server rejected our credentials; the user must log in again.
    Unauthorized,
    /// A server broadcast with no dedicated handler, forwarded raw.
    Broadcast {
        /// Event name after the `broadcast:` prefix.
        name: String,
        /// Event payload (empty when the frame had none).
        payload: Map<String, Value>,
    },
    /// A remote party is calling us.
    CallOffer {
        /// Caller identity, when the server relays it.
        from: Option<UserId>,
        /// Audio or video.
        call_type: CallKind,
        /// The remote offer to pass to `accept_call`.
        offer: SessionDescription,
    },
    /// The callee answered our offer.
    CallAnswer { answer: SessionDescription },
    /// The counterpart sent an ICE candidate.
    IceCandidate { candidate: IceCandidate },
    /// A remote media stream became available.
    RemoteStreamUpdated { stream_id: String },
    /// Local capture started.
    LocalStreamUpdated { stream_id: String },
    /// Local and remote streams were released.
    StreamsCleared,
    /// The call ended without the user asking for it.
    CallEnded { reason: String },
}

impl Notification {
    /// Returns the stable name of this notification.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::Broadcast { .. } => "broadcast",
            Self::CallOffer { .. } => "webrtc_call_offer",
            Self::CallAnswer { .. } => "webrtc_call_answer",
            Self::IceCandidate { .. } => "webrtc_ice_candidate",
            Self::RemoteStreamUpdated { .. } => "webrtc_remote_stream_updated",
            Self::LocalStreamUpdated { .. } => "webrtc_local_stream_updated",
            Self::StreamsCleared => "webrtc_streams_cleared",
            Self::CallEnded { .. } => "webrtc_call_ended",
        }
    }
}

/// Publish/subscribe channel for [`Notification`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Notification>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}

impl EventBus {
    /// Creates a bus buffering up to `capacity` notifications per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes a notification and returns how many subscribers received it.
    ///
    /// Publishing with no subscribers is not an error.
    pub fn publish(&self, notification: Notification) -> usize {
        trace!(name = notification.name(), "publishing notification");
        self.sender.send(notification).unwrap_or(0)
    }

    /// Subscribes to notifications published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }

    /// Returns the current number of subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
