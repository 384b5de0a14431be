//! The per-call signaling state machine.
//!
//! ```text
//! idle ─start_call─▶ outgoing-negotiating ─┐
//!                                          ├─ice connected─▶ connected ─ice disconnected─▶ ended
//! idle ─accept_call─▶ incoming-negotiating ┘
//! ```
//!
//! Any failure, an ICE `failed`/`closed` report, or [`SignalingMachine::end_call`]
//! releases the call's resources and returns to idle. A `disconnected` report
//! moves to `ended` but keeps the resources so the connection can recover.
//!
//! All operations and peer events take the same async lock, so they apply to
//! the session in arrival order.

use std::sync::{Arc, Weak};

use linkcall_core::{
    CallKind, EventBus, IceCandidate, IceConnectionState, Notification, SessionDescription,
    UserId,
};
use linkcall_protocol::Signal;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{SignalingError, SignalingResult};
use crate::media::{
    BoxFuture, MediaConstraints, MediaEngine, PeerConfig, PeerEvent, PeerEventSink, SessionId,
    SharedStream, TrackKind,
};
use crate::session::{CallError, CallResources, CallSession, CallSnapshot, CallState, Direction};

/// Receiver for peer events, drained by [`SignalingMachine::spawn_event_loop`].
pub type PeerEvents = mpsc::UnboundedReceiver<(SessionId, PeerEvent)>;

/// Delivers signaling messages to the counterpart through the server relay.
pub trait SignalingChannel: Send + Sync {
    fn send_signal(&self, signal: Signal) -> BoxFuture<'_, SignalingResult<()>>;
}

#[derive(Default)]
struct Slot {
    session: Option<CallSession>,
    /// Error of the last call that tore itself down.
    last_error: Option<CallError>,
}

struct Inner {
    engine: Arc<dyn MediaEngine>,
    channel: Arc<dyn SignalingChannel>,
    bus: EventBus,
    peer_config: PeerConfig,
    slot: Mutex<Slot>,
    events_tx: mpsc::UnboundedSender<(SessionId, PeerEvent)>,
}

/// Drives one call at a time. Cheap to clone.
#[derive(Clone)]
pub struct SignalingMachine {
    inner: Arc<Inner>,
}

impl SignalingMachine {
    /// Creates a machine and the receiver its peer connections report to.
    pub fn new(
        engine: Arc<dyn MediaEngine>,
        channel: Arc<dyn SignalingChannel>,
        bus: EventBus,
        peer_config: PeerConfig,
    ) -> (Self, PeerEvents) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let inner = Inner {
            engine,
            channel,
            bus,
            peer_config,
            slot: Mutex::new(Slot::default()),
            events_tx,
        };
        (
            Self {
                inner: Arc::new(inner),
            },
            events_rx,
        )
    }

    /// Spawns the task applying peer events in order.
    ///
    /// The task holds a weak reference and exits once the machine is dropped.
    pub fn spawn_event_loop(&self, mut events: PeerEvents) -> JoinHandle<()> {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            while let Some((session, event)) = events.recv().await {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                SignalingMachine { inner }
                    .handle_peer_event(session, event)
                    .await;
            }
            debug!("peer event loop stopped");
        })
    }

    /// Current call state.
    pub async fn state(&self) -> CallState {
        let slot = self.inner.slot.lock().await;
        slot.session
            .as_ref()
            .map_or(CallState::Idle, |s| s.state)
    }

    /// Point-in-time view of the call.
    pub async fn snapshot(&self) -> CallSnapshot {
        let slot = self.inner.slot.lock().await;
        match slot.session {
            Some(ref session) => CallSnapshot::of(session),
            None => CallSnapshot::idle(slot.last_error.clone()),
        }
    }

    /// Places a call to `counterpart`.
    ///
    /// # Errors
    ///
    /// [`SignalingError::Precondition`] if a call is already active;
    /// [`SignalingError::MediaAccessDenied`] if capture fails. On any error
    /// the machine is idle afterwards.
    pub async fn start_call(&self, kind: CallKind, counterpart: UserId) -> SignalingResult<()> {
        let mut slot = self.inner.slot.lock().await;
        ensure_idle(&slot, "start_call")?;
        slot.last_error = None;

        let (id, mut resources) = self.prepare(kind).await?;
        info!(session = %id, %kind, counterpart = %counterpart, "starting call");

        let offer = match negotiate_offer(&mut resources).await {
            Ok(offer) => offer,
            Err(e) => {
                warn!(session = %id, error = %e, "offer negotiation failed");
                return Err(e);
            }
        };

        let local_id = stream_id(resources.local());
        slot.session = Some(CallSession::new(
            id,
            kind,
            Direction::Outgoing,
            counterpart.clone(),
            resources,
        ));

        let signal = Signal::offer(counterpart, kind, offer);
        if let Err(e) = self.inner.channel.send_signal(signal).await {
            warn!(session = %id, error = %e, "failed to send offer");
            slot.session = None;
            return Err(e);
        }

        self.publish_local(local_id);
        Ok(())
    }

    /// Answers a call offered by `counterpart`.
    ///
    /// # Errors
    ///
    /// Same as [`start_call`](Self::start_call).
    pub async fn accept_call(
        &self,
        kind: CallKind,
        offer: SessionDescription,
        counterpart: UserId,
    ) -> SignalingResult<()> {
        let mut slot = self.inner.slot.lock().await;
        ensure_idle(&slot, "accept_call")?;
        slot.last_error = None;

        let (id, mut resources) = self.prepare(kind).await?;
        info!(session = %id, %kind, counterpart = %counterpart, "accepting call");

        let answer = match negotiate_answer(&mut resources, offer).await {
            Ok(answer) => answer,
            Err(e) => {
                warn!(session = %id, error = %e, "answer negotiation failed");
                return Err(e);
            }
        };

        let local_id = stream_id(resources.local());
        slot.session = Some(CallSession::new(
            id,
            kind,
            Direction::Incoming,
            counterpart.clone(),
            resources,
        ));

        if let Err(e) = self
            .inner
            .channel
            .send_signal(Signal::answer(counterpart, answer))
            .await
        {
            warn!(session = %id, error = %e, "failed to send answer");
            slot.session = None;
            return Err(e);
        }

        self.publish_local(local_id);
        Ok(())
    }

    /// Installs the callee's answer.
    ///
    /// Reaching `connected` is driven by the ICE state, not by this call.
    pub async fn handle_answer(&self, answer: SessionDescription) -> SignalingResult<()> {
        let mut slot = self.inner.slot.lock().await;
        let state = slot.session.as_ref().map_or(CallState::Idle, |s| s.state);
        if state != CallState::OutgoingNegotiating {
            return Err(SignalingError::Precondition {
                operation: "handle_answer",
                state,
            });
        }

        let Some(session) = slot.session.as_mut() else {
            return Err(SignalingError::Precondition {
                operation: "handle_answer",
                state,
            });
        };
        let id = session.id;
        let result = match session.resources.peer_mut() {
            Some(peer) => peer.set_remote_description(answer).await,
            None => Err(SignalingError::peer("no peer connection")),
        };

        if let Err(e) = result {
            warn!(session = %id, error = %e, "failed to install answer");
            self.tear_down(&mut slot, Some(CallError::Negotiation(e.to_string())));
            return Err(e);
        }
        debug!(session = %id, "remote answer installed");
        Ok(())
    }

    /// Adds a remote candidate to the active call.
    ///
    /// Returns `Ok(false)` when no call is active; the candidate is dropped
    /// and nothing changes.
    pub async fn handle_ice_candidate(&self, candidate: IceCandidate) -> SignalingResult<bool> {
        let mut slot = self.inner.slot.lock().await;
        let Some(session) = slot.session.as_mut() else {
            warn!(candidate = %candidate.candidate, "dropping ICE candidate, no active call");
            return Ok(false);
        };
        let Some(peer) = session.resources.peer_mut() else {
            warn!(session = %session.id, "dropping ICE candidate, no peer connection");
            return Ok(false);
        };
        peer.add_ice_candidate(candidate).await?;
        Ok(true)
    }

    /// Applies a signaling broadcast received from the server.
    ///
    /// Offers are only announced; the user decides whether to
    /// [`accept_call`](Self::accept_call).
    pub async fn handle_signal(&self, signal: Signal) -> SignalingResult<()> {
        match signal {
            Signal::Offer(offer) => {
                info!(from = ?offer.from_user_id, kind = %offer.call_type, "incoming call");
                self.inner.bus.publish(Notification::CallOffer {
                    from: offer.from_user_id,
                    call_type: offer.call_type,
                    offer: offer.offer,
                });
                Ok(())
            }
            Signal::Answer(answer) => {
                let description = answer.answer.clone();
                self.handle_answer(answer.answer).await?;
                self.inner.bus.publish(Notification::CallAnswer {
                    answer: description,
                });
                Ok(())
            }
            Signal::Candidate(signal) => {
                let candidate = signal.candidate.clone();
                if self.handle_ice_candidate(signal.candidate).await? {
                    self.inner
                        .bus
                        .publish(Notification::IceCandidate { candidate });
                }
                Ok(())
            }
        }
    }

    /// Applies one event reported by a peer connection.
    ///
    /// Events tagged with a session other than the active one are stale and
    /// ignored.
    pub async fn handle_peer_event(&self, session_id: SessionId, event: PeerEvent) {
        let mut slot = self.inner.slot.lock().await;
        let Some(session) = slot.session.as_mut().filter(|s| s.id == session_id) else {
            debug!(session = %session_id, ?event, "ignoring event for inactive session");
            return;
        };

        match event {
            PeerEvent::LocalCandidate(candidate) => {
                let signal = Signal::candidate(session.counterpart.clone(), candidate);
                if let Err(e) = self.inner.channel.send_signal(signal).await {
                    warn!(session = %session_id, error = %e, "failed to send ICE candidate");
                }
            }
            PeerEvent::RemoteStream(stream) => {
                let stream_id = stream.id().to_string();
                session.resources.set_remote(stream);
                info!(session = %session_id, stream = %stream_id, "remote stream attached");
                self.inner
                    .bus
                    .publish(Notification::RemoteStreamUpdated { stream_id });
            }
            PeerEvent::IceState(state) => {
                debug!(session = %session_id, ?state, "ice state changed");
                match state {
                    IceConnectionState::New | IceConnectionState::Checking => {
                        session.connecting = true;
                    }
                    IceConnectionState::Connected | IceConnectionState::Completed => {
                        if session.state != CallState::Connected {
                            info!(session = %session_id, "call connected");
                        }
                        session.state = CallState::Connected;
                        session.connecting = false;
                        session.error = None;
                    }
                    IceConnectionState::Disconnected => {
                        session.state = CallState::Ended;
                        session.connecting = false;
                    }
                    IceConnectionState::Failed => {
                        self.tear_down(&mut slot, Some(CallError::ConnectionFailed));
                    }
                    IceConnectionState::Closed => {
                        self.tear_down(&mut slot, None);
                    }
                }
            }
        }
    }

    /// Ends the active call, if any.
    ///
    /// Idempotent. Returns true if a call was torn down.
    pub async fn end_call(&self) -> bool {
        let mut slot = self.inner.slot.lock().await;
        slot.last_error = None;
        let Some(mut session) = slot.session.take() else {
            return false;
        };
        info!(session = %session.id, "ending call");
        if session.resources.release() {
            self.inner.bus.publish(Notification::StreamsCleared);
        }
        true
    }

    /// Flips the local camera. Returns the new enabled flag, or `None`
    /// without an active video track.
    pub async fn toggle_local_video(&self) -> Option<bool> {
        self.toggle_local(TrackKind::Video).await
    }

    /// Flips the local microphone. Returns the new enabled flag, or `None`
    /// without an active audio track.
    pub async fn toggle_local_audio(&self) -> Option<bool> {
        self.toggle_local(TrackKind::Audio).await
    }

    async fn toggle_local(&self, kind: TrackKind) -> Option<bool> {
        let slot = self.inner.slot.lock().await;
        slot.session.as_ref()?.toggle_local(kind)
    }

    /// Captures local media and creates a peer connection holding it.
    async fn prepare(&self, kind: CallKind) -> SignalingResult<(SessionId, CallResources)> {
        let local = self
            .inner
            .engine
            .acquire_local_media(MediaConstraints::for_call(kind))
            .await?;

        let id = SessionId::new();
        let mut resources = CallResources::with_local(local.clone());
        let sink = PeerEventSink::new(id, self.inner.events_tx.clone());
        let mut peer = self
            .inner
            .engine
            .create_peer_connection(&self.inner.peer_config, sink)?;
        let attached = peer.add_stream(local);
        resources.set_peer(peer);
        attached?;

        Ok((id, resources))
    }

    fn tear_down(&self, slot: &mut Slot, error: Option<CallError>) {
        let Some(mut session) = slot.session.take() else {
            return;
        };
        let reason = error
            .as_ref()
            .map_or_else(|| "connection closed".to_string(), ToString::to_string);
        info!(session = %session.id, %reason, "call ended");
        slot.last_error = error;
        if session.resources.release() {
            self.inner.bus.publish(Notification::StreamsCleared);
        }
        self.inner.bus.publish(Notification::CallEnded { reason });
    }

    fn publish_local(&self, stream_id: Option<String>) {
        if let Some(stream_id) = stream_id {
            self.inner
                .bus
                .publish(Notification::LocalStreamUpdated { stream_id });
        }
    }
}

fn ensure_idle(slot: &Slot, operation: &'static str) -> SignalingResult<()> {
    match slot.session {
        Some(ref session) => Err(SignalingError::Precondition {
            operation,
            state: session.state,
        }),
        None => Ok(()),
    }
}

fn stream_id(stream: Option<&SharedStream>) -> Option<String> {
    stream.map(|s| s.id().to_string())
}

async fn negotiate_offer(resources: &mut CallResources) -> SignalingResult<SessionDescription> {
    let peer = resources
        .peer_mut()
        .ok_or_else(|| SignalingError::peer("no peer connection"))?;
    let offer = peer.create_offer().await?;
    peer.set_local_description(offer.clone()).await?;
    Ok(offer)
}

async fn negotiate_answer(
    resources: &mut CallResources,
    offer: SessionDescription,
) -> SignalingResult<SessionDescription> {
    let peer = resources
        .peer_mut()
        .ok_or_else(|| SignalingError::peer("no peer connection"))?;
    peer.set_remote_description(offer).await?;
    let answer = peer.create_answer().await?;
    peer.set_local_description(answer.clone()).await?;
    Ok(answer)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use tokio::sync::broadcast;

    use super::*;
    use crate::media::{MediaStream, PeerConnection, TrackInfo};

    #[derive(Debug)]
    struct FakeStream {
        id: String,
        tracks: StdMutex<Vec<TrackInfo>>,
        stopped: AtomicBool,
    }

    impl FakeStream {
        fn new(id: &str, video: bool) -> Arc<Self> {
            let mut tracks = vec![TrackInfo {
                id: format!("{id}-audio"),
                kind: TrackKind::Audio,
                enabled: true,
            }];
            if video {
                tracks.push(TrackInfo {
                    id: format!("{id}-video"),
                    kind: TrackKind::Video,
                    enabled: true,
                });
            }
            Arc::new(Self {
                id: id.to_string(),
                tracks: StdMutex::new(tracks),
                stopped: AtomicBool::new(false),
            })
        }
    }

    impl MediaStream for FakeStream {
        fn id(&self) -> &str {
            &self.id
        }

        fn tracks(&self) -> Vec<TrackInfo> {
            self.tracks.lock().unwrap().clone()
        }

        fn set_track_enabled(&self, track_id: &str, enabled: bool) {
            for track in self.tracks.lock().unwrap().iter_mut() {
                if track.id == track_id {
                    track.enabled = enabled;
                }
            }
        }

        fn stop(&self) {
            self.stopped.store(true, Ordering::SeqCst);
        }
    }

    /// What the fake peer saw.
    #[derive(Debug, Default)]
    struct PeerLog {
        remote: Vec<SessionDescription>,
        local: Vec<SessionDescription>,
        candidates: Vec<IceCandidate>,
        closed: usize,
    }

    struct FakePeer {
        log: Arc<StdMutex<PeerLog>>,
        fail_offer: bool,
        fail_remote: bool,
    }

    impl PeerConnection for FakePeer {
        fn add_stream(&mut self, _stream: SharedStream) -> SignalingResult<()> {
            Ok(())
        }

        fn create_offer(&mut self) -> BoxFuture<'_, SignalingResult<SessionDescription>> {
            let fail = self.fail_offer;
            Box::pin(async move {
                if fail {
                    Err(SignalingError::peer("offer rejected"))
                } else {
                    Ok(SessionDescription::offer("v=0 local-offer"))
                }
            })
        }

        fn create_answer(&mut self) -> BoxFuture<'_, SignalingResult<SessionDescription>> {
            Box::pin(async { Ok(SessionDescription::answer("v=0 local-answer")) })
        }

        fn set_local_description(
            &mut self,
            description: SessionDescription,
        ) -> BoxFuture<'_, SignalingResult<()>> {
            self.log.lock().unwrap().local.push(description);
            Box::pin(async { Ok(()) })
        }

        fn set_remote_description(
            &mut self,
            description: SessionDescription,
        ) -> BoxFuture<'_, SignalingResult<()>> {
            self.log.lock().unwrap().remote.push(description);
            let fail = self.fail_remote;
            Box::pin(async move {
                if fail {
                    Err(SignalingError::peer("bad answer"))
                } else {
                    Ok(())
                }
            })
        }

        fn add_ice_candidate(
            &mut self,
            candidate: IceCandidate,
        ) -> BoxFuture<'_, SignalingResult<()>> {
            self.log.lock().unwrap().candidates.push(candidate);
            Box::pin(async { Ok(()) })
        }

        fn close(&mut self) {
            self.log.lock().unwrap().closed += 1;
        }
    }

    #[derive(Default)]
    struct FakeEngine {
        deny_media: bool,
        fail_offer: bool,
        fail_remote: bool,
        log: Arc<StdMutex<PeerLog>>,
        local: StdMutex<Option<Arc<FakeStream>>>,
        sink: StdMutex<Option<PeerEventSink>>,
        peers: AtomicUsize,
    }

    impl FakeEngine {
        fn local(&self) -> Arc<FakeStream> {
            self.local.lock().unwrap().clone().unwrap()
        }

        fn sink(&self) -> PeerEventSink {
            self.sink.lock().unwrap().clone().unwrap()
        }
    }

    impl MediaEngine for FakeEngine {
        fn acquire_local_media(
            &self,
            constraints: MediaConstraints,
        ) -> BoxFuture<'_, SignalingResult<SharedStream>> {
            Box::pin(async move {
                if self.deny_media {
                    return Err(SignalingError::MediaAccessDenied("camera busy".into()));
                }
                let stream = FakeStream::new("local", constraints.video);
                *self.local.lock().unwrap() = Some(stream.clone());
                Ok(stream as SharedStream)
            })
        }

        fn create_peer_connection(
            &self,
            _config: &PeerConfig,
            events: PeerEventSink,
        ) -> SignalingResult<Box<dyn PeerConnection>> {
            self.peers.fetch_add(1, Ordering::SeqCst);
            *self.sink.lock().unwrap() = Some(events);
            Ok(Box::new(FakePeer {
                log: self.log.clone(),
                fail_offer: self.fail_offer,
                fail_remote: self.fail_remote,
            }))
        }
    }

    #[derive(Default)]
    struct FakeChannel {
        sent: StdMutex<Vec<Signal>>,
        fail: AtomicBool,
    }

    impl SignalingChannel for FakeChannel {
        fn send_signal(&self, signal: Signal) -> BoxFuture<'_, SignalingResult<()>> {
            Box::pin(async move {
                if self.fail.load(Ordering::SeqCst) {
                    return Err(SignalingError::channel("not connected"));
                }
                self.sent.lock().unwrap().push(signal);
                Ok(())
            })
        }
    }

    struct Harness {
        machine: SignalingMachine,
        events: PeerEvents,
        engine: Arc<FakeEngine>,
        channel: Arc<FakeChannel>,
        notifications: broadcast::Receiver<Notification>,
    }

    impl Harness {
        fn new(engine: FakeEngine) -> Self {
            let engine = Arc::new(engine);
            let channel = Arc::new(FakeChannel::default());
            let bus = EventBus::default();
            let notifications = bus.subscribe();
            let (machine, events) = SignalingMachine::new(
                engine.clone(),
                channel.clone(),
                bus,
                PeerConfig::default(),
            );
            Self {
                machine,
                events,
                engine,
                channel,
                notifications,
            }
        }

        /// Reports `event` through the peer's sink and applies it.
        async fn peer_event(&mut self, event: PeerEvent) {
            self.engine.sink().emit(event);
            let (session, event) = self.events.recv().await.unwrap();
            self.machine.handle_peer_event(session, event).await;
        }

        fn drain(&mut self) -> Vec<&'static str> {
            let mut names = Vec::new();
            while let Ok(n) = self.notifications.try_recv() {
                names.push(n.name());
            }
            names
        }

        fn sent(&self) -> Vec<Signal> {
            self.channel.sent.lock().unwrap().clone()
        }
    }

    fn bob() -> UserId {
        UserId::Number(7)
    }

    #[tokio::test]
    async fn outgoing_call_reaches_connected() {
        let mut h = Harness::new(FakeEngine::default());

        h.machine.start_call(CallKind::Video, bob()).await.unwrap();
        assert_eq!(h.machine.state().await, CallState::OutgoingNegotiating);

        let sent = h.sent();
        assert_eq!(sent.len(), 1);
        match &sent[0] {
            Signal::Offer(offer) => {
                assert_eq!(offer.target_user_id, Some(bob()));
                assert_eq!(offer.call_type, CallKind::Video);
                assert_eq!(offer.offer.sdp, "v=0 local-offer");
            }
            other => panic!("expected offer, got {other:?}"),
        }

        h.machine
            .handle_answer(SessionDescription::answer("v=0 remote"))
            .await
            .unwrap();
        // Answer alone does not connect.
        assert_eq!(h.machine.state().await, CallState::OutgoingNegotiating);

        h.peer_event(PeerEvent::IceState(IceConnectionState::Checking))
            .await;
        assert!(h.machine.snapshot().await.connecting);

        h.peer_event(PeerEvent::IceState(IceConnectionState::Connected))
            .await;
        let snapshot = h.machine.snapshot().await;
        assert_eq!(snapshot.state, CallState::Connected);
        assert!(snapshot.connected);
        assert!(!snapshot.connecting);
        assert!(snapshot.local_video_enabled);

        assert_eq!(h.drain(), vec!["webrtc_local_stream_updated"]);
    }

    #[tokio::test]
    async fn incoming_call_answers_with_target() {
        let h = Harness::new(FakeEngine::default());

        h.machine
            .accept_call(
                CallKind::Audio,
                SessionDescription::offer("v=0 remote-offer"),
                UserId::from("alice"),
            )
            .await
            .unwrap();

        assert_eq!(h.machine.state().await, CallState::IncomingNegotiating);
        {
            let log = h.engine.log.lock().unwrap();
            assert_eq!(log.remote, vec![SessionDescription::offer("v=0 remote-offer")]);
            assert_eq!(log.local, vec![SessionDescription::answer("v=0 local-answer")]);
        }
        assert_eq!(h.sent()[0].target(), Some(&UserId::from("alice")));
        assert!(!h.machine.snapshot().await.local_video_enabled);
    }

    #[tokio::test]
    async fn media_denied_stays_idle() {
        let h = Harness::new(FakeEngine {
            deny_media: true,
            ..FakeEngine::default()
        });

        let err = h.machine.start_call(CallKind::Video, bob()).await.unwrap_err();
        assert!(matches!(err, SignalingError::MediaAccessDenied(_)));
        assert_eq!(h.machine.state().await, CallState::Idle);
        assert_eq!(h.engine.peers.load(Ordering::SeqCst), 0);
        assert!(h.sent().is_empty());
    }

    #[tokio::test]
    async fn failed_negotiation_releases_media() {
        let h = Harness::new(FakeEngine {
            fail_offer: true,
            ..FakeEngine::default()
        });

        assert!(h.machine.start_call(CallKind::Video, bob()).await.is_err());
        assert_eq!(h.machine.state().await, CallState::Idle);
        assert!(h.engine.local().stopped.load(Ordering::SeqCst));
        assert_eq!(h.engine.log.lock().unwrap().closed, 1);
    }

    #[tokio::test]
    async fn failed_offer_delivery_releases_media() {
        let h = Harness::new(FakeEngine::default());
        h.channel.fail.store(true, Ordering::SeqCst);

        let err = h.machine.start_call(CallKind::Audio, bob()).await.unwrap_err();
        assert!(matches!(err, SignalingError::Channel(_)));
        assert_eq!(h.machine.state().await, CallState::Idle);
        assert!(h.engine.local().stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn second_call_is_rejected() {
        let h = Harness::new(FakeEngine::default());
        h.machine.start_call(CallKind::Audio, bob()).await.unwrap();

        let err = h
            .machine
            .start_call(CallKind::Audio, UserId::Number(9))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SignalingError::Precondition {
                operation: "start_call",
                state: CallState::OutgoingNegotiating
            }
        ));
        assert_eq!(h.engine.peers.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn answer_without_outgoing_call_is_precondition() {
        let h = Harness::new(FakeEngine::default());
        let err = h
            .machine
            .handle_answer(SessionDescription::answer("v=0"))
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "handle_answer is not valid while the call is idle"
        );
    }

    #[tokio::test]
    async fn answer_signal_while_idle_is_not_announced() {
        let mut h = Harness::new(FakeEngine::default());

        let signal = Signal::answer(bob(), SessionDescription::answer("v=0 stray"));
        let err = h.machine.handle_signal(signal).await.unwrap_err();

        assert!(matches!(
            err,
            SignalingError::Precondition {
                operation: "handle_answer",
                state: CallState::Idle
            }
        ));
        assert!(h.drain().is_empty());
    }

    #[tokio::test]
    async fn answer_signal_is_announced_once_installed() {
        let mut h = Harness::new(FakeEngine::default());
        h.machine.start_call(CallKind::Audio, bob()).await.unwrap();
        h.drain();

        let signal = Signal::answer(bob(), SessionDescription::answer("v=0 remote"));
        h.machine.handle_signal(signal).await.unwrap();

        assert_eq!(h.drain(), vec!["webrtc_call_answer"]);
        assert_eq!(
            h.engine.log.lock().unwrap().remote,
            vec![SessionDescription::answer("v=0 remote")]
        );
    }

    #[tokio::test]
    async fn rejected_answer_ends_the_call() {
        let mut h = Harness::new(FakeEngine {
            fail_remote: true,
            ..FakeEngine::default()
        });
        h.machine.start_call(CallKind::Video, bob()).await.unwrap();
        h.drain();

        let err = h
            .machine
            .handle_answer(SessionDescription::answer("v=0 remote"))
            .await
            .unwrap_err();
        assert!(matches!(err, SignalingError::Peer(_)));

        assert_eq!(
            h.drain(),
            vec!["webrtc_streams_cleared", "webrtc_call_ended"]
        );
        let snapshot = h.machine.snapshot().await;
        assert_eq!(snapshot.state, CallState::Idle);
        assert!(matches!(snapshot.error, Some(CallError::Negotiation(_))));
        assert!(h.engine.local().stopped.load(Ordering::SeqCst));
        assert_eq!(h.engine.log.lock().unwrap().closed, 1);
    }

    #[tokio::test]
    async fn candidate_while_idle_is_dropped() {
        let mut h = Harness::new(FakeEngine::default());

        let applied = h
            .machine
            .handle_ice_candidate(IceCandidate::new("candidate:1"))
            .await
            .unwrap();

        assert!(!applied);
        assert_eq!(h.machine.snapshot().await, CallSnapshot::idle(None));
        assert!(h.drain().is_empty());
    }

    #[tokio::test]
    async fn remote_candidates_reach_the_peer() {
        let mut h = Harness::new(FakeEngine::default());
        h.machine.start_call(CallKind::Audio, bob()).await.unwrap();
        h.drain();

        let signal = Signal::candidate(UserId::Number(1), IceCandidate::new("candidate:9"));
        h.machine.handle_signal(signal).await.unwrap();

        assert_eq!(
            h.engine.log.lock().unwrap().candidates,
            vec![IceCandidate::new("candidate:9")]
        );
        assert_eq!(h.drain(), vec!["webrtc_ice_candidate"]);
    }

    #[tokio::test]
    async fn local_candidates_are_sent_to_counterpart() {
        let mut h = Harness::new(FakeEngine::default());
        h.machine.start_call(CallKind::Video, bob()).await.unwrap();

        h.peer_event(PeerEvent::LocalCandidate(
            IceCandidate::new("candidate:2").with_mid("0", 0),
        ))
        .await;

        let sent = h.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].name(), "ice_candidate");
        assert_eq!(sent[1].target(), Some(&bob()));
    }

    #[tokio::test]
    async fn end_call_is_idempotent() {
        let mut h = Harness::new(FakeEngine::default());
        h.machine.start_call(CallKind::Video, bob()).await.unwrap();
        h.drain();

        assert!(h.machine.end_call().await);
        assert!(!h.machine.end_call().await);

        assert_eq!(h.machine.state().await, CallState::Idle);
        assert!(h.engine.local().stopped.load(Ordering::SeqCst));
        assert_eq!(h.engine.log.lock().unwrap().closed, 1);
        assert_eq!(h.drain(), vec!["webrtc_streams_cleared"]);
    }

    #[tokio::test]
    async fn ice_failure_records_error_and_tears_down() {
        let mut h = Harness::new(FakeEngine::default());
        h.machine.start_call(CallKind::Video, bob()).await.unwrap();
        h.drain();

        h.peer_event(PeerEvent::IceState(IceConnectionState::Failed))
            .await;

        let snapshot = h.machine.snapshot().await;
        assert_eq!(snapshot.state, CallState::Idle);
        assert_eq!(snapshot.error, Some(CallError::ConnectionFailed));
        assert_eq!(
            h.drain(),
            vec!["webrtc_streams_cleared", "webrtc_call_ended"]
        );

        // An explicit end clears the recorded error.
        assert!(!h.machine.end_call().await);
        assert_eq!(h.machine.snapshot().await.error, None);
    }

    #[tokio::test]
    async fn disconnected_keeps_resources_and_may_recover() {
        let mut h = Harness::new(FakeEngine::default());
        h.machine.start_call(CallKind::Audio, bob()).await.unwrap();

        h.peer_event(PeerEvent::IceState(IceConnectionState::Connected))
            .await;
        h.peer_event(PeerEvent::IceState(IceConnectionState::Disconnected))
            .await;
        assert_eq!(h.machine.state().await, CallState::Ended);
        assert!(!h.engine.local().stopped.load(Ordering::SeqCst));

        h.peer_event(PeerEvent::IceState(IceConnectionState::Completed))
            .await;
        assert_eq!(h.machine.state().await, CallState::Connected);
    }

    #[tokio::test]
    async fn remote_stream_is_published() {
        let mut h = Harness::new(FakeEngine::default());
        h.machine.start_call(CallKind::Video, bob()).await.unwrap();
        h.drain();

        h.peer_event(PeerEvent::RemoteStream(FakeStream::new("remote", true)))
            .await;

        let snapshot = h.machine.snapshot().await;
        assert_eq!(snapshot.remote_stream_id.as_deref(), Some("remote"));
        assert!(snapshot.remote_video_enabled);
        assert_eq!(h.drain(), vec!["webrtc_remote_stream_updated"]);
    }

    #[tokio::test]
    async fn stale_session_events_are_ignored() {
        let mut h = Harness::new(FakeEngine::default());
        h.machine.start_call(CallKind::Audio, bob()).await.unwrap();
        let old_sink = h.engine.sink();
        h.machine.end_call().await;

        h.machine.start_call(CallKind::Audio, bob()).await.unwrap();
        old_sink.ice_state(IceConnectionState::Failed);
        let (session, event) = h.events.recv().await.unwrap();
        h.machine.handle_peer_event(session, event).await;

        assert_eq!(h.machine.state().await, CallState::OutgoingNegotiating);
    }

    #[tokio::test]
    async fn toggles_flip_local_tracks() {
        let h = Harness::new(FakeEngine::default());
        assert_eq!(h.machine.toggle_local_video().await, None);

        h.machine.start_call(CallKind::Video, bob()).await.unwrap();
        assert_eq!(h.machine.toggle_local_video().await, Some(false));
        assert_eq!(h.machine.toggle_local_audio().await, Some(false));

        let snapshot = h.machine.snapshot().await;
        assert!(!snapshot.local_video_enabled);
        assert!(!snapshot.local_audio_enabled);
    }

    #[tokio::test]
    async fn offer_broadcast_is_announced_not_accepted() {
        let mut h = Harness::new(FakeEngine::default());
        let signal = Signal::Offer(linkcall_protocol::CallOffer {
            target_user_id: None,
            call_type: CallKind::Video,
            offer: SessionDescription::offer("v=0"),
            from_user_id: Some(UserId::Number(3)),
        });

        h.machine.handle_signal(signal).await.unwrap();

        assert_eq!(h.machine.state().await, CallState::Idle);
        assert_eq!(h.drain(), vec!["webrtc_call_offer"]);
    }

    #[tokio::test]
    async fn event_loop_applies_peer_events() {
        let h = Harness::new(FakeEngine::default());
        let Harness {
            machine,
            events,
            engine,
            ..
        } = h;
        let handle = machine.spawn_event_loop(events);

        machine.start_call(CallKind::Audio, bob()).await.unwrap();
        engine.sink().ice_state(IceConnectionState::Connected);

        for _ in 0..50 {
            if machine.state().await == CallState::Connected {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(machine.state().await, CallState::Connected);

        drop(machine);
        drop(engine);
        handle.await.unwrap();
    }
}
