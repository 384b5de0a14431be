//! The WebSocket transport.
//!
//! A [`Transport`] owns at most one WebSocket at a time. The socket lives in a
//! background task (the link actor); callers talk to it over a command
//! channel and observe it through a [`ConnectionSnapshot`] watch channel.
//! Everything the server sends comes out of the single [`TransportEvents`]
//! stream returned by [`Transport::new`].
//!
//! The link actor also handles:
//! - Heartbeat: a `service:ping` every [`HeartbeatConfig::interval`]
//! - Watchdog: a forced reconnect when the server stays silent after we sent
//!   something
//! - Reconnect: fixed or exponential backoff after an unexpected close, unless
//!   the close code forbids it (see [`ClosePolicy`])

use std::borrow::Cow;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use linkcall_core::{EventBus, Notification};
use linkcall_protocol::{
    ClosePolicy, Message, PONG, ProtocolError, Signal, decode_message, encode_message,
};
use linkcall_signaling::{BoxFuture, SignalingChannel, SignalingError, SignalingResult};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, info, trace, warn};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, WsMessage>;
type WsSource = SplitStream<WsStream>;

/// Capacity of the command channel into the link actor.
const COMMAND_CHANNEL_CAPACITY: usize = 64;

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Errors surfaced by the transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The link is not open.
    #[error("not connected")]
    NotConnected,

    /// The address is not a usable WebSocket URL.
    #[error("invalid address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    /// The first connection attempt failed.
    #[error("failed to connect to {address}: {reason}")]
    Connect { address: String, reason: String },

    /// The outgoing message could not be encoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The link closed while the operation was in flight.
    #[error("connection closed")]
    Closed,
}

/// Delay schedule between reconnect attempts.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconnectPolicy {
    /// The same delay before every attempt.
    Fixed { delay: Duration },
    /// `initial * multiplier^(attempt - 1)`, capped at `max`.
    Exponential {
        initial: Duration,
        max: Duration,
        multiplier: f64,
    },
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::Fixed {
            delay: Duration::from_secs(5),
        }
    }
}

impl ReconnectPolicy {
    /// Calculates the delay before reconnect attempt `attempt` (starting at 1).
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Self::Fixed { delay } => delay,
            Self::Exponential {
                initial,
                max,
                multiplier,
            } => {
                if attempt == 0 {
                    return Duration::ZERO;
                }
                let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
                let delay = initial.as_secs_f64() * multiplier.powi(exponent);
                Duration::from_secs_f64(delay.min(max.as_secs_f64()))
            }
        }
    }
}

/// Liveness probing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Time between pings.
    pub interval: Duration,
    /// How long the server may stay silent after a ping.
    pub pong_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            pong_timeout: Duration::from_secs(5),
        }
    }
}

/// Transport configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportConfig {
    /// Bearer token sent as the `token` query parameter.
    pub token: Option<String>,
    /// How long the server may stay silent after any send.
    pub watchdog: Duration,
    /// Bound on each connection attempt.
    pub connect_timeout: Duration,
    pub heartbeat: HeartbeatConfig,
    pub reconnect: ReconnectPolicy,
    /// Give up after this many consecutive failed reconnects. `None` retries
    /// forever.
    pub max_reconnect_attempts: Option<u32>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            token: None,
            watchdog: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(10),
            heartbeat: HeartbeatConfig::default(),
            reconnect: ReconnectPolicy::default(),
            max_reconnect_attempts: None,
        }
    }
}

impl TransportConfig {
    /// Builder: set the bearer token.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Builder: set the reconnect policy.
    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// Builder: set the heartbeat.
    pub fn with_heartbeat(mut self, interval: Duration, pong_timeout: Duration) -> Self {
        self.heartbeat = HeartbeatConfig {
            interval,
            pong_timeout,
        };
        self
    }

    /// Builder: set the watchdog window.
    pub fn with_watchdog(mut self, watchdog: Duration) -> Self {
        self.watchdog = watchdog;
        self
    }

    /// Builder: bound the number of reconnect attempts.
    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = Some(attempts);
        self
    }
}

/// Lifecycle state of the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    #[default]
    Idle,
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Read-only view of the connection.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConnectionSnapshot {
    /// The endpoint, including the token parameter.
    pub url: Option<Url>,
    pub state: LinkState,
    /// The server sent `service:connection_established` on this link.
    pub established: bool,
    /// Consecutive reconnect attempts; zero while open.
    pub reconnect_attempt: u32,
}

/// Why a link went down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// We closed it.
    Local,
    /// Close code 4001.
    Unauthorized,
    /// A non-retryable close code.
    Terminal(u16),
    /// Retryable close code, socket error or end of stream.
    Lost(Option<u16>),
    /// The watchdog expired.
    Unresponsive,
}

impl DisconnectReason {
    fn from_close(code: Option<u16>) -> Self {
        match ClosePolicy::for_code(code) {
            ClosePolicy::Unauthorized => Self::Unauthorized,
            ClosePolicy::Terminal => Self::Terminal(code.unwrap_or_default()),
            ClosePolicy::Reconnect => Self::Lost(code),
        }
    }

    /// Returns true if the link actor will try to reconnect.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Lost(_) | Self::Unresponsive)
    }
}

/// Numbers the connections of one transport, starting at 1. Zero means no
/// connection has been established yet.
pub type LinkId = u64;

/// Inbound event from the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A link opened (first connect or reconnect).
    Connected,
    /// A decoded server message.
    Message(Message),
    /// Connection `link` went down.
    Disconnected {
        link: LinkId,
        reason: DisconnectReason,
    },
}

/// Receiver of [`TransportEvent`]s.
pub type TransportEvents = mpsc::UnboundedReceiver<TransportEvent>;

/// Something that accepts outgoing messages.
///
/// Implemented by [`Transport`]; the request correlator only needs this.
pub trait FrameSink: Send + Sync {
    /// Returns true if a send could currently succeed.
    fn is_open(&self) -> bool;

    /// The connection a send would currently go out on.
    fn link(&self) -> LinkId;

    /// Sends one message.
    fn send_frame(&self, message: Message) -> BoxFuture<'_, TransportResult<()>>;
}

enum Command {
    Send {
        text: String,
        reply: oneshot::Sender<TransportResult<()>>,
    },
    Close,
}

struct LinkHandle {
    url: Url,
    commands: mpsc::Sender<Command>,
    task: JoinHandle<()>,
}

/// State shared with link actors. Holds no reference back to the transport.
#[derive(Clone)]
struct LinkContext {
    config: TransportConfig,
    state: Arc<watch::Sender<ConnectionSnapshot>>,
    events: mpsc::UnboundedSender<TransportEvent>,
    bus: EventBus,
    unauthorized_published: Arc<AtomicBool>,
    link: Arc<AtomicU64>,
}

impl LinkContext {
    /// Marks a fresh connection open and announces it.
    fn link_up(&self, url: &Url) -> LinkId {
        let link = self.link.fetch_add(1, Ordering::SeqCst) + 1;
        self.unauthorized_published.store(false, Ordering::SeqCst);
        self.update(|s| {
            s.state = LinkState::Open;
            s.established = false;
            s.reconnect_attempt = 0;
        });
        info!(url = %redact(url), link, "connected");
        self.emit(TransportEvent::Connected);
        link
    }

    fn update(&self, f: impl FnOnce(&mut ConnectionSnapshot)) {
        self.state.send_modify(f);
    }

    fn emit(&self, event: TransportEvent) {
        if self.events.send(event).is_err() {
            trace!("transport event receiver dropped");
        }
    }

    fn publish_unauthorized(&self) -> bool {
        if self.unauthorized_published.swap(true, Ordering::SeqCst) {
            return false;
        }
        warn!("server rejected credentials");
        self.bus.publish(Notification::Unauthorized);
        true
    }
}

struct TransportInner {
    ctx: LinkContext,
    link: Mutex<Option<LinkHandle>>,
    /// Serializes `open` and `close`.
    lifecycle: tokio::sync::Mutex<()>,
}

/// Handle on the WebSocket link. Cheap to clone.
#[derive(Clone)]
pub struct Transport {
    inner: Arc<TransportInner>,
}

impl Transport {
    /// Creates a closed transport and its inbound event stream.
    pub fn new(config: TransportConfig, bus: EventBus) -> (Self, TransportEvents) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(ConnectionSnapshot::default());
        let ctx = LinkContext {
            config,
            state: Arc::new(state_tx),
            events: events_tx,
            bus,
            unauthorized_published: Arc::new(AtomicBool::new(false)),
            link: Arc::new(AtomicU64::new(0)),
        };
        let inner = TransportInner {
            ctx,
            link: Mutex::new(None),
            lifecycle: tokio::sync::Mutex::new(()),
        };
        (
            Self {
                inner: Arc::new(inner),
            },
            events_rx,
        )
    }

    /// Returns the current connection snapshot.
    pub fn snapshot(&self) -> ConnectionSnapshot {
        self.inner.ctx.state.borrow().clone()
    }

    /// Subscribes to connection snapshot changes.
    pub fn watch(&self) -> watch::Receiver<ConnectionSnapshot> {
        self.inner.ctx.state.subscribe()
    }

    /// Returns true while the link is open.
    pub fn is_open(&self) -> bool {
        self.inner.ctx.state.borrow().state == LinkState::Open
    }

    /// The most recent connection, whether or not it is still up.
    pub fn link(&self) -> LinkId {
        self.inner.ctx.link.load(Ordering::SeqCst)
    }

    /// Opens the link to `address`.
    ///
    /// A no-op if already open or reconnecting to the same address. Opening
    /// a different address closes the current link first.
    ///
    /// # Errors
    ///
    /// [`TransportError::InvalidAddress`] for a non-WebSocket URL;
    /// [`TransportError::Connect`] if the first attempt fails, leaving the
    /// transport closed.
    pub async fn open(&self, address: &Url) -> TransportResult<()> {
        let url = self.endpoint(address)?;
        let _lifecycle = self.inner.lifecycle.lock().await;

        let current = self.current_url();
        if let Some(current) = current {
            let state = self.snapshot().state;
            let live = matches!(state, LinkState::Open | LinkState::Connecting);
            if live && current == url {
                debug!(url = %redact(&url), "already connected");
                return Ok(());
            }
            self.shutdown_link().await;
        }

        let ctx = &self.inner.ctx;
        ctx.update(|s| {
            *s = ConnectionSnapshot {
                url: Some(url.clone()),
                state: LinkState::Connecting,
                established: false,
                reconnect_attempt: 0,
            };
        });

        info!(url = %redact(&url), "connecting");
        let stream = match connect(&url, ctx.config.connect_timeout).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(url = %redact(&url), error = %e, "connection failed");
                ctx.update(|s| s.state = LinkState::Closed);
                return Err(e);
            }
        };

        // Open before returning, so a send right after `open` goes through.
        let link = ctx.link_up(&url);
        let (commands, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let task = tokio::spawn(run_link(
            ctx.clone(),
            url.clone(),
            stream,
            link,
            command_rx,
        ));
        let mut link = self.inner.link.lock().unwrap_or_else(PoisonError::into_inner);
        *link = Some(LinkHandle {
            url,
            commands,
            task,
        });
        Ok(())
    }

    /// Closes the link. Never reconnects afterwards.
    pub async fn close(&self) {
        let _lifecycle = self.inner.lifecycle.lock().await;
        self.shutdown_link().await;
    }

    /// Sends one message.
    ///
    /// # Errors
    ///
    /// [`TransportError::NotConnected`] unless open. Nothing is buffered.
    pub async fn send(&self, message: &Message) -> TransportResult<()> {
        if !self.is_open() {
            return Err(TransportError::NotConnected);
        }
        let text = encode_message(message)?;
        let commands = self
            .current_commands()
            .ok_or(TransportError::NotConnected)?;

        let (reply, rx) = oneshot::channel();
        commands
            .send(Command::Send { text, reply })
            .await
            .map_err(|_| TransportError::NotConnected)?;
        rx.await.map_err(|_| TransportError::Closed)?
    }

    /// Records that the server confirmed the session on this link.
    pub fn mark_established(&self) {
        self.inner.ctx.update(|s| {
            if s.state == LinkState::Open {
                s.established = true;
            }
        });
    }

    /// Publishes [`Notification::Unauthorized`] unless already published for
    /// the current link. Returns true if this call published it.
    pub fn publish_unauthorized(&self) -> bool {
        self.inner.ctx.publish_unauthorized()
    }

    /// Resolves the endpoint: validates the scheme and appends the token.
    fn endpoint(&self, address: &Url) -> TransportResult<Url> {
        match address.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(TransportError::InvalidAddress {
                    address: address.to_string(),
                    reason: format!("unsupported scheme `{}`", other),
                });
            }
        }
        if address.host_str().is_none() {
            return Err(TransportError::InvalidAddress {
                address: address.to_string(),
                reason: "missing host".to_string(),
            });
        }

        let mut url = address.clone();
        if let Some(ref token) = self.inner.ctx.config.token {
            url.query_pairs_mut().append_pair("token", token);
        }
        Ok(url)
    }

    fn current_url(&self) -> Option<Url> {
        let link = self.inner.link.lock().unwrap_or_else(PoisonError::into_inner);
        link.as_ref().map(|l| l.url.clone())
    }

    fn current_commands(&self) -> Option<mpsc::Sender<Command>> {
        let link = self.inner.link.lock().unwrap_or_else(PoisonError::into_inner);
        link.as_ref().map(|l| l.commands.clone())
    }

    /// Stops the link actor and waits for it. Caller holds the lifecycle lock.
    async fn shutdown_link(&self) {
        let handle = self
            .inner
            .link
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(handle) = handle {
            // The actor may already be gone after a terminal close.
            let _ = handle.commands.send(Command::Close).await;
            if let Err(e) = handle.task.await {
                error!(error = %e, "link task failed");
            }
        }

        self.inner.ctx.update(|s| {
            if s.state != LinkState::Idle {
                s.state = LinkState::Closed;
            }
            s.established = false;
            s.reconnect_attempt = 0;
        });
    }
}

impl FrameSink for Transport {
    fn is_open(&self) -> bool {
        Transport::is_open(self)
    }

    fn link(&self) -> LinkId {
        Transport::link(self)
    }

    fn send_frame(&self, message: Message) -> BoxFuture<'_, TransportResult<()>> {
        Box::pin(async move { self.send(&message).await })
    }
}

impl SignalingChannel for Transport {
    fn send_signal(&self, signal: Signal) -> BoxFuture<'_, SignalingResult<()>> {
        Box::pin(async move {
            let message = signal.to_message()?;
            self.send(&message)
                .await
                .map_err(|e| SignalingError::channel(e.to_string()))
        })
    }
}

/// Strips the token from a URL for logging.
fn redact(url: &Url) -> Cow<'_, str> {
    if url.query().is_none() {
        return Cow::Borrowed(url.as_str());
    }
    let mut clean = url.clone();
    clean.set_query(None);
    Cow::Owned(clean.to_string())
}

async fn connect(url: &Url, timeout: Duration) -> TransportResult<WsStream> {
    let attempt = tokio::time::timeout(timeout, connect_async(url.as_str()));
    match attempt.await {
        Ok(Ok((stream, _response))) => Ok(stream),
        Ok(Err(e)) => Err(TransportError::Connect {
            address: redact(url).into_owned(),
            reason: e.to_string(),
        }),
        Err(_) => Err(TransportError::Connect {
            address: redact(url).into_owned(),
            reason: format!("timed out after {:?}", timeout),
        }),
    }
}

/// How one connection ended.
enum LinkExit {
    Local,
    Closed(Option<u16>),
    Unresponsive,
}

/// Link actor: runs connections until a local close, a non-retryable close
/// code, or the reconnect budget runs out.
async fn run_link(
    ctx: LinkContext,
    url: Url,
    mut ws: WsStream,
    mut link: LinkId,
    mut commands: mpsc::Receiver<Command>,
) {
    let mut attempt: u32 = 0;

    loop {
        let exit = run_connection(&ctx, ws, &mut commands).await;
        let reason = match exit {
            LinkExit::Local => DisconnectReason::Local,
            LinkExit::Unresponsive => DisconnectReason::Unresponsive,
            LinkExit::Closed(code) => DisconnectReason::from_close(code),
        };

        if reason == DisconnectReason::Unauthorized {
            ctx.publish_unauthorized();
        }
        ctx.update(|s| s.established = false);
        ctx.emit(TransportEvent::Disconnected { link, reason });

        if !reason.is_retryable() {
            info!(?reason, link, "link closed");
            break;
        }
        warn!(?reason, link, "connection lost");

        match reconnect(&ctx, &url, &mut commands, &mut attempt).await {
            Some(next) => {
                ws = next;
                attempt = 0;
                link = ctx.link_up(&url);
            }
            None => break,
        }
    }

    ctx.update(|s| {
        s.state = LinkState::Closed;
        s.established = false;
    });
    debug!("link task exiting");
}

/// Waits out the backoff and reconnects. Returns `None` if the link should
/// stop instead.
async fn reconnect(
    ctx: &LinkContext,
    url: &Url,
    commands: &mut mpsc::Receiver<Command>,
    attempt: &mut u32,
) -> Option<WsStream> {
    loop {
        *attempt += 1;
        if let Some(max) = ctx.config.max_reconnect_attempts {
            if *attempt > max {
                error!(attempts = max, "giving up reconnecting");
                return None;
            }
        }

        let current = *attempt;
        ctx.update(|s| {
            s.state = LinkState::Connecting;
            s.reconnect_attempt = current;
        });

        let delay = ctx.config.reconnect.delay(current);
        info!(attempt = current, ?delay, "reconnecting");
        if !wait_or_close(delay, commands).await {
            return None;
        }

        match connect(url, ctx.config.connect_timeout).await {
            Ok(ws) => return Some(ws),
            Err(e) => warn!(attempt = current, error = %e, "reconnect failed"),
        }
    }
}

/// Sleeps for `delay`, refusing sends meanwhile. Returns false if a close was
/// requested.
async fn wait_or_close(delay: Duration, commands: &mut mpsc::Receiver<Command>) -> bool {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            _ = &mut sleep => return true,
            command = commands.recv() => match command {
                Some(Command::Send { reply, .. }) => {
                    let _ = reply.send(Err(TransportError::NotConnected));
                }
                Some(Command::Close) | None => return false,
            },
        }
    }
}

/// Arms the watchdog, keeping an earlier deadline if one is pending.
fn arm(watchdog: &mut Option<Instant>, window: Duration) {
    let deadline = Instant::now() + window;
    *watchdog = Some(watchdog.map_or(deadline, |d| d.min(deadline)));
}

/// One connection's select loop.
async fn run_connection(
    ctx: &LinkContext,
    ws: WsStream,
    commands: &mut mpsc::Receiver<Command>,
) -> LinkExit {
    let (mut sink, mut source): (WsSink, WsSource) = ws.split();

    let interval = ctx.config.heartbeat.interval;
    let mut heartbeat = tokio::time::interval_at(Instant::now() + interval, interval);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut watchdog: Option<Instant> = None;

    loop {
        tokio::select! {
            frame = source.next() => {
                match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        watchdog = None;
                        handle_text(ctx, text.as_str());
                    }
                    Some(Ok(WsMessage::Close(frame))) => {
                        let code = frame.as_ref().map(|f| u16::from(f.code));
                        debug!(?code, "server closed the connection");
                        return LinkExit::Closed(code);
                    }
                    Some(Ok(_)) => {
                        // Ping, pong and binary frames still prove liveness.
                        watchdog = None;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "websocket read error");
                        return LinkExit::Closed(None);
                    }
                    None => {
                        debug!("websocket stream ended");
                        return LinkExit::Closed(None);
                    }
                }
            }

            command = commands.recv() => {
                match command {
                    Some(Command::Send { text, reply }) => {
                        match sink.send(WsMessage::Text(text.into())).await {
                            Ok(()) => {
                                arm(&mut watchdog, ctx.config.watchdog);
                                let _ = reply.send(Ok(()));
                            }
                            Err(e) => {
                                warn!(error = %e, "websocket write error");
                                let _ = reply.send(Err(TransportError::Closed));
                                return LinkExit::Closed(None);
                            }
                        }
                    }
                    Some(Command::Close) | None => {
                        ctx.update(|s| s.state = LinkState::Closing);
                        send_close(&mut sink).await;
                        return LinkExit::Local;
                    }
                }
            }

            _ = heartbeat.tick() => {
                let ping = match encode_message(&Message::ping()) {
                    Ok(text) => text,
                    Err(e) => {
                        error!(error = %e, "failed to encode ping");
                        continue;
                    }
                };
                trace!("sending heartbeat");
                if let Err(e) = sink.send(WsMessage::Text(ping.into())).await {
                    warn!(error = %e, "failed to send heartbeat");
                    return LinkExit::Closed(None);
                }
                arm(&mut watchdog, ctx.config.heartbeat.pong_timeout);
            }

            _ = tokio::time::sleep_until(watchdog.unwrap_or_else(Instant::now)), if watchdog.is_some() => {
                warn!("server unresponsive, forcing reconnect");
                return LinkExit::Unresponsive;
            }
        }
    }
}

fn handle_text(ctx: &LinkContext, text: &str) {
    // Some servers answer heartbeats with a bare `pong`.
    if text.trim() == PONG {
        trace!("raw pong");
        return;
    }
    match decode_message(text) {
        Ok(message) => {
            trace!(event = %message.event, "received message");
            ctx.emit(TransportEvent::Message(message));
        }
        Err(e) => warn!(error = %e, "dropping malformed frame"),
    }
}

async fn send_close(sink: &mut WsSink) {
    let frame = CloseFrame {
        code: CloseCode::Normal,
        reason: "client closed".into(),
    };
    if let Err(e) = sink.send(WsMessage::Close(Some(frame))).await {
        debug!(error = %e, "failed to send close frame");
    }
}
