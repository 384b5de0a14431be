//! The composition root.
//!
//! A [`Client`] wires one [`Transport`], one [`Correlator`], an optional
//! [`SignalingMachine`] and the [`Router`] around a shared [`EventBus`].

use std::sync::Arc;

use linkcall_core::{EventBus, Notification};
use linkcall_protocol::Message;
use linkcall_signaling::{MediaEngine, PeerConfig, SignalingMachine};
use serde_json::{Map, Value};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::debug;
use url::Url;

use crate::config::{ClientConfig, ConfigError};
use crate::correlator::{Correlator, CorrelatorConfig, RequestError};
use crate::router::Router;
use crate::transport::{ConnectionSnapshot, Transport, TransportConfig, TransportResult};

/// A connected (or connectable) linkcall session.
///
/// Must be created inside a tokio runtime: construction spawns the router
/// task and, with media, the peer event loop. Both stop when the client is
/// dropped.
pub struct Client {
    transport: Transport,
    correlator: Arc<Correlator>,
    signaling: Option<SignalingMachine>,
    bus: EventBus,
    tasks: Vec<JoinHandle<()>>,
}

impl Client {
    /// A client without call support. Signaling broadcasts are forwarded raw.
    pub fn new(transport: TransportConfig, requests: CorrelatorConfig, bus: EventBus) -> Self {
        Self::build(transport, requests, None, bus)
    }

    /// A client able to place and receive calls through `engine`.
    pub fn with_media(
        transport: TransportConfig,
        requests: CorrelatorConfig,
        engine: Arc<dyn MediaEngine>,
        peer_config: PeerConfig,
        bus: EventBus,
    ) -> Self {
        Self::build(transport, requests, Some((engine, peer_config)), bus)
    }

    /// Builds a client from file configuration.
    pub fn from_config(
        config: &ClientConfig,
        engine: Option<Arc<dyn MediaEngine>>,
    ) -> Result<Self, ConfigError> {
        let transport = config.transport_config()?;
        let requests = config.correlator_config();
        let bus = EventBus::default();
        Ok(match engine {
            Some(engine) => {
                Self::with_media(transport, requests, engine, config.peer_config(), bus)
            }
            None => Self::new(transport, requests, bus),
        })
    }

    fn build(
        transport_config: TransportConfig,
        requests: CorrelatorConfig,
        media: Option<(Arc<dyn MediaEngine>, PeerConfig)>,
        bus: EventBus,
    ) -> Self {
        let (transport, events) = Transport::new(transport_config, bus.clone());
        let correlator = Arc::new(Correlator::new(Arc::new(transport.clone()), requests));
        let mut tasks = Vec::with_capacity(2);

        let signaling = media.map(|(engine, peer_config)| {
            let (machine, peer_events) = SignalingMachine::new(
                engine,
                Arc::new(transport.clone()),
                bus.clone(),
                peer_config,
            );
            tasks.push(machine.spawn_event_loop(peer_events));
            machine
        });

        let router = Router::new(
            transport.clone(),
            correlator.clone(),
            signaling.clone(),
            bus.clone(),
        );
        tasks.push(router.spawn(events));

        Self {
            transport,
            correlator,
            signaling,
            bus,
            tasks,
        }
    }

    /// Opens the link to `address`.
    ///
    /// # Errors
    ///
    /// Fails if the first connection attempt fails; no reconnect is
    /// scheduled in that case.
    pub async fn connect(&self, address: &Url) -> TransportResult<()> {
        self.transport.open(address).await
    }

    /// Sends `api/<route>` and waits for the matching response.
    pub async fn call(
        &self,
        route: &str,
        payload: Map<String, Value>,
    ) -> Result<Message, RequestError> {
        self.correlator.call(route, payload).await
    }

    /// Ends any call and closes the link.
    ///
    /// Pending requests are rejected with [`RequestError::ConnectionReset`].
    pub async fn disconnect(&self) {
        if let Some(ref machine) = self.signaling {
            machine.end_call().await;
        }
        self.transport.close().await;
        let rejected = self.correlator.reset();
        debug!(rejected, "disconnected");
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Subscribes to notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.bus.subscribe()
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// The call state machine, if the client was built with media.
    pub fn signaling(&self) -> Option<&SignalingMachine> {
        self.signaling.as_ref()
    }

    /// Current link state.
    pub fn connection(&self) -> ConnectionSnapshot {
        self.transport.snapshot()
    }

    /// Watches link state changes.
    pub fn watch_connection(&self) -> watch::Receiver<ConnectionSnapshot> {
        self.transport.watch()
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures_util::{SinkExt, StreamExt};
    use linkcall_protocol::{decode_message, encode_message};
    use serde_json::json;
    use tokio::net::{TcpListener, TcpStream};
    use tokio_tungstenite::tungstenite::Message as WsMessage;
    use tokio_tungstenite::{WebSocketStream, accept_async};

    use super::*;
    use crate::transport::{LinkState, ReconnectPolicy};

    type ServerConn = WebSocketStream<TcpStream>;

    async fn serve() -> (TcpListener, Url) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = Url::parse(&format!("ws://{}/ws", listener.local_addr().unwrap())).unwrap();
        (listener, url)
    }

    async fn accept(listener: &TcpListener) -> ServerConn {
        let (tcp, _) = listener.accept().await.unwrap();
        accept_async(tcp).await.unwrap()
    }

    async fn recv(conn: &mut ServerConn) -> Message {
        loop {
            match conn.next().await.unwrap().unwrap() {
                WsMessage::Text(text) => return decode_message(&text).unwrap(),
                WsMessage::Close(_) => panic!("client closed"),
                _ => continue,
            }
        }
    }

    async fn push(conn: &mut ServerConn, message: &Message) {
        let text = encode_message(message).unwrap();
        conn.send(WsMessage::Text(text)).await.unwrap();
    }

    fn client() -> Client {
        let transport = TransportConfig::default()
            .with_reconnect(ReconnectPolicy::Fixed {
                delay: Duration::from_millis(20),
            })
            .with_heartbeat(Duration::from_secs(60), Duration::from_secs(5));
        Client::new(transport, CorrelatorConfig::default(), EventBus::default())
    }

    async fn next_notification(rx: &mut broadcast::Receiver<Notification>) -> Notification {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn login_round_trip() {
        let (listener, url) = serve().await;
        let server = tokio::spawn(async move {
            let mut conn = accept(&listener).await;
            let request = recv(&mut conn).await;
            assert_eq!(request.event, "api/login");
            assert_eq!(request.payload_str("username"), Some("ada"));
            assert!(request.timestamp.is_some());

            let mut payload = Map::new();
            payload.insert("token".into(), json!("tok-1"));
            push(
                &mut conn,
                &Message::new("api:login").with_status(200).with_payload(payload),
            )
            .await;
            conn
        });

        let client = client();
        client.connect(&url).await.unwrap();

        let mut payload = Map::new();
        payload.insert("username".into(), json!("ada"));
        let response = client.call("login", payload).await.unwrap();
        assert_eq!(response.payload_str("token"), Some("tok-1"));

        let _conn = server.await.unwrap();
    }

    #[tokio::test]
    async fn rejected_login_surfaces_api_error() {
        let (listener, url) = serve().await;
        let server = tokio::spawn(async move {
            let mut conn = accept(&listener).await;
            recv(&mut conn).await;
            let mut payload = Map::new();
            payload.insert("message".into(), json!("bad credentials"));
            push(
                &mut conn,
                &Message::new("api/login").with_status(401).with_payload(payload),
            )
            .await;
            conn
        });

        let client = client();
        client.connect(&url).await.unwrap();
        let err = client.call("login", Map::new()).await.unwrap_err();
        match err {
            RequestError::Rejected(api) => assert_eq!(api.status, Some(401)),
            other => panic!("unexpected error {other:?}"),
        }
        let _conn = server.await.unwrap();
    }

    #[tokio::test]
    async fn server_ping_is_answered() {
        let (listener, url) = serve().await;
        let server = tokio::spawn(async move {
            let mut conn = accept(&listener).await;
            push(&mut conn, &Message::ping()).await;
            let reply = recv(&mut conn).await;
            assert_eq!(reply.event, "service:pong");
            conn
        });

        let client = client();
        client.connect(&url).await.unwrap();
        let _conn = tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn broadcasts_reach_subscribers() {
        let (listener, url) = serve().await;
        let server = tokio::spawn(async move {
            let mut conn = accept(&listener).await;
            let mut payload = Map::new();
            payload.insert("userId".into(), json!(9));
            push(&mut conn, &Message::broadcast("user_online", payload)).await;
            conn
        });

        let client = client();
        let mut rx = client.subscribe();
        client.connect(&url).await.unwrap();

        match next_notification(&mut rx).await {
            Notification::Broadcast { name, payload } => {
                assert_eq!(name, "user_online");
                assert_eq!(payload["userId"], 9);
            }
            other => panic!("unexpected notification {other:?}"),
        }
        let _conn = server.await.unwrap();
    }

    #[tokio::test]
    async fn unauthorized_service_error_closes_the_link() {
        let (listener, url) = serve().await;
        let server = tokio::spawn(async move {
            let mut conn = accept(&listener).await;
            push(&mut conn, &Message::service("error").with_status(4001)).await;
            conn
        });

        let client = client();
        let mut rx = client.subscribe();
        let mut state = client.watch_connection();
        client.connect(&url).await.unwrap();

        assert_eq!(next_notification(&mut rx).await, Notification::Unauthorized);
        tokio::time::timeout(
            Duration::from_secs(5),
            state.wait_for(|s| s.state == LinkState::Closed),
        )
        .await
        .unwrap()
        .unwrap();
        let _conn = server.await.unwrap();
    }

    #[tokio::test]
    async fn connection_established_is_recorded() {
        let (listener, url) = serve().await;
        let server = tokio::spawn(async move {
            let mut conn = accept(&listener).await;
            push(&mut conn, &Message::service("connection_established")).await;
            conn
        });

        let client = client();
        let mut state = client.watch_connection();
        client.connect(&url).await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), state.wait_for(|s| s.established))
            .await
            .unwrap()
            .unwrap();
        let _conn = server.await.unwrap();
    }

    #[tokio::test]
    async fn disconnect_rejects_pending_requests() {
        let (listener, url) = serve().await;
        let server = tokio::spawn(async move {
            let mut conn = accept(&listener).await;
            recv(&mut conn).await;
            conn
        });

        let client = Arc::new(client());
        client.connect(&url).await.unwrap();

        let caller = {
            let client = client.clone();
            tokio::spawn(async move { client.call("profile", Map::new()).await })
        };
        let _conn = server.await.unwrap();

        client.disconnect().await;
        let err = caller.await.unwrap().unwrap_err();
        assert!(matches!(err, RequestError::ConnectionReset));
        assert_eq!(client.connection().state, LinkState::Closed);
    }

    #[tokio::test]
    async fn from_config_without_media() {
        let client = Client::from_config(&ClientConfig::default(), None).unwrap();
        assert!(client.signaling().is_none());
        assert_eq!(client.connection().state, LinkState::Idle);
    }
}
