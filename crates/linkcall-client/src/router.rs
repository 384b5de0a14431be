//! Inbound message routing.
//!
//! Every [`TransportEvent`] goes through [`Router::handle_event`]. Messages
//! are classified once by [`EventKind`] and dispatched in fixed priority:
//!
//! 1. `service:error`: auth failures end the session
//! 2. `broadcast:*`: signaling goes to the state machine, the rest to the bus
//! 3. `service:*`: control plane
//! 4. `api/*`, `api:*`: settle the pending request
//!
//! Anything else is logged and dropped. Routing never fails outward.

use std::sync::Arc;

use linkcall_core::{EventBus, Notification};
use linkcall_protocol::{EventKind, Message, PONG, ServiceEvent, Signal, UNAUTHORIZED};
use linkcall_signaling::SignalingMachine;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::correlator::Correlator;
use crate::transport::{DisconnectReason, Transport, TransportEvent, TransportEvents};

/// Dispatches inbound traffic to the correlator, the signaling machine and
/// the bus.
#[derive(Clone)]
pub struct Router {
    transport: Transport,
    correlator: Arc<Correlator>,
    signaling: Option<SignalingMachine>,
    bus: EventBus,
}

impl Router {
    pub fn new(
        transport: Transport,
        correlator: Arc<Correlator>,
        signaling: Option<SignalingMachine>,
        bus: EventBus,
    ) -> Self {
        Self {
            transport,
            correlator,
            signaling,
            bus,
        }
    }

    /// Spawns the task draining `events` in order.
    pub fn spawn(self, mut events: TransportEvents) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                self.handle_event(event).await;
            }
            debug!("router stopped");
        })
    }

    /// Applies one transport event.
    pub async fn handle_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => debug!("link up"),
            TransportEvent::Message(message) => self.route(message).await,
            TransportEvent::Disconnected { link, reason } => {
                // Requests already sent on a newer connection stay pending.
                let rejected = self.correlator.reset_link(link);
                if rejected > 0 {
                    warn!(rejected, link, ?reason, "rejected pending requests");
                }
                if reason == DisconnectReason::Unauthorized {
                    self.end_call().await;
                }
            }
        }
    }

    /// Dispatches one message by its class.
    pub async fn route(&self, message: Message) {
        match message.kind() {
            EventKind::ServiceError => self.on_service_error(&message).await,
            EventKind::Broadcast(name) => self.on_broadcast(name, &message).await,
            EventKind::Service(service) => self.on_service(service).await,
            EventKind::ApiResponse(route) => {
                if !self.correlator.settle(route, message.clone()) {
                    debug!(route, status = ?message.status, "response without pending request");
                }
            }
            EventKind::Unrecognized => {
                warn!(event = %message.event, "dropping message with unknown event class");
            }
        }
    }

    async fn on_service_error(&self, message: &Message) {
        if message.status != Some(UNAUTHORIZED) {
            warn!(
                status = ?message.status,
                message = message.payload_str("message"),
                "service error"
            );
            return;
        }

        self.transport.publish_unauthorized();
        self.transport.close().await;
        self.correlator.reset();
        self.end_call().await;
    }

    async fn on_broadcast(&self, name: &str, message: &Message) {
        if Signal::is_signaling(name) {
            if let Some(ref machine) = self.signaling {
                match Signal::from_broadcast(name, message.payload.as_ref()) {
                    Ok(Some(signal)) => {
                        if let Err(e) = machine.handle_signal(signal).await {
                            warn!(name, error = %e, "signal not applied");
                        }
                    }
                    Ok(None) => {}
                    Err(e) => warn!(name, error = %e, "dropping malformed signal"),
                }
                return;
            }
            trace!(name, "no signaling machine, forwarding signal raw");
        }

        self.bus.publish(Notification::Broadcast {
            name: name.to_string(),
            payload: message.payload.clone().unwrap_or_default(),
        });
    }

    async fn on_service(&self, service: ServiceEvent<'_>) {
        match service {
            ServiceEvent::Ping => {
                if let Err(e) = self.transport.send(&Message::service(PONG)).await {
                    debug!(error = %e, "failed to answer ping");
                }
            }
            ServiceEvent::Pong => trace!("pong"),
            ServiceEvent::ConnectionEstablished => {
                info!("session established");
                self.transport.mark_established();
            }
            ServiceEvent::ConnectionClosed => info!("server is closing the connection"),
            ServiceEvent::Other(name) => debug!(name, "ignoring service event"),
        }
    }

    async fn end_call(&self) {
        if let Some(ref machine) = self.signaling {
            machine.end_call().await;
        }
    }
}
