//! Request/response correlation over the transport.
//!
//! Requests go out as `api/<route>` and the server echoes the route on its
//! response (`api/<route>` or `api:<route>`). The route is the correlation
//! key, so at most one request per route can be in flight.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use linkcall_protocol::{ApiError, Message};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::transport::{FrameSink, LinkId, TransportError};

/// Errors returned to callers of [`Correlator::call`].
#[derive(Debug, Error)]
pub enum RequestError {
    /// The transport is not open; nothing was sent.
    #[error("not connected")]
    NotConnected,

    /// No response arrived in time.
    #[error("request `{route}` timed out after {timeout:?}")]
    Timeout { route: String, timeout: Duration },

    /// The connection went down while the request was pending.
    #[error("connection reset")]
    ConnectionReset,

    /// A request on the same route is already pending.
    #[error("a request to `{route}` is already pending")]
    Conflict { route: String },

    /// The server answered with a non-200 status.
    #[error("request rejected: {0}")]
    Rejected(ApiError),

    /// The request could not be sent.
    #[error(transparent)]
    Transport(TransportError),
}

/// Correlator configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelatorConfig {
    /// How long a request may stay pending.
    pub timeout: Duration,
}

impl Default for CorrelatorConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
        }
    }
}

type Reply = Result<Message, RequestError>;

struct PendingRequest {
    /// Distinguishes this entry from a later one on the same route.
    generation: u64,
    /// The connection the request went out on.
    link: LinkId,
    issued_at: Instant,
    reply: oneshot::Sender<Reply>,
}

/// The pending-request table.
pub struct Correlator {
    sink: Arc<dyn FrameSink>,
    config: CorrelatorConfig,
    pending: Mutex<HashMap<String, PendingRequest>>,
    next_generation: AtomicU64,
}

impl Correlator {
    pub fn new(sink: Arc<dyn FrameSink>, config: CorrelatorConfig) -> Self {
        Self {
            sink,
            config,
            pending: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
        }
    }

    /// Sends a request to `route` and waits for the matching response.
    ///
    /// # Errors
    ///
    /// - [`RequestError::NotConnected`] if the transport is not open
    /// - [`RequestError::Conflict`] if `route` already has a pending request
    /// - [`RequestError::Timeout`] if nothing arrives within the timeout
    /// - [`RequestError::ConnectionReset`] if the link drops meanwhile
    /// - [`RequestError::Rejected`] for a non-200 response
    pub async fn call(&self, route: &str, payload: Map<String, Value>) -> Reply {
        if !self.sink.is_open() {
            return Err(RequestError::NotConnected);
        }

        let (tx, mut rx) = oneshot::channel();
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let link = self.sink.link();
        {
            let mut pending = self.table();
            if pending.contains_key(route) {
                return Err(RequestError::Conflict {
                    route: route.to_string(),
                });
            }
            pending.insert(
                route.to_string(),
                PendingRequest {
                    generation,
                    link,
                    issued_at: Instant::now(),
                    reply: tx,
                },
            );
        }

        debug!(route, "sending request");
        if let Err(e) = self.sink.send_frame(Message::api_request(route, payload)).await {
            self.remove(route, generation);
            return Err(match e {
                TransportError::NotConnected => RequestError::NotConnected,
                other => RequestError::Transport(other),
            });
        }

        match tokio::time::timeout(self.config.timeout, &mut rx).await {
            Ok(Ok(reply)) => reply,
            // The entry was dropped without a reply.
            Ok(Err(_)) => Err(RequestError::ConnectionReset),
            Err(_) => {
                self.remove(route, generation);
                // A reply may have landed between the deadline and the removal.
                match rx.try_recv() {
                    Ok(reply) => reply,
                    Err(_) => {
                        warn!(route, timeout = ?self.config.timeout, "request timed out");
                        Err(RequestError::Timeout {
                            route: route.to_string(),
                            timeout: self.config.timeout,
                        })
                    }
                }
            }
        }
    }

    /// Completes the request pending on `route` with `message`.
    ///
    /// Returns false if nothing was pending.
    pub fn settle(&self, route: &str, message: Message) -> bool {
        let Some(entry) = self.table().remove(route) else {
            return false;
        };

        let reply = if message.is_success() {
            Ok(message)
        } else {
            Err(RequestError::Rejected(message.api_error()))
        };
        debug!(
            route,
            elapsed = ?entry.issued_at.elapsed(),
            ok = reply.is_ok(),
            "request settled"
        );
        // The caller may have given up already.
        let _ = entry.reply.send(reply);
        true
    }

    /// Rejects every pending request with [`RequestError::ConnectionReset`].
    ///
    /// Returns the number of requests rejected.
    pub fn reset(&self) -> usize {
        let drained: Vec<(String, PendingRequest)> = self.table().drain().collect();
        reject(drained)
    }

    /// Rejects the requests sent on `link` or an earlier connection.
    ///
    /// Requests on a newer connection stay pending. Returns the number of
    /// requests rejected.
    pub fn reset_link(&self, link: LinkId) -> usize {
        let drained: Vec<(String, PendingRequest)> = {
            let mut pending = self.table();
            let stale: Vec<String> = pending
                .iter()
                .filter(|(_, entry)| entry.link <= link)
                .map(|(route, _)| route.clone())
                .collect();
            stale
                .into_iter()
                .filter_map(|route| pending.remove_entry(&route))
                .collect()
        };
        reject(drained)
    }

    /// Number of requests awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.table().len()
    }

    /// Returns true if `route` has a request in flight.
    pub fn is_pending(&self, route: &str) -> bool {
        self.table().contains_key(route)
    }

    fn remove(&self, route: &str, generation: u64) {
        let mut pending = self.table();
        if pending.get(route).is_some_and(|e| e.generation == generation) {
            pending.remove(route);
        }
    }

    fn table(&self) -> MutexGuard<'_, HashMap<String, PendingRequest>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn reject(entries: Vec<(String, PendingRequest)>) -> usize {
    let count = entries.len();
    for (route, entry) in entries {
        debug!(route = %route, link = entry.link, "rejecting pending request");
        let _ = entry.reply.send(Err(RequestError::ConnectionReset));
    }
    count
}
