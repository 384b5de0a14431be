//! The wire message and its routing classification.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::{ProtocolError, ProtocolResult};

/// The single wire unit exchanged in both directions.
///
/// `event` is namespaced as `<class>:<name>` or `<class>/<name>`; the class
/// decides how the frame is routed (see [`EventKind`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Namespaced event name.
    pub event: String,
    /// HTTP-style status, present on api responses and service errors.
    #[serde(
        default,
        deserialize_with = "lenient_status",
        skip_serializing_if = "Option::is_none"
    )]
    pub status: Option<u16>,
    /// Event payload; always a JSON object when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Map<String, Value>>,
    /// Client-assigned issue time in Unix milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl Message {
    /// Creates a message with only the event name set.
    pub fn new(event: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            status: None,
            payload: None,
            timestamp: None,
        }
    }

    /// Creates an api request for `route`, stamped with the current time.
    pub fn api_request(route: &str, payload: Map<String, Value>) -> Self {
        Self::new(format!("{}/{}", API_CLASS, route))
            .with_payload(payload)
            .with_timestamp(chrono::Utc::now().timestamp_millis())
    }

    /// Creates a `broadcast:<name>` message.
    pub fn broadcast(name: &str, payload: Map<String, Value>) -> Self {
        Self::new(format!("{}:{}", BROADCAST_CLASS, name)).with_payload(payload)
    }

    /// Creates a `service:<name>` message.
    pub fn service(name: &str) -> Self {
        Self::new(format!("{}:{}", SERVICE_CLASS, name))
    }

    /// The heartbeat ping.
    pub fn ping() -> Self {
        Self::service(PING)
    }

    /// Builder: set the payload.
    pub fn with_payload(mut self, payload: Map<String, Value>) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Builder: set the status.
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Builder: set the timestamp.
    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Classifies this message for routing.
    pub fn kind(&self) -> EventKind<'_> {
        EventKind::classify(&self.event)
    }

    /// Returns true for a 200 status.
    pub fn is_success(&self) -> bool {
        self.status == Some(200)
    }

    /// Returns a string field of the payload.
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.as_ref()?.get(key)?.as_str()
    }

    /// Extracts the error details carried by a failed api response.
    pub fn api_error(&self) -> ApiError {
        let messages = self
            .payload
            .as_ref()
            .and_then(|p| p.get("messages"))
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        ApiError {
            status: self.status,
            message: self.payload_str("message").map(str::to_string),
            messages,
        }
    }
}

/// Converts any serializable value into a message payload.
///
/// # Errors
///
/// Returns [`ProtocolError::Malformed`] if the value does not serialize to a
/// JSON object.
pub fn to_payload<T: Serialize>(value: &T) -> ProtocolResult<Map<String, Value>> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(ProtocolError::malformed(format!(
            "payload must be an object, got {}",
            json_type_name(&other)
        ))),
    }
}

pub(crate) fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Class prefix of control-plane events.
pub const SERVICE_CLASS: &str = "service";
/// Class prefix of server push notifications.
pub const BROADCAST_CLASS: &str = "broadcast";
/// Class prefix of request/response events.
pub const API_CLASS: &str = "api";

/// Heartbeat ping name.
pub const PING: &str = "ping";
/// Heartbeat reply name.
pub const PONG: &str = "pong";
/// Service error pseudo-event name.
pub const ERROR: &str = "error";

/// Splits `<class>:<name>` or `<class>/<name>` at the first separator.
fn split_event(event: &str) -> Option<(&str, &str)> {
    let idx = event.find([':', '/'])?;
    Some((&event[..idx], &event[idx + 1..]))
}

/// Routing class of an inbound message, decoded once at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind<'a> {
    /// `service:error`; checked first so no service handler can shadow it.
    ServiceError,
    /// `broadcast:<name>`.
    Broadcast(&'a str),
    /// `service:<name>` other than `error`.
    Service(ServiceEvent<'a>),
    /// `api/<route>` or `api:<route>`.
    ApiResponse(&'a str),
    /// Any other prefix; dropped by the router.
    Unrecognized,
}

impl<'a> EventKind<'a> {
    /// Classifies an event name in fixed priority order.
    pub fn classify(event: &'a str) -> Self {
        let Some((class, name)) = split_event(event) else {
            return Self::Unrecognized;
        };

        if class == SERVICE_CLASS && name == ERROR {
            Self::ServiceError
        } else if class == BROADCAST_CLASS {
            Self::Broadcast(name)
        } else if class == SERVICE_CLASS {
            Self::Service(ServiceEvent::from_name(name))
        } else if class == API_CLASS && !name.is_empty() {
            Self::ApiResponse(name)
        } else {
            Self::Unrecognized
        }
    }
}

/// Known control-plane events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceEvent<'a> {
    Ping,
    Pong,
    ConnectionEstablished,
    ConnectionClosed,
    /// A service name without a handler; ignored.
    Other(&'a str),
}

impl<'a> ServiceEvent<'a> {
    /// Looks up the handler for a service name.
    pub fn from_name(name: &'a str) -> Self {
        match name {
            PING => Self::Ping,
            PONG => Self::Pong,
            "connection_established" => Self::ConnectionEstablished,
            "connection_closed" => Self::ConnectionClosed,
            other => Self::Other(other),
        }
    }
}

/// Failure details of a non-200 api response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApiError {
    /// Response status.
    pub status: Option<u16>,
    /// Primary message from `payload.message`.
    pub message: Option<String>,
    /// Validation-style messages from `payload.messages`.
    pub messages: Vec<String>,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "status {}", status)?,
            None => f.write_str("no status")?,
        }
        if let Some(ref message) = self.message {
            write!(f, ": {}", message)?;
        }
        if !self.messages.is_empty() {
            write!(f, " ({})", self.messages.join("; "))?;
        }
        Ok(())
    }
}

impl std::error::Error for ApiError {}

/// Out-of-range numbers saturate; a status that is not a number is dropped.
fn lenient_status<'de, D>(deserializer: D) -> Result<Option<u16>, D::Error>
where
    D: Deserializer<'de>,
{
    let status = match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(n)) => match (n.as_u64(), n.as_i64()) {
            (Some(n), _) => Some(u16::try_from(n).unwrap_or(u16::MAX)),
            (None, Some(_)) => Some(0),
            // Float casts saturate.
            (None, None) => n.as_f64().map(|f| f as u16),
        },
        _ => None,
    };
    Ok(status)
}
