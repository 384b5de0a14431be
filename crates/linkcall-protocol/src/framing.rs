//! Text-frame encoding.
//!
//! Every WebSocket text frame carries exactly one JSON [`Message`]. Decoding
//! validates the shape before deserializing so a bad frame is reported as
//! [`ProtocolError::Malformed`] with a reason the router can log.

use serde_json::Value;

use crate::MAX_MESSAGE_SIZE;
use crate::error::{ProtocolError, ProtocolResult};
use crate::types::{Message, json_type_name};

/// Encodes a message into the text of one frame.
///
/// # Example
///
/// ```rust
/// use linkcall_protocol::{encode_message, Message};
///
/// let text = encode_message(&Message::ping()).unwrap();
/// assert_eq!(text, r#"{"event":"service:ping"}"#);
/// ```
pub fn encode_message(message: &Message) -> ProtocolResult<String> {
    if message.event.is_empty() {
        return Err(ProtocolError::malformed("event must not be empty"));
    }
    let text = serde_json::to_string(message)?;
    if text.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            size: text.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }
    Ok(text)
}

/// Decodes and validates the text of one frame.
///
/// # Example
///
/// ```rust
/// use linkcall_protocol::decode_message;
///
/// let msg = decode_message(r#"{"event":"api/login","status":200}"#).unwrap();
/// assert!(msg.is_success());
/// ```
pub fn decode_message(text: &str) -> ProtocolResult<Message> {
    if text.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            size: text.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }

    let value: Value = serde_json::from_str(text)
        .map_err(|e| ProtocolError::malformed(format!("invalid JSON: {}", e)))?;

    let Value::Object(ref fields) = value else {
        return Err(ProtocolError::malformed(format!(
            "frame must be an object, got {}",
            json_type_name(&value)
        )));
    };

    match fields.get("event") {
        Some(Value::String(event)) if !event.is_empty() => {}
        Some(Value::String(_)) => return Err(ProtocolError::malformed("event is empty")),
        Some(other) => {
            return Err(ProtocolError::malformed(format!(
                "event must be a string, got {}",
                json_type_name(other)
            )));
        }
        None => return Err(ProtocolError::malformed("missing event")),
    }

    match fields.get("payload") {
        None | Some(Value::Null) | Some(Value::Object(_)) => {}
        Some(other) => {
            return Err(ProtocolError::malformed(format!(
                "payload must be an object, got {}",
                json_type_name(other)
            )));
        }
    }

    serde_json::from_value(value).map_err(|e| ProtocolError::malformed(e.to_string()))
}
