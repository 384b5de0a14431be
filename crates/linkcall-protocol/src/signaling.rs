//! Call-signaling payloads carried on the broadcast channel.
//!
//! The broadcast channel is shared by every connected client, so each
//! outgoing signal names its target with `targetUserId` and the server relays
//! it. Servers that know the sender add `fromUserId` when relaying.

use linkcall_core::{CallKind, IceCandidate, SessionDescription, UserId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ProtocolError, ProtocolResult};
use crate::types::{Message, to_payload};

/// Broadcast name of a call offer.
pub const CALL_OFFER: &str = "call_offer";
/// Broadcast name of a call answer.
pub const CALL_ANSWER: &str = "call_answer";
/// Broadcast name of an ICE candidate.
pub const ICE_CANDIDATE: &str = "ice_candidate";

/// `{ targetUserId, callType, offer }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallOffer {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_user_id: Option<UserId>,
    pub call_type: CallKind,
    pub offer: SessionDescription,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_user_id: Option<UserId>,
}

/// `{ answer, targetUserId }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallAnswer {
    pub answer: SessionDescription,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_user_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_user_id: Option<UserId>,
}

/// `{ candidate, targetUserId }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateSignal {
    pub candidate: IceCandidate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_user_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_user_id: Option<UserId>,
}

/// One signaling message, in either direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    Offer(CallOffer),
    Answer(CallAnswer),
    Candidate(CandidateSignal),
}

impl Signal {
    /// Outgoing offer to `target`.
    pub fn offer(target: UserId, call_type: CallKind, offer: SessionDescription) -> Self {
        Self::Offer(CallOffer {
            target_user_id: Some(target),
            call_type,
            offer,
            from_user_id: None,
        })
    }

    /// Outgoing answer to `target`.
    pub fn answer(target: UserId, answer: SessionDescription) -> Self {
        Self::Answer(CallAnswer {
            answer,
            target_user_id: Some(target),
            from_user_id: None,
        })
    }

    /// Outgoing ICE candidate to `target`.
    pub fn candidate(target: UserId, candidate: IceCandidate) -> Self {
        Self::Candidate(CandidateSignal {
            candidate,
            target_user_id: Some(target),
            from_user_id: None,
        })
    }

    /// Returns the broadcast name for this signal.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Offer(_) => CALL_OFFER,
            Self::Answer(_) => CALL_ANSWER,
            Self::Candidate(_) => ICE_CANDIDATE,
        }
    }

    /// Returns the routing target.
    pub fn target(&self) -> Option<&UserId> {
        match self {
            Self::Offer(o) => o.target_user_id.as_ref(),
            Self::Answer(a) => a.target_user_id.as_ref(),
            Self::Candidate(c) => c.target_user_id.as_ref(),
        }
    }

    /// Returns true if `name` is a signaling broadcast.
    pub fn is_signaling(name: &str) -> bool {
        matches!(name, CALL_OFFER | CALL_ANSWER | ICE_CANDIDATE)
    }

    /// Encodes this signal as a `broadcast:<name>` message.
    pub fn to_message(&self) -> ProtocolResult<Message> {
        let payload = match self {
            Self::Offer(o) => to_payload(o)?,
            Self::Answer(a) => to_payload(a)?,
            Self::Candidate(c) => to_payload(c)?,
        };
        Ok(Message::broadcast(self.name(), payload))
    }

    /// Decodes a signaling broadcast.
    ///
    /// Returns `Ok(None)` if `name` is not a signaling broadcast.
    pub fn from_broadcast(
        name: &str,
        payload: Option<&Map<String, Value>>,
    ) -> ProtocolResult<Option<Self>> {
        if !Self::is_signaling(name) {
            return Ok(None);
        }
        let value = Value::Object(payload.cloned().unwrap_or_default());
        let signal = match name {
            CALL_OFFER => Self::Offer(decode(name, value)?),
            CALL_ANSWER => Self::Answer(decode(name, value)?),
            _ => Self::Candidate(decode(name, value)?),
        };
        Ok(Some(signal))
    }
}

fn decode<T: serde::de::DeserializeOwned>(name: &str, value: Value) -> ProtocolResult<T> {
    serde_json::from_value(value)
        .map_err(|e| ProtocolError::malformed(format!("invalid {} payload: {}", name, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn offer_payload_shape() {
        let signal = Signal::offer(
            UserId::Number(7),
            CallKind::Video,
            SessionDescription::offer("v=0"),
        );
        let msg = signal.to_message().unwrap();
        assert_eq!(msg.event, "broadcast:call_offer");
        insta::assert_json_snapshot!(msg.payload, @r#"
        {
          "callType": "video",
          "offer": {
            "sdp": "v=0",
            "type": "offer"
          },
          "targetUserId": 7
        }
        "#);
    }

    #[test]
    fn candidate_is_tagged_with_target() {
        let signal = Signal::candidate(UserId::from("bob"), IceCandidate::new("candidate:1"));
        let msg = signal.to_message().unwrap();
        let payload = msg.payload.unwrap();
        assert_eq!(payload["targetUserId"], "bob");
        assert_eq!(payload["candidate"]["candidate"], "candidate:1");
    }

    #[test]
    fn decode_incoming_answer() {
        let payload = json!({
            "answer": {"type": "answer", "sdp": "v=0"},
            "fromUserId": 3
        });
        let signal = Signal::from_broadcast(CALL_ANSWER, payload.as_object())
            .unwrap()
            .unwrap();
        match signal {
            Signal::Answer(a) => {
                assert_eq!(a.answer, SessionDescription::answer("v=0"));
                assert_eq!(a.from_user_id, Some(UserId::Number(3)));
                assert!(a.target_user_id.is_none());
            }
            other => panic!("expected answer, got {:?}", other),
        }
    }

    #[test]
    fn non_signaling_broadcast_is_ignored() {
        let result = Signal::from_broadcast("user_online", None).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn invalid_signaling_payload_is_malformed() {
        let payload = json!({"callType": "hologram"});
        let result = Signal::from_broadcast(CALL_OFFER, payload.as_object());
        assert!(matches!(result, Err(ProtocolError::Malformed { .. })));
    }
}
