//! Messages exchanged through the relay.
//!
//! A [`SignalingMessage`] travels as the payload of a `data` frame:
//!
//! ```json
//! {"event":"data","from":"3f2a…","payload":{"type":"offer","sdp":"v=0…"}}
//! {"event":"data","payload":{"type":"candidate","candidate":{"candidate":"candidate:1 …","sdpMid":"0","sdpMLineIndex":0}}}
//! {"event":"ready"}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;
use crate::peer::types::{IceCandidate, SdpKind, SessionDescription};

/// Negotiation payload carried by the relay
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SignalingMessage {
    Offer { sdp: String },
    Answer { sdp: String },
    Candidate { candidate: IceCandidate },
}

impl SignalingMessage {
    /// Wire name of the variant
    pub fn kind(&self) -> &'static str {
        match self {
            SignalingMessage::Offer { .. } => "offer",
            SignalingMessage::Answer { .. } => "answer",
            SignalingMessage::Candidate { .. } => "candidate",
        }
    }

    /// Parse a payload, telling unknown `type` values apart from broken ones.
    pub fn from_value(value: Value) -> Result<Self, ProtocolError> {
        let kind = match value.get("type") {
            Some(Value::String(kind)) => kind.clone(),
            Some(other) => {
                return Err(ProtocolError::MalformedMessage(format!(
                    "`type` must be a string, got {other}"
                )))
            }
            None => {
                return Err(ProtocolError::MalformedMessage(
                    "missing `type` field".into(),
                ))
            }
        };

        match kind.as_str() {
            "offer" | "answer" | "candidate" => serde_json::from_value(value)
                .map_err(|e| ProtocolError::MalformedMessage(format!("{kind}: {e}"))),
            _ => Err(ProtocolError::UnknownMessageType(kind)),
        }
    }

    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| ProtocolError::MalformedMessage(e.to_string()))?;
        Self::from_value(value)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl From<SessionDescription> for SignalingMessage {
    fn from(desc: SessionDescription) -> Self {
        match desc.kind {
            SdpKind::Offer => SignalingMessage::Offer { sdp: desc.sdp },
            SdpKind::Answer => SignalingMessage::Answer { sdp: desc.sdp },
        }
    }
}

impl From<IceCandidate> for SignalingMessage {
    fn from(candidate: IceCandidate) -> Self {
        SignalingMessage::Candidate { candidate }
    }
}

/// One frame of the relay protocol
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum RelayFrame {
    /// Client announces itself for a session
    Join { session: String, peer: String },
    /// Relay reports that the session has a counterpart
    Ready,
    /// Opaque negotiation payload, forwarded to the other participant
    Data {
        payload: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<String>,
    },
}

impl RelayFrame {
    pub fn data(message: &SignalingMessage, from: &str) -> Result<Self, serde_json::Error> {
        Ok(RelayFrame::Data {
            payload: serde_json::to_value(message)?,
            from: Some(from.to_owned()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn offer_and_answer_use_type_and_sdp() {
        let offer = SignalingMessage::Offer { sdp: "S1".into() };
        assert_eq!(
            serde_json::to_value(&offer).unwrap(),
            json!({"type": "offer", "sdp": "S1"})
        );
        let answer = SignalingMessage::Answer { sdp: "S2".into() };
        assert_eq!(
            serde_json::to_value(&answer).unwrap(),
            json!({"type": "answer", "sdp": "S2"})
        );
    }

    #[test]
    fn candidate_round_trips() {
        let msg = SignalingMessage::Candidate {
            candidate: IceCandidate {
                candidate: "candidate:842163049 1 udp 1677729535 198.51.100.7 61665 typ srflx"
                    .into(),
                sdp_mid: Some("0".into()),
                sdp_mline_index: Some(0),
                username_fragment: Some("Ufr4".into()),
            },
        };
        let text = msg.to_json().unwrap();
        assert_eq!(SignalingMessage::from_json(&text).unwrap(), msg);
    }

    #[test]
    fn browser_candidate_payload_parses() {
        let text = r#"{"type":"candidate","candidate":{"candidate":"candidate:1 1 udp 1 10.0.0.1 9 typ host","sdpMid":"0","sdpMLineIndex":0,"usernameFragment":null}}"#;
        match SignalingMessage::from_json(text).unwrap() {
            SignalingMessage::Candidate { candidate } => {
                assert_eq!(candidate.kind(), Some("host"));
                assert_eq!(candidate.username_fragment, None);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_type_is_a_protocol_error() {
        let err = SignalingMessage::from_json(r#"{"type":"bye"}"#).unwrap_err();
        assert_eq!(err, ProtocolError::UnknownMessageType("bye".into()));
    }

    #[test]
    fn missing_fields_are_malformed() {
        assert!(matches!(
            SignalingMessage::from_json(r#"{"type":"offer"}"#),
            Err(ProtocolError::MalformedMessage(_))
        ));
        assert!(matches!(
            SignalingMessage::from_json(r#"{"sdp":"x"}"#),
            Err(ProtocolError::MalformedMessage(_))
        ));
        assert!(matches!(
            SignalingMessage::from_json("not json"),
            Err(ProtocolError::MalformedMessage(_))
        ));
    }

    #[test]
    fn relay_frames_are_tagged_by_event() {
        let frame = RelayFrame::data(&SignalingMessage::Answer { sdp: "a".into() }, "p1").unwrap();
        assert_eq!(
            serde_json::to_value(&frame).unwrap(),
            json!({"event": "data", "from": "p1", "payload": {"type": "answer", "sdp": "a"}})
        );

        let ready: RelayFrame = serde_json::from_str(r#"{"event":"ready"}"#).unwrap();
        assert_eq!(ready, RelayFrame::Ready);

        let anonymous: RelayFrame =
            serde_json::from_str(r#"{"event":"data","payload":{"type":"offer","sdp":"x"}}"#)
                .unwrap();
        assert!(matches!(anonymous, RelayFrame::Data { from: None, .. }));
    }
}
