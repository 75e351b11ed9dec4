//! Signaling envelope and the channel that carries it to the other participant.

pub mod memory;
pub mod ws;

use crate::error::Result;
use crate::peer::types::{NetworkCandidate, SdpKind, SessionDescription};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Message exchanged between the two participants through the relay.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SignalMessage {
    Offer {
        sdp: String,
    },
    Answer {
        sdp: String,
    },
    Candidate {
        /// media line index
        label: u16,
        /// media stream id
        id: Option<String>,
        candidate: String,
    },
    Bye,
}

impl SignalMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            SignalMessage::Offer { .. } => "offer",
            SignalMessage::Answer { .. } => "answer",
            SignalMessage::Candidate { .. } => "candidate",
            SignalMessage::Bye => "bye",
        }
    }
}

impl From<&SessionDescription> for SignalMessage {
    fn from(desc: &SessionDescription) -> Self {
        match desc.kind {
            SdpKind::Offer => SignalMessage::Offer {
                sdp: desc.sdp.clone(),
            },
            SdpKind::Answer => SignalMessage::Answer {
                sdp: desc.sdp.clone(),
            },
        }
    }
}

impl From<&NetworkCandidate> for SignalMessage {
    fn from(c: &NetworkCandidate) -> Self {
        SignalMessage::Candidate {
            label: c.sdp_mline_index,
            id: c.sdp_mid.clone(),
            candidate: c.candidate.clone(),
        }
    }
}

/// What the channel delivers to the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Message(SignalMessage),
    PeerLeft(String),
    Closed,
}

/// Outbound half of the signaling channel. Sends from one participant arrive
/// at the other in send order.
#[async_trait]
pub trait SignalingChannel: Send + Sync {
    async fn send(&self, message: &SignalMessage) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn candidate_wire_shape() {
        let msg = SignalMessage::from(&NetworkCandidate {
            candidate: "candidate:1 1 udp 2122260223 10.0.0.2 50000 typ host".into(),
            sdp_mid: None,
            sdp_mline_index: 0,
        });
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({
                "type": "candidate",
                "label": 0,
                "id": null,
                "candidate": "candidate:1 1 udp 2122260223 10.0.0.2 50000 typ host",
            })
        );
    }

    #[test]
    fn parses_every_envelope() {
        let offer: SignalMessage = serde_json::from_str(r#"{"type":"offer","sdp":"v=0"}"#).unwrap();
        assert_eq!(offer, SignalMessage::Offer { sdp: "v=0".into() });

        let bye: SignalMessage = serde_json::from_str(r#"{"type":"bye"}"#).unwrap();
        assert_eq!(bye, SignalMessage::Bye);

        let cand: SignalMessage =
            serde_json::from_str(r#"{"type":"candidate","label":1,"id":"video","candidate":"c"}"#)
                .unwrap();
        assert_eq!(
            cand,
            SignalMessage::Candidate {
                label: 1,
                id: Some("video".into()),
                candidate: "c".into()
            }
        );
    }

    #[test]
    fn unknown_type_is_an_error() {
        assert!(serde_json::from_str::<SignalMessage>(r#"{"type":"renegotiate"}"#).is_err());
    }

    #[test]
    fn description_maps_to_matching_envelope() {
        let answer = SessionDescription::answer("v=0 a");
        assert_eq!(SignalMessage::from(&answer).kind(), "answer");
    }
}
