//! Control-channel wire protocol.
//!
//! Every message is a JSON object whose `type` field selects the variant.
//! The same enum is used in both directions; [`ControlMessage::is_request`]
//! tells which variants a client may send.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Proof-of-work answer attached to admission-controlled requests.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeSolution {
    pub target: String,
    pub nonce: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomAvailability {
    Open,
    Full,
    NotFound,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorReason {
    MalformedMessage,
    MissingData,
    UnknownMessageType,
    InvalidChallenge,
    RoomNotFound,
    RoomFull,
    NotInRoom,
    RoomIdUnavailable,
}

impl ErrorReason {
    pub fn message(self) -> &'static str {
        match self {
            ErrorReason::MalformedMessage => "Invalid message",
            ErrorReason::MissingData => "One or more required fields are missing",
            ErrorReason::UnknownMessageType => "Unknown message type",
            ErrorReason::InvalidChallenge => "Invalid challenge",
            ErrorReason::RoomNotFound => "Room does not exist",
            ErrorReason::RoomFull => "Room is full",
            ErrorReason::NotInRoom => "Not a member of this room",
            ErrorReason::RoomIdUnavailable => "Could not allocate a room id",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    ChallengeRequest,
    ChallengeResponse {
        target: String,
        difficulty: u32,
    },
    CreateRoom {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        challenge: Option<ChallengeSolution>,
    },
    RoomCreated {
        room_id: String,
    },
    JoinRoom {
        room_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        challenge: Option<ChallengeSolution>,
    },
    RoomJoined {
        room_id: String,
        participants: usize,
    },
    LeaveRoom {
        room_id: String,
    },
    RoomLeft {
        room_id: String,
    },
    RoomStatus {
        room_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        challenge: Option<ChallengeSolution>,
    },
    RoomStatusResponse {
        room_id: String,
        status: RoomAvailability,
    },
    ParticipantJoined {
        room_id: String,
        participants: usize,
    },
    ParticipantLeft {
        room_id: String,
        participants: usize,
    },
    RoomReady {
        room_id: String,
        is_initiator: bool,
        participants: usize,
    },
    Offer {
        room_id: String,
        payload: Value,
    },
    Answer {
        room_id: String,
        payload: Value,
    },
    IceCandidate {
        room_id: String,
        payload: Value,
    },
    Error {
        reason: ErrorReason,
        message: String,
    },
}

/// Every `type` tag understood on the control channel.
pub const MESSAGE_KINDS: &[&str] = &[
    "challenge_request",
    "challenge_response",
    "create_room",
    "room_created",
    "join_room",
    "room_joined",
    "leave_room",
    "room_left",
    "room_status",
    "room_status_response",
    "participant_joined",
    "participant_left",
    "room_ready",
    "offer",
    "answer",
    "ice_candidate",
    "error",
];

impl ControlMessage {
    pub fn error(reason: ErrorReason) -> Self {
        ControlMessage::Error {
            reason,
            message: reason.message().to_string(),
        }
    }

    /// Parse one text frame, classifying failures into protocol errors.
    pub fn parse(text: &str) -> Result<Self, ErrorReason> {
        let value: Value =
            serde_json::from_str(text).map_err(|_| ErrorReason::MalformedMessage)?;
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(ErrorReason::MalformedMessage)?;
        if !MESSAGE_KINDS.contains(&kind) {
            return Err(ErrorReason::UnknownMessageType);
        }

        serde_json::from_value(value).map_err(|e| {
            // serde_json reports absent fields as "missing field `name`".
            if e.to_string().starts_with("missing field") {
                ErrorReason::MissingData
            } else {
                ErrorReason::MalformedMessage
            }
        })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ControlMessage::ChallengeRequest => "challenge_request",
            ControlMessage::ChallengeResponse { .. } => "challenge_response",
            ControlMessage::CreateRoom { .. } => "create_room",
            ControlMessage::RoomCreated { .. } => "room_created",
            ControlMessage::JoinRoom { .. } => "join_room",
            ControlMessage::RoomJoined { .. } => "room_joined",
            ControlMessage::LeaveRoom { .. } => "leave_room",
            ControlMessage::RoomLeft { .. } => "room_left",
            ControlMessage::RoomStatus { .. } => "room_status",
            ControlMessage::RoomStatusResponse { .. } => "room_status_response",
            ControlMessage::ParticipantJoined { .. } => "participant_joined",
            ControlMessage::ParticipantLeft { .. } => "participant_left",
            ControlMessage::RoomReady { .. } => "room_ready",
            ControlMessage::Offer { .. } => "offer",
            ControlMessage::Answer { .. } => "answer",
            ControlMessage::IceCandidate { .. } => "ice_candidate",
            ControlMessage::Error { .. } => "error",
        }
    }

    /// Whether a client is allowed to send this variant.
    pub fn is_request(&self) -> bool {
        matches!(
            self,
            ControlMessage::ChallengeRequest
                | ControlMessage::CreateRoom { .. }
                | ControlMessage::JoinRoom { .. }
                | ControlMessage::LeaveRoom { .. }
                | ControlMessage::RoomStatus { .. }
                | ControlMessage::Offer { .. }
                | ControlMessage::Answer { .. }
                | ControlMessage::IceCandidate { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tags_are_snake_case() {
        let msg = ControlMessage::RoomReady {
            room_id: "brave-fox-123".into(),
            is_initiator: true,
            participants: 2,
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "room_ready",
                "room_id": "brave-fox-123",
                "is_initiator": true,
                "participants": 2
            })
        );
    }

    #[test]
    fn unit_request_parses() {
        let msg = ControlMessage::parse(r#"{"type":"challenge_request"}"#).unwrap();
        assert_eq!(msg, ControlMessage::ChallengeRequest);
    }

    #[test]
    fn kind_matches_serialized_tag() {
        let samples = vec![
            ControlMessage::ChallengeRequest,
            ControlMessage::CreateRoom {
                room_name: None,
                challenge: None,
            },
            ControlMessage::RoomStatusResponse {
                room_id: "r".into(),
                status: RoomAvailability::NotFound,
            },
            ControlMessage::IceCandidate {
                room_id: "r".into(),
                payload: json!({"candidate": "x"}),
            },
            ControlMessage::error(ErrorReason::RoomFull),
        ];
        for msg in samples {
            let value = serde_json::to_value(&msg).unwrap();
            assert_eq!(value["type"], msg.kind());
            assert!(MESSAGE_KINDS.contains(&msg.kind()));
        }
    }

    #[test]
    fn parse_classifies_failures() {
        assert_eq!(
            ControlMessage::parse("not json"),
            Err(ErrorReason::MalformedMessage)
        );
        assert_eq!(
            ControlMessage::parse(r#"["join_room"]"#),
            Err(ErrorReason::MalformedMessage)
        );
        assert_eq!(
            ControlMessage::parse(r#"{"room_id":"x"}"#),
            Err(ErrorReason::MalformedMessage)
        );
        assert_eq!(
            ControlMessage::parse(r#"{"type":"teleport"}"#),
            Err(ErrorReason::UnknownMessageType)
        );
        assert_eq!(
            ControlMessage::parse(r#"{"type":"join_room"}"#),
            Err(ErrorReason::MissingData)
        );
        assert_eq!(
            ControlMessage::parse(r#"{"type":"join_room","room_id":7}"#),
            Err(ErrorReason::MalformedMessage)
        );
    }

    #[test]
    fn relay_payload_is_kept_verbatim() {
        let text = r#"{"type":"offer","room_id":"a-100","payload":{"sdp":"v=0\r\n","type":"offer"}}"#;
        let msg = ControlMessage::parse(text).unwrap();
        match &msg {
            ControlMessage::Offer { payload, .. } => {
                assert_eq!(payload["sdp"], "v=0\r\n");
            }
            other => panic!("unexpected {other:?}"),
        }
        let round: Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(round, serde_json::from_str::<Value>(text).unwrap());
    }

    #[test]
    fn error_carries_human_message() {
        let value = serde_json::to_value(ControlMessage::error(ErrorReason::InvalidChallenge)).unwrap();
        assert_eq!(value["reason"], "invalid_challenge");
        assert_eq!(value["message"], "Invalid challenge");
    }

    #[test]
    fn server_notifications_are_not_requests() {
        assert!(ControlMessage::ChallengeRequest.is_request());
        assert!(!ControlMessage::RoomCreated {
            room_id: "r".into()
        }
        .is_request());
    }
}
