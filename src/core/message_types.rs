//! Push-channel envelopes: `{"type": ..., "payload": {...}}`
//!
//! Both directions are closed enums, so an unknown `type` or a payload
//! missing a field is rejected at parse time rather than falling through.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::MAX_ENVELOPE_SIZE;
use crate::core::message::Message;
use crate::core::session::Session;
use crate::core::user::User;
use crate::error::{Result, StudyMateError};

/// Client-to-server message types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum ClientMessage {
    /// Ask to be paired
    JoinQueue { user: User },

    /// Withdraw from the wait queue
    LeaveQueue {},

    /// Chat line for the current session
    ChatMessage { content: String },

    /// Start a call; the offer is relayed untouched
    VideoRequest {
        #[serde(default)]
        requester_id: Option<String>,
        #[serde(default)]
        offer: Value,
    },

    /// Answer a pending call request
    VideoResponse {
        accepted: bool,
        #[serde(default)]
        payload: Value,
    },

    /// Trickled ICE candidate, relayed untouched
    IceCandidate { candidate: Value },

    /// Leave the current session
    SessionEnded {},
}

impl ClientMessage {
    /// Parse a raw envelope. A missing `payload` is treated as `{}`.
    pub fn parse(text: &str) -> Result<Self> {
        if text.len() > MAX_ENVELOPE_SIZE {
            return Err(StudyMateError::MalformedInput(format!(
                "Envelope too large: {} bytes",
                text.len()
            )));
        }

        let mut envelope: Value = serde_json::from_str(text)
            .map_err(|e| StudyMateError::MalformedInput(format!("Invalid JSON: {}", e)))?;

        let object = envelope.as_object_mut().ok_or_else(|| {
            StudyMateError::MalformedInput("Envelope must be a JSON object".to_string())
        })?;

        match object.get("type") {
            Some(Value::String(_)) => {}
            _ => {
                return Err(StudyMateError::MalformedInput(
                    "Envelope is missing a string `type`".to_string(),
                ))
            }
        }

        match object.get("payload") {
            None | Some(Value::Null) => {
                object.insert("payload".to_string(), Value::Object(Default::default()));
            }
            Some(_) => {}
        }

        serde_json::from_value(envelope)
            .map_err(|e| StudyMateError::MalformedInput(e.to_string()))
    }

    /// Wire name of this message, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Self::JoinQueue { .. } => "join_queue",
            Self::LeaveQueue {} => "leave_queue",
            Self::ChatMessage { .. } => "chat_message",
            Self::VideoRequest { .. } => "video_request",
            Self::VideoResponse { .. } => "video_response",
            Self::IceCandidate { .. } => "ice_candidate",
            Self::SessionEnded {} => "session_ended",
        }
    }
}

/// Server-to-client message types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum ServerMessage {
    /// Both participants receive the same session
    MatchFound { session: Session },

    /// Queued without an immediate partner
    Waiting { queue_length: usize },

    /// Still queued after the no-match timeout
    NoMatch { message: String },

    QueueLeft { success: bool },

    ChatMessage { message: Message },

    VideoRequest { requester_id: String, offer: Value },

    VideoResponse { accepted: bool, payload: Value },

    IceCandidate { candidate: Value },

    /// The peer's connection closed
    UserDisconnected {},

    /// The peer ended the session
    SessionEnded {},

    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>, code: &str) -> Self {
        Self::Error {
            message: message.into(),
            code: Some(code.to_string()),
        }
    }

    pub fn from_error(err: &StudyMateError) -> Self {
        Self::error(err.to_string(), err.code())
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_join_queue() {
        let text = json!({
            "type": "join_queue",
            "payload": {"user": {"id": "u1", "tags": ["CS", "Math"]}}
        })
        .to_string();

        match ClientMessage::parse(&text).unwrap() {
            ClientMessage::JoinQueue { user } => {
                assert_eq!(user.id, "u1");
                assert_eq!(user.tags, vec!["CS".to_string(), "Math".to_string()]);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_parse_empty_payloads() {
        assert_eq!(
            ClientMessage::parse(r#"{"type":"leave_queue","payload":{}}"#).unwrap(),
            ClientMessage::LeaveQueue {}
        );
        assert_eq!(
            ClientMessage::parse(r#"{"type":"session_ended"}"#).unwrap(),
            ClientMessage::SessionEnded {}
        );
    }

    #[test]
    fn test_parse_video_request_camel_case() {
        let text = r#"{"type":"video_request","payload":{"requesterId":"u1","offer":{"sdp":"v=0"}}}"#;
        match ClientMessage::parse(text).unwrap() {
            ClientMessage::VideoRequest { requester_id, offer } => {
                assert_eq!(requester_id.as_deref(), Some("u1"));
                assert_eq!(offer["sdp"], "v=0");
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for text in [
            "not json",
            "[]",
            r#"{"payload":{}}"#,
            r#"{"type":"teleport","payload":{}}"#,
            r#"{"type":"chat_message","payload":{}}"#,
            r#"{"type":"join_queue","payload":{"user":{"tags":[]}}}"#,
        ] {
            let err = ClientMessage::parse(text).unwrap_err();
            assert_eq!(err.code(), "MALFORMED_INPUT", "accepted: {}", text);
        }
    }

    #[test]
    fn test_server_message_envelope() {
        let value = serde_json::to_value(ServerMessage::QueueLeft { success: true }).unwrap();
        assert_eq!(value, json!({"type": "queue_left", "payload": {"success": true}}));

        let value = serde_json::to_value(ServerMessage::UserDisconnected {}).unwrap();
        assert_eq!(value, json!({"type": "user_disconnected", "payload": {}}));

        let value = serde_json::to_value(ServerMessage::Error {
            message: "boom".to_string(),
            code: None,
        })
        .unwrap();
        assert_eq!(value, json!({"type": "error", "payload": {"message": "boom"}}));
    }
}
