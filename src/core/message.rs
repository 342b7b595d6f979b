use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::constants::SYSTEM_SENDER;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Message,
    System,
}

/// A chat line inside a session. Appended only, never edited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub content: String,
    pub sender_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: MessageKind,
}

impl Message {
    pub fn new(sender_id: String, content: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            content,
            sender_id,
            timestamp: Utc::now(),
            kind: MessageKind::Message,
        }
    }

    pub fn system(content: String) -> Self {
        Self {
            kind: MessageKind::System,
            ..Self::new(SYSTEM_SENDER.to_string(), content)
        }
    }

    pub fn is_system(&self) -> bool {
        self.kind == MessageKind::System
    }
}

/// Abuse report. Written once to the report list and never read back.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub id: String,
    pub session_id: String,
    pub reason: String,
    /// Transcript snapshot as the reporting client saw it
    pub messages: Vec<Value>,
    pub timestamp: DateTime<Utc>,
    pub origin_ip: String,
}

impl Report {
    pub fn new(session_id: String, reason: String, messages: Vec<Value>, origin_ip: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id,
            reason,
            messages,
            timestamp: Utc::now(),
            origin_ip,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_creation() {
        let msg = Message::new("user1".to_string(), "Hello".to_string());
        assert_eq!(msg.sender_id, "user1");
        assert_eq!(msg.content, "Hello");
        assert!(!msg.is_system());
    }

    #[test]
    fn test_system_message_wire_shape() {
        let msg = Message::system("You've been matched!".to_string());
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["senderId"], "system");
        assert_eq!(json["type"], "system");
    }
}
