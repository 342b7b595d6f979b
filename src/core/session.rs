//! The paired conversation between two matched users

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::message::Message;
use crate::core::user::{shared_tags, User};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoStatus {
    Pending,
    Accepted,
}

/// Outstanding or accepted call negotiation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoRequest {
    pub requester_id: String,
    pub status: VideoStatus,
}

/// A session always holds exactly two users; there is no way to add a third.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub users: [User; 2],
    pub shared_tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub video_request: Option<VideoRequest>,
}

impl Session {
    /// Pair `requester` with `partner`. Shared tags follow the requester's
    /// ordering and casing, and the transcript opens with one system message.
    pub fn new(requester: User, partner: User) -> Self {
        let shared = shared_tags(&requester.tags, &partner.tags);
        let greeting = if shared.is_empty() {
            "You've been matched! Say hello to your study partner.".to_string()
        } else {
            format!(
                "You've been matched! You both like: {}",
                shared.join(", ")
            )
        };

        Self {
            id: Uuid::new_v4().to_string(),
            users: [requester, partner],
            shared_tags: shared,
            created_at: Utc::now(),
            messages: vec![Message::system(greeting)],
            video_request: None,
        }
    }

    pub fn has_participant(&self, user_id: &str) -> bool {
        self.users.iter().any(|user| user.id == user_id)
    }

    /// The other participant, if `user_id` belongs to this session
    pub fn peer_of(&self, user_id: &str) -> Option<&User> {
        match (&self.users[0], &self.users[1]) {
            (first, second) if first.id == user_id => Some(second),
            (first, second) if second.id == user_id => Some(first),
            _ => None,
        }
    }

    pub fn append_message(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn has_pending_video_request(&self) -> bool {
        matches!(
            self.video_request,
            Some(VideoRequest {
                status: VideoStatus::Pending,
                ..
            })
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: &str, tags: &[&str]) -> User {
        User::new(id, tags.iter().map(|t| t.to_string()).collect())
    }

    #[test]
    fn test_session_shared_tags_and_greeting() {
        let session = Session::new(user("u1", &["CS", "Math"]), user("u2", &["math", "bio"]));
        assert_eq!(session.shared_tags, vec!["Math".to_string()]);
        assert_eq!(session.messages.len(), 1);
        assert!(session.messages[0].is_system());
        assert!(session.messages[0].content.contains("Math"));
        assert!(session.video_request.is_none());
    }

    #[test]
    fn test_peer_lookup() {
        let session = Session::new(user("u1", &["CS"]), user("u2", &["cs"]));
        assert_eq!(session.peer_of("u1").map(|u| u.id.as_str()), Some("u2"));
        assert_eq!(session.peer_of("u2").map(|u| u.id.as_str()), Some("u1"));
        assert!(session.peer_of("u3").is_none());
        assert!(session.has_participant("u1"));
        assert!(!session.has_participant("u3"));
    }

    #[test]
    fn test_session_wire_shape() {
        let session = Session::new(user("u1", &["CS"]), user("u2", &["cs"]));
        let json = serde_json::to_value(&session).unwrap();
        assert_eq!(json["users"].as_array().map(|u| u.len()), Some(2));
        assert_eq!(json["sharedTags"][0], "CS");
        assert!(json["createdAt"].is_string());
    }
}
