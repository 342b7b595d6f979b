//! Per-connection state
//! Tracks who is on a transport handle and where they are in the
//! idle → queued → matched → ended lifecycle

use std::net::IpAddr;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use uuid::Uuid;
use log::warn;

use crate::core::message_types::ServerMessage;
use crate::core::user::User;

/// Where a connection is in the matchmaking lifecycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Queued,
    Matched(String),
    Ended,
}

impl ConnectionState {
    pub fn session_id(&self) -> Option<&str> {
        match self {
            ConnectionState::Matched(id) => Some(id),
            _ => None,
        }
    }

    /// Idle or ended: any wait entry for this connection is abandoned
    pub fn is_out_of_queue(&self) -> bool {
        matches!(self, ConnectionState::Idle | ConnectionState::Ended)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    WebSocket,
    Polling,
}

/// Represents one live transport handle
pub struct Connection {
    pub id: String,
    pub sender: mpsc::UnboundedSender<ServerMessage>,
    pub transport: TransportKind,
    pub remote_ip: Option<IpAddr>,
    pub user: Option<User>,
    pub state: ConnectionState,
    pub connected_at: Instant,
    pub last_seen: Instant,
    /// Bumped on every queue join so a stale no-match timer can tell it is stale
    pub queue_epoch: u64,
}

impl Connection {
    /// Create a new connection with a unique ID
    pub fn new(
        sender: mpsc::UnboundedSender<ServerMessage>,
        transport: TransportKind,
        remote_ip: Option<IpAddr>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            sender,
            transport,
            remote_ip,
            user: None,
            state: ConnectionState::Idle,
            connected_at: Instant::now(),
            last_seen: Instant::now(),
            queue_epoch: 0,
        }
    }

    /// Queue an event for delivery; false if the transport side is gone
    pub fn send(&self, message: ServerMessage) -> bool {
        match self.sender.send(message) {
            Ok(_) => true,
            Err(_) => {
                warn!("Failed to deliver event to connection {}", self.id);
                false
            }
        }
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user.as_ref().map(|user| user.id.as_str())
    }

    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    /// Check if the connection is stale (not seen for a while)
    pub fn is_stale(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }

    /// Calculate the connection duration
    pub fn connection_duration(&self) -> Duration {
        self.connected_at.elapsed()
    }
}
