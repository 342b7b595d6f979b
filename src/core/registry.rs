//! Connection registry
//!
//! Maps transport handles to the user and session they carry, and user ids
//! back to their live handle. It holds routing hints only: losing it means
//! live notifications cannot be routed, never that data is lost.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::core::connection::{Connection, ConnectionState, TransportKind};
use crate::core::message_types::ServerMessage;
use crate::core::user::User;
use crate::error::{Result, StudyMateError};

#[derive(Default)]
struct RegistryInner {
    connections: HashMap<String, Connection>,
    by_user: HashMap<String, String>,
}

/// Read-only view of a connection
#[derive(Debug, Clone)]
pub struct ConnectionSnapshot {
    pub id: String,
    pub user: Option<User>,
    pub state: ConnectionState,
    pub remote_ip: Option<IpAddr>,
    pub transport: TransportKind,
}

#[derive(Default)]
pub struct ConnectionRegistry {
    inner: RwLock<RegistryInner>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection, returning its id
    pub async fn register(&self, connection: Connection) -> String {
        let id = connection.id.clone();
        self.inner
            .write()
            .await
            .connections
            .insert(id.clone(), connection);
        id
    }

    /// Remove a connection and its user mapping
    pub async fn unregister(&self, connection_id: &str) -> Option<ConnectionSnapshot> {
        let mut inner = self.inner.write().await;
        let connection = inner.connections.remove(connection_id)?;
        log::debug!(
            "Unregistered {} after {:?}",
            connection_id,
            connection.connection_duration()
        );

        if let Some(user_id) = connection.user_id() {
            if inner.by_user.get(user_id).map(String::as_str) == Some(connection_id) {
                inner.by_user.remove(user_id);
            }
        }
        Some(snapshot(&connection))
    }

    pub async fn snapshot(&self, connection_id: &str) -> Option<ConnectionSnapshot> {
        self.inner
            .read()
            .await
            .connections
            .get(connection_id)
            .map(snapshot)
    }

    /// Attach a user to a connection. A user seen on a newer connection is
    /// routed there from now on.
    pub async fn bind_user(&self, connection_id: &str, user: User) -> Result<()> {
        let mut inner = self.inner.write().await;
        let connection = inner
            .connections
            .get_mut(connection_id)
            .ok_or_else(|| StudyMateError::ConnectionNotFound(connection_id.to_string()))?;

        let previous = connection.user.replace(user.clone());
        if let Some(previous) = previous {
            if previous.id != user.id
                && inner.by_user.get(&previous.id).map(String::as_str) == Some(connection_id)
            {
                inner.by_user.remove(&previous.id);
            }
        }
        inner.by_user.insert(user.id, connection_id.to_string());
        Ok(())
    }

    pub async fn set_state(&self, connection_id: &str, state: ConnectionState) -> bool {
        let mut inner = self.inner.write().await;
        match inner.connections.get_mut(connection_id) {
            Some(connection) => {
                connection.state = state;
                true
            }
            None => false,
        }
    }

    /// Set the state of whichever connection currently carries `user_id`
    pub async fn set_user_state(&self, user_id: &str, state: ConnectionState) -> bool {
        let mut inner = self.inner.write().await;
        let RegistryInner {
            connections,
            by_user,
        } = &mut *inner;

        match by_user.get(user_id).and_then(|id| connections.get_mut(id)) {
            Some(connection) => {
                connection.state = state;
                true
            }
            None => false,
        }
    }

    /// Clear a user's session reference, but only if it still points at
    /// `session_id`
    pub async fn end_user_session(&self, user_id: &str, session_id: &str) -> bool {
        let mut inner = self.inner.write().await;
        let RegistryInner {
            connections,
            by_user,
        } = &mut *inner;

        match by_user.get(user_id).and_then(|id| connections.get_mut(id)) {
            Some(connection) if connection.state.session_id() == Some(session_id) => {
                connection.state = ConnectionState::Ended;
                true
            }
            _ => false,
        }
    }

    pub async fn user_state(&self, user_id: &str) -> Option<ConnectionState> {
        let inner = self.inner.read().await;
        inner
            .by_user
            .get(user_id)
            .and_then(|id| inner.connections.get(id))
            .map(|connection| connection.state.clone())
    }

    /// Mark the connection queued and return the epoch identifying this wait
    pub async fn begin_waiting(&self, connection_id: &str) -> Option<u64> {
        let mut inner = self.inner.write().await;
        let connection = inner.connections.get_mut(connection_id)?;
        connection.queue_epoch += 1;
        connection.state = ConnectionState::Queued;
        Some(connection.queue_epoch)
    }

    /// Whether the connection is still in the wait started at `epoch`
    pub async fn is_waiting(&self, connection_id: &str, epoch: u64) -> bool {
        self.inner
            .read()
            .await
            .connections
            .get(connection_id)
            .map_or(false, |connection| {
                connection.state == ConnectionState::Queued && connection.queue_epoch == epoch
            })
    }

    /// Deliver to a connection. Returns false when it is gone.
    pub async fn send(&self, connection_id: &str, message: ServerMessage) -> bool {
        match self.inner.read().await.connections.get(connection_id) {
            Some(connection) => connection.send(message),
            None => {
                log::debug!("Dropping event for unknown connection {}", connection_id);
                false
            }
        }
    }

    /// Deliver to whichever connection carries `user_id`. Best effort: an
    /// unreachable peer is logged and the event dropped.
    pub async fn notify_user(&self, user_id: &str, message: ServerMessage) -> bool {
        let inner = self.inner.read().await;
        let delivered = inner
            .by_user
            .get(user_id)
            .and_then(|id| inner.connections.get(id))
            .map_or(false, |connection| connection.send(message));

        if !delivered {
            log::warn!("Peer {} unreachable; event dropped", user_id);
        }
        delivered
    }

    pub async fn touch(&self, connection_id: &str) -> bool {
        match self.inner.write().await.connections.get_mut(connection_id) {
            Some(connection) => {
                connection.touch();
                true
            }
            None => false,
        }
    }

    /// Ids of connections of `transport` not seen within `timeout`
    pub async fn stale_connections(&self, transport: TransportKind, timeout: Duration) -> Vec<String> {
        self.inner
            .read()
            .await
            .connections
            .values()
            .filter(|connection| connection.transport == transport && connection.is_stale(timeout))
            .map(|connection| connection.id.clone())
            .collect()
    }

    // Get current connection count
    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.connections.len()
    }
}

fn snapshot(connection: &Connection) -> ConnectionSnapshot {
    ConnectionSnapshot {
        id: connection.id.clone(),
        user: connection.user.clone(),
        state: connection.state.clone(),
        remote_ip: connection.remote_ip,
        transport: connection.transport,
    }
}
