//! Long-polling transport
//!
//! For clients that cannot hold a WebSocket open. Each polling connection
//! gets a mailbox; events pushed by the engine wait there until the client
//! drains them. Connections that stop polling are reaped as if closed.

use log::{debug, info};
use serde::Serialize;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::core::connection::TransportKind;
use crate::core::message_types::{ClientMessage, ServerMessage};
use crate::core::rate_limiter::RouteClass;
use crate::core::server::SharedServerManager;
use crate::error::{Result, StudyMateError};

/// Longest a drain request may wait for the first event
pub const MAX_POLL_WAIT: Duration = Duration::from_secs(25);

type Mailbox = Arc<Mutex<mpsc::UnboundedReceiver<ServerMessage>>>;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollConnected {
    pub connection_id: String,
}

#[derive(Debug, Serialize)]
pub struct PollEvents {
    pub events: Vec<ServerMessage>,
}

pub struct PollingTransport {
    server: SharedServerManager,
    mailboxes: Mutex<HashMap<String, Mailbox>>,
}

pub type SharedPollingTransport = Arc<PollingTransport>;

impl PollingTransport {
    pub fn new(server: SharedServerManager) -> Self {
        Self {
            server,
            mailboxes: Mutex::new(HashMap::new()),
        }
    }

    pub async fn connect(&self, remote_ip: IpAddr) -> PollConnected {
        let (tx, rx) = mpsc::unbounded_channel();
        let connection_id = self
            .server
            .sessions()
            .connect(tx, TransportKind::Polling, Some(remote_ip))
            .await;

        self.mailboxes
            .lock()
            .await
            .insert(connection_id.clone(), Arc::new(Mutex::new(rx)));
        PollConnected { connection_id }
    }

    /// Hand one envelope to the engine. Asking to be paired counts against
    /// the match-initiation limit of the caller's address.
    pub async fn send(&self, connection_id: &str, body: &[u8], ip: IpAddr) -> Result<()> {
        self.mailbox(connection_id).await?;
        let sessions = self.server.sessions();
        sessions.registry().touch(connection_id).await;

        let parsed = std::str::from_utf8(body)
            .map_err(|_| StudyMateError::MalformedInput("Body is not valid UTF-8".to_string()))
            .and_then(ClientMessage::parse);
        let message = match parsed {
            Ok(message) => message,
            Err(e) => {
                sessions.reject_malformed(connection_id, &e).await;
                return Err(e);
            }
        };

        if matches!(message, ClientMessage::JoinQueue { .. }) {
            self.server.check_rate(RouteClass::MatchInitiation, ip).await?;
        }
        sessions.handle_message(connection_id, message).await
    }

    /// Take every pending event. With `wait`, an empty mailbox is given up
    /// to that long (capped) to receive its first event.
    pub async fn drain(&self, connection_id: &str, wait: Option<Duration>) -> Result<PollEvents> {
        let mailbox = self.mailbox(connection_id).await?;
        self.server.sessions().registry().touch(connection_id).await;

        let mut receiver = mailbox.lock().await;
        let mut events = Vec::new();
        while let Ok(event) = receiver.try_recv() {
            events.push(event);
        }

        if let Some(wait) = wait.filter(|_| events.is_empty()) {
            if let Ok(Some(event)) =
                tokio::time::timeout(wait.min(MAX_POLL_WAIT), receiver.recv()).await
            {
                events.push(event);
                while let Ok(event) = receiver.try_recv() {
                    events.push(event);
                }
            }
            // A long wait must not count as idleness
            self.server.sessions().registry().touch(connection_id).await;
        }

        Ok(PollEvents { events })
    }

    pub async fn disconnect(&self, connection_id: &str) -> Result<()> {
        let removed = self.mailboxes.lock().await.remove(connection_id);
        if removed.is_none() {
            return Err(StudyMateError::ConnectionNotFound(connection_id.to_string()));
        }
        self.server.sessions().disconnect(connection_id).await;
        Ok(())
    }

    /// Close polling connections idle for longer than the configured timeout
    pub async fn reap_idle(&self) -> usize {
        let timeout = self.server.config().poll_timeout;
        let stale = self
            .server
            .registry()
            .stale_connections(TransportKind::Polling, timeout)
            .await;

        for connection_id in &stale {
            debug!("Reaping idle polling connection {}", connection_id);
            self.mailboxes.lock().await.remove(connection_id);
            self.server.sessions().disconnect(connection_id).await;
        }
        if !stale.is_empty() {
            info!("Reaped {} idle polling connections", stale.len());
        }
        stale.len()
    }

    pub fn start_reaper(self: Arc<Self>) -> JoinHandle<()> {
        let every = (self.server.config().poll_timeout / 2).max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                self.reap_idle().await;
            }
        })
    }

    async fn mailbox(&self, connection_id: &str) -> Result<Mailbox> {
        self.mailboxes
            .lock()
            .await
            .get(connection_id)
            .cloned()
            .ok_or_else(|| StudyMateError::ConnectionNotFound(connection_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::core::server::ServerManager;
    use crate::storage::MemoryStore;

    fn transport(config: ServerConfig) -> PollingTransport {
        let server = ServerManager::new(config, Arc::new(MemoryStore::new())).unwrap();
        PollingTransport::new(Arc::new(server))
    }

    fn ip() -> IpAddr {
        "203.0.113.10".parse().unwrap()
    }

    #[tokio::test]
    async fn test_send_then_drain() {
        let polling = transport(ServerConfig::for_testing());
        let id = polling.connect(ip()).await.connection_id;

        polling
            .send(&id, br#"{"type":"join_queue","payload":{"user":{"id":"p1","tags":["CS"]}}}"#, ip())
            .await
            .unwrap();

        let drained = polling.drain(&id, None).await.unwrap();
        assert_eq!(drained.events, vec![ServerMessage::Waiting { queue_length: 1 }]);
        assert!(polling.drain(&id, None).await.unwrap().events.is_empty());
    }

    #[tokio::test]
    async fn test_drain_waits_for_first_event() {
        let polling = transport(ServerConfig::for_testing());
        let id = polling.connect(ip()).await.connection_id;
        polling
            .send(&id, br#"{"type":"join_queue","payload":{"user":{"id":"p1","tags":["CS"]}}}"#, ip())
            .await
            .unwrap();
        polling.drain(&id, None).await.unwrap();

        // The no-match notice arrives after the short test timeout
        let drained = polling.drain(&id, Some(Duration::from_secs(2))).await.unwrap();
        assert!(matches!(drained.events.as_slice(), [ServerMessage::NoMatch { .. }]));
    }

    #[tokio::test]
    async fn test_malformed_body_rejected_and_reported() {
        let polling = transport(ServerConfig::for_testing());
        let id = polling.connect(ip()).await.connection_id;

        let err = polling.send(&id, b"{\"type\":\"warp_drive\"}", ip()).await.unwrap_err();
        assert_eq!(err.code(), "MALFORMED_INPUT");
        let drained = polling.drain(&id, None).await.unwrap();
        assert!(matches!(drained.events.as_slice(), [ServerMessage::Error { .. }]));
    }

    #[tokio::test]
    async fn test_unknown_connection() {
        let polling = transport(ServerConfig::for_testing());
        assert!(matches!(
            polling.drain("nope", None).await,
            Err(StudyMateError::ConnectionNotFound(_))
        ));
        assert!(polling.disconnect("nope").await.is_err());
    }

    #[tokio::test]
    async fn test_idle_connections_reaped() {
        let mut config = ServerConfig::for_testing();
        config.poll_timeout = Duration::from_millis(20);
        let polling = transport(config);
        let id = polling.connect(ip()).await.connection_id;

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(polling.reap_idle().await, 1);
        assert!(polling.drain(&id, None).await.is_err());
    }
}
