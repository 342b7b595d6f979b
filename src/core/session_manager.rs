//! Session engine
//!
//! Drives each connection through idle → queued → matched → ended and
//! routes chat and signaling between the two participants of a session.
//! Transports only parse frames and hand them here; delivery goes back
//! out through the connection registry.

use log::{debug, error, info, warn};
use lru::LruCache;
use serde_json::Value;
use std::net::IpAddr;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

use crate::config::ServerConfig;
use crate::constants::session_key;
use crate::core::block_list::BlockList;
use crate::core::connection::{Connection, ConnectionState, TransportKind};
use crate::core::matchmaker::Matchmaker;
use crate::core::message::{Message, Report};
use crate::core::message_types::{ClientMessage, ServerMessage};
use crate::core::moderation::ModerationFilter;
use crate::core::queue::WaitQueue;
use crate::core::registry::ConnectionRegistry;
use crate::core::session::{Session, VideoRequest, VideoStatus};
use crate::core::user::User;
use crate::error::{Result, StudyMateError};
use crate::security_logger::{SecurityEvent, SecurityLogger};
use crate::storage::SharedStore;

const NO_MATCH_NOTICE: &str = "No study partner found yet. You are still in the queue.";

/// Pairing attempts before a joiner is queued, when drained partners turn out to have left
const MATCH_ATTEMPTS: usize = 2;

/// Sessions with an in-process write lock at any one time
const SESSION_LOCK_CAPACITY: NonZeroUsize = match NonZeroUsize::new(4096) {
    Some(capacity) => capacity,
    None => unreachable!(),
};

/// Tunables the engine reads from configuration
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub session_ttl: Duration,
    pub no_match_timeout: Duration,
    pub max_message_length: usize,
    pub max_tags: usize,
}

impl SessionSettings {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            session_ttl: config.session_ttl,
            no_match_timeout: config.no_match_timeout,
            max_message_length: config.max_message_length,
            max_tags: config.max_tags,
        }
    }
}

pub struct SessionManager {
    store: Arc<dyn SharedStore>,
    queue: WaitQueue,
    blocks: BlockList,
    matchmaker: Matchmaker,
    moderation: ModerationFilter,
    registry: Arc<ConnectionRegistry>,
    security_log: Arc<SecurityLogger>,
    /// Serialises read-modify-write of one session within this process
    session_locks: Mutex<LruCache<String, Arc<Mutex<()>>>>,
    settings: SessionSettings,
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn SharedStore>,
        registry: Arc<ConnectionRegistry>,
        security_log: Arc<SecurityLogger>,
        config: &ServerConfig,
    ) -> Result<Self> {
        let queue = WaitQueue::new(store.clone());
        let blocks = BlockList::new(store.clone(), config.block_ttl);
        let matchmaker = Matchmaker::new(queue.clone(), blocks.clone(), registry.clone());

        Ok(Self {
            store,
            queue,
            blocks,
            matchmaker,
            moderation: ModerationFilter::with_extra_words(&config.blocked_words)?,
            registry,
            security_log,
            session_locks: Mutex::new(LruCache::new(SESSION_LOCK_CAPACITY)),
            settings: SessionSettings::from_config(config),
        })
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn queue(&self) -> &WaitQueue {
        &self.queue
    }

    pub fn blocks(&self) -> &BlockList {
        &self.blocks
    }

    /// Register a transport handle. Events for it are delivered on `sender`.
    pub async fn connect(
        &self,
        sender: mpsc::UnboundedSender<ServerMessage>,
        transport: TransportKind,
        remote_ip: Option<IpAddr>,
    ) -> String {
        let connection_id = self
            .registry
            .register(Connection::new(sender, transport, remote_ip))
            .await;
        info!("Connection {} opened ({:?}, {:?})", connection_id, transport, remote_ip);
        connection_id
    }

    /// Handle one raw frame from a connection
    pub async fn handle_text(&self, connection_id: &str, text: &str) -> Result<()> {
        self.registry.touch(connection_id).await;

        let message = match ClientMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                self.reject_malformed(connection_id, &e).await;
                return Err(e);
            }
        };
        self.handle_message(connection_id, message).await
    }

    /// Answer an unparseable frame with an error event. No state changes.
    pub async fn reject_malformed(&self, connection_id: &str, err: &StudyMateError) {
        self.security_log
            .log_event(SecurityEvent::MalformedInput {
                connection_id: connection_id.to_string(),
                details: err.to_string(),
            })
            .await;
        self.registry
            .send(connection_id, ServerMessage::from_error(err))
            .await;
    }

    /// Dispatch a parsed message. A failure is reported to the originating
    /// connection as an `error` event and also returned.
    pub async fn handle_message(&self, connection_id: &str, message: ClientMessage) -> Result<()> {
        let kind = message.kind();
        debug!("Handling {} from {}", kind, connection_id);

        let result = match message {
            ClientMessage::JoinQueue { user } => self.join_queue(connection_id, user).await,
            ClientMessage::LeaveQueue {} => self.leave_queue(connection_id).await,
            ClientMessage::ChatMessage { content } => self.chat_message(connection_id, &content).await,
            ClientMessage::VideoRequest { requester_id, offer } => {
                self.video_request(connection_id, requester_id, offer).await
            }
            ClientMessage::VideoResponse { accepted, payload } => {
                self.video_response(connection_id, accepted, payload).await
            }
            ClientMessage::IceCandidate { candidate } => {
                self.ice_candidate(connection_id, candidate).await
            }
            ClientMessage::SessionEnded {} => self.end_session(connection_id).await,
        };

        if let Err(e) = &result {
            match e {
                StudyMateError::StorageError(_) | StudyMateError::BackendUnavailable(_) => {
                    error!("{} from {} failed: {}", kind, connection_id, e)
                }
                _ => debug!("{} from {} rejected: {}", kind, connection_id, e),
            }
            self.registry
                .send(connection_id, ServerMessage::from_error(e))
                .await;
        }
        result
    }

    async fn join_queue(&self, connection_id: &str, user: User) -> Result<()> {
        let user = user.sanitized(self.settings.max_tags)?;
        let current = self
            .registry
            .snapshot(connection_id)
            .await
            .ok_or_else(|| StudyMateError::ConnectionNotFound(connection_id.to_string()))?;

        if let ConnectionState::Matched(session_id) = current.state {
            return Err(StudyMateError::AlreadyInSession(session_id));
        }

        // Re-joining under a different id must not leave the old entry behind
        if let Some(previous) = current.user.filter(|previous| previous.id != user.id) {
            if self.queue.remove(&previous.id).await? {
                debug!("Connection {} dropped queue entry for {}", connection_id, previous.id);
            }
        }
        self.registry.bind_user(connection_id, user.clone()).await?;
        // A prior entry would otherwise outlive this attempt if it matches
        self.queue.remove(&user.id).await?;

        for _ in 0..MATCH_ATTEMPTS {
            let Some(partner) = self.matchmaker.find_match(&user).await? else {
                break;
            };
            // The partner may have left while their entry was drained
            match self.registry.user_state(&partner.id).await {
                Some(state) if state.is_out_of_queue() => {
                    info!("Partner {} left before pairing with {}", partner.id, user.id);
                }
                _ => return self.start_session(connection_id, user, partner).await,
            }
        }
        self.wait_for_partner(connection_id, user).await
    }

    async fn wait_for_partner(&self, connection_id: &str, user: User) -> Result<()> {
        // Mark queued before the entry is visible, so a partner that pairs
        // with us immediately is not overwritten afterwards
        let epoch = self
            .registry
            .begin_waiting(connection_id)
            .await
            .ok_or_else(|| StudyMateError::ConnectionNotFound(connection_id.to_string()))?;

        if let Err(e) = self.queue.enqueue(user.clone()).await {
            self.registry.set_state(connection_id, ConnectionState::Idle).await;
            return Err(e);
        }

        let queue_length = self.queue.len().await?;
        info!("User {} queued ({} waiting)", user.id, queue_length);
        self.registry
            .send(connection_id, ServerMessage::Waiting { queue_length })
            .await;
        self.arm_no_match_timer(connection_id.to_string(), epoch);
        Ok(())
    }

    /// Tell the user nobody was found if they are still in the same wait
    /// when the timer fires. Leaving, matching or re-joining makes it a no-op.
    fn arm_no_match_timer(&self, connection_id: String, epoch: u64) {
        let registry = self.registry.clone();
        let delay = self.settings.no_match_timeout;

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if registry.is_waiting(&connection_id, epoch).await {
                registry
                    .send(
                        &connection_id,
                        ServerMessage::NoMatch {
                            message: NO_MATCH_NOTICE.to_string(),
                        },
                    )
                    .await;
            }
        });
    }

    async fn start_session(&self, connection_id: &str, user: User, partner: User) -> Result<()> {
        let session = Session::new(user, partner);
        let user_id = session.users[0].id.clone();
        let partner_id = session.users[1].id.clone();

        if let Err(e) = self.save_session(&session).await {
            // The partner was taken off the queue; give them their place back
            if let Err(requeue_err) = self.queue.enqueue(session.users[1].clone()).await {
                error!("Lost queue entry for {}: {}", partner_id, requeue_err);
            }
            return Err(e);
        }

        match self.registry.user_state(&partner_id).await {
            Some(ConnectionState::Queued) => {}
            Some(ConnectionState::Matched(other)) => {
                warn!("Partner {} was already in session {}", partner_id, other);
                self.security_log
                    .log_event(SecurityEvent::DuplicateMatch {
                        user_id: partner_id.clone(),
                    })
                    .await;
            }
            Some(_) | None => debug!("Partner {} has no waiting connection here", partner_id),
        }

        let matched = ConnectionState::Matched(session.id.clone());
        self.registry.set_state(connection_id, matched.clone()).await;
        self.registry.set_user_state(&partner_id, matched).await;

        info!(
            "Session {} created for {} and {} (shared tags: {:?})",
            session.id, user_id, partner_id, session.shared_tags
        );

        let event = ServerMessage::MatchFound { session };
        self.registry.send(connection_id, event.clone()).await;
        self.registry.notify_user(&partner_id, event).await;
        Ok(())
    }

    /// Always acknowledged, whether or not the user was queued
    async fn leave_queue(&self, connection_id: &str) -> Result<()> {
        let current = self
            .registry
            .snapshot(connection_id)
            .await
            .ok_or_else(|| StudyMateError::ConnectionNotFound(connection_id.to_string()))?;

        if let Some(user) = &current.user {
            if self.queue.remove(&user.id).await? {
                debug!("User {} left the queue", user.id);
            }
        }
        if current.state == ConnectionState::Queued {
            self.registry.set_state(connection_id, ConnectionState::Idle).await;
        }

        self.registry
            .send(connection_id, ServerMessage::QueueLeft { success: true })
            .await;
        Ok(())
    }

    async fn chat_message(&self, connection_id: &str, content: &str) -> Result<()> {
        let content = content.trim();
        if content.is_empty() {
            return Err(StudyMateError::ValidationError(
                "Message content cannot be empty".to_string(),
            ));
        }
        if content.chars().count() > self.settings.max_message_length {
            return Err(StudyMateError::ValidationError(format!(
                "Message exceeds {} characters",
                self.settings.max_message_length
            )));
        }

        let (user, session_id) = self.matched_user(connection_id).await?;
        let moderated = self.moderation.moderate(content);
        if moderated.flagged {
            self.security_log
                .log_event(SecurityEvent::ContentFlagged {
                    user_id: user.id.clone(),
                    session_id: session_id.clone(),
                    reasons: moderated.reasons.clone(),
                })
                .await;
        }

        let message = Message::new(user.id.clone(), moderated.content);
        let peer = {
            let lock = self.session_lock(&session_id).await;
            let _guard = lock.lock().await;

            let Some(mut session) = self.get_session(&session_id).await? else {
                debug!("Dropping chat for expired session {}", session_id);
                return Ok(());
            };
            session.append_message(message.clone());
            self.save_session(&session).await?;
            session.peer_of(&user.id).cloned()
        };

        let event = ServerMessage::ChatMessage { message };
        self.registry.send(connection_id, event.clone()).await;
        if let Some(peer) = peer {
            self.registry.notify_user(&peer.id, event).await;
        }
        Ok(())
    }

    async fn video_request(
        &self,
        connection_id: &str,
        claimed_requester: Option<String>,
        offer: Value,
    ) -> Result<()> {
        let (user, session_id) = self.matched_user(connection_id).await?;
        if let Some(claimed) = claimed_requester.filter(|claimed| *claimed != user.id) {
            warn!("Ignoring requesterId {} sent by {}", claimed, user.id);
        }

        let peer = {
            let lock = self.session_lock(&session_id).await;
            let _guard = lock.lock().await;

            let Some(mut session) = self.get_session(&session_id).await? else {
                debug!("Dropping video request for expired session {}", session_id);
                return Ok(());
            };
            if session.has_pending_video_request() {
                return Err(StudyMateError::InvalidState(
                    "A video request is already pending".to_string(),
                ));
            }
            session.video_request = Some(VideoRequest {
                requester_id: user.id.clone(),
                status: VideoStatus::Pending,
            });
            self.save_session(&session).await?;
            session.peer_of(&user.id).cloned()
        };

        if let Some(peer) = peer {
            self.registry
                .notify_user(
                    &peer.id,
                    ServerMessage::VideoRequest {
                        requester_id: user.id,
                        offer,
                    },
                )
                .await;
        }
        Ok(())
    }

    async fn video_response(&self, connection_id: &str, accepted: bool, payload: Value) -> Result<()> {
        let (user, session_id) = self.matched_user(connection_id).await?;

        let peer = {
            let lock = self.session_lock(&session_id).await;
            let _guard = lock.lock().await;

            let Some(mut session) = self.get_session(&session_id).await? else {
                debug!("Dropping video response for expired session {}", session_id);
                return Ok(());
            };
            session.video_request = match (accepted, session.video_request.take()) {
                (true, Some(request)) => Some(VideoRequest {
                    status: VideoStatus::Accepted,
                    ..request
                }),
                _ => None,
            };
            self.save_session(&session).await?;
            session.peer_of(&user.id).cloned()
        };

        if let Some(peer) = peer {
            self.registry
                .notify_user(&peer.id, ServerMessage::VideoResponse { accepted, payload })
                .await;
        }
        Ok(())
    }

    /// Relayed as-is; candidates are not persisted
    async fn ice_candidate(&self, connection_id: &str, candidate: Value) -> Result<()> {
        let (user, session_id) = self.matched_user(connection_id).await?;
        let Some(session) = self.get_session(&session_id).await? else {
            return Ok(());
        };
        if let Some(peer) = session.peer_of(&user.id) {
            self.registry
                .notify_user(&peer.id, ServerMessage::IceCandidate { candidate })
                .await;
        }
        Ok(())
    }

    /// End the caller's session. The stored record is left to its TTL.
    async fn end_session(&self, connection_id: &str) -> Result<()> {
        let (user, session_id) = self.matched_user(connection_id).await?;
        let session = self.get_session(&session_id).await?;

        self.registry.set_state(connection_id, ConnectionState::Ended).await;
        if let Some(peer) = session.as_ref().and_then(|s| s.peer_of(&user.id)) {
            self.registry.end_user_session(&peer.id, &session_id).await;
            self.registry
                .notify_user(&peer.id, ServerMessage::SessionEnded {})
                .await;
        }

        info!("Session {} ended by {}", session_id, user.id);
        Ok(())
    }

    /// Clean up after a closed transport. Never fails; problems are logged.
    pub async fn disconnect(&self, connection_id: &str) {
        let Some(closed) = self.registry.unregister(connection_id).await else {
            return;
        };
        info!(
            "{:?} connection {} closed (peer {})",
            closed.transport,
            connection_id,
            closed
                .remote_ip
                .map_or_else(|| "unknown".to_string(), |ip| ip.to_string())
        );

        let Some(user) = closed.user else {
            return;
        };
        if self.registry.user_state(&user.id).await.is_some() {
            debug!("User {} is still connected elsewhere", user.id);
            return;
        }

        match closed.state {
            ConnectionState::Queued => {
                if let Err(e) = self.queue.remove(&user.id).await {
                    error!("Failed to drop queue entry for {}: {}", user.id, e);
                }
            }
            ConnectionState::Matched(session_id) => match self.get_session(&session_id).await {
                Ok(Some(session)) => {
                    if let Some(peer) = session.peer_of(&user.id) {
                        self.registry
                            .notify_user(&peer.id, ServerMessage::UserDisconnected {})
                            .await;
                    }
                }
                Ok(None) => debug!("Session {} already expired", session_id),
                Err(e) => error!("Failed to load session {}: {}", session_id, e),
            },
            ConnectionState::Idle | ConnectionState::Ended => {}
        }
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        match self.store.get(&session_key(session_id)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Persist a session, restarting its TTL
    pub async fn save_session(&self, session: &Session) -> Result<()> {
        let raw = serde_json::to_string(session)?;
        self.store
            .set(&session_key(&session.id), &raw, Some(self.settings.session_ttl))
            .await
    }

    /// Store an abuse report. The session does not have to exist any more.
    pub async fn file_report(
        &self,
        session_id: &str,
        reason: &str,
        messages: Vec<Value>,
        origin_ip: IpAddr,
    ) -> Result<Report> {
        let session_id = session_id.trim();
        let reason = reason.trim();
        if session_id.is_empty() || reason.is_empty() {
            return Err(StudyMateError::ValidationError(
                "sessionId and reason are required".to_string(),
            ));
        }

        let report = Report::new(
            session_id.to_string(),
            reason.to_string(),
            messages,
            origin_ip.to_string(),
        );
        self.store.append_report(&report).await?;
        self.security_log
            .log_event(SecurityEvent::ReportFiled {
                session_id: report.session_id.clone(),
                ip: origin_ip,
            })
            .await;
        Ok(report)
    }

    /// Block `blocked_user_id` on behalf of the other participant of
    /// `session_id`. The session itself carries on.
    pub async fn block_from_session(&self, session_id: &str, blocked_user_id: &str) -> Result<()> {
        let session = self
            .get_session(session_id)
            .await?
            .ok_or_else(|| StudyMateError::UnknownSession(session_id.to_string()))?;

        let blocker = session.peer_of(blocked_user_id).ok_or_else(|| {
            StudyMateError::ValidationError(format!(
                "User {} is not part of session {}",
                blocked_user_id, session_id
            ))
        })?;

        self.blocks.block(&blocker.id, blocked_user_id).await?;
        self.security_log
            .log_event(SecurityEvent::UserBlocked {
                session_id: session_id.to_string(),
            })
            .await;
        Ok(())
    }

    async fn matched_user(&self, connection_id: &str) -> Result<(User, String)> {
        let current = self
            .registry
            .snapshot(connection_id)
            .await
            .ok_or_else(|| StudyMateError::ConnectionNotFound(connection_id.to_string()))?;

        match (current.user, current.state) {
            (Some(user), ConnectionState::Matched(session_id)) => Ok((user, session_id)),
            _ => Err(StudyMateError::NotInSession),
        }
    }

    async fn session_lock(&self, session_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.session_locks.lock().await;
        if let Some(lock) = locks.get(session_id) {
            return lock.clone();
        }
        let lock = Arc::new(Mutex::new(()));
        locks.put(session_id.to_string(), lock.clone());
        lock
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use tokio::sync::mpsc::UnboundedReceiver;

    struct Harness {
        manager: SessionManager,
        store: Arc<MemoryStore>,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        let manager = SessionManager::new(
            store.clone(),
            Arc::new(ConnectionRegistry::new()),
            Arc::new(SecurityLogger::new()),
            &ServerConfig::for_testing(),
        )
        .unwrap();
        Harness { manager, store }
    }

    async fn open(manager: &SessionManager) -> (String, UnboundedReceiver<ServerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = manager.connect(tx, TransportKind::WebSocket, None).await;
        (id, rx)
    }

    fn join(id: &str, tags: &[&str]) -> ClientMessage {
        ClientMessage::JoinQueue {
            user: User::new(id, tags.iter().map(|t| t.to_string()).collect()),
        }
    }

    async fn matched_pair(manager: &SessionManager) -> (String, UnboundedReceiver<ServerMessage>, String, UnboundedReceiver<ServerMessage>, String) {
        let (x, mut x_rx) = open(manager).await;
        let (y, mut y_rx) = open(manager).await;
        manager.handle_message(&x, join("x", &["CS"])).await.unwrap();
        manager.handle_message(&y, join("y", &["cs"])).await.unwrap();

        let _waiting = x_rx.recv().await.unwrap();
        let session_id = match x_rx.recv().await.unwrap() {
            ServerMessage::MatchFound { session } => session.id,
            other => panic!("expected match_found, got {:?}", other),
        };
        let _ = y_rx.recv().await.unwrap();
        (x, x_rx, y, y_rx, session_id)
    }

    #[tokio::test]
    async fn test_join_empty_queue_waits() {
        let h = harness();
        let (x, mut rx) = open(&h.manager).await;
        h.manager.handle_message(&x, join("x", &["CS"])).await.unwrap();

        assert_eq!(rx.recv().await, Some(ServerMessage::Waiting { queue_length: 1 }));
        assert_eq!(h.manager.queue().len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_rejoin_under_new_id_drops_old_entry() {
        let h = harness();
        let (c, _c_rx) = open(&h.manager).await;
        let (z, mut z_rx) = open(&h.manager).await;

        h.manager.handle_message(&c, join("x", &["CS"])).await.unwrap();
        h.manager.handle_message(&c, join("x2", &["Art"])).await.unwrap();
        assert_eq!(h.manager.queue().len().await.unwrap(), 1);

        // Only the unreachable "x" shared a tag with z
        h.manager.handle_message(&z, join("z", &["cs"])).await.unwrap();
        assert_eq!(z_rx.recv().await, Some(ServerMessage::Waiting { queue_length: 2 }));
    }

    #[tokio::test]
    async fn test_partner_who_left_is_not_matched() {
        let h = harness();
        let (c, mut c_rx) = open(&h.manager).await;
        let (y, mut y_rx) = open(&h.manager).await;

        h.manager.handle_message(&c, join("x", &["CS"])).await.unwrap();
        h.manager.handle_message(&c, ClientMessage::LeaveQueue {}).await.unwrap();
        // The entry reappears, as when another matcher held it during the leave
        h.manager
            .queue()
            .enqueue(User::new("x", vec!["CS".to_string()]))
            .await
            .unwrap();

        h.manager.handle_message(&y, join("y", &["cs"])).await.unwrap();
        assert_eq!(y_rx.recv().await, Some(ServerMessage::Waiting { queue_length: 1 }));
        assert_eq!(c_rx.recv().await, Some(ServerMessage::Waiting { queue_length: 1 }));
        assert_eq!(c_rx.recv().await, Some(ServerMessage::QueueLeft { success: true }));
        assert!(c_rx.try_recv().is_err());
        assert_eq!(h.manager.queue().len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_no_match_notice_after_timeout() {
        let h = harness();
        let (x, mut rx) = open(&h.manager).await;
        h.manager.handle_message(&x, join("x", &["CS"])).await.unwrap();
        let _waiting = rx.recv().await;

        let notice = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap();
        assert!(matches!(notice, Some(ServerMessage::NoMatch { .. })));
        // Still queued after the notice
        assert_eq!(h.manager.queue().len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_leave_queue_cancels_no_match_notice() {
        let h = harness();
        let (x, mut rx) = open(&h.manager).await;
        h.manager.handle_message(&x, join("x", &["CS"])).await.unwrap();
        h.manager.handle_message(&x, ClientMessage::LeaveQueue {}).await.unwrap();

        assert!(matches!(rx.recv().await, Some(ServerMessage::Waiting { .. })));
        assert_eq!(rx.recv().await, Some(ServerMessage::QueueLeft { success: true }));
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(h.manager.queue().len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_match_creates_session_for_both() {
        let h = harness();
        let (x, _x_rx, y, _y_rx, session_id) = matched_pair(&h.manager).await;

        let session = h.manager.get_session(&session_id).await.unwrap().unwrap();
        assert!(session.has_participant("x") && session.has_participant("y"));
        assert_eq!(session.shared_tags, vec!["cs"]);
        assert_eq!(h.manager.queue().len().await.unwrap(), 0);

        let registry = h.manager.registry();
        assert_eq!(
            registry.snapshot(&x).await.unwrap().state,
            ConnectionState::Matched(session_id.clone())
        );
        assert_eq!(
            registry.snapshot(&y).await.unwrap().state,
            ConnectionState::Matched(session_id)
        );
    }

    #[tokio::test]
    async fn test_join_while_matched_rejected() {
        let h = harness();
        let (x, mut x_rx, _y, _y_rx, _) = matched_pair(&h.manager).await;

        let err = h.manager.handle_message(&x, join("x", &["CS"])).await.unwrap_err();
        assert_eq!(err.code(), "ALREADY_IN_SESSION");
        match x_rx.recv().await {
            Some(ServerMessage::Error { code, .. }) => assert_eq!(code.as_deref(), Some("ALREADY_IN_SESSION")),
            other => panic!("expected error event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_chat_is_moderated_echoed_and_forwarded() {
        let h = harness();
        let (x, mut x_rx, _y, mut y_rx, session_id) = matched_pair(&h.manager).await;

        h.manager
            .handle_message(&x, ClientMessage::ChatMessage { content: "  call me at 555-123-4567 ".into() })
            .await
            .unwrap();

        let echoed = x_rx.recv().await.unwrap();
        let forwarded = y_rx.recv().await.unwrap();
        assert_eq!(echoed, forwarded);
        match forwarded {
            ServerMessage::ChatMessage { message } => {
                assert_eq!(message.sender_id, "x");
                assert_eq!(message.content, "call me at 555-123-4567");
            }
            other => panic!("expected chat_message, got {:?}", other),
        }

        let session = h.manager.get_session(&session_id).await.unwrap().unwrap();
        assert_eq!(session.messages.len(), 2);
        assert!(session.messages[0].is_system());
    }

    #[tokio::test]
    async fn test_chat_validation() {
        let h = harness();
        let (x, _x_rx, _y, _y_rx, _) = matched_pair(&h.manager).await;

        let empty = h.manager
            .handle_message(&x, ClientMessage::ChatMessage { content: "   ".into() })
            .await;
        assert!(matches!(empty, Err(StudyMateError::ValidationError(_))));

        let long = h.manager
            .handle_message(&x, ClientMessage::ChatMessage { content: "a".repeat(1001) })
            .await;
        assert!(matches!(long, Err(StudyMateError::ValidationError(_))));
    }

    #[tokio::test]
    async fn test_chat_outside_session_rejected() {
        let h = harness();
        let (x, _rx) = open(&h.manager).await;
        let err = h.manager
            .handle_message(&x, ClientMessage::ChatMessage { content: "hi".into() })
            .await
            .unwrap_err();
        assert_eq!(err.code(), "NOT_IN_SESSION");
    }

    #[tokio::test]
    async fn test_second_video_request_rejected_while_pending() {
        let h = harness();
        let (x, mut x_rx, y, mut y_rx, session_id) = matched_pair(&h.manager).await;
        let request = ClientMessage::VideoRequest {
            requester_id: None,
            offer: serde_json::json!({"sdp": "v=0"}),
        };

        h.manager.handle_message(&x, request.clone()).await.unwrap();
        assert_eq!(
            y_rx.recv().await,
            Some(ServerMessage::VideoRequest {
                requester_id: "x".into(),
                offer: serde_json::json!({"sdp": "v=0"})
            })
        );

        let err = h.manager.handle_message(&y, request).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_STATE");

        h.manager
            .handle_message(&y, ClientMessage::VideoResponse { accepted: true, payload: serde_json::json!({"sdp": "answer"}) })
            .await
            .unwrap();
        assert!(matches!(x_rx.recv().await, Some(ServerMessage::VideoResponse { accepted: true, .. })));

        let session = h.manager.get_session(&session_id).await.unwrap().unwrap();
        assert_eq!(session.video_request.map(|r| r.status), Some(VideoStatus::Accepted));
    }

    #[tokio::test]
    async fn test_session_ended_notifies_peer_and_keeps_record() {
        let h = harness();
        let (x, _x_rx, y, mut y_rx, session_id) = matched_pair(&h.manager).await;

        h.manager.handle_message(&x, ClientMessage::SessionEnded {}).await.unwrap();
        assert_eq!(y_rx.recv().await, Some(ServerMessage::SessionEnded {}));

        let registry = h.manager.registry();
        assert_eq!(registry.snapshot(&x).await.unwrap().state, ConnectionState::Ended);
        assert_eq!(registry.snapshot(&y).await.unwrap().state, ConnectionState::Ended);
        assert!(h.manager.get_session(&session_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_disconnect_while_matched_notifies_peer() {
        let h = harness();
        let (x, _x_rx, _y, mut y_rx, session_id) = matched_pair(&h.manager).await;

        h.manager.disconnect(&x).await;
        assert_eq!(y_rx.recv().await, Some(ServerMessage::UserDisconnected {}));
        assert!(h.manager.get_session(&session_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_disconnect_while_queued_drops_entry() {
        let h = harness();
        let (x, _rx) = open(&h.manager).await;
        h.manager.handle_message(&x, join("x", &["CS"])).await.unwrap();
        h.manager.disconnect(&x).await;
        assert_eq!(h.manager.queue().len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_malformed_frame_answers_error() {
        let h = harness();
        let (x, mut rx) = open(&h.manager).await;
        let err = h.manager.handle_text(&x, "{not json").await.unwrap_err();
        assert_eq!(err.code(), "MALFORMED_INPUT");
        assert!(matches!(rx.recv().await, Some(ServerMessage::Error { .. })));
    }

    #[tokio::test]
    async fn test_block_resolves_blocker_from_session() {
        let h = harness();
        let (_x, _x_rx, _y, _y_rx, session_id) = matched_pair(&h.manager).await;

        h.manager.block_from_session(&session_id, "y").await.unwrap();
        assert!(h.manager.blocks().is_blocked("y", "x").await.unwrap());

        let unknown = h.manager.block_from_session("missing", "y").await;
        assert!(matches!(unknown, Err(StudyMateError::UnknownSession(_))));

        let stranger = h.manager.block_from_session(&session_id, "z").await;
        assert!(matches!(stranger, Err(StudyMateError::ValidationError(_))));
    }

    #[tokio::test]
    async fn test_file_report_appends() {
        let h = harness();
        let ip: IpAddr = "203.0.113.5".parse().unwrap();
        let report = h.manager
            .file_report("s1", "spam", vec![serde_json::json!({"content": "buy now"})], ip)
            .await
            .unwrap();
        assert_eq!(report.origin_ip, "203.0.113.5");
        assert_eq!(h.store.report_count().await, 1);

        let missing = h.manager.file_report("s1", "  ", vec![], ip).await;
        assert!(matches!(missing, Err(StudyMateError::ValidationError(_))));
    }
}
