//! Security-focused logging module to track abuse events
//!
//! One logger is built at startup and shared by everything that records
//! events; there is no process-wide instance.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::core::moderation::FlagReason;

/// Types of security events to track
#[derive(Debug, Clone)]
pub enum SecurityEvent {
    RateLimitExceeded { ip: IpAddr, class: String },
    ContentFlagged { user_id: String, session_id: String, reasons: Vec<FlagReason> },
    ReportFiled { session_id: String, ip: IpAddr },
    UserBlocked { session_id: String },
    MalformedInput { connection_id: String, details: String },
    /// A matched partner was not waiting any more; tolerated race
    DuplicateMatch { user_id: String },
}

impl SecurityEvent {
    /// Key for counting and thresholds
    pub fn kind(&self) -> &'static str {
        match self {
            SecurityEvent::RateLimitExceeded { .. } => "rate_limit",
            SecurityEvent::ContentFlagged { .. } => "content_flagged",
            SecurityEvent::ReportFiled { .. } => "report_filed",
            SecurityEvent::UserBlocked { .. } => "user_blocked",
            SecurityEvent::MalformedInput { .. } => "malformed_input",
            SecurityEvent::DuplicateMatch { .. } => "duplicate_match",
        }
    }
}

#[derive(Debug, Clone)]
struct TimestampedEvent {
    event: SecurityEvent,
    timestamp: Instant,
}

/// Security logger for tracking and alerting on abuse events
pub struct SecurityLogger {
    events: RwLock<Vec<TimestampedEvent>>,
    /// Lifetime totals per kind
    event_counts: RwLock<HashMap<&'static str, usize>>,
    max_events: usize,
    /// Events of one kind within `alert_window` that escalate to an alert
    alert_thresholds: HashMap<&'static str, usize>,
    alert_window: Duration,
}

impl Default for SecurityLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl SecurityLogger {
    pub fn new() -> Self {
        let alert_thresholds = HashMap::from([
            ("rate_limit", 10),
            ("content_flagged", 20),
            ("report_filed", 10),
            ("user_blocked", 20),
            ("malformed_input", 25),
            ("duplicate_match", 5),
        ]);

        Self {
            events: RwLock::new(Vec::new()),
            event_counts: RwLock::new(HashMap::new()),
            max_events: 10000,
            alert_thresholds,
            alert_window: Duration::from_secs(5 * 60),
        }
    }

    /// Log a security event
    pub async fn log_event(&self, event: SecurityEvent) {
        let kind = event.kind();
        let now = Instant::now();

        match &event {
            SecurityEvent::RateLimitExceeded { ip, class } => {
                log::warn!("SECURITY: Rate limit exceeded - IP: {}, Class: {}", ip, class);
            }
            SecurityEvent::ContentFlagged { user_id, session_id, reasons } => {
                log::warn!(
                    "SECURITY: Content flagged - User: {}, Session: {}, Reasons: {:?}",
                    user_id, session_id, reasons
                );
            }
            SecurityEvent::ReportFiled { session_id, ip } => {
                log::info!("SECURITY: Report filed - Session: {}, IP: {}", session_id, ip);
            }
            SecurityEvent::UserBlocked { session_id } => {
                log::info!("SECURITY: User blocked - Session: {}", session_id);
            }
            SecurityEvent::MalformedInput { connection_id, details } => {
                log::warn!(
                    "SECURITY: Malformed input - Connection: {}, Details: {}",
                    connection_id, details
                );
            }
            SecurityEvent::DuplicateMatch { user_id } => {
                log::warn!("SECURITY: Duplicate match anomaly - User: {}", user_id);
            }
        }

        *self.event_counts.write().await.entry(kind).or_insert(0) += 1;

        let recent_of_kind = {
            let mut events = self.events.write().await;
            events.push(TimestampedEvent {
                event: event.clone(),
                timestamp: now,
            });

            // Limit memory usage
            if events.len() > self.max_events {
                let excess = events.len() - self.max_events;
                events.drain(0..excess);
            }

            events
                .iter()
                .filter(|e| e.event.kind() == kind && now.duration_since(e.timestamp) <= self.alert_window)
                .count()
        };

        // Alert once per threshold crossing rather than on every event past it
        if let Some(&threshold) = self.alert_thresholds.get(kind) {
            if recent_of_kind == threshold {
                self.trigger_alert(kind, recent_of_kind, &event);
            }
        }
    }

    fn trigger_alert(&self, kind: &str, count: usize, sample: &SecurityEvent) {
        log::error!(
            "SECURITY ALERT: {} '{}' events within {:?}",
            count, kind, self.alert_window
        );
        log::error!("Sample event: {:?}", sample);
    }

    /// Get recent security events
    pub async fn get_recent_events(&self, duration: Duration) -> Vec<SecurityEvent> {
        let now = Instant::now();
        self.events
            .read()
            .await
            .iter()
            .filter(|event| now.duration_since(event.timestamp) <= duration)
            .map(|event| event.event.clone())
            .collect()
    }

    /// Lifetime event totals per kind
    pub async fn get_event_stats(&self) -> HashMap<String, usize> {
        self.event_counts
            .read()
            .await
            .iter()
            .map(|(kind, count)| (kind.to_string(), *count))
            .collect()
    }

    pub async fn cleanup_old_events(&self, max_age: Duration) {
        let now = Instant::now();
        self.events
            .write()
            .await
            .retain(|event| now.duration_since(event.timestamp) <= max_age);
    }

    /// Start periodic cleanup task
    pub fn start_cleanup_task(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(300)); // Every 5 minutes
            loop {
                interval.tick().await;
                self.cleanup_old_events(Duration::from_secs(3600 * 24)).await; // Keep 24 hours
            }
        });
    }
}
