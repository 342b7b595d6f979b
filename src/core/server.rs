//! Integrated server service that wires the engine to its collaborators

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::net::IpAddr;
use std::sync::Arc;

use crate::config::ServerConfig;
use crate::core::ip_extractor::IpExtractionConfig;
use crate::core::rate_limiter::{RateLimiter, RouteClass};
use crate::core::registry::ConnectionRegistry;
use crate::core::session_manager::SessionManager;
use crate::error::Result;
use crate::security_logger::{SecurityEvent, SecurityLogger};
use crate::storage::SharedStore;

/// `GET /health` body
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
    pub storage_backend: &'static str,
    pub active_connections: usize,
}

/// Owns one instance of everything a request handler may need
pub struct ServerManager {
    config: ServerConfig,
    store: Arc<dyn SharedStore>,
    registry: Arc<ConnectionRegistry>,
    sessions: SessionManager,
    rate_limiter: Arc<RateLimiter>,
    security_log: Arc<SecurityLogger>,
    ip_config: IpExtractionConfig,
}

pub type SharedServerManager = Arc<ServerManager>;

impl ServerManager {
    pub fn new(config: ServerConfig, store: Arc<dyn SharedStore>) -> Result<Self> {
        Self::with_rate_limiter(config, store, RateLimiter::new())
    }

    /// Create with a custom rate limiter, e.g. tighter policies in tests
    pub fn with_rate_limiter(
        config: ServerConfig,
        store: Arc<dyn SharedStore>,
        rate_limiter: RateLimiter,
    ) -> Result<Self> {
        config.validate()?;

        let registry = Arc::new(ConnectionRegistry::new());
        let security_log = Arc::new(SecurityLogger::new());
        let sessions = SessionManager::new(
            store.clone(),
            registry.clone(),
            security_log.clone(),
            &config,
        )?;

        Ok(Self {
            ip_config: IpExtractionConfig::from_server_config(&config),
            config,
            store,
            registry,
            sessions,
            rate_limiter: Arc::new(rate_limiter),
            security_log,
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn security_log(&self) -> &Arc<SecurityLogger> {
        &self.security_log
    }

    pub fn ip_config(&self) -> &IpExtractionConfig {
        &self.ip_config
    }

    /// Gate a request/response call. Rejections are recorded as security events.
    pub async fn check_rate(&self, class: RouteClass, ip: IpAddr) -> Result<()> {
        let result = self.rate_limiter.check(class, ip).await;
        if result.is_err() {
            self.security_log
                .log_event(SecurityEvent::RateLimitExceeded {
                    ip,
                    class: class.as_str().to_string(),
                })
                .await;
        }
        result
    }

    pub async fn health(&self) -> HealthStatus {
        let status = match self.store.health_check().await {
            Ok(()) => "ok",
            Err(e) => {
                log::warn!("Storage health check failed: {}", e);
                "degraded"
            }
        };

        HealthStatus {
            status,
            timestamp: Utc::now(),
            storage_backend: self.store.backend_name(),
            active_connections: self.registry.connection_count().await,
        }
    }

    /// Periodic cleanup for rate limit windows and old security events
    pub fn start_background_tasks(&self) {
        self.rate_limiter.clone().start_cleanup_task();
        self.security_log.clone().start_cleanup_task();
        log::debug!(
            "Background cleanup started; polling connections idle for {:?} are reaped",
            self.config.poll_timeout
        );
    }
}
