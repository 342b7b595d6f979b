//! Shared store backends
//!
//! The backend is chosen once at startup and injected everywhere as
//! `Arc<dyn SharedStore>`. A durable backend that fails at runtime surfaces
//! errors; it is never swapped out mid-run.

pub mod memory;
pub mod redis_backend;
pub mod traits;

use async_trait::async_trait;
use std::time::Duration;

use crate::config::ServerConfig;
use crate::core::message::Report;
use crate::core::user::WaitEntry;
use crate::error::Result;

// Re-export the store interface and backends
pub use memory::MemoryStore;
pub use redis_backend::RedisStore;
pub use traits::SharedStore;

const EXPIRY_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// The backend selected at startup
#[derive(Clone)]
pub enum StorageBackend {
    Durable(RedisStore),
    Local(MemoryStore),
}

impl StorageBackend {
    /// Pick the durable backend when configured and reachable, otherwise
    /// fall back to the process-local store.
    pub async fn resolve(config: &ServerConfig) -> Self {
        if let Some(url) = &config.redis_url {
            match RedisStore::connect(url, config.redis_connect_timeout).await {
                Ok(store) => {
                    log::info!("Using durable storage at {}", redis_backend::redact(url));
                    return StorageBackend::Durable(store);
                }
                Err(e) => {
                    log::warn!("Durable storage unreachable ({}); falling back to in-memory storage", e);
                }
            }
        } else {
            log::info!("No STUDYMATE_REDIS_URL configured; using in-memory storage");
        }

        StorageBackend::local()
    }

    /// In-memory backend with its expiry sweep running
    pub fn local() -> Self {
        let store = MemoryStore::new();
        store.start_expiry_task(EXPIRY_SWEEP_INTERVAL);
        StorageBackend::Local(store)
    }

    fn inner(&self) -> &dyn SharedStore {
        match self {
            StorageBackend::Durable(store) => store,
            StorageBackend::Local(store) => store,
        }
    }
}

#[async_trait]
impl SharedStore for StorageBackend {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.inner().get(key).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        self.inner().set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.inner().delete(key).await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.inner().exists(key).await
    }

    async fn push_waiting(&self, entry: &WaitEntry) -> Result<()> {
        self.inner().push_waiting(entry).await
    }

    async fn pop_waiting(&self) -> Result<Option<WaitEntry>> {
        self.inner().pop_waiting().await
    }

    async fn remove_waiting(&self, user_id: &str) -> Result<usize> {
        self.inner().remove_waiting(user_id).await
    }

    async fn queue_length(&self) -> Result<usize> {
        self.inner().queue_length().await
    }

    async fn append_report(&self, report: &Report) -> Result<()> {
        self.inner().append_report(report).await
    }

    async fn health_check(&self) -> Result<()> {
        self.inner().health_check().await
    }

    fn backend_name(&self) -> &'static str {
        self.inner().backend_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolve_without_url_is_local() {
        let backend = StorageBackend::resolve(&ServerConfig::for_testing()).await;
        assert!(matches!(backend, StorageBackend::Local(_)));
        assert_eq!(backend.backend_name(), "memory");
    }

    #[tokio::test]
    async fn test_resolve_falls_back_when_unreachable() {
        let mut config = ServerConfig::for_testing();
        config.redis_url = Some("redis://127.0.0.1:1".to_string());
        config.redis_connect_timeout = Duration::from_millis(300);

        let backend = StorageBackend::resolve(&config).await;
        assert!(matches!(backend, StorageBackend::Local(_)));
        assert!(backend.health_check().await.is_ok());
    }
}
