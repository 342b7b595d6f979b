//! Process-local storage backend
//!
//! Used when no durable backend is configured or reachable at startup.
//! Values expire lazily on read and are swept periodically.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use super::traits::SharedStore;
use crate::core::message::Report;
use crate::core::user::WaitEntry;
use crate::error::Result;

#[derive(Debug, Clone)]
struct StoredValue {
    value: String,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map_or(false, |deadline| deadline <= now)
    }
}

/// In-memory shared store
#[derive(Clone, Default)]
pub struct MemoryStore {
    values: Arc<RwLock<HashMap<String, StoredValue>>>,
    // Wait entries, top of the stack at the back
    waiting: Arc<RwLock<VecDeque<WaitEntry>>>,
    reports: Arc<RwLock<Vec<Report>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove expired values, returning how many were dropped
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut values = self.values.write().await;
        let before = values.len();
        values.retain(|_, stored| !stored.is_expired(now));
        before - values.len()
    }

    /// Spawn the periodic expiry sweep
    pub fn start_expiry_task(&self, every: Duration) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                let purged = store.purge_expired().await;
                if purged > 0 {
                    log::debug!("Expired {} in-memory keys", purged);
                }
            }
        })
    }

    /// Number of reports filed, for inspection
    pub async fn report_count(&self) -> usize {
        self.reports.read().await.len()
    }
}

#[async_trait]
impl SharedStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        {
            let values = self.values.read().await;
            match values.get(key) {
                Some(stored) if !stored.is_expired(now) => return Ok(Some(stored.value.clone())),
                Some(_) => {}
                None => return Ok(None),
            }
        }

        // Expired: drop it unless it was rewritten in the meantime
        let mut values = self.values.write().await;
        if values.get(key).map_or(false, |stored| stored.is_expired(now)) {
            values.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let stored = StoredValue {
            value: value.to_string(),
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        };
        self.values.write().await.insert(key.to_string(), stored);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.values.write().await.remove(key);
        Ok(())
    }

    async fn push_waiting(&self, entry: &WaitEntry) -> Result<()> {
        self.waiting.write().await.push_back(entry.clone());
        Ok(())
    }

    async fn pop_waiting(&self) -> Result<Option<WaitEntry>> {
        Ok(self.waiting.write().await.pop_back())
    }

    async fn remove_waiting(&self, user_id: &str) -> Result<usize> {
        let mut waiting = self.waiting.write().await;
        let before = waiting.len();
        waiting.retain(|entry| entry.user.id != user_id);
        Ok(before - waiting.len())
    }

    async fn queue_length(&self) -> Result<usize> {
        Ok(self.waiting.read().await.len())
    }

    async fn append_report(&self, report: &Report) -> Result<()> {
        self.reports.write().await.push(report.clone());
        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
