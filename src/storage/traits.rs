//! Abstract storage interface shared by both backends
//!
//! Sessions, the wait queue, block relations and reports all live behind
//! this one trait, so the matchmaker and session manager never know which
//! backend they run against.

use async_trait::async_trait;
use std::time::Duration;

use crate::core::message::Report;
use crate::core::user::WaitEntry;
use crate::error::Result;

#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Read a value; expired keys read as absent
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a value, replacing any previous one and its expiry
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    /// Add an entry to the wait queue
    async fn push_waiting(&self, entry: &WaitEntry) -> Result<()>;

    /// Atomically take the most recently pushed entry
    async fn pop_waiting(&self) -> Result<Option<WaitEntry>>;

    /// Drop every entry belonging to `user_id`, returning how many were removed
    async fn remove_waiting(&self, user_id: &str) -> Result<usize>;

    async fn queue_length(&self) -> Result<usize>;

    /// Append to the write-only report list (no expiry)
    async fn append_report(&self, report: &Report) -> Result<()>;

    /// Probe the backend
    async fn health_check(&self) -> Result<()>;

    /// Short name reported by the health endpoint
    fn backend_name(&self) -> &'static str;
}
