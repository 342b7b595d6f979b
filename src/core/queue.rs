//! Wait queue of users looking for a partner, layered on the shared store

use std::sync::Arc;

use crate::core::user::{User, WaitEntry};
use crate::error::Result;
use crate::storage::SharedStore;

#[derive(Clone)]
pub struct WaitQueue {
    store: Arc<dyn SharedStore>,
}

impl WaitQueue {
    pub fn new(store: Arc<dyn SharedStore>) -> Self {
        Self { store }
    }

    /// Queue `user`, replacing any entry they already have
    pub async fn enqueue(&self, user: User) -> Result<WaitEntry> {
        let replaced = self.store.remove_waiting(&user.id).await?;
        if replaced > 0 {
            log::debug!("Replaced {} stale queue entries for {}", replaced, user.id);
        }

        let entry = WaitEntry::new(user);
        self.store.push_waiting(&entry).await?;
        Ok(entry)
    }

    /// Put a previously popped entry back unchanged
    pub async fn requeue(&self, entry: &WaitEntry) -> Result<()> {
        self.store.push_waiting(entry).await
    }

    pub async fn pop(&self) -> Result<Option<WaitEntry>> {
        self.store.pop_waiting().await
    }

    /// Returns whether the user had an entry
    pub async fn remove(&self, user_id: &str) -> Result<bool> {
        Ok(self.store.remove_waiting(user_id).await? > 0)
    }

    pub async fn len(&self) -> Result<usize> {
        self.store.queue_length().await
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    #[tokio::test]
    async fn test_rejoin_replaces_entry() {
        let queue = WaitQueue::new(Arc::new(MemoryStore::new()));
        queue.enqueue(User::new("u1", vec!["CS".to_string()])).await.unwrap();
        queue.enqueue(User::new("u1", vec!["Math".to_string()])).await.unwrap();

        assert_eq!(queue.len().await.unwrap(), 1);
        let entry = queue.pop().await.unwrap().unwrap();
        assert_eq!(entry.user.tags, vec!["Math".to_string()]);
    }

    #[tokio::test]
    async fn test_remove_reports_presence() {
        let queue = WaitQueue::new(Arc::new(MemoryStore::new()));
        queue.enqueue(User::new("u1", vec![])).await.unwrap();

        assert!(queue.remove("u1").await.unwrap());
        assert!(!queue.remove("u1").await.unwrap());
        assert!(queue.is_empty().await.unwrap());
    }
}
