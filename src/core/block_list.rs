//! Time-bounded pairwise blocks, consulted only when pairing

use std::sync::Arc;
use std::time::Duration;

use crate::constants::block_key;
use crate::error::{Result, StudyMateError};
use crate::storage::SharedStore;

#[derive(Clone)]
pub struct BlockList {
    store: Arc<dyn SharedStore>,
    ttl: Duration,
}

impl BlockList {
    pub fn new(store: Arc<dyn SharedStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Record that `blocker_id` blocked `blocked_id`. Re-blocking restarts
    /// the expiry clock.
    pub async fn block(&self, blocker_id: &str, blocked_id: &str) -> Result<()> {
        if blocker_id == blocked_id {
            return Err(StudyMateError::ValidationError(
                "Users cannot block themselves".to_string(),
            ));
        }
        if blocker_id.contains(':') || blocked_id.contains(':') {
            return Err(StudyMateError::ValidationError(
                "User ids cannot contain ':'".to_string(),
            ));
        }

        self.store
            .set(&block_key(blocker_id, blocked_id), "1", Some(self.ttl))
            .await
    }

    /// True when either user has blocked the other
    pub async fn is_blocked(&self, a: &str, b: &str) -> Result<bool> {
        if self.store.exists(&block_key(a, b)).await? {
            return Ok(true);
        }
        self.store.exists(&block_key(b, a)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn block_list(ttl: Duration) -> BlockList {
        BlockList::new(Arc::new(MemoryStore::new()), ttl)
    }

    #[tokio::test]
    async fn test_colon_ids_rejected() {
        let blocks = block_list(Duration::from_secs(60));
        assert!(blocks.block("a:b", "c").await.is_err());
        assert!(!blocks.is_blocked("a", "b:c").await.unwrap());
    }

    #[tokio::test]
    async fn test_block_is_symmetric() {
        let blocks = block_list(Duration::from_secs(60));
        blocks.block("a", "b").await.unwrap();

        assert!(blocks.is_blocked("a", "b").await.unwrap());
        assert!(blocks.is_blocked("b", "a").await.unwrap());
        assert!(!blocks.is_blocked("a", "c").await.unwrap());
    }

    #[tokio::test]
    async fn test_block_is_idempotent() {
        let blocks = block_list(Duration::from_secs(60));
        blocks.block("a", "b").await.unwrap();
        blocks.block("a", "b").await.unwrap();
        assert!(blocks.is_blocked("b", "a").await.unwrap());
    }

    #[tokio::test]
    async fn test_block_expires() {
        let blocks = block_list(Duration::from_millis(30));
        blocks.block("a", "b").await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!blocks.is_blocked("a", "b").await.unwrap());
    }

    #[tokio::test]
    async fn test_self_block_rejected() {
        let blocks = block_list(Duration::from_secs(60));
        assert!(blocks.block("a", "a").await.is_err());
    }
}
