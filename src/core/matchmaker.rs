//! Tag-overlap pairing against the wait queue
//!
//! A pairing attempt drains at most `queue_length()` entries, scores each
//! against the candidate, takes the best one and puts every other drained
//! entry back. The queue is expected to hold tens of users, so a linear
//! scan per attempt is fine.

use std::sync::Arc;

use crate::core::block_list::BlockList;
use crate::core::queue::WaitQueue;
use crate::core::registry::ConnectionRegistry;
use crate::core::user::{tag_overlap, User, WaitEntry};
use crate::error::Result;

#[derive(Clone)]
pub struct Matchmaker {
    queue: WaitQueue,
    blocks: BlockList,
    registry: Arc<ConnectionRegistry>,
}

impl Matchmaker {
    pub fn new(queue: WaitQueue, blocks: BlockList, registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            queue,
            blocks,
            registry,
        }
    }

    /// Find and remove the best partner for `candidate`.
    ///
    /// The best partner has the highest tag overlap; ties go to the entry
    /// popped first. Entries for the candidate themselves, blocked pairs,
    /// and zero-overlap entries are never chosen. Entries whose connection
    /// here has gone idle or ended were left while drained elsewhere; they
    /// are dropped rather than put back. Returns `None` when nobody fits;
    /// enqueueing the candidate is left to the caller.
    pub async fn find_match(&self, candidate: &User) -> Result<Option<User>> {
        let mut drained = self.drain().await?;
        let total = drained.len();
        self.discard_abandoned(&mut drained).await;

        let mut best: Option<(usize, usize)> = None;
        let mut failure = None;
        for (index, entry) in drained.iter().enumerate() {
            if entry.user.id == candidate.id {
                continue;
            }

            match self.blocks.is_blocked(&candidate.id, &entry.user.id).await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }

            let score = tag_overlap(candidate, &entry.user);
            if score == 0 {
                continue;
            }
            if best.map_or(true, |(_, best_score)| score > best_score) {
                best = Some((index, score));
            }
        }

        if let Some(e) = failure {
            self.restore(drained).await;
            return Err(e);
        }

        let winner = best.map(|(index, score)| {
            let entry = drained.remove(index);
            log::debug!(
                "Matched {} with {} (score {}, scanned {})",
                candidate.id,
                entry.user.id,
                score,
                total
            );
            entry.user
        });

        self.restore(drained).await;
        Ok(winner)
    }

    /// Pop up to the current queue length. If a pop fails, whatever was
    /// already taken goes back before the error is returned.
    async fn drain(&self) -> Result<Vec<WaitEntry>> {
        let budget = self.queue.len().await?;
        let mut drained = Vec::with_capacity(budget);

        for _ in 0..budget {
            match self.queue.pop().await {
                Ok(Some(entry)) => drained.push(entry),
                Ok(None) => break,
                Err(e) => {
                    self.restore(drained).await;
                    return Err(e);
                }
            }
        }
        Ok(drained)
    }

    async fn discard_abandoned(&self, drained: &mut Vec<WaitEntry>) {
        let mut kept = Vec::with_capacity(drained.len());
        for entry in drained.drain(..) {
            match self.registry.user_state(&entry.user.id).await {
                Some(state) if state.is_out_of_queue() => {
                    log::debug!("Dropping abandoned queue entry for {}", entry.user.id);
                }
                _ => kept.push(entry),
            }
        }
        *drained = kept;
    }

    /// Push drained entries back, last popped first, so the queue ends up
    /// in its original order.
    async fn restore(&self, drained: Vec<WaitEntry>) {
        for entry in drained.iter().rev() {
            if let Err(e) = self.queue.requeue(entry).await {
                log::error!(
                    "Failed to return {} to the wait queue: {}",
                    entry.user.id,
                    e
                );
            }
        }
    }
}
