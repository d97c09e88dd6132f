//! Priority ordering for fetch batches
//!
//! Batches are cut from one of three windows. The window they came from (the
//! tier) decides their queue position: render work first, then safety work,
//! then background work. Within a tier, batches leave in FIFO order.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::mem;

/// Unique batch identifier
pub type BatchId = u64;

/// The window a batch was cut from
///
/// Higher numeric values are dequeued first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowTier {
    /// Opportunistic work ahead of the reader
    Background = 0,

    /// Margin the reader will reach within a few frames
    Safety = 1,

    /// Rows on screen or about to be
    Render = 2,
}

impl WindowTier {
    /// Fetch priority for batches of this tier
    pub fn priority(self) -> BatchPriority {
        match self {
            WindowTier::Render | WindowTier::Safety => BatchPriority::High,
            WindowTier::Background => BatchPriority::Low,
        }
    }
}

/// Fetch priority reported on batches and in diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchPriority {
    Low = 0,
    High = 1,
}

impl BatchPriority {
    pub fn is_high(self) -> bool {
        self == BatchPriority::High
    }
}

/// A batch waiting in the queue
#[derive(Debug, Clone)]
pub struct QueuedBatch<T> {
    /// Identifier assigned on push
    pub id: BatchId,

    /// Tier the batch was cut from
    pub tier: WindowTier,

    /// Caller data (indices, dataset, token)
    pub payload: T,

    insertion_order: u64,
}

impl<T> QueuedBatch<T> {
    pub fn priority(&self) -> BatchPriority {
        self.tier.priority()
    }
}

impl<T> PartialEq for QueuedBatch<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for QueuedBatch<T> {}

impl<T> PartialOrd for QueuedBatch<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for QueuedBatch<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.tier.cmp(&other.tier) {
            // BinaryHeap is a max heap, so earlier insertions must compare greater
            Ordering::Equal => other.insertion_order.cmp(&self.insertion_order),
            other => other,
        }
    }
}

/// Tier-ordered batch queue
///
/// Not synchronized on its own: the owner keeps it behind the same lock as
/// the rest of its scheduling state so queue changes and cache changes are
/// observed together.
///
/// # Example
///
/// ```
/// use lectern_scheduler::{BatchQueue, WindowTier};
///
/// let mut queue = BatchQueue::new();
/// queue.push(WindowTier::Background, "later");
/// queue.push(WindowTier::Render, "now");
///
/// assert_eq!(queue.pop().unwrap().payload, "now");
/// assert_eq!(queue.pop().unwrap().payload, "later");
/// ```
#[derive(Debug)]
pub struct BatchQueue<T> {
    heap: BinaryHeap<QueuedBatch<T>>,
    next_id: BatchId,
    insertion_counter: u64,
}

impl<T> BatchQueue<T> {
    /// Create an empty queue
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_id: 1,
            insertion_counter: 0,
        }
    }

    /// Queue a batch and return its id
    pub fn push(&mut self, tier: WindowTier, payload: T) -> BatchId {
        let id = self.next_id;
        self.next_id += 1;

        let insertion_order = self.insertion_counter;
        self.insertion_counter += 1;

        self.heap.push(QueuedBatch {
            id,
            tier,
            payload,
            insertion_order,
        });

        id
    }

    /// Remove the batch that should dispatch next
    pub fn pop(&mut self) -> Option<QueuedBatch<T>> {
        self.heap.pop()
    }

    /// The batch that would dispatch next
    pub fn peek(&self) -> Option<&QueuedBatch<T>> {
        self.heap.peek()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Number of queued batches of the given priority
    pub fn count_priority(&self, priority: BatchPriority) -> usize {
        self.heap
            .iter()
            .filter(|batch| batch.priority() == priority)
            .count()
    }

    /// Drop every queued batch, returning them in no particular order
    pub fn drain(&mut self) -> Vec<QueuedBatch<T>> {
        mem::take(&mut self.heap).into_vec()
    }

    /// Remove all batches matching a predicate and return them
    pub fn remove_if<F>(&mut self, mut predicate: F) -> Vec<QueuedBatch<T>>
    where
        F: FnMut(&QueuedBatch<T>) -> bool,
    {
        let (removed, kept): (Vec<_>, Vec<_>) = mem::take(&mut self.heap)
            .into_vec()
            .into_iter()
            .partition(|batch| predicate(batch));
        self.heap = kept.into();
        removed
    }

    /// Edit payloads in place
    ///
    /// Tier and queue position are unchanged. Batches for which `edit`
    /// returns `false` are dropped and returned.
    pub fn edit_payloads<F>(&mut self, mut edit: F) -> Vec<QueuedBatch<T>>
    where
        F: FnMut(WindowTier, &mut T) -> bool,
    {
        let mut kept = Vec::with_capacity(self.heap.len());
        let mut dropped = Vec::new();
        for mut batch in mem::take(&mut self.heap).into_vec() {
            if edit(batch.tier, &mut batch.payload) {
                kept.push(batch);
            } else {
                dropped.push(batch);
            }
        }
        self.heap = kept.into();
        dropped
    }

    /// Iterate queued batches in arbitrary order
    pub fn iter(&self) -> impl Iterator<Item = &QueuedBatch<T>> {
        self.heap.iter()
    }
}

impl<T> Default for BatchQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_ordering() {
        assert!(WindowTier::Render > WindowTier::Safety);
        assert!(WindowTier::Safety > WindowTier::Background);
    }

    #[test]
    fn test_tier_priority() {
        assert_eq!(WindowTier::Render.priority(), BatchPriority::High);
        assert_eq!(WindowTier::Safety.priority(), BatchPriority::High);
        assert_eq!(WindowTier::Background.priority(), BatchPriority::Low);
        assert!(BatchPriority::High.is_high());
        assert!(!BatchPriority::Low.is_high());
    }

    #[test]
    fn test_queue_basic() {
        let mut queue = BatchQueue::new();
        assert!(queue.is_empty());

        let id = queue.push(WindowTier::Safety, 7u32);
        assert_eq!(queue.len(), 1);

        let batch = queue.pop().unwrap();
        assert_eq!(batch.id, id);
        assert_eq!(batch.payload, 7);
        assert_eq!(batch.priority(), BatchPriority::High);
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_ids_are_unique_and_increasing() {
        let mut queue = BatchQueue::new();
        let a = queue.push(WindowTier::Background, ());
        let b = queue.push(WindowTier::Background, ());
        assert!(b > a);
    }

    #[test]
    fn test_render_jumps_ahead_of_earlier_background() {
        let mut queue = BatchQueue::new();
        let low = queue.push(WindowTier::Background, "low");
        let safety = queue.push(WindowTier::Safety, "safety");
        let render = queue.push(WindowTier::Render, "render");

        assert_eq!(queue.peek().unwrap().id, render);
        assert_eq!(queue.pop().unwrap().id, render);
        assert_eq!(queue.pop().unwrap().id, safety);
        assert_eq!(queue.pop().unwrap().id, low);
    }

    #[test]
    fn test_fifo_within_tier() {
        let mut queue = BatchQueue::new();
        let ids: Vec<_> = (0..4).map(|i| queue.push(WindowTier::Background, i)).collect();

        for id in ids {
            assert_eq!(queue.pop().unwrap().id, id);
        }
    }

    #[test]
    fn test_count_priority() {
        let mut queue = BatchQueue::new();
        queue.push(WindowTier::Render, ());
        queue.push(WindowTier::Safety, ());
        queue.push(WindowTier::Background, ());

        assert_eq!(queue.count_priority(BatchPriority::High), 2);
        assert_eq!(queue.count_priority(BatchPriority::Low), 1);
    }

    #[test]
    fn test_remove_if_returns_removed() {
        let mut queue = BatchQueue::new();
        queue.push(WindowTier::Background, 1);
        queue.push(WindowTier::Background, 2);
        queue.push(WindowTier::Render, 3);

        let removed = queue.remove_if(|batch| batch.tier == WindowTier::Background);
        assert_eq!(removed.len(), 2);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pop().unwrap().payload, 3);
    }

    #[test]
    fn test_edit_payloads_keeps_order_and_drops_empty() {
        let mut queue = BatchQueue::new();
        let first = queue.push(WindowTier::Background, vec![1, 2, 3]);
        let emptied = queue.push(WindowTier::Background, vec![4]);
        let last = queue.push(WindowTier::Background, vec![5, 6]);

        let dropped = queue.edit_payloads(|_, indices| {
            indices.retain(|i| *i != 2 && *i != 4);
            !indices.is_empty()
        });

        assert_eq!(dropped.len(), 1);
        assert_eq!(dropped[0].id, emptied);

        let batch = queue.pop().unwrap();
        assert_eq!(batch.id, first);
        assert_eq!(batch.payload, vec![1, 3]);
        assert_eq!(queue.pop().unwrap().id, last);
    }

    #[test]
    fn test_drain_empties_queue() {
        let mut queue = BatchQueue::new();
        queue.push(WindowTier::Render, ());
        queue.push(WindowTier::Background, ());

        assert_eq!(queue.drain().len(), 2);
        assert!(queue.is_empty());
    }
}
