//! Pull-based diagnostics
//!
//! The scheduler keeps a short ring buffer of recent batches; the session
//! combines it with the current windows, velocity and stats into a
//! serializable snapshot for debug overlays and bug reports.

use crate::prefetch::SchedulerStats;
use lectern_cache::{CacheStats, DatasetId};
use lectern_scheduler::{
    BatchId, BatchPriority, DeviceClass, IndexRange, Velocity, WindowSet, WindowTier,
};
use serde::Serialize;
use std::collections::VecDeque;

/// Lifecycle of a fetch batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Queued,
    Dispatched,
    Completed,
    Cancelled,
    Errored,
}

impl BatchStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BatchStatus::Completed | BatchStatus::Cancelled | BatchStatus::Errored
        )
    }
}

/// One entry of the batch history
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchRecord {
    pub batch_id: BatchId,
    pub dataset: DatasetId,
    pub priority: BatchPriority,
    pub tier: WindowTier,
    /// Smallest range covering the batch's rows
    pub index_range: IndexRange,
    /// Rows requested from the loader
    pub requested: usize,
    /// Rows that became ready
    pub result_count: usize,
    pub status: BatchStatus,
    /// Milliseconds since the scheduler was created, at the last status change
    pub elapsed_ms: u64,
}

/// Fixed-size ring of recent batches, newest last
#[derive(Debug, Clone)]
pub struct BatchHistory {
    records: VecDeque<BatchRecord>,
    capacity: usize,
}

impl BatchHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, record: BatchRecord) {
        if self.capacity == 0 {
            return;
        }
        while self.records.len() >= self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    /// Move a batch still in the ring to a new status
    pub fn update(&mut self, batch_id: BatchId, status: BatchStatus, result_count: usize, elapsed_ms: u64) {
        if let Some(record) = self
            .records
            .iter_mut()
            .rev()
            .find(|record| record.batch_id == batch_id)
        {
            record.status = status;
            record.result_count = result_count;
            record.elapsed_ms = elapsed_ms;
        }
    }

    pub fn records(&self) -> Vec<BatchRecord> {
        self.records.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Everything a debug overlay needs, captured at one instant
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticsSnapshot {
    pub dataset: Option<DatasetId>,
    pub center_index: Option<u32>,
    pub windows: Option<WindowSet>,
    pub velocity: Velocity,
    pub device: DeviceClass,
    pub concurrency_cap: usize,
    pub cache: CacheStats,
    pub scheduler: SchedulerStats,
    pub recent_batches: Vec<BatchRecord>,
}

impl DiagnosticsSnapshot {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(batch_id: BatchId) -> BatchRecord {
        BatchRecord {
            batch_id,
            dataset: DatasetId::new("KJV"),
            priority: BatchPriority::Low,
            tier: WindowTier::Background,
            index_range: IndexRange::inclusive(100, 150),
            requested: 51,
            result_count: 0,
            status: BatchStatus::Dispatched,
            elapsed_ms: 0,
        }
    }

    #[test]
    fn test_history_is_bounded() {
        let mut history = BatchHistory::new(3);
        for id in 0..5 {
            history.push(record(id));
        }
        let ids: Vec<_> = history.records().iter().map(|r| r.batch_id).collect();
        assert_eq!(ids, vec![2, 3, 4]);
    }

    #[test]
    fn test_history_update() {
        let mut history = BatchHistory::new(3);
        history.push(record(7));
        history.update(7, BatchStatus::Completed, 51, 40);
        history.update(99, BatchStatus::Errored, 0, 50);

        let records = history.records();
        assert_eq!(records[0].status, BatchStatus::Completed);
        assert_eq!(records[0].result_count, 51);
        assert_eq!(records[0].elapsed_ms, 40);
    }

    #[test]
    fn test_zero_capacity_history() {
        let mut history = BatchHistory::new(0);
        history.push(record(1));
        assert!(history.is_empty());
    }

    #[test]
    fn test_status_terminal() {
        assert!(!BatchStatus::Queued.is_terminal());
        assert!(!BatchStatus::Dispatched.is_terminal());
        assert!(BatchStatus::Completed.is_terminal());
        assert!(BatchStatus::Cancelled.is_terminal());
        assert!(BatchStatus::Errored.is_terminal());
    }

    #[test]
    fn test_record_json_shape() {
        let json = serde_json::to_value(record(3)).unwrap();
        assert_eq!(json["priority"], "low");
        assert_eq!(json["tier"], "background");
        assert_eq!(json["status"], "dispatched");
        assert_eq!(json["dataset"], "KJV");
        assert_eq!(json["index_range"]["first"], 100);
        assert_eq!(json["index_range"]["last"], 150);
    }
}
