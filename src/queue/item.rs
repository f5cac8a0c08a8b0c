//! Queue bookkeeping types.

use crate::chunk::AudioChunk;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::time::Instant;

/// Lifecycle of a queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueItemStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// One chunk's admission record. Exactly one exists per chunk id; only the
/// queue's own dispatch logic mutates it after creation.
#[derive(Debug, Clone)]
pub struct QueueItem {
    pub chunk: AudioChunk,
    pub priority: i32,
    pub status: QueueItemStatus,
    /// Attempts started so far (1 on the first dispatch).
    pub attempt_count: u32,
    pub enqueued_at: Instant,
    /// Admission order, used as the priority tie-break.
    pub(crate) order: u64,
}

impl QueueItem {
    pub(crate) fn new(chunk: AudioChunk, priority: i32, order: u64) -> Self {
        Self {
            chunk,
            priority,
            status: QueueItemStatus::Pending,
            attempt_count: 0,
            enqueued_at: Instant::now(),
            order,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            QueueItemStatus::Completed | QueueItemStatus::Failed
        )
    }
}

/// Heap entry for the pending set: highest priority first, admission order
/// as the tie-break.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PendingEntry {
    pub priority: i32,
    pub order: u64,
    pub chunk_id: String,
}

impl Ord for PendingEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: larger compares greater. Earlier admission wins ties,
        // so a *smaller* order must compare greater.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.order.cmp(&self.order))
    }
}

impl PartialOrd for PendingEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Aggregate queue counters, published through `on_progress`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub total_items: usize,
    pub pending_items: usize,
    pub processing_items: usize,
    pub completed_items: usize,
    pub failed_items: usize,
}
