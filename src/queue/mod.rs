//! Priority work queue dispatching chunks to the transcription backend.
//!
//! Bounded concurrency, per-item retry, and a consecutive-failure circuit
//! breaker. Completion order is unordered once concurrency exceeds one;
//! consolidation downstream restores sequence order.

pub mod item;

pub use item::{QueueItem, QueueItemStatus, QueueStats};

use crate::backend::TranscriptionBackend;
use crate::chunk::{AudioChunk, ChunkResult, ChunkStatus};
use crate::defaults;
use crate::error::{Result, ScrivaError};
use item::PendingEntry;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::Notify;

/// Queue tuning knobs.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum chunks in flight at once.
    pub max_concurrency: usize,
    /// Retries after the first failed attempt (total attempts = retries + 1).
    pub max_retry_count: u32,
    /// Per-attempt deadline; a timed-out attempt counts as a failed attempt.
    pub processing_timeout: Option<Duration>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrency: defaults::MAX_CONCURRENCY,
            max_retry_count: defaults::MAX_RETRY_COUNT,
            processing_timeout: Some(defaults::PROCESSING_TIMEOUT),
        }
    }
}

type CompleteCallback = Box<dyn Fn(&ChunkResult) + Send + Sync>;
type ProgressCallback = Box<dyn Fn(&QueueStats) + Send + Sync>;

#[derive(Default)]
struct Callbacks {
    complete: Vec<CompleteCallback>,
    progress: Vec<ProgressCallback>,
}

struct QueueState {
    items: HashMap<String, QueueItem>,
    pending: BinaryHeap<PendingEntry>,
    completed: HashMap<String, ChunkResult>,
    failed: HashMap<String, QueueItem>,
    processing: usize,
    consecutive_failures: u32,
    tripped: bool,
    stopped: bool,
    next_order: u64,
}

impl QueueState {
    fn new() -> Self {
        Self {
            items: HashMap::new(),
            pending: BinaryHeap::new(),
            completed: HashMap::new(),
            failed: HashMap::new(),
            processing: 0,
            consecutive_failures: 0,
            tripped: false,
            stopped: false,
            next_order: 0,
        }
    }

    fn stats(&self) -> QueueStats {
        let mut stats = QueueStats {
            total_items: self.items.len(),
            ..QueueStats::default()
        };
        for item in self.items.values() {
            match item.status {
                QueueItemStatus::Pending => stats.pending_items += 1,
                QueueItemStatus::Processing => stats.processing_items += 1,
                QueueItemStatus::Completed => stats.completed_items += 1,
                QueueItemStatus::Failed => stats.failed_items += 1,
            }
        }
        stats
    }
}

/// Work dispatched to one attempt task.
struct AttemptJob {
    chunk_id: String,
    sequence: u64,
    audio: Vec<u8>,
    first_attempt_at: Instant,
}

/// Priority transcription queue with bounded concurrency and retry.
pub struct TranscriptionQueue {
    backend: Arc<dyn TranscriptionBackend>,
    config: QueueConfig,
    state: Arc<Mutex<QueueState>>,
    callbacks: Arc<Mutex<Callbacks>>,
    wake: Arc<Notify>,
    /// Observed concurrency high-water mark, for diagnostics and tests.
    peak_concurrency: Arc<AtomicUsize>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl TranscriptionQueue {
    pub fn new(backend: Arc<dyn TranscriptionBackend>, config: QueueConfig) -> Self {
        Self {
            backend,
            config,
            state: Arc::new(Mutex::new(QueueState::new())),
            callbacks: Arc::new(Mutex::new(Callbacks::default())),
            wake: Arc::new(Notify::new()),
            peak_concurrency: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Admits a chunk as a pending item.
    ///
    /// # Errors
    /// [`ScrivaError::DuplicateChunk`] if an item with this chunk id already
    /// exists, in any status — one item per chunk id, ever.
    pub fn enqueue(&self, chunk: AudioChunk, priority: i32) -> Result<()> {
        let stats = {
            let mut st = lock(&self.state);
            if st.items.contains_key(&chunk.id) {
                return Err(ScrivaError::DuplicateChunk {
                    chunk_id: chunk.id.clone(),
                });
            }
            let order = st.next_order;
            st.next_order += 1;
            st.pending.push(PendingEntry {
                priority,
                order,
                chunk_id: chunk.id.clone(),
            });
            st.items
                .insert(chunk.id.clone(), QueueItem::new(chunk, priority, order));
            st.stats()
        };
        self.fire_progress(&stats);
        self.wake.notify_one();
        Ok(())
    }

    /// Dispatches pending items until no pending or processing work remains,
    /// the breaker trips, or the queue is stopped. In-flight attempts are
    /// always allowed to finish.
    pub async fn start_processing(&self) {
        enum Step {
            Dispatch(AttemptJob),
            Wait,
            Done,
        }

        loop {
            let notified = self.wake.notified();

            let step = {
                let mut st = lock(&self.state);
                if st.processing < self.config.max_concurrency
                    && !st.stopped
                    && !st.tripped
                    && let Some(entry) = st.pending.pop()
                {
                    let job = st.items.get_mut(&entry.chunk_id).map(|item| {
                        item.status = QueueItemStatus::Processing;
                        item.attempt_count += 1;
                        AttemptJob {
                            chunk_id: item.chunk.id.clone(),
                            sequence: item.chunk.sequence,
                            audio: item.chunk.audio_data.clone(),
                            first_attempt_at: item.enqueued_at,
                        }
                    });
                    match job {
                        Some(job) => {
                            st.processing += 1;
                            self.peak_concurrency
                                .fetch_max(st.processing, Ordering::SeqCst);
                            Step::Dispatch(job)
                        }
                        // Entry for an item removed by clear(); skip it.
                        None => continue,
                    }
                } else if st.processing == 0
                    && (st.pending.is_empty() || st.stopped || st.tripped)
                {
                    Step::Done
                } else {
                    Step::Wait
                }
            };

            match step {
                Step::Done => break,
                Step::Wait => notified.await,
                Step::Dispatch(job) => {
                    let stats = lock(&self.state).stats();
                    self.fire_progress(&stats);
                    self.spawn_attempt(job);
                }
            }
        }
    }

    fn spawn_attempt(&self, job: AttemptJob) {
        let backend = self.backend.clone();
        let state = self.state.clone();
        let callbacks = self.callbacks.clone();
        let wake = self.wake.clone();
        let timeout = self.config.processing_timeout;
        let max_retry_count = self.config.max_retry_count;

        tokio::spawn(async move {
            let audio = job.audio;
            let call = tokio::task::spawn_blocking(move || backend.transcribe(&audio));

            let outcome = match timeout {
                Some(deadline) => match tokio::time::timeout(deadline, call).await {
                    Ok(joined) => flatten_join(joined),
                    Err(_) => Err(ScrivaError::TranscriptionTimeout {
                        timeout_ms: deadline.as_millis() as u64,
                    }),
                },
                None => flatten_join(call.await),
            };

            finish_attempt(&state, &callbacks, &job.chunk_id, job.sequence, job.first_attempt_at, outcome, max_retry_count);
            wake.notify_one();
        });
    }

    /// Stops admitting new dispatches; in-flight attempts finish. Idempotent.
    pub fn stop(&self) {
        lock(&self.state).stopped = true;
        self.wake.notify_one();
    }

    /// True once the consecutive-failure breaker has halted dispatch.
    pub fn is_tripped(&self) -> bool {
        lock(&self.state).tripped
    }

    /// Consecutive terminal failures observed since the last success.
    pub fn consecutive_failures(&self) -> u32 {
        lock(&self.state).consecutive_failures
    }

    /// Highest number of simultaneously processing items seen so far.
    pub fn peak_concurrency(&self) -> usize {
        self.peak_concurrency.load(Ordering::SeqCst)
    }

    pub fn get_stats(&self) -> QueueStats {
        lock(&self.state).stats()
    }

    pub fn get_completed_results(&self) -> HashMap<String, ChunkResult> {
        lock(&self.state).completed.clone()
    }

    pub fn get_failed_items(&self) -> HashMap<String, QueueItem> {
        lock(&self.state).failed.clone()
    }

    /// Drops every item and resets all counters, breaker included.
    pub fn clear(&self) {
        let mut st = lock(&self.state);
        st.items.clear();
        st.pending.clear();
        st.completed.clear();
        st.failed.clear();
        st.consecutive_failures = 0;
        st.tripped = false;
        st.next_order = 0;
        drop(st);
        self.wake.notify_one();
    }

    pub fn on_processing_complete(&self, cb: impl Fn(&ChunkResult) + Send + Sync + 'static) {
        lock(&self.callbacks).complete.push(Box::new(cb));
    }

    pub fn on_progress(&self, cb: impl Fn(&QueueStats) + Send + Sync + 'static) {
        lock(&self.callbacks).progress.push(Box::new(cb));
    }

    pub fn clear_callbacks(&self) {
        let mut cbs = lock(&self.callbacks);
        cbs.complete.clear();
        cbs.progress.clear();
    }

    fn fire_progress(&self, stats: &QueueStats) {
        for cb in &lock(&self.callbacks).progress {
            cb(stats);
        }
    }
}

fn flatten_join(
    joined: std::result::Result<Result<crate::backend::TranscriptionOutput>, tokio::task::JoinError>,
) -> Result<crate::backend::TranscriptionOutput> {
    match joined {
        Ok(result) => result,
        Err(e) => Err(ScrivaError::Transcription {
            message: format!("transcription task panicked: {}", e),
        }),
    }
}

/// Applies one attempt's outcome: success completes the item, failure either
/// re-enqueues it or records it as terminally failed and feeds the breaker.
fn finish_attempt(
    state: &Mutex<QueueState>,
    callbacks: &Mutex<Callbacks>,
    chunk_id: &str,
    sequence: u64,
    first_attempt_at: Instant,
    outcome: Result<crate::backend::TranscriptionOutput>,
    max_retry_count: u32,
) {
    let (terminal_result, stats) = {
        let mut st = lock(state);
        st.processing = st.processing.saturating_sub(1);

        // clear() may have dropped the item while the attempt was in flight
        let Some(item) = st.items.get_mut(chunk_id) else {
            return;
        };

        let terminal = match outcome {
            Ok(output) => {
                item.status = QueueItemStatus::Completed;
                st.consecutive_failures = 0;
                let result = ChunkResult {
                    chunk_id: chunk_id.to_string(),
                    sequence,
                    status: ChunkStatus::Completed,
                    segments: output.segments,
                    processing_time: first_attempt_at.elapsed(),
                    error: None,
                };
                st.completed.insert(chunk_id.to_string(), result.clone());
                Some(result)
            }
            Err(error) => {
                // Permanent errors (malformed chunk payloads) retry to the
                // same result; only transient failures get another attempt.
                if item.attempt_count <= max_retry_count && !error.is_permanent() {
                    // Immediate retry: back to pending under the original
                    // priority and admission order.
                    item.status = QueueItemStatus::Pending;
                    let entry = PendingEntry {
                        priority: item.priority,
                        order: item.order,
                        chunk_id: chunk_id.to_string(),
                    };
                    st.pending.push(entry);
                    None
                } else {
                    item.status = QueueItemStatus::Failed;
                    let failed_item = item.clone();
                    st.failed.insert(chunk_id.to_string(), failed_item);
                    st.consecutive_failures += 1;
                    if st.consecutive_failures >= defaults::CONSECUTIVE_FAILURE_LIMIT {
                        st.tripped = true;
                    }
                    Some(ChunkResult {
                        chunk_id: chunk_id.to_string(),
                        sequence,
                        status: ChunkStatus::Failed,
                        segments: Vec::new(),
                        processing_time: first_attempt_at.elapsed(),
                        error: Some(error.to_string()),
                    })
                }
            }
        };
        (terminal, st.stats())
    };

    let cbs = lock(callbacks);
    if let Some(result) = &terminal_result {
        for cb in &cbs.complete {
            cb(result);
        }
    }
    for cb in &cbs.progress {
        cb(&stats);
    }
}
