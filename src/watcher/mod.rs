//! Chunk file discovery and session orchestration.
//!
//! Polls the session temp directory, submits newly stable chunk files to the
//! transcription queue in sequence order, consolidates the results, and
//! periodically persists the transcript to the output file. The watcher only
//! ever reads the temp directory; capture is its only writer.

use crate::backend::TranscriptionBackend;
use crate::chunk::{AudioChunk, ChunkResult, parse_chunk_file_name};
use crate::consolidate::{ResultConsolidator, TextFormat};
use crate::defaults;
use crate::error::ScrivaError;
use crate::queue::{QueueConfig, TranscriptionQueue};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Watcher tuning knobs.
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Poll interval for chunk file discovery.
    pub file_check_interval: Duration,
    /// Retries after a failed transcription attempt.
    pub max_retry_count: u32,
    /// Per-attempt transcription deadline.
    pub processing_timeout: Duration,
    /// When false, failed attempts are terminal immediately.
    pub enable_auto_retry: bool,
    /// Interval between transcript flushes to the output file.
    pub text_write_interval: Duration,
    /// When false, the transcript is only written on explicit flushes.
    pub enable_auto_save: bool,
    pub text_format: TextFormat,
    /// Concurrency handed to the underlying queue.
    pub max_concurrency: usize,
    /// Slice length chunks were recorded with, for timeline placement.
    pub time_slice: Duration,
    /// Overlap chunks were recorded with.
    pub overlap: Duration,
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            file_check_interval: defaults::FILE_CHECK_INTERVAL,
            max_retry_count: defaults::MAX_RETRY_COUNT,
            processing_timeout: defaults::PROCESSING_TIMEOUT,
            enable_auto_retry: true,
            text_write_interval: defaults::TEXT_WRITE_INTERVAL,
            enable_auto_save: true,
            text_format: TextFormat::Plain,
            max_concurrency: defaults::MAX_CONCURRENCY,
            time_slice: defaults::TIME_SLICE,
            overlap: defaults::CHUNK_OVERLAP,
            sample_rate: defaults::SAMPLE_RATE,
            channels: defaults::CHANNELS,
        }
    }
}

/// Mutable per-session bookkeeping.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub watch_folder: PathBuf,
    pub output_path: PathBuf,
    /// Next sequence number the watcher expects to discover.
    pub chunk_sequence_counter: u64,
    pub consecutive_failure_count: u32,
    pub last_flush_time: Option<Instant>,
}

/// Aggregate session counters, published through `on_stats_update`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WatcherStats {
    /// Chunks submitted to the queue so far.
    pub total_chunks: usize,
    pub processed_chunks: usize,
    pub failed_chunks: usize,
    pub average_processing_ms: f64,
}

/// Two-poll size-stability gate: a chunk file is submitted only once its
/// size is unchanged between successive polls, so half-written files are
/// never fed to the backend.
#[derive(Debug, Default)]
struct StabilityGate {
    sizes: HashMap<String, u64>,
}

impl StabilityGate {
    /// Records an observation; returns true once the file may be submitted.
    fn admit(&mut self, name: &str, size: u64) -> bool {
        match self.sizes.get(name) {
            Some(&previous) if previous == size => {
                self.sizes.remove(name);
                true
            }
            _ => {
                self.sizes.insert(name.to_string(), size);
                false
            }
        }
    }

    /// Forgets a file so a failed read is retried from scratch.
    fn forget(&mut self, name: &str) {
        self.sizes.remove(name);
    }
}

type StatsCallback = Box<dyn Fn(&WatcherStats) + Send + Sync>;
type ErrorCallback = Box<dyn Fn(&ScrivaError) + Send + Sync>;
type CompleteCallback = Box<dyn Fn(&ChunkResult, &str) + Send + Sync>;

#[derive(Default)]
struct WatcherCallbacks {
    stats: Mutex<Vec<StatsCallback>>,
    error: Mutex<Vec<ErrorCallback>>,
    complete: Mutex<Vec<CompleteCallback>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct WatcherShared {
    config: WatcherConfig,
    queue: TranscriptionQueue,
    consolidator: Mutex<ResultConsolidator>,
    session: Mutex<SessionState>,
    /// Submitted sequence numbers and their file names.
    submitted: Mutex<HashMap<u64, String>>,
    gate: Mutex<StabilityGate>,
    callbacks: Arc<WatcherCallbacks>,
    running: AtomicBool,
    dispatch_active: AtomicBool,
    breaker_reported: AtomicBool,
    flushed_revision: AtomicU64,
    /// The output file has exactly one writer at a time: the periodic flush
    /// and explicit flushes serialize here.
    flush_lock: Mutex<()>,
}

impl WatcherShared {
    fn stats(&self) -> WatcherStats {
        let consolidation = lock(&self.consolidator).stats();
        WatcherStats {
            total_chunks: lock(&self.submitted).len(),
            processed_chunks: consolidation.processed_chunks,
            failed_chunks: consolidation.failed_chunks,
            average_processing_ms: consolidation.average_processing_ms,
        }
    }

    fn fire_error(&self, error: &ScrivaError) {
        for cb in lock(&self.callbacks.error).iter() {
            cb(error);
        }
    }

    fn fire_stats(&self) {
        let stats = self.stats();
        for cb in lock(&self.callbacks.stats).iter() {
            cb(&stats);
        }
    }
}

/// Watches a chunk directory and drives transcription for a session.
pub struct ChunkFileWatcher {
    backend: Arc<dyn TranscriptionBackend>,
    config: WatcherConfig,
    callbacks: Arc<WatcherCallbacks>,
    shared: Option<Arc<WatcherShared>>,
    tasks: Vec<JoinHandle<()>>,
}

impl ChunkFileWatcher {
    pub fn new(backend: Arc<dyn TranscriptionBackend>, config: WatcherConfig) -> Self {
        Self {
            backend,
            config,
            callbacks: Arc::new(WatcherCallbacks::default()),
            shared: None,
            tasks: Vec::new(),
        }
    }

    /// Fired after every consolidation change with aggregate counters.
    pub fn on_stats_update(&self, cb: impl Fn(&WatcherStats) + Send + Sync + 'static) {
        lock(&self.callbacks.stats).push(Box::new(cb));
    }

    /// Fired on unrecoverable conditions: unreadable watch folder,
    /// unwritable output file, or a tripped circuit breaker.
    pub fn on_error(&self, cb: impl Fn(&ScrivaError) + Send + Sync + 'static) {
        lock(&self.callbacks.error).push(Box::new(cb));
    }

    /// Fired once per chunk when its result is consolidated, with the
    /// originating chunk file name.
    pub fn on_transcription_complete(
        &self,
        cb: impl Fn(&ChunkResult, &str) + Send + Sync + 'static,
    ) {
        lock(&self.callbacks.complete).push(Box::new(cb));
    }

    /// Begins watching `watch_folder` and writing the consolidated
    /// transcript to `output_path`.
    ///
    /// Must be called within a tokio runtime; polling and flushing run as
    /// background tasks until [`ChunkFileWatcher::stop`].
    pub fn start(&mut self, watch_folder: impl AsRef<Path>, output_path: impl AsRef<Path>) {
        if self.shared.is_some() {
            return;
        }

        let queue_config = QueueConfig {
            max_concurrency: self.config.max_concurrency.max(1),
            max_retry_count: if self.config.enable_auto_retry {
                self.config.max_retry_count
            } else {
                0
            },
            processing_timeout: Some(self.config.processing_timeout),
        };

        let shared = Arc::new(WatcherShared {
            config: self.config.clone(),
            queue: TranscriptionQueue::new(self.backend.clone(), queue_config),
            consolidator: Mutex::new(ResultConsolidator::new()),
            session: Mutex::new(SessionState {
                watch_folder: watch_folder.as_ref().to_path_buf(),
                output_path: output_path.as_ref().to_path_buf(),
                chunk_sequence_counter: 0,
                consecutive_failure_count: 0,
                last_flush_time: None,
            }),
            submitted: Mutex::new(HashMap::new()),
            gate: Mutex::new(StabilityGate::default()),
            callbacks: self.callbacks.clone(),
            running: AtomicBool::new(true),
            dispatch_active: AtomicBool::new(false),
            breaker_reported: AtomicBool::new(false),
            flushed_revision: AtomicU64::new(0),
            flush_lock: Mutex::new(()),
        });

        // Results flow: queue → consolidator → per-chunk and stats callbacks
        let result_shared = shared.clone();
        shared.queue.on_processing_complete(move |result| {
            handle_result(&result_shared, result);
        });

        // Breaker trips surface exactly once as a session-level error
        let progress_shared = shared.clone();
        shared.queue.on_progress(move |_stats| {
            if progress_shared.queue.is_tripped()
                && !progress_shared
                    .breaker_reported
                    .swap(true, Ordering::SeqCst)
            {
                let failures = progress_shared.queue.consecutive_failures();
                lock(&progress_shared.session).consecutive_failure_count = failures;
                progress_shared.fire_error(&ScrivaError::SystemicFailure { failures });
            }
        });

        let poll_shared = shared.clone();
        self.tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_shared.config.file_check_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !poll_shared.running.load(Ordering::SeqCst) {
                    break;
                }
                poll_once(&poll_shared);
            }
        }));

        let flush_shared = shared.clone();
        self.tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(flush_shared.config.text_write_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !flush_shared.running.load(Ordering::SeqCst) {
                    break;
                }
                if flush_shared.config.enable_auto_save {
                    flush_transcript(&flush_shared, false);
                }
            }
        }));

        self.shared = Some(shared);
    }

    /// Halts polling and dispatch. Chunk files and the last-persisted output
    /// file stay on disk. Idempotent.
    pub fn stop(&mut self) {
        if let Some(shared) = &self.shared {
            shared.running.store(false, Ordering::SeqCst);
            shared.queue.stop();
        }
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }

    /// Stops the watcher and releases the queue and timers. Safe to call
    /// multiple times.
    pub fn cleanup(&mut self) {
        self.stop();
        if let Some(shared) = self.shared.take() {
            shared.queue.clear_callbacks();
        }
    }

    /// Writes the current transcript to the output file immediately.
    pub fn flush_now(&self) {
        if let Some(shared) = &self.shared {
            flush_transcript(shared, true);
        }
    }

    /// Snapshot of the session bookkeeping; `None` before `start`.
    pub fn session_state(&self) -> Option<SessionState> {
        self.shared.as_ref().map(|s| lock(&s.session).clone())
    }

    /// Current aggregate counters; zeroes before `start`.
    pub fn stats(&self) -> WatcherStats {
        self.shared
            .as_ref()
            .map(|s| s.stats())
            .unwrap_or_default()
    }

    /// Renders the consolidated transcript so far.
    pub fn transcript_text(&self, format: TextFormat) -> String {
        self.shared
            .as_ref()
            .map(|s| lock(&s.consolidator).transcript().render(format))
            .unwrap_or_default()
    }

    /// True once the queue's circuit breaker has halted dispatch.
    pub fn is_tripped(&self) -> bool {
        self.shared.as_ref().is_some_and(|s| s.queue.is_tripped())
    }
}

impl Drop for ChunkFileWatcher {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// One discovery pass: list the folder, admit stable new files, enqueue
/// them in sequence order, and make sure a dispatch loop is running.
fn poll_once(shared: &Arc<WatcherShared>) {
    let watch_folder = lock(&shared.session).watch_folder.clone();

    let entries = match fs::read_dir(&watch_folder) {
        Ok(entries) => entries,
        Err(e) => {
            // Transient I/O hiccups are common; keep polling next cycle
            shared.fire_error(&ScrivaError::WatchFolderUnreadable {
                path: watch_folder.display().to_string(),
                message: e.to_string(),
            });
            return;
        }
    };

    let mut discovered: Vec<(u64, String, u64)> = Vec::new();
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        let Some((sequence, _millis)) = parse_chunk_file_name(&name) else {
            continue;
        };
        if lock(&shared.submitted).contains_key(&sequence) {
            continue;
        }
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        discovered.push((sequence, name, metadata.len()));
    }
    discovered.sort_unstable_by_key(|(sequence, _, _)| *sequence);

    for (sequence, name, size) in discovered {
        if !lock(&shared.gate).admit(&name, size) {
            continue;
        }
        submit_chunk(shared, &watch_folder, sequence, &name);
    }

    // Re-arm the dispatch loop whenever pending work exists and none is
    // running. Checked on every tick: an item enqueued just as a previous
    // dispatch loop drained would otherwise sit until the next submission.
    if shared.queue.get_stats().pending_items > 0
        && !shared.queue.is_tripped()
        && !shared.dispatch_active.swap(true, Ordering::SeqCst)
    {
        let dispatch_shared = shared.clone();
        tokio::spawn(async move {
            dispatch_shared.queue.start_processing().await;
            dispatch_shared
                .dispatch_active
                .store(false, Ordering::SeqCst);
        });
    }
}

/// Reads one stable chunk file and admits it to the queue.
fn submit_chunk(shared: &Arc<WatcherShared>, watch_folder: &Path, sequence: u64, name: &str) {
    let path = watch_folder.join(name);
    let audio_data = match fs::read(&path) {
        Ok(bytes) => bytes,
        Err(e) => {
            shared.fire_error(&ScrivaError::Io(e));
            lock(&shared.gate).forget(name);
            return;
        }
    };

    let config = &shared.config;
    let slice = config.time_slice.as_secs_f64();
    let overlap = if sequence == 0 {
        0.0
    } else {
        config.overlap.as_secs_f64()
    };
    let start_time = sequence as f64 * slice - overlap;

    let chunk = AudioChunk {
        id: name
            .strip_suffix(&format!(".{}", defaults::CHUNK_EXTENSION))
            .unwrap_or(name)
            .to_string(),
        sequence,
        start_time,
        end_time: (sequence + 1) as f64 * slice,
        audio_data,
        sample_rate: config.sample_rate,
        channels: config.channels,
        overlap_with_previous: overlap,
    };

    lock(&shared.consolidator).register_chunk(sequence, start_time, overlap);

    if shared.queue.enqueue(chunk, 0).is_err() {
        // Already queued under this id; nothing to do
        return;
    }

    lock(&shared.submitted).insert(sequence, name.to_string());
    let mut session = lock(&shared.session);
    session.chunk_sequence_counter = session.chunk_sequence_counter.max(sequence + 1);
}

/// Consolidates one terminal result and fans out the per-chunk callbacks.
fn handle_result(shared: &Arc<WatcherShared>, result: &ChunkResult) {
    lock(&shared.consolidator).accept(result.clone());
    lock(&shared.session).consecutive_failure_count = shared.queue.consecutive_failures();

    let file_name = lock(&shared.submitted)
        .get(&result.sequence)
        .cloned()
        .unwrap_or_default();
    for cb in lock(&shared.callbacks.complete).iter() {
        cb(result, &file_name);
    }
    shared.fire_stats();
}

/// Persists the transcript atomically: write to a sibling temp file, then
/// rename over the output path so readers never observe a partial file.
fn flush_transcript(shared: &Arc<WatcherShared>, force: bool) {
    let _writer = lock(&shared.flush_lock);
    let (revision, text) = {
        let consolidator = lock(&shared.consolidator);
        let transcript = consolidator.transcript();
        (
            transcript.revision(),
            transcript.render(shared.config.text_format),
        )
    };

    if !force && revision == shared.flushed_revision.load(Ordering::SeqCst) {
        return;
    }

    let output_path = lock(&shared.session).output_path.clone();
    let tmp_name = match output_path.file_name() {
        Some(name) => format!("{}.tmp", name.to_string_lossy()),
        None => return,
    };
    let tmp_path = output_path.with_file_name(tmp_name);

    let write_result = fs::write(&tmp_path, text.as_bytes())
        .and_then(|_| fs::rename(&tmp_path, &output_path));
    match write_result {
        Ok(()) => {
            shared.flushed_revision.store(revision, Ordering::SeqCst);
            lock(&shared.session).last_flush_time = Some(Instant::now());
        }
        Err(e) => {
            shared.fire_error(&ScrivaError::OutputUnwritable {
                path: output_path.display().to_string(),
                message: e.to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBackend;
    use crate::chunk::chunk_file_name;

    fn fast_config() -> WatcherConfig {
        WatcherConfig {
            file_check_interval: Duration::from_millis(10),
            text_write_interval: Duration::from_millis(20),
            processing_timeout: Duration::from_secs(5),
            time_slice: Duration::from_secs(20),
            // Shorter than the mock backend's segments, so overlap trimming
            // never swallows them
            overlap: Duration::from_millis(100),
            ..WatcherConfig::default()
        }
    }

    fn write_chunk(dir: &Path, sequence: u64) -> String {
        let name = chunk_file_name(sequence, 1_700_000_000_000 + sequence);
        fs::write(dir.join(&name), vec![sequence as u8; 32]).unwrap();
        name
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..400 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not met within timeout");
    }

    #[test]
    fn stability_gate_requires_two_identical_sightings() {
        let mut gate = StabilityGate::default();
        assert!(!gate.admit("chunk_00000_1.webm", 100));
        assert!(gate.admit("chunk_00000_1.webm", 100));

        // A growing file resets the gate
        assert!(!gate.admit("chunk_00001_2.webm", 100));
        assert!(!gate.admit("chunk_00001_2.webm", 200));
        assert!(gate.admit("chunk_00001_2.webm", 200));
    }

    #[test]
    fn stability_gate_forget_restarts_observation() {
        let mut gate = StabilityGate::default();
        assert!(!gate.admit("chunk_00000_1.webm", 50));
        gate.forget("chunk_00000_1.webm");
        assert!(!gate.admit("chunk_00000_1.webm", 50));
        assert!(gate.admit("chunk_00000_1.webm", 50));
    }

    #[tokio::test]
    async fn watcher_transcribes_discovered_chunks_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let watch = dir.path().join("temp_meeting");
        fs::create_dir(&watch).unwrap();
        let output = dir.path().join("meeting.txt");

        write_chunk(&watch, 0);
        write_chunk(&watch, 1);

        let backend = Arc::new(MockBackend::new("mock").with_text("spoken words"));
        let mut watcher = ChunkFileWatcher::new(backend, fast_config());
        watcher.start(&watch, &output);

        wait_until(|| watcher.stats().processed_chunks == 2).await;

        let state = watcher.session_state().unwrap();
        assert_eq!(state.chunk_sequence_counter, 2);
        assert_eq!(watcher.stats().total_chunks, 2);
        assert_eq!(watcher.stats().failed_chunks, 0);

        // Auto-save flushes the transcript to disk once both lines landed
        wait_until(|| {
            fs::read_to_string(&output)
                .map(|text| text.lines().count() == 2)
                .unwrap_or(false)
        })
        .await;
        let text = fs::read_to_string(&output).unwrap();
        assert_eq!(text, "spoken words\nspoken words\n");

        watcher.stop();
        // Chunk files are left intact after stop()
        assert_eq!(fs::read_dir(&watch).unwrap().count(), 2);
    }

    #[tokio::test]
    async fn watcher_discovers_files_added_while_running() {
        let dir = tempfile::tempdir().unwrap();
        let watch = dir.path().join("temp_live");
        fs::create_dir(&watch).unwrap();
        let output = dir.path().join("live.txt");

        let backend = Arc::new(MockBackend::new("mock").with_text("later"));
        let mut watcher = ChunkFileWatcher::new(backend, fast_config());
        watcher.start(&watch, &output);

        write_chunk(&watch, 0);
        wait_until(|| watcher.stats().processed_chunks == 1).await;

        write_chunk(&watch, 1);
        wait_until(|| watcher.stats().processed_chunks == 2).await;

        watcher.cleanup();
    }

    #[tokio::test]
    async fn per_chunk_callback_carries_filename_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let watch = dir.path().join("temp_cb");
        fs::create_dir(&watch).unwrap();

        let name = write_chunk(&watch, 0);

        let backend = Arc::new(MockBackend::new("mock"));
        let mut watcher = ChunkFileWatcher::new(backend, fast_config());

        let seen: Arc<Mutex<Vec<(u64, String)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        watcher.on_transcription_complete(move |result, file_name| {
            lock(&sink).push((result.sequence, file_name.to_string()));
        });

        watcher.start(&watch, dir.path().join("cb.txt"));
        wait_until(|| !lock(&seen).is_empty()).await;

        let events = lock(&seen).clone();
        assert_eq!(events, vec![(0, name)]);
        watcher.cleanup();
    }

    #[tokio::test]
    async fn unreadable_watch_folder_reports_error_and_recovers() {
        let dir = tempfile::tempdir().unwrap();
        let watch = dir.path().join("temp_missing");
        let output = dir.path().join("out.txt");

        let backend = Arc::new(MockBackend::new("mock").with_text("recovered"));
        let mut watcher = ChunkFileWatcher::new(backend, fast_config());

        let errors: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = errors.clone();
        watcher.on_error(move |error| {
            lock(&sink).push(error.to_string());
        });

        // Watch folder does not exist yet
        watcher.start(&watch, &output);
        wait_until(|| !lock(&errors).is_empty()).await;
        assert!(lock(&errors)[0].contains("Cannot read watch folder"));

        // The folder appearing later is picked up on a subsequent poll
        fs::create_dir(&watch).unwrap();
        write_chunk(&watch, 0);
        wait_until(|| watcher.stats().processed_chunks == 1).await;

        watcher.cleanup();
    }

    #[tokio::test]
    async fn failed_chunks_surface_in_stats_and_transcript_has_gap() {
        let dir = tempfile::tempdir().unwrap();
        let watch = dir.path().join("temp_fail");
        fs::create_dir(&watch).unwrap();

        write_chunk(&watch, 0);

        let backend = Arc::new(
            MockBackend::new("dead")
                .with_failure()
                .with_failure_message("no engine"),
        );
        let mut config = fast_config();
        config.max_retry_count = 1;
        let mut watcher = ChunkFileWatcher::new(backend, config);
        watcher.start(&watch, dir.path().join("fail.txt"));

        wait_until(|| watcher.stats().failed_chunks == 1).await;
        assert_eq!(watcher.stats().processed_chunks, 0);
        assert!(watcher.transcript_text(TextFormat::Plain).is_empty());
        watcher.cleanup();
    }

    #[tokio::test]
    async fn breaker_trip_is_reported_as_systemic_failure() {
        let dir = tempfile::tempdir().unwrap();
        let watch = dir.path().join("temp_breaker");
        fs::create_dir(&watch).unwrap();

        for sequence in 0..8 {
            write_chunk(&watch, sequence);
        }

        let backend = Arc::new(MockBackend::new("dead").with_failure());
        let mut config = fast_config();
        config.enable_auto_retry = false;
        config.max_concurrency = 1;
        let mut watcher = ChunkFileWatcher::new(backend, config);

        let errors: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = errors.clone();
        watcher.on_error(move |error| {
            lock(&sink).push(error.to_string());
        });

        watcher.start(&watch, dir.path().join("breaker.txt"));
        wait_until(|| watcher.is_tripped()).await;

        wait_until(|| {
            lock(&errors)
                .iter()
                .any(|e| e.contains("consecutive failures"))
        })
        .await;

        // Strictly fewer chunks reach a terminal state than were written
        assert!(watcher.stats().failed_chunks < 8);
        watcher.cleanup();
    }

    #[tokio::test]
    async fn detailed_format_flushes_timestamped_lines() {
        let dir = tempfile::tempdir().unwrap();
        let watch = dir.path().join("temp_detail");
        fs::create_dir(&watch).unwrap();
        let output = dir.path().join("detail.txt");

        write_chunk(&watch, 0);

        let backend = Arc::new(MockBackend::new("mock").with_text("stamped"));
        let mut config = fast_config();
        config.text_format = TextFormat::Detailed;
        let mut watcher = ChunkFileWatcher::new(backend, config);
        watcher.start(&watch, &output);

        wait_until(|| output.exists()).await;
        let text = fs::read_to_string(&output).unwrap();
        assert!(text.starts_with("[00:00:00.000 --> "));
        assert!(text.contains("stamped"));
        watcher.cleanup();
    }

    #[tokio::test]
    async fn flush_now_writes_even_without_auto_save() {
        let dir = tempfile::tempdir().unwrap();
        let watch = dir.path().join("temp_manual");
        fs::create_dir(&watch).unwrap();
        let output = dir.path().join("manual.txt");

        write_chunk(&watch, 0);

        let backend = Arc::new(MockBackend::new("mock").with_text("manual save"));
        let mut config = fast_config();
        config.enable_auto_save = false;
        let mut watcher = ChunkFileWatcher::new(backend, config);
        watcher.start(&watch, &output);

        wait_until(|| watcher.stats().processed_chunks == 1).await;
        assert!(!output.exists());

        watcher.flush_now();
        assert_eq!(fs::read_to_string(&output).unwrap(), "manual save\n");
        watcher.cleanup();
    }

    #[tokio::test]
    async fn stop_and_cleanup_are_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let watch = dir.path().join("temp_idem");
        fs::create_dir(&watch).unwrap();

        let backend = Arc::new(MockBackend::new("mock"));
        let mut watcher = ChunkFileWatcher::new(backend, fast_config());
        watcher.start(&watch, dir.path().join("idem.txt"));

        watcher.stop();
        watcher.stop();
        watcher.cleanup();
        watcher.cleanup();
        assert!(watcher.session_state().is_none());
    }
}
