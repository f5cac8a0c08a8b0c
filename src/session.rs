//! Recording session composition root.
//!
//! Wires a block source into chunk capture, the file watcher, and the
//! transcription backend. Capture and transcription stay decoupled through
//! the filesystem: a slow backend never stalls the recording side.

use crate::backend::TranscriptionBackend;
use crate::capture::{BlockSource, CaptureConfig, CaptureHandle, ChunkCapture};
use crate::chunk::{parse_chunk_file_name, temp_dir_for};
use crate::error::{Result, ScrivaError};
use crate::watcher::{ChunkFileWatcher, WatcherConfig, WatcherStats};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Complete session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub capture: CaptureConfig,
    pub watcher: WatcherConfig,
    /// Cumulative recording file; the temp chunk directory is derived from
    /// its basename.
    pub recording_path: PathBuf,
    /// Consolidated transcript output file.
    pub transcript_path: PathBuf,
}

impl SessionConfig {
    /// Builds a configuration around a recording path, with the transcript
    /// written next to it as `<basename>.txt`.
    pub fn new(recording_path: impl AsRef<Path>) -> Self {
        let recording_path = recording_path.as_ref().to_path_buf();
        let transcript_path = recording_path.with_extension("txt");
        Self {
            capture: CaptureConfig::default(),
            watcher: WatcherConfig::default(),
            recording_path,
            transcript_path,
        }
    }

    /// Watcher config with the timing fields mirrored from capture, so the
    /// timeline math downstream matches what was recorded.
    fn effective_watcher_config(&self) -> WatcherConfig {
        WatcherConfig {
            time_slice: self.capture.time_slice,
            overlap: self.capture.overlap,
            sample_rate: self.capture.sample_rate,
            channels: self.capture.channels,
            ..self.watcher.clone()
        }
    }
}

/// Lifecycle notifications for the UI layer, delivered through direct
/// callback registration only.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    ChunkRecorded {
        sequence: u64,
        bytes: usize,
    },
    ChunkTranscribed {
        sequence: u64,
        file_name: String,
        text: String,
    },
    ChunkFailed {
        sequence: u64,
        error: String,
    },
    StatsUpdated(WatcherStats),
    BreakerTripped {
        failures: u32,
    },
    SessionError {
        message: String,
    },
}

type EventCallback = Box<dyn Fn(&SessionEvent) + Send + Sync>;

#[derive(Default)]
struct EventSink {
    listeners: Mutex<Vec<EventCallback>>,
}

impl EventSink {
    fn fire(&self, event: &SessionEvent) {
        for cb in lock(&self.listeners).iter() {
            cb(event);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A configured recording session, ready to start.
pub struct RecordingSession {
    backend: Arc<dyn TranscriptionBackend>,
    config: SessionConfig,
    events: Arc<EventSink>,
}

impl RecordingSession {
    pub fn new(backend: Arc<dyn TranscriptionBackend>, config: SessionConfig) -> Self {
        Self {
            backend,
            config,
            events: Arc::new(EventSink::default()),
        }
    }

    /// Registers a session event listener. Must be called before `start`.
    pub fn on_event(&self, cb: impl Fn(&SessionEvent) + Send + Sync + 'static) {
        lock(&self.events.listeners).push(Box::new(cb));
    }

    /// Starts capture and watching. Must be called within a tokio runtime.
    pub fn start<S: BlockSource + 'static>(&self, source: S) -> Result<RunningSession> {
        let temp_dir = temp_dir_for(&self.config.recording_path);

        let mut capture = ChunkCapture::new(
            source,
            self.config.capture.clone(),
            &self.config.recording_path,
        );
        let events = self.events.clone();
        capture.on_chunk_ready(move |chunk| {
            events.fire(&SessionEvent::ChunkRecorded {
                sequence: chunk.sequence,
                bytes: chunk.audio_data.len(),
            });
        });
        let events = self.events.clone();
        capture.on_error(move |error| {
            events.fire(&SessionEvent::SessionError {
                message: error.to_string(),
            });
        });

        let mut watcher =
            ChunkFileWatcher::new(self.backend.clone(), self.config.effective_watcher_config());
        let events = self.events.clone();
        watcher.on_transcription_complete(move |result, file_name| {
            let event = if result.is_completed() {
                SessionEvent::ChunkTranscribed {
                    sequence: result.sequence,
                    file_name: file_name.to_string(),
                    text: result
                        .segments
                        .iter()
                        .map(|s| s.text.as_str())
                        .collect::<Vec<_>>()
                        .join(" "),
                }
            } else {
                SessionEvent::ChunkFailed {
                    sequence: result.sequence,
                    error: result.error.clone().unwrap_or_default(),
                }
            };
            events.fire(&event);
        });
        let events = self.events.clone();
        watcher.on_stats_update(move |stats| {
            events.fire(&SessionEvent::StatsUpdated(*stats));
        });
        let events = self.events.clone();
        watcher.on_error(move |error| {
            let event = match error {
                ScrivaError::SystemicFailure { failures } => SessionEvent::BreakerTripped {
                    failures: *failures,
                },
                other => SessionEvent::SessionError {
                    message: other.to_string(),
                },
            };
            events.fire(&event);
        });

        let capture_handle = capture.start()?;
        watcher.start(&temp_dir, &self.config.transcript_path);

        Ok(RunningSession {
            capture: Some(capture_handle),
            watcher,
            temp_dir,
        })
    }

    /// Runs a finite source to completion: captures until the source is
    /// exhausted, waits for every discovered chunk to reach a terminal
    /// state, flushes the transcript, and returns the final counters.
    pub async fn run<S: BlockSource + 'static>(&self, source: S) -> Result<WatcherStats> {
        let mut running = self.start(source)?;
        running.wait_for_capture().await;
        running.finish().await
    }
}

/// Handle to a live session.
pub struct RunningSession {
    capture: Option<CaptureHandle>,
    watcher: ChunkFileWatcher,
    temp_dir: PathBuf,
}

impl RunningSession {
    pub fn watcher(&self) -> &ChunkFileWatcher {
        &self.watcher
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    /// Waits for the capture thread to end on its own (source exhausted).
    pub async fn wait_for_capture(&mut self) {
        if let Some(handle) = self.capture.take() {
            let _ = tokio::task::spawn_blocking(move || handle.join()).await;
        }
    }

    /// Stops capture (flushing the final chunk), drains transcription, and
    /// writes the final transcript. Consumes the session.
    pub async fn finish(mut self) -> Result<WatcherStats> {
        if let Some(handle) = self.capture.take() {
            let _ = tokio::task::spawn_blocking(move || handle.stop()).await;
        }

        // Wait until everything on disk has been submitted and resolved,
        // unless the breaker halts the session first.
        loop {
            if self.watcher.is_tripped() {
                break;
            }
            let on_disk = count_chunk_files(&self.temp_dir);
            let stats = self.watcher.stats();
            if stats.total_chunks >= on_disk
                && stats.processed_chunks + stats.failed_chunks == stats.total_chunks
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        self.watcher.flush_now();
        let stats = self.watcher.stats();
        self.watcher.cleanup();
        Ok(stats)
    }
}

fn count_chunk_files(dir: &Path) -> usize {
    fs::read_dir(dir)
        .map(|entries| {
            entries
                .flatten()
                .filter(|e| parse_chunk_file_name(&e.file_name().to_string_lossy()).is_some())
                .count()
        })
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBackend;
    use crate::capture::MockBlockSource;

    fn fast_session_config(dir: &Path) -> SessionConfig {
        let mut config = SessionConfig::new(dir.join("meeting.webm"));
        config.capture.time_slice = Duration::from_millis(40);
        config.capture.tick_margin = Duration::from_millis(10);
        config.capture.overlap = Duration::from_millis(5);
        config.capture.block_interval = Duration::from_millis(5);
        config.capture.poll_interval = Duration::from_millis(1);
        config.watcher.file_check_interval = Duration::from_millis(10);
        config.watcher.text_write_interval = Duration::from_millis(20);
        config
    }

    #[tokio::test]
    async fn session_runs_pipe_source_to_completed_transcript() {
        let dir = tempfile::tempdir().unwrap();
        let config = fast_session_config(dir.path());
        let transcript_path = config.transcript_path.clone();
        let recording_path = config.recording_path.clone();

        let backend = Arc::new(MockBackend::new("mock").with_text("all done"));
        let session = RecordingSession::new(backend, config);

        let events: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        session.on_event(move |event| {
            lock(&sink).push(match event {
                SessionEvent::ChunkRecorded { .. } => "recorded".to_string(),
                SessionEvent::ChunkTranscribed { .. } => "transcribed".to_string(),
                SessionEvent::ChunkFailed { .. } => "failed".to_string(),
                SessionEvent::StatsUpdated(_) => "stats".to_string(),
                SessionEvent::BreakerTripped { .. } => "breaker".to_string(),
                SessionEvent::SessionError { .. } => "error".to_string(),
            });
        });

        let source =
            MockBlockSource::new().with_blocks((0..6).map(|i| vec![i as u8; 24]).collect());
        let stats = session.run(source).await.unwrap();

        assert!(stats.total_chunks >= 1);
        assert_eq!(stats.processed_chunks, stats.total_chunks);
        assert_eq!(stats.failed_chunks, 0);

        // Final transcript and cumulative recording are on disk
        let text = fs::read_to_string(&transcript_path).unwrap();
        assert!(text.contains("all done"));
        let recording = fs::read(&recording_path).unwrap();
        assert_eq!(recording.len(), 6 * 24);

        let seen = lock(&events).clone();
        assert!(seen.contains(&"recorded".to_string()));
        assert!(seen.contains(&"transcribed".to_string()));
        assert!(!seen.contains(&"failed".to_string()));
    }

    #[tokio::test]
    async fn session_survives_failing_backend_with_gap() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = fast_session_config(dir.path());
        config.watcher.max_retry_count = 1;

        let backend = Arc::new(MockBackend::new("dead").with_failure());
        let session = RecordingSession::new(backend, config);

        let source = MockBlockSource::new().with_blocks(vec![vec![1u8; 24]]);
        let stats = session.run(source).await.unwrap();

        assert_eq!(stats.total_chunks, 1);
        assert_eq!(stats.failed_chunks, 1);
        assert_eq!(stats.processed_chunks, 0);
    }

    #[tokio::test]
    async fn empty_source_yields_empty_session() {
        let dir = tempfile::tempdir().unwrap();
        let config = fast_session_config(dir.path());

        let backend = Arc::new(MockBackend::new("mock"));
        let session = RecordingSession::new(backend, config);

        let stats = session.run(MockBlockSource::new()).await.unwrap();
        assert_eq!(stats.total_chunks, 0);
    }
}
