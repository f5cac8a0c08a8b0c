//! Slice-driven chunk capture.
//!
//! Accumulates blocks from a [`BlockSource`] and, on every time-slice
//! boundary, materializes one container-repaired chunk file in the session
//! temp directory. The growing recording is kept separately as an
//! append-only log, so a crash mid-session still leaves a playable file.
//!
//! Capture runs on its own thread and hands chunks downstream purely through
//! the filesystem plus a callback — a slow transcription backend can never
//! stall it.

pub mod source;

pub use source::{BlockSource, MockBlockSource, ReaderBlockSource};

use crate::chunk::{AudioChunk, chunk_file_name, temp_dir_for};
use crate::container::ContainerRepair;
use crate::defaults;
use crate::error::{Result, ScrivaError};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Capture timing and track parameters.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Duration of one chunk slice.
    pub time_slice: Duration,
    /// How much earlier than the slice boundary the flush tick fires.
    pub tick_margin: Duration,
    /// Audio duplicated from the end of each slice into the next chunk.
    pub overlap: Duration,
    /// Cadence of block delivery from the source.
    pub block_interval: Duration,
    /// Idle wait between polls when no block is available.
    pub poll_interval: Duration,
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            time_slice: defaults::TIME_SLICE,
            tick_margin: defaults::TICK_MARGIN,
            overlap: defaults::CHUNK_OVERLAP,
            block_interval: defaults::BLOCK_INTERVAL,
            poll_interval: Duration::from_millis(10),
            sample_rate: defaults::SAMPLE_RATE,
            channels: defaults::CHANNELS,
        }
    }
}

impl CaptureConfig {
    /// Effective tick interval: slice minus margin, never below the margin
    /// itself for degenerate configurations.
    fn tick_interval(&self) -> Duration {
        self.time_slice
            .checked_sub(self.tick_margin)
            .filter(|d| !d.is_zero())
            .unwrap_or(self.time_slice)
    }

    /// Number of trailing blocks carried into the next chunk as overlap.
    fn overlap_block_count(&self) -> usize {
        if self.block_interval.is_zero() {
            return 0;
        }
        (self.overlap.as_secs_f64() / self.block_interval.as_secs_f64()).ceil() as usize
    }
}

type ChunkCallback = Box<dyn Fn(&AudioChunk) + Send>;
type ErrorCallback = Box<dyn Fn(&ScrivaError) + Send>;

/// Captures the block stream into chunk files plus a cumulative recording.
pub struct ChunkCapture<S: BlockSource + 'static> {
    source: S,
    config: CaptureConfig,
    recording_path: PathBuf,
    on_chunk_ready: Option<ChunkCallback>,
    on_error: Option<ErrorCallback>,
    chunk_tx: Option<crossbeam_channel::Sender<AudioChunk>>,
}

impl<S: BlockSource + 'static> ChunkCapture<S> {
    pub fn new(source: S, config: CaptureConfig, recording_path: impl AsRef<Path>) -> Self {
        Self {
            source,
            config,
            recording_path: recording_path.as_ref().to_path_buf(),
            on_chunk_ready: None,
            on_error: None,
            chunk_tx: None,
        }
    }

    /// Registers the chunk callback, invoked once per materialized chunk.
    pub fn on_chunk_ready(&mut self, cb: impl Fn(&AudioChunk) + Send + 'static) {
        self.on_chunk_ready = Some(Box::new(cb));
    }

    /// Returns a channel receiving every materialized chunk, as an
    /// alternative to the callback. The channel is unbounded so a slow
    /// consumer cannot stall the capture thread.
    pub fn chunk_stream(&mut self) -> crossbeam_channel::Receiver<AudioChunk> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.chunk_tx = Some(tx);
        rx
    }

    /// Registers the error callback for non-fatal capture errors.
    pub fn on_error(&mut self, cb: impl Fn(&ScrivaError) + Send + 'static) {
        self.on_error = Some(Box::new(cb));
    }

    /// Starts the capture thread.
    ///
    /// Creates the session temp directory and truncates the recording log,
    /// then drives the source until [`CaptureHandle::stop`] is called or the
    /// source reports exhaustion. Remaining buffered blocks are flushed as a
    /// final chunk either way.
    pub fn start(self) -> Result<CaptureHandle> {
        let temp_dir = temp_dir_for(&self.recording_path);
        fs::create_dir_all(&temp_dir)?;
        if let Some(parent) = self.recording_path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        // Fresh append-only log for this session
        fs::write(&self.recording_path, b"")?;

        let running = Arc::new(AtomicBool::new(true));
        let worker = CaptureWorker {
            source: self.source,
            config: self.config,
            recording_path: self.recording_path,
            temp_dir: temp_dir.clone(),
            on_chunk_ready: self.on_chunk_ready,
            on_error: self.on_error,
            chunk_tx: self.chunk_tx,
            running: running.clone(),
        };

        let thread = thread::Builder::new()
            .name("scriva-capture".to_string())
            .spawn(move || worker.run())
            .map_err(|e| ScrivaError::Capture {
                message: format!("failed to spawn capture thread: {}", e),
            })?;

        Ok(CaptureHandle {
            running,
            temp_dir,
            thread: Some(thread),
        })
    }
}

/// Handle to a running capture thread.
pub struct CaptureHandle {
    running: Arc<AtomicBool>,
    temp_dir: PathBuf,
    thread: Option<JoinHandle<()>>,
}

impl CaptureHandle {
    /// Session temp directory chunk files are written into.
    pub fn temp_dir(&self) -> &PathBuf {
        &self.temp_dir
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Signals shutdown and waits for the final chunk flush.
    pub fn stop(mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }

    /// Waits for the capture thread to finish on its own (source exhausted).
    pub fn join(mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

struct CaptureWorker<S: BlockSource> {
    source: S,
    config: CaptureConfig,
    recording_path: PathBuf,
    temp_dir: PathBuf,
    on_chunk_ready: Option<ChunkCallback>,
    on_error: Option<ErrorCallback>,
    chunk_tx: Option<crossbeam_channel::Sender<AudioChunk>>,
    running: Arc<AtomicBool>,
}

impl<S: BlockSource> CaptureWorker<S> {
    fn run(mut self) {
        if let Err(e) = self.source.start() {
            self.report(&e);
            return;
        }

        let repair = ContainerRepair::new(self.config.sample_rate, self.config.channels);
        let block_secs = self.config.block_interval.as_secs_f64();
        let tick = self.config.tick_interval();

        let mut recording = match OpenOptions::new().append(true).open(&self.recording_path) {
            Ok(file) => file,
            Err(e) => {
                self.report(&e.into());
                return;
            }
        };

        let mut sequence: u64 = 0;
        let mut delta_blocks: Vec<Vec<u8>> = Vec::new();
        let mut overlap_blocks: Vec<Vec<u8>> = Vec::new();
        // Stream position in seconds, counted over delta blocks only
        let mut stream_pos = 0.0f64;
        let mut slice_deadline = Instant::now() + tick;

        loop {
            if !self.running.load(Ordering::SeqCst) {
                break;
            }

            match self.source.poll_block() {
                Ok(Some(block)) => {
                    if let Err(e) = recording.write_all(&block) {
                        self.report(&e.into());
                    }
                    delta_blocks.push(block);
                }
                Ok(None) if self.source.is_exhausted() => break,
                Ok(None) => thread::sleep(self.config.poll_interval),
                Err(e) => {
                    self.report(&e);
                    break;
                }
            }

            if Instant::now() >= slice_deadline {
                if !delta_blocks.is_empty() {
                    self.cut_chunk(
                        &repair,
                        &mut sequence,
                        &mut delta_blocks,
                        &mut overlap_blocks,
                        &mut stream_pos,
                        block_secs,
                    );
                }
                slice_deadline += self.config.time_slice;
            }
        }

        // Final flush: whatever is buffered becomes the last chunk
        if !delta_blocks.is_empty() {
            self.cut_chunk(
                &repair,
                &mut sequence,
                &mut delta_blocks,
                &mut overlap_blocks,
                &mut stream_pos,
                block_secs,
            );
        }
        if let Err(e) = recording.flush() {
            self.report(&e.into());
        }
        if let Err(e) = self.source.stop() {
            self.report(&e);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn cut_chunk(
        &self,
        repair: &ContainerRepair,
        sequence: &mut u64,
        delta_blocks: &mut Vec<Vec<u8>>,
        overlap_blocks: &mut Vec<Vec<u8>>,
        stream_pos: &mut f64,
        block_secs: f64,
    ) {
        let overlap_secs = overlap_blocks.len() as f64 * block_secs;
        let slice_start = *stream_pos;
        *stream_pos += delta_blocks.len() as f64 * block_secs;

        let payload: Vec<u8> = overlap_blocks
            .iter()
            .chain(delta_blocks.iter())
            .flat_map(|b| b.iter().copied())
            .collect();

        let repaired = match repair.repair(&payload, *sequence == 0) {
            Ok(bytes) => bytes,
            Err(e) => {
                // Container errors are fatal to this one chunk only
                self.report(&e);
                delta_blocks.clear();
                return;
            }
        };

        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let file_name = chunk_file_name(*sequence, millis);
        let path = self.temp_dir.join(&file_name);
        if let Err(e) = fs::write(&path, &repaired) {
            self.report(&e.into());
            delta_blocks.clear();
            return;
        }

        let chunk = AudioChunk {
            id: file_name
                .trim_end_matches(&format!(".{}", defaults::CHUNK_EXTENSION))
                .to_string(),
            sequence: *sequence,
            start_time: slice_start - overlap_secs,
            end_time: *stream_pos,
            audio_data: repaired,
            sample_rate: self.config.sample_rate,
            channels: self.config.channels,
            overlap_with_previous: overlap_secs,
        };
        if let Some(cb) = &self.on_chunk_ready {
            cb(&chunk);
        }
        if let Some(tx) = &self.chunk_tx {
            tx.send(chunk).ok();
        }

        // Carry the slice tail into the next chunk
        let carry = self.config.overlap_block_count().min(delta_blocks.len());
        *overlap_blocks = delta_blocks[delta_blocks.len() - carry..].to_vec();
        delta_blocks.clear();
        *sequence += 1;
    }

    fn report(&self, error: &ScrivaError) {
        if let Some(cb) = &self.on_error {
            cb(error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::parse_chunk_file_name;
    use crossbeam_channel::unbounded;

    fn fast_config() -> CaptureConfig {
        CaptureConfig {
            time_slice: Duration::from_millis(40),
            tick_margin: Duration::from_millis(10),
            overlap: Duration::from_millis(5),
            block_interval: Duration::from_millis(5),
            poll_interval: Duration::from_millis(1),
            sample_rate: 48000,
            channels: 1,
        }
    }

    /// Slice far longer than any test run: only the final flush cuts a chunk.
    fn single_chunk_config() -> CaptureConfig {
        CaptureConfig {
            time_slice: Duration::from_secs(60),
            ..fast_config()
        }
    }

    fn block(tag: u8, len: usize) -> Vec<u8> {
        vec![tag; len]
    }

    #[test]
    fn captures_exhausted_source_into_final_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let recording = dir.path().join("meeting.webm");

        let source = MockBlockSource::new().with_blocks(vec![block(1, 8), block(2, 8)]);
        let mut capture = ChunkCapture::new(source, single_chunk_config(), &recording);
        let rx = capture.chunk_stream();

        let handle = capture.start().unwrap();
        handle.join();

        let chunks: Vec<AudioChunk> = rx.try_iter().collect();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].sequence, 0);
        // First chunk passes through with the source's own framing
        assert_eq!(chunks[0].audio_data, [block(1, 8), block(2, 8)].concat());
    }

    #[test]
    fn recording_log_equals_concatenated_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let recording = dir.path().join("meeting.webm");

        let blocks = vec![block(1, 10), block(2, 20), block(3, 30)];
        let source = MockBlockSource::new().with_blocks(blocks.clone());
        let capture = ChunkCapture::new(source, fast_config(), &recording);
        capture.start().unwrap().join();

        let written = fs::read(&recording).unwrap();
        assert_eq!(written, blocks.concat());
    }

    #[test]
    fn slow_source_produces_multiple_sequential_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let recording = dir.path().join("talk.webm");

        // 20 blocks at ~5ms each against a 40ms slice: several slices fire
        let blocks: Vec<Vec<u8>> = (0..20).map(|i| block(i as u8, 16)).collect();
        let source = MockBlockSource::new()
            .with_blocks(blocks)
            .with_block_delay(Duration::from_millis(5));
        let mut capture = ChunkCapture::new(source, fast_config(), &recording);
        let rx = capture.chunk_stream();
        capture.start().unwrap().join();

        let chunks: Vec<AudioChunk> = rx.try_iter().collect();
        assert!(chunks.len() >= 2, "expected several chunks, got {}", chunks.len());

        // Sequences are gapless and start at 0
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.sequence, i as u64);
        }

        // The first chunk is passthrough; later chunks carry the synthesized
        // header (EBML magic) and declare their overlap
        assert_eq!(chunks[0].overlap_with_previous, 0.0);
        for chunk in &chunks[1..] {
            assert_eq!(&chunk.audio_data[..4], &[0x1A, 0x45, 0xDF, 0xA3]);
            assert!(chunk.overlap_with_previous > 0.0);
            assert!(chunk.start_time < chunk.end_time);
        }

        // Chunk files landed in the temp directory with matching names
        let temp = temp_dir_for(&recording);
        let mut found: Vec<u64> = fs::read_dir(&temp)
            .unwrap()
            .filter_map(|e| parse_chunk_file_name(&e.unwrap().file_name().to_string_lossy()))
            .map(|(seq, _)| seq)
            .collect();
        found.sort_unstable();
        assert_eq!(found.len(), chunks.len());
        assert_eq!(found, (0..chunks.len() as u64).collect::<Vec<_>>());
    }

    #[test]
    fn chunk_files_are_readable_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let recording = dir.path().join("note.webm");

        let source = MockBlockSource::new().with_blocks(vec![block(9, 64)]);
        let capture = ChunkCapture::new(source, single_chunk_config(), &recording);
        let handle = capture.start().unwrap();
        let temp = handle.temp_dir().clone();
        handle.join();

        let entries: Vec<_> = fs::read_dir(&temp).unwrap().collect();
        assert_eq!(entries.len(), 1);
        let bytes = fs::read(entries[0].as_ref().unwrap().path()).unwrap();
        assert_eq!(bytes, block(9, 64));
    }

    #[test]
    fn stop_flushes_buffered_blocks() {
        // Live-style source: never exhausts, runs dry after four blocks
        struct DripSource {
            blocks: Vec<Vec<u8>>,
            position: usize,
        }
        impl BlockSource for DripSource {
            fn start(&mut self) -> crate::error::Result<()> {
                Ok(())
            }
            fn stop(&mut self) -> crate::error::Result<()> {
                Ok(())
            }
            fn poll_block(&mut self) -> crate::error::Result<Option<Vec<u8>>> {
                if self.position >= self.blocks.len() {
                    return Ok(None);
                }
                let block = self.blocks[self.position].clone();
                self.position += 1;
                Ok(Some(block))
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let recording = dir.path().join("meeting.webm");

        let source = DripSource {
            blocks: (0..4).map(|i| block(i as u8, 8)).collect(),
            position: 0,
        };
        // Long slice: nothing flushes until stop()
        let mut config = fast_config();
        config.time_slice = Duration::from_secs(60);
        config.tick_margin = Duration::from_millis(500);

        let mut capture = ChunkCapture::new(source, config, &recording);
        let rx = capture.chunk_stream();

        let handle = capture.start().unwrap();
        // Give the worker time to drain the source, then stop
        thread::sleep(Duration::from_millis(50));
        handle.stop();

        let sequences: Vec<u64> = rx.try_iter().map(|chunk| chunk.sequence).collect();
        assert_eq!(sequences, vec![0]);
    }

    #[test]
    fn start_failure_is_reported_not_swallowed() {
        let dir = tempfile::tempdir().unwrap();
        let recording = dir.path().join("meeting.webm");

        let source = MockBlockSource::new().with_start_failure();
        let mut capture = ChunkCapture::new(source, fast_config(), &recording);

        let (tx, rx) = unbounded();
        capture.on_error(move |error| {
            let _ = tx.send(error.to_string());
        });
        capture.start().unwrap().join();

        let errors: Vec<String> = rx.try_iter().collect();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("Block source failed"));
    }

    #[test]
    fn overlap_block_count_rounds_up() {
        let config = CaptureConfig {
            overlap: Duration::from_millis(1100),
            block_interval: Duration::from_millis(500),
            ..CaptureConfig::default()
        };
        assert_eq!(config.overlap_block_count(), 3);
    }

    #[test]
    fn tick_interval_stays_positive_for_tiny_slices() {
        let config = CaptureConfig {
            time_slice: Duration::from_millis(10),
            tick_margin: Duration::from_millis(20),
            ..CaptureConfig::default()
        };
        assert_eq!(config.tick_interval(), Duration::from_millis(10));
    }
}
