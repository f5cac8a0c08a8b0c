//! Default configuration constants for scriva.
//!
//! Shared between the capture, watcher and queue configuration types so the
//! tunables stay consistent across the pipeline.

use std::time::Duration;

/// Default recording time slice.
///
/// Every slice boundary materializes one chunk file. 20 seconds keeps chunks
/// large enough for the recognizer to have context and small enough that the
/// live transcript stays close to real time.
pub const TIME_SLICE: Duration = Duration::from_secs(20);

/// Margin subtracted from the time slice for the internal capture tick.
///
/// The tick fires slightly before the slice boundary so the chunk file is
/// flushed with headroom instead of racing the next block delivery.
pub const TICK_MARGIN: Duration = Duration::from_millis(500);

/// Default audio duplicated between consecutive chunks.
///
/// Words spoken across a slice boundary appear in both chunks; consolidation
/// trims the duplicate seconds from the later one.
pub const CHUNK_OVERLAP: Duration = Duration::from_secs(1);

/// Cadence at which the capture primitive delivers compressed blocks.
pub const BLOCK_INTERVAL: Duration = Duration::from_secs(1);

/// Default polling interval for chunk file discovery.
pub const FILE_CHECK_INTERVAL: Duration = Duration::from_millis(1000);

/// Default interval between transcript flushes to the output file.
pub const TEXT_WRITE_INTERVAL: Duration = Duration::from_millis(5000);

/// Default per-attempt transcription timeout.
pub const PROCESSING_TIMEOUT: Duration = Duration::from_secs(30);

/// Default maximum concurrent transcription attempts.
pub const MAX_CONCURRENCY: usize = 2;

/// Default retry budget per chunk (attempts = retries + 1).
pub const MAX_RETRY_COUNT: u32 = 3;

/// Consecutive terminal failures that trip the dispatch circuit breaker.
///
/// Any success resets the counter, so scattered failures never trip it.
pub const CONSECUTIVE_FAILURE_LIMIT: u32 = 5;

/// Default sample rate declared in the synthesized track header, in Hz.
pub const SAMPLE_RATE: u32 = 48000;

/// Default channel count declared in the synthesized track header.
pub const CHANNELS: u16 = 1;

/// File extension for materialized chunk files.
pub const CHUNK_EXTENSION: &str = "webm";

/// Prefix for the session temp directory, applied to the recording basename.
pub const TEMP_DIR_PREFIX: &str = "temp_";
