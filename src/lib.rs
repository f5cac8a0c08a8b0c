//! scriva - Live chunked transcription for recordings
//!
//! Records an open-ended compressed audio stream as independently decodable
//! chunk files and keeps a consolidated transcript growing while the
//! recording is still in progress.

// Enforce error handling discipline
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod backend;
pub mod capture;
pub mod chunk;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod consolidate;
pub mod container;
pub mod defaults;
pub mod error;
pub mod output;
pub mod queue;
pub mod session;
pub mod watcher;

// Core seams (source → queue → consolidated transcript)
pub use backend::{CommandBackend, MockBackend, TranscriptionBackend, TranscriptionOutput};
pub use capture::{BlockSource, CaptureConfig, CaptureHandle, ChunkCapture};
pub use container::ContainerRepair;

// Pipeline data types
pub use chunk::{AudioChunk, ChunkResult, ChunkStatus, TranscriptSegment};
pub use queue::{QueueConfig, QueueStats, TranscriptionQueue};

// Session orchestration
pub use consolidate::{ResultConsolidator, TextFormat, Transcript};
pub use session::{RecordingSession, RunningSession, SessionConfig, SessionEvent};
pub use watcher::{ChunkFileWatcher, SessionState, WatcherConfig, WatcherStats};

// Error handling
pub use error::{Result, ScrivaError};

// Config
pub use config::Config;

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}
